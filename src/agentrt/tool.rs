//! Tool registry abstraction.
//!
//! Tool discovery, sandboxing, and credential handling live outside the
//! runtime core; the executor's handler reaches tools only through
//! [`ToolRegistry`]. A tool failure is not a request failure — the handler
//! reports it back to the model (and to observers via
//! `LLM_TOOL_CALL_END` events) and lets the model decide how to proceed.

use async_trait::async_trait;
use serde_json::Value;

use crate::agentrt::error::RuntimeError;

/// Trait-driven abstraction over an external tool registry/sandbox.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Invoke the named tool with JSON arguments.
    ///
    /// `credentials` carries an opaque caller credential (e.g. the request's
    /// auth token) for registries that scope tool access per caller.
    async fn invoke(
        &self,
        name: &str,
        args: Value,
        credentials: Option<&str>,
    ) -> Result<Value, RuntimeError>;

    /// Names of the tools currently available through this registry.
    fn tool_names(&self) -> Vec<String>;
}

/// A parsed tool-call directive extracted from model output.
///
/// The handler scans LLM responses for a JSON fragment of the form
/// `{"tool_call": {"name": "...", "arguments": {...}}}` and routes it
/// through the registry.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Name of the tool to execute.
    pub name: String,
    /// Raw JSON arguments supplied by the model.
    pub arguments: Value,
}

/// Scan `response` for a tool-call directive.
///
/// Accepts either a whole-response JSON object or an embedded object
/// starting at the first `{"tool_call"` occurrence. Returns `None` when the
/// response carries no (parseable) directive — plain prose never matches.
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    let start = response.find("{\"tool_call\"")?;
    // Walk to the matching close brace so trailing prose doesn't break parsing.
    let bytes = response[start..].as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let fragment = &response[start..start + end?];
    let value: Value = serde_json::from_str(fragment).ok()?;
    let call = value.get("tool_call")?;
    let name = call.get("name")?.as_str()?.to_string();
    let arguments = call
        .get("arguments")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));
    Some(ToolCall { name, arguments })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_prose_is_none() {
        assert!(parse_tool_call("The answer is 42.").is_none());
        assert!(parse_tool_call("").is_none());
    }

    #[test]
    fn test_parse_whole_response_directive() {
        let call = parse_tool_call(r#"{"tool_call": {"name": "search", "arguments": {"q": "rust"}}}"#)
            .unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments["q"], "rust");
    }

    #[test]
    fn test_parse_embedded_directive_with_trailing_prose() {
        let text = r#"Let me look that up. {"tool_call": {"name": "lookup", "arguments": {"key": "a}b"}}} Done."#;
        let call = parse_tool_call(text).unwrap();
        assert_eq!(call.name, "lookup");
        assert_eq!(call.arguments["key"], "a}b");
    }

    #[test]
    fn test_parse_missing_arguments_defaults_to_empty_object() {
        let call = parse_tool_call(r#"{"tool_call": {"name": "ping"}}"#).unwrap();
        assert_eq!(call.name, "ping");
        assert!(call.arguments.as_object().unwrap().is_empty());
    }
}
