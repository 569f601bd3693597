use agentrt::config::MetricsConfig;
use agentrt::metrics::MetricsCollector;
use std::sync::Arc;

#[test]
fn test_counter_sequences_are_monotonic() {
    let metrics = MetricsCollector::new();
    let mut observed = Vec::new();
    for _ in 0..100 {
        metrics.inc_counter("ops_total", &[("kind", "read")]);
        observed.push(metrics.counter_value("ops_total", &[("kind", "read")]));
    }
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*observed.last().unwrap(), 100);
}

#[test]
fn test_distinct_label_values_are_distinct_series() {
    let metrics = MetricsCollector::new();
    metrics.add_counter("ops_total", &[("kind", "read")], 3);
    metrics.add_counter("ops_total", &[("kind", "write")], 5);
    metrics.add_counter("ops_total", &[], 7);

    assert_eq!(metrics.counter_value("ops_total", &[("kind", "read")]), 3);
    assert_eq!(metrics.counter_value("ops_total", &[("kind", "write")]), 5);
    assert_eq!(metrics.counter_value("ops_total", &[]), 7);
    assert_eq!(metrics.snapshot().counters.len(), 3);
}

#[test]
fn test_gauges_move_both_ways() {
    let metrics = MetricsCollector::new();
    metrics.set_gauge("sessions_live", &[], 10.0);
    metrics.set_gauge("sessions_live", &[], 4.5);
    assert_eq!(metrics.gauge_value("sessions_live", &[]), Some(4.5));
    assert_eq!(metrics.gauge_value("missing", &[]), None);
}

#[test]
fn test_default_buckets_from_config() {
    let metrics = MetricsCollector::with_config(MetricsConfig {
        default_histogram_buckets: vec![0.1, 1.0],
    });
    metrics.observe("latency_seconds", &[], 0.05);
    metrics.observe("latency_seconds", &[], 0.5);
    metrics.observe("latency_seconds", &[], 5.0);

    let snapshot = metrics.snapshot();
    let point = &snapshot.histograms[0];
    assert_eq!(point.buckets, vec![(0.1, 1), (1.0, 2), (f64::INFINITY, 3)]);
    assert!((point.sum - 5.55).abs() < 1e-9);
    assert_eq!(point.count, 3);
}

#[test]
fn test_boundary_observation_lands_in_its_bucket() {
    let metrics = MetricsCollector::new();
    metrics.declare_buckets("sizes", &[1.0, 2.0]);
    // An observation exactly on a boundary counts into that bucket
    // (cumulative "less than or equal" semantics).
    metrics.observe("sizes", &[], 1.0);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.histograms[0].buckets[0], (1.0, 1));
}

#[tokio::test]
async fn test_shared_collector_across_tasks() {
    let metrics = Arc::new(MetricsCollector::new());
    let mut handles = Vec::new();
    for shard in 0..4 {
        let metrics = Arc::clone(&metrics);
        handles.push(tokio::spawn(async move {
            let shard = shard.to_string();
            for _ in 0..500 {
                metrics.inc_counter("sharded_total", &[("shard", &shard)]);
                metrics.observe("work_seconds", &[], 0.001);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.counters.iter().map(|c| c.value).sum::<u64>(), 2000);
    assert_eq!(metrics.histogram_count("work_seconds", &[]), 2000);
}

#[test]
fn test_timer_feeds_named_histogram() {
    let metrics = MetricsCollector::new();
    let timer = metrics.start_timer("step_seconds", &[("step", "load")]);
    std::thread::sleep(std::time::Duration::from_millis(5));
    let elapsed = timer.stop();
    assert!(elapsed >= 0.005);

    let snapshot = metrics.snapshot();
    let point = snapshot
        .histograms
        .iter()
        .find(|h| h.name == "step_seconds")
        .unwrap();
    assert_eq!(point.count, 1);
    assert!(point.sum >= 0.005);
}

#[test]
fn test_global_collector_is_shared() {
    let a = MetricsCollector::global();
    let b = MetricsCollector::global();
    a.inc_counter("global_probe_total", &[]);
    assert!(b.counter_value("global_probe_total", &[]) >= 1);
}
