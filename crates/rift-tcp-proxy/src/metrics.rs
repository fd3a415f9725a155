//! Prometheus metrics for rift-tcp-proxy.
//!
//! Tracks sessions, rule selection, injected faults and backend pool health.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter,
    register_int_gauge, CounterVec, Encoder, Gauge, HistogramVec, IntCounter, IntGauge,
    TextEncoder,
};

lazy_static! {
    /// Total number of client sessions accepted
    pub static ref SESSIONS_TOTAL: IntCounter = register_int_counter!(
        "rift_tcp_sessions_total",
        "Total number of client sessions accepted by the proxy"
    )
    .unwrap();

    /// Sessions currently relaying traffic
    pub static ref ACTIVE_SESSIONS: IntGauge = register_int_gauge!(
        "rift_tcp_active_sessions",
        "Number of client sessions currently relaying traffic"
    )
    .unwrap();

    /// Rule selections, split by whether the percentage gate let the rule apply
    pub static ref RULE_SELECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "rift_tcp_rule_selections_total",
        "Total number of chunks a rule was selected for",
        &["rule", "applied"]  // applied: true|false
    )
    .unwrap();

    /// Total number of faults injected
    pub static ref FAULTS_INJECTED_TOTAL: CounterVec = register_counter_vec!(
        "rift_tcp_faults_injected_total",
        "Total number of faults injected",
        &["type", "rule"]  // type: delay|drop|return_empty|return_err
    )
    .unwrap();

    /// Delay fault duration in milliseconds
    pub static ref DELAY_INJECTED_MS: HistogramVec = register_histogram_vec!(
        "rift_tcp_delay_injected_ms",
        "Histogram of injected delay in milliseconds",
        &["rule"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap();

    /// Backend dial attempts
    pub static ref BACKEND_DIALS_TOTAL: CounterVec = register_counter_vec!(
        "rift_tcp_backend_dials_total",
        "Total number of backend connection attempts",
        &["result"]  // result: success|error|timeout
    )
    .unwrap();

    /// Sessions refused because no backend connection became free in time
    pub static ref POOL_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        "rift_tcp_pool_exhausted_total",
        "Total number of sessions refused because the backend pool was exhausted"
    )
    .unwrap();

    /// Idle backend connections
    pub static ref POOL_IDLE: Gauge = register_gauge!(
        "rift_tcp_pool_idle_connections",
        "Number of idle backend connections held by the pool"
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_session_start() {
    SESSIONS_TOTAL.inc();
    ACTIVE_SESSIONS.inc();
}

pub fn record_session_end() {
    ACTIVE_SESSIONS.dec();
}

pub fn record_rule_selection(rule: &str, applied: bool) {
    RULE_SELECTIONS_TOTAL
        .with_label_values(&[rule, if applied { "true" } else { "false" }])
        .inc();
}

pub fn record_fault_injection(fault_type: &str, rule: &str) {
    FAULTS_INJECTED_TOTAL
        .with_label_values(&[fault_type, rule])
        .inc();
}

pub fn record_delay_injection(rule: &str, duration_ms: u64) {
    DELAY_INJECTED_MS
        .with_label_values(&[rule])
        .observe(duration_ms as f64);

    record_fault_injection("delay", rule);
}

pub fn record_backend_dial(result: &str) {
    BACKEND_DIALS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_pool_exhausted() {
    POOL_EXHAUSTED_TOTAL.inc();
}

pub fn set_pool_idle(count: usize) {
    POOL_IDLE.set(count as f64);
}
