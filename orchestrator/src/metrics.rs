use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

static CHAT_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_requests_total",
        "Chat requests by outcome",
        &["outcome"]
    )
    .expect("chat_requests_total registers once")
});

static STREAM_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_streams_total",
        "Opened completion streams by how they ended",
        &["outcome"]
    )
    .expect("chat_streams_total registers once")
});

static STAGE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_stage_failures_total",
        "Pipeline failures by stage",
        &["stage"]
    )
    .expect("chat_stage_failures_total registers once")
});

pub fn record_outcome(outcome: &str) {
    CHAT_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_stream_outcome(outcome: &str) {
    STREAM_OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_stage_failure(stage: &str) {
    STAGE_FAILURES.with_label_values(&[stage]).inc();
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> (Vec<u8>, String) {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    (buffer, encoder.format_type().to_string())
}
