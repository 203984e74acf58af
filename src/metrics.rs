//! # Global Metrics Registry
//!
//! Prometheus counters for the client's observable behaviour: RPC retries,
//! poll cycles and transaction submissions. Metrics are registered lazily in
//! the default registry and rendered on demand in the text exposition format.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};
use tracing::error;

pub static RPC_RETRIES_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "streamfi_rpc_retries_total",
        "Number of RPC calls retried after a transient failure.",
        &["operation"]
    )
    .expect("Failed to register streamfi_rpc_retries_total")
});

pub static POLL_CYCLES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "streamfi_poll_cycles_total",
        "Completed poll cycles by loop and outcome.",
        &["poller", "outcome"]
    )
    .expect("Failed to register streamfi_poll_cycles_total")
});

pub static ITEMS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "streamfi_items_dropped_total",
        "Records dropped from a poll cycle because their read failed.",
        &["poller"]
    )
    .expect("Failed to register streamfi_items_dropped_total")
});

pub static TRANSACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "streamfi_transactions_total",
        "Transactions submitted by kind and outcome.",
        &["kind", "outcome"]
    )
    .expect("Failed to register streamfi_transactions_total")
});

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> String {
    // Touch the lazies so families show up even before first use.
    Lazy::force(&RPC_RETRIES_COUNTER);
    Lazy::force(&POLL_CYCLES);
    Lazy::force(&ITEMS_DROPPED);
    Lazy::force(&TRANSACTIONS);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
