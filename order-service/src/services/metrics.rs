//! Prometheus metrics for order-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Settlement counter by outcome (completed, or the failure label).
pub static SETTLEMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "order_settlements_total",
        "Total number of settlement attempts",
        &["outcome"]
    )
    .expect("Failed to register settlements_total")
});

/// End-to-end settlement duration, invoice call included.
pub static SETTLEMENT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "order_settlement_duration_seconds",
        "Settlement duration in seconds",
        &["outcome"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register settlement_duration")
});

/// Voucher stock consumed, by scope (brand, total).
pub static VOUCHER_CONSUMPTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "order_voucher_consumptions_total",
        "Total number of voucher units consumed",
        &["scope"]
    )
    .expect("Failed to register voucher_consumptions_total")
});

/// Invoice provider calls by outcome.
pub static INVOICE_GATEWAY_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "order_invoice_gateway_calls_total",
        "Total number of invoice provider calls",
        &["outcome"]
    )
    .expect("Failed to register invoice_gateway_calls_total")
});

/// Sum of priced order totals in the smallest currency unit.
pub static ORDER_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "order_amount_total",
        "Total amount of priced orders",
        &["currency"]
    )
    .expect("Failed to register order_amount_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "order_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SETTLEMENTS_TOTAL);
    Lazy::force(&SETTLEMENT_DURATION);
    Lazy::force(&VOUCHER_CONSUMPTIONS_TOTAL);
    Lazy::force(&INVOICE_GATEWAY_CALLS_TOTAL);
    Lazy::force(&ORDER_AMOUNT_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
