//! Prometheus metrics for devis-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "devis_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for quote lifecycle events.
pub static QUOTE_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "devis_quote_events_total",
        "Total number of quote lifecycle events",
        &["event"]
    )
    .expect("Failed to register QUOTE_EVENTS")
});

/// Counter for invoices by creation mode.
pub static INVOICES_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "devis_invoices_created_total",
        "Total number of invoices created",
        &["mode"]
    )
    .expect("Failed to register INVOICES_CREATED")
});

/// Counter for applied payments by target kind.
pub static PAYMENTS_APPLIED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "devis_payments_applied_total",
        "Total number of payments applied",
        &["target"]
    )
    .expect("Failed to register PAYMENTS_APPLIED")
});

/// Counter for the money received, by target kind.
pub static PAYMENT_AMOUNT: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "devis_payment_amount_total",
        "Sum of applied payment amounts",
        &["target"]
    )
    .expect("Failed to register PAYMENT_AMOUNT")
});

/// Counter for cash-register closures by scope.
pub static CLOSURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "devis_closures_total",
        "Total number of cash-register closures",
        &["scope"]
    )
    .expect("Failed to register CLOSURES")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "devis_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&QUOTE_EVENTS);
    Lazy::force(&INVOICES_CREATED);
    Lazy::force(&PAYMENTS_APPLIED);
    Lazy::force(&PAYMENT_AMOUNT);
    Lazy::force(&CLOSURES);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_quote_event(event: &str) {
    QUOTE_EVENTS.with_label_values(&[event]).inc();
}

pub fn record_invoice_created(mode: &str) {
    INVOICES_CREATED.with_label_values(&[mode]).inc();
}

pub fn record_payment(target: &str, amount: Decimal) {
    PAYMENTS_APPLIED.with_label_values(&[target]).inc();
    PAYMENT_AMOUNT
        .with_label_values(&[target])
        .inc_by(amount.to_f64().unwrap_or_default());
}

pub fn record_closure(scope: &str) {
    CLOSURES.with_label_values(&[scope]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
