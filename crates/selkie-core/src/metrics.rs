//! Metrics collection for selkie
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Metrics are recorded through OpenTelemetry and exported via Prometheus
//! when the `otel` feature is enabled; no-ops otherwise.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::Counter;
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

// Cached instruments (created once, reused for all recordings)
#[cfg(feature = "otel")]
static OBJECTS_ACTIVATED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("selkie")
        .u64_counter(METRIC_NAME_OBJECTS_ACTIVATED_TOTAL)
        .with_description("Total number of object activations")
        .init()
});

#[cfg(feature = "otel")]
static OBJECTS_DEACTIVATED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("selkie")
        .u64_counter(METRIC_NAME_OBJECTS_DEACTIVATED_TOTAL)
        .with_description("Total number of object deactivations")
        .init()
});

#[cfg(feature = "otel")]
static RESOLUTIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("selkie")
        .u64_counter(METRIC_NAME_RESOLUTIONS_TOTAL)
        .with_description("Total number of servant resolutions")
        .init()
});

#[cfg(feature = "otel")]
static ADMISSIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("selkie")
        .u64_counter(METRIC_NAME_ADMISSIONS_TOTAL)
        .with_description("Total number of admission decisions")
        .init()
});

/// Record an object activation
#[cfg(feature = "otel")]
pub fn record_object_activated() {
    OBJECTS_ACTIVATED_COUNTER.add(1, &[]);
}

/// Record an object deactivation
#[cfg(feature = "otel")]
pub fn record_object_deactivated() {
    OBJECTS_DEACTIVATED_COUNTER.add(1, &[]);
}

/// Record a servant resolution
///
/// # Arguments
/// * `outcome` - "servant", "forward" or "error"
#[cfg(feature = "otel")]
pub fn record_resolution(outcome: &str) {
    RESOLUTIONS_COUNTER.add(1, &[KeyValue::new("outcome", outcome.to_string())]);
}

/// Record an admission decision
///
/// # Arguments
/// * `outcome` - "admitted", "discarded" or "inactive"
#[cfg(feature = "otel")]
pub fn record_admission(outcome: &str) {
    ADMISSIONS_COUNTER.add(1, &[KeyValue::new("outcome", outcome.to_string())]);
}

// No-op implementations when otel feature is disabled
#[cfg(not(feature = "otel"))]
pub fn record_object_activated() {}

#[cfg(not(feature = "otel"))]
pub fn record_object_deactivated() {}

#[cfg(not(feature = "otel"))]
pub fn record_resolution(_outcome: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_admission(_outcome: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_functions_dont_panic() {
        // These should not panic even without the otel feature
        record_object_activated();
        record_object_deactivated();
        record_resolution("servant");
        record_admission("admitted");
    }
}
