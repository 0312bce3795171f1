//! Metrics registry for Tributary observability
//!
//! Instruments are created lazily on the global meter, so they are no-ops
//! until telemetry installs an exporting meter provider.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for Tributary metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("tributary"));

/// Histogram of reconcile pass duration
///
/// Labels:
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("tributary_apiserversource_reconcile_duration_seconds")
        .with_description("Duration of ApiServerSource reconcile passes in seconds")
        .with_unit("s")
        .build()
});

/// Counter of failed reconcile passes
///
/// Labels:
/// - `reason`: condition reason or `transport`
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("tributary_apiserversource_reconcile_errors_total")
        .with_description("Total number of failed ApiServerSource reconcile passes")
        .with_unit("{errors}")
        .build()
});

/// Counter of SubjectAccessReviews issued
///
/// Labels:
/// - `verb`: get, list, watch
/// - `allowed`: true, false
pub static ACCESS_REVIEWS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("tributary_access_reviews_total")
        .with_description("Total number of SubjectAccessReviews created")
        .with_unit("{reviews}")
        .build()
});

/// Counter of receive adapter mutations
///
/// Labels:
/// - `action`: created, updated
pub static WORKLOAD_ACTIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("tributary_workload_actions_total")
        .with_description("Total number of receive adapter Deployments created or replaced")
        .with_unit("{actions}")
        .build()
});

/// Record one reconcile pass
pub fn record_reconcile(seconds: f64, error_reason: Option<&str>) {
    let result = if error_reason.is_some() { "error" } else { "success" };
    RECONCILE_DURATION.record(seconds, &[KeyValue::new("result", result)]);
    if let Some(reason) = error_reason {
        RECONCILE_ERRORS.add(1, &[KeyValue::new("reason", reason.to_string())]);
    }
}

/// Record one SubjectAccessReview verdict
pub fn record_access_review(verb: &'static str, allowed: bool) {
    ACCESS_REVIEWS.add(
        1,
        &[
            KeyValue::new("verb", verb),
            KeyValue::new("allowed", allowed),
        ],
    );
}

/// Record a Deployment create or replace
pub fn record_workload_action(action: &'static str) {
    WORKLOAD_ACTIONS.add(1, &[KeyValue::new("action", action)]);
}
