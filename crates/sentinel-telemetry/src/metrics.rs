//! Prometheus metrics for the coordination primitives.
//!
//! Covers:
//! - Fetch lock admissions, deduplications and releases
//! - Risk breaker decisions by reason
//! - Connection breaker state and transitions
//! - Failure notification outcomes and recoveries
//! - Backend errors by primitive and the policy applied
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder};

use crate::error::TelemetryResult;

/// Fetch lock acquisition outcomes.
/// Labels: outcome (acquired/deduplicated/fail_open/fail_closed/race_fail_open)
pub static FETCH_LOCK_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_fetch_lock_total",
        "Fetch lock acquisition attempts by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Fetch lock releases.
pub static FETCH_LOCK_RELEASE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_fetch_lock_release_total",
        "Fetch lock early releases by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Risk breaker decisions.
pub static RISK_DECISION_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_risk_decision_total",
        "Risk circuit breaker decisions by reason",
        &["reason"]
    )
    .unwrap()
});

/// Connection breaker state (0 = closed, 1 = half-open, 2 = open).
pub static CONNECTION_BREAKER_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "sentinel_connection_breaker_state",
        "Connection circuit breaker state (0=closed, 1=half_open, 2=open)",
        &["resource"]
    )
    .unwrap()
});

/// Connection breaker transitions.
pub static CONNECTION_BREAKER_TRANSITION_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_connection_breaker_transition_total",
        "Connection circuit breaker state transitions",
        &["resource", "to"]
    )
    .unwrap()
});

/// Failure notification outcomes.
pub static FAILURE_NOTIFY_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_failure_notify_total",
        "Failure notification decisions by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Failure signatures marked recovered.
pub static FAILURE_RECOVERED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_failure_recovered_total",
        "Failure signatures marked recovered",
        &["component"]
    )
    .unwrap()
});

/// Backend errors seen by a primitive, with the policy that was applied.
pub static BACKEND_ERROR_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_backend_error_total",
        "Coordination store / ledger errors by primitive and applied policy",
        &["primitive", "kind", "policy"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a fetch lock acquisition outcome.
    pub fn fetch_lock(outcome: &str) {
        FETCH_LOCK_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a fetch lock release.
    pub fn fetch_lock_release(ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        FETCH_LOCK_RELEASE_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a risk breaker decision.
    pub fn risk_decision(reason: &str) {
        RISK_DECISION_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Set the connection breaker state gauge.
    pub fn connection_breaker_state(resource: &str, value: f64) {
        CONNECTION_BREAKER_STATE
            .with_label_values(&[resource])
            .set(value);
    }

    /// Record a connection breaker transition.
    pub fn connection_breaker_transition(resource: &str, to: &str) {
        CONNECTION_BREAKER_TRANSITION_TOTAL
            .with_label_values(&[resource, to])
            .inc();
    }

    /// Record a failure notification decision.
    pub fn failure_notify(outcome: &str) {
        FAILURE_NOTIFY_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record recovered failure signatures.
    pub fn failure_recovered(component: &str, count: usize) {
        FAILURE_RECOVERED_TOTAL
            .with_label_values(&[component])
            .inc_by(count as f64);
    }

    /// Record a backend error and the policy applied to it.
    pub fn backend_error(primitive: &str, kind: &str, policy: &str) {
        BACKEND_ERROR_TOTAL
            .with_label_values(&[primitive, kind, policy])
            .inc();
    }

    /// Render the default registry in Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
