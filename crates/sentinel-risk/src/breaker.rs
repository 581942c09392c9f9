//! RiskCircuitBreaker implementation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use sentinel_core::{Clock, FailurePolicy, GuardErrorKind, RunState};
use sentinel_store::DynRunLedger;
use sentinel_telemetry::Metrics;

use crate::error::{RiskError, RiskResult};

const PRIMITIVE: &str = "risk_breaker";

// ============================================================================
// RiskReason
// ============================================================================

/// Why a trade was allowed or blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskReason {
    WithinLimit,
    WouldExceedLimit,
    CircuitBreakerDisabled,
    RunNotFound,
    /// Ledger could not be read.
    LedgerUnavailable,
    /// Cumulative plus proposed value is not representable.
    ValueOutOfRange,
}

impl RiskReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WithinLimit => "within_limit",
            Self::WouldExceedLimit => "would_exceed_limit",
            Self::CircuitBreakerDisabled => "circuit_breaker_disabled",
            Self::RunNotFound => "run_not_found",
            Self::LedgerUnavailable => "ledger_unavailable",
            Self::ValueOutOfRange => "value_out_of_range",
        }
    }

    /// Taxonomy kind for non-routine outcomes.
    pub fn error_kind(&self) -> Option<GuardErrorKind> {
        match self {
            Self::WithinLimit => None,
            Self::WouldExceedLimit | Self::ValueOutOfRange => {
                Some(GuardErrorKind::CapacityExceeded)
            }
            Self::CircuitBreakerDisabled => Some(GuardErrorKind::ConfigurationDisabled),
            Self::RunNotFound => Some(GuardErrorKind::NotFound),
            Self::LedgerUnavailable => Some(GuardErrorKind::BackendUnavailable),
        }
    }
}

impl fmt::Display for RiskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RiskDecision
// ============================================================================

/// Audit record of one evaluation.
///
/// `cumulative` and `limit` are `None` when no run snapshot was read.
/// `new_cumulative` and `headroom` are only set when the limit is enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub allowed: bool,
    pub reason: RiskReason,
    pub run_id: String,
    pub proposed_value: Decimal,
    pub cumulative: Option<Decimal>,
    pub limit: Option<Decimal>,
    pub new_cumulative: Option<Decimal>,
    pub headroom: Option<Decimal>,
    pub evaluated_at: DateTime<Utc>,
    pub error_kind: Option<GuardErrorKind>,
}

impl RiskDecision {
    fn without_snapshot(
        reason: RiskReason,
        run_id: &str,
        proposed_value: Decimal,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            allowed: false,
            reason,
            run_id: run_id.to_string(),
            proposed_value,
            cumulative: None,
            limit: None,
            new_cumulative: None,
            headroom: None,
            evaluated_at,
            error_kind: reason.error_kind(),
        }
    }
}

// ============================================================================
// RiskCircuitBreaker
// ============================================================================

/// Gates proposed trade values against a run's capital ceiling.
///
/// Snapshot check, not a reservation: the ledger's running total is
/// updated by a separate writer as trades settle.
pub struct RiskCircuitBreaker {
    ledger: DynRunLedger,
    clock: Arc<dyn Clock>,
}

impl RiskCircuitBreaker {
    /// Backend errors and unknown runs always block.
    pub const POLICY: FailurePolicy = FailurePolicy::FailClosed;

    pub fn new(ledger: DynRunLedger, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Evaluate a proposed trade. The sign of `proposed_value` is ignored.
    pub async fn evaluate(&self, run_id: &str, proposed_value: Decimal) -> RiskDecision {
        let now = self.clock.now();

        let decision = match self.fetch_run(run_id).await {
            Ok(run) => Self::check_limit(&run, proposed_value, now),
            Err(RiskError::RunNotFound(_)) => {
                warn!(run_id, %proposed_value, "Run not found, blocking trade");
                RiskDecision::without_snapshot(RiskReason::RunNotFound, run_id, proposed_value, now)
            }
            Err(RiskError::Ledger(e)) => {
                let kind = e.kind();
                error!(run_id, %proposed_value, error = %e, %kind, "Run ledger unavailable, blocking trade");
                Metrics::backend_error(PRIMITIVE, kind.as_str(), &Self::POLICY.to_string());
                RiskDecision::without_snapshot(
                    RiskReason::LedgerUnavailable,
                    run_id,
                    proposed_value,
                    now,
                )
            }
        };

        Metrics::risk_decision(decision.reason.as_str());
        decision
    }

    async fn fetch_run(&self, run_id: &str) -> RiskResult<RunState> {
        self.ledger
            .get_run(run_id)
            .await?
            .ok_or_else(|| RiskError::RunNotFound(run_id.to_string()))
    }

    fn check_limit(run: &RunState, proposed_value: Decimal, now: DateTime<Utc>) -> RiskDecision {
        let cumulative = run.cumulative_buy_succeeded_value;
        let limit = run.max_equity_limit_usd;

        let mut decision = RiskDecision {
            allowed: true,
            reason: RiskReason::CircuitBreakerDisabled,
            run_id: run.run_id.clone(),
            proposed_value,
            cumulative: Some(cumulative),
            limit: Some(limit),
            new_cumulative: None,
            headroom: None,
            evaluated_at: now,
            error_kind: None,
        };

        if !run.limit_enabled() {
            debug!(run_id = %run.run_id, %limit, "Risk breaker disabled for run");
            decision.error_kind = decision.reason.error_kind();
            return decision;
        }

        decision.headroom = run.headroom();
        let Some(new_cumulative) = cumulative.checked_add(proposed_value.abs()) else {
            warn!(
                run_id = %run.run_id,
                %proposed_value,
                %cumulative,
                "Cumulative value overflows, blocking trade"
            );
            decision.allowed = false;
            decision.reason = RiskReason::ValueOutOfRange;
            decision.error_kind = decision.reason.error_kind();
            return decision;
        };
        decision.new_cumulative = Some(new_cumulative);

        if new_cumulative > limit {
            warn!(
                run_id = %run.run_id,
                %proposed_value,
                %cumulative,
                %limit,
                headroom = ?decision.headroom,
                "Trade would exceed run limit"
            );
            decision.allowed = false;
            decision.reason = RiskReason::WouldExceedLimit;
        } else {
            debug!(
                run_id = %run.run_id,
                %proposed_value,
                %new_cumulative,
                %limit,
                "Trade within run limit"
            );
            decision.reason = RiskReason::WithinLimit;
        }
        decision.error_kind = decision.reason.error_kind();
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use sentinel_core::ManualClock;
    use sentinel_store::MemoryRunLedger;

    fn setup() -> (Arc<MemoryRunLedger>, RiskCircuitBreaker) {
        let ledger = Arc::new(MemoryRunLedger::new());
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(),
        ));
        let breaker = RiskCircuitBreaker::new(ledger.clone(), clock);
        (ledger, breaker)
    }

    #[tokio::test]
    async fn test_would_exceed_limit() {
        let (ledger, breaker) = setup();
        ledger.upsert(RunState::new("run-1", dec!(100000), dec!(95000)));

        let decision = breaker.evaluate("run-1", dec!(10000)).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, RiskReason::WouldExceedLimit);
        assert_eq!(decision.new_cumulative, Some(dec!(105000)));
        assert_eq!(decision.headroom, Some(dec!(5000)));
        assert_eq!(decision.error_kind, Some(GuardErrorKind::CapacityExceeded));
    }

    #[tokio::test]
    async fn test_within_limit_at_exact_ceiling() {
        let (ledger, breaker) = setup();
        ledger.upsert(RunState::new("run-1", dec!(100000), dec!(95000)));

        let decision = breaker.evaluate("run-1", dec!(5000)).await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, RiskReason::WithinLimit);
        assert_eq!(decision.new_cumulative, Some(dec!(100000)));
        assert_eq!(decision.error_kind, None);
    }

    #[tokio::test]
    async fn test_negative_proposal_counts_as_absolute() {
        let (ledger, breaker) = setup();
        ledger.upsert(RunState::new("run-1", dec!(100000), dec!(95000)));

        let decision = breaker.evaluate("run-1", dec!(-6000)).await;
        assert!(!decision.allowed);
        assert_eq!(decision.new_cumulative, Some(dec!(101000)));
    }

    #[tokio::test]
    async fn test_non_positive_limit_disables_breaker() {
        let (ledger, breaker) = setup();
        ledger.upsert(RunState::new("run-0", dec!(0), dec!(999999999)));
        ledger.upsert(RunState::new("run-neg", dec!(-1), dec!(0)));

        for run_id in ["run-0", "run-neg"] {
            let decision = breaker.evaluate(run_id, dec!(1000000)).await;
            assert!(decision.allowed);
            assert_eq!(decision.reason, RiskReason::CircuitBreakerDisabled);
            assert_eq!(decision.headroom, None);
        }
    }

    #[tokio::test]
    async fn test_overflowing_cumulative_fails_closed() {
        let (ledger, breaker) = setup();
        ledger.upsert(RunState::new("run-big", Decimal::MAX, Decimal::MAX - dec!(1)));

        let decision = breaker.evaluate("run-big", Decimal::MAX).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, RiskReason::ValueOutOfRange);
        assert_eq!(decision.new_cumulative, None);
        assert_eq!(decision.headroom, Some(dec!(1)));
        assert_eq!(decision.error_kind, Some(GuardErrorKind::CapacityExceeded));
    }

    #[tokio::test]
    async fn test_unknown_run_fails_closed() {
        let (_ledger, breaker) = setup();

        let decision = breaker.evaluate("run-404", dec!(1)).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, RiskReason::RunNotFound);
        assert_eq!(decision.cumulative, None);
        assert_eq!(decision.error_kind, Some(GuardErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_unavailable_ledger_fails_closed() {
        let (ledger, breaker) = setup();
        ledger.upsert(RunState::new("run-1", dec!(0), dec!(0)));
        ledger.set_unavailable(true);

        // Even a disabled run is blocked when the ledger cannot be read
        let decision = breaker.evaluate("run-1", dec!(1)).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, RiskReason::LedgerUnavailable);
        assert_eq!(decision.error_kind, Some(GuardErrorKind::BackendUnavailable));
    }

    #[tokio::test]
    async fn test_concurrent_checks_see_same_snapshot() {
        let (ledger, breaker) = setup();
        ledger.upsert(RunState::new("run-1", dec!(100000), dec!(90000)));

        // Neither trade has settled, so both pass: the ceiling is advisory
        let a = breaker.evaluate("run-1", dec!(8000)).await;
        let b = breaker.evaluate("run-1", dec!(8000)).await;
        assert!(a.allowed && b.allowed);

        ledger.settle_buy("run-1", dec!(8000));
        let c = breaker.evaluate("run-1", dec!(8000)).await;
        assert!(!c.allowed);
        assert_eq!(c.headroom, Some(dec!(2000)));
    }

    #[tokio::test]
    async fn test_decision_serializes_for_audit() {
        let (ledger, breaker) = setup();
        ledger.upsert(RunState::new("run-1", dec!(100000), dec!(95000)));

        let decision = breaker.evaluate("run-1", dec!(10000)).await;
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["reason"], "would_exceed_limit");
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["error_kind"], "capacity_exceeded");

        let back: RiskDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back, decision);
    }
}
