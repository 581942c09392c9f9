//! FailureDedupTracker implementation.
//!
//! Per-signature lifecycle:
//! 1. First occurrence: create a FAILING record and notify
//! 2. Repeat inside the quiet period: bump `repeat_count`, suppress
//! 3. Repeat after the quiet period: notify again and restart the clock
//! 4. Successful run: `check_recovery` marks every FAILING record of the
//!    (component, environment) RECOVERED and reports them once
//!
//! A signature that recurs after recovery starts a new episode.
//!
//! Backend errors resolve through the configured policy. The default is
//! fail-open: a duplicate alert beats a dropped one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use sentinel_core::{
    Clock, DedupRecord, DedupStatus, FailurePolicy, GuardErrorKind, SCHEMA_VERSION,
};
use sentinel_store::{
    decode_record, encode_record, CreateCondition, DynCoordinationStore, ItemQuery, ItemUpdate,
    StoreError, StoreResult, Table,
};
use sentinel_telemetry::Metrics;

use crate::error::{AlertError, AlertResult};
use crate::signature::{key_prefix, ErrorDetails, ErrorSignature};

const PRIMITIVE: &str = "failure_dedup";

/// Condition-failure retries per occurrence before falling back to policy.
const MAX_UPDATE_ATTEMPTS: u32 = 3;

/// Upper bound for `quiet_period_mins` (30 days).
pub const MAX_QUIET_PERIOD_MINS: u64 = 30 * 24 * 60;

/// Upper bound for `retention_days` (10 years).
pub const MAX_RETENTION_DAYS: u64 = 3650;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Repeats within this window after a notification are suppressed.
    #[serde(default = "default_quiet_period_mins")]
    pub quiet_period_mins: u64,
    /// Store retention for dedup records.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_policy")]
    pub policy: FailurePolicy,
}

fn default_quiet_period_mins() -> u64 {
    120
}

fn default_retention_days() -> u64 {
    90
}

fn default_policy() -> FailurePolicy {
    FailurePolicy::FailOpen
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            quiet_period_mins: default_quiet_period_mins(),
            retention_days: default_retention_days(),
            policy: default_policy(),
        }
    }
}

impl DedupConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_mins.saturating_mul(60))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    pub fn validate(&self) -> AlertResult<()> {
        if self.quiet_period_mins == 0 {
            return Err(AlertError::InvalidConfig(
                "quiet_period_mins must be > 0".to_string(),
            ));
        }
        if self.retention_days == 0 {
            return Err(AlertError::InvalidConfig(
                "retention_days must be > 0".to_string(),
            ));
        }
        if self.quiet_period_mins > MAX_QUIET_PERIOD_MINS {
            return Err(AlertError::InvalidConfig(format!(
                "quiet_period_mins must be <= {MAX_QUIET_PERIOD_MINS}"
            )));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(AlertError::InvalidConfig(format!(
                "retention_days must be <= {MAX_RETENTION_DAYS}"
            )));
        }
        Ok(())
    }

    fn ttl_from(&self, now: DateTime<Utc>) -> i64 {
        let retention = i64::try_from(self.retention().as_secs()).unwrap_or(i64::MAX);
        now.timestamp().saturating_add(retention)
    }
}

// ============================================================================
// Decisions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyReason {
    /// First occurrence of the signature.
    New,
    /// Repeat inside the quiet period.
    Suppressed,
    /// Repeat after the quiet period.
    QuietPeriodElapsed,
    /// Recurrence after the signature was marked recovered.
    Reopened,
    /// Backend error, notifying anyway.
    FailOpen,
    /// Backend error, suppressing.
    FailClosed,
}

impl NotifyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Suppressed => "suppressed",
            Self::QuietPeriodElapsed => "quiet_period_elapsed",
            Self::Reopened => "reopened",
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        }
    }
}

/// Result of [`FailureDedupTracker::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifyDecision {
    pub notify: bool,
    pub reason: NotifyReason,
    pub dedup_key: String,
    /// Suppressed occurrences in the current episode, as of this call.
    pub repeat_count: u64,
    pub degraded: Option<GuardErrorKind>,
}

impl NotifyDecision {
    fn new(reason: NotifyReason, dedup_key: &str, repeat_count: u64) -> Self {
        Self {
            notify: !matches!(reason, NotifyReason::Suppressed | NotifyReason::FailClosed),
            reason,
            dedup_key: dedup_key.to_string(),
            repeat_count,
            degraded: None,
        }
    }
}

/// One failure signature that recovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredFailure {
    pub dedup_key: String,
    pub failed_step: String,
    pub error_type: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub repeat_count: u64,
}

/// Everything that recovered for a (component, environment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryInfo {
    pub component: String,
    pub environment: String,
    pub recovered_run_id: String,
    pub recovered_at: DateTime<Utc>,
    pub failures: Vec<RecoveredFailure>,
}

impl RecoveryInfo {
    pub fn count(&self) -> usize {
        self.failures.len()
    }
}

// ============================================================================
// FailureDedupTracker
// ============================================================================

/// Alert storm suppression keyed by error signature.
pub struct FailureDedupTracker {
    store: DynCoordinationStore,
    clock: Arc<dyn Clock>,
    config: DedupConfig,
}

impl FailureDedupTracker {
    pub fn new(store: DynCoordinationStore, clock: Arc<dyn Clock>, config: DedupConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Whether the caller should send an alert for this failure.
    pub async fn should_notify(
        &self,
        component: &str,
        environment: &str,
        failed_step: &str,
        error: &ErrorDetails,
        run_id: &str,
    ) -> bool {
        self.evaluate(component, environment, failed_step, error, run_id)
            .await
            .notify
    }

    /// Record an occurrence and decide whether to notify.
    pub async fn evaluate(
        &self,
        component: &str,
        environment: &str,
        failed_step: &str,
        error: &ErrorDetails,
        run_id: &str,
    ) -> NotifyDecision {
        let now = self.clock.now();
        let signature = ErrorSignature::new(component, environment, failed_step, error);
        let key = signature.dedup_key();

        let decision = match self.load(&key).await {
            Ok(Some(record)) => self.on_existing(record, run_id, now).await,
            Ok(None) => self.on_first(&signature, &key, run_id, now).await,
            Err(e) => Err(e),
        }
        .unwrap_or_else(|e| self.on_backend_error(&key, &e));

        match decision.reason {
            NotifyReason::Suppressed => debug!(
                dedup_key = %key,
                run_id,
                repeat_count = decision.repeat_count,
                "Failure notification suppressed"
            ),
            reason => info!(
                dedup_key = %key,
                run_id,
                reason = reason.as_str(),
                notify = decision.notify,
                "Failure notification decided"
            ),
        }
        Metrics::failure_notify(decision.reason.as_str());
        decision
    }

    async fn on_first(
        &self,
        signature: &ErrorSignature,
        key: &str,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<NotifyDecision> {
        let record = DedupRecord {
            schema_version: SCHEMA_VERSION,
            dedup_key: key.to_string(),
            component: signature.component.clone(),
            environment: signature.environment.clone(),
            failed_step: signature.failed_step.clone(),
            error_type: signature.error_type.clone(),
            error_hash: signature.hash8.clone(),
            status: DedupStatus::Failing,
            first_seen_at: now,
            last_seen_at: now,
            repeat_count: 0,
            last_notified_at: now,
            last_run_id: run_id.to_string(),
            recovered_run_id: None,
            recovered_at: None,
            ttl: self.config.ttl_from(now),
        };
        let item = encode_record(&record)?;

        match self
            .store
            .conditional_create(Table::DedupRecords, key, item, CreateCondition::IfAbsent)
            .await
        {
            Ok(()) => Ok(NotifyDecision::new(NotifyReason::New, key, 0)),
            Err(e) if e.is_already_exists() => {
                // Another worker recorded the first occurrence concurrently
                debug!(dedup_key = %key, "Dedup record created concurrently");
                match self.load(key).await? {
                    Some(existing) => self.on_existing(existing, run_id, now).await,
                    None => Err(StoreError::NotFound {
                        key: key.to_string(),
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a repeat occurrence to an existing record.
    ///
    /// Every update is conditioned on the fields the decision was based on.
    /// When another worker changed the record first, re-read it and decide
    /// again, so each quiet period and each reopen notifies exactly once.
    async fn on_existing(
        &self,
        record: DedupRecord,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<NotifyDecision> {
        let mut record = record;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.apply_occurrence(&record, run_id, now).await {
                Err(e) if e.is_condition_failed() && attempts < MAX_UPDATE_ATTEMPTS => {
                    debug!(dedup_key = %record.dedup_key, error = %e, "Dedup record changed concurrently, re-reading");
                    record = match self.load(&record.dedup_key).await? {
                        Some(current) => current,
                        None => {
                            return Err(StoreError::NotFound {
                                key: record.dedup_key,
                            })
                        }
                    };
                }
                result => return result,
            }
        }
    }

    async fn apply_occurrence(
        &self,
        record: &DedupRecord,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<NotifyDecision> {
        let key = record.dedup_key.as_str();

        if !record.is_failing() {
            let update = ItemUpdate::new()
                .require("status", DedupStatus::Recovered.as_str())
                .set("status", Value::from(DedupStatus::Failing.as_str()))
                .set_value("first_seen_at", &now)?
                .set_value("last_seen_at", &now)?
                .set_value("last_notified_at", &now)?
                .set("repeat_count", Value::from(0))
                .set("last_run_id", Value::from(run_id))
                .set("recovered_run_id", Value::Null)
                .set("recovered_at", Value::Null)
                .set("ttl", Value::from(self.config.ttl_from(now)));
            self.store.update(Table::DedupRecords, key, update).await?;
            return Ok(NotifyDecision::new(NotifyReason::Reopened, key, 0));
        }

        let failing = DedupStatus::Failing.as_str();
        if record.in_quiet_period(now, self.config.quiet_period()) {
            let update = ItemUpdate::new()
                .require("status", failing)
                .increment("repeat_count", 1)
                .set_value("last_seen_at", &now)?
                .set("last_run_id", Value::from(run_id));
            self.store.update(Table::DedupRecords, key, update).await?;
            Ok(NotifyDecision::new(
                NotifyReason::Suppressed,
                key,
                record.repeat_count.saturating_add(1),
            ))
        } else {
            // Only the worker that still sees the old notification time
            // restarts the quiet period.
            let update = ItemUpdate::new()
                .require("status", failing)
                .require_value("last_notified_at", &record.last_notified_at)?
                .set_value("last_seen_at", &now)?
                .set_value("last_notified_at", &now)?
                .set("last_run_id", Value::from(run_id));
            self.store.update(Table::DedupRecords, key, update).await?;
            Ok(NotifyDecision::new(
                NotifyReason::QuietPeriodElapsed,
                key,
                record.repeat_count,
            ))
        }
    }

    fn on_backend_error(&self, key: &str, error: &StoreError) -> NotifyDecision {
        let kind = error.kind();
        let policy = self.config.policy;
        Metrics::backend_error(PRIMITIVE, kind.as_str(), &policy.to_string());

        let reason = if policy.allows_on_error() {
            warn!(dedup_key = %key, error = %error, %kind, "Dedup backend error, notifying anyway");
            NotifyReason::FailOpen
        } else {
            warn!(dedup_key = %key, error = %error, %kind, "Dedup backend error, suppressing");
            NotifyReason::FailClosed
        };
        NotifyDecision {
            degraded: Some(kind),
            ..NotifyDecision::new(reason, key, 0)
        }
    }

    /// Mark every FAILING signature of `(component, environment)` as
    /// recovered by `run_id`.
    ///
    /// Returns `None` when nothing was failing. Each record is reported by
    /// exactly one caller; records that could not be marked stay FAILING and
    /// are picked up by the next call.
    pub async fn check_recovery(
        &self,
        component: &str,
        environment: &str,
        run_id: &str,
    ) -> Option<RecoveryInfo> {
        let now = self.clock.now();
        let query = ItemQuery::prefix(key_prefix(component, environment))
            .filter("component", component)
            .filter("environment", environment)
            .filter("status", DedupStatus::Failing.as_str());

        let items = match self.store.query(Table::DedupRecords, query).await {
            Ok(items) => items,
            Err(e) => {
                let kind = e.kind();
                warn!(component, environment, error = %e, %kind, "Recovery check failed, deferring");
                Metrics::backend_error(PRIMITIVE, kind.as_str(), &self.config.policy.to_string());
                return None;
            }
        };

        let mut failures = Vec::with_capacity(items.len());
        for (key, item) in items {
            let record: DedupRecord = match decode_record(item) {
                Ok(record) => record,
                Err(e) => {
                    warn!(dedup_key = %key, error = %e, "Skipping unreadable dedup record");
                    continue;
                }
            };
            match self.mark_recovered(&key, run_id, now).await {
                Ok(()) => failures.push(RecoveredFailure {
                    dedup_key: key,
                    failed_step: record.failed_step,
                    error_type: record.error_type,
                    first_seen_at: record.first_seen_at,
                    last_seen_at: record.last_seen_at,
                    repeat_count: record.repeat_count,
                }),
                Err(e) if e.is_condition_failed() => {
                    debug!(dedup_key = %key, "Already recovered by another run");
                }
                Err(e) => {
                    warn!(dedup_key = %key, error = %e, "Failed to mark recovered, will retry");
                }
            }
        }

        if failures.is_empty() {
            return None;
        }

        info!(
            component,
            environment,
            run_id,
            recovered = failures.len(),
            "Failures recovered"
        );
        Metrics::failure_recovered(component, failures.len());
        Some(RecoveryInfo {
            component: component.to_string(),
            environment: environment.to_string(),
            recovered_run_id: run_id.to_string(),
            recovered_at: now,
            failures,
        })
    }

    async fn mark_recovered(&self, key: &str, run_id: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let update = ItemUpdate::new()
            .require("status", DedupStatus::Failing.as_str())
            .set("status", Value::from(DedupStatus::Recovered.as_str()))
            .set("recovered_run_id", Value::from(run_id))
            .set_value("recovered_at", &now)?;
        self.store.update(Table::DedupRecords, key, update).await
    }

    /// Current record for a dedup key.
    pub async fn record(&self, dedup_key: &str) -> AlertResult<Option<DedupRecord>> {
        Ok(self.load(dedup_key).await?)
    }

    async fn load(&self, key: &str) -> StoreResult<Option<DedupRecord>> {
        match self.store.get(Table::DedupRecords, key).await? {
            Some(item) => decode_record(item).map(Some),
            None => Ok(None),
        }
    }
}
