//! Schema-versioned records persisted in (or read from) external stores.
//!
//! Each record kind is an explicit struct carrying `schema_version`.
//! Records are validated when they cross the store boundary; see
//! [`VersionedRecord::validate`].

use crate::error::{CoreError, Result};
use crate::ids::CorrelationId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Current schema version written by this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// A record kind that can be written to and read back from a store.
pub trait VersionedRecord: Serialize + DeserializeOwned {
    /// Tag written alongside the record (`kind` field).
    const KIND: &'static str;

    fn schema_version(&self) -> u32;

    /// Validate a record read from (or about to be written to) a store.
    fn validate(&self) -> Result<()>;
}

fn check_version(actual: u32) -> Result<()> {
    if actual != SCHEMA_VERSION {
        return Err(CoreError::SchemaVersion {
            expected: SCHEMA_VERSION,
            actual,
        });
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidRecord(format!("{field} is empty")));
    }
    Ok(())
}

fn ceil_epoch_secs(at: DateTime<Utc>) -> i64 {
    if at.timestamp_subsec_nanos() > 0 {
        at.timestamp() + 1
    } else {
        at.timestamp()
    }
}

/// `None` when `duration` does not fit a chrono duration.
fn to_chrono(duration: Duration) -> Option<chrono::Duration> {
    i64::try_from(duration.as_millis())
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
}

// ============================================================================
// FetchLockRecord
// ============================================================================

/// Claim on the right to perform a fetch for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchLockRecord {
    pub schema_version: u32,
    /// Resource being fetched (e.g. a ticker symbol).
    pub resource_id: String,
    pub requesting_stage: String,
    pub requesting_component: String,
    pub correlation_id: CorrelationId,
    pub requested_at: DateTime<Utc>,
    /// `requested_at + cooldown`. Logical expiry, checked on every read.
    pub expires_at: DateTime<Utc>,
    /// Store purge hint (epoch seconds), `expires_at` rounded up so the
    /// store never treats a live claim as purgeable.
    pub ttl: i64,
}

impl FetchLockRecord {
    /// Build a record from a single clock read.
    ///
    /// Fails when `now + cooldown` is not representable.
    pub fn new(
        resource_id: impl Into<String>,
        requesting_stage: impl Into<String>,
        requesting_component: impl Into<String>,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<Self> {
        let expires_at = to_chrono(cooldown)
            .and_then(|cooldown| now.checked_add_signed(cooldown))
            .ok_or_else(|| {
                CoreError::InvalidRecord(format!("cooldown out of range: {cooldown:?}"))
            })?;
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            resource_id: resource_id.into(),
            requesting_stage: requesting_stage.into(),
            requesting_component: requesting_component.into(),
            correlation_id,
            requested_at: now,
            expires_at,
            ttl: ceil_epoch_secs(expires_at),
        })
    }

    /// Whether the claim is still logically held at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Seconds until the claim lapses, rounded up, never negative.
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let ms = (self.expires_at - now).num_milliseconds();
        if ms <= 0 {
            0
        } else {
            (ms as u64).div_ceil(1000)
        }
    }
}

impl VersionedRecord for FetchLockRecord {
    const KIND: &'static str = "fetch_lock";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn validate(&self) -> Result<()> {
        check_version(self.schema_version)?;
        require_non_empty("resource_id", &self.resource_id)?;
        if self.expires_at < self.requested_at {
            return Err(CoreError::InvalidRecord(format!(
                "fetch lock for {} expires before it was requested",
                self.resource_id
            )));
        }
        Ok(())
    }
}

// ============================================================================
// DedupRecord
// ============================================================================

/// Lifecycle status of a recurring failure signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DedupStatus {
    Failing,
    Recovered,
}

impl DedupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failing => "FAILING",
            Self::Recovered => "RECOVERED",
        }
    }
}

impl fmt::Display for DedupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate history of one recurring failure signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub schema_version: u32,
    /// `component#environment#failed_step#hash8`.
    pub dedup_key: String,
    pub component: String,
    pub environment: String,
    pub failed_step: String,
    pub error_type: String,
    /// First 8 hex chars of the normalized error hash.
    pub error_hash: String,
    pub status: DedupStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Suppressed occurrences in the current episode.
    pub repeat_count: u64,
    pub last_notified_at: DateTime<Utc>,
    pub last_run_id: String,
    #[serde(default)]
    pub recovered_run_id: Option<String>,
    #[serde(default)]
    pub recovered_at: Option<DateTime<Utc>>,
    /// Store purge hint (epoch seconds).
    pub ttl: i64,
}

impl DedupRecord {
    /// Whether `now` still falls inside the quiet period started by the
    /// last notification.
    #[must_use]
    pub fn in_quiet_period(&self, now: DateTime<Utc>, quiet_period: Duration) -> bool {
        to_chrono(quiet_period).map_or(true, |quiet| now - self.last_notified_at < quiet)
    }

    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.status == DedupStatus::Failing
    }
}

impl VersionedRecord for DedupRecord {
    const KIND: &'static str = "dedup";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn validate(&self) -> Result<()> {
        check_version(self.schema_version)?;
        require_non_empty("dedup_key", &self.dedup_key)?;
        require_non_empty("component", &self.component)?;
        require_non_empty("environment", &self.environment)?;
        if self.last_seen_at < self.first_seen_at {
            return Err(CoreError::InvalidRecord(format!(
                "{}: last_seen_at precedes first_seen_at",
                self.dedup_key
            )));
        }
        if self.status == DedupStatus::Recovered && self.recovered_at.is_none() {
            return Err(CoreError::InvalidRecord(format!(
                "{}: recovered without recovered_at",
                self.dedup_key
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Circuit breaker state
// ============================================================================

/// Connection circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, attempts allowed.
    #[default]
    Closed,
    /// Too many failures, attempts blocked until the open timeout elapses.
    Open,
    /// Probing whether the resource recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Process-local breaker state. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub schema_version: u32,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_attempt_time: Option<DateTime<Utc>>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_attempt_time: None,
        }
    }
}

// ============================================================================
// RunState
// ============================================================================

/// Snapshot of a trading run, owned by the external run ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    /// Capital ceiling for the run. `<= 0` disables the risk breaker.
    pub max_equity_limit_usd: Decimal,
    /// Value of settled buys so far, updated elsewhere as trades settle.
    pub cumulative_buy_succeeded_value: Decimal,
}

impl RunState {
    pub fn new(
        run_id: impl Into<String>,
        max_equity_limit_usd: Decimal,
        cumulative_buy_succeeded_value: Decimal,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            max_equity_limit_usd,
            cumulative_buy_succeeded_value,
        }
    }

    #[must_use]
    pub fn limit_enabled(&self) -> bool {
        self.max_equity_limit_usd > Decimal::ZERO
    }

    /// `max_equity_limit_usd - cumulative_buy_succeeded_value`, as computed.
    /// `None` if the difference overflows.
    #[must_use]
    pub fn headroom(&self) -> Option<Decimal> {
        self.max_equity_limit_usd
            .checked_sub(self.cumulative_buy_succeeded_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()
    }

    fn lock_record(cooldown: Duration) -> FetchLockRecord {
        FetchLockRecord::new(
            "AAPL",
            "ingest",
            "bars-fetcher",
            CorrelationId::from("corr-1"),
            t0(),
            cooldown,
        )
        .unwrap()
    }

    #[test]
    fn test_fetch_lock_ttl_matches_expiry() {
        let record = lock_record(Duration::from_secs(900));
        assert_eq!(record.expires_at, t0() + chrono::Duration::minutes(15));
        assert_eq!(record.ttl, record.expires_at.timestamp());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_fetch_lock_ttl_rounds_up() {
        let record = lock_record(Duration::from_millis(1_500));
        assert_eq!(record.ttl, t0().timestamp() + 2);
    }

    #[test]
    fn test_fetch_lock_unrepresentable_cooldown_rejected() {
        let result = FetchLockRecord::new(
            "AAPL",
            "ingest",
            "bars-fetcher",
            CorrelationId::from("corr-1"),
            t0(),
            Duration::from_secs(u64::MAX / 2),
        );
        assert!(matches!(result, Err(CoreError::InvalidRecord(_))));
    }

    #[test]
    fn test_fetch_lock_liveness() {
        let record = lock_record(Duration::from_secs(60));
        assert!(record.is_live(t0()));
        assert_eq!(record.remaining_secs(t0()), 60);
        assert_eq!(
            record.remaining_secs(t0() + chrono::Duration::milliseconds(59_001)),
            1
        );

        let at_expiry = t0() + chrono::Duration::seconds(60);
        assert!(!record.is_live(at_expiry));
        assert_eq!(record.remaining_secs(at_expiry), 0);
        assert_eq!(
            record.remaining_secs(at_expiry + chrono::Duration::hours(1)),
            0
        );
    }

    #[test]
    fn test_schema_version_rejected() {
        let mut record = lock_record(Duration::from_secs(60));
        record.schema_version = 2;
        assert!(matches!(
            record.validate(),
            Err(CoreError::SchemaVersion {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_dedup_status_serde() {
        assert_eq!(
            serde_json::to_string(&DedupStatus::Failing).unwrap(),
            "\"FAILING\""
        );
        let status: DedupStatus = serde_json::from_str("\"RECOVERED\"").unwrap();
        assert_eq!(status, DedupStatus::Recovered);
    }

    #[test]
    fn test_dedup_quiet_period() {
        let record = DedupRecord {
            schema_version: SCHEMA_VERSION,
            dedup_key: "ingest#prod#fetch_bars#1a2b3c4d".to_string(),
            component: "ingest".to_string(),
            environment: "prod".to_string(),
            failed_step: "fetch_bars".to_string(),
            error_type: "TimeoutError".to_string(),
            error_hash: "1a2b3c4d".to_string(),
            status: DedupStatus::Failing,
            first_seen_at: t0(),
            last_seen_at: t0(),
            repeat_count: 0,
            last_notified_at: t0(),
            last_run_id: "run-1".to_string(),
            recovered_run_id: None,
            recovered_at: None,
            ttl: 0,
        };
        let quiet = Duration::from_secs(120 * 60);
        assert!(record.in_quiet_period(t0() + chrono::Duration::minutes(119), quiet));
        assert!(!record.in_quiet_period(t0() + chrono::Duration::minutes(120), quiet));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(CircuitBreakerState::default().state, CircuitState::Closed);
    }

    #[test]
    fn test_run_state_headroom() {
        let run = RunState::new("run-1", dec!(100000), dec!(95000));
        assert!(run.limit_enabled());
        assert_eq!(run.headroom(), Some(dec!(5000)));

        let unrepresentable = RunState::new("run-3", Decimal::MAX, Decimal::MIN);
        assert_eq!(unrepresentable.headroom(), None);

        let disabled = RunState::new("run-2", dec!(0), dec!(95000));
        assert!(!disabled.limit_enabled());
    }
}
