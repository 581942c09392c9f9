//! DistributedFetchLock implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sentinel_core::{Clock, CorrelationId, FailurePolicy, FetchLockRecord, GuardErrorKind};
use sentinel_store::{
    decode_record, encode_record, CreateCondition, DynCoordinationStore, Item, StoreError,
    StoreResult, Table,
};
use sentinel_telemetry::Metrics;

use crate::error::{LockError, LockResult};

const PRIMITIVE: &str = "fetch_lock";

/// Store key for a resource's claim.
pub fn lock_key(resource_id: &str) -> String {
    format!("FETCH#{resource_id}")
}

// ============================================================================
// Configuration
// ============================================================================

/// Fetch lock configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchLockConfig {
    /// Cooldown window applied when the caller does not pass one.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Decision on backend errors.
    #[serde(default = "default_policy")]
    pub policy: FailurePolicy,
}

fn default_cooldown_secs() -> u64 {
    15 * 60
}

fn default_policy() -> FailurePolicy {
    FailurePolicy::FailOpen
}

/// Upper bound for `cooldown_secs` (30 days).
pub const MAX_COOLDOWN_SECS: u64 = 30 * 24 * 60 * 60;

impl Default for FetchLockConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            policy: default_policy(),
        }
    }
}

impl FetchLockConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn validate(&self) -> LockResult<()> {
        if self.cooldown_secs == 0 {
            return Err(LockError::InvalidConfig(
                "cooldown_secs must be > 0".to_string(),
            ));
        }
        if self.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(LockError::InvalidConfig(format!(
                "cooldown_secs must be <= {MAX_COOLDOWN_SECS}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Request / Outcome
// ============================================================================

/// Who wants to fetch what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub resource_id: String,
    pub requesting_stage: String,
    pub requesting_component: String,
    pub correlation_id: CorrelationId,
}

impl FetchRequest {
    /// New request with a fresh correlation id.
    pub fn new(
        resource_id: impl Into<String>,
        requesting_stage: impl Into<String>,
        requesting_component: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            requesting_stage: requesting_stage.into(),
            requesting_component: requesting_component.into(),
            correlation_id: CorrelationId::new(),
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Decision returned by [`DistributedFetchLock::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquireOutcome {
    /// Caller may perform the fetch.
    pub can_proceed: bool,
    /// A live claim by someone else exists.
    pub was_deduplicated: bool,
    /// The existing claim when deduplicated.
    pub holder: Option<FetchLockRecord>,
    /// Seconds until the existing claim lapses (0 unless deduplicated).
    pub cooldown_remaining_secs: u64,
    /// Set when the decision came from a failure policy, not the store.
    pub degraded: Option<GuardErrorKind>,
}

impl AcquireOutcome {
    fn acquired() -> Self {
        Self {
            can_proceed: true,
            was_deduplicated: false,
            holder: None,
            cooldown_remaining_secs: 0,
            degraded: None,
        }
    }

    fn deduplicated(holder: FetchLockRecord, remaining_secs: u64) -> Self {
        Self {
            can_proceed: false,
            was_deduplicated: true,
            holder: Some(holder),
            cooldown_remaining_secs: remaining_secs,
            degraded: None,
        }
    }

    fn degraded(can_proceed: bool, kind: GuardErrorKind) -> Self {
        Self {
            can_proceed,
            was_deduplicated: false,
            holder: None,
            cooldown_remaining_secs: 0,
            degraded: Some(kind),
        }
    }

    /// When the existing claim was made.
    pub fn existing_requested_at(&self) -> Option<DateTime<Utc>> {
        self.holder.as_ref().map(|h| h.requested_at)
    }
}

// ============================================================================
// DistributedFetchLock
// ============================================================================

/// Mutual exclusion with cooldown over the coordination store.
///
/// Holds no state of its own between calls; all coordination happens
/// through single-key conditional creates.
pub struct DistributedFetchLock {
    store: DynCoordinationStore,
    clock: Arc<dyn Clock>,
    config: FetchLockConfig,
}

impl DistributedFetchLock {
    pub fn new(store: DynCoordinationStore, clock: Arc<dyn Clock>, config: FetchLockConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &FetchLockConfig {
        &self.config
    }

    /// Claim `request.resource_id` for the configured cooldown.
    pub async fn try_acquire(&self, request: &FetchRequest) -> AcquireOutcome {
        self.try_acquire_with_cooldown(request, self.config.cooldown())
            .await
    }

    /// Claim `request.resource_id` for `cooldown`.
    ///
    /// A claim whose logical expiry has passed is replaced atomically, so
    /// store purge timing never blocks a new fetch.
    pub async fn try_acquire_with_cooldown(
        &self,
        request: &FetchRequest,
        cooldown: Duration,
    ) -> AcquireOutcome {
        // One clock read: expires_at and ttl must agree
        let now = self.clock.now();
        let resource_id = request.resource_id.as_str();
        let key = lock_key(resource_id);

        let record = match FetchLockRecord::new(
            resource_id,
            request.requesting_stage.as_str(),
            request.requesting_component.as_str(),
            request.correlation_id.clone(),
            now,
            cooldown,
        ) {
            Ok(record) => record,
            Err(e) => return self.on_backend_error(resource_id, &StoreError::from(e)),
        };
        let item = match encode_record(&record) {
            Ok(item) => item,
            Err(e) => return self.on_backend_error(resource_id, &e),
        };

        match self.create(&key, item.clone(), now.timestamp()).await {
            Ok(()) => return self.on_acquired(request, &record),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return self.on_backend_error(resource_id, &e),
        }

        let holder = match self.load_holder(&key).await {
            Ok(holder) => holder,
            Err(e) => return self.on_backend_error(resource_id, &e),
        };
        let expired_ttl = holder.as_ref().filter(|h| !h.is_live(now)).map(|h| h.ttl);
        let Some(cutoff) = expired_ttl else {
            return self.on_conflict(resource_id, holder, now);
        };

        // Logically expired but still inside its whole-second ttl. Replace
        // it only if no newer claim has taken its place.
        debug!(resource_id, cutoff, "Replacing expired fetch lock");
        match self.create(&key, item, cutoff).await {
            Ok(()) => self.on_acquired(request, &record),
            Err(e) if e.is_already_exists() => match self.load_holder(&key).await {
                Ok(holder) => self.on_conflict(resource_id, holder, now),
                Err(e) => self.on_backend_error(resource_id, &e),
            },
            Err(e) => self.on_backend_error(resource_id, &e),
        }
    }

    async fn create(&self, key: &str, item: Item, cutoff_epoch_secs: i64) -> StoreResult<()> {
        let condition = CreateCondition::IfAbsentOrExpired { cutoff_epoch_secs };
        self.store
            .conditional_create(Table::FetchLocks, key, item, condition)
            .await
    }

    async fn load_holder(&self, key: &str) -> StoreResult<Option<FetchLockRecord>> {
        match self.store.get(Table::FetchLocks, key).await? {
            Some(item) => decode_record(item).map(Some),
            None => Ok(None),
        }
    }

    fn on_acquired(&self, request: &FetchRequest, record: &FetchLockRecord) -> AcquireOutcome {
        info!(
            resource_id = %request.resource_id,
            stage = %request.requesting_stage,
            component = %request.requesting_component,
            correlation_id = %request.correlation_id,
            expires_at = %record.expires_at,
            "Fetch lock acquired"
        );
        Metrics::fetch_lock("acquired");
        AcquireOutcome::acquired()
    }

    /// Create was rejected: report who holds the claim.
    fn on_conflict(
        &self,
        resource_id: &str,
        holder: Option<FetchLockRecord>,
        now: DateTime<Utc>,
    ) -> AcquireOutcome {
        let Some(holder) = holder else {
            // Claim vanished between the create and the read: a race,
            // not a real conflict. Proceed regardless of policy.
            warn!(resource_id, "Fetch lock race lost, proceeding");
            Metrics::fetch_lock("race_fail_open");
            return AcquireOutcome::degraded(true, GuardErrorKind::RaceLost);
        };

        let remaining = holder.remaining_secs(now);
        debug!(
            resource_id,
            holder_stage = %holder.requesting_stage,
            holder_component = %holder.requesting_component,
            holder_correlation_id = %holder.correlation_id,
            cooldown_remaining_secs = remaining,
            "Fetch deduplicated"
        );
        Metrics::fetch_lock("deduplicated");
        AcquireOutcome::deduplicated(holder, remaining)
    }

    fn on_backend_error(&self, resource_id: &str, error: &StoreError) -> AcquireOutcome {
        let kind = error.kind();
        let policy = self.config.policy;
        Metrics::backend_error(PRIMITIVE, kind.as_str(), &policy.to_string());

        if policy.allows_on_error() {
            warn!(resource_id, error = %error, %kind, "Fetch lock backend error, failing open");
            Metrics::fetch_lock("fail_open");
            AcquireOutcome::degraded(true, kind)
        } else {
            warn!(resource_id, error = %error, %kind, "Fetch lock backend error, failing closed");
            Metrics::fetch_lock("fail_closed");
            AcquireOutcome::degraded(false, kind)
        }
    }

    /// Drop the claim early so a retry after a failed fetch is not held
    /// back by the cooldown.
    ///
    /// Never fails the caller; returns whether the delete went through.
    pub async fn release(&self, resource_id: &str) -> bool {
        let key = lock_key(resource_id);
        match self.store.delete(Table::FetchLocks, &key).await {
            Ok(()) => {
                info!(resource_id, "Fetch lock released");
                Metrics::fetch_lock_release(true);
                true
            }
            Err(e) => {
                warn!(resource_id, error = %e, "Fetch lock release failed, ignoring");
                Metrics::fetch_lock_release(false);
                false
            }
        }
    }

    /// Live claim on `resource_id`, if any. Diagnostics only.
    pub async fn status(&self, resource_id: &str) -> LockResult<Option<FetchLockRecord>> {
        let now = self.clock.now();
        let key = lock_key(resource_id);
        let record = self.load_holder(&key).await?;
        Ok(record.filter(|r| r.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sentinel_core::ManualClock;
    use sentinel_store::{BoxFuture, CoordinationStore, ItemQuery, ItemUpdate, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()
    }

    fn setup(config: FetchLockConfig) -> (Arc<MemoryStore>, Arc<ManualClock>, DistributedFetchLock) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at(t0()));
        let lock = DistributedFetchLock::new(store.clone(), clock.clone(), config);
        (store, clock, lock)
    }

    fn request(stage: &str) -> FetchRequest {
        FetchRequest::new("AAPL", stage, "bars-fetcher").with_correlation_id(format!("corr-{stage}"))
    }

    /// Rejects every create, then reports the claim gone.
    #[derive(Default)]
    struct VanishingStore {
        creates: AtomicUsize,
    }

    impl CoordinationStore for VanishingStore {
        fn conditional_create<'a>(
            &'a self,
            _table: Table,
            key: &'a str,
            _item: Item,
            _condition: CreateCondition,
        ) -> BoxFuture<'a, StoreResult<()>> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                })
            })
        }

        fn get<'a>(&'a self, _table: Table, _key: &'a str) -> BoxFuture<'a, StoreResult<Option<Item>>> {
            Box::pin(async { Ok(None) })
        }

        fn delete<'a>(&'a self, _table: Table, _key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn update<'a>(
            &'a self,
            _table: Table,
            key: &'a str,
            _update: ItemUpdate,
        ) -> BoxFuture<'a, StoreResult<()>> {
            Box::pin(async move {
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            })
        }

        fn query<'a>(
            &'a self,
            _table: Table,
            _query: ItemQuery,
        ) -> BoxFuture<'a, StoreResult<Vec<(String, Item)>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[tokio::test]
    async fn test_back_to_back_acquire_admits_exactly_one() {
        let (_store, clock, lock) = setup(FetchLockConfig::default());

        let first = lock.try_acquire(&request("ingest")).await;
        assert!(first.can_proceed);
        assert!(!first.was_deduplicated);

        clock.advance_secs(60);
        let second = lock.try_acquire(&request("signals")).await;
        assert!(!second.can_proceed);
        assert!(second.was_deduplicated);
        assert_eq!(second.cooldown_remaining_secs, 900 - 60);
        assert_eq!(second.existing_requested_at(), Some(t0()));

        let holder = second.holder.unwrap();
        assert_eq!(holder.requesting_stage, "ingest");
        assert_eq!(holder.correlation_id.as_str(), "corr-ingest");
    }

    #[tokio::test]
    async fn test_release_then_acquire_proceeds() {
        let (_store, _clock, lock) = setup(FetchLockConfig::default());

        assert!(lock.try_acquire(&request("ingest")).await.can_proceed);
        assert!(lock.release("AAPL").await);
        assert!(lock.try_acquire(&request("signals")).await.can_proceed);
    }

    #[tokio::test]
    async fn test_release_missing_lock_is_ok() {
        let (_store, _clock, lock) = setup(FetchLockConfig::default());
        assert!(lock.release("NOPE").await);
    }

    #[tokio::test]
    async fn test_logically_expired_claim_is_replaced() {
        let (store, clock, lock) = setup(FetchLockConfig::default());

        assert!(lock.try_acquire(&request("ingest")).await.can_proceed);
        clock.advance_secs(900);

        // Store has not purged the old item
        assert_eq!(store.len(Table::FetchLocks), 1);
        let outcome = lock.try_acquire(&request("signals")).await;
        assert!(outcome.can_proceed);
        assert_eq!(outcome.degraded, None);

        let current = lock.status("AAPL").await.unwrap().unwrap();
        assert_eq!(current.requesting_stage, "signals");
    }

    #[tokio::test]
    async fn test_claim_expired_within_ttl_second_is_replaced() {
        let (_store, clock, lock) = setup(FetchLockConfig::default());

        // expires at t0 + 1.5s, ttl rounds up to t0 + 2s
        let first = lock
            .try_acquire_with_cooldown(&request("ingest"), Duration::from_millis(1_500))
            .await;
        assert!(first.can_proceed);

        clock.advance(Duration::from_millis(1_600));
        let outcome = lock.try_acquire(&request("signals")).await;
        assert!(outcome.can_proceed);
        assert!(!outcome.was_deduplicated);
        assert_eq!(outcome.degraded, None);

        let current = lock.status("AAPL").await.unwrap().unwrap();
        assert_eq!(current.requesting_stage, "signals");

        // The replacement is live and blocks
        let dup = lock.try_acquire(&request("ingest")).await;
        assert!(dup.was_deduplicated);
    }

    #[tokio::test]
    async fn test_unrepresentable_cooldown_uses_policy() {
        let (store, _clock, lock) = setup(FetchLockConfig {
            cooldown_secs: 60,
            policy: FailurePolicy::FailClosed,
        });

        let outcome = lock
            .try_acquire_with_cooldown(&request("ingest"), Duration::from_secs(u64::MAX / 2))
            .await;
        assert!(!outcome.can_proceed);
        assert!(outcome.degraded.is_some());
        assert_eq!(store.len(Table::FetchLocks), 0);
    }

    #[tokio::test]
    async fn test_per_call_cooldown() {
        let (_store, clock, lock) = setup(FetchLockConfig::default());

        let outcome = lock
            .try_acquire_with_cooldown(&request("ingest"), Duration::from_secs(30))
            .await;
        assert!(outcome.can_proceed);

        clock.advance_secs(10);
        let dup = lock.try_acquire(&request("signals")).await;
        assert_eq!(dup.cooldown_remaining_secs, 20);

        clock.advance_secs(20);
        assert!(lock.try_acquire(&request("signals")).await.can_proceed);
    }

    #[tokio::test]
    async fn test_status_hides_expired_claim() {
        let (_store, clock, lock) = setup(FetchLockConfig::default());

        assert!(lock.status("AAPL").await.unwrap().is_none());
        lock.try_acquire(&request("ingest")).await;
        assert!(lock.status("AAPL").await.unwrap().is_some());

        clock.advance_secs(901);
        assert!(lock.status("AAPL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_race_lost_fails_open_even_when_closed() {
        let store = Arc::new(VanishingStore::default());
        let clock = Arc::new(ManualClock::at(t0()));
        let config = FetchLockConfig {
            policy: FailurePolicy::FailClosed,
            ..FetchLockConfig::default()
        };
        let lock = DistributedFetchLock::new(store.clone(), clock, config);

        let outcome = lock.try_acquire(&request("ingest")).await;
        assert!(outcome.can_proceed);
        assert!(!outcome.was_deduplicated);
        assert_eq!(outcome.degraded, Some(GuardErrorKind::RaceLost));
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_open() {
        let (store, _clock, lock) = setup(FetchLockConfig::default());
        store.set_unavailable(true);

        let outcome = lock.try_acquire(&request("ingest")).await;
        assert!(outcome.can_proceed);
        assert_eq!(outcome.degraded, Some(GuardErrorKind::BackendUnavailable));

        // Release swallows the error
        assert!(!lock.release("AAPL").await);
        assert!(lock.status("AAPL").await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_store_with_fail_closed_blocks() {
        let (store, _clock, lock) = setup(FetchLockConfig {
            cooldown_secs: 60,
            policy: FailurePolicy::FailClosed,
        });
        store.set_unavailable(true);

        let outcome = lock.try_acquire(&request("ingest")).await;
        assert!(!outcome.can_proceed);
        assert!(!outcome.was_deduplicated);
        assert_eq!(outcome.degraded, Some(GuardErrorKind::BackendUnavailable));
    }

    #[tokio::test]
    async fn test_corrupt_holder_uses_policy() {
        let (store, _clock, lock) = setup(FetchLockConfig::default());
        let mut junk = Item::new();
        junk.insert("kind".to_string(), serde_json::json!("dedup"));
        store.insert_raw(Table::FetchLocks, &lock_key("AAPL"), junk);

        let outcome = lock.try_acquire(&request("ingest")).await;
        assert!(outcome.can_proceed);
        assert_eq!(outcome.degraded, Some(GuardErrorKind::BackendUnavailable));
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = FetchLockConfig::default();
        assert_eq!(config.cooldown(), Duration::from_secs(900));
        assert_eq!(config.policy, FailurePolicy::FailOpen);
        assert!(config.validate().is_ok());

        let zero = FetchLockConfig {
            cooldown_secs: 0,
            ..config
        };
        assert!(matches!(zero.validate(), Err(LockError::InvalidConfig(_))));

        let huge = FetchLockConfig {
            cooldown_secs: u64::MAX / 2,
            policy: FailurePolicy::FailOpen,
        };
        assert!(matches!(huge.validate(), Err(LockError::InvalidConfig(_))));
    }

    #[test]
    fn test_lock_key_format() {
        assert_eq!(lock_key("MSFT"), "FETCH#MSFT");
    }
}
