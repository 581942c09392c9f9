//! Explicit construction of the coordination primitives.

use std::sync::Arc;

use tracing::info;

use sentinel_alert::FailureDedupTracker;
use sentinel_conn::{ConnectionCircuitBreaker, ConnectionGuard};
use sentinel_core::Clock;
use sentinel_lock::DistributedFetchLock;
use sentinel_risk::RiskCircuitBreaker;
use sentinel_store::{DynCoordinationStore, DynRunLedger};

use crate::config::AppConfig;
use crate::error::AppResult;

/// Every primitive a worker invocation needs, built from one config.
///
/// Lifetime is the hosting process or request scope. Store-backed
/// primitives share the injected store; connection breakers are created
/// per protected resource and owned by the caller.
pub struct Guards {
    pub fetch_lock: DistributedFetchLock,
    pub risk: RiskCircuitBreaker,
    pub failures: FailureDedupTracker,
    config: AppConfig,
    clock: Arc<dyn Clock>,
}

impl Guards {
    /// Validate `config` and build the primitives.
    pub fn new(
        config: AppConfig,
        store: DynCoordinationStore,
        ledger: DynRunLedger,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        config.validate()?;

        let fetch_lock =
            DistributedFetchLock::new(store.clone(), clock.clone(), config.fetch_lock.clone());
        let risk = RiskCircuitBreaker::new(ledger, clock.clone());
        let failures = FailureDedupTracker::new(store, clock.clone(), config.failure_dedup.clone());

        info!(
            environment = %config.telemetry.environment,
            cooldown_secs = config.fetch_lock.cooldown_secs,
            lock_policy = %config.fetch_lock.policy,
            dedup_policy = %config.failure_dedup.policy,
            "Guards initialized"
        );

        Ok(Self {
            fetch_lock,
            risk,
            failures,
            config,
            clock,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Environment component used in failure signatures.
    pub fn environment(&self) -> &str {
        &self.config.telemetry.environment
    }

    /// New breaker-backed guard for one external resource.
    pub fn connection_guard(&self, resource: &str) -> ConnectionGuard {
        let breaker = ConnectionCircuitBreaker::new(
            resource,
            self.config.connection_breaker.clone(),
            self.clock.clone(),
        );
        ConnectionGuard::new(Arc::new(breaker), self.config.reconnect_backoff.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::SystemClock;
    use sentinel_store::{MemoryRunLedger, MemoryStore};

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = AppConfig::default();
        config.failure_dedup.quiet_period_mins = 0;

        let result = Guards::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRunLedger::new()),
            Arc::new(SystemClock),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_connection_guard_uses_configured_thresholds() {
        let mut config = AppConfig::default();
        config.connection_breaker.failure_threshold = 2;
        config.telemetry.environment = "staging".to_string();

        let guards = Guards::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRunLedger::new()),
            Arc::new(SystemClock),
        )
        .unwrap();
        assert_eq!(guards.environment(), "staging");

        let guard = guards.connection_guard("broker-api");
        assert_eq!(guard.breaker().name(), "broker-api");
        assert_eq!(guard.breaker().config().failure_threshold, 2);
    }
}
