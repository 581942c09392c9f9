//! Three-state connection circuit breaker.
//!
//! Transitions:
//! - CLOSED -> OPEN after `failure_threshold` consecutive failures
//! - OPEN -> HALF_OPEN once `open_timeout_secs` have passed since the last
//!   failure, evaluated lazily by the next `can_attempt`
//! - HALF_OPEN -> CLOSED after `success_threshold` consecutive successes
//! - HALF_OPEN -> OPEN on any failure
//!
//! Independently of state, `can_attempt` refuses attempts closer than
//! `min_attempt_interval_ms` to the last recorded attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sentinel_core::{CircuitBreakerState, CircuitState, Clock};
use sentinel_telemetry::Metrics;

use crate::error::{ConnError, ConnResult};

// ============================================================================
// BreakerConfig
// ============================================================================

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Minimum spacing between attempts, regardless of state.
    #[serde(default = "default_min_attempt_interval_ms")]
    pub min_attempt_interval_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_timeout_secs() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    3
}

fn default_min_attempt_interval_ms() -> u64 {
    1000
}

/// Upper bound for `open_timeout_secs` (one day).
pub const MAX_OPEN_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Upper bound for `min_attempt_interval_ms` (one hour).
pub const MAX_MIN_ATTEMPT_INTERVAL_MS: u64 = 60 * 60 * 1000;

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_timeout_secs: default_open_timeout_secs(),
            success_threshold: default_success_threshold(),
            min_attempt_interval_ms: default_min_attempt_interval_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> ConnResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConnError::InvalidConfig(
                "failure_threshold must be > 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ConnError::InvalidConfig(
                "success_threshold must be > 0".to_string(),
            ));
        }
        if self.open_timeout_secs > MAX_OPEN_TIMEOUT_SECS {
            return Err(ConnError::InvalidConfig(format!(
                "open_timeout_secs must be <= {MAX_OPEN_TIMEOUT_SECS}"
            )));
        }
        if self.min_attempt_interval_ms > MAX_MIN_ATTEMPT_INTERVAL_MS {
            return Err(ConnError::InvalidConfig(format!(
                "min_attempt_interval_ms must be <= {MAX_MIN_ATTEMPT_INTERVAL_MS}"
            )));
        }
        Ok(())
    }

    // Out-of-range values saturate; an unvalidated config never panics.
    fn open_timeout(&self) -> chrono::Duration {
        i64::try_from(self.open_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    fn min_attempt_interval(&self) -> chrono::Duration {
        i64::try_from(self.min_attempt_interval_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

// ============================================================================
// BreakerStateInfo
// ============================================================================

/// Diagnostic snapshot of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStateInfo {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_secs: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_attempt_time: Option<DateTime<Utc>>,
}

// ============================================================================
// ConnectionCircuitBreaker
// ============================================================================

/// Circuit breaker guarding reconnection to one resource.
pub struct ConnectionCircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitBreakerState>,
}

impl ConnectionCircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let name = name.into();
        Metrics::connection_breaker_state(&name, gauge_value(CircuitState::Closed));
        Self {
            name,
            config,
            clock,
            state: Mutex::new(CircuitBreakerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Whether a connection attempt may be made now.
    ///
    /// May move OPEN to HALF_OPEN when the open timeout has elapsed.
    pub fn can_attempt(&self) -> bool {
        let now = self.clock.now();
        let mut st = self.state.lock();

        if let Some(last) = st.last_attempt_time {
            if now - last < self.config.min_attempt_interval() {
                debug!(breaker = %self.name, "Attempt rate limited");
                return false;
            }
        }

        match st.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = st
                    .last_failure_time
                    .map_or(true, |at| now - at >= self.config.open_timeout());
                if elapsed {
                    st.success_count = 0;
                    self.transition(&mut st, CircuitState::HalfOpen, "open timeout elapsed");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut st = self.state.lock();
        st.last_attempt_time = Some(now);

        match st.state {
            CircuitState::Closed => {
                st.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                st.success_count += 1;
                if st.success_count >= self.config.success_threshold {
                    st.failure_count = 0;
                    st.success_count = 0;
                    self.transition(&mut st, CircuitState::Closed, "success threshold reached");
                }
            }
            CircuitState::Open => {
                // Stray report from an attempt started before opening
                debug!(breaker = %self.name, "Success recorded while open, ignoring");
            }
        }
    }

    pub fn record_failure(&self, reason: &str) {
        let now = self.clock.now();
        let mut st = self.state.lock();
        st.last_attempt_time = Some(now);
        st.last_failure_time = Some(now);
        st.failure_count = st.failure_count.saturating_add(1);

        match st.state {
            CircuitState::Closed => {
                debug!(
                    breaker = %self.name,
                    reason,
                    failure_count = st.failure_count,
                    threshold = self.config.failure_threshold,
                    "Connection failure recorded"
                );
                if st.failure_count >= self.config.failure_threshold {
                    self.transition(&mut st, CircuitState::Open, reason);
                }
            }
            CircuitState::HalfOpen => {
                st.success_count = 0;
                self.transition(&mut st, CircuitState::Open, reason);
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, reason, "Failure recorded while open");
            }
        }
    }

    /// Force CLOSED with zeroed counters and no attempt history.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        let previous = st.state;
        *st = CircuitBreakerState::default();
        info!(breaker = %self.name, %previous, "Circuit breaker reset");
        if previous != CircuitState::Closed {
            Metrics::connection_breaker_transition(&self.name, "CLOSED");
        }
        Metrics::connection_breaker_state(&self.name, gauge_value(CircuitState::Closed));
    }

    pub fn state_info(&self) -> BreakerStateInfo {
        let st = self.state.lock();
        BreakerStateInfo {
            name: self.name.clone(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            open_timeout_secs: self.config.open_timeout_secs,
            last_failure_time: st.last_failure_time,
            last_attempt_time: st.last_attempt_time,
        }
    }

    fn transition(&self, st: &mut CircuitBreakerState, to: CircuitState, reason: &str) {
        let from = st.state;
        st.state = to;
        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                %from,
                reason,
                failure_count = st.failure_count,
                "Circuit breaker OPEN"
            ),
            _ => info!(breaker = %self.name, %from, %to, reason, "Circuit breaker transition"),
        }
        let to_label = to.to_string();
        Metrics::connection_breaker_transition(&self.name, &to_label);
        Metrics::connection_breaker_state(&self.name, gauge_value(to));
    }
}

fn gauge_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}
