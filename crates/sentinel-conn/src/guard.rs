//! Run connect attempts through a breaker.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use sentinel_core::CircuitState;

use crate::backoff::ReconnectBackoff;
use crate::breaker::ConnectionCircuitBreaker;

/// Result of one guarded attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum AttemptOutcome<T, E> {
    /// Breaker refused the attempt; the connect future was not polled.
    Rejected(CircuitState),
    Connected(T),
    Failed(E),
}

impl<T, E> AttemptOutcome<T, E> {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Couples a shared breaker with the caller's backoff schedule.
///
/// Clones share the breaker and the unsuccessful-attempt streak.
#[derive(Clone)]
pub struct ConnectionGuard {
    breaker: Arc<ConnectionCircuitBreaker>,
    backoff: ReconnectBackoff,
    /// Failed or rejected attempts since the last success.
    streak: Arc<AtomicU32>,
}

impl ConnectionGuard {
    pub fn new(breaker: Arc<ConnectionCircuitBreaker>, backoff: ReconnectBackoff) -> Self {
        Self {
            breaker,
            backoff,
            streak: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn breaker(&self) -> &Arc<ConnectionCircuitBreaker> {
        &self.breaker
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.streak.load(Ordering::Relaxed)
    }

    /// How long a reconnect loop should sleep before its next attempt.
    /// Zero after a success.
    pub fn next_delay(&self) -> Duration {
        match self.consecutive_failures() {
            0 => Duration::ZERO,
            streak => self.backoff.delay(streak),
        }
    }

    fn bump_streak(&self) {
        let _ = self
            .streak
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1));
    }

    /// Check the breaker, run `connect`, and report the outcome back.
    pub async fn attempt<F, T, E>(&self, connect: F) -> AttemptOutcome<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        if !self.breaker.can_attempt() {
            let state = self.breaker.state();
            self.bump_streak();
            debug!(breaker = %self.breaker.name(), %state, "Connect attempt rejected");
            return AttemptOutcome::Rejected(state);
        }

        match connect.await {
            Ok(conn) => {
                self.breaker.record_success();
                self.streak.store(0, Ordering::Relaxed);
                AttemptOutcome::Connected(conn)
            }
            Err(e) => {
                self.breaker.record_failure(&e.to_string());
                self.bump_streak();
                AttemptOutcome::Failed(e)
            }
        }
    }
}
