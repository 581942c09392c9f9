//! Connection circuit breaker for a flaky external resource.
//!
//! Provides:
//! - [`ConnectionCircuitBreaker`]: CLOSED / OPEN / HALF_OPEN state machine
//!   with a minimum spacing between attempts
//! - [`ReconnectBackoff`]: exponential backoff with jitter for retry loops
//! - [`ConnectionGuard`]: runs one connect attempt through the breaker
//!
//! State is process-local and never persisted. One breaker per protected
//! resource, shared via `Arc` across tasks of the same process.

pub mod backoff;
pub mod breaker;
pub mod error;
pub mod guard;

pub use backoff::ReconnectBackoff;
pub use breaker::{BreakerConfig, BreakerStateInfo, ConnectionCircuitBreaker};
pub use error::{ConnError, ConnResult};
pub use guard::{AttemptOutcome, ConnectionGuard};
