//! Distributed fetch lock.
//!
//! Prevents duplicate expensive fetches when several stateless workers
//! detect the same missing precondition at once. A claim is a conditional
//! create in the coordination store that stays live for a cooldown window.
//!
//! Every call is a single round trip and always returns an
//! [`AcquireOutcome`]; backend trouble is resolved by the configured
//! [`FailurePolicy`](sentinel_core::FailurePolicy) (fail-open by default).

pub mod error;
pub mod lock;

pub use error::{LockError, LockResult};
pub use lock::{lock_key, AcquireOutcome, DistributedFetchLock, FetchLockConfig, FetchRequest};
