//! Core types for the sentinel coordination primitives.
//!
//! This crate provides the building blocks shared by every primitive:
//! - `FetchLockRecord`, `DedupRecord`, `CircuitBreakerState`: schema-versioned records
//! - `RunState`: read-only snapshot of a trading run from the external ledger
//! - `Clock`: injectable time source (`SystemClock`, `ManualClock`)
//! - `FailurePolicy`: explicit fail-open / fail-closed choice per operation
//! - `GuardErrorKind`: error taxonomy used in decisions and logs

pub mod clock;
pub mod error;
pub mod ids;
pub mod policy;
pub mod records;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, GuardErrorKind, Result};
pub use ids::CorrelationId;
pub use policy::FailurePolicy;
pub use records::{
    CircuitBreakerState, CircuitState, DedupRecord, DedupStatus, FetchLockRecord, RunState,
    VersionedRecord, SCHEMA_VERSION,
};
