//! Failure alert deduplication and recovery detection.
//!
//! Recurring failures collapse onto one [`DedupRecord`](sentinel_core::DedupRecord)
//! per error signature. The first occurrence notifies, repeats inside the
//! quiet period are suppressed, and a later successful run reports the
//! recovery exactly once per failure episode.
//!
//! This crate only decides. Sending is the caller's job.

pub mod error;
pub mod signature;
pub mod tracker;

pub use error::{AlertError, AlertResult};
pub use signature::{normalize_error_message, ErrorDetails, ErrorSignature};
pub use tracker::{
    DedupConfig, FailureDedupTracker, NotifyDecision, NotifyReason, RecoveredFailure, RecoveryInfo,
};
