//! Error types for sentinel-core.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Unsupported schema version: expected {expected}, got {actual}")]
    SchemaVersion { expected: u32, actual: u32 },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Classification of the conditions a guard can run into.
///
/// Carried in decisions so callers and logs can tell *why* a guard
/// failed open or closed without inspecting error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardErrorKind {
    /// Coordination store or run ledger could not be reached.
    BackendUnavailable,
    /// Conditional write was rejected but the conflicting record was gone on read.
    RaceLost,
    /// No run or record exists for the requested key.
    NotFound,
    /// Risk limit would be exceeded.
    CapacityExceeded,
    /// Guard is intentionally inert for this run.
    ConfigurationDisabled,
}

impl GuardErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::RaceLost => "race_lost",
            Self::NotFound => "not_found",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::ConfigurationDisabled => "configuration_disabled",
        }
    }
}

impl fmt::Display for GuardErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
