//! Store error types.

use sentinel_core::{CoreError, GuardErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Conditional create rejected: an item already exists under the key.
    #[error("Item already exists: {key}")]
    AlreadyExists { key: String },

    /// Update condition did not hold; nothing was written.
    #[error("Condition failed on field: {field}")]
    ConditionFailed { field: String },

    /// Update targeted a key with no item.
    #[error("Item not found: {key}")]
    NotFound { key: String },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Item failed validation at the store boundary.
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Map onto the guard error taxonomy.
    pub fn kind(&self) -> GuardErrorKind {
        match self {
            Self::NotFound { .. } => GuardErrorKind::NotFound,
            // Another writer changed the item first
            Self::ConditionFailed { .. } => GuardErrorKind::RaceLost,
            // A conflict surfaced outside a conditional create is not
            // expected; callers treat it like any other backend failure.
            Self::AlreadyExists { .. }
            | Self::Unavailable(_)
            | Self::Schema(_)
            | Self::Json(_) => GuardErrorKind::BackendUnavailable,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        Self::Schema(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
