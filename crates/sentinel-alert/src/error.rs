//! Alert error types.

use sentinel_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid dedup configuration: {0}")]
    InvalidConfig(String),
}

pub type AlertResult<T> = Result<T, AlertError>;
