//! Lock error types.

use sentinel_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid fetch lock configuration: {0}")]
    InvalidConfig(String),
}

pub type LockResult<T> = Result<T, LockError>;
