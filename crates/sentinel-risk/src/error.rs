//! Risk error types.

use sentinel_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Run ledger error: {0}")]
    Ledger(#[from] StoreError),

    #[error("Run not found: {0}")]
    RunNotFound(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
