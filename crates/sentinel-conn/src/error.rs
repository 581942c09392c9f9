//! Connection breaker error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("Invalid breaker configuration: {0}")]
    InvalidConfig(String),
}

pub type ConnResult<T> = Result<T, ConnError>;
