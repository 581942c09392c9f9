//! Run-level risk circuit breaker.
//!
//! Caps cumulative capital deployed within one trading run. The check is
//! made against a snapshot of the external run ledger and is advisory:
//! concurrent evaluations may all pass before their trades settle.
//!
//! CRITICAL: fails closed. An unreachable ledger or an unknown run blocks
//! the trade.

pub mod breaker;
pub mod error;

pub use breaker::{RiskCircuitBreaker, RiskDecision, RiskReason};
pub use error::{RiskError, RiskResult};
