//! Sentinel worker wiring.
//!
//! Loads [`AppConfig`] and constructs every coordination primitive
//! explicitly in [`Guards`], with the store, ledger and clock injected by
//! the hosting process. No primitive is a process-wide singleton.

pub mod config;
pub mod error;
pub mod guards;

pub use config::{AppConfig, TelemetryConfig};
pub use error::{AppError, AppResult};
pub use guards::Guards;
