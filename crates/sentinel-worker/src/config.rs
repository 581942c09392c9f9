//! Application configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use sentinel_alert::DedupConfig;
use sentinel_conn::{BreakerConfig, ReconnectBackoff};
use sentinel_lock::FetchLockConfig;

use crate::error::{AppError, AppResult};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "SENTINEL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Deployment identity used in failure signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `env` component of dedup keys (e.g. "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "dev".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
        }
    }
}

/// Top-level configuration. Every section is optional in the file.
///
/// The risk breaker has no section: its limit comes from the run ledger
/// and it always fails closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch_lock: FetchLockConfig,
    #[serde(default)]
    pub connection_breaker: BreakerConfig,
    #[serde(default)]
    pub reconnect_backoff: ReconnectBackoff,
    #[serde(default)]
    pub failure_dedup: DedupConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from `$SENTINEL_CONFIG` or the default path, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to render config: {e}")))
    }

    /// Reject values no primitive can run with. This is the only fatal
    /// path in the layer.
    pub fn validate(&self) -> AppResult<()> {
        self.fetch_lock
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        self.connection_breaker
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        self.failure_dedup
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        if self.reconnect_backoff.base_delay_ms == 0 {
            return Err(AppError::Config(
                "reconnect_backoff.base_delay_ms must be > 0".to_string(),
            ));
        }
        if self.telemetry.environment.trim().is_empty() || self.telemetry.environment.contains('#') {
            return Err(AppError::Config(format!(
                "telemetry.environment must be non-empty without '#': {:?}",
                self.telemetry.environment
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::FailurePolicy;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.fetch_lock.cooldown_secs, 900);
        assert_eq!(config.fetch_lock.policy, FailurePolicy::FailOpen);
        assert_eq!(config.connection_breaker.failure_threshold, 5);
        assert_eq!(config.connection_breaker.open_timeout_secs, 60);
        assert_eq!(config.connection_breaker.success_threshold, 3);
        assert_eq!(config.failure_dedup.quiet_period_mins, 120);
        assert_eq!(config.failure_dedup.retention_days, 90);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [fetch_lock]
            cooldown_secs = 300

            [failure_dedup]
            policy = "fail_closed"

            [telemetry]
            environment = "prod"
            "#,
        )
        .unwrap();
        assert_eq!(config.fetch_lock.cooldown_secs, 300);
        assert_eq!(config.fetch_lock.policy, FailurePolicy::FailOpen);
        assert_eq!(config.failure_dedup.policy, FailurePolicy::FailClosed);
        assert_eq!(config.failure_dedup.quiet_period_mins, 120);
        assert_eq!(config.telemetry.environment, "prod");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.connection_breaker.failure_threshold = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = AppConfig::default();
        config.fetch_lock.cooldown_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.telemetry.environment = "prod#eu".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = AppConfig::from_toml("[fetch_lock\ncooldown_secs = ").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_config_serialization() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[fetch_lock]"));
        assert!(rendered.contains("policy = \"fail_open\""));
        assert_eq!(AppConfig::from_toml(&rendered).unwrap(), AppConfig::default());
    }
}
