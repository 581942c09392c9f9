//! Error normalization and signature hashing.
//!
//! Two occurrences of the same failure that differ only in timestamps,
//! UUIDs, or run / request ids must map to the same dedup key.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// NORMALIZATION PATTERNS
// =============================================================================

/// `run_id=<value>` and `request_id=<value>`, value up to a delimiter.
static ID_ASSIGNMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(run_id|request_id)=["']?[^\s,;)\]}"']+["']?"#)
        .expect("Invalid id assignment regex")
});

/// ISO-8601 date-times, with optional fraction and offset.
static ISO_TIMESTAMP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("Invalid timestamp regex")
});

static UUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("Invalid UUID regex")
});

static WHITESPACE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Replace volatile tokens with fixed placeholders and collapse whitespace.
pub fn normalize_error_message(message: &str) -> String {
    let normalized = ID_ASSIGNMENT_PATTERN.replace_all(message, "${1}=<ID>");
    let normalized = ISO_TIMESTAMP_PATTERN.replace_all(&normalized, "<TIMESTAMP>");
    let normalized = UUID_PATTERN.replace_all(&normalized, "<UUID>");
    let normalized = WHITESPACE_PATTERN.replace_all(&normalized, " ");
    normalized.trim().to_string()
}

// =============================================================================
// ErrorDetails / ErrorSignature
// =============================================================================

/// The failure as reported by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Exception / error type name, e.g. `TimeoutError`.
    pub error_type: String,
    pub message: String,
}

impl ErrorDetails {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// Stable identity of a recurring failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSignature {
    pub component: String,
    pub environment: String,
    pub failed_step: String,
    pub error_type: String,
    pub normalized_message: String,
    /// First 8 hex chars of `sha256("{error_type}|{normalized_message}")`.
    pub hash8: String,
}

impl ErrorSignature {
    pub fn new(component: &str, environment: &str, failed_step: &str, error: &ErrorDetails) -> Self {
        let normalized_message = normalize_error_message(&error.message);
        let hash8 = signature_hash(&error.error_type, &normalized_message);
        Self {
            component: component.to_string(),
            environment: environment.to_string(),
            failed_step: failed_step.to_string(),
            error_type: error.error_type.clone(),
            normalized_message,
            hash8,
        }
    }

    /// `component#environment#failed_step#hash8`.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}{}#{}",
            key_prefix(&self.component, &self.environment),
            self.failed_step,
            self.hash8
        )
    }
}

/// Key prefix shared by every signature of `(component, environment)`.
pub(crate) fn key_prefix(component: &str, environment: &str) -> String {
    format!("{component}#{environment}#")
}

fn signature_hash(error_type: &str, normalized_message: &str) -> String {
    let digest = Sha256::digest(format!("{error_type}|{normalized_message}").as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(8);
    hex
}
