//! Fail-open / fail-closed policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a guard decides when it cannot determine the correct answer.
///
/// Guards over retriable, idempotent actions (fetch dedup, alert suppression)
/// use `FailOpen`. Guards over irreversible capital movement use `FailClosed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Proceed with the guarded action.
    FailOpen,
    /// Block the guarded action.
    FailClosed,
}

impl FailurePolicy {
    /// Whether the guarded action proceeds when the guard is degraded.
    #[must_use]
    pub fn allows_on_error(&self) -> bool {
        matches!(self, Self::FailOpen)
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailOpen => write!(f, "fail_open"),
            Self::FailClosed => write!(f, "fail_closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_on_error() {
        assert!(FailurePolicy::FailOpen.allows_on_error());
        assert!(!FailurePolicy::FailClosed.allows_on_error());
    }

    #[test]
    fn test_policy_serde() {
        let policy: FailurePolicy = serde_json::from_str("\"fail_closed\"").unwrap();
        assert_eq!(policy, FailurePolicy::FailClosed);
        assert_eq!(policy.to_string(), "fail_closed");
    }
}
