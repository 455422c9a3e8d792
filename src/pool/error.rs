//! Error types for pool operations.

use std::fmt;

/// Step of sandbox provisioning that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    /// Creating the container.
    Create,
    /// Starting a created container.
    Start,
    /// The governing context finished first.
    Cancelled,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Start => write!(f, "start"),
            Self::Cancelled => write!(f, "provisioning"),
        }
    }
}

/// One sandbox that failed to come up. Collected and logged, never thrown per item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} failed for {language} sandbox {}: {message}", slot_label(.slot))]
pub struct ProvisioningError {
    /// Language the sandbox was for.
    pub language: String,
    /// Index within the language's initial population; `None` for replacements.
    pub slot: Option<usize>,
    /// Step that failed.
    pub stage: ProvisionStage,
    /// Runtime error text.
    pub message: String,
}

fn slot_label(slot: &Option<usize>) -> String {
    slot.map_or_else(|| "(replacement)".to_string(), |slot| format!("#{slot}"))
}

/// Errors returned to callers of the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The language table was empty.
    #[error("no languages configured")]
    NoLanguages,

    /// No pool is configured for the language.
    #[error("unknown language: {language}")]
    UnknownLanguage {
        /// Language tag.
        language: String,
    },

    /// The language is configured but its sandboxes were never started.
    #[error("pool for {language} has not been started")]
    NotStarted {
        /// Language tag.
        language: String,
    },

    /// Initial sandboxes were already started for the language.
    #[error("pool for {language} is already started")]
    AlreadyStarted {
        /// Language tag.
        language: String,
    },

    /// No sandbox became idle before the acquisition deadline.
    #[error("timed out acquiring a {language} sandbox")]
    AcquisitionTimeout {
        /// Language tag.
        language: String,
    },

    /// The acquisition was cancelled by the caller.
    #[error("acquisition of a {language} sandbox was cancelled")]
    Cancelled {
        /// Language tag.
        language: String,
    },

    /// The language's idle queue was closed while waiting.
    #[error("{language} pool is closed")]
    QueueClosed {
        /// Language tag.
        language: String,
    },

    /// Teardown has begun; nothing more is handed out.
    #[error("pool is shutting down")]
    ShuttingDown,

    /// Bootstrap ended with zero sandboxes across all languages.
    #[error("no sandboxes started successfully ({} provisioning failures)", .failures.len())]
    NoSandboxesStarted {
        /// Every failed sandbox.
        failures: Vec<ProvisioningError>,
    },
}

impl PoolError {
    pub(crate) fn unknown_language(language: impl Into<String>) -> Self {
        Self::UnknownLanguage {
            language: language.into(),
        }
    }

    /// Returns true if the caller gave up waiting (deadline, not cancellation).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout { .. })
    }

    /// Returns true if the language has no configured pool.
    pub fn is_unknown_language(&self) -> bool {
        matches!(self, Self::UnknownLanguage { .. })
    }

    /// Returns true if the pool is closing or closed.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::QueueClosed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_error_display() {
        let err = ProvisioningError {
            language: "python".to_string(),
            slot: Some(2),
            stage: ProvisionStage::Start,
            message: "OCI runtime create failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "start failed for python sandbox #2: OCI runtime create failed"
        );

        let replacement = ProvisioningError { slot: None, ..err };
        assert!(replacement.to_string().contains("(replacement)"));
    }

    #[test]
    fn test_no_sandboxes_started_counts_failures() {
        let failure = ProvisioningError {
            language: "python".to_string(),
            slot: Some(0),
            stage: ProvisionStage::Create,
            message: "no such image".to_string(),
        };
        let err = PoolError::NoSandboxesStarted {
            failures: vec![failure.clone(), failure],
        };
        assert_eq!(
            err.to_string(),
            "no sandboxes started successfully (2 provisioning failures)"
        );
    }

    #[test]
    fn test_predicates() {
        let timeout = PoolError::AcquisitionTimeout {
            language: "python".to_string(),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_unknown_language());

        let unknown = PoolError::unknown_language("cobol");
        assert!(unknown.is_unknown_language());
        assert_eq!(unknown.to_string(), "unknown language: cobol");

        assert!(PoolError::ShuttingDown.is_shutdown());
        assert!(!PoolError::Cancelled {
            language: "python".to_string()
        }
        .is_timeout());
    }
}
