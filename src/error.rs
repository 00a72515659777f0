//! Error types for the live synchronization engine.
//!
//! Most failures inside the engine are absorbed rather than surfaced: malformed
//! payloads are dropped, out-of-order snapshots are ignored, and send failures
//! only show up later through the health monitor. The errors here cover the
//! remaining cases where a caller has to react: bad configuration, a command
//! issued in the wrong phase, a recovery store that cannot be written, or an
//! engine that has already shut down.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use runlink::SyncError;
//!
//! let error = SyncError::transport_failed("companion link down");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::RunPhase;

/// Result type alias for engine operations.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Main error type for engine operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to encode {context}: {details}")]
    Encode { context: String, details: String },

    #[error("Invalid configuration for '{field}': {reason}")]
    Config { field: String, reason: String },

    #[error("File I/O failed: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recovery state could not be (de)serialized: {details}")]
    Persistence { details: String },

    #[error("Cannot {action} while run is {phase:?}")]
    InvalidTransition { phase: RunPhase, action: &'static str },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Sync engine is no longer running")]
    EngineStopped,
}

impl SyncError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { .. } => true,
            SyncError::Timeout { .. } => true,
            SyncError::File { .. } => true,
            SyncError::Encode { .. } => false,
            SyncError::Config { .. } => false,
            SyncError::Persistence { .. } => false,
            SyncError::InvalidTransition { .. } => false,
            SyncError::EngineStopped => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SyncError::Transport { .. } => vec![
                "Check that the companion device is reachable",
                "Wait for the reconnection controller to retry",
                "Verify the transport session is still activated",
            ],
            SyncError::Encode { .. } => vec![
                "Check for non-finite distance or position values",
                "Verify identifiers are within length limits",
            ],
            SyncError::Config { .. } => vec![
                "Keep stale < disconnect < extended-disconnect thresholds",
                "Use non-zero intervals",
                "Start from EngineConfig::default() and override selectively",
            ],
            SyncError::File { .. } => vec![
                "Check the recovery directory exists and is writable",
                "Ensure sufficient disk space",
            ],
            SyncError::Persistence { .. } => vec![
                "Delete the corrupted recovery file",
                "Start a fresh run",
            ],
            SyncError::InvalidTransition { .. } => vec![
                "Check the current run phase before issuing commands",
                "Subscribe to PhaseChanged events to track the lifecycle",
            ],
            SyncError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Check that the partner device is online",
            ],
            SyncError::EngineStopped => vec![
                "Create a new RunSession",
                "Check logs for the reason the engine shut down",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        SyncError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SyncError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Config { field: field.into(), reason: reason.into() }
    }

    /// Helper constructor for encode errors.
    pub fn encode(context: impl Into<String>, details: impl Into<String>) -> Self {
        SyncError::Encode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        SyncError::File { path, source }
    }

    /// Helper constructor for phase violations.
    pub fn invalid_transition(phase: RunPhase, action: &'static str) -> Self {
        SyncError::InvalidTransition { phase, action }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_yaml_ng::Error> for SyncError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        SyncError::Persistence { details: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_carry_their_context(
                reason in ".*",
                field in "\\w+",
                duration_ms in 1u64..60000u64,
            ) {
                let transport = SyncError::transport_failed(reason.clone());
                prop_assert!(transport.to_string().contains(&reason));

                let config = SyncError::config(field.clone(), "bad");
                prop_assert!(config.to_string().contains(&field));

                let timeout = SyncError::Timeout { duration: Duration::from_millis(duration_ms) };
                prop_assert!(!timeout.to_string().is_empty());
            }

            #[test]
            fn source_chain_is_preserved(base in ".*", depth in 1usize..5) {
                let mut current: Box<dyn std::error::Error + Send + Sync> =
                    Box::new(std::io::Error::other(base.clone()));
                for level in 0..depth {
                    current = Box::new(SyncError::transport_failed_with_source(
                        format!("level {}", level),
                        current,
                    ));
                }

                let mut traversed = 0;
                let mut found = false;
                let mut next = std::error::Error::source(current.as_ref());
                while let Some(source) = next {
                    traversed += 1;
                    found |= source.to_string().contains(&base);
                    next = source.source();
                }

                prop_assert_eq!(traversed, depth);
                prop_assert!(found);
            }
        }
    }

    #[test]
    fn retry_classification() {
        assert!(SyncError::transport_failed("down").is_retryable());
        assert!(!SyncError::encode("snapshot", "nan").is_retryable());
        assert!(!SyncError::invalid_transition(RunPhase::Idle, "pause").is_retryable());
        assert!(!SyncError::EngineStopped.is_retryable());
    }

    #[test]
    fn every_error_has_suggestions() {
        let errors = [
            SyncError::transport_failed("x"),
            SyncError::encode("snapshot", "nan"),
            SyncError::config("stale_threshold", "zero"),
            SyncError::file_error(PathBuf::from("/tmp/x"), std::io::Error::other("x")),
            SyncError::Persistence { details: "x".into() },
            SyncError::invalid_transition(RunPhase::Ended, "confirm"),
            SyncError::Timeout { duration: Duration::from_secs(1) },
            SyncError::EngineStopped,
        ];
        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "{error} has no suggestions");
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn invalid_transition_names_phase_and_action() {
        let error = SyncError::invalid_transition(RunPhase::AwaitingConfirmation, "pause");
        let message = error.to_string();
        assert!(message.contains("pause"));
        assert!(message.contains("AwaitingConfirmation"));
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<SyncError>();
    }

    #[test]
    fn io_errors_convert_to_file_error() {
        let err: SyncError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        match err {
            SyncError::File { source, .. } => assert_eq!(source.to_string(), "gone"),
            _ => panic!("Expected File error variant"),
        }
    }
}
