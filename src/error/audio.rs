// Audio resource error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for audio error codes shared with consumers.
///
/// Error code range: 1001-1009
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Audio context could not be created, resumed or used
    pub const CONTEXT_FAILED: i32 = 1001;

    /// Operation requires a prior successful initialize()
    pub const NOT_INITIALIZED: i32 = 1002;

    /// Microphone permission denied
    pub const PERMISSION_DENIED: i32 = 1003;

    /// Failed to open the capture stream
    pub const STREAM_OPEN_FAILED: i32 = 1004;

    /// Applied gain differs from the requested sensitivity
    pub const GAIN_DRIFT: i32 = 1005;

    /// Error while stopping tracks or closing the context
    pub const TEARDOWN_FAILED: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// Invalid analyser or filter parameters
    pub const INVALID_PARAMETER: i32 = 1008;

    /// No analyser registered under the given id
    pub const UNKNOWN_ANALYSER: i32 = 1009;
}

/// Log an audio error with structured context
///
/// This function logs audio errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: The operation that failed
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=AudioManager, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover audio resource operations including context creation,
/// stream management, gain verification and teardown.
///
/// Error code range: 1001-1009
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Audio context could not be created, resumed or used
    ContextFailed { operation: String, reason: String },

    /// Operation requires a prior successful initialize()
    NotInitialized { operation: String },

    /// Microphone permission denied
    PermissionDenied,

    /// Failed to open the capture stream
    StreamOpenFailed { reason: String },

    /// Applied gain differs from the requested sensitivity
    GainDrift { expected: f32, actual: f32 },

    /// Error while stopping tracks or closing the context
    TeardownFailed { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Invalid analyser or filter parameters
    InvalidParameter { name: String, value: f32 },

    /// No analyser registered under the given id
    UnknownAnalyser { id: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::ContextFailed { .. } => AudioErrorCodes::CONTEXT_FAILED,
            AudioError::NotInitialized { .. } => AudioErrorCodes::NOT_INITIALIZED,
            AudioError::PermissionDenied => AudioErrorCodes::PERMISSION_DENIED,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::GainDrift { .. } => AudioErrorCodes::GAIN_DRIFT,
            AudioError::TeardownFailed { .. } => AudioErrorCodes::TEARDOWN_FAILED,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::InvalidParameter { .. } => AudioErrorCodes::INVALID_PARAMETER,
            AudioError::UnknownAnalyser { .. } => AudioErrorCodes::UNKNOWN_ANALYSER,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::ContextFailed { operation, reason } => {
                format!("Audio context failure during {}: {}", operation, reason)
            }
            AudioError::NotInitialized { operation } => {
                format!(
                    "AudioManager not initialized (operation: {}). Call initialize() first.",
                    operation
                )
            }
            AudioError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::GainDrift { expected, actual } => {
                format!(
                    "Gain drift detected: expected {:.2}, actual {:.2} (drift {:.2})",
                    expected,
                    actual,
                    (expected - actual).abs()
                )
            }
            AudioError::TeardownFailed { reason } => {
                format!("Audio teardown failed: {}", reason)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::InvalidParameter { name, value } => {
                format!("Invalid audio parameter {} = {}", name, value)
            }
            AudioError::UnknownAnalyser { id } => {
                format!("No analyser registered as '{}'", id)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return AudioError::PermissionDenied;
        }
        AudioError::ContextFailed {
            operation: "io".to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(
            AudioError::ContextFailed {
                operation: "init".to_string(),
                reason: "test".to_string()
            }
            .code(),
            AudioErrorCodes::CONTEXT_FAILED
        );
        assert_eq!(
            AudioError::NotInitialized {
                operation: "test".to_string()
            }
            .code(),
            AudioErrorCodes::NOT_INITIALIZED
        );
        assert_eq!(
            AudioError::PermissionDenied.code(),
            AudioErrorCodes::PERMISSION_DENIED
        );
        assert_eq!(
            AudioError::GainDrift {
                expected: 1.0,
                actual: 0.5
            }
            .code(),
            AudioErrorCodes::GAIN_DRIFT
        );
        assert_eq!(
            AudioError::LockPoisoned {
                component: "test".to_string()
            }
            .code(),
            AudioErrorCodes::LOCK_POISONED
        );
    }

    #[test]
    fn test_codes_stay_in_documented_range() {
        let codes = [
            AudioErrorCodes::CONTEXT_FAILED,
            AudioErrorCodes::NOT_INITIALIZED,
            AudioErrorCodes::PERMISSION_DENIED,
            AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioErrorCodes::GAIN_DRIFT,
            AudioErrorCodes::TEARDOWN_FAILED,
            AudioErrorCodes::LOCK_POISONED,
            AudioErrorCodes::INVALID_PARAMETER,
            AudioErrorCodes::UNKNOWN_ANALYSER,
        ];
        assert!(codes.iter().all(|code| (1001..=1009).contains(code)));
        assert_eq!(
            AudioError::UnknownAnalyser {
                id: "tap".to_string()
            }
            .code(),
            1009
        );
    }

    #[test]
    fn test_gain_drift_message_names_both_gains() {
        let err = AudioError::GainDrift {
            expected: 3.0,
            actual: 1.0,
        };
        let message = err.message();
        assert!(message.contains("expected 3.00"));
        assert!(message.contains("actual 1.00"));
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::PermissionDenied;
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let audio_err: AudioError = io_err.into();
        assert_eq!(audio_err, AudioError::PermissionDenied);

        let io_err = std::io::Error::other("device vanished");
        match AudioError::from(io_err) {
            AudioError::ContextFailed { reason, .. } => assert!(reason.contains("vanished")),
            other => panic!("Expected ContextFailed, got {:?}", other),
        }
    }
}
