// Microphone health error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Microphone health error code constants
///
/// Error code range: 3001-3002
pub struct MicrophoneHealthErrorCodes {}

impl MicrophoneHealthErrorCodes {
    /// Bounded auto-recovery gave up; monitoring has stopped
    pub const RECOVERY_EXHAUSTED: i32 = 3001;

    /// A single recovery attempt failed to re-initialize the stream
    pub const RECOVERY_FAILED: i32 = 3002;
}

pub fn log_health_error(err: &MicrophoneHealthError, context: &str) {
    error!(
        "Microphone health error in {}: code={}, component=MicrophoneLifecycleManager, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the lifecycle manager's health monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum MicrophoneHealthError {
    /// Terminal: no further health polling until reset_recovery_attempts()
    RecoveryExhausted { attempts: u32 },

    /// A single recovery attempt failed
    RecoveryFailed { attempt: u32, reason: String },
}

impl ErrorCode for MicrophoneHealthError {
    fn code(&self) -> i32 {
        match self {
            MicrophoneHealthError::RecoveryExhausted { .. } => {
                MicrophoneHealthErrorCodes::RECOVERY_EXHAUSTED
            }
            MicrophoneHealthError::RecoveryFailed { .. } => {
                MicrophoneHealthErrorCodes::RECOVERY_FAILED
            }
        }
    }

    fn message(&self) -> String {
        match self {
            MicrophoneHealthError::RecoveryExhausted { attempts } => format!(
                "Microphone health check failed - maximum recovery attempts exceeded ({})",
                attempts
            ),
            MicrophoneHealthError::RecoveryFailed { attempt, reason } => {
                format!("Automatic recovery attempt {} failed: {}", attempt, reason)
            }
        }
    }
}

impl fmt::Display for MicrophoneHealthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MicrophoneHealthError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for MicrophoneHealthError {}
