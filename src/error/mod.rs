// Error types for the vocal pitch engine
//
// This module defines custom error types for audio resource, pitch detection,
// and microphone health operations, providing structured error handling with
// numeric error codes suitable for reporting across API boundaries.

mod audio;
mod detection;
mod health;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use detection::{log_detection_error, PitchDetectionError, PitchDetectionErrorCodes};
pub use health::{log_health_error, MicrophoneHealthError, MicrophoneHealthErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the consumer callback boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Any error surfaced through the detector's `on_error` callback.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorError {
    Audio(AudioError),
    Detection(PitchDetectionError),
    Health(MicrophoneHealthError),
}

impl ErrorCode for DetectorError {
    fn code(&self) -> i32 {
        match self {
            DetectorError::Audio(err) => err.code(),
            DetectorError::Detection(err) => err.code(),
            DetectorError::Health(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            DetectorError::Audio(err) => err.message(),
            DetectorError::Detection(err) => err.message(),
            DetectorError::Health(err) => err.message(),
        }
    }
}

impl std::fmt::Display for DetectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorError::Audio(err) => err.fmt(f),
            DetectorError::Detection(err) => err.fmt(f),
            DetectorError::Health(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for DetectorError {}

impl From<AudioError> for DetectorError {
    fn from(err: AudioError) -> Self {
        DetectorError::Audio(err)
    }
}

impl From<PitchDetectionError> for DetectorError {
    fn from(err: PitchDetectionError) -> Self {
        DetectorError::Detection(err)
    }
}

impl From<MicrophoneHealthError> for DetectorError {
    fn from(err: MicrophoneHealthError) -> Self {
        DetectorError::Health(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_trait() {
        let audio_err: &dyn ErrorCode = &AudioError::NotInitialized {
            operation: "create_analyser".to_string(),
        };
        assert_eq!(audio_err.code(), AudioErrorCodes::NOT_INITIALIZED);

        let health_err: &dyn ErrorCode = &MicrophoneHealthError::RecoveryExhausted { attempts: 3 };
        assert_eq!(health_err.code(), MicrophoneHealthErrorCodes::RECOVERY_EXHAUSTED);
    }

    #[test]
    fn test_detector_error_delegates_to_inner() {
        let inner = PitchDetectionError::InvalidInputLength {
            expected: 2048,
            actual: 1024,
        };
        let err: DetectorError = inner.clone().into();
        assert_eq!(err.code(), inner.code());
        assert_eq!(err.message(), inner.message());
        assert_eq!(format!("{}", err), format!("{}", inner));
    }
}
