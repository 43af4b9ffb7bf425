// Pitch detection error types and constants

use crate::error::ErrorCode;
use log::warn;
use std::fmt;

/// Pitch detection error code constants
///
/// Error code range: 2001-2005
pub struct PitchDetectionErrorCodes {}

impl PitchDetectionErrorCodes {
    /// FFT size is not a power of two greater than one
    pub const INVALID_FFT_SIZE: i32 = 2001;

    /// Buffer length does not match the configured length
    pub const INVALID_INPUT_LENGTH: i32 = 2002;

    /// Detector parameter outside its valid range
    pub const INVALID_PARAMETER: i32 = 2003;

    /// Detection requested before the detector was initialized
    pub const NOT_READY: i32 = 2004;

    /// A single frame failed inside the algorithm
    pub const FRAME_FAILED: i32 = 2005;
}

/// Log a detection error. Per-frame errors are recoverable, so they are
/// reported at warn level.
pub fn log_detection_error(err: &PitchDetectionError, context: &str) {
    warn!(
        "Pitch detection error in {}: code={}, component=PitchDetector, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the FFT, autocorrelation and MPM stages.
///
/// Error code ranges: 2001-2005
#[derive(Debug, Clone, PartialEq)]
pub enum PitchDetectionError {
    /// FFT size is not a power of two greater than one
    InvalidFftSize { size: usize },

    /// Buffer length does not match the configured length
    InvalidInputLength { expected: usize, actual: usize },

    /// Detector parameter outside its valid range
    InvalidParameter { name: &'static str, value: f32, range: String },

    /// Detection requested before the detector was initialized
    NotReady { state: String },

    /// A single frame failed inside the algorithm
    FrameFailed { reason: String },
}

impl PitchDetectionError {
    /// Per-frame failures degrade the frame to silence instead of stopping
    /// the detection loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PitchDetectionError::FrameFailed { .. } | PitchDetectionError::InvalidInputLength { .. }
        )
    }
}

impl ErrorCode for PitchDetectionError {
    fn code(&self) -> i32 {
        match self {
            PitchDetectionError::InvalidFftSize { .. } => PitchDetectionErrorCodes::INVALID_FFT_SIZE,
            PitchDetectionError::InvalidInputLength { .. } => {
                PitchDetectionErrorCodes::INVALID_INPUT_LENGTH
            }
            PitchDetectionError::InvalidParameter { .. } => {
                PitchDetectionErrorCodes::INVALID_PARAMETER
            }
            PitchDetectionError::NotReady { .. } => PitchDetectionErrorCodes::NOT_READY,
            PitchDetectionError::FrameFailed { .. } => PitchDetectionErrorCodes::FRAME_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            PitchDetectionError::InvalidFftSize { size } => {
                format!("FFT size must be a power of two and bigger than 1 (got {})", size)
            }
            PitchDetectionError::InvalidInputLength { expected, actual } => {
                format!("Input must have length {} but had length {}", expected, actual)
            }
            PitchDetectionError::InvalidParameter { name, value, range } => {
                format!("{} must be a number in the range {} (got {})", name, range, value)
            }
            PitchDetectionError::NotReady { state } => {
                format!("Cannot start detection: component state is {}", state)
            }
            PitchDetectionError::FrameFailed { reason } => {
                format!("Pitch detection algorithm failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for PitchDetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PitchDetectionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for PitchDetectionError {}
