// Vocal Pitch Core - Rust pitch detection engine
// Real-time microphone capture, noise filtering and MPM pitch tracking

// Module declarations
pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod managers;

// Re-exports for convenience
pub use analysis::{frequency_to_note, HarmonicCorrector, NoteInfo, PitchDetector, PitchEstimate};
pub use audio::{AnalyserOptions, AudioBackend, AudioSettings, DeviceProfile, NoiseFilterConfig};
pub use config::AppConfig;
pub use engine::{DetectorState, PitchCallbacks, PitchEngine, PitchUpdate};
pub use error::{AudioError, DetectorError, ErrorCode, MicrophoneHealthError, PitchDetectionError};
pub use managers::{AudioManager, LifecycleEvent, MicrophoneLifecycleManager};
