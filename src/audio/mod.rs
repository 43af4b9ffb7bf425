// Audio module - capture graph building blocks
//
// Backends, the lock-free capture transport, per-tap analysers with their
// noise filter chains, and device profiles. Ownership and ref-counting of
// the graph live in managers::AudioManager.

pub mod analyser;
pub mod backend;
pub mod buffer_pool;
pub mod device;
#[cfg(not(target_os = "android"))]
pub mod engine_cpal;
pub mod noise_filter;
pub mod stubs;

pub use analyser::{clamp_fft_size, AnalyserHandle, AnalyserOptions, MAX_ANALYSER_FFT_SIZE};
pub use backend::{
    AudioBackend, AudioContext, AudioSettings, ContextState, MediaStream, TrackKind,
    TrackReadyState, TrackState,
};
pub use buffer_pool::{
    AudioBuffer, BufferPool, BufferPoolChannels, CaptureChannels, ReaderChannels,
    DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE,
};
pub use device::{classify_device, DeviceClass, DeviceProfile};
#[cfg(not(target_os = "android"))]
pub use engine_cpal::CpalBackend;
pub use noise_filter::{
    FilterResponse, FilterUpdate, NoiseFilter, NoiseFilterConfig, NoiseFilterPreset,
    NoiseFilterStatus,
};
pub use stubs::{StubBackend, StubControls};
