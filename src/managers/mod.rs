// Managers Module
//
// Resource owners shared across consumers:
// - AudioManager: reference-counted capture graph and analyser taps
// - MicrophoneLifecycleManager: health, idle and visibility supervision
// - Monitor / RefCount: the background-task and holder-count primitives both use

pub mod audio_manager;
pub mod lifecycle;
pub mod monitor;
pub mod refcount;

pub use audio_manager::{AudioHandles, AudioManager, AudioManagerStatus, HealthStatus};
pub use lifecycle::{
    LifecycleConfig, LifecycleEvent, LifecycleStatus, MicrophoneLifecycleManager,
    MicrophoneState,
};
pub use monitor::Monitor;
pub use refcount::{RefCount, Release};
