//! Engine module housing the detection loop.
//!
//! `core` holds the `PitchEngine` that turns analyser windows into pitch
//! updates. `frame_limiter` paces it, `silence` watches for prolonged quiet
//! input and `clock` abstracts time so both can be driven from tests.

pub mod clock;
pub mod core;
pub mod frame_limiter;
pub mod silence;

pub use self::core::{
    DetectorState, LatestResult, NoopCallbacks, PitchCallbacks, PitchEngine, PitchUpdate,
};
pub use clock::{StubTimeSource, SystemTimeSource, TimeSource};
pub use frame_limiter::{FrameRateLimiter, FrameStats, MAX_FPS, MIN_FPS, OPTIMAL_FPS};
pub use silence::{SilenceEvent, SilenceStatus, SilenceTracker};
