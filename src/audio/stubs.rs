//! In-memory audio backend for tests and offline tooling
//!
//! `StubBackend` never touches hardware. A shared [`StubControls`] handle lets
//! tests feed samples into the open stream, flip track health, simulate a
//! platform overriding the requested gain, and count how often contexts and
//! streams were created or torn down.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio::backend::{
    AudioBackend, AudioContext, AudioSettings, ContextState, MediaStream, TrackKind,
    TrackReadyState, TrackState,
};
use crate::audio::buffer_pool::CaptureChannels;
use crate::error::AudioError;

#[derive(Default)]
struct StubState {
    contexts_created: u32,
    contexts_closed: u32,
    streams_opened: u32,
    streams_stopped: u32,

    deny_permission: bool,
    fail_context: bool,
    start_suspended: bool,

    stream_active: bool,
    track_enabled: bool,
    track_muted: bool,
    track_ended: bool,
    no_audio_track: bool,

    requested_gain: f32,
    gain_sets: u32,
    gain_override: Option<f32>,

    capture: Option<CaptureChannels>,
}

/// Test handle shared between a [`StubBackend`] and the test body.
#[derive(Clone, Default)]
pub struct StubControls {
    state: Arc<Mutex<StubState>>,
}

impl StubControls {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        // A panicking test thread must not hide the counters from the others
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn contexts_created(&self) -> u32 {
        self.lock().contexts_created
    }

    pub fn contexts_closed(&self) -> u32 {
        self.lock().contexts_closed
    }

    pub fn streams_opened(&self) -> u32 {
        self.lock().streams_opened
    }

    pub fn streams_stopped(&self) -> u32 {
        self.lock().streams_stopped
    }

    pub fn set_deny_permission(&self, deny: bool) {
        self.lock().deny_permission = deny;
    }

    pub fn set_fail_context(&self, fail: bool) {
        self.lock().fail_context = fail;
    }

    pub fn set_start_suspended(&self, suspended: bool) {
        self.lock().start_suspended = suspended;
    }

    /// End the audio track, as when the device is unplugged.
    pub fn end_track(&self) {
        self.lock().track_ended = true;
    }

    pub fn set_track_muted(&self, muted: bool) {
        self.lock().track_muted = muted;
    }

    pub fn set_track_enabled(&self, enabled: bool) {
        self.lock().track_enabled = enabled;
    }

    pub fn set_stream_active(&self, active: bool) {
        self.lock().stream_active = active;
    }

    pub fn set_no_audio_track(&self, missing: bool) {
        self.lock().no_audio_track = missing;
    }

    /// Simulate automatic gain control pinning the applied gain.
    pub fn set_gain_override(&self, gain: Option<f32>) {
        self.lock().gain_override = gain;
    }

    pub fn requested_gain(&self) -> f32 {
        self.lock().requested_gain
    }

    /// Number of set_gain calls across all contexts.
    pub fn gain_sets(&self) -> u32 {
        self.lock().gain_sets
    }

    /// Push samples into the currently open stream. Returns false when no
    /// stream is open.
    pub fn feed(&self, samples: &[f32]) -> bool {
        let mut state = self.lock();
        if !state.stream_active || state.track_ended {
            return false;
        }
        match state.capture.as_mut() {
            Some(capture) => {
                capture.push_samples(samples);
                true
            }
            None => false,
        }
    }
}

pub struct StubBackend {
    controls: StubControls,
}

impl StubBackend {
    pub fn new() -> (Self, StubControls) {
        let controls = StubControls::default();
        (
            Self {
                controls: controls.clone(),
            },
            controls,
        )
    }
}

struct StubContext {
    controls: StubControls,
    sample_rate: u32,
    state: ContextState,
}

impl AudioContext for StubContext {
    fn state(&self) -> ContextState {
        self.state
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        if self.state == ContextState::Closed {
            return Err(AudioError::ContextFailed {
                operation: "resume".to_string(),
                reason: "context is closed".to_string(),
            });
        }
        self.state = ContextState::Running;
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if self.state != ContextState::Closed {
            self.state = ContextState::Closed;
            self.controls.lock().contexts_closed += 1;
        }
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) {
        let mut state = self.controls.lock();
        state.requested_gain = gain;
        state.gain_sets += 1;
    }

    fn gain(&self) -> f32 {
        let state = self.controls.lock();
        state.gain_override.unwrap_or(state.requested_gain)
    }
}

struct StubStream {
    controls: StubControls,
    stopped: bool,
}

impl MediaStream for StubStream {
    fn active(&self) -> bool {
        !self.stopped && self.controls.lock().stream_active
    }

    fn tracks(&self) -> Vec<TrackState> {
        let state = self.controls.lock();
        let kind = if state.no_audio_track {
            TrackKind::Video
        } else {
            TrackKind::Audio
        };
        vec![TrackState {
            kind,
            label: "Stub Microphone".to_string(),
            enabled: state.track_enabled,
            muted: state.track_muted,
            ready_state: if self.stopped || state.track_ended {
                TrackReadyState::Ended
            } else {
                TrackReadyState::Live
            },
        }]
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let mut state = self.controls.lock();
        state.streams_stopped += 1;
        state.stream_active = false;
        state.capture = None;
        Ok(())
    }
}

impl AudioBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn create_context(&self, settings: &AudioSettings) -> Result<Box<dyn AudioContext>, AudioError> {
        let mut state = self.controls.lock();
        if state.fail_context {
            return Err(AudioError::ContextFailed {
                operation: "create_context".to_string(),
                reason: "stub context failure".to_string(),
            });
        }
        state.contexts_created += 1;
        let initial = if state.start_suspended {
            ContextState::Suspended
        } else {
            ContextState::Running
        };
        drop(state);

        Ok(Box::new(StubContext {
            controls: self.controls.clone(),
            sample_rate: settings.sample_rate,
            state: initial,
        }))
    }

    fn open_stream(
        &self,
        _settings: &AudioSettings,
        capture: CaptureChannels,
    ) -> Result<Box<dyn MediaStream>, AudioError> {
        let mut state = self.controls.lock();
        if state.deny_permission {
            return Err(AudioError::PermissionDenied);
        }
        state.streams_opened += 1;
        state.stream_active = true;
        state.track_enabled = true;
        state.track_muted = false;
        state.track_ended = false;
        state.capture = Some(capture);
        drop(state);

        Ok(Box::new(StubStream {
            controls: self.controls.clone(),
            stopped: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer_pool::BufferPool;

    #[test]
    fn test_stub_stream_lifecycle() {
        let (backend, controls) = StubBackend::new();
        let settings = AudioSettings::default();
        let (capture, mut reader) = BufferPool::new(4, 64).unwrap().split();

        let mut stream = backend.open_stream(&settings, capture).unwrap();
        assert!(stream.active());
        assert!(controls.feed(&[0.25; 64]));
        assert_eq!(reader.drain(|block| assert_eq!(block[0], 0.25)), 1);

        stream.stop().unwrap();
        stream.stop().unwrap();
        assert_eq!(controls.streams_stopped(), 1);
        assert!(!controls.feed(&[0.0; 8]));
    }

    #[test]
    fn test_gain_override() {
        let (backend, controls) = StubBackend::new();
        let mut context = backend.create_context(&AudioSettings::default()).unwrap();
        context.set_gain(3.0);
        assert_eq!(context.gain(), 3.0);
        controls.set_gain_override(Some(1.0));
        assert_eq!(context.gain(), 1.0);
        assert_eq!(controls.requested_gain(), 3.0);
    }

    #[test]
    fn test_permission_denied() {
        let (backend, controls) = StubBackend::new();
        controls.set_deny_permission(true);
        let (capture, _reader) = BufferPool::new(1, 8).unwrap().split();
        assert_eq!(
            backend
                .open_stream(&AudioSettings::default(), capture)
                .err(),
            Some(AudioError::PermissionDenied)
        );
    }
}
