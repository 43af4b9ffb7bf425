use super::*;

use std::f32::consts::PI;
use std::sync::Mutex;

use crate::audio::{AudioSettings, StubBackend, StubControls};
use crate::engine::clock::StubTimeSource;
use crate::error::AudioError;

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    State(DetectorState),
    Update(PitchUpdate),
    Error(DetectorError),
    SilenceWarning,
    SilenceTimeout,
    SilenceRecovered,
}

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    fn take(&self) -> Vec<Seen> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    fn push(&self, seen: Seen) {
        self.seen.lock().unwrap().push(seen);
    }
}

impl PitchCallbacks for Recorder {
    fn on_pitch_update(&mut self, update: &PitchUpdate) {
        self.push(Seen::Update(update.clone()));
    }

    fn on_state_change(&mut self, state: DetectorState) {
        self.push(Seen::State(state));
    }

    fn on_error(&mut self, error: &DetectorError) {
        self.push(Seen::Error(error.clone()));
    }

    fn on_silence_warning(&mut self, _silent_for: Duration) {
        self.push(Seen::SilenceWarning);
    }

    fn on_silence_timeout(&mut self) {
        self.push(Seen::SilenceTimeout);
    }

    fn on_silence_recovered(&mut self, _silent_for: Duration) {
        self.push(Seen::SilenceRecovered);
    }
}

struct Harness {
    engine: PitchEngine,
    audio: AudioManager,
    controls: StubControls,
    clock: Arc<StubTimeSource>,
    recorder: Recorder,
}

/// 25 ms per tick keeps a 45 fps limiter on schedule without drops.
const TICK: Duration = Duration::from_millis(25);

fn harness_with(config: AppConfig) -> Harness {
    let (backend, controls) = StubBackend::new();
    let audio = AudioManager::new(
        Arc::new(backend),
        DeviceProfile::pc(),
        AudioSettings::default(),
    );
    let clock = Arc::new(StubTimeSource::new());
    let recorder = Recorder::default();
    let engine = PitchEngine::with_time_source(
        audio.clone(),
        &config,
        Box::new(recorder.clone()),
        clock.clone(),
    );
    Harness {
        engine,
        audio,
        controls,
        clock,
        recorder,
    }
}

fn harness() -> Harness {
    harness_with(AppConfig::default())
}

fn sine(frequency: f32, amplitude: f32, len: usize) -> Vec<f32> {
    let sample_rate = AudioSettings::default().sample_rate as f32;
    (0..len)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate).sin())
        .collect()
}

impl Harness {
    async fn start(&mut self) {
        self.engine.initialize().await.unwrap();
        assert!(self.engine.start_detection());
        self.recorder.take();
    }

    fn tick(&mut self) -> Option<PitchUpdate> {
        let update = self.engine.tick();
        self.clock.advance(TICK);
        update
    }
}

#[tokio::test(start_paused = true)]
async fn test_initialize_creates_two_taps() {
    let mut h = harness();
    h.engine.initialize().await.unwrap();

    assert_eq!(h.engine.state(), DetectorState::Ready);
    assert_eq!(h.audio.ref_count(), 1);
    let status = h.audio.status().unwrap();
    assert_eq!(status.analysers.len(), 2);
    assert_eq!(status.analysers.iter().filter(|a| a.filtered).count(), 1);
    assert_eq!(
        h.recorder.take(),
        vec![
            Seen::State(DetectorState::Initializing),
            Seen::State(DetectorState::Ready)
        ]
    );

    // Already initialized: no second holder
    h.engine.initialize().await.unwrap();
    assert_eq!(h.audio.ref_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_failure_reports_error() {
    let mut h = harness();
    h.controls.set_deny_permission(true);

    let err = h.engine.initialize().await.unwrap_err();
    assert!(matches!(err, DetectorError::Audio(AudioError::PermissionDenied)));
    assert_eq!(h.engine.state(), DetectorState::Error);
    assert_eq!(h.engine.last_error(), Some(&err));
    assert_eq!(h.audio.ref_count(), 0);
    assert!(h.recorder.take().contains(&Seen::Error(err)));
}

#[tokio::test(start_paused = true)]
async fn test_start_detection_requires_ready() {
    let mut h = harness();
    assert!(!h.engine.start_detection());
    assert!(matches!(
        h.recorder.take().as_slice(),
        [Seen::Error(DetectorError::Detection(PitchDetectionError::NotReady { .. }))]
    ));
    assert!(h.engine.tick().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_detects_sine_pitch() {
    let mut h = harness();
    h.start().await;
    assert!(h.controls.feed(&sine(220.0, 0.5, 4096)));

    let update = h.tick().expect("first tick runs");
    assert!((update.frequency - 220.0).abs() <= 2.0, "got {}", update.frequency);
    assert_eq!(update.note, "A");
    assert_eq!(update.octave, Some(3));
    assert!(update.clarity > 0.9);
    assert!(update.volume > 40.0 && update.volume < 60.0, "got {}", update.volume);
    assert!(update.cents.is_some());

    let latest = h.engine.latest_result().unwrap();
    assert_eq!(latest.frequency, update.frequency);
    assert!(latest.volume < latest.raw_volume);
    assert_eq!(h.recorder.take(), vec![Seen::Update(update)]);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_skips_early_ticks() {
    let mut h = harness();
    h.start().await;
    h.controls.feed(&sine(220.0, 0.5, 4096));

    assert!(h.engine.tick().is_some());
    assert!(h.engine.tick().is_none());
    h.clock.advance(TICK);
    assert!(h.engine.tick().is_some());
    assert_eq!(h.engine.performance_stats().frame_drops, 0);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_input_reports_no_pitch() {
    let mut h = harness();
    h.start().await;
    h.controls.feed(&vec![0.0; 4096]);

    let update = h.tick().unwrap();
    assert_eq!(update.frequency, 0.0);
    assert_eq!(update.note, NO_NOTE);
    assert_eq!(update.octave, None);
    assert_eq!(update.volume, 0.0);
    assert_eq!(update.cents, None);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_pitch_is_rejected() {
    let mut h = harness();
    h.start().await;
    // Below the 65 Hz floor
    h.controls.feed(&sine(50.0, 0.5, 4096));
    assert_eq!(h.tick().unwrap().frequency, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_frame_degrades_to_no_pitch() {
    let mut h = harness();
    h.start().await;
    h.controls.feed(&sine(220.0, 0.5, 4096));
    assert!(h.tick().unwrap().frequency > 0.0);
    h.recorder.take();

    let err = PitchDetectionError::InvalidParameter {
        name: "clarityThreshold",
        value: 2.0,
        range: "(0, 1]".to_string(),
    };
    let update = h.engine.finish_frame(Err(err.clone()));
    assert_eq!(update.frequency, 0.0);
    assert_eq!(update.note, NO_NOTE);
    assert_eq!(
        h.recorder.take(),
        vec![Seen::Error(err.into()), Seen::Update(update)]
    );
    assert_eq!(h.engine.state(), DetectorState::Detecting);

    // Recoverable failures are not reported
    let update = h.engine.finish_frame(Err(PitchDetectionError::InvalidInputLength {
        expected: 2048,
        actual: 1024,
    }));
    assert_eq!(h.recorder.take(), vec![Seen::Update(update)]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_detection_is_idempotent() {
    let mut h = harness();
    h.start().await;

    h.engine.stop_detection();
    h.engine.stop_detection();
    assert_eq!(h.engine.state(), DetectorState::Ready);
    assert!(h.engine.latest_result().is_none());
    assert_eq!(h.recorder.take(), vec![Seen::State(DetectorState::Ready)]);
    assert!(h.engine.tick().is_none());

    assert!(h.engine.start_detection());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_releases_audio() {
    let mut h = harness();
    h.start().await;

    h.engine.cleanup();
    assert_eq!(h.engine.state(), DetectorState::Uninitialized);
    assert!(h.engine.analyser_ids().is_empty());
    assert!(!h.audio.is_initialized());
    assert_eq!(h.controls.contexts_closed(), 1);

    // A second cleanup has nothing left to give back
    h.engine.cleanup();
    assert_eq!(h.controls.contexts_closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shared_audio_survives_one_engine_cleanup() {
    let mut h = harness();
    let mut other = PitchEngine::new(h.audio.clone(), &AppConfig::default(), Box::new(NoopCallbacks));
    h.engine.initialize().await.unwrap();
    other.initialize().await.unwrap();
    assert_eq!(h.audio.ref_count(), 2);
    assert_eq!(h.audio.status().unwrap().analysers.len(), 4);

    other.cleanup();
    assert_eq!(h.audio.ref_count(), 1);
    assert_eq!(h.audio.status().unwrap().analysers.len(), 2);
    assert!(h.engine.start_detection());
}

#[tokio::test(start_paused = true)]
async fn test_reinitialize_rebuilds_pipeline() {
    let mut h = harness();
    h.start().await;

    h.engine.reinitialize().await.unwrap();
    assert_eq!(h.engine.state(), DetectorState::Ready);
    assert_eq!(h.audio.ref_count(), 1);
    assert_eq!(h.controls.contexts_created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_lost_audio_moves_to_error() {
    let mut h = harness();
    h.start().await;

    h.audio.force_cleanup().unwrap();
    assert!(h.tick().is_none());
    assert_eq!(h.engine.state(), DetectorState::Error);
    assert!(matches!(
        h.recorder.take().as_slice(),
        [
            Seen::State(DetectorState::Error),
            Seen::Error(DetectorError::Audio(AudioError::NotInitialized { .. }))
        ]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_silence_warning_and_timeout() {
    let mut config = AppConfig::default();
    config.silence.enabled = true;
    let mut h = harness_with(config);
    h.start().await;

    h.controls.feed(&vec![0.0; 2048]);
    h.tick().unwrap();
    assert!(h.engine.silence_status().silent);

    h.clock.advance(Duration::from_secs(15));
    h.tick().unwrap();
    assert!(h.recorder.take().contains(&Seen::SilenceWarning));

    h.clock.advance(Duration::from_secs(15));
    h.tick().unwrap();
    assert!(h.recorder.take().contains(&Seen::SilenceTimeout));
    assert_eq!(h.engine.state(), DetectorState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_voice_ends_silence() {
    let mut config = AppConfig::default();
    config.silence.enabled = true;
    let mut h = harness_with(config);
    h.start().await;

    h.controls.feed(&vec![0.0; 2048]);
    h.tick().unwrap();
    h.controls.feed(&sine(220.0, 0.5, 4096));
    h.tick().unwrap();
    assert!(h.recorder.take().contains(&Seen::SilenceRecovered));
    assert!(!h.engine.silence_status().silent);
}

#[tokio::test(start_paused = true)]
async fn test_reset_display_state_clears_values() {
    let mut h = harness();
    h.start().await;
    h.controls.feed(&sine(220.0, 0.5, 4096));
    h.tick().unwrap();

    h.engine.reset_display_state();
    let result = h.engine.current_result();
    assert_eq!(result.frequency, 0.0);
    assert_eq!(result.note, NO_NOTE);
    assert_eq!(h.engine.latest_result().unwrap().volume, 0.0);
}

#[test]
fn test_level_of_empty_window_is_zero() {
    assert_eq!(level(&[]), 0.0);
    assert!((level(&[0.25, -0.25]) - 0.5).abs() < 1e-6);
}
