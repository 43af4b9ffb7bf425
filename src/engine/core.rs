//! PitchEngine: the detection loop.
//!
//! Wires the shared [`AudioManager`] taps to the MPM detector, the harmonic
//! corrector and the consumer callbacks. The host drives it by calling
//! [`PitchEngine::tick`] as often as it likes (display refresh, a timer, a
//! CLI loop); the frame-rate limiter decides which ticks run a pass.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::analysis::{
    frequency_to_note, HarmonicCorrector, NoteInfo, PitchDetector, PitchEstimate, NO_NOTE,
};
use crate::audio::{AnalyserOptions, DeviceProfile, NoiseFilterConfig};
use crate::config::{AppConfig, DetectorConfig, SilenceConfig};
use crate::engine::clock::{SystemTimeSource, TimeSource};
use crate::engine::frame_limiter::{FrameRateLimiter, FrameStats};
use crate::engine::silence::{SilenceEvent, SilenceStatus, SilenceTracker};
use crate::error::{log_detection_error, AudioError, DetectorError, PitchDetectionError};
use crate::managers::AudioManager;

/// Pause between cleanup and initialize in [`PitchEngine::reinitialize`]
pub const REINITIALIZE_SETTLE: Duration = Duration::from_millis(100);

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    Uninitialized,
    Initializing,
    Ready,
    Detecting,
    Error,
}

/// Result delivered to the consumer every processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchUpdate {
    /// Rounded frequency in Hz, 0 when no pitch was accepted
    pub frequency: f32,
    pub note: &'static str,
    pub octave: Option<i32>,
    pub clarity: f32,
    /// Unsmoothed volume (0..=100) while pitched, 0 otherwise
    pub volume: f32,
    pub cents: Option<i32>,
}

/// Snapshot returned by [`PitchEngine::latest_result`].
#[derive(Debug, Clone, PartialEq)]
pub struct LatestResult {
    pub frequency: f32,
    pub note: &'static str,
    pub octave: i32,
    /// Smoothed volume (0..=100)
    pub volume: f32,
    pub raw_volume: f32,
    pub clarity: f32,
    pub timestamp: Instant,
}

/// Consumer hooks. Every method has a no-op default.
pub trait PitchCallbacks: Send {
    fn on_pitch_update(&mut self, _update: &PitchUpdate) {}
    fn on_state_change(&mut self, _state: DetectorState) {}
    fn on_error(&mut self, _error: &DetectorError) {}
    fn on_silence_warning(&mut self, _silent_for: Duration) {}
    fn on_silence_timeout(&mut self) {}
    fn on_silence_recovered(&mut self, _silent_for: Duration) {}
}

/// Callbacks that ignore everything.
pub struct NoopCallbacks;

impl PitchCallbacks for NoopCallbacks {}

pub struct PitchEngine {
    audio: AudioManager,
    profile: DeviceProfile,
    config: DetectorConfig,
    noise_filter: NoiseFilterConfig,
    callbacks: Box<dyn PitchCallbacks>,
    time: Arc<dyn TimeSource>,
    limiter: FrameRateLimiter,
    detector: Option<PitchDetector>,
    harmonic: HarmonicCorrector,
    harmonic_enabled: bool,
    silence: SilenceTracker,

    engine_id: u64,
    state: DetectorState,
    last_error: Option<DetectorError>,
    holds_audio: bool,
    analyser_ids: Vec<String>,
    sample_rate: f32,
    filtered_window: Vec<f32>,
    raw_window: Vec<f32>,

    volume_history: VecDeque<f32>,
    current_volume: f32,
    raw_volume: f32,
    current_frequency: f32,
    note: Option<NoteInfo>,
    clarity: f32,
}

impl PitchEngine {
    pub fn new(audio: AudioManager, config: &AppConfig, callbacks: Box<dyn PitchCallbacks>) -> Self {
        Self::with_time_source(audio, config, callbacks, Arc::new(SystemTimeSource::default()))
    }

    pub fn with_time_source(
        audio: AudioManager,
        config: &AppConfig,
        callbacks: Box<dyn PitchCallbacks>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let profile = *audio.profile();
        let smoothing = config.detector.volume_smoothing_frames.max(1);
        Self {
            profile,
            config: config.detector,
            noise_filter: config.noise_filter,
            callbacks,
            limiter: FrameRateLimiter::new(config.frame_rate.target_fps, time.clone()),
            time,
            detector: None,
            harmonic: HarmonicCorrector::new(config.harmonic),
            harmonic_enabled: true,
            silence: SilenceTracker::new(config.silence),
            engine_id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            state: DetectorState::Uninitialized,
            last_error: None,
            holds_audio: false,
            analyser_ids: Vec::new(),
            sample_rate: 0.0,
            filtered_window: Vec::new(),
            raw_window: Vec::new(),
            volume_history: std::iter::repeat(0.0).take(smoothing).collect(),
            current_volume: 0.0,
            raw_volume: 0.0,
            current_frequency: 0.0,
            note: None,
            clarity: 0.0,
            audio,
        }
    }

    /// Replace the device profile used for volume normalization.
    pub fn set_profile(&mut self, profile: DeviceProfile) {
        self.profile = profile;
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn last_error(&self) -> Option<&DetectorError> {
        self.last_error.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, DetectorState::Ready | DetectorState::Detecting)
    }

    pub fn is_detecting(&self) -> bool {
        self.state == DetectorState::Detecting
    }

    pub fn analyser_ids(&self) -> &[String] {
        &self.analyser_ids
    }

    /// Acquire the audio graph and create the filtered and raw taps.
    pub async fn initialize(&mut self) -> Result<(), DetectorError> {
        if self.is_initialized() {
            return Ok(());
        }
        self.set_state(DetectorState::Initializing);
        self.last_error = None;
        log::info!("[PitchEngine] Starting initialization via AudioManager");

        match self.build_pipeline().await {
            Ok(()) => {
                self.set_state(DetectorState::Ready);
                log::info!(
                    "[PitchEngine] Initialization complete (taps: {:?}, {} Hz)",
                    self.analyser_ids,
                    self.sample_rate
                );
                Ok(())
            }
            Err(err) => {
                log::error!("[PitchEngine] Initialization error: {}", err);
                self.release_audio();
                self.detector = None;
                self.last_error = Some(err.clone());
                self.set_state(DetectorState::Error);
                self.callbacks.on_error(&err);
                Err(err)
            }
        }
    }

    async fn build_pipeline(&mut self) -> Result<(), DetectorError> {
        let handles = self.audio.initialize().await?;
        self.holds_audio = true;
        self.sample_rate = handles.sample_rate as f32;

        let filtered_id = format!("pitch-filtered-{}", self.engine_id);
        let filtered = self.audio.create_analyser(
            &filtered_id,
            AnalyserOptions {
                fft_size: self.config.fft_size,
                use_filters: true,
                filter: self.noise_filter,
            },
        )?;
        self.analyser_ids.push(filtered_id);

        let raw_id = format!("pitch-raw-{}", self.engine_id);
        let raw = self
            .audio
            .create_analyser(&raw_id, AnalyserOptions::raw(self.config.fft_size))?;
        self.analyser_ids.push(raw_id);

        let mut detector = PitchDetector::new(filtered.fft_size)?;
        detector.set_min_volume_absolute(self.config.min_volume_absolute)?;
        self.detector = Some(detector);
        self.filtered_window = vec![0.0; filtered.fft_size];
        self.raw_window = vec![0.0; raw.fft_size];
        Ok(())
    }

    /// Begin delivering pitch updates. Only valid from `Ready`.
    pub fn start_detection(&mut self) -> bool {
        if self.state != DetectorState::Ready || self.detector.is_none() {
            let err: DetectorError = PitchDetectionError::NotReady {
                state: format!("{:?}", self.state).to_lowercase(),
            }
            .into();
            log::warn!("[PitchEngine] {}", err);
            self.callbacks.on_error(&err);
            return false;
        }
        self.limiter.reset();
        self.set_state(DetectorState::Detecting);
        true
    }

    /// Stop delivering updates. Safe from any state.
    pub fn stop_detection(&mut self) {
        self.limiter.reset();
        self.silence.reset();
        if self.state == DetectorState::Detecting {
            self.set_state(DetectorState::Ready);
        }
    }

    /// Run one detection pass if the limiter allows it.
    ///
    /// Returns the update delivered to `on_pitch_update`, or `None` when the
    /// tick was skipped.
    pub fn tick(&mut self) -> Option<PitchUpdate> {
        if self.state != DetectorState::Detecting || !self.limiter.should_process() {
            return None;
        }

        if let Err(err) = self.read_windows() {
            self.fail(err.into());
            return None;
        }

        self.update_volumes();

        let estimate = match self.detector.as_mut() {
            Some(detector) => detector.find_pitch(&self.filtered_window, self.sample_rate),
            None => return None,
        };
        Some(self.finish_frame(estimate))
    }

    /// Turn one detector result into the delivered update. A failed frame
    /// counts as unpitched and the loop carries on.
    fn finish_frame(
        &mut self,
        estimate: Result<PitchEstimate, PitchDetectionError>,
    ) -> PitchUpdate {
        let (frequency, clarity) = match estimate {
            Ok(estimate) => (estimate.frequency_hz, estimate.clarity),
            Err(err) => {
                log_detection_error(&err, "tick");
                if !err.is_recoverable() {
                    self.callbacks.on_error(&DetectorError::from(err));
                }
                (0.0, 0.0)
            }
        };

        let now = self.time.now();
        self.apply_estimate(frequency, clarity, now);

        let silence = self.silence.observe(self.current_volume, now);
        match silence {
            SilenceEvent::Started => log::info!("[PitchEngine] Silence detected, starting timer"),
            SilenceEvent::Warning(silent_for) => {
                log::warn!("[PitchEngine] Silence warning: {:?}", silent_for);
                self.callbacks.on_silence_warning(silent_for);
            }
            SilenceEvent::Recovered(silent_for) => {
                log::info!("[PitchEngine] Voice recovered after {:?} of silence", silent_for);
                self.callbacks.on_silence_recovered(silent_for);
            }
            SilenceEvent::Timeout(_) | SilenceEvent::None => {}
        }

        let update = self.current_result();
        self.callbacks.on_pitch_update(&update);

        if let SilenceEvent::Timeout(silent_for) = silence {
            log::info!("[PitchEngine] Silence timeout reached after {:?}", silent_for);
            self.callbacks.on_silence_timeout();
            self.stop_detection();
        }

        if self.limiter.stats().frame_drops == 0 {
            self.limiter.recover_performance();
        }
        update
    }

    fn read_windows(&mut self) -> Result<(), AudioError> {
        self.audio.pump()?;
        if let [filtered_id, raw_id] = self.analyser_ids.as_slice() {
            self.audio
                .time_domain_data(filtered_id, &mut self.filtered_window)?;
            self.audio.time_domain_data(raw_id, &mut self.raw_window)?;
        }
        Ok(())
    }

    fn update_volumes(&mut self) {
        let volume = self.profile.volume_percent(level(&self.filtered_window));
        self.raw_volume = self.profile.volume_percent(level(&self.raw_window));

        self.volume_history.pop_front();
        self.volume_history.push_back(volume);
        self.current_volume =
            self.volume_history.iter().sum::<f32>() / self.volume_history.len() as f32;
    }

    fn apply_estimate(&mut self, frequency: f32, clarity: f32, now: Instant) {
        let in_range =
            frequency >= self.config.min_frequency_hz && frequency <= self.config.max_frequency_hz;
        let accepted = frequency > 0.0
            && clarity > self.config.clarity_threshold
            && self.current_volume > self.config.min_volume_percent
            && in_range;

        if accepted {
            let corrected = if self.harmonic_enabled {
                let weight = (self.current_volume / 100.0).min(1.0);
                self.harmonic.correct(frequency, weight, now)
            } else {
                frequency
            };
            self.current_frequency = corrected.round();
            self.note = frequency_to_note(self.current_frequency);
            self.clarity = clarity;
        } else {
            // Two unpitched frames in a row drop the correction history
            if self.current_frequency == 0.0 {
                self.harmonic.reset();
            }
            self.current_frequency = 0.0;
            self.note = None;
            self.clarity = 0.0;
        }
    }

    fn fail(&mut self, err: DetectorError) {
        log::error!("[PitchEngine] Detection stopped: {}", err);
        self.last_error = Some(err.clone());
        self.limiter.reset();
        self.silence.reset();
        self.set_state(DetectorState::Error);
        self.callbacks.on_error(&err);
    }

    /// Latest frame as the consumer would see it.
    pub fn current_result(&self) -> PitchUpdate {
        let pitched = self.current_frequency > 0.0;
        PitchUpdate {
            frequency: self.current_frequency,
            note: self.note.map_or(NO_NOTE, |note| note.name),
            octave: self.note.map(|note| note.octave),
            clarity: self.clarity,
            volume: if pitched { self.raw_volume } else { 0.0 },
            cents: if pitched {
                self.note.map(|note| note.cents)
            } else {
                None
            },
        }
    }

    /// Latest values; `None` unless detecting.
    pub fn latest_result(&self) -> Option<LatestResult> {
        if self.state != DetectorState::Detecting {
            return None;
        }
        Some(LatestResult {
            frequency: self.current_frequency,
            note: self.note.map_or(NO_NOTE, |note| note.name),
            octave: self.note.map_or(0, |note| note.octave),
            volume: self.current_volume,
            raw_volume: self.raw_volume,
            clarity: self.clarity,
            timestamp: self.time.now(),
        })
    }

    pub fn set_harmonic_correction_enabled(&mut self, enabled: bool) {
        self.harmonic_enabled = enabled;
        if !enabled {
            self.harmonic.reset();
        }
    }

    pub fn harmonic_correction_enabled(&self) -> bool {
        self.harmonic_enabled
    }

    pub fn set_silence_config(&mut self, config: SilenceConfig) {
        self.silence.set_config(config);
        log::info!("[PitchEngine] Silence detection config updated: {:?}", config);
    }

    pub fn silence_status(&self) -> SilenceStatus {
        self.silence.status(self.time.now())
    }

    /// Clear everything shown to the user.
    pub fn reset_display_state(&mut self) {
        self.current_volume = 0.0;
        self.raw_volume = 0.0;
        self.current_frequency = 0.0;
        self.note = None;
        self.clarity = 0.0;
        self.volume_history.iter_mut().for_each(|v| *v = 0.0);
        self.harmonic.reset();
        self.silence.reset();
        log::debug!("[PitchEngine] Display state reset");
    }

    pub fn performance_stats(&self) -> FrameStats {
        self.limiter.stats()
    }

    /// Stop detection and hand the taps and the audio holder back.
    pub fn cleanup(&mut self) {
        log::info!("[PitchEngine] Starting cleanup");
        self.stop_detection();
        self.release_audio();
        self.detector = None;
        self.last_error = None;
        self.reset_display_state();
        if self.state != DetectorState::Uninitialized {
            self.set_state(DetectorState::Uninitialized);
        }
    }

    pub async fn reinitialize(&mut self) -> Result<(), DetectorError> {
        log::info!("[PitchEngine] Starting reinitialization");
        self.cleanup();
        tokio::time::sleep(REINITIALIZE_SETTLE).await;
        self.initialize().await
    }

    fn release_audio(&mut self) {
        let ids: Vec<&str> = self.analyser_ids.iter().map(String::as_str).collect();
        if self.holds_audio {
            if let Err(err) = self.audio.release(&ids) {
                log::error!("[PitchEngine] Failed to release audio: {}", err);
            }
            self.holds_audio = false;
        } else {
            for id in ids {
                if let Err(err) = self.audio.remove_analyser(id) {
                    log::error!("[PitchEngine] Failed to remove analyser {}: {}", id, err);
                }
            }
        }
        self.analyser_ids.clear();
    }

    fn set_state(&mut self, state: DetectorState) {
        self.state = state;
        self.callbacks.on_state_change(state);
    }
}

impl Drop for PitchEngine {
    fn drop(&mut self) {
        if self.holds_audio {
            self.release_audio();
        }
    }
}

/// sqrt of the mean absolute sample value.
fn level(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let sum: f32 = window.iter().map(|s| s.abs()).sum();
    (sum / window.len() as f32).sqrt()
}

#[cfg(test)]
mod tests;
