// AudioManager: shared, reference-counted capture graph
//
// Single Responsibility: own the one audio context + microphone stream and
// multiplex it across consumers through named analyser taps.
//
// Every successful initialize() adds one holder and every release() removes
// one. The graph is torn down exactly when the count goes from 1 to 0.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;

use crate::audio::analyser::{Analyser, AnalyserHandle, AnalyserOptions};
use crate::audio::backend::{
    AudioBackend, AudioContext, AudioSettings, ContextState, MediaStream, TrackKind,
    TrackReadyState, TrackState,
};
use crate::audio::buffer_pool::{BufferPool, ReaderChannels};
use crate::audio::device::DeviceProfile;
use crate::audio::noise_filter::FilterUpdate;
use crate::error::{log_audio_error, AudioError};
use crate::managers::monitor::Monitor;
use crate::managers::refcount::{Release, RefCount};

pub const MIN_SENSITIVITY: f32 = 0.1;
pub const MAX_SENSITIVITY: f32 = 10.0;
/// Allowed difference between requested and applied gain after set_sensitivity
pub const GAIN_VERIFY_TOLERANCE: f32 = 0.1;
pub const GAIN_VERIFY_DELAY: Duration = Duration::from_millis(100);
pub const GAIN_MONITOR_INTERVAL: Duration = Duration::from_secs(2);
/// Pause between tearing down an unhealthy graph and rebuilding it
pub const REBUILD_SETTLE: Duration = Duration::from_millis(100);

/// What a caller gets back from a successful initialize().
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioHandles {
    pub sample_rate: u32,
    pub ref_count: usize,
}

/// Stream diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub stream_active: bool,
    pub context_state: Option<ContextState>,
    pub track_states: Vec<TrackState>,
    pub healthy: bool,
    pub ref_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioManagerStatus {
    pub backend: &'static str,
    pub initialized: bool,
    pub ref_count: usize,
    pub context_state: Option<ContextState>,
    pub stream_active: bool,
    pub analysers: Vec<AnalyserHandle>,
    pub sensitivity: f32,
    pub last_error: Option<AudioError>,
}

/// The shared hardware graph. Exists only while initialized.
struct AudioResourceSet {
    context: Box<dyn AudioContext>,
    stream: Box<dyn MediaStream>,
    reader: ReaderChannels,
}

struct AnalyserSlot {
    options: AnalyserOptions,
    analyser: Analyser,
}

struct ManagerState {
    resources: Option<AudioResourceSet>,
    ref_count: RefCount,
    sensitivity: f32,
    analysers: BTreeMap<String, AnalyserSlot>,
    last_error: Option<AudioError>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Holders keep their taps and sensitivity
    Rebuild,
    /// Taps and sensitivity go; only valid once no holder remains
    Full,
}

struct Inner {
    backend: Arc<dyn AudioBackend>,
    profile: DeviceProfile,
    settings: AudioSettings,
    state: Mutex<ManagerState>,
    init_gate: tokio::sync::Mutex<()>,
    gain_monitor: Mutex<Monitor>,
}

/// Cloneable handle; clones share one graph.
#[derive(Clone)]
pub struct AudioManager {
    inner: Arc<Inner>,
}

impl AudioManager {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        profile: DeviceProfile,
        settings: AudioSettings,
    ) -> Self {
        log::info!(
            "[AudioManager] {:?} profile - default sensitivity {}x ({} backend)",
            profile.device_class,
            profile.sensitivity,
            backend.name()
        );
        Self {
            inner: Arc::new(Inner {
                backend,
                profile,
                settings,
                state: Mutex::new(ManagerState {
                    resources: None,
                    ref_count: RefCount::default(),
                    sensitivity: profile.sensitivity,
                    analysers: BTreeMap::new(),
                    last_error: None,
                }),
                init_gate: tokio::sync::Mutex::new(()),
                gain_monitor: Mutex::new(Monitor::new("gain")),
            }),
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.inner.profile
    }

    pub fn settings(&self) -> &AudioSettings {
        &self.inner.settings
    }

    /// Acquire the shared graph, building it on first use.
    ///
    /// Concurrent callers are serialized; each successful call adds exactly
    /// one holder. An existing graph that fails its health check is torn
    /// down and rebuilt, keeping current holders and analyser taps. A failed
    /// rebuild leaves those holders in place with no graph underneath.
    pub async fn initialize(&self) -> Result<AudioHandles, AudioError> {
        let _gate = self.inner.init_gate.lock().await;

        let rebuilding = {
            let mut state = self.inner.lock_state("initialize")?;
            if state.resources.is_none() {
                false
            } else {
                let health = evaluate_health(&state);
                if health.healthy {
                    state.ref_count.acquire();
                    return Ok(handles(&state));
                }
                log::warn!(
                    "[AudioManager] Unhealthy stream detected - rebuilding: {:?}",
                    health
                );
                self.inner.teardown(&mut state, Teardown::Rebuild);
                true
            }
        };
        // Holders may release while we settle; the count is re-read below
        if rebuilding {
            tokio::time::sleep(REBUILD_SETTLE).await;
        }

        let mut state = self.inner.lock_state("initialize")?;
        if let Err(err) = self.inner.build(&mut state) {
            log_audio_error(&err, "initialize");
            // Existing holders keep their claim and taps; the next
            // successful initialize() rebuilds underneath them
            let scope = if state.ref_count.is_zero() {
                Teardown::Full
            } else {
                Teardown::Rebuild
            };
            self.inner.teardown(&mut state, scope);
            state.last_error = Some(err.clone());
            return Err(err);
        }
        state.ref_count.acquire();
        state.last_error = None;
        let result = handles(&state);
        drop(state);

        self.start_gain_monitor();
        log::info!(
            "[AudioManager] Initialized at {} Hz (refCount: {})",
            result.sample_rate,
            result.ref_count
        );
        Ok(result)
    }

    /// Register a tap under `id`, replacing any tap already using it.
    pub fn create_analyser(
        &self,
        id: &str,
        options: AnalyserOptions,
    ) -> Result<AnalyserHandle, AudioError> {
        let mut state = self.inner.lock_state("create_analyser")?;
        let sample_rate = match state.resources.as_ref() {
            Some(resources) => resources.context.sample_rate() as f32,
            None => {
                let err = AudioError::NotInitialized {
                    operation: format!("create_analyser({})", id),
                };
                log_audio_error(&err, "create_analyser");
                return Err(err);
            }
        };

        let analyser = Analyser::new(id, &options, sample_rate);
        let handle = analyser.handle().clone();
        if state
            .analysers
            .insert(id.to_string(), AnalyserSlot { options, analyser })
            .is_some()
        {
            log::debug!("[AudioManager] Replaced analyser: {}", id);
        }
        log::info!(
            "[AudioManager] {} analyser created: {} (fft {})",
            if handle.filtered { "Filtered" } else { "Raw" },
            id,
            handle.fft_size
        );
        Ok(handle)
    }

    /// Drop a tap. Unknown ids are ignored.
    pub fn remove_analyser(&self, id: &str) -> Result<(), AudioError> {
        let mut state = self.inner.lock_state("remove_analyser")?;
        if state.analysers.remove(id).is_some() {
            log::debug!("[AudioManager] Analyser removed: {}", id);
        }
        Ok(())
    }

    /// Apply new filter frequencies to a filtered tap.
    pub fn update_analyser_filter(
        &self,
        id: &str,
        update: FilterUpdate,
    ) -> Result<(), AudioError> {
        let mut state = self.inner.lock_state("update_analyser_filter")?;
        let slot = state
            .analysers
            .get_mut(id)
            .ok_or_else(|| AudioError::UnknownAnalyser { id: id.to_string() })?;
        if let Some(filter) = slot.analyser.filter_mut() {
            filter.update_frequencies(update);
            slot.options.filter = *filter.config();
        }
        Ok(())
    }

    /// Move every captured block into every tap. Returns the number of
    /// blocks drained; zero when not initialized.
    pub fn pump(&self) -> Result<usize, AudioError> {
        let mut state = self.inner.lock_state("pump")?;
        let ManagerState {
            resources,
            analysers,
            ..
        } = &mut *state;
        let Some(resources) = resources.as_mut() else {
            return Ok(0);
        };

        let gain = resources.context.gain();
        Ok(resources.reader.drain(|block| {
            for slot in analysers.values_mut() {
                slot.analyser.push_block(block, gain);
            }
        }))
    }

    /// Copy the latest window of tap `id`; `out` must hold its fft_size.
    pub fn time_domain_data(&self, id: &str, out: &mut [f32]) -> Result<(), AudioError> {
        let state = self.inner.lock_state("time_domain_data")?;
        if state.resources.is_none() {
            return Err(AudioError::NotInitialized {
                operation: format!("time_domain_data({})", id),
            });
        }
        state
            .analysers
            .get(id)
            .ok_or_else(|| AudioError::UnknownAnalyser { id: id.to_string() })?
            .analyser
            .time_domain_data(out)
    }

    /// Change the microphone gain.
    ///
    /// Before initialization the clamped value is only stored. Otherwise it
    /// is applied, then read back after [`GAIN_VERIFY_DELAY`]; a drift larger
    /// than [`GAIN_VERIFY_TOLERANCE`] is re-applied and reported.
    pub async fn set_sensitivity(&self, value: f32) -> Result<f32, AudioError> {
        let target = value.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY);
        {
            let mut state = self.inner.lock_state("set_sensitivity")?;
            state.sensitivity = target;
            match state.resources.as_mut() {
                Some(resources) => {
                    resources.context.set_gain(target);
                    log::info!("[AudioManager] Microphone sensitivity updated: {:.1}x", target);
                }
                None => {
                    log::info!(
                        "[AudioManager] Microphone sensitivity set (awaiting initialization): {:.1}x",
                        target
                    );
                    return Ok(target);
                }
            }
        }

        tokio::time::sleep(GAIN_VERIFY_DELAY).await;

        let mut state = self.inner.lock_state("set_sensitivity")?;
        if let Some(resources) = state.resources.as_mut() {
            let actual = resources.context.gain();
            if (actual - target).abs() > GAIN_VERIFY_TOLERANCE {
                let err = AudioError::GainDrift {
                    expected: target,
                    actual,
                };
                log_audio_error(&err, "set_sensitivity");
                resources.context.set_gain(target);
                return Err(err);
            }
        }
        Ok(target)
    }

    pub fn sensitivity(&self) -> f32 {
        match self.inner.lock_state("sensitivity") {
            Ok(state) => state.sensitivity,
            Err(_) => self.inner.profile.sensitivity,
        }
    }

    /// Give back one holder and remove the listed taps. Tears the graph down
    /// when the last holder leaves; extra releases are ignored.
    pub fn release(&self, analyser_ids: &[&str]) -> Result<(), AudioError> {
        let mut state = self.inner.lock_state("release")?;
        for id in analyser_ids {
            state.analysers.remove(*id);
        }
        match state.ref_count.release() {
            Release::Remaining(count) => {
                log::info!("[AudioManager] Reference count decremented: {}", count);
            }
            Release::ReachedZero => {
                log::info!("[AudioManager] Last holder released - cleaning up");
                self.inner.teardown(&mut state, Teardown::Full);
            }
            Release::AlreadyZero => {
                log::debug!("[AudioManager] release() with no holders ignored");
            }
        }
        Ok(())
    }

    /// Tear everything down regardless of holders.
    pub fn force_cleanup(&self) -> Result<(), AudioError> {
        log::warn!("[AudioManager] Force cleanup executed");
        let mut state = self.inner.lock_state("force_cleanup")?;
        state.ref_count.force_zero();
        self.inner.teardown(&mut state, Teardown::Full);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner
            .lock_state("is_initialized")
            .map(|state| state.resources.is_some())
            .unwrap_or(false)
    }

    pub fn ref_count(&self) -> usize {
        self.inner
            .lock_state("ref_count")
            .map(|state| state.ref_count.get())
            .unwrap_or(0)
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.inner.lock_state("sample_rate").ok().and_then(|state| {
            state
                .resources
                .as_ref()
                .map(|resources| resources.context.sample_rate())
        })
    }

    /// Captured blocks lost because the reader fell behind.
    pub fn dropped_blocks(&self) -> u64 {
        self.inner
            .lock_state("dropped_blocks")
            .ok()
            .and_then(|state| {
                state
                    .resources
                    .as_ref()
                    .map(|resources| resources.reader.dropped_blocks())
            })
            .unwrap_or(0)
    }

    pub fn status(&self) -> Result<AudioManagerStatus, AudioError> {
        let state = self.inner.lock_state("status")?;
        Ok(AudioManagerStatus {
            backend: self.inner.backend.name(),
            initialized: state.resources.is_some(),
            ref_count: state.ref_count.get(),
            context_state: state
                .resources
                .as_ref()
                .map(|resources| resources.context.state()),
            stream_active: state
                .resources
                .as_ref()
                .map_or(false, |resources| resources.stream.active()),
            analysers: state
                .analysers
                .values()
                .map(|slot| slot.analyser.handle().clone())
                .collect(),
            sensitivity: state.sensitivity,
            last_error: state.last_error.clone(),
        })
    }

    /// Inspect the stream without changing anything.
    pub fn check_media_stream_health(&self) -> HealthStatus {
        match self.inner.lock_state("check_media_stream_health") {
            Ok(state) => evaluate_health(&state),
            Err(_) => HealthStatus {
                stream_active: false,
                context_state: None,
                track_states: Vec::new(),
                healthy: false,
                ref_count: 0,
            },
        }
    }

    fn start_gain_monitor(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut monitor = match self.inner.gain_monitor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        monitor.start(GAIN_MONITOR_INTERVAL, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => {
                        inner.check_gain();
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });
    }
}

impl Inner {
    fn lock_state(&self, operation: &str) -> Result<MutexGuard<'_, ManagerState>, AudioError> {
        self.state.lock().map_err(|_| {
            let err = AudioError::LockPoisoned {
                component: "audio_manager".to_string(),
            };
            log_audio_error(&err, operation);
            err
        })
    }

    /// Open the context and stream into `state`. On error the caller tears
    /// down whatever was opened.
    fn build(&self, state: &mut ManagerState) -> Result<(), AudioError> {
        log::info!("[AudioManager] Starting initialization");
        let mut context = self.backend.create_context(&self.settings)?;
        if context.state() == ContextState::Suspended {
            if let Err(err) = context.resume() {
                let _ = context.close();
                return Err(err);
            }
            log::info!("[AudioManager] Context resumed");
        }

        let (capture, reader) =
            BufferPool::new(self.settings.buffer_count, self.settings.block_size)?.split();
        let stream = match self.backend.open_stream(&self.settings, capture) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = context.close();
                return Err(err);
            }
        };
        log::debug!("[AudioManager] Stream tracks: {:?}", stream.tracks());

        context.set_gain(state.sensitivity);
        let sample_rate = context.sample_rate() as f32;
        for (id, slot) in state.analysers.iter_mut() {
            slot.analyser = Analyser::new(id, &slot.options, sample_rate);
        }
        state.resources = Some(AudioResourceSet {
            context,
            stream,
            reader,
        });
        Ok(())
    }

    fn teardown(&self, state: &mut ManagerState, scope: Teardown) {
        log::info!("[AudioManager] Starting cleanup");
        match self.gain_monitor.lock() {
            Ok(mut monitor) => monitor.stop(),
            Err(poisoned) => poisoned.into_inner().stop(),
        }

        if let Some(mut resources) = state.resources.take() {
            if let Err(err) = resources.stream.stop() {
                log_audio_error(&err, "teardown");
            }
            if resources.context.state() != ContextState::Closed {
                if let Err(err) = resources.context.close() {
                    log_audio_error(&err, "teardown");
                }
            }
        }

        if scope == Teardown::Full {
            state.analysers.clear();
            state.sensitivity = self.profile.sensitivity;
        }
        log::info!("[AudioManager] Cleanup complete");
    }

    /// Periodic gain check: re-apply the stored sensitivity when the applied
    /// gain has moved more than 10% away from it.
    fn check_gain(&self) {
        let Ok(mut state) = self.lock_state("gain_monitor") else {
            return;
        };
        let expected = state.sensitivity;
        if let Some(resources) = state.resources.as_mut() {
            let actual = resources.context.gain();
            if (actual - expected).abs() > expected * 0.1 {
                let err = AudioError::GainDrift { expected, actual };
                log_audio_error(&err, "gain_monitor");
                resources.context.set_gain(expected);
                log::info!("[AudioManager] Gain reset to: {}", expected);
            }
        }
    }
}

fn handles(state: &ManagerState) -> AudioHandles {
    AudioHandles {
        sample_rate: state
            .resources
            .as_ref()
            .map_or(0, |resources| resources.context.sample_rate()),
        ref_count: state.ref_count.get(),
    }
}

fn evaluate_health(state: &ManagerState) -> HealthStatus {
    let ref_count = state.ref_count.get();
    let Some(resources) = state.resources.as_ref() else {
        return HealthStatus {
            stream_active: false,
            context_state: None,
            track_states: Vec::new(),
            healthy: false,
            ref_count,
        };
    };

    let stream_active = resources.stream.active();
    let context_state = Some(resources.context.state());
    let track_states = if stream_active {
        resources.stream.tracks()
    } else {
        Vec::new()
    };

    let healthy = stream_active
        && track_states
            .iter()
            .find(|track| track.kind == TrackKind::Audio)
            .map_or(false, |track| {
                track.ready_state == TrackReadyState::Live && track.enabled && !track.muted
            });

    HealthStatus {
        stream_active,
        context_state,
        track_states,
        healthy,
        ref_count,
    }
}
