// MicrophoneLifecycleManager: health, idle and visibility supervision
//
// Single Responsibility: keep the shared microphone usable while anyone holds
// it, and give it back when nobody is using it.
//
// While active the manager owns exactly one AudioManager holder. Three
// monitors run on the inactive -> active edge and stop on the way back.
// An unhealthy stream gets a bounded number of delayed rebuild attempts;
// running out of attempts stops all monitoring and reports once.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{
    log_audio_error, log_health_error, DetectorError, ErrorCode, MicrophoneHealthError,
};
use crate::managers::audio_manager::{AudioHandles, AudioManager, AudioManagerStatus, HealthStatus};
use crate::managers::monitor::Monitor;
use crate::managers::refcount::{Release, RefCount};

/// Delay before the health check that follows the page becoming visible
pub const VISIBLE_RECHECK_DELAY: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub health_check_interval_ms: u64,
    pub idle_check_interval_ms: u64,
    /// Inactivity after which the user counts as idle
    pub idle_timeout_ms: u64,
    /// Inactivity after which resources are force-released
    pub max_idle_before_release_ms: u64,
    pub visibility_check_interval_ms: u64,
    pub auto_recovery_delay_ms: u64,
    pub max_auto_recovery_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 5_000,
            idle_check_interval_ms: 30_000,
            idle_timeout_ms: 300_000,
            max_idle_before_release_ms: 600_000,
            visibility_check_interval_ms: 10_000,
            auto_recovery_delay_ms: 2_000,
            max_auto_recovery_attempts: 3,
        }
    }
}

impl LifecycleConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_idle_before_release(&self) -> Duration {
        Duration::from_millis(self.max_idle_before_release_ms)
    }

    pub fn visibility_check_interval(&self) -> Duration {
        Duration::from_millis(self.visibility_check_interval_ms)
    }

    pub fn auto_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.auto_recovery_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    StateChange(MicrophoneState),
    UserIdle,
    AutoRecoverySuccess,
    AutoRecoveryFailed(DetectorError),
    Error(DetectorError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleStatus {
    pub ref_count: usize,
    pub active: bool,
    pub page_visible: bool,
    pub user_active: bool,
    pub since_activity: Duration,
    pub auto_recovery_attempts: u32,
    pub recovery_exhausted: bool,
    pub monitoring: bool,
    pub last_health_check: Option<HealthStatus>,
    pub audio: Option<AudioManagerStatus>,
}

struct LifecycleState {
    ref_count: RefCount,
    active: bool,
    page_visible: bool,
    user_active: bool,
    last_activity: Instant,
    recovery_attempts: u32,
    recovery_pending: bool,
    exhausted: bool,
    last_health_check: Option<HealthStatus>,
    config: LifecycleConfig,
}

struct Monitors {
    health: Monitor,
    idle: Monitor,
    visibility: Monitor,
    /// One-shot follow-up scheduled by a visibility change
    visibility_followup: Monitor,
}

struct Inner {
    audio: AudioManager,
    state: Mutex<LifecycleState>,
    monitors: Mutex<Monitors>,
    events: broadcast::Sender<LifecycleEvent>,
}

#[derive(Clone)]
pub struct MicrophoneLifecycleManager {
    inner: Arc<Inner>,
}

impl MicrophoneLifecycleManager {
    pub fn new(audio: AudioManager, config: LifecycleConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                audio,
                state: Mutex::new(LifecycleState {
                    ref_count: RefCount::default(),
                    active: false,
                    page_visible: true,
                    user_active: true,
                    last_activity: Instant::now(),
                    recovery_attempts: 0,
                    recovery_pending: false,
                    exhausted: false,
                    last_health_check: None,
                    config,
                }),
                monitors: Mutex::new(Monitors {
                    health: Monitor::new("health"),
                    idle: Monitor::new("idle"),
                    visibility: Monitor::new("visibility"),
                    visibility_followup: Monitor::new("visibility-followup"),
                }),
                events,
            }),
        }
    }

    pub fn audio(&self) -> &AudioManager {
        &self.inner.audio
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Take a holder on the microphone, activating monitoring on the first one.
    pub async fn acquire(&self) -> Result<AudioHandles, DetectorError> {
        let count = self.inner.lock().ref_count.acquire();
        log::info!("[Lifecycle] Acquiring resources (refCount: {})", count);

        let mut handles = match self.inner.audio.initialize().await {
            Ok(handles) => handles,
            Err(err) => {
                log_audio_error(&err, "lifecycle_acquire");
                self.inner.lock().ref_count.release();
                let err = DetectorError::from(err);
                self.inner.emit(LifecycleEvent::Error(err.clone()));
                return Err(err);
            }
        };

        let became_active = {
            let mut state = self.inner.lock();
            state.last_activity = Instant::now();
            state.user_active = true;
            if state.active {
                self.inner.return_extra_holder(&mut handles);
                false
            } else {
                state.active = true;
                state.recovery_attempts = 0;
                state.recovery_pending = false;
                state.exhausted = false;
                true
            }
        };

        if became_active {
            self.inner.start_monitors();
            self.inner
                .emit(LifecycleEvent::StateChange(MicrophoneState::Active));
            log::info!("[Lifecycle] Microphone activated");
        }
        Ok(handles)
    }

    /// Give back a holder. The last one stops monitoring and releases audio.
    pub fn release(&self) -> Result<(), DetectorError> {
        let mut state = self.inner.lock();
        let transition = state.ref_count.release();
        match transition {
            Release::Remaining(count) => {
                log::info!("[Lifecycle] Releasing resources (refCount: {})", count);
                Ok(())
            }
            Release::AlreadyZero => {
                log::debug!("[Lifecycle] release() with no holders ignored");
                Ok(())
            }
            Release::ReachedZero => {
                let was_active = std::mem::replace(&mut state.active, false);
                drop(state);
                self.inner.stop_monitors();
                if was_active {
                    self.inner.audio.release(&[])?;
                    self.inner
                        .emit(LifecycleEvent::StateChange(MicrophoneState::Inactive));
                    log::info!("[Lifecycle] Microphone deactivated");
                }
                Ok(())
            }
        }
    }

    /// Drop every holder and tear the audio graph down.
    pub fn force_release(&self) -> Result<(), DetectorError> {
        self.inner.force_release()
    }

    /// Report a page/window visibility change.
    ///
    /// Becoming visible counts as activity and schedules a health check;
    /// staying hidden past the hard idle limit releases the microphone.
    pub fn set_page_visible(&self, visible: bool) {
        let mut state = self.inner.lock();
        state.page_visible = visible;
        if !state.active {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let mut monitors = self.inner.lock_monitors();
        if visible {
            log::info!("[Lifecycle] Page became visible - resuming monitoring");
            state.last_activity = Instant::now();
            state.user_active = true;
            drop(state);
            monitors
                .visibility_followup
                .start_after(VISIBLE_RECHECK_DELAY, async move {
                    if let Some(inner) = weak.upgrade() {
                        let _ = inner.perform_health_check().await;
                    }
                });
        } else {
            log::info!("[Lifecycle] Page became hidden - reducing monitoring");
            let limit = state.config.max_idle_before_release();
            drop(state);
            monitors.visibility_followup.start_after(limit, async move {
                if let Some(inner) = weak.upgrade() {
                    inner.release_if_hidden_and_idle();
                }
            });
        }
    }

    pub fn record_activity(&self) {
        let mut state = self.inner.lock();
        state.last_activity = Instant::now();
        state.user_active = true;
    }

    /// Clear the attempt counter and re-arm monitoring after exhaustion.
    pub fn reset_recovery_attempts(&self) {
        let rearm = {
            let mut state = self.inner.lock();
            state.recovery_attempts = 0;
            state.recovery_pending = false;
            std::mem::replace(&mut state.exhausted, false) && state.active
        };
        if rearm {
            log::info!("[Lifecycle] Recovery attempts reset - monitoring re-armed");
            self.inner.start_monitors();
        }
    }

    /// Replace the configuration, restarting monitors when active.
    pub fn update_config(&self, config: LifecycleConfig) {
        let restart = {
            let mut state = self.inner.lock();
            state.config = config;
            state.active && !state.exhausted
        };
        if restart {
            self.inner.start_monitors();
        }
        log::info!("[Lifecycle] Configuration updated: {:?}", config);
    }

    pub fn config(&self) -> LifecycleConfig {
        self.inner.lock().config
    }

    pub fn status(&self) -> LifecycleStatus {
        let monitoring = self.inner.lock_monitors().health.is_running();
        let state = self.inner.lock();
        LifecycleStatus {
            ref_count: state.ref_count.get(),
            active: state.active,
            page_visible: state.page_visible,
            user_active: state.user_active,
            since_activity: state.last_activity.elapsed(),
            auto_recovery_attempts: state.recovery_attempts,
            recovery_exhausted: state.exhausted,
            monitoring,
            last_health_check: state.last_health_check.clone(),
            audio: self.inner.audio.status().ok(),
        }
    }
}

impl Inner {
    // Plain flags and counters; a panic elsewhere cannot leave them torn.
    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_monitors(&self) -> MutexGuard<'_, Monitors> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// The manager keeps a single audio holder; give back any extra one an
    /// initialize() call took while already active.
    fn return_extra_holder(&self, handles: &mut AudioHandles) {
        if handles.ref_count > 1 {
            match self.audio.release(&[]) {
                Ok(()) => handles.ref_count -= 1,
                Err(err) => log_audio_error(&err, "lifecycle_return_holder"),
            }
        }
    }

    fn start_monitors(self: &Arc<Self>) {
        let config = self.lock().config;
        let mut monitors = self.lock_monitors();

        let weak = Arc::downgrade(self);
        monitors
            .health
            .start(config.health_check_interval(), move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.perform_health_check().await,
                        None => ControlFlow::Break(()),
                    }
                }
            });

        let weak = Arc::downgrade(self);
        monitors.idle.start(config.idle_check_interval(), move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.check_idle(),
                    None => ControlFlow::Break(()),
                }
            }
        });

        let weak = Arc::downgrade(self);
        monitors
            .visibility
            .start(config.visibility_check_interval(), move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return ControlFlow::Break(());
                    };
                    if inner.lock().page_visible {
                        inner.perform_health_check().await
                    } else {
                        ControlFlow::Continue(())
                    }
                }
            });

        log::info!(
            "[Lifecycle] Monitoring started (health {:?}, idle {:?}, visibility {:?})",
            config.health_check_interval(),
            config.idle_check_interval(),
            config.visibility_check_interval()
        );
    }

    fn stop_monitors(&self) {
        let mut monitors = self.lock_monitors();
        monitors.health.stop();
        monitors.idle.stop();
        monitors.visibility.stop();
        monitors.visibility_followup.stop();
        log::info!("[Lifecycle] All monitoring stopped");
    }

    fn force_release(&self) -> Result<(), DetectorError> {
        log::warn!("[Lifecycle] Force release - cleaning up all resources");
        let was_active = {
            let mut state = self.lock();
            state.ref_count.force_zero();
            std::mem::replace(&mut state.active, false)
        };
        self.stop_monitors();
        self.audio.force_cleanup()?;
        if was_active {
            self.emit(LifecycleEvent::StateChange(MicrophoneState::Inactive));
        }
        Ok(())
    }

    async fn perform_health_check(self: &Arc<Self>) -> ControlFlow<()> {
        let health = self.audio.check_media_stream_health();

        let (attempt, delay) = {
            let mut state = self.lock();
            if !state.active || state.exhausted {
                return ControlFlow::Break(());
            }
            if state.recovery_pending {
                return ControlFlow::Continue(());
            }
            state.last_health_check = Some(health.clone());

            if health.healthy {
                if state.recovery_attempts > 0 {
                    log::info!("[Lifecycle] Microphone healthy again - attempts reset");
                }
                state.recovery_attempts = 0;
                return ControlFlow::Continue(());
            }

            log::warn!("[Lifecycle] Unhealthy microphone state detected: {:?}", health);
            if state.recovery_attempts >= state.config.max_auto_recovery_attempts {
                state.exhausted = true;
                let err = MicrophoneHealthError::RecoveryExhausted {
                    attempts: state.recovery_attempts,
                };
                drop(state);
                log_health_error(&err, "perform_health_check");
                self.stop_monitors();
                self.emit(LifecycleEvent::Error(err.into()));
                return ControlFlow::Break(());
            }

            state.recovery_attempts += 1;
            state.recovery_pending = true;
            log::info!(
                "[Lifecycle] Attempting automatic recovery ({}/{})",
                state.recovery_attempts,
                state.config.max_auto_recovery_attempts
            );
            (state.recovery_attempts, state.config.auto_recovery_delay())
        };

        tokio::time::sleep(delay).await;
        let result = self.audio.initialize().await;

        let mut state = self.lock();
        state.recovery_pending = false;
        match result {
            Ok(mut handles) => {
                if state.active {
                    self.return_extra_holder(&mut handles);
                } else if let Err(err) = self.audio.release(&[]) {
                    // Released while the rebuild was in flight
                    log_audio_error(&err, "lifecycle_recovery");
                }
                drop(state);
                log::info!("[Lifecycle] Automatic recovery successful");
                self.emit(LifecycleEvent::AutoRecoverySuccess);
            }
            Err(err) => {
                drop(state);
                let err = MicrophoneHealthError::RecoveryFailed {
                    attempt,
                    reason: err.message(),
                };
                log_health_error(&err, "auto_recovery");
                self.emit(LifecycleEvent::AutoRecoveryFailed(err.into()));
            }
        }
        ControlFlow::Continue(())
    }

    fn check_idle(&self) -> ControlFlow<()> {
        let mut state = self.lock();
        if !state.active {
            return ControlFlow::Break(());
        }
        let idle_for = state.last_activity.elapsed();

        if idle_for > state.config.idle_timeout() && state.user_active {
            state.user_active = false;
            log::info!("[Lifecycle] User idle detected");
            self.emit(LifecycleEvent::UserIdle);
        }

        if idle_for > state.config.max_idle_before_release() {
            drop(state);
            log::info!("[Lifecycle] Extreme idle detected - auto-releasing resources");
            if let Err(err) = self.force_release() {
                self.emit(LifecycleEvent::Error(err));
            }
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn release_if_hidden_and_idle(&self) {
        let release = {
            let state = self.lock();
            !state.page_visible
                && state.active
                && state.last_activity.elapsed() >= state.config.max_idle_before_release()
        };
        if release {
            log::info!("[Lifecycle] Long inactivity while hidden - releasing resources");
            if let Err(err) = self.force_release() {
                self.emit(LifecycleEvent::Error(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::AudioSettings;
    use crate::audio::device::DeviceProfile;
    use crate::audio::stubs::{StubBackend, StubControls};

    fn lifecycle(config: LifecycleConfig) -> (MicrophoneLifecycleManager, StubControls) {
        let (backend, controls) = StubBackend::new();
        let audio = AudioManager::new(
            Arc::new(backend),
            DeviceProfile::pc(),
            AudioSettings::default(),
        );
        (MicrophoneLifecycleManager::new(audio, config), controls)
    }

    fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_release_edges() {
        let (lifecycle, controls) = lifecycle(LifecycleConfig::default());
        let mut rx = lifecycle.subscribe();

        lifecycle.acquire().await.unwrap();
        lifecycle.acquire().await.unwrap();
        let status = lifecycle.status();
        assert_eq!(status.ref_count, 2);
        assert!(status.active);
        assert!(status.monitoring);
        assert_eq!(lifecycle.audio().ref_count(), 1);

        lifecycle.release().unwrap();
        assert!(lifecycle.status().active);
        lifecycle.release().unwrap();
        lifecycle.release().unwrap();

        let status = lifecycle.status();
        assert!(!status.active);
        assert!(!status.monitoring);
        assert!(!lifecycle.audio().is_initialized());
        assert_eq!(controls.contexts_closed(), 1);

        assert_eq!(
            drain(&mut rx),
            vec![
                LifecycleEvent::StateChange(MicrophoneState::Active),
                LifecycleEvent::StateChange(MicrophoneState::Inactive),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_acquire_rolls_back() {
        let (lifecycle, controls) = lifecycle(LifecycleConfig::default());
        controls.set_deny_permission(true);
        let mut rx = lifecycle.subscribe();

        assert!(lifecycle.acquire().await.is_err());
        let status = lifecycle.status();
        assert_eq!(status.ref_count, 0);
        assert!(!status.active);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [LifecycleEvent::Error(_)]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_rebuilds_stream() {
        let (lifecycle, controls) = lifecycle(LifecycleConfig::default());
        let mut rx = lifecycle.subscribe();
        lifecycle.acquire().await.unwrap();
        drain(&mut rx);

        controls.end_track();
        // Health check at 5 s, rebuild 2 s later
        tokio::time::sleep(Duration::from_millis(7_500)).await;

        assert_eq!(drain(&mut rx), vec![LifecycleEvent::AutoRecoverySuccess]);
        assert_eq!(controls.contexts_created(), 2);
        assert_eq!(lifecycle.audio().ref_count(), 1);

        // Next healthy check clears the counter
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(lifecycle.status().auto_recovery_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_once_and_stops() {
        let (lifecycle, controls) = lifecycle(LifecycleConfig::default());
        let mut rx = lifecycle.subscribe();
        lifecycle.acquire().await.unwrap();
        drain(&mut rx);

        controls.set_deny_permission(true);
        controls.end_track();
        tokio::time::sleep(Duration::from_secs(120)).await;

        let events = drain(&mut rx);
        let failures = events
            .iter()
            .filter(|e| matches!(e, LifecycleEvent::AutoRecoveryFailed(_)))
            .count();
        let terminal: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, LifecycleEvent::Error(_)))
            .collect();
        assert_eq!(failures, 3);
        assert_eq!(
            terminal,
            vec![&LifecycleEvent::Error(
                MicrophoneHealthError::RecoveryExhausted { attempts: 3 }.into()
            )]
        );

        let status = lifecycle.status();
        assert!(status.recovery_exhausted);
        assert!(!status.monitoring);

        // Re-arming lets monitoring run again
        controls.set_deny_permission(false);
        lifecycle.reset_recovery_attempts();
        assert!(lifecycle.status().monitoring);
        tokio::time::sleep(Duration::from_millis(7_500)).await;
        assert!(drain(&mut rx).contains(&LifecycleEvent::AutoRecoverySuccess));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_idle_releases() {
        let (lifecycle, controls) = lifecycle(LifecycleConfig::default());
        let mut rx = lifecycle.subscribe();
        lifecycle.acquire().await.unwrap();

        tokio::time::sleep(Duration::from_secs(11 * 60)).await;

        let events = drain(&mut rx);
        assert!(events.contains(&LifecycleEvent::UserIdle));
        assert_eq!(
            events.last(),
            Some(&LifecycleEvent::StateChange(MicrophoneState::Inactive))
        );
        assert!(!lifecycle.status().active);
        assert_eq!(lifecycle.status().ref_count, 0);
        assert_eq!(controls.contexts_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_prevents_idle_release() {
        let (lifecycle, _controls) = lifecycle(LifecycleConfig::default());
        lifecycle.acquire().await.unwrap();
        for _ in 0..15 {
            tokio::time::sleep(Duration::from_secs(60)).await;
            lifecycle.record_activity();
        }
        let status = lifecycle.status();
        assert!(status.active);
        assert!(status.user_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_page_released_after_limit() {
        let config = LifecycleConfig {
            idle_check_interval_ms: 3_600_000,
            ..LifecycleConfig::default()
        };
        let (lifecycle, _controls) = lifecycle(config);
        lifecycle.acquire().await.unwrap();

        lifecycle.set_page_visible(false);
        tokio::time::sleep(Duration::from_secs(9 * 60)).await;
        assert!(lifecycle.status().active);
        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert!(!lifecycle.status().active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_release_and_update_config() {
        let (lifecycle, _controls) = lifecycle(LifecycleConfig::default());
        lifecycle.acquire().await.unwrap();

        let config = LifecycleConfig {
            health_check_interval_ms: 1_000,
            ..LifecycleConfig::default()
        };
        lifecycle.update_config(config);
        assert_eq!(lifecycle.config().health_check_interval_ms, 1_000);
        assert!(lifecycle.status().monitoring);

        lifecycle.force_release().unwrap();
        let status = lifecycle.status();
        assert!(!status.active);
        assert!(!status.monitoring);
        assert_eq!(status.ref_count, 0);
        assert!(!lifecycle.audio().is_initialized());
    }
}
