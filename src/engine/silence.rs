// Silence tracking - warning and timeout for prolonged quiet input
//
// Driven by the detection loop: every frame reports its smoothed volume.
// The first quiet frame starts the clock; a loud frame ends the silence.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::SilenceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceEvent {
    None,
    Started,
    /// Fired once per silent stretch
    Warning(Duration),
    /// Detection should stop
    Timeout(Duration),
    Recovered(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SilenceStatus {
    pub enabled: bool,
    pub silent: bool,
    pub silence_duration: Option<Duration>,
    pub warned: bool,
}

pub struct SilenceTracker {
    config: SilenceConfig,
    silent_since: Option<Instant>,
    warned: bool,
}

impl SilenceTracker {
    pub fn new(config: SilenceConfig) -> Self {
        Self {
            config,
            silent_since: None,
            warned: false,
        }
    }

    pub fn config(&self) -> &SilenceConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SilenceConfig) {
        self.config = config;
        if !config.enabled {
            self.reset();
        }
    }

    pub fn observe(&mut self, volume: f32, now: Instant) -> SilenceEvent {
        if !self.config.enabled {
            return SilenceEvent::None;
        }

        if volume < self.config.min_volume_threshold {
            let Some(since) = self.silent_since else {
                self.silent_since = Some(now);
                self.warned = false;
                return SilenceEvent::Started;
            };
            let silent_for = now.saturating_duration_since(since);
            if silent_for >= Duration::from_millis(self.config.timeout_ms) {
                self.reset();
                return SilenceEvent::Timeout(silent_for);
            }
            if !self.warned && silent_for >= Duration::from_millis(self.config.warning_ms) {
                self.warned = true;
                return SilenceEvent::Warning(silent_for);
            }
            SilenceEvent::None
        } else if let Some(since) = self.silent_since {
            self.reset();
            SilenceEvent::Recovered(now.saturating_duration_since(since))
        } else {
            SilenceEvent::None
        }
    }

    pub fn reset(&mut self) {
        self.silent_since = None;
        self.warned = false;
    }

    pub fn status(&self, now: Instant) -> SilenceStatus {
        SilenceStatus {
            enabled: self.config.enabled,
            silent: self.silent_since.is_some(),
            silence_duration: self
                .silent_since
                .map(|since| now.saturating_duration_since(since)),
            warned: self.warned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> SilenceConfig {
        SilenceConfig {
            enabled: true,
            ..SilenceConfig::default()
        }
    }

    #[test]
    fn test_disabled_tracker_is_inert() {
        let mut tracker = SilenceTracker::new(SilenceConfig::default());
        assert_eq!(tracker.observe(0.0, Instant::now()), SilenceEvent::None);
        assert!(!tracker.status(Instant::now()).silent);
    }

    #[test]
    fn test_warning_then_timeout() {
        let start = Instant::now();
        let mut tracker = SilenceTracker::new(enabled());
        assert_eq!(tracker.observe(0.0, start), SilenceEvent::Started);
        assert_eq!(
            tracker.observe(0.0, start + Duration::from_secs(10)),
            SilenceEvent::None
        );
        assert_eq!(
            tracker.observe(0.0, start + Duration::from_secs(15)),
            SilenceEvent::Warning(Duration::from_secs(15))
        );
        // Warning fires once
        assert_eq!(
            tracker.observe(0.0, start + Duration::from_secs(20)),
            SilenceEvent::None
        );
        assert!(tracker.status(start + Duration::from_secs(20)).warned);
        assert_eq!(
            tracker.observe(0.0, start + Duration::from_secs(30)),
            SilenceEvent::Timeout(Duration::from_secs(30))
        );
        assert!(!tracker.status(start + Duration::from_secs(30)).silent);
    }

    #[test]
    fn test_recovery_resets() {
        let start = Instant::now();
        let mut tracker = SilenceTracker::new(enabled());
        tracker.observe(0.0, start);
        assert_eq!(
            tracker.observe(50.0, start + Duration::from_secs(3)),
            SilenceEvent::Recovered(Duration::from_secs(3))
        );
        assert_eq!(
            tracker.observe(50.0, start + Duration::from_secs(4)),
            SilenceEvent::None
        );
    }
}
