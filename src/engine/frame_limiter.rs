// FrameRateLimiter - decides when a detection pass may run
//
// The host may tick as fast as it likes; should_process() lets through at
// most one pass per frame interval. Late passes count as drops, and a burst
// of drops lowers the target rate. recover_performance() climbs back
// towards the optimal rate once passes complete on time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::engine::clock::TimeSource;

pub const MIN_FPS: u32 = 30;
pub const MAX_FPS: u32 = 60;
pub const OPTIMAL_FPS: u32 = 45;

/// FPS change per adjustment step
const FPS_STEP: u32 = 5;
/// Drops tolerated before the target rate is lowered
const DROP_TOLERANCE: u32 = 5;

/// Snapshot returned by [`FrameRateLimiter::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub current_fps: u32,
    pub frame_drops: u32,
    /// Current frame interval in milliseconds
    pub latency_ms: f64,
}

pub struct FrameRateLimiter {
    time: Arc<dyn TimeSource>,
    target_fps: u32,
    frame_interval: Duration,
    last_frame: Option<Instant>,
    next_frame: Option<Instant>,
    frame_drops: u32,
}

fn interval_for(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(fps))
}

impl FrameRateLimiter {
    /// `target_fps` is clamped to [`MIN_FPS`, `MAX_FPS`].
    pub fn new(target_fps: u32, time: Arc<dyn TimeSource>) -> Self {
        let target_fps = target_fps.clamp(MIN_FPS, MAX_FPS);
        Self {
            time,
            target_fps,
            frame_interval: interval_for(target_fps),
            last_frame: None,
            next_frame: None,
            frame_drops: 0,
        }
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    /// Returns true when a detection pass is due.
    pub fn should_process(&mut self) -> bool {
        let now = self.time.now();

        let next = match self.next_frame {
            None => {
                self.schedule_from(now);
                return true;
            }
            Some(next) => next,
        };

        if now < next {
            return false;
        }

        if let Some(last) = self.last_frame {
            if now.saturating_duration_since(last) > self.frame_interval.mul_f64(1.5) {
                self.frame_drops += 1;
                self.adjust_frame_rate();
            }
        }

        self.schedule_from(now);
        true
    }

    /// Raise the target rate by one step (up to the optimal rate) while no
    /// drops are pending.
    pub fn recover_performance(&mut self) {
        if self.frame_drops == 0 && self.target_fps < OPTIMAL_FPS {
            self.set_target((self.target_fps + FPS_STEP).min(OPTIMAL_FPS));
            let now = self.time.now();
            self.next_frame = Some(now + self.frame_interval);
        }
    }

    pub fn reset(&mut self) {
        self.last_frame = None;
        self.next_frame = None;
        self.frame_drops = 0;
        self.set_target(OPTIMAL_FPS);
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            current_fps: self.target_fps,
            frame_drops: self.frame_drops,
            latency_ms: self.frame_interval.as_secs_f64() * 1000.0,
        }
    }

    fn adjust_frame_rate(&mut self) {
        if self.frame_drops > DROP_TOLERANCE && self.target_fps > MIN_FPS {
            self.set_target(self.target_fps.saturating_sub(FPS_STEP).max(MIN_FPS));
            self.frame_drops = 0;
            log::info!(
                "[FrameRateLimiter] Adjusted FPS to {} due to high load",
                self.target_fps
            );
        }
    }

    fn set_target(&mut self, fps: u32) {
        self.target_fps = fps;
        self.frame_interval = interval_for(fps);
    }

    fn schedule_from(&mut self, now: Instant) {
        self.last_frame = Some(now);
        self.next_frame = Some(now + self.frame_interval);
    }
}
