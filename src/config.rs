//! Configuration management for runtime parameter tuning
//!
//! This module provides configuration loading from JSON files, so detector
//! thresholds, filter frequencies, scheduler rates and lifecycle timings can
//! be adjusted without recompiling. Every section falls back to its defaults
//! when missing from the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::analysis::HarmonicConfig;
use crate::audio::{AudioSettings, NoiseFilterConfig};
use crate::engine::frame_limiter::OPTIMAL_FPS;
use crate::managers::LifecycleConfig;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub harmonic: HarmonicConfig,
    pub frame_rate: FrameRateConfig,
    pub noise_filter: NoiseFilterConfig,
    pub audio: AudioSettings,
    pub lifecycle: LifecycleConfig,
    pub silence: SilenceConfig,
}

/// Detection loop parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Analysis window in samples (clamped to a power of two <= 2048)
    pub fft_size: usize,
    /// Minimum clarity for a detection to be accepted
    pub clarity_threshold: f32,
    /// RMS gate handed to the MPM detector
    pub min_volume_absolute: f32,
    pub min_frequency_hz: f32,
    pub max_frequency_hz: f32,
    /// Smoothed volume (0..=100) a detection must exceed
    pub min_volume_percent: f32,
    /// Frames averaged into the displayed volume
    pub volume_smoothing_frames: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            clarity_threshold: 0.4,
            min_volume_absolute: 0.003,
            min_frequency_hz: 65.0,
            max_frequency_hz: 1200.0,
            min_volume_percent: 0.4,
            volume_smoothing_frames: 5,
        }
    }
}

/// Scheduler pacing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameRateConfig {
    pub target_fps: u32,
}

impl Default for FrameRateConfig {
    fn default() -> Self {
        Self {
            target_fps: OPTIMAL_FPS,
        }
    }
}

/// Silence warning/timeout tracking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    pub enabled: bool,
    pub warning_ms: u64,
    pub timeout_ms: u64,
    /// Smoothed volume (0..=100) below which a frame counts as silent
    pub min_volume_threshold: f32,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            warning_ms: 15_000,
            timeout_ms: 30_000,
            min_volume_threshold: 0.01,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults when the file is missing or
    /// its JSON is invalid (a warning is logged).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load from the bundled assets directory.
    pub fn load() -> Self {
        Self::load_from_file("assets/pitch_config.json")
    }
}
