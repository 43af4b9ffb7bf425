//! Backend abstractions for the shared capture graph.
//!
//! The manager never talks to hardware directly. A backend creates an
//! [`AudioContext`] (clock, state and the shared gain stage) and opens a
//! [`MediaStream`] that pushes captured blocks into a lock-free buffer pool.

use serde::{Deserialize, Serialize};

use crate::audio::buffer_pool::CaptureChannels;
use crate::error::AudioError;

/// Capture settings requested from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Samples per captured block
    pub block_size: usize,
    /// Blocks preallocated in the buffer pool
    pub buffer_count: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 1,
            block_size: 512,
            buffer_count: 32,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackReadyState {
    Live,
    Ended,
}

/// Snapshot of one track of a media stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    pub kind: TrackKind,
    pub label: String,
    pub enabled: bool,
    pub muted: bool,
    pub ready_state: TrackReadyState,
}

/// Clock and gain stage of the capture graph.
pub trait AudioContext: Send {
    fn state(&self) -> ContextState;
    fn sample_rate(&self) -> u32;
    fn resume(&mut self) -> Result<(), AudioError>;
    fn close(&mut self) -> Result<(), AudioError>;
    /// Request a gain. Platforms may override it (automatic gain control).
    fn set_gain(&mut self, gain: f32);
    /// Gain actually applied right now.
    fn gain(&self) -> f32;
}

/// A running capture stream.
pub trait MediaStream: Send {
    fn active(&self) -> bool;
    fn tracks(&self) -> Vec<TrackState>;
    /// Stop every live track. Tracks that already ended are skipped.
    fn stop(&mut self) -> Result<(), AudioError>;
}

/// Trait implemented by platform-specific audio backends.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_context(&self, settings: &AudioSettings) -> Result<Box<dyn AudioContext>, AudioError>;

    /// Open the microphone. The stream owns `capture` and pushes every block
    /// it records into it.
    fn open_stream(
        &self,
        settings: &AudioSettings,
        capture: CaptureChannels,
    ) -> Result<Box<dyn MediaStream>, AudioError>;
}
