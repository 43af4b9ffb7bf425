// CPAL backend - default input device capture for desktop platforms
//
// cpal::Stream is not Send on every host, so each stream lives on its own
// thread for its whole life. The MediaStream handle only keeps a stop
// channel and a few atomics shared with that thread.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::backend::{
    AudioBackend, AudioContext, AudioSettings, ContextState, MediaStream, TrackKind,
    TrackReadyState, TrackState,
};
use crate::audio::buffer_pool::CaptureChannels;
use crate::error::AudioError;

/// Desktop backend using the host's default input device.
#[derive(Default)]
pub struct CpalBackend {
    _unit: (),
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn default_input_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| AudioError::StreamOpenFailed {
            reason: "No default input device found".to_string(),
        })
}

/// Context for a cpal capture graph. Gain is applied in software by the
/// manager, so the requested value is always the applied one.
struct CpalContext {
    state: ContextState,
    sample_rate: u32,
    gain: f32,
}

impl AudioContext for CpalContext {
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
        self.state = ContextState::Closed;
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn gain(&self) -> f32 {
        self.gain
    }
}

struct CpalStream {
    label: String,
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    active: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    callbacks: Arc<AtomicU32>,
}

impl MediaStream for CpalStream {
    fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn tracks(&self) -> Vec<TrackState> {
        let ended = self.ended.load(Ordering::Acquire);
        vec![TrackState {
            kind: TrackKind::Audio,
            label: self.label.clone(),
            enabled: true,
            muted: false,
            ready_state: if ended {
                TrackReadyState::Ended
            } else {
                TrackReadyState::Live
            },
        }]
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(tx) = self.stop_tx.take() {
            // The worker may already be gone after a device error
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| AudioError::TeardownFailed {
                reason: "capture thread panicked".to_string(),
            })?;
        }
        self.active.store(false, Ordering::Release);
        self.ended.store(true, Ordering::Release);
        log::debug!(
            "[CpalBackend] Stream stopped after {} callbacks",
            self.callbacks.load(Ordering::Relaxed)
        );
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Build and play the input stream. Runs on the capture thread.
fn build_input_stream(
    device: &cpal::Device,
    mut capture: CaptureChannels,
    ended: Arc<AtomicBool>,
    callbacks: Arc<AtomicU32>,
) -> Result<cpal::Stream, AudioError> {
    let config = device
        .default_input_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default input config: {:?}", e),
        })?;

    let stream_config: cpal::StreamConfig = config.clone().into();
    let channels_count = stream_config.channels as usize;
    let mut scratch: Vec<f32> = Vec::with_capacity(capture.block_size());

    let err_ended = ended.clone();
    let err_fn = move |err: cpal::StreamError| {
        log::error!("[CpalBackend] Input stream error: {}", err);
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            err_ended.store(true, Ordering::Release);
        }
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                callbacks.fetch_add(1, Ordering::Relaxed);
                if channels_count <= 1 {
                    capture.push_samples(data);
                    return;
                }
                // Keep the first channel only
                for frame in data.chunks(channels_count) {
                    scratch.push(frame[0]);
                    if scratch.len() == scratch.capacity() {
                        capture.push_samples(&scratch);
                        scratch.clear();
                    }
                }
                if !scratch.is_empty() {
                    capture.push_samples(&scratch);
                    scratch.clear();
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::StreamOpenFailed {
                reason: format!(
                    "Only F32 sample format is currently supported for input (got {:?})",
                    other
                ),
            })
        }
    }
    .map_err(|e| AudioError::StreamOpenFailed {
        reason: format!("{:?}", e),
    })?;

    stream.play().map_err(|e| AudioError::StreamOpenFailed {
        reason: format!("Failed to start input stream: {:?}", e),
    })?;

    Ok(stream)
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn create_context(&self, settings: &AudioSettings) -> Result<Box<dyn AudioContext>, AudioError> {
        // Report the rate the device will actually deliver
        let sample_rate = default_input_device()
            .and_then(|device| {
                device
                    .default_input_config()
                    .map(|config| config.sample_rate().0)
                    .map_err(|e| AudioError::ContextFailed {
                        operation: "create_context".to_string(),
                        reason: format!("{:?}", e),
                    })
            })
            .unwrap_or(settings.sample_rate);

        Ok(Box::new(CpalContext {
            state: ContextState::Running,
            sample_rate,
            gain: 1.0,
        }))
    }

    fn open_stream(
        &self,
        _settings: &AudioSettings,
        capture: CaptureChannels,
    ) -> Result<Box<dyn MediaStream>, AudioError> {
        let device = default_input_device()?;
        let label = device.name().unwrap_or_else(|_| "default input".to_string());

        let active = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));
        let callbacks = Arc::new(AtomicU32::new(0));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();

        let thread_active = active.clone();
        let thread_ended = ended.clone();
        let thread_callbacks = callbacks.clone();
        let worker = thread::Builder::new()
            .name("pitch-capture".to_string())
            .spawn(move || {
                match build_input_stream(&device, capture, thread_ended, thread_callbacks) {
                    Ok(stream) => {
                        thread_active.store(true, Ordering::Release);
                        let _ = ready_tx.send(Ok(()));
                        // Hold the stream until asked to stop or the handle is dropped
                        let _ = stop_rx.recv();
                        thread_active.store(false, Ordering::Release);
                        drop(stream);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("Failed to spawn capture thread: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(AudioError::StreamOpenFailed {
                    reason: "capture thread exited before reporting".to_string(),
                });
            }
        }

        log::info!("[CpalBackend] Capturing from '{}'", label);
        Ok(Box::new(CpalStream {
            label,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
            active,
            ended,
            callbacks,
        }))
    }
}
