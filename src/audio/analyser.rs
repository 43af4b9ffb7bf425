// Analyser - named analysis tap holding the most recent time-domain window
//
// Each tap keeps a ring of `fft_size` samples. Captured blocks are scaled by
// the shared gain, optionally run through the tap's own NoiseFilter, and
// written into the ring. Readers get the window in chronological order.

use serde::{Deserialize, Serialize};

use crate::audio::noise_filter::{NoiseFilter, NoiseFilterConfig};
use crate::error::AudioError;

pub const MAX_ANALYSER_FFT_SIZE: usize = 2048;
pub const MIN_ANALYSER_FFT_SIZE: usize = 32;

/// Options for [`crate::managers::AudioManager::create_analyser`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserOptions {
    pub fft_size: usize,
    /// Route the tap through a NoiseFilter chain
    pub use_filters: bool,
    pub filter: NoiseFilterConfig,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self {
            fft_size: MAX_ANALYSER_FFT_SIZE,
            use_filters: true,
            filter: NoiseFilterConfig::default(),
        }
    }
}

impl AnalyserOptions {
    pub fn raw(fft_size: usize) -> Self {
        Self {
            fft_size,
            use_filters: false,
            ..Self::default()
        }
    }

    pub fn filtered(fft_size: usize) -> Self {
        Self {
            fft_size,
            ..Self::default()
        }
    }
}

/// Round to a power of two within [`MIN_ANALYSER_FFT_SIZE`, `MAX_ANALYSER_FFT_SIZE`].
pub fn clamp_fft_size(requested: usize) -> usize {
    let clamped = requested.clamp(MIN_ANALYSER_FFT_SIZE, MAX_ANALYSER_FFT_SIZE);
    if clamped.is_power_of_two() {
        clamped
    } else {
        // Largest power of two not above the request
        clamped.next_power_of_two() / 2
    }
}

/// Public description of a tap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyserHandle {
    pub id: String,
    pub fft_size: usize,
    pub filtered: bool,
}

pub(crate) struct Analyser {
    handle: AnalyserHandle,
    filter: Option<NoiseFilter>,
    ring: Vec<f32>,
    write_pos: usize,
    scratch: Vec<f32>,
}

impl Analyser {
    pub(crate) fn new(id: &str, options: &AnalyserOptions, sample_rate: f32) -> Self {
        let fft_size = clamp_fft_size(options.fft_size);
        let filter = if options.use_filters {
            Some(NoiseFilter::new(
                sample_rate,
                NoiseFilterConfig {
                    use_filters: true,
                    ..options.filter
                },
            ))
        } else {
            None
        };
        Self {
            handle: AnalyserHandle {
                id: id.to_string(),
                fft_size,
                filtered: filter.is_some(),
            },
            filter,
            ring: vec![0.0; fft_size],
            write_pos: 0,
            scratch: Vec::with_capacity(fft_size),
        }
    }

    pub(crate) fn handle(&self) -> &AnalyserHandle {
        &self.handle
    }

    pub(crate) fn filter_mut(&mut self) -> Option<&mut NoiseFilter> {
        self.filter.as_mut()
    }

    /// Scale `block` by `gain`, filter it and append it to the ring.
    pub(crate) fn push_block(&mut self, block: &[f32], gain: f32) {
        for chunk in block.chunks(self.ring.len()) {
            self.scratch.clear();
            self.scratch.extend(chunk.iter().map(|&s| s * gain));
            if let Some(filter) = self.filter.as_mut() {
                filter.process_block(&mut self.scratch);
            }

            let len = self.ring.len();
            for &sample in self.scratch.iter() {
                self.ring[self.write_pos] = sample;
                self.write_pos = (self.write_pos + 1) % len;
            }
        }
    }

    /// Copy the latest window, oldest sample first. `out` must hold `fft_size` samples.
    pub(crate) fn time_domain_data(&self, out: &mut [f32]) -> Result<(), AudioError> {
        let len = self.ring.len();
        if out.len() != len {
            return Err(AudioError::InvalidParameter {
                name: format!("time_domain_data[{}].len", self.handle.id),
                value: out.len() as f32,
            });
        }
        let (newest, oldest) = self.ring.split_at(self.write_pos);
        out[..oldest.len()].copy_from_slice(oldest);
        out[oldest.len()..].copy_from_slice(newest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_size_clamping() {
        assert_eq!(clamp_fft_size(4096), 2048);
        assert_eq!(clamp_fft_size(2048), 2048);
        assert_eq!(clamp_fft_size(1000), 512);
        assert_eq!(clamp_fft_size(1), MIN_ANALYSER_FFT_SIZE);
    }

    #[test]
    fn test_ring_returns_chronological_window() {
        let mut analyser = Analyser::new("raw", &AnalyserOptions::raw(32), 44100.0);
        let samples: Vec<f32> = (0..40).map(|i| i as f32).collect();
        analyser.push_block(&samples[..25], 1.0);
        analyser.push_block(&samples[25..], 1.0);

        let mut out = vec![0.0; 32];
        analyser.time_domain_data(&mut out).unwrap();
        let expected: Vec<f32> = (8..40).map(|i| i as f32).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_gain_is_applied() {
        let mut analyser = Analyser::new("raw", &AnalyserOptions::raw(32), 44100.0);
        analyser.push_block(&[0.5; 32], 2.0);
        let mut out = vec![0.0; 32];
        analyser.time_domain_data(&mut out).unwrap();
        assert!(out.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_filtered_tap_removes_dc() {
        let mut analyser = Analyser::new("filtered", &AnalyserOptions::filtered(256), 44100.0);
        assert!(analyser.handle().filtered);
        for _ in 0..200 {
            analyser.push_block(&[0.5; 256], 1.0);
        }
        let mut out = vec![0.0; 256];
        analyser.time_domain_data(&mut out).unwrap();
        assert!(out.iter().all(|s| s.abs() < 0.01));
    }

    #[test]
    fn test_wrong_output_length() {
        let analyser = Analyser::new("raw", &AnalyserOptions::raw(64), 44100.0);
        let mut out = vec![0.0; 32];
        assert!(analyser.time_domain_data(&mut out).is_err());
    }
}
