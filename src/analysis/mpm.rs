// McLeod Pitch Method (MPM) pitch detector
//
// Pipeline per window:
//   1. RMS gate
//   2. NSDF from the FFT autocorrelation with incremental energy subtraction
//   3. key maxima (one per positive NSDF lobe)
//   4. first key maximum above clarity_threshold * highest key maximum
//   5. parabolic refinement of that peak
//
// Reference: P. McLeod, G. Wyvill, "A Smarter Way to Find Pitch" (2005).

use crate::analysis::autocorrelation::Autocorrelator;
use crate::error::PitchDetectionError;

/// One detection result. A frequency of 0 means no pitch was found.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PitchEstimate {
    pub frequency_hz: f32,
    /// 0..=1, how periodic the window was at the chosen lag
    pub clarity: f32,
}

impl PitchEstimate {
    pub const NONE: PitchEstimate = PitchEstimate {
        frequency_hz: 0.0,
        clarity: 0.0,
    };

    pub fn is_pitched(&self) -> bool {
        self.frequency_hz > 0.0
    }
}

/// A key maximum refined with parabolic interpolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyMaximum {
    /// Index into the NSDF buffer
    pub lag_index: usize,
    /// Interpolated lag in samples
    pub lag: f64,
    /// Interpolated NSDF value at `lag`
    pub value: f64,
}

impl KeyMaximum {
    /// Fit a parabola through the peak and its two neighbours and return its vertex.
    pub fn interpolate(nsdf: &[f64], lag_index: usize) -> Self {
        let center = nsdf[lag_index];
        let left = if lag_index > 0 {
            nsdf[lag_index - 1]
        } else {
            center
        };
        let right = nsdf.get(lag_index + 1).copied().unwrap_or(center);

        // y = a*x^2 + b*x + c through (-1, left), (0, center), (1, right)
        let a = 0.5 * (right - 2.0 * center + left);
        let b = 0.5 * (right - left);
        let offset = if a != 0.0 { -b / (2.0 * a) } else { 0.0 };

        Self {
            lag_index,
            lag: lag_index as f64 + offset,
            value: a * offset * offset + b * offset + center,
        }
    }
}

/// MPM pitch detector for windows of a fixed length.
///
/// Holds reusable scratch buffers, so one instance must be driven from a
/// single call stream (`find_pitch` takes `&mut self`).
pub struct PitchDetector {
    autocorrelator: Autocorrelator,
    nsdf: Vec<f64>,
    key_maxima: Vec<usize>,
    clarity_threshold: f32,
    min_volume_absolute: f32,
    max_input_amplitude: f32,
}

impl PitchDetector {
    pub const DEFAULT_CLARITY_THRESHOLD: f32 = 0.9;

    pub fn new(input_len: usize) -> Result<Self, PitchDetectionError> {
        Ok(Self {
            autocorrelator: Autocorrelator::new(input_len)?,
            nsdf: vec![0.0; input_len],
            key_maxima: Vec::with_capacity(input_len / 2 + 1),
            clarity_threshold: Self::DEFAULT_CLARITY_THRESHOLD,
            min_volume_absolute: 0.0,
            max_input_amplitude: 1.0,
        })
    }

    pub fn input_len(&self) -> usize {
        self.autocorrelator.input_len()
    }

    pub fn clarity_threshold(&self) -> f32 {
        self.clarity_threshold
    }

    pub fn min_volume_absolute(&self) -> f32 {
        self.min_volume_absolute
    }

    pub fn max_input_amplitude(&self) -> f32 {
        self.max_input_amplitude
    }

    /// Must be in (0, 1]. Higher values favour shorter lags less aggressively.
    pub fn set_clarity_threshold(&mut self, threshold: f32) -> Result<(), PitchDetectionError> {
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
            return Err(PitchDetectionError::InvalidParameter {
                name: "clarityThreshold",
                value: threshold,
                range: "(0, 1]".to_string(),
            });
        }
        self.clarity_threshold = threshold;
        Ok(())
    }

    /// RMS gate as an absolute amplitude in [0, max_input_amplitude]. 0 disables the gate.
    pub fn set_min_volume_absolute(&mut self, volume: f32) -> Result<(), PitchDetectionError> {
        if !volume.is_finite() || volume < 0.0 || volume > self.max_input_amplitude {
            return Err(PitchDetectionError::InvalidParameter {
                name: "minVolumeAbsolute",
                value: volume,
                range: format!("[0, {}]", self.max_input_amplitude),
            });
        }
        self.min_volume_absolute = volume;
        Ok(())
    }

    /// RMS gate in decibels relative to `max_input_amplitude`; must be <= 0.
    pub fn set_min_volume_decibels(&mut self, db: f32) -> Result<(), PitchDetectionError> {
        if !db.is_finite() || db > 0.0 {
            return Err(PitchDetectionError::InvalidParameter {
                name: "minVolumeDecibels",
                value: db,
                range: "(-inf, 0]".to_string(),
            });
        }
        self.min_volume_absolute = self.max_input_amplitude * 10f32.powf(db / 10.0);
        Ok(())
    }

    pub fn set_max_input_amplitude(&mut self, amplitude: f32) -> Result<(), PitchDetectionError> {
        if !amplitude.is_finite() || amplitude <= 0.0 {
            return Err(PitchDetectionError::InvalidParameter {
                name: "maxInputAmplitude",
                value: amplitude,
                range: "(0, inf)".to_string(),
            });
        }
        self.max_input_amplitude = amplitude;
        Ok(())
    }

    /// Detect the pitch of `input` sampled at `sample_rate` Hz.
    ///
    /// Returns [`PitchEstimate::NONE`] when the window is below the volume gate
    /// or has no key maxima.
    pub fn find_pitch(
        &mut self,
        input: &[f32],
        sample_rate: f32,
    ) -> Result<PitchEstimate, PitchDetectionError> {
        if input.len() != self.input_len() {
            return Err(PitchDetectionError::InvalidInputLength {
                expected: self.input_len(),
                actual: input.len(),
            });
        }
        if self.below_minimum_volume(input) {
            return Ok(PitchEstimate::NONE);
        }

        self.compute_nsdf(input)?;
        self.collect_key_maxima();

        let highest = self
            .key_maxima
            .iter()
            .map(|&index| self.nsdf[index])
            .fold(f64::NEG_INFINITY, f64::max);
        let cutoff = f64::from(self.clarity_threshold) * highest;

        let chosen = match self
            .key_maxima
            .iter()
            .copied()
            .find(|&index| self.nsdf[index] >= cutoff)
        {
            Some(index) => index,
            None => return Ok(PitchEstimate::NONE),
        };

        let peak = KeyMaximum::interpolate(&self.nsdf, chosen);
        if !peak.lag.is_finite() || peak.lag <= 0.0 {
            return Err(PitchDetectionError::FrameFailed {
                reason: format!("degenerate lag {} at index {}", peak.lag, chosen),
            });
        }

        Ok(PitchEstimate {
            frequency_hz: (f64::from(sample_rate) / peak.lag) as f32,
            clarity: peak.value.min(1.0) as f32,
        })
    }

    fn below_minimum_volume(&self, input: &[f32]) -> bool {
        if self.min_volume_absolute == 0.0 {
            return false;
        }
        let sum_sq: f64 = input.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
        let rms = (sum_sq / input.len() as f64).sqrt();
        rms < f64::from(self.min_volume_absolute)
    }

    /// nsdf[m] = 2 r[m] / m'[m], with m'[0] = 2 r[0] and each step removing
    /// the two samples that leave the overlap.
    fn compute_nsdf(&mut self, input: &[f32]) -> Result<(), PitchDetectionError> {
        self.autocorrelator.autocorrelate(input, &mut self.nsdf)?;

        let len = self.nsdf.len();
        let mut energy = 2.0 * self.nsdf[0];
        let mut lag = 0;
        while lag < len && energy > 0.0 {
            self.nsdf[lag] = 2.0 * self.nsdf[lag] / energy;
            let leaving_front = f64::from(input[lag]);
            let leaving_back = f64::from(input[len - lag - 1]);
            energy -= leaving_front * leaving_front + leaving_back * leaving_back;
            lag += 1;
        }
        for value in self.nsdf[lag..].iter_mut() {
            *value = 0.0;
        }
        Ok(())
    }

    /// One key maximum per lobe bounded by a positive-going and a
    /// negative-going zero crossing. The zero-lag lobe and a trailing
    /// unclosed lobe are ignored.
    fn collect_key_maxima(&mut self) {
        self.key_maxima.clear();
        let nsdf = &self.nsdf;

        let mut in_lobe = false;
        let mut lobe_max = f64::NEG_INFINITY;
        let mut lobe_index: Option<usize> = None;

        for n in 1..nsdf.len().saturating_sub(1) {
            let previous = nsdf[n - 1];
            let current = nsdf[n];
            if previous <= 0.0 && current > 0.0 {
                in_lobe = true;
                lobe_index = Some(n);
                lobe_max = current;
            } else if previous > 0.0 && current <= 0.0 {
                in_lobe = false;
                if let Some(index) = lobe_index {
                    self.key_maxima.push(index);
                }
            } else if in_lobe && current > lobe_max {
                lobe_max = current;
                lobe_index = Some(n);
            }
        }
    }
}
