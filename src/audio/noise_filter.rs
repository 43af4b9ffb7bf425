// NoiseFilter - highpass -> lowpass -> notch biquad chain for the analysis tap
//
// Default voice band: highpass 80Hz (breath/rumble), lowpass 800Hz (upper
// harmonics and hiss), notch 60Hz (mains hum). Coefficients follow the
// RBJ Audio EQ Cookbook. The chain can be bypassed; bypassing keeps the
// stages so that re-enabling does not rebuild them.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Lowest cutoff/centre frequency accepted by the chain
pub const MIN_FILTER_FREQ: f32 = 10.0;
/// Cutoffs are kept below this fraction of Nyquist
const MAX_NYQUIST_FRACTION: f32 = 0.95;
pub const MIN_Q: f32 = 0.05;
pub const MAX_Q: f32 = 40.0;

/// Filter chain settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseFilterConfig {
    pub highpass_freq: f32,
    pub lowpass_freq: f32,
    pub notch_freq: f32,
    pub highpass_q: f32,
    pub lowpass_q: f32,
    pub notch_q: f32,
    pub use_filters: bool,
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        NoiseFilterPreset::Voice.config()
    }
}

impl NoiseFilterConfig {
    /// Clamp frequencies and Q factors to values the biquads can realize at
    /// `sample_rate`.
    pub fn clamped(mut self, sample_rate: f32) -> Self {
        let max_freq = (sample_rate * 0.5 * MAX_NYQUIST_FRACTION).max(MIN_FILTER_FREQ);
        self.highpass_freq = self.highpass_freq.clamp(MIN_FILTER_FREQ, max_freq);
        self.lowpass_freq = self.lowpass_freq.clamp(MIN_FILTER_FREQ, max_freq);
        self.notch_freq = self.notch_freq.clamp(MIN_FILTER_FREQ, max_freq);
        self.highpass_q = self.highpass_q.clamp(MIN_Q, MAX_Q);
        self.lowpass_q = self.lowpass_q.clamp(MIN_Q, MAX_Q);
        self.notch_q = self.notch_q.clamp(MIN_Q, MAX_Q);
        self
    }
}

/// Partial update for [`NoiseFilter::update_frequencies`]. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterUpdate {
    pub highpass_freq: Option<f32>,
    pub lowpass_freq: Option<f32>,
    pub notch_freq: Option<f32>,
    pub highpass_q: Option<f32>,
    pub lowpass_q: Option<f32>,
    pub notch_q: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseFilterPreset {
    Voice,
    Instrument,
    Wide,
    Minimal,
}

impl NoiseFilterPreset {
    pub fn config(self) -> NoiseFilterConfig {
        let (hp, lp, notch, hp_q, lp_q, notch_q) = match self {
            NoiseFilterPreset::Voice => (80.0, 800.0, 60.0, 0.7, 0.7, 10.0),
            NoiseFilterPreset::Instrument => (40.0, 2000.0, 60.0, 0.5, 0.5, 8.0),
            NoiseFilterPreset::Wide => (20.0, 5000.0, 60.0, 0.3, 0.3, 5.0),
            NoiseFilterPreset::Minimal => (60.0, 8000.0, 60.0, 0.1, 0.1, 3.0),
        };
        NoiseFilterConfig {
            highpass_freq: hp,
            lowpass_freq: lp,
            notch_freq: notch,
            highpass_q: hp_q,
            lowpass_q: lp_q,
            notch_q,
            use_filters: true,
        }
    }
}

/// Biquad coefficients normalized by a0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoeffs {
    fn from_raw(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    fn omega(sample_rate: f32, freq: f32, q: f32) -> (f32, f32) {
        let omega = 2.0 * PI * freq / sample_rate;
        (omega.cos(), omega.sin() / (2.0 * q))
    }

    pub fn lowpass(sample_rate: f32, cutoff: f32, q: f32) -> Self {
        let (cos_w, alpha) = Self::omega(sample_rate, cutoff, q);
        Self::from_raw(
            (1.0 - cos_w) / 2.0,
            1.0 - cos_w,
            (1.0 - cos_w) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w,
            1.0 - alpha,
        )
    }

    pub fn highpass(sample_rate: f32, cutoff: f32, q: f32) -> Self {
        let (cos_w, alpha) = Self::omega(sample_rate, cutoff, q);
        Self::from_raw(
            (1.0 + cos_w) / 2.0,
            -(1.0 + cos_w),
            (1.0 + cos_w) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w,
            1.0 - alpha,
        )
    }

    pub fn notch(sample_rate: f32, center: f32, q: f32) -> Self {
        let (cos_w, alpha) = Self::omega(sample_rate, center, q);
        Self::from_raw(1.0, -2.0 * cos_w, 1.0, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha)
    }

    /// Magnitude and phase of H(e^jw) at `freq`.
    pub fn response(&self, sample_rate: f32, freq: f32) -> (f64, f64) {
        let w = 2.0 * std::f64::consts::PI * f64::from(freq) / f64::from(sample_rate);
        let (c1, s1) = (w.cos(), -w.sin());
        let (c2, s2) = ((2.0 * w).cos(), -(2.0 * w).sin());

        let num_re = f64::from(self.b0) + f64::from(self.b1) * c1 + f64::from(self.b2) * c2;
        let num_im = f64::from(self.b1) * s1 + f64::from(self.b2) * s2;
        let den_re = 1.0 + f64::from(self.a1) * c1 + f64::from(self.a2) * c2;
        let den_im = f64::from(self.a1) * s1 + f64::from(self.a2) * s2;

        let magnitude = (num_re.hypot(num_im)) / den_re.hypot(den_im);
        let phase = num_im.atan2(num_re) - den_im.atan2(den_re);
        (magnitude, phase)
    }
}

/// Direct form I state.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, input: f32, coeffs: &BiquadCoeffs) -> f32 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

#[derive(Debug, Clone)]
struct Stage {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl Stage {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct Chain {
    highpass: Stage,
    lowpass: Stage,
    notch: Stage,
}

/// Combined response of the chain at one frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterResponse {
    pub magnitude: f64,
    pub phase: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoiseFilterStatus {
    pub use_filters: bool,
    pub has_filters: bool,
    pub config: NoiseFilterConfig,
}

/// Three biquads in series, or a pass-through when disabled.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    sample_rate: f32,
    config: NoiseFilterConfig,
    chain: Option<Chain>,
}

impl NoiseFilter {
    pub fn new(sample_rate: f32, config: NoiseFilterConfig) -> Self {
        let config = config.clamped(sample_rate);
        let chain = if config.use_filters {
            log::debug!(
                "[NoiseFilter] 3-stage chain: highpass {}Hz (Q={}), lowpass {}Hz (Q={}), notch {}Hz (Q={})",
                config.highpass_freq,
                config.highpass_q,
                config.lowpass_freq,
                config.lowpass_q,
                config.notch_freq,
                config.notch_q
            );
            Some(Self::build_chain(sample_rate, &config))
        } else {
            None
        };
        Self {
            sample_rate,
            config,
            chain,
        }
    }

    pub fn from_preset(sample_rate: f32, preset: NoiseFilterPreset) -> Self {
        Self::new(sample_rate, preset.config())
    }

    fn build_chain(sample_rate: f32, config: &NoiseFilterConfig) -> Chain {
        Chain {
            highpass: Stage::new(BiquadCoeffs::highpass(
                sample_rate,
                config.highpass_freq,
                config.highpass_q,
            )),
            lowpass: Stage::new(BiquadCoeffs::lowpass(
                sample_rate,
                config.lowpass_freq,
                config.lowpass_q,
            )),
            notch: Stage::new(BiquadCoeffs::notch(
                sample_rate,
                config.notch_freq,
                config.notch_q,
            )),
        }
    }

    pub fn config(&self) -> &NoiseFilterConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.use_filters
    }

    pub fn status(&self) -> NoiseFilterStatus {
        NoiseFilterStatus {
            use_filters: self.config.use_filters,
            has_filters: self.chain.is_some(),
            config: self.config,
        }
    }

    /// Change cutoffs and Q factors in place. Filter state is preserved.
    pub fn update_frequencies(&mut self, update: FilterUpdate) {
        let mut next = self.config;
        if let Some(v) = update.highpass_freq {
            next.highpass_freq = v;
        }
        if let Some(v) = update.lowpass_freq {
            next.lowpass_freq = v;
        }
        if let Some(v) = update.notch_freq {
            next.notch_freq = v;
        }
        if let Some(v) = update.highpass_q {
            next.highpass_q = v;
        }
        if let Some(v) = update.lowpass_q {
            next.lowpass_q = v;
        }
        if let Some(v) = update.notch_q {
            next.notch_q = v;
        }
        self.config = next.clamped(self.sample_rate);

        if let Some(chain) = self.chain.as_mut() {
            let fresh = Self::build_chain(self.sample_rate, &self.config);
            chain.highpass.coeffs = fresh.highpass.coeffs;
            chain.lowpass.coeffs = fresh.lowpass.coeffs;
            chain.notch.coeffs = fresh.notch.coeffs;
        }
        log::debug!("[NoiseFilter] Parameters updated: {:?}", update);
    }

    /// Toggle bypass. Stages are built only when enabling a chain that has none.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.config.use_filters {
            return;
        }
        self.config.use_filters = enabled;
        if enabled && self.chain.is_none() {
            self.chain = Some(Self::build_chain(self.sample_rate, &self.config));
        }
        log::info!(
            "[NoiseFilter] Filters {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Clear the filter memory of every stage.
    pub fn reset(&mut self) {
        if let Some(chain) = self.chain.as_mut() {
            chain.highpass.state = BiquadState::default();
            chain.lowpass.state = BiquadState::default();
            chain.notch.state = BiquadState::default();
        }
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        match (&mut self.chain, self.config.use_filters) {
            (Some(chain), true) => {
                let x = chain.highpass.state.process(input, &chain.highpass.coeffs);
                let x = chain.lowpass.state.process(x, &chain.lowpass.coeffs);
                chain.notch.state.process(x, &chain.notch.coeffs)
            }
            _ => input,
        }
    }

    pub fn process_block(&mut self, samples: &mut [f32]) {
        if !self.config.use_filters {
            return;
        }
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Response of the whole chain at `freq`; unity when bypassed.
    pub fn frequency_response(&self, freq: f32) -> FilterResponse {
        match (&self.chain, self.config.use_filters) {
            (Some(chain), true) => {
                let (m1, p1) = chain.highpass.coeffs.response(self.sample_rate, freq);
                let (m2, p2) = chain.lowpass.coeffs.response(self.sample_rate, freq);
                let (m3, p3) = chain.notch.coeffs.response(self.sample_rate, freq);
                FilterResponse {
                    magnitude: m1 * m2 * m3,
                    phase: p1 + p2 + p3,
                }
            }
            _ => FilterResponse {
                magnitude: 1.0,
                phase: 0.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / SR).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_voice_band_response() {
        let filter = NoiseFilter::new(SR, NoiseFilterConfig::default());

        let passband = filter.frequency_response(250.0).magnitude;
        assert!(passband > 0.7, "passband gain {}", passband);

        assert!(filter.frequency_response(60.0).magnitude < 0.05);
        assert!(filter.frequency_response(20.0).magnitude < 0.1);
        assert!(filter.frequency_response(5000.0).magnitude < 0.05);
    }

    #[test]
    fn test_bypass_is_identity() {
        let mut filter = NoiseFilter::new(
            SR,
            NoiseFilterConfig {
                use_filters: false,
                ..NoiseFilterConfig::default()
            },
        );
        assert_eq!(filter.frequency_response(60.0).magnitude, 1.0);

        let mut block = sine(60.0, 256);
        let original = block.clone();
        filter.process_block(&mut block);
        assert_eq!(block, original);
        assert!(!filter.status().has_filters);
    }

    #[test]
    fn test_hum_is_attenuated_in_time_domain() {
        let mut filter = NoiseFilter::new(SR, NoiseFilterConfig::default());
        let mut hum = sine(60.0, 44100);
        filter.process_block(&mut hum);
        // Skip the transient
        assert!(rms(&hum[22050..]) < 0.05);

        filter.reset();
        let mut voice = sine(300.0, 44100);
        filter.process_block(&mut voice);
        assert!(rms(&voice[22050..]) > 0.5);
    }

    #[test]
    fn test_set_enabled_builds_chain_once() {
        let mut filter = NoiseFilter::new(
            SR,
            NoiseFilterConfig {
                use_filters: false,
                ..NoiseFilterConfig::default()
            },
        );
        filter.set_enabled(true);
        assert!(filter.status().has_filters);
        assert!(filter.frequency_response(60.0).magnitude < 0.05);

        filter.set_enabled(false);
        assert!(filter.status().has_filters);
        assert_eq!(filter.frequency_response(60.0).magnitude, 1.0);
    }

    #[test]
    fn test_update_frequencies_moves_cutoff() {
        let mut filter = NoiseFilter::new(SR, NoiseFilterConfig::default());
        assert!(filter.frequency_response(1500.0).magnitude < 0.5);

        filter.update_frequencies(FilterUpdate {
            lowpass_freq: Some(4000.0),
            ..FilterUpdate::default()
        });
        assert_eq!(filter.config().lowpass_freq, 4000.0);
        assert!(filter.frequency_response(1500.0).magnitude > 0.8);
    }

    #[test]
    fn test_config_is_clamped() {
        let config = NoiseFilterConfig {
            highpass_freq: 1.0,
            lowpass_freq: 40000.0,
            notch_q: 500.0,
            ..NoiseFilterConfig::default()
        }
        .clamped(SR);
        assert_eq!(config.highpass_freq, MIN_FILTER_FREQ);
        assert!(config.lowpass_freq < SR / 2.0);
        assert_eq!(config.notch_q, MAX_Q);
    }

    #[test]
    fn test_presets() {
        assert_eq!(NoiseFilterPreset::Voice.config(), NoiseFilterConfig::default());
        let wide = NoiseFilterPreset::Wide.config();
        assert_eq!((wide.highpass_freq, wide.lowpass_freq), (20.0, 5000.0));
        let minimal = NoiseFilterPreset::Minimal.config();
        assert_eq!(minimal.notch_q, 3.0);
    }
}
