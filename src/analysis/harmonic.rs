// HarmonicCorrector - octave-error correction over a short history window
//
// MPM occasionally locks onto the 2nd harmonic (one octave high) or a
// subharmonic (one octave low). When the recent history is confident and
// f/2 or f*2 lands near its average frequency, the output is corrected.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// One point in the correction history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyHistoryEntry {
    pub frequency: f32,
    pub confidence: f32,
    pub timestamp: Instant,
}

/// Correction tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonicConfig {
    /// Entries older than this are pruned on every insert
    pub history_window_ms: u64,
    /// Relative distance between f/2 (or f*2) and the history average
    pub frequency_threshold: f32,
    /// Average history confidence required before correcting
    pub confidence_threshold: f32,
    /// Number of preceding entries averaged
    pub average_span: usize,
    /// Minimum history length (including the new sample)
    pub min_history: usize,
}

impl Default for HarmonicConfig {
    fn default() -> Self {
        Self {
            history_window_ms: 1000,
            frequency_threshold: 0.1,
            confidence_threshold: 0.7,
            average_span: 5,
            min_history: 3,
        }
    }
}

/// What `correct` did to the input frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    None,
    OctaveDown,
    OctaveUp,
}

pub struct HarmonicCorrector {
    config: HarmonicConfig,
    history: VecDeque<FrequencyHistoryEntry>,
    previous_frequency: Option<f32>,
    last_correction: Correction,
}

impl HarmonicCorrector {
    pub fn new(config: HarmonicConfig) -> Self {
        Self {
            config,
            history: VecDeque::with_capacity(64),
            previous_frequency: None,
            last_correction: Correction::None,
        }
    }

    pub fn config(&self) -> &HarmonicConfig {
        &self.config
    }

    pub fn history(&self) -> impl Iterator<Item = &FrequencyHistoryEntry> {
        self.history.iter()
    }

    pub fn last_correction(&self) -> Correction {
        self.last_correction
    }

    /// Correct `frequency` using `weight` (0..=1, usually the normalized volume)
    /// and the history collected so far.
    pub fn correct(&mut self, frequency: f32, weight: f32, now: Instant) -> f32 {
        let window = Duration::from_millis(self.config.history_window_ms);
        while let Some(front) = self.history.front() {
            if now.saturating_duration_since(front.timestamp) >= window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let stability = match self.previous_frequency {
            Some(previous) if previous > 0.0 => {
                (1.0 - (frequency - previous).abs() / previous).max(0.0)
            }
            _ => 1.0,
        };
        let confidence = 0.5 * (1.5 * weight.max(0.0)).min(1.0) + 0.5 * stability;

        // Average over the entries preceding this sample
        let preceding = self.history.len();
        let span = preceding.min(self.config.average_span);
        let averages = if preceding + 1 >= self.config.min_history && span > 0 {
            let recent = self.history.iter().skip(preceding - span);
            let (freq_sum, conf_sum) = recent.fold((0.0f32, 0.0f32), |(f, c), entry| {
                (f + entry.frequency, c + entry.confidence)
            });
            Some((freq_sum / span as f32, conf_sum / span as f32))
        } else {
            None
        };

        self.history.push_back(FrequencyHistoryEntry {
            frequency,
            confidence,
            timestamp: now,
        });

        let (output, correction) = match averages {
            Some((avg_frequency, avg_confidence))
                if avg_frequency > 0.0 && avg_confidence > self.config.confidence_threshold =>
            {
                let near = |candidate: f32| {
                    (candidate - avg_frequency).abs() / avg_frequency
                        < self.config.frequency_threshold
                };
                if near(frequency / 2.0) {
                    (frequency / 2.0, Correction::OctaveDown)
                } else if near(frequency * 2.0) {
                    (frequency * 2.0, Correction::OctaveUp)
                } else {
                    (frequency, Correction::None)
                }
            }
            _ => (frequency, Correction::None),
        };

        if correction != Correction::None {
            log::debug!(
                "[HarmonicCorrector] Octave correction {:?}: {:.1}Hz -> {:.1}Hz",
                correction,
                frequency,
                output
            );
        }

        self.previous_frequency = Some(output);
        self.last_correction = correction;
        output
    }

    /// Drop all history and the previous frequency.
    pub fn reset(&mut self) {
        self.history.clear();
        self.previous_frequency = None;
        self.last_correction = Correction::None;
    }
}

impl Default for HarmonicCorrector {
    fn default() -> Self {
        Self::new(HarmonicConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady_history(corrector: &mut HarmonicCorrector, start: Instant, frequency: f32) -> Instant {
        let mut now = start;
        for _ in 0..5 {
            let out = corrector.correct(frequency, 1.0, now);
            assert_eq!(out, frequency);
            now += Duration::from_millis(20);
        }
        now
    }

    #[test]
    fn test_subharmonic_is_doubled() {
        let mut corrector = HarmonicCorrector::default();
        let now = steady_history(&mut corrector, Instant::now(), 220.0);

        let out = corrector.correct(110.0, 1.0, now);
        assert!((out - 220.0).abs() < 1.0, "got {}", out);
        assert_eq!(corrector.last_correction(), Correction::OctaveUp);
    }

    #[test]
    fn test_second_harmonic_is_halved() {
        let mut corrector = HarmonicCorrector::default();
        let now = steady_history(&mut corrector, Instant::now(), 220.0);

        let out = corrector.correct(440.0, 1.0, now);
        assert!((out - 220.0).abs() < 1.0, "got {}", out);
        assert_eq!(corrector.last_correction(), Correction::OctaveDown);
    }

    #[test]
    fn test_small_movement_passes_through() {
        let mut corrector = HarmonicCorrector::default();
        let now = steady_history(&mut corrector, Instant::now(), 220.0);
        assert_eq!(corrector.correct(233.0, 1.0, now), 233.0);
    }

    #[test]
    fn test_needs_enough_history() {
        let mut corrector = HarmonicCorrector::default();
        let start = Instant::now();
        corrector.correct(220.0, 1.0, start);
        // Only two entries including this one
        assert_eq!(corrector.correct(440.0, 1.0, start), 440.0);
    }

    #[test]
    fn test_low_confidence_history_is_not_trusted() {
        let mut corrector = HarmonicCorrector::default();
        let mut now = Instant::now();
        for _ in 0..5 {
            corrector.correct(220.0, 0.0, now);
            now += Duration::from_millis(20);
        }
        // Confidence of each entry is 0.5 * 0 + 0.5 * 1 = 0.5
        assert_eq!(corrector.correct(440.0, 1.0, now), 440.0);
    }

    #[test]
    fn test_stale_entries_are_pruned() {
        let mut corrector = HarmonicCorrector::default();
        let start = Instant::now();
        steady_history(&mut corrector, start, 220.0);
        assert_eq!(corrector.history().count(), 5);

        let later = start + Duration::from_secs(5);
        assert_eq!(corrector.correct(440.0, 1.0, later), 440.0);
        assert_eq!(corrector.history().count(), 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut corrector = HarmonicCorrector::default();
        let now = steady_history(&mut corrector, Instant::now(), 220.0);
        corrector.reset();
        assert_eq!(corrector.history().count(), 0);
        assert_eq!(corrector.correct(440.0, 1.0, now), 440.0);
    }
}
