// Analysis module - numerical pitch pipeline
//
// Leaf to root:
// - fft: fixed-size power-of-two FFT with a real-input fast path
// - autocorrelation: Wiener-Khinchin autocorrelation on reusable buffers
// - mpm: McLeod Pitch Method (NSDF, key maxima, parabolic refinement)
// - harmonic: octave-error correction over a short history
// - note: frequency to note/octave/cents
//
// Everything here is synchronous and allocation-free per frame once built.

pub mod autocorrelation;
pub mod fft;
pub mod harmonic;
pub mod mpm;
pub mod note;

pub use autocorrelation::Autocorrelator;
pub use fft::FftPlan;
pub use harmonic::{Correction, FrequencyHistoryEntry, HarmonicConfig, HarmonicCorrector};
pub use mpm::{KeyMaximum, PitchDetector, PitchEstimate};
pub use note::{frequency_to_note, NoteInfo, NO_NOTE};
