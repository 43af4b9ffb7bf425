// Autocorrelator - FFT-based autocorrelation (Wiener-Khinchin)
//
// r[tau] = sum_j x[j] * x[j + tau], computed as IFFT(|FFT(x)|^2) on a
// zero-padded copy of the input. Padding to at least 2L removes the
// circular wrap-around, so the first L outputs equal the linear result.

use rustfft::num_complex::Complex64;

use crate::analysis::fft::FftPlan;
use crate::error::PitchDetectionError;

/// Computes the autocorrelation of fixed-length real windows.
///
/// All scratch buffers are allocated in [`Autocorrelator::new`]; calls to
/// [`autocorrelate`](Autocorrelator::autocorrelate) do not allocate.
pub struct Autocorrelator {
    input_len: usize,
    plan: FftPlan,
    padded_input: Vec<f64>,
    transform: Vec<Complex64>,
    inverse: Vec<Complex64>,
}

impl Autocorrelator {
    /// Create an autocorrelator for windows of `input_len` samples.
    pub fn new(input_len: usize) -> Result<Self, PitchDetectionError> {
        if input_len == 0 {
            return Err(PitchDetectionError::InvalidInputLength {
                expected: 1,
                actual: 0,
            });
        }

        let fft_size = (2 * input_len).next_power_of_two();
        let plan = FftPlan::new(fft_size)?;

        Ok(Self {
            input_len,
            plan,
            padded_input: vec![0.0; fft_size],
            transform: vec![Complex64::new(0.0, 0.0); fft_size],
            inverse: vec![Complex64::new(0.0, 0.0); fft_size],
        })
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    pub fn fft_size(&self) -> usize {
        self.plan.size()
    }

    /// Autocorrelate `input` into `output`. Both must have `input_len` samples.
    pub fn autocorrelate(
        &mut self,
        input: &[f32],
        output: &mut [f64],
    ) -> Result<(), PitchDetectionError> {
        if input.len() != self.input_len {
            return Err(PitchDetectionError::InvalidInputLength {
                expected: self.input_len,
                actual: input.len(),
            });
        }
        if output.len() != self.input_len {
            return Err(PitchDetectionError::InvalidInputLength {
                expected: self.input_len,
                actual: output.len(),
            });
        }

        for (slot, &sample) in self.padded_input.iter_mut().zip(input.iter()) {
            *slot = f64::from(sample);
        }
        for slot in self.padded_input[self.input_len..].iter_mut() {
            *slot = 0.0;
        }

        self.plan
            .real_transform(&mut self.transform, &self.padded_input)?;
        self.plan.complete_spectrum(&mut self.transform)?;

        // Power spectrum
        for bin in self.transform.iter_mut() {
            *bin = Complex64::new(bin.norm_sqr(), 0.0);
        }

        self.plan
            .inverse_transform(&mut self.inverse, &self.transform)?;

        for (out, value) in output.iter_mut().zip(self.inverse.iter()) {
            *out = value.re;
        }
        Ok(())
    }
}
