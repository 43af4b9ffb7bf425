// FFT module - fixed-size power-of-two Fast Fourier Transform
//
// Iterative decimation-in-time FFT. Inputs are permuted with a precomputed
// bit-reversal table, then processed with fused radix-4 butterflies (two
// radix-2 stages at a time). When log2(size) is odd a single radix-2 stage
// runs first. Twiddle factors are computed once per plan.
//
// Real input takes a fast path: the signal is packed into a half-size complex
// FFT and the positive-frequency half of the spectrum is reconstructed from it.

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

use crate::error::PitchDetectionError;

/// Precomputed tables for one FFT size. Immutable once built.
#[derive(Debug, Clone)]
pub struct FftPlan {
    size: usize,
    /// W_N^j = e^(-2*pi*i*j/N) for j in 0..N
    twiddles: Vec<Complex64>,
    bitrev: Vec<usize>,
    /// Plan for size / 2, used by the real-input fast path
    half: Option<Box<FftPlan>>,
}

impl FftPlan {
    /// Build a plan for `size` points.
    ///
    /// # Errors
    /// `InvalidFftSize` unless `size` is a power of two greater than 1.
    pub fn new(size: usize) -> Result<Self, PitchDetectionError> {
        if size <= 1 || !size.is_power_of_two() {
            return Err(PitchDetectionError::InvalidFftSize { size });
        }

        let twiddles = (0..size)
            .map(|j| {
                let angle = -2.0 * PI * (j as f64) / (size as f64);
                Complex64::new(angle.cos(), angle.sin())
            })
            .collect();

        let bits = size.trailing_zeros();
        let bitrev = (0..size)
            .map(|i| i.reverse_bits() >> (usize::BITS - bits))
            .collect();

        let half = if size > 2 {
            Some(Box::new(FftPlan::new(size / 2)?))
        } else {
            None
        };

        Ok(Self {
            size,
            twiddles,
            bitrev,
            half,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward complex FFT of `input` into `output`. Both must hold `size` values.
    pub fn transform(
        &self,
        output: &mut [Complex64],
        input: &[Complex64],
    ) -> Result<(), PitchDetectionError> {
        self.check_len(input.len())?;
        self.check_len(output.len())?;
        self.permute(output, input);
        self.butterflies(output, false);
        Ok(())
    }

    /// Inverse complex FFT, scaled by 1/N so that it undoes `transform`.
    pub fn inverse_transform(
        &self,
        output: &mut [Complex64],
        input: &[Complex64],
    ) -> Result<(), PitchDetectionError> {
        self.check_len(input.len())?;
        self.check_len(output.len())?;
        self.permute(output, input);
        self.butterflies(output, true);

        let scale = 1.0 / self.size as f64;
        for value in output.iter_mut() {
            *value *= scale;
        }
        Ok(())
    }

    /// FFT of a real signal.
    ///
    /// Writes bins 0..=N/2 of `output`; the upper half is left for
    /// [`complete_spectrum`](Self::complete_spectrum) to fill.
    pub fn real_transform(
        &self,
        output: &mut [Complex64],
        input: &[f64],
    ) -> Result<(), PitchDetectionError> {
        self.check_len(input.len())?;
        self.check_len(output.len())?;

        let half_plan = match &self.half {
            Some(plan) => plan,
            None => {
                // size == 2
                output[0] = Complex64::new(input[0] + input[1], 0.0);
                output[1] = Complex64::new(input[0] - input[1], 0.0);
                return Ok(());
            }
        };

        let half = self.size / 2;

        // Pack x[2n] + i*x[2n+1] into the first half, already bit-reversed
        for (slot, &source) in output[..half].iter_mut().zip(half_plan.bitrev.iter()) {
            *slot = Complex64::new(input[2 * source], input[2 * source + 1]);
        }
        half_plan.butterflies(&mut output[..half], false);

        // Split the packed spectrum Z into even/odd parts:
        //   E[k] = (Z[k] + conj(Z[h-k])) / 2
        //   O[k] = (Z[k] - conj(Z[h-k])) / 2i
        //   X[k] = E[k] + W_N^k * O[k]
        // Bins k and h-k are computed together so the update can be done in place.
        let minus_half_i = Complex64::new(0.0, -0.5);
        for k in 0..=half / 2 {
            let m = half - k;
            let zk = output[k];
            let zm = if m == half { output[0] } else { output[m] };

            let xk = (zk + zm.conj()) * 0.5 + self.twiddles[k] * (zk - zm.conj()) * minus_half_i;
            let xm = (zm + zk.conj()) * 0.5 + self.twiddles[m] * (zm - zk.conj()) * minus_half_i;

            output[k] = xk;
            output[m] = xm;
        }

        Ok(())
    }

    /// Fill bins N/2+1..N of a real-input spectrum using X[N-k] = conj(X[k]).
    pub fn complete_spectrum(&self, spectrum: &mut [Complex64]) -> Result<(), PitchDetectionError> {
        self.check_len(spectrum.len())?;
        let n = self.size;
        for k in 1..n / 2 {
            spectrum[n - k] = spectrum[k].conj();
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<(), PitchDetectionError> {
        if len != self.size {
            return Err(PitchDetectionError::InvalidInputLength {
                expected: self.size,
                actual: len,
            });
        }
        Ok(())
    }

    fn permute(&self, output: &mut [Complex64], input: &[Complex64]) {
        for (slot, &source) in output.iter_mut().zip(self.bitrev.iter()) {
            *slot = input[source];
        }
    }

    #[inline]
    fn twiddle(&self, index: usize, inverse: bool) -> Complex64 {
        let w = self.twiddles[index];
        if inverse {
            w.conj()
        } else {
            w
        }
    }

    /// In-place butterflies over bit-reversed data.
    fn butterflies(&self, data: &mut [Complex64], inverse: bool) {
        let n = self.size;
        let mut quarter = 1;

        if n.trailing_zeros() % 2 == 1 {
            for pair in data.chunks_exact_mut(2) {
                let (a, b) = (pair[0], pair[1]);
                pair[0] = a + b;
                pair[1] = a - b;
            }
            quarter = 2;
        }

        while quarter * 4 <= n {
            let block = quarter * 4;
            let stride = n / block;

            for start in (0..n).step_by(block) {
                for k in 0..quarter {
                    let w1 = self.twiddle(k * stride, inverse);
                    let w2 = self.twiddle(2 * k * stride, inverse);
                    let w3 = self.twiddle(3 * k * stride, inverse);

                    let i0 = start + k;
                    let i1 = i0 + quarter;
                    let i2 = i1 + quarter;
                    let i3 = i2 + quarter;

                    let a0 = data[i0];
                    let t1 = data[i1] * w2;
                    let t2 = data[i2] * w1;
                    let t3 = data[i3] * w3;

                    let b0 = a0 + t1;
                    let b1 = a0 - t1;
                    let sum = t2 + t3;
                    let diff = t2 - t3;
                    // diff * -i (forward) or diff * i (inverse)
                    let rotated = if inverse {
                        Complex64::new(-diff.im, diff.re)
                    } else {
                        Complex64::new(diff.im, -diff.re)
                    };

                    data[i0] = b0 + sum;
                    data[i2] = b0 - sum;
                    data[i1] = b1 + rotated;
                    data[i3] = b1 - rotated;
                }
            }

            quarter = block;
        }
    }
}
