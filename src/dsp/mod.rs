//! Digital signal processing primitives of the renderer.
//!
//! # Overview
//!
//! Filtering happens in the frequency domain: a blended impulse response is turned
//! into a [`TransferFunction`] once per rendered block, and the convolution engine
//! multiplies the input spectrum with it. All FFT plans and scratch buffers are
//! created up front so none of this allocates while audio is running.

pub mod convolution;

use crate::FFT_LEN;
use rustfft::{num_complex::Complex, num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Frequency-domain representation of a single-ear impulse response, [`FFT_LEN`]
/// complex bins.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    bins: Vec<Complex<f32>>,
}

impl TransferFunction {
    /// An all-zero filter. Convolving anything with it produces silence.
    pub fn silence() -> Self {
        Self {
            bins: vec![Complex::zero(); FFT_LEN],
        }
    }

    /// Returns the complex bins of the filter.
    pub fn bins(&self) -> &[Complex<f32>] {
        &self.bins
    }
}

/// A pair of transfer functions, one per ear.
#[derive(Debug, Clone, PartialEq)]
pub struct Hrtf {
    /// Filter of the left ear.
    pub left: TransferFunction,
    /// Filter of the right ear.
    pub right: TransferFunction,
}

impl Hrtf {
    /// An all-zero filter pair.
    pub fn silence() -> Self {
        Self {
            left: TransferFunction::silence(),
            right: TransferFunction::silence(),
        }
    }
}

/// Converts impulse responses into transfer functions. Owns the forward FFT plan and
/// its scratch memory.
pub struct SpectrumTransform {
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumTransform {
    /// Creates the transform and plans the FFT.
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_LEN);
        let scratch = vec![Complex::zero(); fft.get_inplace_scratch_len()];
        Self { fft, scratch }
    }

    /// Fills `output` with the spectrum of `impulse`, zero-padded to [`FFT_LEN`].
    /// The impulse must not be longer than [`FFT_LEN`].
    pub fn transform(&mut self, impulse: &[f32], output: &mut TransferFunction) {
        debug_assert!(impulse.len() <= FFT_LEN);
        for (bin, sample) in output
            .bins
            .iter_mut()
            .zip(impulse.iter().copied().chain(std::iter::repeat(0.0)))
        {
            *bin = Complex::new(sample, 0.0);
        }
        self.fft.process_with_scratch(&mut output.bins, &mut self.scratch);
    }
}

impl Default for SpectrumTransform {
    fn default() -> Self {
        Self::new()
    }
}

/// Linearly fades from `from` to `to` over the length of `output`. The fade starts
/// exactly at `from` and stops one step short of `to`, so a chain of fades over
/// consecutive blocks is seamless.
pub fn crossfade(from: &[f32], to: &[f32], output: &mut [f32]) {
    let step = 1.0 / output.len() as f32;
    let mut t = 0.0;
    for ((output, from), to) in output.iter_mut().zip(from).zip(to) {
        *output = *from * (1.0 - t) + *to * t;
        t += step;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::HRIR_LEN;

    #[test]
    fn test_unit_impulse_spectrum_is_flat() {
        let mut impulse = vec![0.0; HRIR_LEN];
        impulse[0] = 1.0;

        let mut transform = SpectrumTransform::new();
        let mut output = TransferFunction::silence();
        transform.transform(&impulse, &mut output);

        for bin in output.bins() {
            assert!((bin.re - 1.0).abs() < 1e-4);
            assert!(bin.im.abs() < 1e-4);
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut transform = SpectrumTransform::new();
        let mut output = TransferFunction::silence();
        transform.transform(&[0.0; HRIR_LEN], &mut output);
        assert_eq!(output, TransferFunction::silence());
    }

    #[test]
    fn test_crossfade_endpoints() {
        let from = vec![1.0; 8];
        let to = vec![0.0; 8];
        let mut output = vec![0.0; 8];
        crossfade(&from, &to, &mut output);

        assert_eq!(output[0], 1.0);
        for window in output.windows(2) {
            assert!(window[1] < window[0]);
        }
        assert!((output[7] - 1.0 / 8.0).abs() < 1e-6);
    }
}
