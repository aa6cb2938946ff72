//! FFT convolution of an input window with one or two filter pairs.

use super::{Hrtf, TransferFunction};
use crate::{FFT_LEN, HRIR_LEN};
use rustfft::{num_complex::Complex, num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Convolution engine with all of its buffers allocated up front.
///
/// The engine takes a sliding input window of [`FFT_LEN`] samples, transforms it once
/// and multiplies the spectrum with any number of filters. Only the newest samples of
/// each inverse transform are handed back: the window is twice as long as an impulse
/// response, so that tail is a proper linear convolution with no circular wrap in it.
pub struct ConvolutionEngine {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
    work: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl ConvolutionEngine {
    /// Creates the engine and plans both FFTs.
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(FFT_LEN);
        let inverse = planner.plan_fft_inverse(FFT_LEN);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Self {
            forward,
            inverse,
            spectrum: vec![Complex::zero(); FFT_LEN],
            work: vec![Complex::zero(); FFT_LEN],
            scratch: vec![Complex::zero(); scratch_len],
        }
    }

    fn prepare_input(&mut self, window: &[f32]) {
        debug_assert_eq!(window.len(), FFT_LEN);
        for (bin, &sample) in self.spectrum.iter_mut().zip(window) {
            *bin = Complex::new(sample, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);
    }

    fn apply(&mut self, filter: &TransferFunction, output: &mut [f32]) {
        debug_assert!(output.len() <= FFT_LEN - HRIR_LEN + 1);
        for ((work, &spectrum), &bin) in self
            .work
            .iter_mut()
            .zip(self.spectrum.iter())
            .zip(filter.bins())
        {
            *work = spectrum * bin;
        }
        self.inverse
            .process_with_scratch(&mut self.work, &mut self.scratch);

        let scale = 1.0 / FFT_LEN as f32;
        let tail = FFT_LEN - output.len();
        for (output, work) in output.iter_mut().zip(self.work[tail..].iter()) {
            *output = work.re * scale;
        }
    }

    /// Convolves the window with a filter pair. The outputs receive the newest
    /// `output.len()` samples of the result, the window must be [`FFT_LEN`] samples.
    pub fn convolve(&mut self, window: &[f32], hrtf: &Hrtf, left: &mut [f32], right: &mut [f32]) {
        self.prepare_input(window);
        self.apply(&hrtf.left, left);
        self.apply(&hrtf.right, right);
    }

    /// Convolves the same window with two filter pairs at once, reusing one input
    /// transform. The caller crossfades between the two results to splice a filter
    /// change without a click.
    #[allow(clippy::too_many_arguments)]
    pub fn convolve_crossfaded(
        &mut self,
        window: &[f32],
        old: &Hrtf,
        new: &Hrtf,
        old_left: &mut [f32],
        old_right: &mut [f32],
        new_left: &mut [f32],
        new_right: &mut [f32],
    ) {
        self.prepare_input(window);
        self.apply(&old.left, old_left);
        self.apply(&old.right, old_right);
        self.apply(&new.left, new_left);
        self.apply(&new.right, new_right);
    }
}

impl Default for ConvolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}
