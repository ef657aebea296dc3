//! FFT spectrum analysis using RustFFT.
//!
//! Turns a window of recent samples into one row of magnitudes for the
//! scrolling spectrogram.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Spectrum analyzer for audio data.
///
/// The FFT plan, window and scratch buffers are created once, so
/// [`SpectrumAnalyzer::analyze_into`] does not allocate.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create a new spectrum analyzer with the given FFT size.
    ///
    /// Larger sizes give better frequency resolution but worse time resolution.
    /// Returns `None` unless `fft_size` is a power of two.
    pub fn new(fft_size: usize) -> Option<Self> {
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return None;
        }

        // Hann window to reduce spectral leakage
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let t = i as f32 / (fft_size - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
            })
            .collect();

        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Some(Self {
            fft,
            fft_size,
            window,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
        })
    }

    /// FFT size being used.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of frequency bins in the output (FFT size / 2).
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2
    }

    /// Compute the magnitude spectrum of `samples` into `out`.
    ///
    /// The most recent `fft_size` samples are used; shorter input is
    /// zero-padded at the front. `out` receives up to `num_bins()` values
    /// from DC towards Nyquist.
    pub fn analyze_into(&mut self, samples: &[f32], out: &mut [f32]) {
        let take = samples.len().min(self.fft_size);
        let lead = self.fft_size - take;
        let recent = &samples[samples.len() - take..];

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let s = if i < lead { 0.0 } else { recent[i - lead] };
            *slot = Complex::new(s * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let norm = (self.fft_size as f32).sqrt();
        for (dst, c) in out.iter_mut().zip(&self.buffer[..self.num_bins()]) {
            *dst = c.norm() / norm;
        }
    }
}
