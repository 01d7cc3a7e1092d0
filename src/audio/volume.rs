//! Input loudness for the visualizer.
//!
//! Mirrors a browser analyser node: Blackman-windowed FFT over the latest
//! window of samples, magnitudes mapped from [-100dB, -30dB] onto 0..=255,
//! then averaged across bins. No smoothing between calls.

use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Samples per analysis window
pub const FFT_SIZE: usize = 256;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

pub struct VolumeAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<Complex32>,
}

impl VolumeAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(FFT_SIZE),
            window: blackman_window(FFT_SIZE),
            buf: vec![Complex32::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Number of frequency bins averaged per call
    pub fn bin_count(&self) -> usize {
        FFT_SIZE / 2
    }

    /// Mean byte-scaled bin magnitude of the most recent window, in [0, 255].
    pub fn analyze(&mut self, samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        // Most recent FFT_SIZE samples, zero-padded at the front if short
        let tail = &samples[samples.len().saturating_sub(FFT_SIZE)..];
        let offset = FFT_SIZE - tail.len();
        for c in self.buf.iter_mut().take(offset) {
            *c = Complex32::new(0.0, 0.0);
        }
        for (i, &s) in tail.iter().enumerate() {
            let s = if s.is_finite() { s } else { 0.0 };
            self.buf[offset + i] = Complex32::new(s * self.window[offset + i], 0.0);
        }

        self.fft.process(&mut self.buf);

        let bins = self.bin_count();
        let total: u32 = self
            .buf
            .iter()
            .take(bins)
            .map(|c| byte_magnitude(c.norm() / FFT_SIZE as f32) as u32)
            .sum();

        total as f32 / bins as f32
    }
}

impl Default for VolumeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn byte_magnitude(magnitude: f32) -> u8 {
    let db = 20.0 * magnitude.max(1e-12).log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    // NaN saturates to 0
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman_window(n: usize) -> Vec<f32> {
    let alpha = 0.16f32;
    let a0 = 0.5 * (1.0 - alpha);
    let a1 = 0.5;
    let a2 = 0.5 * alpha;
    let denom = n as f32;
    (0..n)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / denom;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos()
        })
        .collect()
}
