use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

pub const DEFAULT_FFT_SIZE: usize = 2048;
const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;

/// Mono spectrum read-out over the most recent `fft_size` samples.
pub struct Analyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    ring: Vec<f32>,
    write: usize,
    smoothed: Vec<f32>,
}

impl Analyser {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();
        Self {
            fft,
            window,
            ring: vec![0.0; fft_size],
            write: 0,
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.ring.len()
    }

    pub fn push(&mut self, sample: f32) {
        self.ring[self.write] = sample;
        self.write = (self.write + 1) % self.ring.len();
    }

    /// Smoothed magnitude per bin in dBFS (`fft_size / 2` bins).
    pub fn spectrum(&mut self) -> Vec<f32> {
        let n = self.ring.len();
        let mut buffer: Vec<Complex<f32>> = (0..n)
            .map(|i| {
                let sample = self.ring[(self.write + i) % n];
                Complex::new(sample * self.window[i], 0.0)
            })
            .collect();
        self.fft.process(&mut buffer);

        let scale = 1.0 / n as f32;
        self.smoothed
            .iter_mut()
            .zip(buffer.iter())
            .map(|(prev, bin)| {
                let mag = bin.norm() * scale;
                *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * mag;
                (20.0 * prev.max(1e-12).log10()).max(MIN_DB)
            })
            .collect()
    }

    pub fn bin_hz(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.ring.len() as f32
    }

    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.smoothed.fill(0.0);
        self.write = 0;
    }
}
