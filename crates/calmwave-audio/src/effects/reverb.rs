//! Convolution reverb: impulse responses and a uniformly partitioned convolver.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::native::decode::SourceReader;
use crate::native::resample::resample_all;

/// Length of the synthesized fallback impulse.
pub const FALLBACK_IMPULSE_SECS: f32 = 2.0;
/// Longest impulse kept from a decoded sample.
pub const MAX_IMPULSE_SECS: f32 = 6.0;
/// Decay time constant so the fallback tail reaches about -60 dB at its end.
const DECAY_RATE: f32 = 6.9 / FALLBACK_IMPULSE_SECS;

const BLOCK: usize = 256;

/// Planar impulse response.
#[derive(Clone, Debug, PartialEq)]
pub struct Impulse {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl Impulse {
    /// Exponentially decaying noise with independent noise per channel.
    pub fn synthesize(sample_rate: u32, channels: usize, seconds: f32, seed: u64) -> Self {
        let len = ((sample_rate as f32 * seconds) as usize).max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let channels = (0..channels.max(1))
            .map(|_| {
                (0..len)
                    .map(|i| {
                        let t = i as f32 / sample_rate as f32;
                        rng.gen_range(-1.0f32..1.0) * (-DECAY_RATE * t).exp()
                    })
                    .collect()
            })
            .collect();
        Self {
            sample_rate,
            channels,
        }
    }

    /// Decode an encoded sample (wav/flac/mp3/...) into an impulse.
    pub fn decode(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self> {
        let reader = SourceReader::from_bytes(bytes, extension, None)?;
        let sample_rate = reader.sample_rate();
        let channels = reader.channels();
        let max_frames = (sample_rate as f32 * MAX_IMPULSE_SECS) as usize;
        let interleaved = reader.read_all(Some(max_frames))?;
        if interleaved.is_empty() {
            bail!("impulse response is empty");
        }
        Ok(Self {
            sample_rate,
            channels: deinterleave(&interleaved, channels),
        })
    }

    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to `sample_rate`.
    pub fn resampled(self, sample_rate: u32) -> Result<Self> {
        if self.sample_rate == sample_rate {
            return Ok(self);
        }
        let channels = self.channels.len();
        let interleaved = interleave(&self.channels);
        let out = resample_all(&interleaved, channels, self.sample_rate, sample_rate)?;
        Ok(Self {
            sample_rate,
            channels: deinterleave(&out, channels),
        })
    }

    /// Scale to unit energy per channel so the wet level does not depend on the sample.
    pub fn normalized(mut self) -> Self {
        let count = self.channels.len().max(1) as f32;
        let energy: f32 = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|s| s * s)
            .sum::<f32>()
            / count;
        if energy > 0.0 {
            let scale = 1.0 / energy.sqrt();
            for channel in &mut self.channels {
                for s in channel.iter_mut() {
                    *s *= scale;
                }
            }
        }
        self
    }
}

fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let channels = channels.max(1);
    let mut out = vec![Vec::with_capacity(interleaved.len() / channels); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (c, s) in frame.iter().enumerate() {
            out[c].push(*s);
        }
    }
    out
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map(Vec::len).unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel.get(i).copied().unwrap_or(0.0));
        }
    }
    out
}

/// Overlap-save convolver with a frequency-domain delay line.
///
/// Adds `BLOCK` samples of latency.
pub struct Convolver {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    partitions: Vec<Vec<Complex<f32>>>,
    delay_line: VecDeque<Vec<Complex<f32>>>,
    previous: Vec<f32>,
    input: Vec<f32>,
    output: VecDeque<f32>,
    buffer: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    pub fn new(impulse: &[f32]) -> Self {
        let size = BLOCK * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        let partitions: Vec<Vec<Complex<f32>>> = impulse
            .chunks(BLOCK)
            .map(|segment| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); size];
                for (slot, s) in spectrum.iter_mut().zip(segment) {
                    *slot = Complex::new(*s, 0.0);
                }
                fft.process_with_scratch(&mut spectrum, &mut scratch);
                spectrum
            })
            .collect();
        let delay_line = (0..partitions.len().max(1))
            .map(|_| vec![Complex::new(0.0, 0.0); size])
            .collect();

        Self {
            fft,
            ifft,
            partitions,
            delay_line,
            previous: vec![0.0; BLOCK],
            input: Vec::with_capacity(BLOCK),
            output: std::iter::repeat_n(0.0, BLOCK).collect(),
            buffer: vec![Complex::new(0.0, 0.0); size],
            accum: vec![Complex::new(0.0, 0.0); size],
            scratch,
        }
    }

    pub fn process_sample(&mut self, x: f32) -> f32 {
        self.input.push(x);
        if self.input.len() == BLOCK {
            self.process_block();
        }
        self.output.pop_front().unwrap_or(0.0)
    }

    fn process_block(&mut self) {
        let size = BLOCK * 2;
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let s = if i < BLOCK {
                self.previous[i]
            } else {
                self.input[i - BLOCK]
            };
            *slot = Complex::new(s, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        if let Some(mut oldest) = self.delay_line.pop_back() {
            oldest.copy_from_slice(&self.buffer);
            self.delay_line.push_front(oldest);
        }

        self.accum.fill(Complex::new(0.0, 0.0));
        for (spectrum, partition) in self.delay_line.iter().zip(self.partitions.iter()) {
            for ((acc, x), h) in self.accum.iter_mut().zip(spectrum).zip(partition) {
                *acc += x * h;
            }
        }
        self.ifft.process_with_scratch(&mut self.accum, &mut self.scratch);

        let scale = 1.0 / size as f32;
        self.output
            .extend(self.accum[BLOCK..].iter().map(|c| c.re * scale));
        self.previous.copy_from_slice(&self.input);
        self.input.clear();
    }

    pub fn reset(&mut self) {
        for spectrum in &mut self.delay_line {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.previous.fill(0.0);
        self.input.clear();
        self.output.clear();
        self.output.extend(std::iter::repeat_n(0.0, BLOCK));
    }
}

/// Latency added by [`Convolver`], in samples.
pub const CONVOLVER_LATENCY: usize = BLOCK;
