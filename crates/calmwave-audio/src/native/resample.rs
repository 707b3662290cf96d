//! Rubato resample stage.
//!
//! Converts decoded interleaved `f32` audio from the source rate to the device
//! rate in fixed input chunks; the trailing partial chunk is flushed at end of stream.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct ChunkResampler {
    inner: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
}

impl ChunkResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let chunk_frames = chunk_frames.max(1);
        let inner = Async::<f32>::new_sinc(
            to_rate as f64 / from_rate as f64,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;
        let scratch = vec![0.0f32; channels * inner.output_frames_max()];
        Ok(Self {
            inner: Box::new(inner),
            channels,
            chunk_frames,
            pending: Vec::with_capacity(channels * chunk_frames * 2),
            scratch,
        })
    }

    /// Queue `input` and append every completed output chunk to `out`.
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let chunk = self.pending[consumed..consumed + chunk_samples].to_vec();
            self.process(&chunk, self.chunk_frames, None, out)?;
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Resample whatever is still queued. Call once at end of stream.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames == 0 {
            return Ok(());
        }
        let tail = std::mem::take(&mut self.pending);
        self.process(&tail[..tail_frames * self.channels], tail_frames, Some(tail_frames), out)
    }

    fn process(
        &mut self,
        input: &[f32],
        frames: usize,
        partial_len: Option<usize>,
        out: &mut Vec<f32>,
    ) -> Result<()> {
        let input_adapter = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
        let out_capacity_frames = self.scratch.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, self.channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };
        let (_nbr_in, nbr_out) = self
            .inner
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;
        out.extend_from_slice(&self.scratch[..nbr_out * self.channels]);
        Ok(())
    }
}

/// Resample a whole interleaved buffer in one go.
pub fn resample_all(input: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }
    let mut resampler = ChunkResampler::new(from_rate, to_rate, channels, 1024)?;
    let mut out = Vec::with_capacity(input.len() * to_rate as usize / from_rate as usize + 1024);
    resampler.push(input, &mut out)?;
    resampler.flush(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_passthrough() {
        let input = vec![0.25f32; 64];
        assert_eq!(resample_all(&input, 2, 48_000, 48_000).unwrap(), input);
    }

    #[test]
    fn upsampling_roughly_scales_length() {
        let input = vec![0.0f32; 2 * 22_050];
        let out = resample_all(&input, 2, 22_050, 44_100).unwrap();
        let frames = out.len() / 2;
        assert!(frames > 40_000 && frames < 48_000, "got {frames} frames");
    }

    #[test]
    fn push_buffers_partial_chunks() {
        let mut r = ChunkResampler::new(44_100, 48_000, 1, 256).unwrap();
        let mut out = Vec::new();
        r.push(&[0.0; 100], &mut out).unwrap();
        assert!(out.is_empty());
        r.push(&[0.0; 200], &mut out).unwrap();
        assert!(!out.is_empty());
        r.flush(&mut out).unwrap();
    }
}
