//! Symphonia decode stage.
//!
//! Probes a container once and then yields interleaved `f32` chunks on demand, so
//! callers decide whether to drain it eagerly (impulse responses, probes) or pace it
//! from a worker thread (playback sessions).

use std::io::Cursor;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::url::infer_extension;

/// Pull-based decoder over one probed source.
pub struct SourceReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    duration_secs: Option<f64>,
}

impl SourceReader {
    /// Probe `source` and prepare a decoder for its default track.
    ///
    /// `seek_secs` > 0 positions the reader before the first chunk is decoded.
    pub fn open(source: Box<dyn MediaSource>, hint: Hint, seek_secs: Option<f64>) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("probe audio container")?;

        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let duration_secs = duration_secs_from_codec_params(&codec_params);

        if let Some(secs) = seek_secs.filter(|s| *s > 0.0 && s.is_finite()) {
            let time = Time::new(secs.trunc() as u64, secs.fract());
            if let Err(e) = format.seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(track_id),
                },
            ) {
                tracing::debug!(seconds = secs, error = %e, "seek failed; decoding from start");
            }
        }

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("create decoder")?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration_secs,
        })
    }

    /// Probe an in-memory encoded buffer.
    pub fn from_bytes(bytes: Vec<u8>, ext: Option<&str>, seek_secs: Option<f64>) -> Result<Self> {
        let mut hint = Hint::new();
        if let Some(ext) = ext {
            hint.with_extension(ext);
        }
        Self::open(Box::new(Cursor::new(bytes)), hint, seek_secs)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total length from container metadata, when it is declared.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Decode the next packet into interleaved samples. `Ok(None)` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(anyhow!("read packet: {e}")),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::trace!(error = %e, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(anyhow!("decode packet: {e}")),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let mut sample_buf =
                SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);
            return Ok(Some(sample_buf.samples().to_vec()));
        }
    }

    /// Decode everything (up to `max_frames`) into one interleaved buffer.
    pub fn read_all(mut self, max_frames: Option<usize>) -> Result<Vec<f32>> {
        let limit = max_frames.map(|f| f.saturating_mul(self.channels));
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk);
            if let Some(limit) = limit {
                if out.len() >= limit {
                    out.truncate(limit);
                    break;
                }
            }
        }
        Ok(out)
    }
}

/// Build a probe hint from the URL's file extension.
pub fn hint_for_url(url: &str) -> Hint {
    let mut hint = Hint::new();
    if let Some(ext) = infer_extension(url) {
        hint.with_extension(&ext);
    }
    hint
}

/// Best-effort duration in seconds from codec metadata.
fn duration_secs_from_codec_params(codec_params: &CodecParameters) -> Option<f64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames as f64 / rate as f64)
}
