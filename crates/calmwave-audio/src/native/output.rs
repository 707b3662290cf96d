//! CPAL output stage.
//!
//! One stream per sink, built once and left running. The callback:
//! - outputs silence while paused, without draining the chunk queue
//! - drops chunks from a superseded epoch (a newer load or seek)
//! - runs the attached effects graph if its lock is free, dry otherwise
//! - applies the sink volume and converts to the device sample format

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use crossbeam_channel::{Receiver, Sender};

use crate::effects::{EffectsChain, SharedGraph};
use crate::media::{MediaEnvelope, MediaEvent, SinkId};

/// Interleaved samples at the device rate and channel count.
pub(crate) struct Chunk {
    pub epoch: u64,
    pub generation: u64,
    pub samples: Vec<f32>,
    /// End of the source follows this chunk.
    pub last: bool,
}

/// State shared between a sink and its output callback.
pub(crate) struct OutputShared {
    pub paused: AtomicBool,
    volume_bits: AtomicU32,
    /// Chunks tagged with any other epoch are discarded.
    pub epoch: AtomicU64,
    /// Frames played since the last load or seek.
    pub played_frames: AtomicU64,
    pub effects: Mutex<Option<SharedGraph>>,
}

impl OutputShared {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(true),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            epoch: AtomicU64::new(0),
            played_frames: AtomicU64::new(0),
            effects: Mutex::new(None),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Start a new epoch and reset the frame counter.
    pub fn next_epoch(&self) -> u64 {
        self.played_frames.store(0, Ordering::Relaxed);
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Where the callback reports the end of a source.
pub(crate) struct EndReporter {
    pub sink: SinkId,
    pub events: Sender<MediaEnvelope>,
}

pub(crate) fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: Arc<OutputShared>,
    chunks: Receiver<Chunk>,
    ends: EndReporter,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared, chunks, ends),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared, chunks, ends),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared, chunks, ends),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared, chunks, ends),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<OutputShared>,
    chunks: Receiver<Chunk>,
    ends: EndReporter,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut feed = Feed::new(chunks, ends);
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if shared.paused.load(Ordering::Relaxed) {
                data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                return;
            }

            scratch.clear();
            scratch.resize(data.len(), 0.0);
            let epoch = shared.epoch.load(Ordering::Acquire);
            let filled = feed.fill(&mut scratch, epoch);

            apply_effects(&shared, &mut scratch);

            let volume = shared.volume();
            for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                *out = <T as cpal::Sample>::from_sample::<f32>((sample * volume).clamp(-1.0, 1.0));
            }
            if filled > 0 {
                shared
                    .played_frames
                    .fetch_add((filled / channels) as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn apply_effects(shared: &OutputShared, block: &mut [f32]) {
    let Ok(slot) = shared.effects.try_lock() else {
        return;
    };
    if let Some(graph) = slot.as_ref() {
        if let Ok(mut graph) = graph.try_lock() {
            graph.process(block);
        }
    }
}

/// Callback-side reader over the chunk queue.
struct Feed {
    chunks: Receiver<Chunk>,
    ends: EndReporter,
    current: Option<Chunk>,
    pos: usize,
}

impl Feed {
    fn new(chunks: Receiver<Chunk>, ends: EndReporter) -> Self {
        Self {
            chunks,
            ends,
            current: None,
            pos: 0,
        }
    }

    /// Copy queued samples of `epoch` into `out`; returns how many were written.
    /// The rest of `out` is left as is.
    fn fill(&mut self, out: &mut [f32], epoch: u64) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            let Some(chunk) = self.current.as_mut().filter(|c| c.epoch == epoch) else {
                if !self.next_chunk(epoch) {
                    break;
                }
                continue;
            };
            if self.pos >= chunk.samples.len() {
                if chunk.last {
                    chunk.last = false;
                    let _ = self.ends.events.send(MediaEnvelope::new(
                        self.ends.sink,
                        chunk.generation,
                        MediaEvent::Ended,
                    ));
                }
                if !self.next_chunk(epoch) {
                    break;
                }
                continue;
            }
            let n = (out.len() - filled).min(chunk.samples.len() - self.pos);
            out[filled..filled + n].copy_from_slice(&chunk.samples[self.pos..self.pos + n]);
            filled += n;
            self.pos += n;
        }
        filled
    }

    /// Pull the next chunk of `epoch`, dropping stale ones.
    fn next_chunk(&mut self, epoch: u64) -> bool {
        while let Ok(chunk) = self.chunks.try_recv() {
            if chunk.epoch == epoch {
                self.current = Some(chunk);
                self.pos = 0;
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> (Sender<Chunk>, Receiver<MediaEnvelope>, Feed) {
        let (chunk_tx, chunk_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let feed = Feed::new(
            chunk_rx,
            EndReporter {
                sink: SinkId(9),
                events: event_tx,
            },
        );
        (chunk_tx, event_rx, feed)
    }

    fn chunk(epoch: u64, samples: &[f32], last: bool) -> Chunk {
        Chunk {
            epoch,
            generation: 42,
            samples: samples.to_vec(),
            last,
        }
    }

    #[test]
    fn fill_spans_chunks_and_reports_end_once() {
        let (tx, events, mut feed) = feed();
        tx.send(chunk(1, &[0.1, 0.2, 0.3], false)).unwrap();
        tx.send(chunk(1, &[0.4], true)).unwrap();

        let mut out = [0.0f32; 8];
        assert_eq!(feed.fill(&mut out, 1), 4);
        assert_eq!(&out[..4], &[0.1, 0.2, 0.3, 0.4]);
        let ended = events.try_recv().unwrap();
        assert_eq!(ended.event, MediaEvent::Ended);
        assert_eq!(ended.generation, 42);

        assert_eq!(feed.fill(&mut out, 1), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn stale_epochs_are_skipped() {
        let (tx, _events, mut feed) = feed();
        tx.send(chunk(1, &[0.9, 0.9], false)).unwrap();
        tx.send(chunk(2, &[0.5], false)).unwrap();
        let mut out = [0.0f32; 4];
        assert_eq!(feed.fill(&mut out, 2), 1);
        assert_eq!(out[0], 0.5);
    }

    #[test]
    fn volume_round_trips_through_bits() {
        let shared = OutputShared::new();
        shared.set_volume(0.25);
        assert_eq!(shared.volume(), 0.25);
        assert!(shared.paused.load(Ordering::Relaxed));
        assert_eq!(shared.next_epoch(), 1);
        assert_eq!(shared.next_epoch(), 2);
    }
}
