//! CPAL-backed [`MediaSink`].
//!
//! Each load or seek starts a worker thread that opens the source, decodes it,
//! resamples to the device rate and feeds the output stream through a bounded
//! chunk queue. Workers are cancelled by flag; the output callback drops whatever
//! they still push after a newer epoch starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use tracing::{debug, warn};

use crate::config::PlaybackConfig;
use crate::effects::SharedGraph;
use crate::media::{MediaEnvelope, MediaEvent, MediaSink, PlayError, SinkId};

use super::decode::{SourceReader, hint_for_url};
use super::output::{Chunk, EndReporter, OutputShared, build_output_stream};
use super::resample::ChunkResampler;
use super::source::open_url;

const SEND_POLL: Duration = Duration::from_millis(100);

/// Where a source should start and what the worker must announce.
#[derive(Clone, Copy)]
struct StartAt {
    seconds: f64,
    /// Send `CanPlay`/`CanPlayThrough` once the first chunk is queued.
    announce: bool,
}

pub struct NativeSink {
    id: SinkId,
    stream: cpal::Stream,
    shared: Arc<OutputShared>,
    chunk_tx: Sender<Chunk>,
    chunk_rx: Receiver<Chunk>,
    events: Sender<MediaEnvelope>,
    sample_rate: u32,
    channels: usize,
    playback: PlaybackConfig,
    url: Option<String>,
    generation: u64,
    duration: Arc<Mutex<Option<f64>>>,
    /// Seconds already behind the play-head when the current epoch started.
    base_seconds: f64,
    cancel: Option<Arc<AtomicBool>>,
}

impl NativeSink {
    pub(crate) fn new(
        device: &cpal::Device,
        config: &cpal::SupportedStreamConfig,
        playback: PlaybackConfig,
        events: Sender<MediaEnvelope>,
    ) -> Result<Self> {
        let id = SinkId::allocate();
        let stream_config: cpal::StreamConfig = config.clone().into();
        let sample_rate = stream_config.sample_rate;
        let channels = stream_config.channels.max(1) as usize;
        let capacity = queue_chunks(&playback, sample_rate);
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(capacity);

        let shared = Arc::new(OutputShared::new());
        let stream = build_output_stream(
            device,
            &stream_config,
            config.sample_format(),
            shared.clone(),
            chunk_rx.clone(),
            EndReporter {
                sink: id,
                events: events.clone(),
            },
        )
        .with_context(|| format!("build output stream for {id}"))?;
        stream
            .play()
            .with_context(|| format!("start output stream for {id}"))?;
        debug!(sink = %id, sample_rate, channels, capacity, "native sink ready");

        Ok(Self {
            id,
            stream,
            shared,
            chunk_tx,
            chunk_rx,
            events,
            sample_rate,
            channels,
            playback,
            url: None,
            generation: 0,
            duration: Arc::new(Mutex::new(None)),
            base_seconds: 0.0,
            cancel: None,
        })
    }

    /// Route this sink's output through `graph`.
    pub fn attach_effects(&self, graph: SharedGraph) {
        if let Ok(mut slot) = self.shared.effects.lock() {
            *slot = Some(graph);
        }
    }

    pub fn detach_effects(&self) {
        if let Ok(mut slot) = self.shared.effects.lock() {
            *slot = None;
        }
    }

    fn stop_worker(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::Relaxed);
        }
        self.shared.next_epoch();
        while self.chunk_rx.try_recv().is_ok() {}
    }

    fn start_worker(&mut self, url: String, start: StartAt) {
        self.stop_worker();
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Some(cancel.clone());
        self.base_seconds = start.seconds;

        let job = DecodeJob {
            url,
            generation: self.generation,
            epoch,
            start,
            sink: self.id,
            sample_rate: self.sample_rate,
            channels: self.channels,
            playback: self.playback.clone(),
            cancel,
            chunks: self.chunk_tx.clone(),
            events: self.events.clone(),
            duration: self.duration.clone(),
        };
        let spawned = thread::Builder::new()
            .name("calmwave-decode".into())
            .spawn(move || job.run());
        if let Err(e) = spawned {
            warn!(sink = %self.id, error = %e, "failed to spawn decode worker");
            let _ = self.events.send(MediaEnvelope::new(
                self.id,
                self.generation,
                MediaEvent::Error(format!("spawn decode worker: {e}")),
            ));
        }
    }

    fn is_live(&self) -> bool {
        self.duration().map(f64::is_infinite).unwrap_or(false)
    }
}

fn queue_chunks(playback: &PlaybackConfig, sample_rate: u32) -> usize {
    let frames = (playback.buffer_seconds.max(0.1) * sample_rate as f32) as usize;
    (frames / playback.chunk_frames.max(1)).max(2)
}

impl MediaSink for NativeSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn load(&mut self, url: &str, generation: u64) {
        self.shared.paused.store(true, Ordering::Relaxed);
        self.generation = generation;
        self.url = Some(url.to_string());
        if let Ok(mut d) = self.duration.lock() {
            *d = None;
        }
        self.start_worker(
            url.to_string(),
            StartAt {
                seconds: 0.0,
                announce: true,
            },
        );
    }

    fn clear(&mut self) {
        self.shared.paused.store(true, Ordering::Relaxed);
        self.stop_worker();
        self.url = None;
        self.base_seconds = 0.0;
        if let Ok(mut d) = self.duration.lock() {
            *d = None;
        }
    }

    fn play(&mut self) -> Result<(), PlayError> {
        self.stream
            .play()
            .map_err(|e| PlayError::Failed(e.to_string()))?;
        self.shared.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) {
        self.shared.paused.store(true, Ordering::Relaxed);
    }

    fn seek(&mut self, seconds: f64) {
        let Some(url) = self.url.clone() else {
            return;
        };
        if self.is_live() || !seconds.is_finite() {
            debug!(sink = %self.id, seconds, "seek ignored");
            return;
        }
        self.start_worker(
            url,
            StartAt {
                seconds: seconds.max(0.0),
                announce: false,
            },
        );
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared.set_volume(volume.clamp(0.0, 1.0));
    }

    fn volume(&self) -> f32 {
        self.shared.volume()
    }

    fn position(&self) -> f64 {
        let played = self.shared.played_frames.load(Ordering::Relaxed);
        self.base_seconds + played as f64 / self.sample_rate.max(1) as f64
    }

    fn duration(&self) -> Option<f64> {
        self.duration.lock().ok().and_then(|d| *d)
    }
}

impl Drop for NativeSink {
    fn drop(&mut self) {
        self.shared.paused.store(true, Ordering::Relaxed);
        self.stop_worker();
    }
}

/// One decode run for one epoch.
struct DecodeJob {
    url: String,
    generation: u64,
    epoch: u64,
    start: StartAt,
    sink: SinkId,
    sample_rate: u32,
    channels: usize,
    playback: PlaybackConfig,
    cancel: Arc<AtomicBool>,
    chunks: Sender<Chunk>,
    events: Sender<MediaEnvelope>,
    duration: Arc<Mutex<Option<f64>>>,
}

impl DecodeJob {
    fn run(self) {
        if let Err(e) = self.decode() {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            warn!(sink = %self.sink, url = %self.url, error = %e, "decode failed");
            self.emit(MediaEvent::Error(format!("{e:#}")));
        }
    }

    fn decode(&self) -> Result<()> {
        let opened = open_url(&self.url, self.playback.fetch_timeout, self.cancel.clone())?;
        let mut hint = hint_for_url(&self.url);
        if let Some(ext) = &opened.extension {
            hint.with_extension(ext);
        }
        let seek = (!opened.live).then_some(self.start.seconds);
        let mut reader = SourceReader::open(opened.media, hint, seek)?;
        let src_channels = reader.channels();
        let duration = if opened.live {
            Some(f64::INFINITY)
        } else {
            reader.duration_secs()
        };
        if let Ok(mut d) = self.duration.lock() {
            *d = duration;
        }

        let mut resampler = if reader.sample_rate() == self.sample_rate {
            None
        } else {
            Some(ChunkResampler::new(
                reader.sample_rate(),
                self.sample_rate,
                src_channels,
                self.playback.chunk_frames,
            )?)
        };
        debug!(
            sink = %self.sink,
            url = %self.url,
            src_rate = reader.sample_rate(),
            dst_rate = self.sample_rate,
            src_channels,
            live = opened.live,
            "decode started"
        );

        let mut announced = !self.start.announce;
        let mut converted = Vec::new();
        while let Some(samples) = reader.next_chunk()? {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(());
            }
            converted.clear();
            match resampler.as_mut() {
                Some(r) => r.push(&samples, &mut converted)?,
                None => converted.extend_from_slice(&samples),
            }
            if converted.is_empty() {
                continue;
            }
            let mapped = map_channels(&converted, src_channels, self.channels);
            if !self.send(mapped, false) {
                return Ok(());
            }
            if !announced {
                announced = true;
                self.emit(MediaEvent::CanPlay);
                self.emit(MediaEvent::CanPlayThrough);
            }
        }

        converted.clear();
        if let Some(r) = resampler.as_mut() {
            r.flush(&mut converted)?;
        }
        let tail = map_channels(&converted, src_channels, self.channels);
        if !announced {
            self.emit(MediaEvent::CanPlay);
            self.emit(MediaEvent::CanPlayThrough);
        }
        self.send(tail, true);
        debug!(sink = %self.sink, url = %self.url, "decode finished");
        Ok(())
    }

    /// Queue one chunk, giving up when cancelled. Returns whether it was queued.
    fn send(&self, samples: Vec<f32>, last: bool) -> bool {
        let mut chunk = Chunk {
            epoch: self.epoch,
            generation: self.generation,
            samples,
            last,
        };
        loop {
            match self.chunks.send_timeout(chunk, SEND_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.cancel.load(Ordering::Relaxed) {
                        return false;
                    }
                    chunk = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn emit(&self, event: MediaEvent) {
        let _ = self
            .events
            .send(MediaEnvelope::new(self.sink, self.generation, event));
    }
}

/// Map interleaved audio between channel layouts.
///
/// mono→N duplicates, stereo→mono averages, otherwise channels are truncated or
/// the last source channel is repeated.
pub(crate) fn map_channels(input: &[f32], src: usize, dst: usize) -> Vec<f32> {
    let src = src.max(1);
    let dst = dst.max(1);
    if src == dst {
        return input.to_vec();
    }
    let frames = input.len() / src;
    let mut out = Vec::with_capacity(frames * dst);
    for frame in input.chunks_exact(src) {
        if src == 2 && dst == 1 {
            out.push(0.5 * (frame[0] + frame[1]));
            continue;
        }
        for ch in 0..dst {
            out.push(frame[ch.min(src - 1)]);
        }
    }
    out
}
