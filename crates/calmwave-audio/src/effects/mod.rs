//! Effects graph layered onto a media sink.
//!
//! Signal path per frame:
//!
//! ```text
//! input gain -> compressor -> analyser tap -> 9-band EQ -+-> dry ----------+-> master
//!                                                        +-> convolver -> wet
//! ```
//!
//! The graph never touches sink volume; the playback engine owns that.

mod analyser;
mod dynamics;
mod eq;
mod reverb;

pub use analyser::{Analyser, DEFAULT_FFT_SIZE};
pub use dynamics::{Compressor, CompressorSettings};
pub use eq::{BAND_COUNT, BAND_FREQUENCIES, Equalizer, MAX_BAND_GAIN_DB};
pub use reverb::{CONVOLVER_LATENCY, Convolver, FALLBACK_IMPULSE_SECS, Impulse};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::media::SinkId;
use crate::native::source::{decode_data_url, fetch_bytes};
use crate::url::{infer_extension, is_data_url};

/// Dry/wet levels restored when bypass is turned off.
pub const DEFAULT_DRY: f32 = 0.7;
pub const DEFAULT_WET: f32 = 0.3;

/// Control surface of an effects chain.
pub trait EffectsChain {
    /// Set one EQ band in dB. Out-of-range indices are ignored.
    fn set_band_gain(&mut self, index: usize, db: f32);
    /// Linear dry/wet crossfade: dry = 1 - wet.
    fn set_reverb_mix(&mut self, wet: f32);
    /// `true` forces dry 1 / wet 0. `false` restores the default 0.7 / 0.3 mix,
    /// not the mix in effect before bypassing.
    fn bypass(&mut self, bypassed: bool);
    fn state(&self) -> EffectsGraphState;
    /// Run an interleaved block through the chain in place.
    fn process(&mut self, interleaved: &mut [f32]);
    /// Drop every node; later blocks pass through untouched.
    fn disconnect(&mut self);
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EffectsGraphState {
    pub band_gains: [f32; BAND_COUNT],
    /// Wet share of the reverb mix.
    pub reverb_mix: f32,
    pub dry_gain: f32,
    pub wet_gain: f32,
    pub bypassed: bool,
    pub connected: bool,
}

struct Nodes {
    compressor: Compressor,
    analyser: Analyser,
    eq: Equalizer,
    convolvers: Vec<Convolver>,
}

pub struct EffectsGraph {
    sample_rate: u32,
    channels: usize,
    input_gain: f32,
    master_gain: f32,
    dry: f32,
    wet: f32,
    bypassed: bool,
    wet_running: bool,
    band_gains: [f32; BAND_COUNT],
    nodes: Option<Nodes>,
}

impl EffectsGraph {
    pub fn new(sample_rate: u32, channels: usize, impulse: &Impulse) -> Self {
        let channels = channels.max(1);
        let ir_channels = impulse.channels.len().max(1);
        let convolvers = (0..channels)
            .map(|c| {
                let ir = impulse
                    .channels
                    .get(c % ir_channels)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                Convolver::new(ir)
            })
            .collect();
        Self {
            sample_rate,
            channels,
            input_gain: 1.0,
            master_gain: 1.0,
            dry: DEFAULT_DRY,
            wet: DEFAULT_WET,
            bypassed: false,
            wet_running: true,
            band_gains: [0.0; BAND_COUNT],
            nodes: Some(Nodes {
                compressor: Compressor::new(sample_rate, CompressorSettings::default()),
                analyser: Analyser::new(DEFAULT_FFT_SIZE),
                eq: Equalizer::new(sample_rate, channels),
                convolvers,
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn set_input_gain(&mut self, gain: f32) {
        if gain.is_finite() {
            self.input_gain = gain.max(0.0);
        }
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        if gain.is_finite() {
            self.master_gain = gain.max(0.0);
        }
    }

    /// Analyser read-out in dBFS per bin, empty once disconnected.
    pub fn spectrum(&mut self) -> Vec<f32> {
        self.nodes
            .as_mut()
            .map(|n| n.analyser.spectrum())
            .unwrap_or_default()
    }

    /// Current compressor gain reduction in dB.
    pub fn reduction_db(&self) -> f32 {
        self.nodes
            .as_ref()
            .map(|n| n.compressor.reduction_db())
            .unwrap_or(0.0)
    }

    fn set_mix(&mut self, dry: f32, wet: f32) {
        self.dry = dry;
        self.wet = wet;
    }
}

impl EffectsChain for EffectsGraph {
    fn set_band_gain(&mut self, index: usize, db: f32) {
        let Some(nodes) = self.nodes.as_mut() else {
            return;
        };
        if nodes.eq.set_gain(index, db) {
            self.band_gains = nodes.eq.gains();
        }
    }

    fn set_reverb_mix(&mut self, wet: f32) {
        if wet.is_nan() {
            return;
        }
        let wet = wet.clamp(0.0, 1.0);
        self.set_mix(1.0 - wet, wet);
    }

    fn bypass(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
        if bypassed {
            self.set_mix(1.0, 0.0);
        } else {
            self.set_mix(DEFAULT_DRY, DEFAULT_WET);
        }
    }

    fn state(&self) -> EffectsGraphState {
        EffectsGraphState {
            band_gains: self.band_gains,
            reverb_mix: self.wet,
            dry_gain: self.dry,
            wet_gain: self.wet,
            bypassed: self.bypassed,
            connected: self.nodes.is_some(),
        }
    }

    fn process(&mut self, interleaved: &mut [f32]) {
        let channels = self.channels;
        let (dry, wet) = (self.dry, self.wet);
        let (input_gain, master_gain) = (self.input_gain, self.master_gain);
        let Some(nodes) = self.nodes.as_mut() else {
            return;
        };

        let run_wet = wet > 0.0;
        if run_wet && !self.wet_running {
            for conv in &mut nodes.convolvers {
                conv.reset();
            }
        }
        self.wet_running = run_wet;

        for frame in interleaved.chunks_exact_mut(channels) {
            for s in frame.iter_mut() {
                *s *= input_gain;
            }
            nodes.compressor.process_frame(frame);
            let mono = frame.iter().sum::<f32>() / channels as f32;
            nodes.analyser.push(mono);
            nodes.eq.process_frame(frame);
            for (s, conv) in frame.iter_mut().zip(nodes.convolvers.iter_mut()) {
                let reverb = if run_wet { conv.process_sample(*s) } else { 0.0 };
                *s = (dry * *s + wet * reverb) * master_gain;
            }
        }
    }

    fn disconnect(&mut self) {
        if self.nodes.take().is_some() {
            debug!(sample_rate = self.sample_rate, "effects graph disconnected");
        }
    }
}

pub type SharedGraph = Arc<Mutex<EffectsGraph>>;

/// Where the reverb impulse comes from.
#[derive(Clone, Debug, Default)]
pub enum ImpulseSource {
    /// Impulse sample shipped with the app.
    File(PathBuf),
    /// Remote or `data:` URL.
    Url(String),
    /// Skip loading and synthesize.
    #[default]
    Synthetic,
}

/// Builds and tracks at most one graph per sink.
pub struct EffectsHost {
    impulse: ImpulseSource,
    fetch_timeout: Duration,
    graphs: Mutex<HashMap<SinkId, SharedGraph>>,
}

impl EffectsHost {
    pub fn new(impulse: ImpulseSource) -> Self {
        Self {
            impulse,
            fetch_timeout: Duration::from_secs(10),
            graphs: Mutex::new(HashMap::new()),
        }
    }

    /// Bind a graph to `sink`. A sink that already has one gets it back unchanged.
    pub fn connect(&self, sink: SinkId, sample_rate: u32, channels: usize) -> SharedGraph {
        if let Some(existing) = self.graph(sink) {
            debug!(sink = %sink, "effects graph already attached; reusing it");
            return existing;
        }
        let impulse = self.load_impulse(sample_rate, channels);
        let graph = Arc::new(Mutex::new(EffectsGraph::new(sample_rate, channels, &impulse)));
        match self.graphs.lock() {
            Ok(mut graphs) => graphs.entry(sink).or_insert(graph).clone(),
            Err(_) => graph,
        }
    }

    pub fn graph(&self, sink: SinkId) -> Option<SharedGraph> {
        self.graphs.lock().ok()?.get(&sink).cloned()
    }

    /// Tear down the graph bound to `sink`. Returns whether one existed.
    pub fn disconnect(&self, sink: SinkId) -> bool {
        let removed = self.graphs.lock().ok().and_then(|mut g| g.remove(&sink));
        match removed {
            Some(graph) => {
                if let Ok(mut graph) = graph.lock() {
                    graph.disconnect();
                }
                true
            }
            None => false,
        }
    }

    fn load_impulse(&self, sample_rate: u32, channels: usize) -> Impulse {
        let loaded = match &self.impulse {
            ImpulseSource::Synthetic => None,
            source => match self.read_impulse(source, sample_rate) {
                Ok(ir) if !ir.is_empty() => Some(ir),
                Ok(_) => {
                    warn!("impulse sample is empty; synthesizing reverb");
                    None
                }
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "impulse sample unavailable; synthesizing reverb");
                    None
                }
            },
        };
        let impulse = loaded.unwrap_or_else(|| {
            Impulse::synthesize(sample_rate, channels, FALLBACK_IMPULSE_SECS, rand::random())
        });
        info!(frames = impulse.len(), channels = impulse.channels.len(), "reverb impulse ready");
        impulse.normalized()
    }

    fn read_impulse(&self, source: &ImpulseSource, sample_rate: u32) -> Result<Impulse> {
        let (bytes, ext) = match source {
            ImpulseSource::File(path) => {
                let bytes = std::fs::read(path).with_context(|| format!("read {path:?}"))?;
                let ext = path.extension().and_then(|e| e.to_str()).map(str::to_string);
                (bytes, ext)
            }
            ImpulseSource::Url(url) if is_data_url(url) => decode_data_url(url)?,
            ImpulseSource::Url(url) => (fetch_bytes(url, self.fetch_timeout)?, infer_extension(url)),
            ImpulseSource::Synthetic => anyhow::bail!("no impulse sample configured"),
        };
        Impulse::decode(bytes, ext.as_deref())?.resampled(sample_rate)
    }
}

impl Default for EffectsHost {
    fn default() -> Self {
        Self::new(ImpulseSource::Synthetic)
    }
}
