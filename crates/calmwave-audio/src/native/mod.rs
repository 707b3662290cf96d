//! CPAL/symphonia/rubato implementation of the media capabilities.
//!
//! [`NativeBackend`] opens one output device and hands out sinks and probes that
//! all report on its two channels. The caller's loop drains those channels into
//! the engines.

pub mod decode;
pub mod device;
mod output;
pub mod probe;
pub mod resample;
mod sink;
pub mod source;

pub use device::{DeviceInfo, list_devices, pick_device, pick_output_config};
pub use probe::NativeProbe;
pub use sink::NativeSink;

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::info;

use crate::config::PlaybackConfig;
use crate::media::{MediaEnvelope, ProbeOutcome};

pub struct NativeBackend {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    playback: PlaybackConfig,
    media_tx: Sender<MediaEnvelope>,
    media_rx: Receiver<MediaEnvelope>,
    probe_tx: Sender<ProbeOutcome>,
    probe_rx: Receiver<ProbeOutcome>,
}

impl NativeBackend {
    /// Open the default host's output device (`device` is a name substring).
    pub fn open(device: Option<&str>, playback: PlaybackConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = pick_device(&host, device)?;
        let config = pick_output_config(&device)?;
        let name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        info!(
            host = ?host.id(),
            device = %name,
            sample_rate = config.sample_rate(),
            channels = config.channels(),
            format = ?config.sample_format(),
            "output device selected"
        );
        let (media_tx, media_rx) = crossbeam_channel::unbounded();
        let (probe_tx, probe_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            device,
            config,
            playback,
            media_tx,
            media_rx,
            probe_tx,
            probe_rx,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    pub fn channels(&self) -> usize {
        self.config.channels().max(1) as usize
    }

    /// A new output slot on the backend's device.
    pub fn sink(&self) -> Result<NativeSink> {
        NativeSink::new(
            &self.device,
            &self.config,
            self.playback.clone(),
            self.media_tx.clone(),
        )
    }

    pub fn probe(&self) -> NativeProbe {
        NativeProbe::new(self.probe_tx.clone(), self.playback.fetch_timeout)
    }

    /// Lifecycle events from every sink of this backend.
    pub fn media_events(&self) -> Receiver<MediaEnvelope> {
        self.media_rx.clone()
    }

    /// Verdicts from every probe of this backend.
    pub fn probe_outcomes(&self) -> Receiver<ProbeOutcome> {
        self.probe_rx.clone()
    }
}
