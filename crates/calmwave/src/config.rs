//! Configuration loading and parsing.
//!
//! Every section is optional; missing values fall back to the engine defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use calmwave_audio::config::{BreathingConfig, EngineConfig, PlaybackConfig};
use calmwave_audio::effects::ImpulseSource;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Local settings file.
    pub store: Option<StoreSection>,
    /// Hosted catalog credentials.
    pub backend: Option<BackendSection>,
    /// Playback engine timing overrides.
    pub engine: Option<EngineSection>,
    /// Native output tuning.
    pub output: Option<OutputSection>,
    /// Effects chain defaults.
    pub effects: Option<EffectsSection>,
    /// Breathing session overrides.
    pub breathing: Option<BreathingSection>,
}

#[derive(Debug, Deserialize)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct BackendSection {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Anonymous API key sent with every request.
    pub api_key: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct EngineSection {
    pub preload_timeout_ms: Option<u64>,
    pub crossfade_secs: Option<f64>,
    pub ramp_tick_ms: Option<u64>,
    pub loop_threshold_ms: Option<u64>,
    pub max_auto_retries: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct OutputSection {
    pub device: Option<String>,
    pub chunk_frames: Option<usize>,
    pub buffer_seconds: Option<f32>,
    pub fetch_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EffectsSection {
    /// Impulse response path or URL; synthesized when absent.
    pub impulse: Option<String>,
    /// Default reverb wet share.
    pub reverb_mix: Option<f32>,
    /// Default EQ band gains in dB, low to high.
    pub bands: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct BreathingSection {
    pub voice_probe_timeout_ms: Option<u64>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        toml::from_str::<AppConfig>(&raw).with_context(|| format!("parse config {:?}", path))
    }

    /// Load `path` when given, otherwise an all-defaults config.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Store file: CLI override, then `[store] path`, then the per-user default.
    pub fn store_path(&self, cli: Option<&Path>) -> PathBuf {
        if let Some(path) = cli {
            return path.to_path_buf();
        }
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(default_store_path)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        let Some(engine) = &self.engine else {
            return cfg;
        };
        if let Some(ms) = engine.preload_timeout_ms {
            cfg.preload_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = engine.crossfade_secs.filter(|s| s.is_finite() && *s >= 0.0) {
            cfg.crossfade_window = Duration::from_secs_f64(secs);
        }
        if let Some(ms) = engine.ramp_tick_ms.filter(|ms| *ms > 0) {
            cfg.ramp_tick = Duration::from_millis(ms);
        }
        if let Some(ms) = engine.loop_threshold_ms {
            cfg.loop_threshold = Duration::from_millis(ms);
        }
        if let Some(n) = engine.max_auto_retries {
            cfg.max_auto_retries = n;
        }
        if let Some(ms) = engine.retry_base_ms {
            cfg.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = engine.retry_max_ms {
            cfg.retry_max_delay = Duration::from_millis(ms);
        }
        cfg
    }

    /// Output settings with CLI flags taking precedence over the file.
    pub fn playback_config(&self, chunk_frames: Option<usize>, buffer_seconds: Option<f32>) -> PlaybackConfig {
        let mut cfg = PlaybackConfig::default();
        let output = self.output.as_ref();
        if let Some(n) = chunk_frames.or(output.and_then(|o| o.chunk_frames)) {
            cfg.chunk_frames = n.max(1);
        }
        if let Some(s) = buffer_seconds.or(output.and_then(|o| o.buffer_seconds)) {
            cfg.buffer_seconds = s;
        }
        if let Some(ms) = output.and_then(|o| o.fetch_timeout_ms) {
            cfg.fetch_timeout = Duration::from_millis(ms);
        }
        cfg
    }

    pub fn breathing_config(&self) -> BreathingConfig {
        let mut cfg = BreathingConfig::default();
        if let Some(ms) = self.breathing.as_ref().and_then(|b| b.voice_probe_timeout_ms) {
            cfg.voice_probe_timeout = Duration::from_millis(ms);
        }
        cfg
    }

    /// Output device: CLI flag first, then `[output] device`.
    pub fn device<'a>(&'a self, cli: Option<&'a str>) -> Option<&'a str> {
        cli.or(self.output.as_ref().and_then(|o| o.device.as_deref()))
    }

    pub fn effects(&self) -> &EffectsSection {
        static EMPTY: EffectsSection = EffectsSection {
            impulse: None,
            reverb_mix: None,
            bands: None,
        };
        self.effects.as_ref().unwrap_or(&EMPTY)
    }
}

impl EffectsSection {
    pub fn impulse_source(&self, cli: Option<&str>) -> ImpulseSource {
        match cli.or(self.impulse.as_deref()) {
            None => ImpulseSource::Synthetic,
            Some(raw) if raw.contains("://") || raw.starts_with("data:") => {
                ImpulseSource::Url(raw.to_string())
            }
            Some(raw) => ImpulseSource::File(PathBuf::from(raw)),
        }
    }
}

fn default_store_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config/calmwave/store.json"),
        None => PathBuf::from("calmwave-store.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_engine_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.engine_config().max_auto_retries, EngineConfig::default().max_auto_retries);
        assert_eq!(cfg.playback_config(None, None).chunk_frames, 1024);
        assert!(matches!(cfg.effects().impulse_source(None), ImpulseSource::Synthetic));
    }

    #[test]
    fn sections_override_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [store]
            path = "/tmp/cw.json"

            [backend]
            url = "https://example.supabase.co"
            api_key = "anon"

            [engine]
            crossfade_secs = 3.5
            max_auto_retries = 4
            retry_base_ms = 250

            [output]
            device = "usb"
            buffer_seconds = 1.0

            [effects]
            impulse = "https://cdn.example.com/hall.wav"
            bands = [3.0, 0.0, -2.0]
            "#,
        )
        .unwrap();

        let engine = cfg.engine_config();
        assert_eq!(engine.crossfade_window, Duration::from_millis(3500));
        assert_eq!(engine.max_auto_retries, 4);
        assert_eq!(engine.retry_base_delay, Duration::from_millis(250));
        assert_eq!(cfg.store_path(None), PathBuf::from("/tmp/cw.json"));
        assert_eq!(cfg.backend.as_ref().unwrap().api_key, "anon");
        assert_eq!(cfg.device(None), Some("usb"));
        assert!(matches!(
            cfg.effects().impulse_source(None),
            ImpulseSource::Url(ref u) if u.ends_with("hall.wav")
        ));
    }

    #[test]
    fn cli_flags_take_precedence() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [output]
            device = "usb"
            chunk_frames = 512
            buffer_seconds = 1.0
            "#,
        )
        .unwrap();
        let playback = cfg.playback_config(Some(2048), None);
        assert_eq!(playback.chunk_frames, 2048);
        assert_eq!(playback.buffer_seconds, 1.0);
        assert_eq!(cfg.device(Some("hdmi")), Some("hdmi"));
        assert_eq!(
            cfg.store_path(Some(Path::new("/x/store.json"))),
            PathBuf::from("/x/store.json")
        );
        assert!(matches!(
            cfg.effects().impulse_source(Some("/opt/ir.wav")),
            ImpulseSource::File(_)
        ));
    }

    #[test]
    fn unknown_value_types_are_rejected() {
        assert!(toml::from_str::<AppConfig>("[engine]\nmax_auto_retries = \"many\"").is_err());
    }
}
