//! calmwave: command-line front end for the calmwave audio core.
//!
//! ## Modes
//! - `play`: load a track (URL, storage path or catalog row) through the playback engine,
//!   with preload probing, automatic retries, looping, crossfade into `--next` and an
//!   optional effects chain.
//! - `breathe`: run a stored breathing pattern, optionally with voice-over clips.
//! - `patterns`, `voices`, `stats`: inspect and edit the local settings store.
//! - `catalog`: dump rows of the hosted catalog.
//!
//! Audio modes run a single event loop (`runtime`) over the native backend's channels
//! until the session ends or Ctrl+C is pressed.

mod breathe;
mod cli;
mod config;
mod manage;
mod play;
mod runtime;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use calmwave_audio::native::{NativeBackend, list_devices};
use calmwave_audio::store::{ConfigStore, JsonFileStore};

use crate::cli::Command;
use crate::config::AppConfig;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,calmwave=info,calmwave_audio=info")
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for device in list_devices(&host)? {
            let marker = if device.is_default { "*" } else { " " };
            println!(
                "{marker} {} ({}-{} Hz)",
                device.name, device.min_rate, device.max_rate
            );
        }
        return Ok(());
    }

    let Some(cmd) = &args.cmd else {
        cli::Args::command().print_help()?;
        return Ok(());
    };

    let cfg = AppConfig::load_optional(args.config.as_deref())?;
    let store_path = cfg.store_path(args.store.as_deref());
    let store: Arc<dyn ConfigStore> = Arc::new(
        JsonFileStore::open(&store_path).with_context(|| format!("open store {:?}", store_path))?,
    );
    tracing::debug!(path = ?store_path, "settings store");

    match cmd {
        Command::Play(play_args) => {
            let stop = install_stop_handler()?;
            let backend = open_backend(&args, &cfg)?;
            play::run(play_args, &cfg, &backend, &stop)
        }
        Command::Breathe(breathe_args) => {
            let stop = install_stop_handler()?;
            let backend = open_backend(&args, &cfg)?;
            breathe::run(breathe_args, &cfg, store, &backend, &stop)
        }
        Command::Patterns { cmd } => manage::patterns(cmd, &cfg, store.as_ref()),
        Command::Voices { cmd } => manage::voices(cmd, store.as_ref()),
        Command::Catalog { table, id } => manage::dump_catalog(&cfg, table, id.as_deref()),
        Command::Stats => manage::stats(store.as_ref()),
    }
}

fn open_backend(args: &cli::Args, cfg: &AppConfig) -> Result<NativeBackend> {
    let playback = cfg.playback_config(args.chunk_frames, args.buffer_seconds);
    NativeBackend::open(cfg.device(args.device.as_deref()), playback)
}

/// Raise a flag on Ctrl+C; the event loop checks it between messages.
fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("install Ctrl+C handler")?;
    Ok(stop)
}
