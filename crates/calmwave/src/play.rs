//! `calmwave play`: one track through the playback engine, optionally with effects.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};

use calmwave_audio::effects::{BAND_COUNT, BAND_FREQUENCIES, EffectsChain, EffectsHost, SharedGraph};
use calmwave_audio::engine::PlaybackEngine;
use calmwave_audio::events::PlaybackEvent;
use calmwave_audio::media::MediaSink;
use calmwave_audio::native::NativeBackend;
use calmwave_audio::notify::TracingNotifier;
use calmwave_types::{Meditation, PlayableTrack, RadioStream, Soundscape, Table};

use crate::cli::PlayArgs;
use crate::config::{AppConfig, EffectsSection};
use crate::manage::catalog;
use crate::runtime::{self, Flow, Input};

pub fn run(args: &PlayArgs, cfg: &AppConfig, backend: &NativeBackend, stop: &AtomicBool) -> Result<()> {
    let track = resolve_track(args, cfg)?;
    let bands = args
        .eq
        .iter()
        .map(|raw| parse_band(raw))
        .collect::<Result<Vec<_>>>()?;

    let primary = backend.sink()?;
    let secondary = backend.sink()?;
    let sink_ids = [primary.id(), secondary.id()];

    let wants_effects = args.effects || !bands.is_empty() || args.reverb.is_some() || args.bypass;
    let host = wants_effects.then(|| EffectsHost::new(cfg.effects().impulse_source(args.impulse.as_deref())));
    if let Some(host) = &host {
        // The engine swaps sinks after a crossfade, so both carry an identically tuned graph.
        for sink in [&primary, &secondary] {
            let graph = host.connect(sink.id(), backend.sample_rate(), backend.channels());
            tune_graph(&graph, cfg.effects(), &bands, args);
            sink.attach_effects(graph);
        }
    }

    let mut engine = PlaybackEngine::new(
        Box::new(primary),
        Box::new(secondary),
        Box::new(backend.probe()),
        Arc::new(TracingNotifier),
        cfg.engine_config(),
    );
    let events = engine.subscribe();
    if let Some(volume) = args.volume {
        engine.set_volume(volume);
    }
    if args.looping {
        engine.toggle_loop();
    }

    println!("Playing: {}", track.title);
    engine.load(track, std::time::Instant::now());
    engine.play();

    let media = backend.media_events();
    let probes = backend.probe_outcomes();
    let result = runtime::run(&media, &probes, stop, |input, now| {
        match input {
            Input::Media(envelope) => engine.handle_media_event(envelope, now),
            Input::Probe(outcome) => engine.handle_probe_outcome(outcome, now),
            Input::Tick => {}
        }
        engine.poll(now);

        for event in events.try_iter() {
            match event {
                PlaybackEvent::TrackEnded { crossfaded: true } => {
                    println!("Crossfaded into {}", engine.current_url().unwrap_or(""));
                }
                PlaybackEvent::TrackEnded { crossfaded: false } => {
                    if !engine.state().is_looping {
                        return Ok(Flow::Done);
                    }
                }
                PlaybackEvent::RetryScheduled { attempt, delay } => {
                    println!("Retrying in {:.1}s (attempt {attempt})", delay.as_secs_f32());
                }
                PlaybackEvent::CrossfadeStarted { next_url } => {
                    info!(next = %next_url, "crossfade started");
                }
                PlaybackEvent::Blocked => warn!("playback blocked"),
                PlaybackEvent::LoadFailed { .. } | PlaybackEvent::StateChanged(_) => {}
            }
        }

        let state = engine.state();
        if state.load_error && !state.is_retrying {
            let fault = state
                .last_fault
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "playback failed".to_string());
            bail!(fault);
        }
        Ok(Flow::Continue)
    });

    engine.stop();
    if let Some(host) = &host {
        for id in sink_ids {
            host.disconnect(id);
        }
    }
    result
}

fn resolve_track(args: &PlayArgs, cfg: &AppConfig) -> Result<PlayableTrack> {
    let mut track = match &args.from {
        None => PlayableTrack::new(args.source.clone(), args.source.clone(), args.source.clone()),
        Some(raw) => {
            let table = Table::parse(raw).ok_or_else(|| anyhow!("unknown table: {raw}"))?;
            let catalog = catalog(cfg)?;
            let id = args.source.as_str();
            let track = match table {
                Table::Meditations => catalog.get::<Meditation>(id)?.map(|m| PlayableTrack::from(&m)),
                Table::Soundscapes => catalog.get::<Soundscape>(id)?.map(|s| PlayableTrack::from(&s)),
                Table::RadioStreams => catalog.get::<RadioStream>(id)?.map(|r| PlayableTrack::from(&r)),
                Table::BreathingPatterns => bail!("breathing patterns are not playable; use `calmwave breathe`"),
            };
            track.ok_or_else(|| anyhow!("no {} row with id {id:?}", table.name()))?
        }
    };
    if let Some(next) = &args.next {
        track.next_audio_url = Some(next.clone());
    }
    Ok(track)
}

fn tune_graph(graph: &SharedGraph, defaults: &EffectsSection, bands: &[(usize, f32)], args: &PlayArgs) {
    let Ok(mut graph) = graph.lock() else {
        return;
    };
    for (index, db) in defaults.bands.iter().flatten().enumerate() {
        graph.set_band_gain(index, *db);
    }
    for &(index, db) in bands {
        graph.set_band_gain(index, db);
    }
    if let Some(mix) = args.reverb.or(defaults.reverb_mix) {
        graph.set_reverb_mix(mix);
    }
    if args.bypass {
        graph.bypass(true);
    }
}

/// Parse `index=dB` or `<freq>hz=dB`.
fn parse_band(raw: &str) -> Result<(usize, f32)> {
    let (band, db) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected BAND=DB, got {raw:?}"))?;
    let db: f32 = db
        .trim()
        .parse()
        .with_context(|| format!("parse gain in {raw:?}"))?;
    let band = band.trim().to_ascii_lowercase();
    let index = match band.strip_suffix("hz") {
        Some(hz) => {
            let hz: f32 = hz
                .trim()
                .parse()
                .with_context(|| format!("parse frequency in {raw:?}"))?;
            BAND_FREQUENCIES
                .iter()
                .position(|f| (f - hz).abs() < 0.5)
                .ok_or_else(|| anyhow!("no EQ band at {hz} Hz"))?
        }
        None => band
            .parse()
            .with_context(|| format!("parse band index in {raw:?}"))?,
    };
    if index >= BAND_COUNT {
        bail!("EQ band index {index} out of range (0..{BAND_COUNT})");
    }
    Ok((index, db))
}
