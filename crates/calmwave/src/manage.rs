//! Non-audio subcommands: patterns, voices, catalog dumps and stats.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde::Serialize;

use calmwave_audio::catalog::{Catalog, CatalogEntry, RestClient};
use calmwave_audio::store::{self, ConfigStore, KEY_BREATHING_PATTERNS};
use calmwave_types::{BreathingPattern, Meditation, RadioStream, Soundscape, Table, Voice, VoiceAudioSet};

use crate::cli::{PatternsCommand, VoicesCommand};
use crate::config::AppConfig;

/// Catalog client for the configured backend.
pub fn catalog(cfg: &AppConfig) -> Result<Catalog<RestClient>> {
    let backend = cfg
        .backend
        .as_ref()
        .ok_or_else(|| anyhow!("no [backend] section in config; pass --config"))?;
    let client = match backend.timeout_ms {
        Some(ms) => RestClient::with_timeout(&backend.url, &backend.api_key, Duration::from_millis(ms)),
        None => RestClient::new(&backend.url, &backend.api_key),
    };
    Ok(Catalog::new(client))
}

pub fn patterns(cmd: &PatternsCommand, cfg: &AppConfig, store: &dyn ConfigStore) -> Result<()> {
    match cmd {
        PatternsCommand::List => {
            for p in store::breathing_patterns(store) {
                println!("{}", pattern_line(&p));
            }
        }
        PatternsCommand::Show { id } => {
            let pattern =
                store::find_pattern(store, id).ok_or_else(|| anyhow!("no pattern with id {id:?}"))?;
            println!("{}", serde_json::to_string_pretty(&pattern)?);
        }
        PatternsCommand::Remove { id } => {
            if !store::remove_pattern(store, id)? {
                bail!("no stored pattern with id {id:?}");
            }
            println!("Removed {id}");
        }
        PatternsCommand::Sync => {
            let patterns = catalog(cfg)?.breathing_patterns()?;
            if patterns.is_empty() {
                bail!("catalog returned no breathing patterns; keeping local ones");
            }
            store::set_json(store, KEY_BREATHING_PATTERNS, &patterns)?;
            println!("Synced {} patterns", patterns.len());
        }
    }
    Ok(())
}

pub fn voices(cmd: &VoicesCommand, store: &dyn ConfigStore) -> Result<()> {
    match cmd {
        VoicesCommand::Show => {
            for (voice, set) in store::voice_audio_urls(store) {
                println!("{}", voice.name());
                println!("  inhale: {}", set.inhale);
                println!("  hold:   {}", set.hold);
                println!("  exhale: {}", set.exhale);
            }
        }
        VoicesCommand::Set {
            voice,
            inhale,
            hold,
            exhale,
        } => {
            let voice = parse_voice(voice)?;
            let set = VoiceAudioSet {
                inhale: inhale.clone(),
                hold: hold.clone(),
                exhale: exhale.clone(),
            };
            store::save_voice_set(store, voice, set)?;
            println!("Updated {}", voice.name());
        }
    }
    Ok(())
}

pub fn dump_catalog(cfg: &AppConfig, table: &str, id: Option<&str>) -> Result<()> {
    let table = Table::parse(table).ok_or_else(|| anyhow!("unknown table: {table}"))?;
    let catalog = catalog(cfg)?;
    match table {
        Table::Meditations => dump::<Meditation>(&catalog, id),
        Table::Soundscapes => dump::<Soundscape>(&catalog, id),
        Table::BreathingPatterns => dump::<BreathingPattern>(&catalog, id),
        Table::RadioStreams => dump::<RadioStream>(&catalog, id),
    }
}

fn dump<T: CatalogEntry + Serialize>(catalog: &Catalog<RestClient>, id: Option<&str>) -> Result<()> {
    let rows: Vec<T> = match id {
        Some(id) => catalog.get::<T>(id)?.into_iter().collect(),
        None => catalog.list::<T>()?,
    };
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

pub fn stats(store: &dyn ConfigStore) -> Result<()> {
    println!("breaths completed: {}", store::breath_count(store));
    println!("patterns:          {}", store::breathing_patterns(store).len());
    Ok(())
}

pub fn parse_voice(raw: &str) -> Result<Voice> {
    Voice::parse(raw).ok_or_else(|| {
        let known: Vec<_> = Voice::ALL.iter().map(|v| v.name()).collect();
        anyhow!("unknown voice {raw:?} (expected one of {})", known.join(", "))
    })
}

fn pattern_line(p: &BreathingPattern) -> String {
    format!(
        "{:<12} {:<24} {}-{}-{}-{} x{}",
        p.id, p.name, p.inhale, p.hold1, p.exhale, p.hold2, p.cycles
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmwave_audio::store::MemoryStore;

    #[test]
    fn removing_twice_fails() {
        let store = MemoryStore::new();
        let cfg = AppConfig::default();
        store::save_pattern(&store, store::default_patterns()[0].clone()).unwrap();
        let id = store::default_patterns()[0].id.clone();
        patterns(&PatternsCommand::Remove { id: id.clone() }, &cfg, &store).unwrap();
        assert!(patterns(&PatternsCommand::Remove { id }, &cfg, &store).is_err());
    }

    #[test]
    fn voices_set_persists_urls() {
        let store = MemoryStore::new();
        let cmd = VoicesCommand::Set {
            voice: "vera".to_string(),
            inhale: "https://cdn.example.com/in.mp3".to_string(),
            hold: "https://cdn.example.com/hold.mp3".to_string(),
            exhale: "https://cdn.example.com/out.mp3".to_string(),
        };
        voices(&cmd, &store).unwrap();
        assert_eq!(store::voice_set(&store, Voice::Vera).hold, "https://cdn.example.com/hold.mp3");
    }

    #[test]
    fn unknown_voice_lists_choices() {
        let err = parse_voice("robot").unwrap_err().to_string();
        assert!(err.contains("vera"));
    }

    #[test]
    fn sync_without_backend_is_an_error() {
        let store = MemoryStore::new();
        assert!(patterns(&PatternsCommand::Sync, &AppConfig::default(), &store).is_err());
    }

    #[test]
    fn pattern_line_shows_timing() {
        let line = pattern_line(&store::default_patterns()[0]);
        assert!(line.contains("4-7-8-0 x4"), "{line}");
    }
}
