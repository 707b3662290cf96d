//! Persisted key/value configuration.
//!
//! Values are JSON documents under string keys. Typed accessors fall back to
//! built-in defaults when a key is missing or its value no longer parses, so a
//! damaged config file never blocks a session.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::Receiver;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use calmwave_types::{BreathingPattern, Voice, VoiceAudioSet};

use crate::events::EventBus;

pub const KEY_BREATHING_PATTERNS: &str = "breathing_patterns";
pub const KEY_VOICE_AUDIO_URLS: &str = "voice_audio_urls";
pub const KEY_BREATH_COUNT: &str = "breath_count";

/// Where the stock voice clips live.
pub const DEFAULT_VOICE_BASE_URL: &str = "https://cdn.calmwave.app/voices";

/// A key whose value was replaced.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub value: Value,
}

/// Shared key/value store observed by the engines and the CLI.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Changes made after this call.
    fn subscribe(&self) -> Receiver<StoreChange>;
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
    changes: EventBus<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?
            .insert(key.to_string(), value.clone());
        self.changes.emit(StoreChange {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn subscribe(&self) -> Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Store backed by one JSON object on disk. Every `set` rewrites the file.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
    changes: EventBus<StoreChange>,
}

impl JsonFileStore {
    /// Open `path`. A missing or empty file starts empty; an unreadable one is
    /// logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = load_values(&path)?;
        debug!(path = %path.display(), keys = values.len(), "config store opened");
        Ok(Self {
            path,
            values: Mutex::new(values),
            changes: EventBus::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(values).context("serialize config")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

fn load_values(path: &Path) -> Result<BTreeMap<String, Value>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    match serde_json::from_str(&raw) {
        Ok(values) => Ok(values),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "config file is not a JSON object; starting empty");
            Ok(BTreeMap::new())
        }
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        {
            let mut values = self
                .values
                .lock()
                .map_err(|_| anyhow!("store lock poisoned"))?;
            values.insert(key.to_string(), value.clone());
            self.persist(&values)?;
        }
        self.changes.emit(StoreChange {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn subscribe(&self) -> Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Read `key` as `T`, or `default()` when missing or malformed.
pub fn get_or<T: DeserializeOwned>(
    store: &dyn ConfigStore,
    key: &str,
    default: impl FnOnce() -> T,
) -> T {
    let Some(value) = store.get(key) else {
        return default();
    };
    match serde_json::from_value(value) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(key, error = %err, "malformed config value; using default");
            default()
        }
    }
}

pub fn set_json<T: Serialize>(store: &dyn ConfigStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value).with_context(|| format!("serialize {key}"))?;
    store.set(key, value)
}

pub fn breathing_patterns(store: &dyn ConfigStore) -> Vec<BreathingPattern> {
    let patterns: Vec<BreathingPattern> = get_or(store, KEY_BREATHING_PATTERNS, default_patterns);
    if patterns.is_empty() {
        return default_patterns();
    }
    patterns
}

pub fn find_pattern(store: &dyn ConfigStore, id: &str) -> Option<BreathingPattern> {
    breathing_patterns(store).into_iter().find(|p| p.id == id)
}

/// Insert or replace a pattern by id.
pub fn save_pattern(store: &dyn ConfigStore, pattern: BreathingPattern) -> Result<()> {
    let mut patterns = breathing_patterns(store);
    match patterns.iter_mut().find(|p| p.id == pattern.id) {
        Some(slot) => *slot = pattern,
        None => patterns.push(pattern),
    }
    set_json(store, KEY_BREATHING_PATTERNS, &patterns)
}

/// Remove a pattern. Returns whether it existed.
pub fn remove_pattern(store: &dyn ConfigStore, id: &str) -> Result<bool> {
    let mut patterns = breathing_patterns(store);
    let before = patterns.len();
    patterns.retain(|p| p.id != id);
    if patterns.len() == before {
        return Ok(false);
    }
    set_json(store, KEY_BREATHING_PATTERNS, &patterns)?;
    Ok(true)
}

/// Voice clips per voice, stock entries filled in for voices the store lacks.
pub fn voice_audio_urls(store: &dyn ConfigStore) -> BTreeMap<Voice, VoiceAudioSet> {
    let mut sets = default_voice_sets();
    let stored: BTreeMap<Voice, VoiceAudioSet> = get_or(store, KEY_VOICE_AUDIO_URLS, BTreeMap::new);
    sets.extend(stored);
    sets
}

pub fn voice_set(store: &dyn ConfigStore, voice: Voice) -> VoiceAudioSet {
    voice_audio_urls(store).remove(&voice).unwrap_or_default()
}

pub fn save_voice_set(store: &dyn ConfigStore, voice: Voice, set: VoiceAudioSet) -> Result<()> {
    let mut sets = voice_audio_urls(store);
    sets.insert(voice, set);
    set_json(store, KEY_VOICE_AUDIO_URLS, &sets)
}

pub fn breath_count(store: &dyn ConfigStore) -> u64 {
    get_or(store, KEY_BREATH_COUNT, || 0)
}

/// Add one completed cycle and return the new total.
pub fn increment_breath_count(store: &dyn ConfigStore) -> Result<u64> {
    let count = breath_count(store).saturating_add(1);
    set_json(store, KEY_BREATH_COUNT, &count)?;
    Ok(count)
}

pub fn default_patterns() -> Vec<BreathingPattern> {
    vec![
        BreathingPattern {
            id: "relax-478".to_string(),
            name: "4-7-8 Relaxing Breath".to_string(),
            description: Some("Slows the heart rate before sleep.".to_string()),
            inhale: 4,
            hold1: 7,
            exhale: 8,
            hold2: 0,
            cycles: 4,
            ..BreathingPattern::default()
        },
        BreathingPattern {
            id: "box".to_string(),
            name: "Box Breathing".to_string(),
            description: Some("Equal counts to steady attention.".to_string()),
            inhale: 4,
            hold1: 4,
            exhale: 4,
            hold2: 4,
            cycles: 5,
            ..BreathingPattern::default()
        },
        BreathingPattern {
            id: "coherent".to_string(),
            name: "Coherent Breathing".to_string(),
            description: Some("Five seconds in, five seconds out.".to_string()),
            inhale: 5,
            hold1: 0,
            exhale: 5,
            hold2: 0,
            cycles: 6,
            ..BreathingPattern::default()
        },
    ]
}

pub fn default_voice_sets() -> BTreeMap<Voice, VoiceAudioSet> {
    Voice::ALL
        .into_iter()
        .map(|voice| {
            let clip = |name: &str| format!("{DEFAULT_VOICE_BASE_URL}/{}/{name}.mp3", voice.name());
            let set = VoiceAudioSet {
                inhale: clip("inhale"),
                hold: clip("hold"),
                exhale: clip("exhale"),
            };
            (voice, set)
        })
        .collect()
}
