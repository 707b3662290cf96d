//! Shared data model for calmwave.
//!
//! In-memory models serialize with camelCase keys (the local persisted form).
//! Catalog rows use the snake_case column names of the hosted tables; every model
//! has a lossless conversion to and from its row type.

use serde::{Deserialize, Serialize};

mod catalog;

pub use catalog::{
    BreathingPatternRow, Meditation, MeditationRow, RadioStream, RadioStreamRow, Soundscape,
    SoundscapeRow, Table,
};

/// A piece of audio handed to the playback engine for one session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayableTrack {
    /// Catalog id of the source row.
    pub id: String,
    /// Primary audio URL (normalized by the engine before use).
    pub audio_url: String,
    /// Display title.
    pub title: String,
    /// Optional follow-up track the engine crossfades into near the end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_audio_url: Option<String>,
}

impl PlayableTrack {
    pub fn new(id: impl Into<String>, audio_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            audio_url: audio_url.into(),
            title: title.into(),
            next_audio_url: None,
        }
    }

    pub fn with_next(mut self, next_audio_url: impl Into<String>) -> Self {
        self.next_audio_url = Some(next_audio_url.into());
        self
    }
}

/// One phase of a breathing cycle.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BreathingPhase {
    /// Idle, before the first inhale or after a reset.
    #[default]
    Rest,
    Inhale,
    Hold1,
    Exhale,
    Hold2,
}

impl BreathingPhase {
    /// Human-readable label used by status output.
    pub fn label(self) -> &'static str {
        match self {
            BreathingPhase::Rest => "rest",
            BreathingPhase::Inhale => "inhale",
            BreathingPhase::Hold1 => "hold",
            BreathingPhase::Exhale => "exhale",
            BreathingPhase::Hold2 => "hold",
        }
    }
}

/// Named voice-over guide.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Vera,
    Marco,
}

impl Voice {
    pub const ALL: [Voice; 2] = [Voice::Vera, Voice::Marco];

    pub fn name(self) -> &'static str {
        match self {
            Voice::Vera => "vera",
            Voice::Marco => "marco",
        }
    }

    /// Parse a voice name (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vera" => Some(Voice::Vera),
            "marco" => Some(Voice::Marco),
            _ => None,
        }
    }
}

/// Phase clips recorded by one voice. `hold` is used for both hold phases.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceAudioSet {
    #[serde(default)]
    pub inhale: String,
    #[serde(default)]
    pub hold: String,
    #[serde(default)]
    pub exhale: String,
}

impl VoiceAudioSet {
    /// URL for the clip announcing `phase`, if the phase has one.
    pub fn url_for(&self, phase: BreathingPhase) -> Option<&str> {
        let url = match phase {
            BreathingPhase::Inhale => &self.inhale,
            BreathingPhase::Hold1 | BreathingPhase::Hold2 => &self.hold,
            BreathingPhase::Exhale => &self.exhale,
            BreathingPhase::Rest => return None,
        };
        Some(url.as_str())
    }

    /// Required phase clips paired with their phase, in playback order.
    pub fn required(&self) -> [(BreathingPhase, &str); 3] {
        [
            (BreathingPhase::Inhale, self.inhale.as_str()),
            (BreathingPhase::Hold1, self.hold.as_str()),
            (BreathingPhase::Exhale, self.exhale.as_str()),
        ]
    }

    /// Phases whose clip URL is blank.
    pub fn missing(&self) -> Vec<BreathingPhase> {
        self.required()
            .into_iter()
            .filter(|(_, url)| url.trim().is_empty())
            .map(|(phase, _)| phase)
            .collect()
    }
}

/// Breathing exercise configuration. Durations are whole seconds.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreathingPattern {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub inhale: u32,
    pub hold1: u32,
    pub exhale: u32,
    #[serde(default)]
    pub hold2: u32,
    pub cycles: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inhale_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhale_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inhale_audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhale_audio_url: Option<String>,
}

impl BreathingPattern {
    /// Configured seconds for `phase` (`Rest` is always 0).
    pub fn seconds(&self, phase: BreathingPhase) -> u32 {
        match phase {
            BreathingPhase::Rest => 0,
            BreathingPhase::Inhale => self.inhale,
            BreathingPhase::Hold1 => self.hold1,
            BreathingPhase::Exhale => self.exhale,
            BreathingPhase::Hold2 => self.hold2,
        }
    }

    /// Instruction text for `phase`, falling back to the phase label.
    pub fn text(&self, phase: BreathingPhase) -> &str {
        let text = match phase {
            BreathingPhase::Inhale => self.inhale_text.as_deref(),
            BreathingPhase::Hold1 | BreathingPhase::Hold2 => self.hold_text.as_deref(),
            BreathingPhase::Exhale => self.exhale_text.as_deref(),
            BreathingPhase::Rest => None,
        };
        text.filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| phase.label())
    }

    /// Seconds in one full cycle.
    pub fn cycle_seconds(&self) -> u32 {
        self.inhale + self.hold1 + self.exhale + self.hold2
    }
}

/// Snapshot of a breathing session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreathingSessionState {
    pub is_active: bool,
    pub current_phase: BreathingPhase,
    /// 1-based, never above the pattern's cycle count.
    pub current_cycle: u32,
    pub seconds_left: u32,
    pub active_voice: Option<Voice>,
}

impl Default for BreathingSessionState {
    fn default() -> Self {
        Self {
            is_active: false,
            current_phase: BreathingPhase::Rest,
            current_cycle: 1,
            seconds_left: 0,
            active_voice: None,
        }
    }
}
