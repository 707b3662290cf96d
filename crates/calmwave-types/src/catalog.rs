use serde::{Deserialize, Serialize};

use crate::{BreathingPattern, PlayableTrack};

/// Hosted tables consumed by the audio core.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Meditations,
    Soundscapes,
    BreathingPatterns,
    RadioStreams,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Meditations,
        Table::Soundscapes,
        Table::BreathingPatterns,
        Table::RadioStreams,
    ];

    /// Table name on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Table::Meditations => "meditations",
            Table::Soundscapes => "soundscapes",
            Table::BreathingPatterns => "breathing_patterns",
            Table::RadioStreams => "radio_streams",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Table::ALL
            .into_iter()
            .find(|t| t.name() == raw.trim().replace('-', "_"))
    }
}

/// Guided meditation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Meditation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub audio_url: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    /// Length in seconds as stored by the catalog.
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
}

/// `meditations` table row.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeditationRow {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub audio_url: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
}

impl From<MeditationRow> for Meditation {
    fn from(row: MeditationRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            audio_url: row.audio_url,
            cover_image_url: row.cover_image_url,
            duration: row.duration,
            category: row.category,
        }
    }
}

impl From<Meditation> for MeditationRow {
    fn from(m: Meditation) -> Self {
        Self {
            id: m.id,
            title: m.title,
            description: m.description,
            audio_url: m.audio_url,
            cover_image_url: m.cover_image_url,
            duration: m.duration,
            category: m.category,
        }
    }
}

impl From<&Meditation> for PlayableTrack {
    fn from(m: &Meditation) -> Self {
        PlayableTrack::new(m.id.clone(), m.audio_url.clone(), m.title.clone())
    }
}

/// Ambient soundscape loop.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Soundscape {
    pub id: String,
    pub title: String,
    pub audio_url: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// `soundscapes` table row.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SoundscapeRow {
    pub id: String,
    pub title: String,
    pub audio_url: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl From<SoundscapeRow> for Soundscape {
    fn from(row: SoundscapeRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            audio_url: row.audio_url,
            cover_image_url: row.cover_image_url,
            category: row.category,
        }
    }
}

impl From<Soundscape> for SoundscapeRow {
    fn from(s: Soundscape) -> Self {
        Self {
            id: s.id,
            title: s.title,
            audio_url: s.audio_url,
            cover_image_url: s.cover_image_url,
            category: s.category,
        }
    }
}

impl From<&Soundscape> for PlayableTrack {
    fn from(s: &Soundscape) -> Self {
        PlayableTrack::new(s.id.clone(), s.audio_url.clone(), s.title.clone())
    }
}

/// Internet radio station.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RadioStream {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

/// `radio_streams` table row.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RadioStreamRow {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

impl From<RadioStreamRow> for RadioStream {
    fn from(row: RadioStreamRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            stream_url: row.stream_url,
            cover_image_url: row.cover_image_url,
            genre: row.genre,
        }
    }
}

impl From<RadioStream> for RadioStreamRow {
    fn from(r: RadioStream) -> Self {
        Self {
            id: r.id,
            name: r.name,
            stream_url: r.stream_url,
            cover_image_url: r.cover_image_url,
            genre: r.genre,
        }
    }
}

impl From<&RadioStream> for PlayableTrack {
    fn from(r: &RadioStream) -> Self {
        PlayableTrack::new(r.id.clone(), r.stream_url.clone(), r.name.clone())
    }
}

/// `breathing_patterns` table row.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreathingPatternRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub inhale: u32,
    pub hold1: u32,
    pub exhale: u32,
    #[serde(default)]
    pub hold2: u32,
    pub cycles: u32,
    #[serde(default)]
    pub inhale_text: Option<String>,
    #[serde(default)]
    pub hold_text: Option<String>,
    #[serde(default)]
    pub exhale_text: Option<String>,
    #[serde(default)]
    pub inhale_audio_url: Option<String>,
    #[serde(default)]
    pub hold_audio_url: Option<String>,
    #[serde(default)]
    pub exhale_audio_url: Option<String>,
}

impl From<BreathingPatternRow> for BreathingPattern {
    fn from(row: BreathingPatternRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            inhale: row.inhale,
            hold1: row.hold1,
            exhale: row.exhale,
            hold2: row.hold2,
            cycles: row.cycles,
            inhale_text: row.inhale_text,
            hold_text: row.hold_text,
            exhale_text: row.exhale_text,
            inhale_audio_url: row.inhale_audio_url,
            hold_audio_url: row.hold_audio_url,
            exhale_audio_url: row.exhale_audio_url,
        }
    }
}

impl From<BreathingPattern> for BreathingPatternRow {
    fn from(p: BreathingPattern) -> Self {
        Self {
            id: p.id,
            name: p.name,
            description: p.description,
            inhale: p.inhale,
            hold1: p.hold1,
            exhale: p.exhale,
            hold2: p.hold2,
            cycles: p.cycles,
            inhale_text: p.inhale_text,
            hold_text: p.hold_text,
            exhale_text: p.exhale_text,
            inhale_audio_url: p.inhale_audio_url,
            hold_audio_url: p.hold_audio_url,
            exhale_audio_url: p.exhale_audio_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meditation_row_json() -> serde_json::Value {
        serde_json::json!({
            "id": "m-1",
            "title": "Morning Calm",
            "description": "Ten minutes",
            "audio_url": "https://cdn.example/med.mp3",
            "cover_image_url": "https://cdn.example/med.jpg",
            "duration": 600,
            "category": "sleep"
        })
    }

    #[test]
    fn meditation_row_maps_to_camel_case_model() {
        let row: MeditationRow = serde_json::from_value(meditation_row_json()).unwrap();
        let model = Meditation::from(row);
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["audioUrl"], "https://cdn.example/med.mp3");
        assert_eq!(json["coverImageUrl"], "https://cdn.example/med.jpg");
        assert!(json.get("audio_url").is_none());
    }

    #[test]
    fn meditation_mapping_is_lossless_both_ways() {
        let row: MeditationRow = serde_json::from_value(meditation_row_json()).unwrap();
        let back = MeditationRow::from(Meditation::from(row.clone()));
        assert_eq!(back, row);
        assert_eq!(serde_json::to_value(&back).unwrap(), meditation_row_json());
    }

    #[test]
    fn breathing_row_roundtrip_keeps_optional_fields() {
        let row = BreathingPatternRow {
            id: "box".to_string(),
            name: "Box".to_string(),
            inhale: 4,
            hold1: 4,
            exhale: 4,
            hold2: 4,
            cycles: 5,
            hold_text: Some("Hold".to_string()),
            exhale_audio_url: Some("https://cdn.example/out.mp3".to_string()),
            ..BreathingPatternRow::default()
        };
        let model = BreathingPattern::from(row.clone());
        assert_eq!(model.hold2, 4);
        assert_eq!(BreathingPatternRow::from(model), row);
    }

    #[test]
    fn radio_stream_becomes_playable_track() {
        let radio = RadioStream {
            id: "r1".to_string(),
            name: "Calm FM".to_string(),
            stream_url: "https://radio.example/live".to_string(),
            ..RadioStream::default()
        };
        let track = PlayableTrack::from(&radio);
        assert_eq!(track.audio_url, "https://radio.example/live");
        assert_eq!(track.title, "Calm FM");
        assert!(track.next_audio_url.is_none());
    }

    #[test]
    fn table_parse_accepts_dashes() {
        assert_eq!(Table::parse("radio-streams"), Some(Table::RadioStreams));
        assert_eq!(Table::parse("meditations"), Some(Table::Meditations));
        assert_eq!(Table::parse("users"), None);
    }
}
