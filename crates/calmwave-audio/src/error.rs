//! Fault taxonomy for the engines.
//!
//! Faults are values, not propagated errors: the engines record them in their state,
//! publish them as events and pass a message to the notifier.

use thiserror::Error;

use calmwave_types::{BreathingPhase, Voice};

/// Why a source could not be played.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackFault {
    #[error("Invalid audio URL: {0:?}")]
    InvalidUrl(String),

    #[error("Audio could not be loaded: {0}")]
    LoadFailure(String),

    /// The platform refused to start audio without a user gesture.
    #[error("Playback was blocked; press play to start audio")]
    PlaybackBlocked,
}

impl PlaybackFault {
    /// Whether an automatic retry could help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlaybackFault::LoadFailure(_))
    }
}

/// Why a voice could not be activated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceFault {
    #[error("Missing {} audio for voice {}", phase_list(.phases), .voice.name())]
    MissingVoiceAssets {
        voice: Voice,
        phases: Vec<BreathingPhase>,
    },

    #[error("Voice {} audio could not be loaded: {url}", .voice.name())]
    InvalidVoiceAudio { voice: Voice, url: String },
}

/// Rejected breathing pattern configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern {0:?} has no cycles")]
    NoCycles(String),

    #[error("pattern {0:?} has no phase with a non-zero duration")]
    EmptyCycle(String),
}

fn phase_list(phases: &[BreathingPhase]) -> String {
    phases
        .iter()
        .map(|p| p.label())
        .collect::<Vec<_>>()
        .join("/")
}
