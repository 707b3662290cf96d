use std::time::Duration;

use crate::breathing::PhaseMode;

/// Timing knobs for the playback engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound for a preload probe before the source counts as unplayable.
    pub preload_timeout: Duration,
    /// Remaining time at which the crossfade into the next track starts.
    pub crossfade_window: Duration,
    /// Volume ramp sampling interval while crossfading.
    pub ramp_tick: Duration,
    /// Distance from the end at which a looping track is rewound.
    pub loop_threshold: Duration,
    /// Consecutive load failures after which automatic retries stop.
    pub max_auto_retries: u32,
    /// First automatic retry delay (doubles per failure).
    pub retry_base_delay: Duration,
    /// Cap for the automatic retry delay.
    pub retry_max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preload_timeout: Duration::from_secs(8),
            crossfade_window: Duration::from_secs(5),
            ramp_tick: Duration::from_millis(100),
            loop_threshold: Duration::from_millis(200),
            max_auto_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(8),
        }
    }
}

/// Breathing session settings.
#[derive(Clone, Debug)]
pub struct BreathingConfig {
    pub mode: PhaseMode,
    /// Upper bound for validating all voice clips of one voice.
    pub voice_probe_timeout: Duration,
}

impl Default for BreathingConfig {
    fn default() -> Self {
        Self {
            mode: PhaseMode::FourPhase,
            voice_probe_timeout: Duration::from_secs(8),
        }
    }
}

/// Tuning parameters for the native decode/resample/output stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Decoded audio buffered ahead of the output callback, in seconds.
    pub buffer_seconds: f32,
    /// Connect/response timeout for network sources.
    pub fetch_timeout: Duration,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            buffer_seconds: 2.0,
            fetch_timeout: Duration::from_secs(8),
        }
    }
}
