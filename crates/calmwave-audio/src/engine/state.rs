use crate::error::PlaybackFault;

/// Snapshot of the playback engine, published on every change.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    /// Play-head in seconds.
    pub current_time: f64,
    /// Track length in seconds; 0 while unknown or for live sources.
    pub duration: f64,
    /// Requested volume in `[0, 1]`, independent of mute.
    pub volume: f32,
    pub muted: bool,
    pub is_looping: bool,
    pub is_loaded: bool,
    pub load_error: bool,
    pub is_retrying: bool,
    pub is_crossfading: bool,
    pub is_live_stream: bool,
    /// Autoplay policy refused `play`; a user gesture is needed.
    pub playback_blocked: bool,
    pub last_fault: Option<PlaybackFault>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            muted: false,
            is_looping: false,
            is_loaded: false,
            load_error: false,
            is_retrying: false,
            is_crossfading: false,
            is_live_stream: false,
            playback_blocked: false,
            last_fault: None,
        }
    }
}

impl PlaybackState {
    /// Clear everything tied to the previous source. Volume, mute and loop are
    /// listener preferences and carry over.
    pub fn reset_for_source(&mut self) {
        *self = Self {
            volume: self.volume,
            muted: self.muted,
            is_looping: self.is_looping,
            ..Self::default()
        };
    }

    /// Gain the active sink should run at.
    pub fn effective_volume(&self) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }

    pub fn remaining(&self) -> f64 {
        (self.duration - self.current_time).max(0.0)
    }
}

/// Clamp a requested volume into `[0, 1]`. NaN maps to silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_listener_preferences() {
        let mut state = PlaybackState {
            volume: 0.4,
            muted: true,
            is_looping: true,
            is_playing: true,
            load_error: true,
            current_time: 12.0,
            last_fault: Some(PlaybackFault::PlaybackBlocked),
            ..PlaybackState::default()
        };
        state.reset_for_source();
        assert_eq!(state.volume, 0.4);
        assert!(state.muted);
        assert!(state.is_looping);
        assert!(!state.is_playing);
        assert!(!state.load_error);
        assert_eq!(state.current_time, 0.0);
        assert!(state.last_fault.is_none());
    }

    #[test]
    fn clamp_volume_bounds() {
        for (input, expected) in [(-3.0, 0.0), (0.25, 0.25), (1.0, 1.0), (7.5, 1.0), (f32::NAN, 0.0)] {
            assert_eq!(clamp_volume(input), expected, "input {input}");
        }
        assert_eq!(clamp_volume(f32::INFINITY), 1.0);
        assert_eq!(clamp_volume(f32::NEG_INFINITY), 0.0);
    }

    #[test]
    fn muted_state_has_zero_effective_volume() {
        let state = PlaybackState {
            volume: 0.8,
            muted: true,
            ..PlaybackState::default()
        };
        assert_eq!(state.effective_volume(), 0.0);
    }
}
