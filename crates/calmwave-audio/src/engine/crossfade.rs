use std::time::{Duration, Instant};

use super::state::PlaybackState;

/// Crossfade progress for the current track window.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum CrossfadePhase {
    /// Not triggered yet for this track.
    Idle,
    /// The next URL is loading into the standby sink at volume 0. `ready` is set
    /// when it can play but the engine was paused at that moment.
    Loading {
        generation: u64,
        next_url: String,
        ready: bool,
    },
    /// Both sinks are playing and the volumes are ramping.
    Ramping {
        generation: u64,
        next_url: String,
        start_pos: f64,
        end_pos: f64,
        next_tick: Instant,
    },
    /// Already attempted for this track; never retriggers.
    Spent,
}

/// One-shot crossfade controller. The ramp follows the outgoing play-head, so
/// pausing mid-fade freezes it instead of jumping.
#[derive(Debug)]
pub(crate) struct Crossfade {
    phase: CrossfadePhase,
    window: f64,
    tick: Duration,
}

impl Crossfade {
    pub fn new(window: Duration, tick: Duration) -> Self {
        Self {
            phase: CrossfadePhase::Idle,
            window: window.as_secs_f64(),
            tick,
        }
    }

    pub fn phase(&self) -> &CrossfadePhase {
        &self.phase
    }

    pub fn in_flight(&self) -> bool {
        matches!(
            self.phase,
            CrossfadePhase::Loading { .. } | CrossfadePhase::Ramping { .. }
        )
    }

    /// Whether the near-end window was entered and a fade may begin.
    pub fn should_start(&self, state: &PlaybackState, has_next: bool) -> bool {
        self.phase == CrossfadePhase::Idle
            && has_next
            && state.is_playing
            && state.is_loaded
            && !state.is_live_stream
            && !state.is_looping
            && state.duration > self.window
            && state.duration - state.current_time <= self.window
    }

    pub fn begin(&mut self, generation: u64, next_url: String) {
        self.phase = CrossfadePhase::Loading {
            generation,
            next_url,
            ready: false,
        };
    }

    /// Generation of the standby load, while one is in flight.
    pub fn generation(&self) -> Option<u64> {
        match &self.phase {
            CrossfadePhase::Loading { generation, .. }
            | CrossfadePhase::Ramping { generation, .. } => Some(*generation),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, CrossfadePhase::Loading { .. })
    }

    /// Remember that the incoming source is buffered while playback is paused.
    pub fn mark_ready(&mut self) {
        if let CrossfadePhase::Loading { ready, .. } = &mut self.phase {
            *ready = true;
        }
    }

    /// Incoming source buffered and waiting for playback to resume.
    pub fn is_waiting(&self) -> bool {
        matches!(self.phase, CrossfadePhase::Loading { ready: true, .. })
    }

    /// The incoming source started; ramp over what is left of the outgoing one.
    pub fn start_ramp(&mut self, current_time: f64, duration: f64, now: Instant) {
        if let CrossfadePhase::Loading {
            generation,
            next_url,
            ..
        } = std::mem::replace(&mut self.phase, CrossfadePhase::Spent)
        {
            self.phase = CrossfadePhase::Ramping {
                generation,
                next_url,
                start_pos: current_time,
                end_pos: duration.max(current_time),
                next_tick: now,
            };
        }
    }

    /// Ramp progress in `[0, 1]` when a tick is due, `None` otherwise.
    pub fn sample(&mut self, position: f64, now: Instant) -> Option<f64> {
        let tick = self.tick;
        let CrossfadePhase::Ramping {
            start_pos,
            end_pos,
            next_tick,
            ..
        } = &mut self.phase
        else {
            return None;
        };
        if now < *next_tick {
            return None;
        }
        *next_tick = now + tick;
        let span = *end_pos - *start_pos;
        if span <= f64::EPSILON {
            return Some(1.0);
        }
        Some(((position - *start_pos) / span).clamp(0.0, 1.0))
    }

    /// Finish the fade and hand back the incoming URL and generation.
    pub fn complete(&mut self) -> Option<(String, u64)> {
        match std::mem::replace(&mut self.phase, CrossfadePhase::Idle) {
            CrossfadePhase::Ramping {
                generation,
                next_url,
                ..
            } => Some((next_url, generation)),
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// Give up on this window without retriggering.
    pub fn abandon(&mut self) {
        self.phase = CrossfadePhase::Spent;
    }

    /// New track window.
    pub fn reset(&mut self) {
        self.phase = CrossfadePhase::Idle;
    }
}

/// Linear gains `(outgoing, incoming)` for `progress` at listener volume `volume`.
pub(crate) fn ramp_gains(progress: f64, volume: f32) -> (f32, f32) {
    let p = progress.clamp(0.0, 1.0) as f32;
    (volume * (1.0 - p), volume * p)
}
