//! Typed engine events and a small fan-out bus.
//!
//! Subscribers get their own unbounded crossbeam receiver; dropped receivers are
//! pruned on the next emit.

use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use calmwave_types::{BreathingPhase, Voice};

use crate::engine::PlaybackState;
use crate::error::{PlaybackFault, VoiceFault};

/// Events published by the playback engine.
#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEvent {
    StateChanged(PlaybackState),
    LoadFailed {
        url: Option<String>,
        fault: PlaybackFault,
    },
    /// Autoplay policy refused to start; needs a user gesture.
    Blocked,
    RetryScheduled {
        attempt: u32,
        delay: Duration,
    },
    CrossfadeStarted {
        next_url: String,
    },
    /// The current track finished. Fired once per track.
    TrackEnded {
        crossfaded: bool,
    },
}

/// Events published by the breathing session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BreathingEvent {
    PhaseChanged {
        phase: BreathingPhase,
        cycle: u32,
        seconds_left: u32,
    },
    CycleCompleted {
        cycle: u32,
    },
    /// Final cycle finished. Fired once per run.
    Completed {
        pattern_id: String,
        cycles: u32,
    },
    Reset,
    VoiceActivated(Voice),
    VoiceStopped(Voice),
    VoiceRejected {
        voice: Voice,
        fault: VoiceFault,
    },
}

pub struct EventBus<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn emit(&self, event: T) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
