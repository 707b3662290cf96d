//! Platform capabilities consumed by the engines.
//!
//! A [`MediaSink`] is one playable output slot (the native backend wraps a CPAL stream,
//! tests use a fake). Lifecycle notifications come back asynchronously as
//! [`MediaEnvelope`]s tagged with the sink id and the generation passed to `load`, so the
//! engines can drop results that belong to a superseded request.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use thiserror::Error;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);
static NEXT_SINK_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-wide, strictly increasing request generation.
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Identity of one media sink, stable for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub u32);

impl SinkId {
    /// Allocate a fresh id for a new sink.
    pub fn allocate() -> Self {
        SinkId(NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaEvent {
    /// Enough data is buffered to start.
    CanPlay,
    /// The whole source is expected to play without stalling.
    CanPlayThrough,
    /// Playback reached the natural end of the source.
    Ended,
    /// Fetch or decode failed.
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaEnvelope {
    pub sink: SinkId,
    pub generation: u64,
    pub event: MediaEvent,
}

impl MediaEnvelope {
    pub fn new(sink: SinkId, generation: u64, event: MediaEvent) -> Self {
        Self {
            sink,
            generation,
            event,
        }
    }
}

/// Why `play` refused to start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayError {
    /// The platform requires a user gesture first.
    #[error("playback blocked by autoplay policy")]
    Blocked,
    #[error("playback failed: {0}")]
    Failed(String),
}

/// One output slot the playback engine can drive.
pub trait MediaSink {
    fn id(&self) -> SinkId;

    /// Start loading `url`. Lifecycle events for it carry `generation`.
    fn load(&mut self, url: &str, generation: u64);

    /// Stop and drop the current source. No further events are sent for it.
    fn clear(&mut self);

    fn play(&mut self) -> Result<(), PlayError>;

    fn pause(&mut self);

    /// Move the play-head, in seconds.
    fn seek(&mut self, seconds: f64);

    /// Output gain in `[0, 1]`.
    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    /// Current play-head in seconds.
    fn position(&self) -> f64;

    /// Total length in seconds once known. `f64::INFINITY` marks a live source.
    fn duration(&self) -> Option<f64>;
}

/// Result of a preload probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub request_id: u64,
    pub playable: bool,
}

/// Non-playing check that a URL can be fetched and decoded.
///
/// Implementations answer later with a [`ProbeOutcome`] carrying the same
/// `request_id`; the caller owns the timeout.
pub trait MediaProbe {
    fn probe(&mut self, url: &str, request_id: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_increase() {
        let a = next_generation();
        let b = next_generation();
        assert!(b > a);
    }

    #[test]
    fn sink_ids_are_unique() {
        let a = SinkId::allocate();
        let b = SinkId::allocate();
        assert_ne!(a, b);
        assert_eq!(SinkId(7).to_string(), "sink#7");
    }
}
