//! calmwave audio core.
//!
//! Three engines sit on top of small platform capabilities:
//! - [`engine::PlaybackEngine`] drives one [`media::MediaSink`] through load, probe,
//!   retry, loop correction and crossfade.
//! - [`effects::EffectsGraph`] is the optional EQ/compressor/reverb chain bound to a sink.
//! - [`breathing::BreathingSession`] runs the breathing timer and its voice-over clips.
//!
//! The engines are single-threaded state machines. Callers feed them media envelopes,
//! probe outcomes and a periodic `poll(now)`; the [`native`] backend does that with CPAL.

pub mod breathing;
pub mod catalog;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod native;
pub mod notify;
pub mod store;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

pub use calmwave_types as types;
