//! Breathing exercise: a cyclic phase timer and the session that couples it to
//! voice-over clips and the persisted breath count.

mod session;
mod timer;

pub use session::BreathingSession;
pub use timer::{BreathingTimer, PhaseMode, phase_sequence};
