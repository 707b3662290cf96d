//! `calmwave breathe`: a breathing session with optional voice-over.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use calmwave_audio::breathing::{BreathingSession, PhaseMode};
use calmwave_audio::events::BreathingEvent;
use calmwave_audio::native::NativeBackend;
use calmwave_audio::notify::TracingNotifier;
use calmwave_audio::store::{self, ConfigStore};
use calmwave_types::{BreathingPattern, BreathingPhase};

use crate::cli::BreatheArgs;
use crate::config::AppConfig;
use crate::manage::parse_voice;
use crate::runtime::{self, Flow, Input};

pub fn run(
    args: &BreatheArgs,
    cfg: &AppConfig,
    store: Arc<dyn ConfigStore>,
    backend: &NativeBackend,
    stop: &AtomicBool,
) -> Result<()> {
    let mut pattern = store::find_pattern(store.as_ref(), &args.pattern)
        .ok_or_else(|| anyhow!("no breathing pattern with id {:?}", args.pattern))?;
    if let Some(cycles) = args.cycles {
        pattern.cycles = cycles;
    }
    let voice = args.voice.as_deref().map(parse_voice).transpose()?;

    let mut config = cfg.breathing_config();
    if args.three_phase {
        config.mode = PhaseMode::ThreePhase;
    }

    let mut session = BreathingSession::new(
        pattern.clone(),
        Box::new(backend.sink()?),
        Box::new(backend.probe()),
        store.clone(),
        Arc::new(TracingNotifier),
        config,
    )?;
    let events = session.subscribe();

    println!(
        "{}: {} cycles of {}s",
        pattern.name,
        pattern.cycles,
        pattern.cycle_seconds()
    );
    let now = Instant::now();
    match voice {
        // Starts once every clip of the voice has been validated.
        Some(voice) => session.activate_voice(voice, now),
        None => session.start(now),
    }

    let media = backend.media_events();
    let probes = backend.probe_outcomes();
    let result = runtime::run(&media, &probes, stop, |input, now| {
        match input {
            Input::Media(envelope) => session.handle_media_event(envelope),
            Input::Probe(outcome) => session.handle_probe_outcome(outcome, now),
            Input::Tick => {}
        }
        session.poll(now);

        for event in events.try_iter() {
            match event {
                BreathingEvent::PhaseChanged {
                    phase,
                    cycle,
                    seconds_left,
                } => println!("{}", phase_line(&pattern, phase, cycle, seconds_left)),
                BreathingEvent::CycleCompleted { cycle } => info!(cycle, "cycle completed"),
                BreathingEvent::Completed { cycles, .. } => {
                    println!("Complete: {cycles} cycles");
                    return Ok(Flow::Done);
                }
                BreathingEvent::VoiceActivated(voice) => info!(voice = voice.name(), "voice active"),
                BreathingEvent::VoiceRejected { fault, .. } => {
                    warn!(%fault, "continuing without voice");
                    session.start(now);
                }
                BreathingEvent::VoiceStopped(_) | BreathingEvent::Reset => {}
            }
        }
        Ok(Flow::Continue)
    });

    session.reset();
    println!("Total breaths: {}", store::breath_count(store.as_ref()));
    result
}

fn phase_line(pattern: &BreathingPattern, phase: BreathingPhase, cycle: u32, seconds: u32) -> String {
    format!(
        "[{cycle}/{}] {:<7} {seconds:>2}s  {}",
        pattern.cycles,
        phase.label(),
        pattern.text(phase)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_line_shows_cycle_and_text() {
        let mut pattern = store::default_patterns()[0].clone();
        pattern.inhale_text = Some("Breathe in slowly".to_string());
        let line = phase_line(&pattern, BreathingPhase::Inhale, 2, 4);
        assert!(line.starts_with("[2/4]"), "{line}");
        assert!(line.ends_with("Breathe in slowly"), "{line}");
    }
}
