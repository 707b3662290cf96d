//! Event loop shared by the long-running subcommands.
//!
//! The engines never spawn threads of their own; this loop multiplexes the backend's
//! media and probe channels and ticks the engines between messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, select};

use calmwave_audio::media::{MediaEnvelope, ProbeOutcome};

/// Upper bound between two polls when no message arrives.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub enum Input {
    Media(MediaEnvelope),
    Probe(ProbeOutcome),
    Tick,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// Run `step` for every input until it returns [`Flow::Done`] or `stop` is raised.
pub fn run(
    media: &Receiver<MediaEnvelope>,
    probes: &Receiver<ProbeOutcome>,
    stop: &AtomicBool,
    mut step: impl FnMut(Input, Instant) -> Result<Flow>,
) -> Result<()> {
    while !stop.load(Ordering::Relaxed) {
        let input = select! {
            recv(media) -> msg => msg.map(Input::Media).unwrap_or(Input::Tick),
            recv(probes) -> msg => msg.map(Input::Probe).unwrap_or(Input::Tick),
            default(POLL_INTERVAL) => Input::Tick,
        };
        if step(input, Instant::now())? == Flow::Done {
            return Ok(());
        }
    }
    tracing::info!("interrupted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmwave_audio::media::{MediaEvent, SinkId};

    #[test]
    fn messages_are_delivered_until_done() {
        let (media_tx, media_rx) = crossbeam_channel::unbounded();
        let (probe_tx, probe_rx) = crossbeam_channel::unbounded();
        media_tx
            .send(MediaEnvelope::new(SinkId(1), 7, MediaEvent::CanPlay))
            .unwrap();
        probe_tx
            .send(ProbeOutcome {
                request_id: 3,
                playable: true,
            })
            .unwrap();

        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();
        run(&media_rx, &probe_rx, &stop, |input, _| {
            match input {
                Input::Media(env) => seen.push(env.generation),
                Input::Probe(outcome) => seen.push(outcome.request_id),
                Input::Tick => {}
            }
            Ok(if seen.len() == 2 { Flow::Done } else { Flow::Continue })
        })
        .unwrap();
        seen.sort();
        assert_eq!(seen, vec![3, 7]);
    }

    #[test]
    fn stop_flag_ends_the_loop() {
        let (_media_tx, media_rx) = crossbeam_channel::unbounded::<MediaEnvelope>();
        let (_probe_tx, probe_rx) = crossbeam_channel::unbounded::<ProbeOutcome>();
        let stop = AtomicBool::new(false);
        let mut ticks = 0;
        run(&media_rx, &probe_rx, &stop, |input, _| {
            if matches!(input, Input::Tick) {
                ticks += 1;
                stop.store(true, Ordering::Relaxed);
            }
            Ok(Flow::Continue)
        })
        .unwrap();
        assert_eq!(ticks, 1);
    }

    #[test]
    fn step_errors_propagate() {
        let (_media_tx, media_rx) = crossbeam_channel::unbounded::<MediaEnvelope>();
        let (_probe_tx, probe_rx) = crossbeam_channel::unbounded::<ProbeOutcome>();
        let stop = AtomicBool::new(false);
        let result = run(&media_rx, &probe_rx, &stop, |_, _| Err(anyhow::anyhow!("boom")));
        assert!(result.is_err());
    }
}
