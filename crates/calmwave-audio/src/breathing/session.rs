use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info, trace, warn};

use calmwave_types::{BreathingPattern, BreathingPhase, BreathingSessionState, Voice};

use crate::config::BreathingConfig;
use crate::error::{PatternError, PlaybackFault, VoiceFault};
use crate::events::{BreathingEvent, EventBus};
use crate::media::{
    MediaEnvelope, MediaEvent, MediaProbe, MediaSink, PlayError, ProbeOutcome, next_generation,
};
use crate::notify::{NoticeKind, Notifier};
use crate::store::{self, ConfigStore};
use crate::url::normalize_url;

use super::timer::BreathingTimer;

const TICK: Duration = Duration::from_secs(1);

/// Voice clips waiting for their probe verdicts.
struct VoiceCheck {
    voice: Voice,
    /// request id -> normalized clip URL
    pending: HashMap<u64, String>,
    deadline: Instant,
}

/// Breathing timer plus voice-over playback and persisted cycle count.
pub struct BreathingSession {
    timer: BreathingTimer,
    config: BreathingConfig,
    voice_sink: Box<dyn MediaSink>,
    prober: Box<dyn MediaProbe>,
    store: Arc<dyn ConfigStore>,
    notifier: Arc<dyn Notifier>,
    events: EventBus<BreathingEvent>,
    check: Option<VoiceCheck>,
    next_tick: Option<Instant>,
    clip_generation: Option<u64>,
    blocked_notified: bool,
}

impl BreathingSession {
    pub fn new(
        pattern: BreathingPattern,
        voice_sink: Box<dyn MediaSink>,
        prober: Box<dyn MediaProbe>,
        store: Arc<dyn ConfigStore>,
        notifier: Arc<dyn Notifier>,
        config: BreathingConfig,
    ) -> Result<Self, PatternError> {
        let timer = BreathingTimer::new(pattern, config.mode)?;
        Ok(Self {
            timer,
            config,
            voice_sink,
            prober,
            store,
            notifier,
            events: EventBus::new(),
            check: None,
            next_tick: None,
            clip_generation: None,
            blocked_notified: false,
        })
    }

    pub fn state(&self) -> &BreathingSessionState {
        self.timer.state()
    }

    pub fn pattern(&self) -> &BreathingPattern {
        self.timer.pattern()
    }

    pub fn timer(&self) -> &BreathingTimer {
        &self.timer
    }

    pub fn subscribe(&self) -> Receiver<BreathingEvent> {
        self.events.subscribe()
    }

    /// Voice whose clips are still being validated.
    pub fn pending_voice(&self) -> Option<Voice> {
        self.check.as_ref().map(|c| c.voice)
    }

    /// Start or resume. Deferred while a voice is being validated.
    pub fn start(&mut self, now: Instant) {
        if let Some(check) = &self.check {
            debug!(voice = check.voice.name(), "start deferred until voice clips are validated");
            return;
        }
        if self.timer.state().is_active {
            return;
        }
        let events = self.timer.start();
        self.next_tick = Some(now + TICK);
        info!(pattern = %self.timer.pattern().id, "breathing session started");
        self.dispatch(events);
    }

    pub fn pause(&mut self) {
        self.timer.pause();
        self.next_tick = None;
        self.voice_sink.pause();
    }

    /// Back to rest with no voice, whatever the current phase.
    pub fn reset(&mut self) {
        self.check = None;
        self.next_tick = None;
        self.stop_voice();
        self.timer.reset();
        self.events.emit(BreathingEvent::Reset);
    }

    pub fn set_pattern(&mut self, pattern: BreathingPattern) -> Result<(), PatternError> {
        self.timer.set_pattern(pattern)?;
        self.next_tick = None;
        self.check = None;
        self.voice_sink.clear();
        self.clip_generation = None;
        self.events.emit(BreathingEvent::Reset);
        Ok(())
    }

    /// Validate `voice`'s clips and start the session once they all load.
    pub fn activate_voice(&mut self, voice: Voice, now: Instant) {
        if self.timer.state().active_voice == Some(voice) && self.check.is_none() {
            return;
        }
        self.stop_voice();
        self.check = None;
        if self.timer.state().is_active {
            self.pause();
        }

        let set = store::voice_set(self.store.as_ref(), voice);
        let missing = set.missing();
        if !missing.is_empty() {
            self.reject(
                VoiceFault::MissingVoiceAssets {
                    voice,
                    phases: missing,
                },
            );
            return;
        }

        let mut pending = HashMap::new();
        for (_, raw) in set.required() {
            let Some(url) = normalize_url(raw) else {
                self.reject(VoiceFault::InvalidVoiceAudio {
                    voice,
                    url: raw.to_string(),
                });
                return;
            };
            // `hold` may share a URL with another phase; one probe per URL is enough.
            if pending.values().any(|u| *u == url) {
                continue;
            }
            let request = next_generation();
            self.prober.probe(&url, request);
            pending.insert(request, url);
        }
        debug!(voice = voice.name(), clips = pending.len(), "validating voice clips");
        self.check = Some(VoiceCheck {
            voice,
            pending,
            deadline: now + self.config.voice_probe_timeout,
        });
    }

    /// Silence and forget the active voice. The timer keeps running.
    pub fn stop_voice(&mut self) {
        self.voice_sink.pause();
        self.voice_sink.clear();
        self.clip_generation = None;
        if let Some(voice) = self.timer.state().active_voice {
            self.set_active_voice(None);
            debug!(voice = voice.name(), "voice stopped");
            self.events.emit(BreathingEvent::VoiceStopped(voice));
        }
    }

    pub fn handle_probe_outcome(&mut self, outcome: ProbeOutcome, now: Instant) {
        let Some(check) = self.check.as_mut() else {
            trace!(request = outcome.request_id, "probe outcome with no voice check");
            return;
        };
        let Some(url) = check.pending.remove(&outcome.request_id) else {
            trace!(request = outcome.request_id, "stale voice probe outcome");
            return;
        };
        let voice = check.voice;
        if !outcome.playable {
            self.check = None;
            self.reject(VoiceFault::InvalidVoiceAudio { voice, url });
            return;
        }
        if !check.pending.is_empty() {
            return;
        }

        self.check = None;
        self.set_active_voice(Some(voice));
        info!(voice = voice.name(), "voice activated");
        self.events.emit(BreathingEvent::VoiceActivated(voice));
        self.start(now);
    }

    pub fn handle_media_event(&mut self, envelope: MediaEnvelope) {
        if envelope.sink != self.voice_sink.id() || Some(envelope.generation) != self.clip_generation {
            return;
        }
        match envelope.event {
            MediaEvent::Error(message) => {
                warn!(generation = envelope.generation, %message, "voice clip failed");
            }
            MediaEvent::Ended => {
                trace!(generation = envelope.generation, "voice clip ended");
            }
            MediaEvent::CanPlay | MediaEvent::CanPlayThrough => {}
        }
    }

    /// Run due ticks and expire a stuck voice check.
    pub fn poll(&mut self, now: Instant) {
        let expired = self
            .check
            .as_ref()
            .filter(|c| now >= c.deadline)
            .map(|c| {
                let url = c.pending.values().next().cloned().unwrap_or_default();
                (c.voice, url)
            });
        if let Some((voice, url)) = expired {
            warn!(voice = voice.name(), %url, "voice clip validation timed out");
            self.check = None;
            self.reject(VoiceFault::InvalidVoiceAudio { voice, url });
        }

        while let Some(due) = self.next_tick.filter(|due| now >= *due) {
            let events = self.timer.tick();
            self.next_tick = if self.timer.state().is_active {
                Some(due + TICK)
            } else {
                None
            };
            self.dispatch(events);
        }
    }

    /// Earliest instant `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let check = self.check.as_ref().map(|c| c.deadline);
        match (self.next_tick, check) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn dispatch(&mut self, events: Vec<BreathingEvent>) {
        for event in events {
            match &event {
                BreathingEvent::PhaseChanged { phase, cycle, .. } => {
                    trace!(phase = phase.label(), cycle, "phase changed");
                    self.play_clip(*phase);
                }
                BreathingEvent::CycleCompleted { cycle } => {
                    match store::increment_breath_count(self.store.as_ref()) {
                        Ok(total) => debug!(cycle, total, "cycle completed"),
                        Err(err) => warn!(error = %err, "failed to persist breath count"),
                    }
                }
                BreathingEvent::Completed { pattern_id, cycles } => {
                    info!(pattern = %pattern_id, cycles, "breathing session completed");
                    self.next_tick = None;
                    self.voice_sink.pause();
                    self.notifier
                        .notify(NoticeKind::Success, "Breathing exercise complete");
                }
                _ => {}
            }
            self.events.emit(event);
        }
    }

    fn play_clip(&mut self, phase: BreathingPhase) {
        let Some(url) = self.clip_url(phase) else {
            return;
        };
        let generation = next_generation();
        self.clip_generation = Some(generation);
        self.voice_sink.load(&url, generation);
        match self.voice_sink.play() {
            Ok(()) => {}
            Err(PlayError::Blocked) => {
                if !self.blocked_notified {
                    self.blocked_notified = true;
                    self.notifier
                        .notify(NoticeKind::Error, &PlaybackFault::PlaybackBlocked.to_string());
                }
            }
            Err(PlayError::Failed(message)) => {
                warn!(%url, %message, "voice clip did not start");
            }
        }
    }

    /// Active voice clip first, then the pattern's own phase audio.
    fn clip_url(&self, phase: BreathingPhase) -> Option<String> {
        if let Some(voice) = self.timer.state().active_voice {
            let set = store::voice_set(self.store.as_ref(), voice);
            return set.url_for(phase).and_then(normalize_url);
        }
        let pattern = self.timer.pattern();
        let raw = match phase {
            BreathingPhase::Inhale => pattern.inhale_audio_url.as_deref(),
            BreathingPhase::Hold1 | BreathingPhase::Hold2 => pattern.hold_audio_url.as_deref(),
            BreathingPhase::Exhale => pattern.exhale_audio_url.as_deref(),
            BreathingPhase::Rest => None,
        };
        raw.and_then(normalize_url)
    }

    fn reject(&mut self, fault: VoiceFault) {
        let voice = match &fault {
            VoiceFault::MissingVoiceAssets { voice, .. } => *voice,
            VoiceFault::InvalidVoiceAudio { voice, .. } => *voice,
        };
        warn!(voice = voice.name(), %fault, "voice rejected");
        self.notifier.notify(NoticeKind::Error, &fault.to_string());
        self.events.emit(BreathingEvent::VoiceRejected { voice, fault });
    }

    fn set_active_voice(&mut self, voice: Option<Voice>) {
        self.timer.set_active_voice(voice);
    }
}

impl Drop for BreathingSession {
    fn drop(&mut self) {
        self.next_tick = None;
        self.check = None;
        self.voice_sink.pause();
        self.voice_sink.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, save_voice_set};
    use crate::testing::{FakeProbe, FakeSink, RecordingNotifier};
    use calmwave_types::VoiceAudioSet;

    struct Harness {
        session: BreathingSession,
        sink: FakeSink,
        probe: FakeProbe,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        events: Receiver<BreathingEvent>,
        t0: Instant,
    }

    fn pattern(inhale: u32, hold1: u32, exhale: u32, hold2: u32, cycles: u32) -> BreathingPattern {
        BreathingPattern {
            id: "p".to_string(),
            name: "test".to_string(),
            inhale,
            hold1,
            exhale,
            hold2,
            cycles,
            ..BreathingPattern::default()
        }
    }

    fn harness(pattern: BreathingPattern) -> Harness {
        let sink = FakeSink::new();
        let probe = FakeProbe::default();
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let session = BreathingSession::new(
            pattern,
            Box::new(sink.clone()),
            Box::new(probe.clone()),
            store.clone(),
            notifier.clone(),
            BreathingConfig::default(),
        )
        .unwrap();
        let events = session.subscribe();
        Harness {
            session,
            sink,
            probe,
            store,
            notifier,
            events,
            t0: Instant::now(),
        }
    }

    impl Harness {
        fn at(&self, secs: u64) -> Instant {
            self.t0 + Duration::from_secs(secs)
        }

        fn drain(&self) -> Vec<BreathingEvent> {
            self.events.try_iter().collect()
        }

        fn answer_all(&mut self, playable: bool) {
            let requests = self.probe.requests.borrow().clone();
            for (_, id) in requests {
                self.session.handle_probe_outcome(
                    ProbeOutcome {
                        request_id: id,
                        playable,
                    },
                    self.t0,
                );
            }
        }
    }

    #[test]
    fn four_seven_eight_runs_to_completion() {
        let mut h = harness(pattern(4, 7, 8, 0, 3));
        h.session.start(h.t0);
        for s in 1..=57 {
            h.session.poll(h.at(s));
        }
        let state = h.session.state();
        assert!(!state.is_active);
        assert_eq!(state.current_cycle, 1);
        assert_eq!(state.current_phase, h.session.timer().initial_phase());

        let events = h.drain();
        let completed = events
            .iter()
            .filter(|e| matches!(e, BreathingEvent::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(store::breath_count(h.store.as_ref()), 3);
        assert_eq!(h.notifier.count(NoticeKind::Success), 1);

        h.session.poll(h.at(120));
        assert!(h.drain().is_empty());
    }

    #[test]
    fn late_poll_catches_up_every_tick() {
        let mut h = harness(pattern(2, 0, 2, 0, 1));
        h.session.start(h.t0);
        h.session.poll(h.at(10));
        assert!(!h.session.state().is_active);
        assert!(h.drain().iter().any(|e| matches!(e, BreathingEvent::Completed { .. })));
    }

    #[test]
    fn missing_hold_clip_rejects_voice() {
        let mut h = harness(pattern(4, 4, 4, 0, 2));
        save_voice_set(
            h.store.as_ref(),
            Voice::Vera,
            VoiceAudioSet {
                inhale: "https://cdn/vera/in.mp3".to_string(),
                hold: String::new(),
                exhale: "https://cdn/vera/out.mp3".to_string(),
            },
        )
        .unwrap();

        h.session.activate_voice(Voice::Vera, h.t0);

        assert!(!h.session.state().is_active);
        assert_eq!(h.session.state().active_voice, None);
        assert_eq!(h.probe.count(), 0);
        let events = h.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            BreathingEvent::VoiceRejected {
                voice: Voice::Vera,
                fault: VoiceFault::MissingVoiceAssets { .. }
            }
        )));
        assert_eq!(h.notifier.count(NoticeKind::Error), 1);
    }

    #[test]
    fn voice_starts_only_after_every_clip_loads() {
        let mut h = harness(pattern(4, 4, 4, 0, 2));
        h.session.activate_voice(Voice::Marco, h.t0);
        assert_eq!(h.probe.count(), 3);
        assert_eq!(h.session.pending_voice(), Some(Voice::Marco));

        h.session.start(h.t0);
        assert!(!h.session.state().is_active);

        let requests = h.probe.requests.borrow().clone();
        for (i, (_, id)) in requests.iter().enumerate() {
            assert!(!h.session.state().is_active, "active before clip {i} passed");
            h.session.handle_probe_outcome(
                ProbeOutcome {
                    request_id: *id,
                    playable: true,
                },
                h.t0,
            );
        }

        let state = h.session.state();
        assert!(state.is_active);
        assert_eq!(state.active_voice, Some(Voice::Marco));
        assert_eq!(state.current_phase, BreathingPhase::Inhale);
        let (url, _) = h.sink.state.borrow().loads.last().cloned().unwrap();
        assert!(url.ends_with("/marco/inhale.mp3"));
        assert!(h.sink.is_playing());
    }

    #[test]
    fn failed_clip_probe_reports_invalid_audio() {
        let mut h = harness(pattern(4, 4, 4, 0, 2));
        h.session.activate_voice(Voice::Vera, h.t0);
        let clip = |name: &str| format!("{}/vera/{name}.mp3", store::DEFAULT_VOICE_BASE_URL);
        for (name, playable) in [("inhale", true), ("hold", true), ("exhale", false)] {
            let request_id = h.probe.request_for(&clip(name)).unwrap();
            h.session
                .handle_probe_outcome(ProbeOutcome { request_id, playable }, h.t0);
        }
        assert!(!h.session.state().is_active);
        assert_eq!(h.session.pending_voice(), None);
        let rejected: Vec<String> = h
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                BreathingEvent::VoiceRejected {
                    fault: VoiceFault::InvalidVoiceAudio { url, .. },
                    ..
                } => Some(url),
                _ => None,
            })
            .collect();
        assert_eq!(rejected, vec![clip("exhale")]);
    }

    #[test]
    fn non_ascii_clip_urls_are_probed() {
        let mut h = harness(pattern(4, 4, 4, 0, 2));
        let set = VoiceAudioSet {
            inhale: "ééé.example/in.mp3".to_string(),
            hold: "ünïcode.io//hold.mp3".to_string(),
            exhale: "ééé.example/out.mp3".to_string(),
        };
        save_voice_set(h.store.as_ref(), Voice::Vera, set).unwrap();
        h.session.activate_voice(Voice::Vera, h.t0);
        assert!(h.probe.request_for("https://ünïcode.io/hold.mp3").is_some());
        assert_eq!(h.probe.count(), 3);
        h.answer_all(true);
        assert_eq!(h.session.state().active_voice, Some(Voice::Vera));
    }

    #[test]
    fn clip_validation_times_out() {
        let mut h = harness(pattern(4, 4, 4, 0, 2));
        h.session.activate_voice(Voice::Vera, h.t0);
        h.session.poll(h.at(7));
        assert_eq!(h.session.pending_voice(), Some(Voice::Vera));
        h.session.poll(h.at(8));
        assert_eq!(h.session.pending_voice(), None);
        assert!(!h.session.state().is_active);
        assert_eq!(h.notifier.count(NoticeKind::Error), 1);

        // A verdict arriving after the timeout is ignored.
        h.answer_all(true);
        assert!(!h.session.state().is_active);
    }

    #[test]
    fn activating_second_voice_stops_the_first() {
        let mut h = harness(pattern(4, 4, 4, 0, 2));
        h.session.activate_voice(Voice::Vera, h.t0);
        h.answer_all(true);
        assert_eq!(h.session.state().active_voice, Some(Voice::Vera));
        h.drain();

        h.session.activate_voice(Voice::Marco, h.at(1));
        let events = h.drain();
        assert_eq!(events.first(), Some(&BreathingEvent::VoiceStopped(Voice::Vera)));
        assert_eq!(h.session.state().active_voice, None);
        assert!(!h.sink.is_playing());

        let marco: Vec<u64> = h
            .probe
            .requests
            .borrow()
            .iter()
            .filter(|(url, _)| url.contains("/marco/"))
            .map(|(_, id)| *id)
            .collect();
        for id in marco {
            h.session.handle_probe_outcome(
                ProbeOutcome {
                    request_id: id,
                    playable: true,
                },
                h.at(1),
            );
        }
        assert_eq!(h.session.state().active_voice, Some(Voice::Marco));
        assert!(h.session.state().is_active);
    }

    #[test]
    fn phase_changes_play_the_matching_clip() {
        let mut h = harness(pattern(1, 1, 1, 0, 1));
        h.session.activate_voice(Voice::Vera, h.t0);
        h.answer_all(true);
        h.session.poll(h.at(1));
        h.session.poll(h.at(2));
        let loads: Vec<String> = h.sink.state.borrow().loads.iter().map(|(u, _)| u.clone()).collect();
        assert_eq!(loads.len(), 3);
        assert!(loads[0].ends_with("/vera/inhale.mp3"));
        assert!(loads[1].ends_with("/vera/hold.mp3"));
        assert!(loads[2].ends_with("/vera/exhale.mp3"));
    }

    #[test]
    fn reset_clears_voice_and_returns_to_rest() {
        let mut h = harness(pattern(4, 4, 4, 4, 3));
        h.session.activate_voice(Voice::Vera, h.t0);
        h.answer_all(true);
        for s in 1..=9 {
            h.session.poll(h.at(s));
        }
        assert_eq!(h.session.state().current_phase, BreathingPhase::Exhale);

        h.session.reset();
        let state = h.session.state();
        assert_eq!(state.current_phase, BreathingPhase::Rest);
        assert_eq!(state.current_cycle, 1);
        assert!(!state.is_active);
        assert_eq!(state.active_voice, None);
        assert_eq!(h.session.next_deadline(), None);
        assert!(h.drain().contains(&BreathingEvent::Reset));
    }

    #[test]
    fn stale_clip_events_are_ignored() {
        let mut h = harness(pattern(1, 1, 1, 0, 1));
        h.session.activate_voice(Voice::Vera, h.t0);
        h.answer_all(true);
        let sink = h.sink.id();
        h.session.handle_media_event(MediaEnvelope::new(sink, 0, MediaEvent::Error("x".to_string())));
        assert!(h.session.state().is_active);
    }

    #[test]
    fn blocked_clip_is_reported_once() {
        let mut h = harness(pattern(1, 1, 1, 0, 2));
        h.sink.fail_next_play(PlayError::Blocked);
        h.session.activate_voice(Voice::Vera, h.t0);
        h.answer_all(true);
        h.sink.fail_next_play(PlayError::Blocked);
        h.session.poll(h.at(1));
        assert_eq!(h.notifier.count(NoticeKind::Error), 1);
        assert!(h.session.state().is_active);
    }

    #[test]
    fn pattern_audio_plays_without_a_voice() {
        let mut p = pattern(2, 0, 2, 0, 1);
        p.inhale_audio_url = Some("cdn.example.com/in.mp3".to_string());
        let mut h = harness(p);
        h.session.start(h.t0);
        let (url, _) = h.sink.state.borrow().loads.last().cloned().unwrap();
        assert_eq!(url, "https://cdn.example.com/in.mp3");
    }
}
