//! Playback engine.
//!
//! Owns an active sink plus a standby sink used for crossfades. All work happens on
//! the caller's thread: media envelopes, probe outcomes and `poll(now)` drive the
//! state machine, and every scheduled deadline lives in the engine itself so
//! teardown drops them synchronously.

mod crossfade;
mod retry;
mod state;

pub use retry::backoff_delay;
pub use state::{PlaybackState, clamp_volume};

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use tracing::{debug, info, trace, warn};

use calmwave_types::PlayableTrack;

use crate::config::EngineConfig;
use crate::error::PlaybackFault;
use crate::events::{EventBus, PlaybackEvent};
use crate::media::{
    MediaEnvelope, MediaEvent, MediaProbe, MediaSink, PlayError, ProbeOutcome, SinkId,
    next_generation,
};
use crate::notify::{NoticeKind, Notifier};
use crate::url::{is_live_stream_url, normalize_url};

use crossfade::{Crossfade, CrossfadePhase, ramp_gains};
use retry::RetryPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadPhase {
    Idle,
    /// Waiting for the preload probe verdict.
    Probing { request: u64, deadline: Instant },
    /// Source handed to the active sink; waiting for it to report ready.
    Binding {
        generation: u64,
        /// Retry loads wait for "can play through" and then resume.
        resume: bool,
        deadline: Instant,
    },
    Ready { generation: u64 },
    Failed,
}

pub struct PlaybackEngine {
    config: EngineConfig,
    active: Box<dyn MediaSink>,
    standby: Box<dyn MediaSink>,
    prober: Box<dyn MediaProbe>,
    notifier: Arc<dyn Notifier>,
    events: EventBus<PlaybackEvent>,
    state: PlaybackState,
    published: PlaybackState,
    track: Option<PlayableTrack>,
    url: Option<String>,
    next_url: Option<String>,
    load: LoadPhase,
    retry: RetryPolicy,
    crossfade: Crossfade,
    pending_play: bool,
    ended_emitted: bool,
}

impl PlaybackEngine {
    pub fn new(
        primary: Box<dyn MediaSink>,
        secondary: Box<dyn MediaSink>,
        prober: Box<dyn MediaProbe>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.max_auto_retries,
            config.retry_base_delay,
            config.retry_max_delay,
        );
        let crossfade = Crossfade::new(config.crossfade_window, config.ramp_tick);
        Self {
            config,
            active: primary,
            standby: secondary,
            prober,
            notifier,
            events: EventBus::new(),
            state: PlaybackState::default(),
            published: PlaybackState::default(),
            track: None,
            url: None,
            next_url: None,
            load: LoadPhase::Idle,
            retry,
            crossfade,
            pending_play: false,
            ended_emitted: false,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn track(&self) -> Option<&PlayableTrack> {
        self.track.as_ref()
    }

    /// Normalized URL of the current source.
    pub fn current_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Sink currently carrying the audible track.
    pub fn active_sink(&self) -> SinkId {
        self.active.id()
    }

    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Bind a new track. Any previous source is torn down first.
    pub fn load(&mut self, track: PlayableTrack, now: Instant) {
        self.teardown();
        self.state.reset_for_source();
        self.retry.reset();
        self.next_url = track.next_audio_url.as_deref().and_then(normalize_url);
        let raw = track.audio_url.clone();
        self.track = Some(track);

        match normalize_url(&raw) {
            None => {
                self.url = None;
                self.fail(PlaybackFault::InvalidUrl(raw), None);
            }
            Some(url) => {
                let live = is_live_stream_url(&url);
                self.state.is_live_stream = live;
                if live {
                    self.state.is_looping = false;
                }
                info!(url = %url, live, "loading track");
                self.url = Some(url.clone());
                self.begin_probe(&url, now);
            }
        }
        self.publish();
    }

    /// Feed back the verdict of a preload probe.
    pub fn handle_probe_outcome(&mut self, outcome: ProbeOutcome, now: Instant) {
        let LoadPhase::Probing { request, .. } = self.load else {
            trace!(request = outcome.request_id, "probe outcome with no probe pending");
            return;
        };
        if request != outcome.request_id {
            trace!(request = outcome.request_id, current = request, "dropping stale probe outcome");
            return;
        }
        if outcome.playable {
            debug!(request, "preload probe passed");
            self.bind(false, now);
        } else {
            self.fail(
                PlaybackFault::LoadFailure("source is not playable".to_string()),
                Some(now),
            );
        }
        self.publish();
    }

    /// Feed back a lifecycle event from one of the sinks.
    pub fn handle_media_event(&mut self, envelope: MediaEnvelope, now: Instant) {
        let MediaEnvelope {
            sink,
            generation,
            event,
        } = envelope;
        if sink == self.active.id() && Some(generation) == self.active_generation() {
            self.on_active_event(event, now);
        } else if sink == self.standby.id() && Some(generation) == self.crossfade.generation() {
            self.on_standby_event(event, now);
        } else {
            trace!(sink = %sink, generation, ?event, "dropping stale media event");
            return;
        }
        self.publish();
    }

    /// Drive timers: probe/ready timeouts, automatic retries, loop correction and
    /// the crossfade ramp.
    pub fn poll(&mut self, now: Instant) {
        match self.load {
            LoadPhase::Probing { deadline, .. } if now >= deadline => {
                self.fail(
                    PlaybackFault::LoadFailure("preload timed out".to_string()),
                    Some(now),
                );
            }
            LoadPhase::Binding { deadline, .. } if now >= deadline => {
                self.fail(
                    PlaybackFault::LoadFailure("source did not become ready in time".to_string()),
                    Some(now),
                );
            }
            _ => {}
        }

        if self.retry.take_due(now) {
            self.perform_retry(now);
        }

        if matches!(self.load, LoadPhase::Ready { .. }) {
            self.refresh_playhead();
            self.correct_loop();
            self.drive_crossfade(now);
        }
        self.publish();
    }

    /// Start playback, or remember the request until the source is ready.
    pub fn play(&mut self) {
        match self.load {
            LoadPhase::Ready { .. } => {
                self.start_playback();
                let ramping = matches!(self.crossfade.phase(), CrossfadePhase::Ramping { .. });
                if self.state.is_playing && ramping {
                    if let Err(err) = self.standby.play() {
                        warn!(error = %err, "incoming track failed to resume");
                        self.cancel_crossfade();
                    }
                }
            }
            LoadPhase::Probing { .. } | LoadPhase::Binding { .. } => {
                debug!("play requested before source is ready; deferring");
                self.pending_play = true;
            }
            LoadPhase::Idle | LoadPhase::Failed => {
                debug!("play ignored: no playable source");
            }
        }
        self.publish();
    }

    pub fn pause(&mut self) {
        self.pending_play = false;
        self.active.pause();
        if self.crossfade.in_flight() {
            self.standby.pause();
        }
        self.state.is_playing = false;
        self.publish();
    }

    pub fn toggle(&mut self) {
        if self.state.is_playing || self.pending_play {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Move the play-head, clamped to `[0, duration]`.
    pub fn seek(&mut self, seconds: f64) {
        if self.state.is_crossfading || self.state.is_live_stream {
            debug!(seconds, "seek ignored while crossfading or live");
            return;
        }
        if !self.state.is_loaded || !seconds.is_finite() {
            return;
        }
        let target = seconds.clamp(0.0, self.state.duration.max(0.0));
        self.active.seek(target);
        self.state.current_time = target;
        self.ended_emitted = false;
        self.publish();
    }

    /// Set the listener volume; NaN maps to 0 and everything else is clamped to `[0, 1]`.
    pub fn set_volume(&mut self, volume: f32) {
        self.state.volume = clamp_volume(volume);
        self.apply_volume();
        self.publish();
    }

    /// Flip mute and return the new flag. The requested volume is kept as is.
    pub fn toggle_mute(&mut self) -> bool {
        self.state.muted = !self.state.muted;
        self.apply_volume();
        self.publish();
        self.state.muted
    }

    /// Flip seamless looping and return the new flag. Live sources never loop.
    pub fn toggle_loop(&mut self) -> bool {
        if self.state.is_live_stream {
            debug!("loop unavailable for live streams");
            return false;
        }
        self.state.is_looping = !self.state.is_looping;
        self.publish();
        self.state.is_looping
    }

    /// Reload the current URL on user request. Resets the failure count.
    pub fn retry(&mut self, now: Instant) {
        if self.track.is_none() {
            debug!("retry ignored: no track bound");
            return;
        }
        self.retry.reset();
        self.perform_retry(now);
        self.publish();
    }

    /// Replace the follow-up URL used for the next crossfade.
    pub fn set_next(&mut self, url: Option<&str>) {
        self.next_url = url.and_then(normalize_url);
        if let Some(track) = self.track.as_mut() {
            track.next_audio_url = url.map(str::to_string);
        }
    }

    /// Pause and clear both sinks and drop every pending deadline.
    pub fn stop(&mut self) {
        self.teardown();
        self.state.reset_for_source();
        self.track = None;
        self.url = None;
        self.next_url = None;
        self.publish();
    }

    fn active_generation(&self) -> Option<u64> {
        match self.load {
            LoadPhase::Binding { generation, .. } | LoadPhase::Ready { generation } => {
                Some(generation)
            }
            _ => None,
        }
    }

    fn begin_probe(&mut self, url: &str, now: Instant) {
        let request = next_generation();
        self.load = LoadPhase::Probing {
            request,
            deadline: now + self.config.preload_timeout,
        };
        debug!(url = %url, request, "starting preload probe");
        self.prober.probe(url, request);
    }

    fn bind(&mut self, resume: bool, now: Instant) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let generation = next_generation();
        self.active.load(&url, generation);
        self.active.set_volume(self.state.effective_volume());
        self.load = LoadPhase::Binding {
            generation,
            resume,
            deadline: now + self.config.preload_timeout,
        };
        debug!(url = %url, generation, resume, sink = %self.active.id(), "binding source");
    }

    fn on_active_event(&mut self, event: MediaEvent, now: Instant) {
        match event {
            MediaEvent::CanPlay => {
                if let LoadPhase::Binding {
                    generation,
                    resume: false,
                    ..
                } = self.load
                {
                    self.mark_ready(generation);
                    if self.pending_play {
                        self.start_playback();
                    }
                }
            }
            MediaEvent::CanPlayThrough => {
                if let LoadPhase::Binding {
                    generation, resume, ..
                } = self.load
                {
                    self.mark_ready(generation);
                    if resume || self.pending_play {
                        self.start_playback();
                    }
                }
            }
            MediaEvent::Ended => self.on_ended(),
            MediaEvent::Error(message) => {
                self.fail(PlaybackFault::LoadFailure(message), Some(now));
            }
        }
    }

    fn on_standby_event(&mut self, event: MediaEvent, now: Instant) {
        match event {
            MediaEvent::CanPlay | MediaEvent::CanPlayThrough if self.crossfade.is_loading() => {
                if self.state.is_playing {
                    self.start_incoming(now);
                } else {
                    debug!("next track buffered while paused; holding it until playback resumes");
                    self.crossfade.mark_ready();
                }
            }
            MediaEvent::Error(message) => {
                warn!(error = %message, "next track failed to load; skipping crossfade");
                self.cancel_crossfade();
            }
            _ => {}
        }
    }

    /// Start the buffered standby sink silently and begin the ramp.
    fn start_incoming(&mut self, now: Instant) {
        self.standby.set_volume(0.0);
        match self.standby.play() {
            Ok(()) => {
                self.crossfade
                    .start_ramp(self.state.current_time, self.state.duration, now);
                debug!(from = self.state.current_time, to = self.state.duration, "crossfade ramp started");
            }
            Err(err) => {
                warn!(error = %err, "next track failed to start; skipping crossfade");
                self.cancel_crossfade();
            }
        }
    }

    fn on_ended(&mut self) {
        match self.crossfade.phase() {
            CrossfadePhase::Ramping { .. } => {
                self.finish_crossfade();
                return;
            }
            CrossfadePhase::Loading { .. } => self.cancel_crossfade(),
            _ => {}
        }

        if self.state.is_looping && !self.state.is_live_stream {
            debug!("native end reached while looping; rewinding");
            self.active.seek(0.0);
            self.state.current_time = 0.0;
            if let Err(err) = self.active.play() {
                warn!(error = %err, "loop restart failed");
                self.state.is_playing = false;
            }
            return;
        }

        self.state.is_playing = false;
        self.state.current_time = self.state.duration;
        if !self.ended_emitted {
            self.ended_emitted = true;
            info!(url = self.url.as_deref().unwrap_or(""), "track ended");
            self.events
                .emit(PlaybackEvent::TrackEnded { crossfaded: false });
        }
    }

    fn mark_ready(&mut self, generation: u64) {
        self.load = LoadPhase::Ready { generation };
        self.state.is_loaded = true;
        self.state.load_error = false;
        self.state.is_retrying = false;
        if self.state.last_fault != Some(PlaybackFault::PlaybackBlocked) {
            self.state.last_fault = None;
        }
        self.retry.reset();
        self.refresh_playhead();
        info!(
            url = self.url.as_deref().unwrap_or(""),
            duration = self.state.duration,
            "source ready"
        );
    }

    fn start_playback(&mut self) {
        self.pending_play = false;
        match self.active.play() {
            Ok(()) => {
                self.state.is_playing = true;
                if self.state.playback_blocked {
                    self.state.playback_blocked = false;
                    self.state.last_fault = None;
                }
            }
            Err(PlayError::Blocked) => {
                let fault = PlaybackFault::PlaybackBlocked;
                warn!("playback blocked by autoplay policy");
                self.state.is_playing = false;
                self.state.playback_blocked = true;
                self.state.last_fault = Some(fault.clone());
                self.notifier.notify(NoticeKind::Error, &fault.to_string());
                self.events.emit(PlaybackEvent::Blocked);
            }
            Err(PlayError::Failed(message)) => {
                self.fail(PlaybackFault::LoadFailure(message), None);
            }
        }
    }

    /// Record a fault. With `now`, load failures count toward the retry ceiling
    /// and may schedule an automatic retry.
    fn fail(&mut self, fault: PlaybackFault, now: Option<Instant>) {
        warn!(url = self.url.as_deref().unwrap_or(""), %fault, "playback fault");
        self.load = LoadPhase::Failed;
        self.pending_play = false;
        self.active.pause();
        self.active.clear();
        if self.crossfade.in_flight() {
            self.cancel_crossfade();
        }

        self.state.is_playing = false;
        self.state.is_loaded = false;
        self.state.load_error = true;
        self.state.is_retrying = false;
        self.state.last_fault = Some(fault.clone());

        self.notifier.notify(NoticeKind::Error, &fault.to_string());
        self.events.emit(PlaybackEvent::LoadFailed {
            url: self.url.clone(),
            fault: fault.clone(),
        });

        let Some(now) = now else {
            return;
        };
        match self.retry.record_failure(now, fault.is_retryable()) {
            Some(delay) => {
                let attempt = self.retry.failures();
                self.state.is_retrying = true;
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling automatic retry");
                self.events
                    .emit(PlaybackEvent::RetryScheduled { attempt, delay });
            }
            None if fault.is_retryable() => {
                info!(failures = self.retry.failures(), "automatic retries exhausted");
                self.notifier.notify(
                    NoticeKind::Info,
                    "Audio is still unavailable. Press retry to try again.",
                );
            }
            None => {}
        }
    }

    fn perform_retry(&mut self, now: Instant) {
        let Some(raw) = self.track.as_ref().map(|t| t.audio_url.clone()) else {
            return;
        };
        self.retry.cancel();
        self.active.pause();
        self.active.clear();
        if self.crossfade.in_flight() {
            self.cancel_crossfade();
        }
        self.crossfade.reset();

        let Some(url) = normalize_url(&raw) else {
            self.fail(PlaybackFault::InvalidUrl(raw), None);
            return;
        };
        info!(url = %url, failures = self.retry.failures(), "retrying source");
        self.notifier.notify(NoticeKind::Info, "Retrying audio…");
        self.url = Some(url);
        self.state.load_error = false;
        self.state.last_fault = None;
        self.state.playback_blocked = false;
        self.state.is_loaded = false;
        self.state.is_retrying = true;
        self.ended_emitted = false;
        self.bind(true, now);
    }

    fn refresh_playhead(&mut self) {
        self.state.current_time = self.active.position();
        match self.active.duration() {
            Some(d) if d.is_infinite() => {
                if !self.state.is_live_stream {
                    debug!("sink reports unbounded duration; treating as live");
                }
                self.state.is_live_stream = true;
                self.state.is_looping = false;
                self.state.duration = 0.0;
            }
            Some(d) if d.is_finite() && d > 0.0 => self.state.duration = d,
            _ => {}
        }
    }

    fn correct_loop(&mut self) {
        let threshold = self.config.loop_threshold.as_secs_f64();
        let state = &self.state;
        if state.is_looping
            && !state.is_live_stream
            && state.is_playing
            && state.duration > threshold
            && state.current_time >= state.duration - threshold
        {
            trace!(at = state.current_time, "seamless loop rewind");
            self.active.seek(0.0);
            self.state.current_time = 0.0;
        }
    }

    fn drive_crossfade(&mut self, now: Instant) {
        let next = self.next_url.clone();
        if let Some(next_url) = next.filter(|_| self.crossfade.should_start(&self.state, true)) {
            let generation = next_generation();
            self.standby.set_volume(0.0);
            self.standby.load(&next_url, generation);
            self.crossfade.begin(generation, next_url.clone());
            self.state.is_crossfading = true;
            info!(next = %next_url, remaining = self.state.remaining(), "starting crossfade");
            self.events
                .emit(PlaybackEvent::CrossfadeStarted { next_url });
        }

        if self.state.is_playing && self.crossfade.is_waiting() {
            self.start_incoming(now);
        }

        if let Some(progress) = self.crossfade.sample(self.state.current_time, now) {
            let (outgoing, incoming) = ramp_gains(progress, self.state.effective_volume());
            self.active.set_volume(outgoing);
            self.standby.set_volume(incoming);
            if progress >= 1.0 {
                self.finish_crossfade();
            }
        }
    }

    fn finish_crossfade(&mut self) {
        let Some((next_url, generation)) = self.crossfade.complete() else {
            return;
        };
        std::mem::swap(&mut self.active, &mut self.standby);
        self.standby.pause();
        self.standby.clear();
        self.active.set_volume(self.state.effective_volume());

        if !self.ended_emitted {
            self.events
                .emit(PlaybackEvent::TrackEnded { crossfaded: true });
        }
        info!(url = %next_url, sink = %self.active.id(), "crossfade complete");

        self.track = Some(PlayableTrack {
            id: String::new(),
            audio_url: next_url.clone(),
            title: String::new(),
            next_audio_url: None,
        });
        self.state.reset_for_source();
        self.state.is_live_stream = is_live_stream_url(&next_url);
        self.url = Some(next_url);
        self.next_url = None;
        self.load = LoadPhase::Ready { generation };
        self.state.is_loaded = true;
        self.state.is_playing = true;
        self.pending_play = false;
        self.ended_emitted = false;
        self.retry.reset();
        self.refresh_playhead();
    }

    fn cancel_crossfade(&mut self) {
        self.standby.pause();
        self.standby.clear();
        self.crossfade.abandon();
        self.state.is_crossfading = false;
        self.active.set_volume(self.state.effective_volume());
    }

    fn apply_volume(&mut self) {
        if matches!(self.crossfade.phase(), CrossfadePhase::Ramping { .. }) {
            // The next ramp tick picks up the new level.
            return;
        }
        self.active.set_volume(self.state.effective_volume());
    }

    fn teardown(&mut self) {
        self.active.pause();
        self.active.clear();
        self.standby.pause();
        self.standby.clear();
        self.crossfade.reset();
        self.retry.cancel();
        self.pending_play = false;
        self.ended_emitted = false;
        self.load = LoadPhase::Idle;
    }

    fn publish(&mut self) {
        if self.state != self.published {
            self.published = self.state.clone();
            self.events
                .emit(PlaybackEvent::StateChanged(self.state.clone()));
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
