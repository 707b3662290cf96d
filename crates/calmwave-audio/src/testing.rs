//! Fakes shared by the engine tests.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Mutex;

use crate::media::{MediaProbe, MediaSink, PlayError, SinkId};
use crate::notify::{NoticeKind, Notifier};

#[derive(Debug, Default)]
pub struct FakeSinkState {
    pub loads: Vec<(String, u64)>,
    pub generation: Option<u64>,
    pub url: Option<String>,
    pub seeks: Vec<f64>,
    pub playing: bool,
    pub play_calls: usize,
    pub volume: f32,
    pub volume_log: Vec<f32>,
    pub position: f64,
    pub duration: Option<f64>,
    pub next_play_error: Option<PlayError>,
    pub clears: usize,
}

/// Scriptable sink. Clones share state, so a test keeps one handle while the
/// engine owns the boxed other.
#[derive(Clone)]
pub struct FakeSink {
    id: SinkId,
    pub state: Rc<RefCell<FakeSinkState>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self {
            id: SinkId::allocate(),
            state: Rc::new(RefCell::new(FakeSinkState {
                volume: 1.0,
                ..FakeSinkState::default()
            })),
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.borrow().generation.unwrap_or(0)
    }

    pub fn set_position(&self, seconds: f64) {
        self.state.borrow_mut().position = seconds;
    }

    pub fn set_duration(&self, seconds: f64) {
        self.state.borrow_mut().duration = Some(seconds);
    }

    pub fn fail_next_play(&self, err: PlayError) {
        self.state.borrow_mut().next_play_error = Some(err);
    }

    pub fn is_playing(&self) -> bool {
        self.state.borrow().playing
    }

    pub fn current_volume(&self) -> f32 {
        self.state.borrow().volume
    }

    pub fn load_count(&self) -> usize {
        self.state.borrow().loads.len()
    }
}

impl MediaSink for FakeSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn load(&mut self, url: &str, generation: u64) {
        let mut s = self.state.borrow_mut();
        s.loads.push((url.to_string(), generation));
        s.generation = Some(generation);
        s.url = Some(url.to_string());
        s.position = 0.0;
        s.playing = false;
    }

    fn clear(&mut self) {
        let mut s = self.state.borrow_mut();
        s.clears += 1;
        s.generation = None;
        s.url = None;
        s.playing = false;
        s.position = 0.0;
        s.duration = None;
    }

    fn play(&mut self) -> Result<(), PlayError> {
        let mut s = self.state.borrow_mut();
        s.play_calls += 1;
        if let Some(err) = s.next_play_error.take() {
            return Err(err);
        }
        s.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.borrow_mut().playing = false;
    }

    fn seek(&mut self, seconds: f64) {
        let mut s = self.state.borrow_mut();
        s.seeks.push(seconds);
        s.position = seconds;
    }

    fn set_volume(&mut self, volume: f32) {
        let mut s = self.state.borrow_mut();
        s.volume = volume;
        s.volume_log.push(volume);
    }

    fn volume(&self) -> f32 {
        self.state.borrow().volume
    }

    fn position(&self) -> f64 {
        self.state.borrow().position
    }

    fn duration(&self) -> Option<f64> {
        self.state.borrow().duration
    }
}

/// Records every probe request; tests answer them by hand.
#[derive(Clone, Default)]
pub struct FakeProbe {
    pub requests: Rc<RefCell<Vec<(String, u64)>>>,
}

impl FakeProbe {
    pub fn last_request(&self) -> Option<(String, u64)> {
        self.requests.borrow().last().cloned()
    }

    pub fn request_for(&self, url: &str) -> Option<u64> {
        self.requests
            .borrow()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .map(|(_, id)| *id)
    }

    pub fn count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl MediaProbe for FakeProbe {
    fn probe(&mut self, url: &str, request_id: u64) {
        self.requests.borrow_mut().push((url.to_string(), request_id));
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<(NoticeKind, String)>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<NoticeKind> {
        self.notices
            .lock()
            .map(|n| n.iter().map(|(k, _)| *k).collect())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices
            .lock()
            .map(|n| n.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: NoticeKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        if let Ok(mut n) = self.notices.lock() {
            n.push((kind, message.to_string()));
        }
    }
}
