use std::time::Duration;

use serde::{Deserialize, Serialize};

use calmwave_types::{BreathingPattern, BreathingPhase, BreathingSessionState, Voice};

use crate::error::PatternError;
use crate::events::BreathingEvent;

/// Which phases make up one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseMode {
    /// inhale, hold, exhale, hold
    #[default]
    FourPhase,
    /// inhale, hold, exhale
    ThreePhase,
}

const CYCLE_ORDER: [BreathingPhase; 4] = [
    BreathingPhase::Inhale,
    BreathingPhase::Hold1,
    BreathingPhase::Exhale,
    BreathingPhase::Hold2,
];

/// Cyclic countdown over a breathing pattern.
///
/// Whole seconds drive the phase changes; `advance` accumulates fractional time
/// for smooth animation. Phases with a zero duration are never entered.
pub struct BreathingTimer {
    pattern: BreathingPattern,
    mode: PhaseMode,
    state: BreathingSessionState,
    /// Seconds elapsed since the last whole tick.
    fraction: f64,
    /// Completion already signalled for the current run.
    completed: bool,
}

impl BreathingTimer {
    pub fn new(pattern: BreathingPattern, mode: PhaseMode) -> Result<Self, PatternError> {
        validate(&pattern, mode)?;
        Ok(Self {
            pattern,
            mode,
            state: BreathingSessionState::default(),
            fraction: 0.0,
            completed: false,
        })
    }

    pub fn pattern(&self) -> &BreathingPattern {
        &self.pattern
    }

    pub fn mode(&self) -> PhaseMode {
        self.mode
    }

    pub fn state(&self) -> &BreathingSessionState {
        &self.state
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Phases of one cycle, in order, skipping zero-duration ones.
    pub fn sequence(&self) -> Vec<BreathingPhase> {
        phase_sequence(&self.pattern, self.mode)
    }

    /// First phase of every cycle.
    pub fn initial_phase(&self) -> BreathingPhase {
        self.sequence()
            .first()
            .copied()
            .unwrap_or(BreathingPhase::Inhale)
    }

    /// Start a new run, or resume a paused one.
    pub fn start(&mut self) -> Vec<BreathingEvent> {
        if self.state.is_active {
            return Vec::new();
        }
        self.state.is_active = true;
        let fresh = self.completed || self.state.current_phase == BreathingPhase::Rest;
        if !fresh {
            return Vec::new();
        }
        self.completed = false;
        self.fraction = 0.0;
        self.state.current_cycle = 1;
        self.enter(self.initial_phase());
        vec![self.phase_event()]
    }

    pub fn pause(&mut self) {
        self.state.is_active = false;
    }

    pub(crate) fn set_active_voice(&mut self, voice: Option<Voice>) {
        self.state.active_voice = voice;
    }

    /// Back to rest, cycle 1, inactive. The voice selection is kept.
    pub fn reset(&mut self) {
        self.state = BreathingSessionState {
            active_voice: self.state.active_voice,
            ..BreathingSessionState::default()
        };
        self.fraction = 0.0;
        self.completed = false;
    }

    /// Swap the pattern; the session returns to rest.
    pub fn set_pattern(&mut self, pattern: BreathingPattern) -> Result<(), PatternError> {
        validate(&pattern, self.mode)?;
        self.pattern = pattern;
        self.reset();
        Ok(())
    }

    /// One second elapsed.
    pub fn tick(&mut self) -> Vec<BreathingEvent> {
        if !self.state.is_active {
            return Vec::new();
        }
        self.state.seconds_left = self.state.seconds_left.saturating_sub(1);
        if self.state.seconds_left > 0 {
            return Vec::new();
        }
        self.next_phase()
    }

    /// Accumulate `dt` and run every whole-second tick it covers.
    pub fn advance(&mut self, dt: Duration) -> Vec<BreathingEvent> {
        if !self.state.is_active {
            return Vec::new();
        }
        self.fraction += dt.as_secs_f64();
        let mut events = Vec::new();
        while self.fraction >= 1.0 && self.state.is_active {
            self.fraction -= 1.0;
            events.extend(self.tick());
        }
        if !self.state.is_active {
            self.fraction = 0.0;
        }
        events
    }

    /// Progress through the current phase in `[0, 1]`, including sub-second time.
    pub fn phase_progress(&self) -> f64 {
        let total = self.pattern.seconds(self.state.current_phase);
        if total == 0 || self.state.current_phase == BreathingPhase::Rest {
            return 0.0;
        }
        let elapsed = (total - self.state.seconds_left.min(total)) as f64 + self.fraction;
        (elapsed / total as f64).clamp(0.0, 1.0)
    }

    fn next_phase(&mut self) -> Vec<BreathingEvent> {
        let sequence = self.sequence();
        let position = sequence
            .iter()
            .position(|p| *p == self.state.current_phase);
        if let Some(next) = position.and_then(|i| sequence.get(i + 1)).copied() {
            self.enter(next);
            return vec![self.phase_event()];
        }

        // Wrapped past the last configured phase.
        let finished = self.state.current_cycle;
        let mut events = vec![BreathingEvent::CycleCompleted { cycle: finished }];
        if finished >= self.pattern.cycles {
            events.extend(self.complete());
            return events;
        }
        self.state.current_cycle = finished + 1;
        self.enter(self.initial_phase());
        events.push(self.phase_event());
        events
    }

    fn complete(&mut self) -> Option<BreathingEvent> {
        self.state.is_active = false;
        self.state.current_cycle = 1;
        self.enter(self.initial_phase());
        self.fraction = 0.0;
        if self.completed {
            return None;
        }
        self.completed = true;
        Some(BreathingEvent::Completed {
            pattern_id: self.pattern.id.clone(),
            cycles: self.pattern.cycles,
        })
    }

    fn enter(&mut self, phase: BreathingPhase) {
        self.state.current_phase = phase;
        self.state.seconds_left = self.pattern.seconds(phase);
    }

    fn phase_event(&self) -> BreathingEvent {
        BreathingEvent::PhaseChanged {
            phase: self.state.current_phase,
            cycle: self.state.current_cycle,
            seconds_left: self.state.seconds_left,
        }
    }
}

/// Phases of one cycle for `pattern` under `mode`.
pub fn phase_sequence(pattern: &BreathingPattern, mode: PhaseMode) -> Vec<BreathingPhase> {
    CYCLE_ORDER
        .into_iter()
        .filter(|p| !(mode == PhaseMode::ThreePhase && *p == BreathingPhase::Hold2))
        .filter(|p| pattern.seconds(*p) > 0)
        .collect()
}

fn validate(pattern: &BreathingPattern, mode: PhaseMode) -> Result<(), PatternError> {
    if pattern.cycles == 0 {
        return Err(PatternError::NoCycles(pattern.id.clone()));
    }
    if phase_sequence(pattern, mode).is_empty() {
        return Err(PatternError::EmptyCycle(pattern.id.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn phases(events: &[BreathingEvent]) -> Vec<BreathingPhase> {
        events
            .iter()
            .filter_map(|e| match e {
                BreathingEvent::PhaseChanged { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn four_seven_eight_completes_after_57_ticks() {
        let mut timer = BreathingTimer::new(pattern(4, 7, 8, 0, 3), PhaseMode::FourPhase).unwrap();
        assert_eq!(timer.state().current_phase, BreathingPhase::Rest);
        timer.start();

        let mut events = Vec::new();
        for i in 1..=57 {
            let tick = timer.tick();
            if i < 57 {
                assert!(timer.state().is_active, "finished early at tick {i}");
            }
            events.extend(tick);
        }

        let state = timer.state();
        assert!(!state.is_active);
        assert!(timer.is_completed());
        assert_eq!(state.current_cycle, 1);
        assert_eq!(state.current_phase, timer.initial_phase());
        let completed = events
            .iter()
            .filter(|e| matches!(e, BreathingEvent::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
    }

    #[test]
    fn completion_never_refires() {
        let mut timer = BreathingTimer::new(pattern(1, 1, 1, 0, 1), PhaseMode::FourPhase).unwrap();
        timer.start();
        let mut events: Vec<_> = (0..3).flat_map(|_| timer.tick()).collect();
        events.extend((0..20).flat_map(|_| timer.tick()));
        events.extend(timer.advance(Duration::from_secs(30)));
        let completed = events
            .iter()
            .filter(|e| matches!(e, BreathingEvent::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
    }

    #[test]
    fn zero_hold2_never_appears() {
        let mut timer = BreathingTimer::new(pattern(2, 3, 2, 0, 2), PhaseMode::FourPhase).unwrap();
        let mut events = timer.start();
        for _ in 0..(2 + 3 + 2) * 2 {
            events.extend(timer.tick());
        }
        let seen = phases(&events);
        assert!(!seen.contains(&BreathingPhase::Hold2));
        assert_eq!(
            seen,
            vec![
                BreathingPhase::Inhale,
                BreathingPhase::Hold1,
                BreathingPhase::Exhale,
                BreathingPhase::Inhale,
                BreathingPhase::Hold1,
                BreathingPhase::Exhale,
            ]
        );
    }

    #[test]
    fn box_breathing_visits_all_four_phases() {
        let mut timer = BreathingTimer::new(pattern(4, 4, 4, 4, 1), PhaseMode::FourPhase).unwrap();
        let mut events = timer.start();
        for _ in 0..15 {
            events.extend(timer.tick());
        }
        assert_eq!(
            phases(&events),
            vec![
                BreathingPhase::Inhale,
                BreathingPhase::Hold1,
                BreathingPhase::Exhale,
                BreathingPhase::Hold2,
            ]
        );
    }

    #[test]
    fn three_phase_mode_skips_hold2() {
        let timer = BreathingTimer::new(pattern(4, 4, 4, 4, 1), PhaseMode::ThreePhase).unwrap();
        assert_eq!(
            timer.sequence(),
            vec![BreathingPhase::Inhale, BreathingPhase::Hold1, BreathingPhase::Exhale]
        );
    }

    #[test]
    fn zero_hold1_is_skipped() {
        let timer = BreathingTimer::new(pattern(5, 0, 5, 0, 6), PhaseMode::FourPhase).unwrap();
        assert_eq!(timer.sequence(), vec![BreathingPhase::Inhale, BreathingPhase::Exhale]);
    }

    #[test]
    fn cycle_is_monotonic_and_bounded() {
        let mut timer = BreathingTimer::new(pattern(1, 2, 1, 1, 4), PhaseMode::FourPhase).unwrap();
        timer.start();
        let mut last = timer.state().current_cycle;
        for _ in 0..(5 * 4 - 1) {
            timer.tick();
            let cycle = timer.state().current_cycle;
            assert!(cycle >= last);
            assert!(cycle <= 4);
            last = cycle;
        }
        assert_eq!(last, 4);
        timer.tick();
        assert_eq!(timer.state().current_cycle, 1);
        assert!(!timer.state().is_active);
    }

    #[test]
    fn pause_and_resume_keep_position() {
        let mut timer = BreathingTimer::new(pattern(4, 4, 4, 0, 2), PhaseMode::FourPhase).unwrap();
        timer.start();
        timer.tick();
        timer.pause();
        assert!(timer.tick().is_empty());
        assert!(timer.start().is_empty());
        assert_eq!(timer.state().seconds_left, 3);
        assert_eq!(timer.state().current_phase, BreathingPhase::Inhale);
    }

    #[test]
    fn reset_returns_to_rest_from_any_phase() {
        let mut timer = BreathingTimer::new(pattern(2, 2, 2, 2, 3), PhaseMode::FourPhase).unwrap();
        timer.start();
        for _ in 0..11 {
            timer.tick();
        }
        assert_eq!(timer.state().current_cycle, 2);
        timer.reset();
        let state = timer.state();
        assert_eq!(state.current_phase, BreathingPhase::Rest);
        assert_eq!(state.current_cycle, 1);
        assert!(!state.is_active);
    }

    #[test]
    fn restart_after_completion_begins_new_run() {
        let mut timer = BreathingTimer::new(pattern(1, 1, 1, 0, 1), PhaseMode::FourPhase).unwrap();
        timer.start();
        for _ in 0..3 {
            timer.tick();
        }
        assert!(timer.is_completed());
        let events = timer.start();
        assert!(!timer.is_completed());
        assert_eq!(phases(&events), vec![BreathingPhase::Inhale]);
        assert_eq!(timer.state().seconds_left, 1);
    }

    #[test]
    fn advance_accumulates_fractions() {
        let mut timer = BreathingTimer::new(pattern(4, 4, 4, 0, 1), PhaseMode::FourPhase).unwrap();
        timer.start();
        timer.advance(Duration::from_millis(400));
        assert_eq!(timer.state().seconds_left, 4);
        assert!((timer.phase_progress() - 0.1).abs() < 1e-9);
        timer.advance(Duration::from_millis(700));
        assert_eq!(timer.state().seconds_left, 3);
        assert!((timer.phase_progress() - 0.275).abs() < 1e-9);
    }

    #[test]
    fn pattern_changes_reset_to_rest() {
        let mut timer = BreathingTimer::new(pattern(4, 4, 4, 0, 1), PhaseMode::FourPhase).unwrap();
        timer.start();
        timer.tick();
        timer.set_pattern(pattern(2, 0, 2, 0, 5)).unwrap();
        assert_eq!(timer.state().current_phase, BreathingPhase::Rest);
        assert!(!timer.state().is_active);
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert!(matches!(
            BreathingTimer::new(pattern(4, 4, 4, 0, 0), PhaseMode::FourPhase),
            Err(PatternError::NoCycles(_))
        ));
        assert!(matches!(
            BreathingTimer::new(pattern(0, 0, 0, 3, 2), PhaseMode::ThreePhase),
            Err(PatternError::EmptyCycle(_))
        ));
    }
}
