//! Safe-volume policy boundary.
//!
//! The policy body (warning thresholds, break cadence, daily limits) lives
//! outside the engine. This module holds what the engine needs from it: the
//! current loudness ceiling, the enabled flag, listening-session bookkeeping
//! and a typed advisory channel the engine subscribes to at construction —
//! an explicit observer registration, not a stringly broadcast bus.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Advisory signals originated by the safety policy. Each maps to a defined
/// engine reaction; none is ever an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyAdvisory {
    /// Listening level worth flagging. The engine takes no action.
    VolumeWarning,
    /// A listening break is recommended; the engine dips all tracks to a
    /// reduced level.
    BreakRecommended,
    /// Maximum continuous listening time reached; the engine stops all
    /// playback.
    MaxTimeReached,
}

#[derive(Debug)]
struct SafetyState {
    ceiling: f32,
    enabled: bool,
    session_started: Option<Instant>,
}

/// Loudness ceiling and listening-session oracle.
pub struct SafeVolumeManager {
    state: Mutex<SafetyState>,
    subscribers: Mutex<Vec<Sender<SafetyAdvisory>>>,
}

impl SafeVolumeManager {
    pub fn new(ceiling: f32, enabled: bool) -> Self {
        Self {
            state: Mutex::new(SafetyState {
                ceiling: ceiling.clamp(0.0, 1.0),
                enabled,
                session_started: None,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current loudness ceiling as a linear multiplier in [0, 1].
    pub fn ceiling(&self) -> f32 {
        self.lock_state().ceiling
    }

    pub fn enabled(&self) -> bool {
        self.lock_state().enabled
    }

    pub fn set_ceiling(&self, ceiling: f32) {
        self.lock_state().ceiling = ceiling.clamp(0.0, 1.0);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock_state().enabled = enabled;
    }

    /// Mark the start of a continuous playback span. Called exactly once per
    /// span by the engine (first track started); nested calls are ignored.
    pub fn start_listening_session(&self) {
        let mut state = self.lock_state();
        if state.session_started.is_none() {
            log::debug!("listening session started");
            state.session_started = Some(Instant::now());
        }
    }

    /// Mark the end of a span (last track removed). No-op when no session
    /// is running.
    pub fn end_listening_session(&self) {
        let mut state = self.lock_state();
        if let Some(started) = state.session_started.take() {
            log::debug!("listening session ended after {:?}", started.elapsed());
        }
    }

    pub fn session_duration(&self) -> Option<Duration> {
        self.lock_state().session_started.map(|s| s.elapsed())
    }

    /// Register an advisory observer. The engine subscribes once at
    /// construction time.
    pub fn subscribe(&self) -> Receiver<SafetyAdvisory> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        rx
    }

    /// Broadcast an advisory to all observers. Called by the external
    /// policy body; disconnected observers are pruned.
    pub fn notify(&self, advisory: SafetyAdvisory) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(advisory).is_ok());
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SafetyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
