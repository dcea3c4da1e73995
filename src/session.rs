//! Host audio-session lifecycle coordination.
//!
//! The host notifies the engine of interruptions (calls, alarms), route
//! changes (headphones unplugged) and foreground/background transitions;
//! the engine only reacts. The coordinator is a pure state machine: it
//! returns directives and the controller executes them against the pool,
//! mix graph and output engine, so the transition logic is testable without
//! any hardware.

/// Why the output route changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChangeReason {
    /// The device in use disappeared (e.g. headphones removed). Risks a
    /// sudden jump to loudspeaker loudness, so playback pauses.
    DeviceUnavailable,
    /// A new device became available. No playback impact.
    NewDeviceAvailable,
}

/// Lifecycle notifications from the host audio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    InterruptionBegan,
    InterruptionEnded { should_resume: bool },
    RouteChanged { reason: RouteChangeReason },
    EnteredBackground,
    EnteredForeground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Engine running, tracks may play.
    Active,
    /// External interruption in progress; tracks paused in place.
    InterruptedPaused,
    /// Unsafe route change; paused until the user explicitly resumes.
    RouteSafetyPaused,
}

/// What the controller must do in response to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDirective {
    PauseAllTracks,
    ResumeAllTracks,
    StopOutput,
    RestartOutput,
    EndListeningSession,
    /// A new continuous playback span begins (resume after a pause that
    /// ended the previous span).
    StartListeningSession,
    /// Verify the output engine is still running and restart it if not.
    VerifyOutput,
}

pub struct SessionCoordinator {
    state: SessionState,
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self {
            state: SessionState::Active,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Apply a host event, returning the directives to execute.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionDirective> {
        use SessionDirective::*;
        match (self.state, event) {
            (SessionState::Active, SessionEvent::InterruptionBegan) => {
                log::info!("session: interruption began, pausing all tracks");
                self.state = SessionState::InterruptedPaused;
                vec![PauseAllTracks, StopOutput]
            }
            (SessionState::InterruptedPaused, SessionEvent::InterruptionEnded { should_resume }) => {
                if should_resume {
                    log::info!("session: interruption ended, resuming");
                    self.state = SessionState::Active;
                    vec![RestartOutput, ResumeAllTracks]
                } else {
                    // Host did not grant resumption; wait for an explicit
                    // user resume.
                    log::info!("session: interruption ended without resume hint");
                    Vec::new()
                }
            }
            (
                SessionState::Active,
                SessionEvent::RouteChanged {
                    reason: RouteChangeReason::DeviceUnavailable,
                },
            ) => {
                log::info!("session: output device became unavailable, pausing");
                self.state = SessionState::RouteSafetyPaused;
                vec![PauseAllTracks, EndListeningSession]
            }
            (_, SessionEvent::RouteChanged { .. }) => Vec::new(),
            (_, SessionEvent::EnteredBackground) => {
                // Session stays alive in the background; nothing to do.
                Vec::new()
            }
            (SessionState::Active, SessionEvent::EnteredForeground) => vec![VerifyOutput],
            (_, SessionEvent::EnteredForeground) => Vec::new(),
            (state, event) => {
                log::debug!("session: ignoring {event:?} in {state:?}");
                Vec::new()
            }
        }
    }

    /// Explicit user resume out of a paused state. Route-safety pauses have
    /// no automatic return path, this is the only way back; they also ended
    /// the listening session, so resuming opens a new span.
    pub fn resume_explicit(&mut self) -> Vec<SessionDirective> {
        use SessionDirective::*;
        match self.state {
            SessionState::RouteSafetyPaused => {
                self.state = SessionState::Active;
                vec![RestartOutput, ResumeAllTracks, StartListeningSession]
            }
            SessionState::InterruptedPaused => {
                self.state = SessionState::Active;
                vec![RestartOutput, ResumeAllTracks]
            }
            SessionState::Active => Vec::new(),
        }
    }
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
