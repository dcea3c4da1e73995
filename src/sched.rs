//! Deferred, cancellable engine actions.
//!
//! The scheduler is a pure deadline table: it never sleeps and owns no
//! thread. The control loop asks for [`Scheduler::next_deadline`], waits at
//! most that long for messages, then drains [`Scheduler::due`] and executes
//! the returned actions — so every scheduled action runs on the control
//! thread, serialized with facade calls, and tests can drive time
//! synthetically.
//!
//! Fades are fixed-step gain ramps. The scheduler only emits step levels;
//! the pre-fade gain needed for cancel-and-revert lives on the track.

use crate::track::TrackId;
use std::time::{Duration, Instant};

/// What a completed fade does to its track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FadeKind {
    /// Ramp to silence, then remove the track.
    Remove,
    /// Ramp down to a multiplier and keep playing (break-reminder dip).
    DipTo(f32),
}

impl FadeKind {
    fn target_level(self) -> f32 {
        match self {
            FadeKind::Remove => 0.0,
            FadeKind::DipTo(level) => level.clamp(0.0, 1.0),
        }
    }
}

/// Actions handed back to the control loop when their deadline passes.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedAction {
    /// The single global scheduled stop fired.
    StopAll { fade: Option<Duration> },
    /// A per-track auto-fade timer fired; the controller starts the ramp.
    StartFade { id: TrackId, fade: Duration },
    /// One fade ramp step: apply `level` as the track's fade multiplier.
    FadeStep { id: TrackId, level: f32 },
    /// A ramp ran to completion.
    FadeFinished { id: TrackId, kind: FadeKind },
}

#[derive(Debug)]
struct FadeRamp {
    id: TrackId,
    kind: FadeKind,
    started: Instant,
    step_interval: Duration,
    steps: u32,
    next_step: u32,
}

impl FadeRamp {
    fn level_at(&self, step: u32) -> f32 {
        let p = step as f32 / self.steps as f32;
        1.0 - p * (1.0 - self.kind.target_level())
    }

    fn step_deadline(&self, step: u32) -> Instant {
        self.started + self.step_interval * step
    }
}

pub struct Scheduler {
    /// At most one global stop schedule is meaningful at a time.
    stop_all: Option<(Instant, Option<Duration>)>,
    auto_fades: Vec<(TrackId, Instant, Duration)>,
    ramps: Vec<FadeRamp>,
    fade_steps: u32,
}

impl Scheduler {
    pub fn new(fade_steps: u32) -> Self {
        Self {
            stop_all: None,
            auto_fades: Vec::new(),
            ramps: Vec::new(),
            fade_steps: fade_steps.max(1),
        }
    }

    /// Arm the global stop. Re-arming cancels any previous pending stop.
    pub fn arm_stop_all(&mut self, fire_at: Instant, fade: Option<Duration>) {
        if self.stop_all.is_some() {
            log::debug!("replacing pending scheduled stop");
        }
        self.stop_all = Some((fire_at, fade));
    }

    pub fn cancel_stop_all(&mut self) {
        self.stop_all = None;
    }

    /// Arm a per-track auto-fade, independent of the global stop schedule.
    /// Re-arming for the same track replaces the earlier timer.
    pub fn arm_fade(&mut self, id: TrackId, fire_at: Instant, fade: Duration) {
        self.auto_fades.retain(|(t, _, _)| *t != id);
        self.auto_fades.push((id, fire_at, fade));
    }

    /// Start a fixed-step gain ramp for a track.
    pub fn begin_ramp(&mut self, id: TrackId, kind: FadeKind, now: Instant, duration: Duration) {
        self.ramps.retain(|r| r.id != id);
        let steps = self.fade_steps;
        self.ramps.push(FadeRamp {
            id,
            kind,
            started: now,
            step_interval: duration / steps,
            steps,
            next_step: 1,
        });
    }

    /// Cancel a running ramp. Returns whether one existed; the caller is
    /// responsible for reverting the track's gain.
    pub fn cancel_ramp(&mut self, id: TrackId) -> bool {
        let before = self.ramps.len();
        self.ramps.retain(|r| r.id != id);
        before != self.ramps.len()
    }

    /// Drop every pending action targeting `id` (track removed for another
    /// reason — nothing may fire against a stale handle).
    pub fn cancel_track(&mut self, id: TrackId) {
        self.auto_fades.retain(|(t, _, _)| *t != id);
        self.ramps.retain(|r| r.id != id);
    }

    /// Cancel every pending action.
    pub fn cancel_all(&mut self) {
        self.stop_all = None;
        self.auto_fades.clear();
        self.ramps.clear();
    }

    pub fn has_ramp(&self, id: TrackId) -> bool {
        self.ramps.iter().any(|r| r.id == id)
    }

    pub fn is_idle(&self) -> bool {
        self.stop_all.is_none() && self.auto_fades.is_empty() && self.ramps.is_empty()
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut next: Option<Instant> = self.stop_all.map(|(t, _)| t);
        for (_, t, _) in &self.auto_fades {
            next = Some(next.map_or(*t, |n| n.min(*t)));
        }
        for ramp in &self.ramps {
            let t = ramp.step_deadline(ramp.next_step);
            next = Some(next.map_or(t, |n| n.min(t)));
        }
        next
    }

    /// Collect every action whose deadline is at or before `now`.
    ///
    /// Ramp steps that have all become due at once collapse into a single
    /// `FadeStep` at the most recent level.
    pub fn due(&mut self, now: Instant) -> Vec<SchedAction> {
        let mut actions = Vec::new();

        if let Some((fire_at, fade)) = self.stop_all {
            if fire_at <= now {
                self.stop_all = None;
                actions.push(SchedAction::StopAll { fade });
            }
        }

        let mut fired = Vec::new();
        self.auto_fades.retain(|(id, fire_at, fade)| {
            if *fire_at <= now {
                fired.push(SchedAction::StartFade {
                    id: *id,
                    fade: *fade,
                });
                false
            } else {
                true
            }
        });
        actions.extend(fired);

        let mut done = Vec::new();
        for ramp in &mut self.ramps {
            let mut last_due = None;
            while ramp.next_step <= ramp.steps && ramp.step_deadline(ramp.next_step) <= now {
                last_due = Some(ramp.next_step);
                ramp.next_step += 1;
            }
            if let Some(step) = last_due {
                actions.push(SchedAction::FadeStep {
                    id: ramp.id,
                    level: ramp.level_at(step),
                });
                if step >= ramp.steps {
                    actions.push(SchedAction::FadeFinished {
                        id: ramp.id,
                        kind: ramp.kind,
                    });
                    done.push(ramp.id);
                }
            }
        }
        self.ramps.retain(|r| !done.contains(&r.id));

        actions
    }
}
