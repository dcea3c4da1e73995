//! Track state and handles.
//!
//! A [`Track`] is one active voice: a sound being rendered through the mix
//! graph. External callers only ever hold the opaque [`TrackId`]; a stale
//! id is detected in O(1) by its generation and treated as a no-op.

use crate::sound::SoundId;
use std::time::Instant;

/// Opaque handle to an active track.
///
/// Slot indices are reused, generations are not: a removed track's id never
/// matches again within the process lifetime, so operations against it are
/// safely discarded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrackId({}.{})", self.slot, self.generation)
    }
}

/// Lifecycle state of a track.
///
/// Transitions are totally ordered per track:
/// `Scheduled -> Playing -> FadingOut`, with `PausedByInterruption` as a
/// parenthesis around `Playing`. The terminal stop is removal from the
/// pool; a removed track has no state to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Created and admitted, voice not yet rendering.
    Scheduled,
    Playing,
    PausedByInterruption,
    FadingOut,
}

/// In-flight fade bookkeeping. `from_db` is the gain to restore if the
/// fade is cancelled: fades commit to completion or revert, never strand
/// a track at a partial level.
#[derive(Debug, Clone, Copy)]
pub struct FadeState {
    pub from_db: f32,
}

/// One active voice in the engine.
#[derive(Debug, Clone)]
pub struct Track {
    pub sound_id: SoundId,
    /// Creation timestamp; admission control evicts by earliest first.
    pub started_at: Instant,
    pub looped: bool,
    pub gain_db: f32,
    /// Stereo pan in [-1, 1].
    pub pan: f32,
    /// Locked tracks are skipped by automatic eviction.
    pub locked: bool,
    pub state: TrackState,
    pub fade: Option<FadeState>,
}

impl Track {
    pub fn new(sound_id: SoundId, looped: bool, gain_db: f32, pan: f32) -> Self {
        Self {
            sound_id,
            started_at: Instant::now(),
            looped,
            gain_db,
            pan: pan.clamp(-1.0, 1.0),
            locked: false,
            state: TrackState::Scheduled,
            fade: None,
        }
    }
}
