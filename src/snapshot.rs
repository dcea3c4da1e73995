//! Published playback state.
//!
//! A [`PlayingSnapshot`] is the only channel through which observers learn
//! what is playing: an immutable view rebuilt atomically with every
//! track-set mutation. There is no polling API on the engine internals —
//! observers subscribe and receive each new snapshot as it is published.

use crate::sound::SoundId;
use crate::track::TrackId;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Read-only view of one live track.
#[derive(Debug, Clone)]
pub struct PlayingTrack {
    pub sound_id: SoundId,
    pub started_at: Instant,
    pub looped: bool,
    pub gain_db: f32,
    pub pan: f32,
}

/// Immutable view of every currently live track.
#[derive(Debug, Clone, Default)]
pub struct PlayingSnapshot {
    tracks: HashMap<TrackId, PlayingTrack>,
}

impl PlayingSnapshot {
    pub fn new(tracks: HashMap<TrackId, PlayingTrack>) -> Self {
        Self { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn get(&self, id: TrackId) -> Option<&PlayingTrack> {
        self.tracks.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &PlayingTrack)> {
        self.tracks.iter().map(|(id, t)| (*id, t))
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }
}

/// Best-effort notification fired after each republish, used to refresh the
/// host's now-playing info. Runs on a dedicated thread, outside the engine
/// lock, so the hook may call back into the engine. Never a blocking
/// dependency.
pub type NowPlayingHook = Box<dyn Fn(&PlayingSnapshot) + Send>;

/// Owns the current snapshot and fans new ones out to subscribers.
///
/// Lives inside the single-writer controller, so publication is atomic with
/// the mutation that produced it.
pub struct SnapshotPublisher {
    current: Arc<PlayingSnapshot>,
    subscribers: Vec<Sender<Arc<PlayingSnapshot>>>,
    hook_tx: Option<Sender<Arc<PlayingSnapshot>>>,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            current: Arc::new(PlayingSnapshot::default()),
            subscribers: Vec::new(),
            hook_tx: None,
        }
    }

    pub fn current(&self) -> Arc<PlayingSnapshot> {
        Arc::clone(&self.current)
    }

    pub fn subscribe(&mut self) -> Receiver<Arc<PlayingSnapshot>> {
        let (tx, rx) = unbounded();
        // New observers immediately see the current state.
        let _ = tx.send(self.current());
        self.subscribers.push(tx);
        rx
    }

    /// Install the hook, replacing any previous one. The hook runs on its
    /// own thread: `publish` is called under the engine lock, and a hook
    /// that re-enters the engine must not deadlock on it.
    pub fn set_now_playing_hook(&mut self, hook: NowPlayingHook) {
        let (tx, rx) = unbounded::<Arc<PlayingSnapshot>>();
        std::thread::Builder::new()
            .name("hushmix-nowplaying".into())
            .spawn(move || {
                for snapshot in rx {
                    hook(&snapshot);
                }
            })
            .expect("failed to spawn now-playing thread");
        // Dropping the previous sender ends the previous hook thread.
        self.hook_tx = Some(tx);
    }

    pub fn publish(&mut self, snapshot: PlayingSnapshot) {
        self.current = Arc::new(snapshot);
        let current = self.current();
        self.subscribers.retain(|tx| tx.send(current.clone()).is_ok());
        if let Some(tx) = self.hook_tx.take() {
            if tx.send(current).is_ok() {
                self.hook_tx = Some(tx);
            }
        }
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}
