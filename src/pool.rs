//! Fixed-capacity track pool with admission control and eviction.
//!
//! The pool is a generational slot arena: each slot carries a generation
//! counter that bumps on reuse, so a stale [`TrackId`] can never address a
//! newer occupant. Admission never fails; at capacity it evicts the oldest
//! unlocked track (oldest of all if everything is locked) so playback can
//! always start.

use crate::track::{Track, TrackId};

struct Slot {
    generation: u32,
    track: Option<Track>,
}

pub struct TrackPool {
    slots: Vec<Slot>,
    capacity: usize,
    live: usize,
}

impl TrackPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "track pool capacity must be at least 1");
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                track: None,
            })
            .collect();
        Self {
            slots,
            capacity,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Admit a track, evicting if the pool is full.
    ///
    /// Returns the new track's id and, when an eviction was required, the id
    /// of the track that was removed to make room. Eviction is a silent
    /// policy action; the caller is responsible for detaching the evicted
    /// voice.
    pub fn admit(&mut self, track: Track) -> (TrackId, Option<TrackId>) {
        let evicted = if self.live >= self.capacity {
            let victim = self
                .eviction_candidate()
                .expect("full pool must have an eviction candidate");
            log::debug!("pool at capacity, evicting {victim}");
            self.remove(victim);
            Some(victim)
        } else {
            None
        };

        let slot_idx = self
            .slots
            .iter()
            .position(|s| s.track.is_none())
            .expect("pool below capacity must have a free slot");

        let slot = &mut self.slots[slot_idx];
        slot.generation += 1;
        slot.track = Some(track);
        self.live += 1;

        let id = TrackId {
            slot: slot_idx as u32,
            generation: slot.generation,
        };
        (id, evicted)
    }

    /// Oldest unlocked track, ties broken by slot order; oldest of all when
    /// every track is locked. `None` only if the pool is empty.
    fn eviction_candidate(&self) -> Option<TrackId> {
        let pick = |want_unlocked: bool| {
            self.slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| {
                    s.track
                        .as_ref()
                        .filter(|t| !want_unlocked || !t.locked)
                        .map(|t| (i, s.generation, t.started_at))
                })
                .min_by_key(|&(i, _, started_at)| (started_at, i))
                .map(|(slot, generation, _)| TrackId {
                    slot: slot as u32,
                    generation,
                })
        };
        pick(true).or_else(|| pick(false))
    }

    /// Remove a track. Idempotent: a stale or already-removed id returns
    /// `None` and changes nothing.
    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let track = slot.track.take()?;
        self.live -= 1;
        Some(track)
    }

    /// Remove every live track, returning their ids.
    pub fn evict_all(&mut self) -> Vec<TrackId> {
        let ids: Vec<TrackId> = self.iter().map(|(id, _)| id).collect();
        for id in &ids {
            self.remove(*id);
        }
        ids
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.track.as_ref()
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.track.as_mut()
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &Track)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.track.as_ref().map(|t| {
                (
                    TrackId {
                        slot: i as u32,
                        generation: s.generation,
                    },
                    t,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TrackId, &mut Track)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.track.as_mut().map(move |t| {
                (
                    TrackId {
                        slot: i as u32,
                        generation,
                    },
                    t,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Track;
    use std::thread::sleep;
    use std::time::Duration;

    fn track(name: &str) -> Track {
        Track::new(name.to_string(), true, 0.0, 0.0)
    }

    // started_at ordering needs distinct instants; Instant can tie on a
    // fast clock without this.
    fn admit_spaced(pool: &mut TrackPool, name: &str) -> TrackId {
        sleep(Duration::from_millis(2));
        pool.admit(track(name)).0
    }

    #[test]
    fn capacity_never_exceeded() {
        let mut pool = TrackPool::new(4);
        for i in 0..10 {
            admit_spaced(&mut pool, &format!("s{i}"));
            assert!(pool.len() <= 4);
        }
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn evicts_oldest_unlocked() {
        let mut pool = TrackPool::new(4);
        let a = admit_spaced(&mut pool, "a");
        let b = admit_spaced(&mut pool, "b");
        let c = admit_spaced(&mut pool, "c");
        let d = admit_spaced(&mut pool, "d");
        sleep(Duration::from_millis(2));
        let (e, evicted) = pool.admit(track("e"));
        assert_eq!(evicted, Some(a));
        assert!(!pool.contains(a));
        for id in [b, c, d, e] {
            assert!(pool.contains(id));
        }
    }

    #[test]
    fn locked_tracks_skipped_until_all_locked() {
        let mut pool = TrackPool::new(2);
        let a = admit_spaced(&mut pool, "a");
        let b = admit_spaced(&mut pool, "b");
        pool.get_mut(a).unwrap().locked = true;

        let (_, evicted) = pool.admit(track("c"));
        assert_eq!(evicted, Some(b), "unlocked b evicted before locked a");

        // Lock everything: the oldest goes regardless, admission never blocks.
        for (_, t) in pool.iter_mut() {
            t.locked = true;
        }
        let (_, evicted) = pool.admit(track("d"));
        assert_eq!(evicted, Some(a));
    }

    #[test]
    fn remove_is_idempotent_and_generation_checked() {
        let mut pool = TrackPool::new(2);
        let a = pool.admit(track("a")).0;
        assert!(pool.remove(a).is_some());
        assert!(pool.remove(a).is_none());

        // Slot reuse bumps the generation; the stale id stays dead.
        let b = pool.admit(track("b")).0;
        assert_eq!(a.slot, b.slot);
        assert_ne!(a.generation, b.generation);
        assert!(!pool.contains(a));
        assert!(pool.get(a).is_none());
    }

    #[test]
    fn evict_all_returns_every_live_id() {
        let mut pool = TrackPool::new(4);
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| admit_spaced(&mut pool, n))
            .collect();
        let mut removed = pool.evict_all();
        removed.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(removed, expected);
        assert!(pool.is_empty());
    }
}
