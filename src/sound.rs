//! Catalog boundary types.
//!
//! The engine never parses the sound catalog; it accepts a resolved
//! [`Sound`] descriptor and refers back to it only by [`SoundId`].

use crate::audio_data::AudioData;
use std::sync::Arc;

/// Stable identifier of a catalog sound.
pub type SoundId = String;

/// Where a sound's PCM comes from.
#[derive(Debug, Clone)]
pub enum SoundSource {
    /// Decode from a file on first play; cached afterwards.
    Path(String),
    /// Already-decoded audio, typically injected by tests or a preloading
    /// catalog.
    Memory(Arc<AudioData>),
}

/// A resolved sound descriptor handed over by the catalog.
#[derive(Debug, Clone)]
pub struct Sound {
    pub id: SoundId,
    pub source: SoundSource,
    /// Default playback gain in dB, applied when `play` gives no override.
    pub default_gain_db: f32,
    /// Whether this sound loops indefinitely by default.
    pub looped: bool,
}

impl Sound {
    pub fn from_path(id: impl Into<SoundId>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: SoundSource::Path(path.into()),
            default_gain_db: 0.0,
            looped: true,
        }
    }

    pub fn from_memory(id: impl Into<SoundId>, data: Arc<AudioData>) -> Self {
        Self {
            id: id.into(),
            source: SoundSource::Memory(data),
            default_gain_db: 0.0,
            looped: true,
        }
    }

    pub fn default_gain_db(mut self, db: f32) -> Self {
        self.default_gain_db = db;
        self
    }

    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }
}
