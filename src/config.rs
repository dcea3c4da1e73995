//! Engine configuration

/// Configuration for an [`AmbientEngine`](crate::AmbientEngine) instance.
///
/// The defaults match the engine's intended use: a small fixed pool of
/// looping ambient tracks mixed to stereo.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: usize,
    /// Fixed capacity of the track pool. Admission beyond this count evicts
    /// the oldest unlocked track.
    pub max_tracks: usize,
    /// Number of discrete gain steps a fade ramp is divided into.
    pub fade_steps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            block_size: 512,
            max_tracks: 4,
            fade_steps: 20,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn max_tracks(mut self, max: usize) -> Self {
        self.max_tracks = max;
        self
    }

    pub fn fade_steps(mut self, steps: u32) -> Self {
        self.fade_steps = steps;
        self
    }
}
