mod loader;
mod resampler;

use crate::error::{EngineError, Result};
pub use loader::{SoundLoader, SymphoniaLoader};
pub use resampler::Resampler;
use std::time::Duration;

/// Decoded PCM for one sound.
///
/// Samples are stored **interleaved** (`[L0, R0, L1, R1, ...]` for stereo),
/// which is what both the decoders and the output device expect and keeps
/// frame-sequential playback cache friendly.
#[derive(Debug, Clone)]
pub struct AudioData {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    duration: Duration,
    total_frames: usize,
}

impl AudioData {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if channels == 0 {
            return Err(EngineError::AudioFormat(
                "channel count must be greater than 0".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(EngineError::AudioFormat(
                "sample rate must be greater than 0".to_string(),
            ));
        }
        let total_frames = samples.len() / channels as usize;
        let duration = Duration::from_secs_f64(total_frames as f64 / sample_rate as f64);
        Ok(Self {
            samples,
            sample_rate,
            channels,
            duration,
            total_frames,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Downmix all channels to mono by averaging each frame.
    pub fn to_mono(&self) -> Result<Self> {
        if self.channels == 1 {
            return Ok(self.clone());
        }
        let mono: Vec<f32> = self
            .samples
            .chunks(self.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect();
        Self::new(mono, self.sample_rate, 1)
    }

    /// Resample to `target_sample_rate`, returning a new `AudioData`.
    pub fn resample(&self, target_sample_rate: u32) -> Result<Self> {
        if target_sample_rate == self.sample_rate {
            return Ok(self.clone());
        }
        let resampler = Resampler::new(self.sample_rate, target_sample_rate, self.channels, None)?;
        let resampled = resampler.resample_interleaved(&self.samples)?;
        Self::new(resampled, target_sample_rate, self.channels)
    }
}
