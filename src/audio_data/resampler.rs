use crate::error::{EngineError, Result};

/// Offline batch resampler used to bring loaded sounds to the engine rate.
pub struct Resampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: u16,
    chunk_size: usize,
}

impl Resampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: u16,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(EngineError::AudioFormat(
                "sample rates must be greater than 0".to_string(),
            ));
        }
        if channels == 0 {
            return Err(EngineError::AudioFormat(
                "channel count must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            channels,
            chunk_size: chunk_size.unwrap_or(1024),
        })
    }

    /// Resample a single (planar) channel of samples.
    pub fn resample_channel(&self, channel_samples: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(channel_samples.to_vec());
        }

        use rubato::{FftFixedIn, Resampler as _};

        let mut resampler = FftFixedIn::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            1, // single channel
        )
        .map_err(|e| EngineError::AudioFormat(format!("failed to create resampler: {e}")))?;

        let mut output = Vec::new();
        let mut input_index = 0;

        while input_index < channel_samples.len() {
            let remaining = channel_samples.len() - input_index;
            let to_process = remaining.min(self.chunk_size);
            if to_process == 0 {
                break;
            }

            // Pad the final chunk up to chunk_size.
            let mut chunk = vec![0.0f32; self.chunk_size];
            let end = (input_index + to_process).min(channel_samples.len());
            chunk[..to_process].copy_from_slice(&channel_samples[input_index..end]);

            let waves_out = resampler
                .process(&[chunk], None)
                .map_err(|e| EngineError::AudioFormat(format!("resampling error: {e}")))?;

            if let Some(first) = waves_out.first() {
                output.extend_from_slice(first);
            }

            input_index += to_process;
        }

        Ok(output)
    }

    /// Resample interleaved multi-channel samples, preserving interleaving.
    ///
    /// Internally de-interleaves, resamples each channel, re-interleaves.
    pub fn resample_interleaved(&self, interleaved: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(interleaved.to_vec());
        }

        let mut resampled_channels = Vec::with_capacity(self.channels as usize);
        for ch in 0..self.channels as usize {
            let channel_data: Vec<f32> = interleaved
                .chunks(self.channels as usize)
                .map(|frame| frame.get(ch).copied().unwrap_or(0.0))
                .collect();
            resampled_channels.push(self.resample_channel(&channel_data)?);
        }

        let new_frames = resampled_channels[0].len();
        let mut out = Vec::with_capacity(new_frames * self.channels as usize);
        for frame_idx in 0..new_frames {
            for channel in resampled_channels.iter().take(self.channels as usize) {
                if frame_idx < channel.len() {
                    out.push(channel[frame_idx]);
                }
            }
        }

        Ok(out)
    }

    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}
