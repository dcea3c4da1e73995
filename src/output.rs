//! Hardware output engine.
//!
//! Thin wrapper around a cpal output stream. The stream's real-time
//! callback only runs the registered fill callback against a scratch f32
//! buffer and converts to the device sample format; it never allocates
//! beyond that scratch, never locks unconditionally and never touches the
//! track set.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Fills `buffer` (interleaved, `channels` wide) and returns the number of
/// frames written.
pub type FillCallback = dyn Fn(&mut [f32], u16) -> usize + Send + Sync;

pub struct OutputEngine {
    config: EngineConfig,
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
    fill_callback: Option<Arc<FillCallback>>,
}

impl OutputEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            stream: None,
            is_running: Arc::new(AtomicBool::new(false)),
            frames_processed: Arc::new(AtomicUsize::new(0)),
            fill_callback: None,
        }
    }

    pub fn set_fill_callback<F>(&mut self, callback: F)
    where
        F: Fn(&mut [f32], u16) -> usize + Send + Sync + 'static,
    {
        self.fill_callback = Some(Arc::new(callback));
    }

    /// Open the default output device and start rendering. Idempotent while
    /// running. Failures surface as [`EngineError::ResourceUnavailable`].
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let fill_callback = self.fill_callback.clone().ok_or_else(|| {
            EngineError::Engine("no fill callback set on output engine".into())
        })?;

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            EngineError::ResourceUnavailable("no default output device available".into())
        })?;

        let stream_config = cpal::StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.block_size as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            EngineError::ResourceUnavailable(format!("failed to get default config: {e}"))
        })?;

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => {
                self.create_stream::<f32>(&device, &stream_config, fill_callback)?
            }
            cpal::SampleFormat::I16 => {
                self.create_stream::<i16>(&device, &stream_config, fill_callback)?
            }
            cpal::SampleFormat::U16 => {
                self.create_stream::<u16>(&device, &stream_config, fill_callback)?
            }
            other => {
                return Err(EngineError::AudioFormat(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        };

        stream.play().map_err(|e| {
            EngineError::ResourceUnavailable(format!("failed to start stream: {e}"))
        })?;

        self.stream = Some(stream);
        self.is_running.store(true, Ordering::Relaxed);
        log::info!(
            "output engine started ({} Hz, {} ch)",
            self.config.sample_rate,
            self.config.channels
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("output engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        fill_callback: Arc<FillCallback>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let is_running = self.is_running.clone();
        let frames_processed = self.frames_processed.clone();
        let channels = self.config.channels;

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0f32);
                        }
                        return;
                    }

                    let mut scratch = vec![0.0f32; data.len()];
                    let frames_filled = fill_callback(&mut scratch, channels);

                    for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(*sample);
                    }
                    frames_processed.fetch_add(frames_filled, Ordering::Relaxed);
                },
                move |err| {
                    log::error!("audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| {
                EngineError::ResourceUnavailable(format!("failed to build stream: {e}"))
            })?;

        Ok(stream)
    }
}

impl Drop for OutputEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
