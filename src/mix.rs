//! Mix graph: wires tracks into the shared output bus.
//!
//! The control thread owns a [`MixGraph`] and mutates voices through it;
//! the audio callback only calls [`mix_voices`] against the shared voice
//! table. The callback never allocates or blocks: on lock contention it
//! leaves the buffer silent for that block, and completed one-shot voices
//! are reported back over a channel rather than mutated into the track set
//! from the audio thread.

use crate::audio_data::AudioData;
use crate::error::{EngineError, Result};
use crate::level::db_to_linear;
use crate::track::TrackId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One playing voice as seen by the audio callback.
#[derive(Debug)]
pub struct Voice {
    data: Arc<AudioData>,
    /// Playback position in frames. Looping voices wrap in place, so the
    /// whole decoded buffer self-loops with no gap at the boundary.
    cursor: usize,
    looped: bool,
    /// Effective linear gain (per-track dB folded with the safety ceiling).
    gain: f32,
    /// Fade ramp multiplier on top of `gain`; 1.0 when no fade is running.
    fade_level: f32,
    pan: f32,
    paused: bool,
}

impl Voice {
    pub fn new(data: Arc<AudioData>, looped: bool, pan: f32) -> Self {
        Self {
            data,
            cursor: 0,
            looped,
            gain: 0.0,
            fade_level: 1.0,
            pan: pan.clamp(-1.0, 1.0),
            paused: false,
        }
    }

    /// Equal-power stereo weights for this voice's pan position.
    fn pan_weights(&self) -> (f32, f32) {
        let theta = (self.pan + 1.0) * std::f32::consts::FRAC_PI_4;
        (theta.cos(), theta.sin())
    }
}

pub type VoiceTable = Arc<Mutex<HashMap<TrackId, Voice>>>;

/// Connection topology and gain staging for all live voices.
pub struct MixGraph {
    voices: VoiceTable,
}

impl MixGraph {
    pub fn new() -> Self {
        Self {
            voices: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle to the voice table for the audio callback.
    pub fn voice_table(&self) -> VoiceTable {
        Arc::clone(&self.voices)
    }

    /// Attach a voice for `id`. Rejects empty sources; never disturbs the
    /// routing of already-connected voices.
    pub fn connect(&self, id: TrackId, voice: Voice) -> Result<()> {
        if voice.data.is_empty() {
            return Err(EngineError::ResourceUnavailable(format!(
                "cannot attach empty source for {id}"
            )));
        }
        let mut voices = self.lock();
        voices.insert(id, voice);
        log::debug!("mix: connected {id} ({} voices live)", voices.len());
        Ok(())
    }

    /// Detach and release the voice. No-op for unknown ids.
    pub fn disconnect(&self, id: TrackId) {
        if self.lock().remove(&id).is_some() {
            log::debug!("mix: disconnected {id}");
        }
    }

    /// Recompute and apply the effective linear gain for one voice.
    ///
    /// `ceiling` is `Some` when the safety policy is enabled; the per-track
    /// linear gain is capped at 1.0 before the ceiling multiplies in, so the
    /// hardware output can never exceed the ceiling.
    pub fn apply_gain(&self, id: TrackId, gain_db: f32, ceiling: Option<f32>) {
        if let Some(voice) = self.lock().get_mut(&id) {
            voice.gain = Self::effective_gain(gain_db, ceiling);
        }
    }

    pub(crate) fn effective_gain(gain_db: f32, ceiling: Option<f32>) -> f32 {
        let linear = db_to_linear(gain_db);
        match ceiling {
            Some(c) => linear.min(1.0) * c.clamp(0.0, 1.0),
            None => linear,
        }
    }

    /// Set the fade multiplier for a voice (1.0 clears the fade).
    pub fn set_fade_level(&self, id: TrackId, level: f32) {
        if let Some(voice) = self.lock().get_mut(&id) {
            voice.fade_level = level.clamp(0.0, 1.0);
        }
    }

    pub fn set_pan(&self, id: TrackId, pan: f32) {
        if let Some(voice) = self.lock().get_mut(&id) {
            voice.pan = pan.clamp(-1.0, 1.0);
        }
    }

    pub fn pause(&self, id: TrackId) {
        if let Some(voice) = self.lock().get_mut(&id) {
            voice.paused = true;
        }
    }

    pub fn resume(&self, id: TrackId) {
        if let Some(voice) = self.lock().get_mut(&id) {
            voice.paused = false;
        }
    }

    pub fn pause_all(&self) {
        for voice in self.lock().values_mut() {
            voice.paused = true;
        }
    }

    pub fn resume_all(&self) {
        for voice in self.lock().values_mut() {
            voice.paused = false;
        }
    }

    /// Effective linear gain currently applied for `id` (fade included).
    /// Diagnostic/test accessor.
    pub fn current_gain(&self, id: TrackId) -> Option<f32> {
        self.lock().get(&id).map(|v| v.gain * v.fade_level)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TrackId, Voice>> {
        self.voices.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MixGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Mix all playing voices into `buffer` (interleaved, `channels` wide).
///
/// Runs on the audio callback thread. Returns the ids of one-shot voices
/// that finished during this block; the caller marshals those onto the
/// control thread before the track set is touched. Finished voices are
/// dropped from the table here so they render silence immediately.
pub fn mix_voices(buffer: &mut [f32], channels: u16, voices: &VoiceTable) -> Vec<TrackId> {
    let Ok(mut voices) = voices.try_lock() else {
        // Control thread holds the table; skip this block rather than wait.
        return Vec::new();
    };

    let channels = channels as usize;
    let frame_count = buffer.len() / channels;
    let mut finished = Vec::new();

    for (id, voice) in voices.iter_mut() {
        if voice.paused {
            continue;
        }

        let samples = voice.data.samples();
        let src_channels = voice.data.channels() as usize;
        let total_frames = voice.data.total_frames();
        let amp = voice.gain * voice.fade_level;
        let (left_w, right_w) = voice.pan_weights();
        let mut done = false;

        for frame_idx in 0..frame_count {
            if voice.cursor >= total_frames {
                if voice.looped {
                    voice.cursor = 0;
                } else {
                    done = true;
                    break;
                }
            }

            let base = voice.cursor * src_channels;
            let (l, r) = if src_channels >= 2 {
                (samples[base], samples[base + 1])
            } else {
                (samples[base], samples[base])
            };

            let out = frame_idx * channels;
            if channels >= 2 {
                buffer[out] += l * amp * left_w;
                buffer[out + 1] += r * amp * right_w;
            } else {
                buffer[out] += 0.5 * (l + r) * amp;
            }

            voice.cursor += 1;
        }

        if done || (!voice.looped && voice.cursor >= total_frames) {
            finished.push(*id);
        }
    }

    for id in &finished {
        voices.remove(id);
    }

    finished
}
