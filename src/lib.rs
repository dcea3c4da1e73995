//! hushmix — real-time multi-track ambient-audio playback engine.
//!
//! Mixes a small fixed pool of looping or one-shot tracks, enforces a
//! loudness ceiling from a safe-volume policy, runs cancellable fades and
//! scheduled stops off the audio thread, and stays consistent under host
//! audio-session interruptions and route changes.
//!
//! # Architecture
//!
//! - **Caller thread**: owns the [`AmbientEngine`] facade and the output
//!   stream; facade calls are serialized through a single-writer controller.
//! - **Control thread**: executes scheduled stops, fade steps, voice
//!   completions and safety advisories against the same controller.
//! - **Audio thread**: cpal callback; mixes prepared voices and reports
//!   one-shot completions over a channel, never mutating the track set.

pub mod audio_data;
pub mod config;
pub mod engine;
pub mod error;
pub mod level;
pub mod mix;
pub mod output;
pub mod pool;
pub mod safety;
pub mod sched;
pub mod session;
pub mod snapshot;
pub mod sound;
pub mod track;

pub use audio_data::{AudioData, SoundLoader, SymphoniaLoader};
pub use config::EngineConfig;
pub use engine::{AmbientEngine, PlayOptions, StopWhen};
pub use error::{EngineError, Result};
pub use safety::{SafeVolumeManager, SafetyAdvisory};
pub use session::{RouteChangeReason, SessionEvent, SessionState};
pub use snapshot::{PlayingSnapshot, PlayingTrack};
pub use sound::{Sound, SoundId, SoundSource};
pub use track::{TrackId, TrackState};
