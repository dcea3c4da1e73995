use crate::audio_data::AudioData;
use crate::error::{EngineError, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use symphonia::{
    core::{
        audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
        io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Loads and decodes a sound file into [`AudioData`].
///
/// The engine talks to this trait only; swapping in a fake loader is how
/// tests play without touching the filesystem.
pub trait SoundLoader {
    fn load(&self, path: &str) -> Result<Arc<AudioData>>;
}

/// Default loader backed by the Symphonia decoder library.
///
/// Supports the usual container/codec set (WAV, FLAC, OGG, ...) and
/// decodes to interleaved f32 PCM. Decode failures surface as
/// [`EngineError::SourceUnavailable`].
pub struct SymphoniaLoader;

impl SoundLoader for SymphoniaLoader {
    fn load(&self, path: &str) -> Result<Arc<AudioData>> {
        let file = File::open(path).map_err(|e| {
            EngineError::SourceUnavailable(format!("cannot open {path}: {e}"))
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                EngineError::SourceUnavailable(format!("failed to probe audio format: {e:?}"))
            })?;

        let mut format = probed.format;

        let track = format.default_track().ok_or_else(|| {
            EngineError::SourceUnavailable("no default audio track found".to_string())
        })?;

        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
            EngineError::SourceUnavailable("sample rate not found".to_string())
        })?;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| EngineError::SourceUnavailable("channel count not found".to_string()))?
            .count() as u16;

        let mut decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                EngineError::SourceUnavailable(format!("failed to create decoder: {e:?}"))
            })?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => break, // end-of-file
                Err(e) => {
                    return Err(EngineError::SourceUnavailable(format!(
                        "error reading packet: {e:?}"
                    )));
                }
            };

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => break, // also EOF in some formats
                Err(Error::DecodeError(_)) => continue, // recoverable corruption
                Err(e) => {
                    return Err(EngineError::SourceUnavailable(format!(
                        "error decoding packet: {e:?}"
                    )));
                }
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity();

            let mut tmp = SampleBuffer::<f32>::new(capacity as u64, spec);
            tmp.copy_interleaved_ref(decoded);
            samples.extend_from_slice(tmp.samples());
        }

        Ok(Arc::new(AudioData::new(samples, sample_rate, channels)?))
    }
}
