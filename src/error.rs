//! Error types for hushmix

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The requested sound could not be located or decoded. Surfaced to the
    /// caller of `play`; never retried automatically.
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),

    /// A hardware voice or the output engine could not be attached/started.
    /// Surfaced to the caller; the caller may retry.
    #[error("audio resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
