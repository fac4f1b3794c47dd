//! Error types for Cadence.

use thiserror::Error;

/// Result type alias using Cadence's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadence.
#[derive(Error, Debug)]
pub enum Error {
    // Decode errors
    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Demux error: {0}")]
    Demux(String),

    // Pipeline errors
    #[error("Pipeline configuration error: {0}")]
    Configuration(String),

    #[error("Media pipe closed")]
    PipeClosed,

    // Output errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error must terminate the decode thread.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Internal(_))
    }

    /// Returns true if the pipeline absorbs this error and keeps running.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::AudioDecode(_) | Self::UnsupportedFormat(_))
    }
}
