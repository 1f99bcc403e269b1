//! Configuration errors.

use thiserror::Error;

/// Errors produced when validating a [`VoiceConfig`](crate::VoiceConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sample rate unusable for the selected mode.
    #[error("Unsupported sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    /// Chunk duration unusable for the selected mode.
    #[error("Unsupported chunk duration: {0} ms")]
    InvalidChunkDuration(u32),

    /// A value that must be positive was zero.
    #[error("Value must be greater than zero: {0}")]
    ZeroValue(&'static str),
}
