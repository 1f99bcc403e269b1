//! Error types for the playback module.

use thiserror::Error;

/// Errors that can occur during voice playback.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Sample rate conversion was impossible.
    #[error("Cannot resample from {from} Hz to {to} Hz")]
    Resample { from: u32, to: u32 },

    /// An output channel refused queued audio.
    #[error("Output channel {0} is closed")]
    ChannelClosed(usize),

    /// The channel pool was built with no channels.
    #[error("No output channels available")]
    NoChannels,

    /// No usable output device.
    #[error("Audio output device not found: {0}")]
    DeviceNotFound(String),

    /// Device sample format or layout not supported.
    #[error("Audio format not supported: {0}")]
    FormatNotSupported(String),

    /// Building or starting the output stream failed.
    #[error("Failed to open output stream: {0}")]
    StreamOpen(String),

    /// A speaker playback thread could not be spawned.
    #[error("Failed to spawn playback thread: {0}")]
    ThreadSpawn(String),
}

impl From<cpal::DefaultStreamConfigError> for PlaybackError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        Self::FormatNotSupported(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for PlaybackError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::StreamOpen(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for PlaybackError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::StreamOpen(err.to_string())
    }
}
