//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during audio capture.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No usable input device.
    #[error("Audio input device not found: {0}")]
    DeviceNotFound(String),

    /// Device sample format or layout not supported.
    #[error("Audio format not supported: {0}")]
    FormatNotSupported(String),

    /// Device enumeration failed.
    #[error("Failed to enumerate audio devices: {0}")]
    Enumeration(String),

    /// Building or starting the input stream failed.
    #[error("Failed to open input stream: {0}")]
    StreamOpen(String),

    /// Device went away while opening.
    #[error("Audio device lost")]
    DeviceLost,

    /// Chunk does not fit the detector's frame constraints.
    #[error("Invalid VAD frame: expected {expected} samples at {sample_rate} Hz, got {actual}")]
    InvalidFrame {
        expected: usize,
        actual: usize,
        sample_rate: u32,
    },

    /// Detector rejected the frame.
    #[error("VAD error: {0}")]
    Vad(String),
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        Self::Enumeration(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        Self::FormatNotSupported(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::StreamOpen(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::StreamOpen(err.to_string())
    }
}
