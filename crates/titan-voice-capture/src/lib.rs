//! Microphone capture for Titan-Net voice chat.
//!
//! This crate reads fixed-size PCM16 chunks from the default input device
//! and delivers them to a [`CaptureListener`], either unconditionally
//! (continuous mode) or gated by voice activity detection.

mod agc;
mod capture;
mod device;
mod error;
mod vad;

pub use agc::AutomaticGainControl;
pub use capture::{CaptureListener, VoiceCaptureManager};
pub use device::{
    enumerate_input_devices, CpalInput, FrameSink, InputBackend, InputStream,
};
pub use error::AudioError;
pub use vad::{create_vad_engine, EnergyVad, SpeechDetector, SpeechTransition, VadEngine, WebRtcVad};

use std::time::Duration;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// How long the processing thread waits on its queue before re-checking
/// the stop flag.
pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Log one line per this many dropped capture chunks.
pub const DROP_LOG_INTERVAL: u64 = 10;

/// How long `stop_capture` waits for the processing thread.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
