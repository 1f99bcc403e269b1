//! Shared types for the Titan-Net voice pipeline.
//!
//! This crate defines the audio chunk data model, the configuration
//! structures and all the message types used for communication between
//! the host application and the voice engine.

mod chunk;
mod commands;
mod config;
mod error;
mod events;
mod state;
mod types;

pub use chunk::{AudioChunk, AudioFormat, BYTES_PER_SAMPLE};
pub use commands::VoiceCommand;
pub use config::{AgcConfig, CaptureConfig, PlaybackConfig, VadEngineKind, VoiceConfig};
pub use error::ConfigError;
pub use events::VoiceEvent;
pub use state::{JoinPhase, LeaveReason, SessionState};
pub use types::{pick_sample_rate, InputDeviceInfo, RateRange, VoiceMetrics};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (host → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for events (engine → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<VoiceCommand>, Receiver<VoiceCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<VoiceEvent>, Receiver<VoiceEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
