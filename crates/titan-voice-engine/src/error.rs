//! Error types for the engine.

use thiserror::Error;

use titan_voice_ipc::ConfigError;
use titan_voice_playback::PlaybackError;

/// Errors that can occur while setting up a voice session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Voice output could not be opened.
    #[error("Playback init failed: {0}")]
    Playback(#[from] PlaybackError),

    /// A phase ran twice or out of order.
    #[error("Session phase {0} already initialized")]
    PhaseAlreadyInitialized(&'static str),

    /// The input backend was already handed to a capture manager.
    #[error("Input backend already consumed")]
    InputConsumed,
}
