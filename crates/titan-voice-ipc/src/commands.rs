//! Commands sent from the host application to the engine.

use serde::{Deserialize, Serialize};

use crate::config::VoiceConfig;

/// Commands that the host can send to the engine.
///
/// Received audio does not travel here; see the engine's receive handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VoiceCommand {
    /// Join a voice room with the given configuration.
    JoinRoom { room_id: String, config: VoiceConfig },

    /// Leave the current room.
    LeaveRoom,

    /// Turn the local microphone on or off.
    SetMicEnabled(bool),

    /// Set the output volume (0 - 100).
    SetOutputVolume(u8),

    /// A remote user started speaking.
    SpeechStarted { user_id: String },

    /// A remote user stopped speaking.
    SpeechStopped { user_id: String },

    /// Request the list of available input devices.
    GetInputDevices,

    /// Request current session state.
    GetState,

    /// Shutdown the engine completely.
    Shutdown,
}
