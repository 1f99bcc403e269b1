//! Events sent from the engine to the host application.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{InputDeviceInfo, VoiceMetrics};

/// Events that the engine can send to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VoiceEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// Updated pipeline metrics.
    Metrics(VoiceMetrics),

    /// The local microphone entered the speaking state.
    LocalSpeechStarted,

    /// The local microphone left the speaking state.
    LocalSpeechStopped,

    /// A remote speaker became audible.
    SpeakerStarted { user_id: String },

    /// A remote speaker stopped.
    SpeakerStopped { user_id: String },

    /// Capture device problem; the microphone is off.
    CaptureError { message: String },

    /// List of available input devices.
    InputDevices(Vec<InputDeviceInfo>),

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
