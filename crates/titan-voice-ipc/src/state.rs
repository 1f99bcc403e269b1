//! Voice session state machine types.

use serde::{Deserialize, Serialize};

/// The current state of the voice engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not in a voice room.
    #[default]
    Idle,

    /// Joining a room.
    Joining {
        /// Room being joined.
        room_id: String,

        /// Current join phase.
        phase: JoinPhase,
    },

    /// In a room; playback is running.
    InRoom {
        /// Active room.
        room_id: String,

        /// Whether the local microphone is capturing.
        mic_enabled: bool,
    },

    /// Leaving a room.
    Leaving {
        /// Room being left.
        room_id: String,

        /// Why the room is being left.
        reason: LeaveReason,
    },

    /// Join failed.
    Error {
        /// Error message.
        message: String,

        /// Whether a new join may succeed.
        recoverable: bool,
    },
}

impl SessionState {
    /// Returns true if not in a room.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while joining.
    pub fn is_joining(&self) -> bool {
        matches!(self, Self::Joining { .. })
    }

    /// Returns true while in a room.
    pub fn is_in_room(&self) -> bool {
        matches!(self, Self::InRoom { .. })
    }

    /// Returns true while leaving.
    pub fn is_leaving(&self) -> bool {
        matches!(self, Self::Leaving { .. })
    }

    /// Returns true if the last join failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The room this state refers to, if any.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::Joining { room_id, .. }
            | Self::InRoom { room_id, .. }
            | Self::Leaving { room_id, .. } => Some(room_id),
            Self::Idle | Self::Error { .. } => None,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Joining { .. } => "Joining",
            Self::InRoom { .. } => "InRoom",
            Self::Leaving { .. } => "Leaving",
            Self::Error { .. } => "Error",
        }
    }
}

/// Room join phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPhase {
    /// Opening the voice output channels.
    InitPlayback,

    /// Opening the microphone.
    InitCapture,
}

impl JoinPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::InitPlayback => Some(Self::InitCapture),
            Self::InitCapture => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::InitPlayback => None,
            Self::InitCapture => Some(Self::InitPlayback),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::InitPlayback => "Opening audio output",
            Self::InitCapture => "Opening microphone",
        }
    }
}

/// Reason for leaving a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeaveReason {
    /// User requested leave.
    UserRequested,

    /// Joining a different room.
    SwitchingRoom,

    /// Engine shutting down.
    Shutdown,
}
