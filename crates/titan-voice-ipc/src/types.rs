//! Common types used across IPC messages.

use serde::{Deserialize, Serialize};

/// An audio input device, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDeviceInfo {
    /// Position in the host's device list.
    pub index: usize,

    /// Display name.
    pub name: String,

    /// Maximum input channels.
    pub channels: u16,

    /// Default sample rate in Hz.
    pub default_sample_rate: u32,

    /// Whether this is the system default input.
    pub is_default: bool,
}

/// Snapshot of voice pipeline counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceMetrics {
    /// Chunks delivered by the capture manager.
    pub chunks_captured: u64,

    /// Chunks handed to the transport.
    pub chunks_sent: u64,

    /// Chunks dropped because the capture queue was full.
    pub capture_drops: u64,

    /// Chunks received from the network.
    pub chunks_received: u64,

    /// Chunks played out.
    pub chunks_played: u64,

    /// Silence chunks inserted on underrun.
    pub silence_inserted: u64,

    /// Chunks skipped because processing failed.
    pub playback_errors: u64,

    /// Chunks dropped by the receive-side high-water mark.
    pub receive_drops: u64,

    /// Remote speakers currently buffered.
    pub active_speakers: usize,

    /// Seconds since the session started.
    pub uptime_seconds: u64,
}

/// Channel count and sample rate span a device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRange {
    pub channels: u16,
    pub min: u32,
    pub max: u32,
}

/// `requested` if a range with `channels` covers it, else `fallback`
/// (normally the device's native rate).
pub fn pick_sample_rate(requested: u32, channels: u16, ranges: &[RateRange], fallback: u32) -> u32 {
    let supported = ranges
        .iter()
        .any(|r| r.channels == channels && r.min <= requested && requested <= r.max);
    if supported {
        requested
    } else {
        fallback
    }
}
