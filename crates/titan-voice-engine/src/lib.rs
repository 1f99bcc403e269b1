//! Voice engine for Titan-Net rooms.
//!
//! This crate wires microphone capture to the network transport and
//! received audio to per-speaker playback, and runs the host-facing
//! command loop. Received audio bypasses the command loop through a
//! [`ReceiveHandle`].

mod cues;
mod error;
mod metrics;
mod orchestrator;
mod receive;
mod session;
mod transmit;

pub use cues::{Cue, CueSink, SilentCues};
pub use error::EngineError;
pub use metrics::MetricsCollector;
pub use orchestrator::{Engine, EngineIo};
pub use receive::ReceiveHandle;
pub use session::{AudioBackends, SessionIo, SystemAudio, VoiceSession};
pub use transmit::{NullTransport, TransportSink};

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use titan_voice_ipc::{VoiceCommand, VoiceEvent};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Create an engine instance with IPC channels.
pub fn create_engine(
    command_rx: Receiver<VoiceCommand>,
    event_tx: Sender<VoiceEvent>,
    io: EngineIo,
) -> Engine {
    Engine::new(command_rx, event_tx, io)
}

/// Post an event to the host without blocking.
pub(crate) fn send_event(event_tx: &Sender<VoiceEvent>, event: VoiceEvent) {
    if let Err(e) = event_tx.try_send(event) {
        warn!("Failed to send event: {}", e);
    }
}
