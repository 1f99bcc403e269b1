//! Transmission path: captured chunks to the network.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, warn};

use titan_voice_capture::{AutomaticGainControl, CaptureListener};
use titan_voice_ipc::{AgcConfig, AudioChunk, VoiceEvent};

use crate::cues::{Cue, CueSink};
use crate::metrics::MetricsCollector;
use crate::send_event;

/// Network side of voice transmission.
pub trait TransportSink: Send + Sync {
    /// Send one PCM16 chunk to `room_id`. With `self_monitor` the server
    /// echoes it back to the sender. Must not block.
    fn send_chunk(&self, room_id: &str, data: Bytes, self_monitor: bool);
}

/// Drops everything. For hosts without a network connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl TransportSink for NullTransport {
    fn send_chunk(&self, _room_id: &str, _data: Bytes, _self_monitor: bool) {}
}

/// Capture listener that applies gain control and sends chunks out.
pub(crate) struct Transmitter {
    room_id: String,
    self_monitor: bool,
    agc: Mutex<AutomaticGainControl>,
    transport: Arc<dyn TransportSink>,
    cues: Arc<dyn CueSink>,
    event_tx: Sender<VoiceEvent>,
    metrics: Arc<MetricsCollector>,
}

impl Transmitter {
    pub fn new(
        room_id: String,
        self_monitor: bool,
        agc: AgcConfig,
        transport: Arc<dyn TransportSink>,
        cues: Arc<dyn CueSink>,
        event_tx: Sender<VoiceEvent>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            room_id,
            self_monitor,
            agc: Mutex::new(AutomaticGainControl::new(agc)),
            transport,
            cues,
            event_tx,
            metrics,
        }
    }
}

impl CaptureListener for Transmitter {
    fn on_speech_start(&self) {
        debug!(room_id = %self.room_id, "Local speech started");
        send_event(&self.event_tx, VoiceEvent::LocalSpeechStarted);
    }

    fn on_audio_chunk(&self, chunk: &AudioChunk) {
        self.metrics.record_captured();

        let data = {
            let mut agc = self.agc.lock();
            if agc.is_enabled() {
                agc.process(chunk).into_data()
            } else {
                chunk.data().clone()
            }
        };

        self.transport.send_chunk(&self.room_id, data, self.self_monitor);
        self.metrics.record_sent();
    }

    fn on_speech_stop(&self) {
        debug!(room_id = %self.room_id, "Local speech stopped");
        send_event(&self.event_tx, VoiceEvent::LocalSpeechStopped);
    }

    fn on_error(&self, message: &str) {
        warn!(room_id = %self.room_id, "Capture error: {}", message);
        Cue::CaptureError {
            message: message.to_string(),
        }
        .emit(self.cues.as_ref());
        send_event(
            &self.event_tx,
            VoiceEvent::CaptureError {
                message: message.to_string(),
            },
        );
    }
}
