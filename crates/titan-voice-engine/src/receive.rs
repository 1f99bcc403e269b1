//! Reception path: network chunks to per-speaker playback.
//!
//! Received audio never goes through the command channel. The network
//! layer holds a [`ReceiveHandle`] and delivers chunks straight into the
//! current room's jitter buffers from its own thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use titan_voice_ipc::{AudioChunk, AudioFormat};
use titan_voice_playback::PlaybackManager;

use crate::metrics::MetricsCollector;

/// Receive side of one joined room.
pub(crate) struct RoomReceiver {
    room_id: String,
    format: AudioFormat,
    playback: Arc<PlaybackManager>,
    metrics: Arc<MetricsCollector>,
    sequence: AtomicU64,
}

impl RoomReceiver {
    pub fn new(
        room_id: String,
        format: AudioFormat,
        playback: Arc<PlaybackManager>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            room_id,
            format,
            playback,
            metrics,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Queue a chunk for playback. Chunks for other rooms are ignored.
    pub fn receive_chunk(&self, user_id: &str, room_id: &str, data: Bytes) -> bool {
        if room_id != self.room_id {
            trace!(user_id, room_id, "Ignoring voice chunk for another room");
            self.metrics.record_receive_drop();
            return false;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let chunk = AudioChunk::new(data, self.format, sequence);
        if !chunk.is_well_formed() {
            trace!(user_id, bytes = chunk.data().len(), "Received chunk has unusual length");
        }

        self.metrics.record_received();
        self.playback.enqueue(user_id, chunk)
    }
}

/// Where the network delivers received voice chunks.
///
/// Cheap to clone and safe to call from any thread. Delivery never blocks
/// on the engine and never waits for playback; while no room is joined
/// chunks are refused.
#[derive(Clone, Default)]
pub struct ReceiveHandle {
    route: Arc<RwLock<Option<Arc<RoomReceiver>>>>,
}

impl ReceiveHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a chunk spoken by `user_id` in `room_id`. Returns whether it
    /// was queued for playback.
    pub fn deliver(&self, user_id: &str, room_id: &str, data: Bytes) -> bool {
        let route = self.route.read().clone();
        match route {
            Some(receiver) => receiver.receive_chunk(user_id, room_id, data),
            None => {
                trace!(user_id, room_id, "No voice room joined, dropping chunk");
                false
            }
        }
    }

    /// The room chunks are currently accepted for.
    pub fn room_id(&self) -> Option<String> {
        self.route.read().as_ref().map(|r| r.room_id().to_string())
    }

    pub(crate) fn attach(&self, receiver: Arc<RoomReceiver>) {
        *self.route.write() = Some(receiver);
    }

    pub(crate) fn detach(&self) {
        self.route.write().take();
    }
}

impl std::fmt::Debug for ReceiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveHandle")
            .field("room_id", &self.room_id())
            .finish()
    }
}
