//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use titan_voice_ipc::VoiceMetrics;
use titan_voice_playback::PlaybackStatsSnapshot;

/// Counters for the engine side of the pipeline.
///
/// Capture drops and playback counts live in their own managers and are
/// merged in by [`MetricsCollector::snapshot`].
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    chunks_captured: AtomicU64,
    chunks_sent: AtomicU64,
    chunks_received: AtomicU64,
    receive_drops: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            chunks_captured: AtomicU64::new(0),
            chunks_sent: AtomicU64::new(0),
            chunks_received: AtomicU64::new(0),
            receive_drops: AtomicU64::new(0),
        }
    }

    /// Start the uptime clock.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Stop the uptime clock.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// A chunk left the capture manager.
    pub fn record_captured(&self) {
        self.chunks_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// A chunk was handed to the transport.
    pub fn record_sent(&self) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A chunk arrived for the current room.
    pub fn record_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A received chunk was ignored.
    pub fn record_receive_drop(&self) {
        self.receive_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Current metrics combined with the managers' own counters.
    pub fn snapshot(
        &self,
        capture_drops: u64,
        playback: PlaybackStatsSnapshot,
        active_speakers: usize,
    ) -> VoiceMetrics {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0);

        VoiceMetrics {
            chunks_captured: self.chunks_captured.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            capture_drops,
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_played: playback.chunks_played,
            silence_inserted: playback.silence_inserted,
            playback_errors: playback.chunks_skipped,
            receive_drops: self.receive_drops.load(Ordering::Relaxed) + playback.chunks_dropped,
            active_speakers,
            uptime_seconds,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
