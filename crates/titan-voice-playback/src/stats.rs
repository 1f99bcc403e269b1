//! Playback counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every speaker thread of one playback manager.
#[derive(Debug, Default)]
pub struct PlaybackStats {
    chunks_received: AtomicU64,
    chunks_played: AtomicU64,
    silence_inserted: AtomicU64,
    chunks_skipped: AtomicU64,
    chunks_dropped: AtomicU64,
}

/// Point-in-time copy of [`PlaybackStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStatsSnapshot {
    /// Chunks handed to `enqueue`.
    pub chunks_received: u64,
    /// Received chunks queued onto an output channel.
    pub chunks_played: u64,
    /// Silence chunks synthesized on underrun.
    pub silence_inserted: u64,
    /// Chunks lost to processing or output errors.
    pub chunks_skipped: u64,
    /// Chunks discarded by the buffer high-water mark.
    pub chunks_dropped: u64,
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_played(&self) {
        self.chunks_played.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_silence(&self) {
        self.silence_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.chunks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.chunks_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PlaybackStatsSnapshot {
        PlaybackStatsSnapshot {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_played: self.chunks_played.load(Ordering::Relaxed),
            silence_inserted: self.silence_inserted.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
        }
    }
}
