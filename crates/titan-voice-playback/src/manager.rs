//! Playback manager: routes received chunks to per-speaker buffers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use titan_voice_ipc::{AudioChunk, AudioFormat, PlaybackConfig};

use crate::channels::ChannelPool;
use crate::resample::ChunkProcessor;
use crate::speaker::{PlaybackContext, SpeakerBuffer, SpeakerState};
use crate::stats::{PlaybackStats, PlaybackStatsSnapshot};
use crate::volume::{CachedVolume, VolumeProvider};

/// Owns every remote speaker's jitter buffer and playback thread.
///
/// All methods take `&self` so the manager can be shared between the
/// network receive path and the speaking-signal path.
pub struct PlaybackManager {
    context: Arc<PlaybackContext>,
    speakers: Mutex<HashMap<String, SpeakerBuffer>>,
    closed: AtomicBool,
}

impl PlaybackManager {
    /// `input_format` is the nominal format of received chunks; underrun
    /// silence is synthesized in it.
    pub fn new(
        config: PlaybackConfig,
        input_format: AudioFormat,
        pool: ChannelPool,
        volume: Arc<dyn VolumeProvider>,
    ) -> Self {
        let context = PlaybackContext {
            processor: ChunkProcessor::new(config.output_sample_rate),
            volume: CachedVolume::new(volume, config.volume_refresh()),
            config,
            input_format,
            pool,
            stats: Arc::new(PlaybackStats::new()),
        };
        Self {
            context: Arc::new(context),
            speakers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.context.config
    }

    /// Append a chunk to `user_id`'s buffer, creating the buffer and its
    /// playback thread on first use. Never blocks on playback. Returns
    /// false if the chunk could not be queued.
    pub fn enqueue(&self, user_id: &str, chunk: AudioChunk) -> bool {
        self.context.stats.record_received();

        let mut speakers = self.speakers.lock();
        if self.closed.load(Ordering::SeqCst) {
            trace!(user_id, "Playback closed, dropping voice chunk");
            self.context.stats.record_skipped();
            return false;
        }
        reap(&mut speakers);

        if !speakers.contains_key(user_id) {
            let Some(buffer) = self.spawn_speaker(user_id) else {
                self.context.stats.record_skipped();
                return false;
            };
            speakers.insert(user_id.to_string(), buffer);
        }

        let retired = match speakers.get(user_id) {
            Some(buffer) => {
                let dropped = buffer.push(chunk, self.context.config.max_buffered_chunks);
                if dropped > 0 {
                    self.context.stats.record_dropped(dropped);
                    trace!(user_id, dropped, "Voice buffer over high-water mark, dropped oldest");
                }
                trace!(user_id, buffered = buffer.len(), "Voice chunk queued");
                buffer.is_retired()
            }
            None => false,
        };

        if retired {
            // The thread timed out before reading this chunk: whatever it
            // left behind moves to a fresh buffer.
            if let Some(mut old) = speakers.remove(user_id) {
                let leftover = old.retire();
                match self.spawn_speaker(user_id) {
                    Some(buffer) => {
                        for chunk in leftover {
                            buffer.push(chunk, None);
                        }
                        speakers.insert(user_id.to_string(), buffer);
                    }
                    None => {
                        for _ in leftover {
                            self.context.stats.record_skipped();
                        }
                        return false;
                    }
                }
            }
        }
        true
    }

    fn spawn_speaker(&self, user_id: &str) -> Option<SpeakerBuffer> {
        match SpeakerBuffer::spawn(user_id, Arc::clone(&self.context)) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                warn!(user_id, "Dropping voice chunk: {}", e);
                None
            }
        }
    }

    /// Stop `user_id`'s playback and discard what is still buffered.
    #[instrument(name = "playback_stop_speaker", skip(self))]
    pub fn stop(&self, user_id: &str) {
        let removed = {
            let mut speakers = self.speakers.lock();
            reap(&mut speakers);
            speakers.remove(user_id)
        };

        match removed {
            Some(mut buffer) => buffer.stop(),
            None => debug!(user_id, "No active buffer to stop"),
        }
    }

    /// Stop every speaker and refuse further chunks. Used when the output
    /// goes away while another thread may still be delivering audio.
    #[instrument(name = "playback_close", skip(self))]
    pub fn close(&self) {
        {
            let _speakers = self.speakers.lock();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.stop_all();
    }

    /// Stop every speaker.
    #[instrument(name = "playback_stop_all", skip(self))]
    pub fn stop_all(&self) {
        let buffers: Vec<SpeakerBuffer> = {
            let mut speakers = self.speakers.lock();
            speakers.drain().map(|(_, buffer)| buffer).collect()
        };

        let count = buffers.len();
        for mut buffer in buffers {
            buffer.stop();
        }
        if count > 0 {
            info!(count, "Stopped all voice playback");
        }
    }

    /// Drop speakers whose thread has ended. Returns how many were removed.
    pub fn reap_finished(&self) -> usize {
        reap(&mut self.speakers.lock())
    }

    /// Users with a live buffer, sorted.
    pub fn active_speakers(&self) -> Vec<String> {
        let speakers = self.speakers.lock();
        let mut ids: Vec<String> = speakers
            .iter()
            .filter(|(_, buffer)| !buffer.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// State of `user_id`'s playback thread, if a buffer exists.
    pub fn speaker_state(&self, user_id: &str) -> Option<SpeakerState> {
        self.speakers.lock().get(user_id).map(SpeakerBuffer::state)
    }

    pub fn stats(&self) -> PlaybackStatsSnapshot {
        self.context.stats.snapshot()
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn reap(speakers: &mut HashMap<String, SpeakerBuffer>) -> usize {
    let finished: Vec<String> = speakers
        .iter()
        .filter(|(_, buffer)| buffer.is_finished())
        .map(|(id, _)| id.clone())
        .collect();

    for id in &finished {
        if let Some(mut buffer) = speakers.remove(id) {
            buffer.stop();
        }
        debug!(user_id = %id, "Reaped finished speaker");
    }
    finished.len()
}
