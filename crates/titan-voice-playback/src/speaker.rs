//! Per-speaker jitter buffer and playback thread.
//!
//! Every remote speaker gets an unbounded FIFO and one thread draining it.
//! The thread waits for a small pre-roll, then plays one chunk per pop,
//! filling gaps with synthesized silence so the output channel never runs
//! dry mid-utterance. A speaker that stays silent for too long ends on its
//! own.

use std::sync::atomic::{fence, AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use titan_voice_ipc::{AudioChunk, AudioFormat, PlaybackConfig};

use crate::channels::{ChannelLease, ChannelPool};
use crate::error::PlaybackError;
use crate::resample::ChunkProcessor;
use crate::stats::PlaybackStats;
use crate::volume::CachedVolume;
use crate::PlaybackResult;

/// Lifecycle of one speaker's playback thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SpeakerState {
    /// Buffering until the fill threshold is reached.
    WaitingPreroll = 0,
    /// Playing chunks or underrun silence.
    Playing = 1,
    /// Stop requested, thread winding down.
    Stopping = 2,
    /// Too many consecutive empty reads, thread winding down.
    TimedOut = 3,
    /// Thread has exited.
    Terminated = 4,
}

impl SpeakerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::WaitingPreroll,
            1 => Self::Playing,
            2 => Self::Stopping,
            3 => Self::TimedOut,
            _ => Self::Terminated,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::WaitingPreroll => "waiting_preroll",
            Self::Playing => "playing",
            Self::Stopping => "stopping",
            Self::TimedOut => "timed_out",
            Self::Terminated => "terminated",
        }
    }
}

/// Everything a playback thread needs besides its own queue.
pub(crate) struct PlaybackContext {
    pub config: PlaybackConfig,
    pub input_format: AudioFormat,
    pub processor: ChunkProcessor,
    pub pool: ChannelPool,
    pub volume: CachedVolume,
    pub stats: Arc<PlaybackStats>,
}

/// One remote speaker's jitter buffer.
pub(crate) struct SpeakerBuffer {
    user_id: String,
    sender: Option<Sender<AudioChunk>>,
    receiver: Receiver<AudioChunk>,
    stopping: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerBuffer {
    /// Create the buffer and start its playback thread.
    pub fn spawn(user_id: &str, context: Arc<PlaybackContext>) -> PlaybackResult<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let stopping = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(SpeakerState::WaitingPreroll as u8));

        let worker = SpeakerWorker {
            user_id: user_id.to_string(),
            receiver: receiver.clone(),
            stopping: Arc::clone(&stopping),
            state: Arc::clone(&state),
            context,
        };

        let thread = thread::Builder::new()
            .name(thread_name(user_id))
            .spawn(move || worker.run())
            .map_err(|e| PlaybackError::ThreadSpawn(e.to_string()))?;

        debug!(user_id, "Speaker buffer created");

        Ok(Self {
            user_id: user_id.to_string(),
            sender: Some(sender),
            receiver,
            stopping,
            state,
            thread: Some(thread),
        })
    }

    /// Append a chunk. With a high-water mark, the oldest chunks are
    /// discarded to make room; returns how many were discarded.
    ///
    /// Callers must check [`SpeakerBuffer::is_retired`] afterwards: a chunk
    /// pushed while the thread times out may never be read.
    pub fn push(&self, chunk: AudioChunk, high_water: Option<usize>) -> u64 {
        let mut dropped = 0;
        if let Some(max) = high_water {
            while self.receiver.len() >= max.max(1) {
                if self.receiver.try_recv().is_err() {
                    break;
                }
                dropped += 1;
            }
        }

        if let Some(sender) = &self.sender {
            let _ = sender.send(chunk);
        }
        // Pairs with the fence in `SpeakerWorker::play` so that either the
        // worker sees the chunk or we see its timeout.
        fence(Ordering::SeqCst);
        dropped
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn state(&self) -> SpeakerState {
        SpeakerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_finished(&self) -> bool {
        self.state() == SpeakerState::Terminated
            || self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// The thread has stopped reading, or is about to.
    pub fn is_retired(&self) -> bool {
        matches!(self.state(), SpeakerState::TimedOut | SpeakerState::Terminated)
    }

    /// Stop playback, discard what is still buffered and wait for the
    /// thread to exit.
    pub fn stop(&mut self) {
        let discarded = self.shut_down().len();
        debug!(
            user_id = %self.user_id,
            discarded,
            "Speaker buffer stopped"
        );
    }

    /// Stop the thread and hand back every chunk it did not play.
    pub fn retire(&mut self) -> Vec<AudioChunk> {
        let leftover = self.shut_down();
        debug!(
            user_id = %self.user_id,
            leftover = leftover.len(),
            "Speaker buffer retired"
        );
        leftover
    }

    fn shut_down(&mut self) -> Vec<AudioChunk> {
        self.stopping.store(true, Ordering::SeqCst);

        // Waking the thread: with the sender gone an empty queue reports
        // disconnection instead of waiting out the pop timeout.
        self.sender = None;

        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.receiver.try_iter().collect()
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: SpeakerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl Drop for SpeakerBuffer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

/// Thread names may not contain NUL, and user ids come off the network.
fn thread_name(user_id: &str) -> String {
    let id: String = user_id.chars().filter(|c| *c != '\0').collect();
    format!("titan-voice-play-{}", id)
}

struct SpeakerWorker {
    user_id: String,
    receiver: Receiver<AudioChunk>,
    stopping: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    context: Arc<PlaybackContext>,
}

impl SpeakerWorker {
    fn set_state(&self, state: SpeakerState) {
        self.state.store(state as u8, Ordering::SeqCst);
        trace!(user_id = %self.user_id, state = state.name(), "Speaker state");
    }

    fn should_stop(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn run(self) {
        let end = if self.wait_for_preroll() {
            self.set_state(SpeakerState::Playing);
            self.play()
        } else {
            SpeakerState::Stopping
        };

        self.set_state(end);
        self.set_state(SpeakerState::Terminated);
        debug!(user_id = %self.user_id, reason = end.name(), "Playback thread exiting");
    }

    /// Returns false if stopped before the threshold was reached.
    fn wait_for_preroll(&self) -> bool {
        let threshold = self.context.config.fill_threshold.max(1);
        let poll = self.context.config.preroll_poll();

        loop {
            if self.should_stop() {
                return false;
            }
            if self.receiver.len() >= threshold {
                return true;
            }
            thread::sleep(poll);
        }
    }

    fn play(&self) -> SpeakerState {
        let config = &self.context.config;
        let lease = self.context.pool.acquire();
        let log_every = config.underrun_log_every.max(1);
        let mut empty_reads: u32 = 0;

        debug!(
            user_id = %self.user_id,
            channel = lease.index(),
            buffered = self.receiver.len(),
            "Speaker playback started"
        );

        loop {
            if self.should_stop() {
                return SpeakerState::Stopping;
            }

            match self.receiver.recv_timeout(config.pop_timeout()) {
                Ok(chunk) => {
                    if self.should_stop() {
                        return SpeakerState::Stopping;
                    }
                    empty_reads = 0;
                    self.play_chunk(&lease, &chunk, false);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.should_stop() {
                        return SpeakerState::Stopping;
                    }
                    empty_reads += 1;
                    if empty_reads % log_every == 0 {
                        debug!(user_id = %self.user_id, empty_reads, "Voice buffer underrun");
                    }
                    if empty_reads > config.max_empty_reads {
                        self.set_state(SpeakerState::TimedOut);
                        fence(Ordering::SeqCst);
                        if self.receiver.is_empty() {
                            debug!(user_id = %self.user_id, empty_reads, "Speaker silent too long");
                            return SpeakerState::TimedOut;
                        }
                        // A chunk arrived while timing out.
                        self.set_state(SpeakerState::Playing);
                        empty_reads = 0;
                        continue;
                    }
                    let silence = AudioChunk::silence(self.context.input_format);
                    self.play_chunk(&lease, &silence, true);
                }
                Err(RecvTimeoutError::Disconnected) => return SpeakerState::Stopping,
            }
        }
    }

    fn play_chunk(&self, lease: &ChannelLease, chunk: &AudioChunk, is_silence: bool) {
        let volume = self.context.volume.get();
        let result = self
            .context
            .processor
            .process(&chunk.samples(), chunk.format().sample_rate, volume)
            .and_then(|frames| lease.queue(&frames));

        let stats = &self.context.stats;
        match result {
            Ok(()) if is_silence => stats.record_silence(),
            Ok(()) => stats.record_played(),
            Err(e) => {
                stats.record_skipped();
                warn!(user_id = %self.user_id, "Skipping voice chunk: {}", e);
            }
        }
    }
}
