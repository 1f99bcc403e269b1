//! Voice playback for Titan-Net voice chat.
//!
//! Received chunks are buffered per remote speaker. Each speaker gets a
//! playback thread that waits for a short pre-roll, then feeds a voice
//! output channel at a steady rate, covering network gaps with silence.

mod channels;
mod error;
mod manager;
mod output;
mod resample;
mod speaker;
mod stats;
mod volume;

pub use channels::{ChannelLease, ChannelPool, OutputChannel};
pub use error::PlaybackError;
pub use manager::PlaybackManager;
pub use output::{mix_into, CpalOutput, MixerChannel, OpenOutput, OutputBackend, OutputStream, OUTPUT_CHANNELS};
pub use resample::{apply_volume, mono_to_stereo, resample_linear, resampled_len, ChunkProcessor};
pub use speaker::SpeakerState;
pub use stats::{PlaybackStats, PlaybackStatsSnapshot};
pub use volume::{CachedVolume, SharedVolume, VolumeProvider};

/// Result type for playback operations.
pub type PlaybackResult<T> = Result<T, PlaybackError>;
