//! Voice output channels.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::PlaybackError;
use crate::PlaybackResult;

/// One output channel reserved for voice.
///
/// Audio is queued, never played over what is already pending, so
/// consecutive chunks play back gaplessly.
pub trait OutputChannel: Send + Sync {
    /// Append interleaved stereo PCM16 frames at the output rate.
    fn queue(&self, frames: &[i16]) -> PlaybackResult<()>;

    /// Whether audio is still pending on this channel.
    fn is_busy(&self) -> bool;
}

struct PoolInner {
    channels: Vec<Arc<dyn OutputChannel>>,
    leased: Mutex<Vec<usize>>,
}

/// Fixed pool of voice output channels shared by all speakers.
#[derive(Clone)]
pub struct ChannelPool {
    inner: Arc<PoolInner>,
}

impl ChannelPool {
    pub fn new(channels: Vec<Arc<dyn OutputChannel>>) -> PlaybackResult<Self> {
        if channels.is_empty() {
            return Err(PlaybackError::NoChannels);
        }
        let count = channels.len();
        Ok(Self {
            inner: Arc::new(PoolInner {
                channels,
                leased: Mutex::new(vec![0; count]),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.channels.is_empty()
    }

    /// Lease the first channel that is neither leased nor busy, falling
    /// back to channel 0 when every channel is in use.
    pub fn acquire(&self) -> ChannelLease {
        let mut leased = self.inner.leased.lock();

        let index = leased
            .iter()
            .zip(&self.inner.channels)
            .position(|(&count, channel)| count == 0 && !channel.is_busy())
            .unwrap_or_else(|| {
                debug!("All voice channels busy, sharing channel 0");
                0
            });

        leased[index] += 1;
        trace!(channel = index, "Voice channel leased");

        ChannelLease {
            pool: Arc::clone(&self.inner),
            index,
        }
    }

    /// Number of outstanding leases on each channel.
    pub fn lease_counts(&self) -> Vec<usize> {
        self.inner.leased.lock().clone()
    }
}

/// A speaker's hold on one pool channel. Released on drop.
pub struct ChannelLease {
    pool: Arc<PoolInner>,
    index: usize,
}

impl ChannelLease {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn queue(&self, frames: &[i16]) -> PlaybackResult<()> {
        self.pool.channels[self.index].queue(frames)
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        let mut leased = self.pool.leased.lock();
        leased[self.index] = leased[self.index].saturating_sub(1);
        trace!(channel = self.index, "Voice channel released");
    }
}
