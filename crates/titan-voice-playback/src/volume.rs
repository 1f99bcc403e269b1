//! Output volume.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the user-controlled output volume, 0-100.
pub trait VolumeProvider: Send + Sync {
    fn volume(&self) -> u8;
}

/// A volume value set by the host.
#[derive(Debug)]
pub struct SharedVolume(AtomicU8);

impl SharedVolume {
    pub fn new(volume: u8) -> Self {
        Self(AtomicU8::new(volume.min(100)))
    }

    /// Values above 100 are clamped.
    pub fn set(&self, volume: u8) {
        self.0.store(volume.min(100), Ordering::Relaxed);
    }
}

impl Default for SharedVolume {
    fn default() -> Self {
        Self::new(100)
    }
}

impl VolumeProvider for SharedVolume {
    fn volume(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Rate-limited view of a [`VolumeProvider`].
///
/// Playback threads call [`CachedVolume::get`] once per chunk; the
/// provider itself is consulted at most once per refresh interval.
pub struct CachedVolume {
    provider: Arc<dyn VolumeProvider>,
    value: AtomicU8,
    epoch: Instant,
    last_refresh_ms: AtomicU64,
    refresh_ms: u64,
}

impl CachedVolume {
    pub fn new(provider: Arc<dyn VolumeProvider>, refresh: Duration) -> Self {
        let value = provider.volume().min(100);
        Self {
            provider,
            value: AtomicU8::new(value),
            epoch: Instant::now(),
            last_refresh_ms: AtomicU64::new(0),
            refresh_ms: refresh.as_millis() as u64,
        }
    }

    /// Current volume, refreshing the cache if it is stale.
    pub fn get(&self) -> u8 {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_refresh_ms.load(Ordering::Relaxed);

        // Only the thread that wins the exchange reads the provider.
        if now.saturating_sub(last) >= self.refresh_ms
            && self
                .last_refresh_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.value.store(self.provider.volume().min(100), Ordering::Relaxed);
        }

        self.value.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingVolume {
        value: SharedVolume,
        reads: AtomicUsize,
    }

    impl VolumeProvider for CountingVolume {
        fn volume(&self) -> u8 {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.value.volume()
        }
    }

    #[test]
    fn test_shared_volume_clamps() {
        let volume = SharedVolume::new(250);
        assert_eq!(volume.volume(), 100);
        volume.set(42);
        assert_eq!(volume.volume(), 42);
    }

    #[test]
    fn test_cache_limits_provider_reads() {
        let provider = Arc::new(CountingVolume {
            value: SharedVolume::new(70),
            reads: AtomicUsize::new(0),
        });
        let cached = CachedVolume::new(provider.clone(), Duration::from_secs(60));

        for _ in 0..100 {
            assert_eq!(cached.get(), 70);
        }
        // Construction plus at most one refresh.
        assert!(provider.reads.load(Ordering::SeqCst) <= 2);

        provider.value.set(10);
        assert_eq!(cached.get(), 70);
    }

    #[test]
    fn test_cache_picks_up_changes() {
        let provider = Arc::new(SharedVolume::new(70));
        let cached = CachedVolume::new(provider.clone(), Duration::from_millis(10));
        provider.set(20);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cached.get(), 20);
    }
}
