//! Fixed-duration mono PCM16 audio chunks.

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Size of one PCM16 sample in bytes.
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<i16>();

/// Sample rate and chunk duration shared by capture and playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Duration of one chunk in milliseconds.
    pub chunk_duration_ms: u32,
}

impl AudioFormat {
    /// Create a new format.
    pub const fn new(sample_rate: u32, chunk_duration_ms: u32) -> Self {
        Self {
            sample_rate,
            chunk_duration_ms,
        }
    }

    /// Number of mono samples in one chunk (480 at 16 kHz / 30 ms).
    pub fn samples_per_chunk(&self) -> usize {
        (self.sample_rate as usize * self.chunk_duration_ms as usize) / 1000
    }

    /// Number of payload bytes in one chunk (960 at 16 kHz / 30 ms).
    pub fn bytes_per_chunk(&self) -> usize {
        self.samples_per_chunk() * BYTES_PER_SAMPLE
    }

    /// Nominal wall-clock duration of one chunk.
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.chunk_duration_ms))
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(16_000, 30)
    }
}

/// An immutable slice of mono little-endian PCM16 audio.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    data: Bytes,
    format: AudioFormat,
    sequence: u64,
    timestamp: Instant,
}

impl AudioChunk {
    /// Wrap raw PCM16 bytes.
    pub fn new(data: Bytes, format: AudioFormat, sequence: u64) -> Self {
        Self {
            data,
            format,
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// Build a chunk from samples.
    pub fn from_samples(samples: &[i16], format: AudioFormat, sequence: u64) -> Self {
        let mut data = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(Bytes::from(data), format, sequence)
    }

    /// A chunk of zero-valued samples with the nominal duration of `format`.
    pub fn silence(format: AudioFormat) -> Self {
        Self::new(
            Bytes::from(vec![0u8; format.bytes_per_chunk()]),
            format,
            0,
        )
    }

    /// Raw payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consume the chunk, returning the payload.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Format the chunk was produced with.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Capture sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the chunk was produced or received.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Number of whole samples in the payload.
    pub fn sample_count(&self) -> usize {
        self.data.len() / BYTES_PER_SAMPLE
    }

    /// True when the payload is exactly one nominal chunk long.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.format.bytes_per_chunk()
    }

    /// Decode the payload into samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// True when every sample is zero.
    pub fn is_silent(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_sizes() {
        let format = AudioFormat::default();
        assert_eq!(format.samples_per_chunk(), 480);
        assert_eq!(format.bytes_per_chunk(), 960);
        assert_eq!(format.chunk_duration(), Duration::from_millis(30));
    }

    #[test]
    fn test_samples_decode_little_endian() {
        let format = AudioFormat::new(8_000, 10);
        let chunk = AudioChunk::from_samples(&[1, -1, i16::MAX, i16::MIN], format, 7);
        assert_eq!(chunk.data()[..4], [0x01, 0x00, 0xff, 0xff]);
        assert_eq!(chunk.samples(), vec![1, -1, i16::MAX, i16::MIN]);
        assert_eq!(chunk.sequence(), 7);
        assert!(!chunk.is_well_formed());
    }

    #[test]
    fn test_silence_chunk_has_nominal_length() {
        let chunk = AudioChunk::silence(AudioFormat::default());
        assert_eq!(chunk.sample_count(), 480);
        assert!(chunk.is_well_formed());
        assert!(chunk.is_silent());
    }
}
