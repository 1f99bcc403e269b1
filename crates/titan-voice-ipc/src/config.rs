//! Voice pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunk::AudioFormat;
use crate::error::ConfigError;

/// Which frame classifier drives VAD mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadEngineKind {
    /// WebRTC voice activity detector.
    #[default]
    WebRtc,

    /// RMS energy threshold.
    Energy,
}

/// Automatic gain control applied before transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgcConfig {
    /// Whether AGC is applied at all.
    pub enabled: bool,

    /// Target RMS level (0.0 - 1.0, ~0.1 is -20 dBFS).
    pub target_rms: f32,

    /// Peak ceiling after gain (0.0 - 1.0).
    pub target_peak: f32,

    /// Maximum gain multiplier.
    pub max_gain: f32,

    /// Minimum gain multiplier.
    pub min_gain: f32,

    /// Smoothing factor when gain goes down (0.0 - 1.0, higher is faster).
    pub attack: f32,

    /// Smoothing factor when gain goes up (0.0 - 1.0, higher is faster).
    pub release: f32,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_rms: 0.10,
            target_peak: 0.90,
            max_gain: 8.0,
            min_gain: 0.1,
            attack: 0.2,
            release: 0.02,
        }
    }
}

/// Microphone capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,

    /// Chunk duration in milliseconds (10, 20 or 30 for VAD).
    pub chunk_duration_ms: u32,

    /// Gate transmission with voice activity detection.
    pub use_vad: bool,

    /// Frame classifier used when `use_vad` is set.
    pub vad_engine: VadEngineKind,

    /// WebRTC VAD aggressiveness (0 = most tolerant, 3 = most aggressive).
    pub vad_aggressiveness: u8,

    /// RMS threshold in dBFS for the energy classifier.
    pub energy_threshold_db: f32,

    /// Consecutive speech frames required to enter the speaking state.
    pub frames_for_speech_start: u32,

    /// Consecutive silence frames required to leave the speaking state.
    pub frames_for_speech_stop: u32,

    /// Capacity of the device-callback queue in chunks.
    pub queue_capacity: usize,

    /// Gain control applied to outgoing chunks.
    pub agc: AgcConfig,
}

impl CaptureConfig {
    /// Chunk format produced by this configuration.
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.chunk_duration_ms)
    }

    /// Validate the capture settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.format().samples_per_chunk() == 0 {
            return Err(ConfigError::InvalidChunkDuration(self.chunk_duration_ms));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("capture.queue_capacity"));
        }
        if self.use_vad && self.vad_engine == VadEngineKind::WebRtc {
            if !matches!(self.chunk_duration_ms, 10 | 20 | 30) {
                return Err(ConfigError::InvalidChunkDuration(self.chunk_duration_ms));
            }
            if !matches!(self.sample_rate, 8_000 | 16_000 | 32_000) {
                return Err(ConfigError::InvalidSampleRate(self.sample_rate));
            }
        }
        if self.use_vad && (self.frames_for_speech_start == 0 || self.frames_for_speech_stop == 0) {
            return Err(ConfigError::ZeroValue("capture.frames_for_speech_*"));
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_duration_ms: 30,
            use_vad: false,
            vad_engine: VadEngineKind::WebRtc,
            vad_aggressiveness: 0,
            energy_threshold_db: -45.0,
            frames_for_speech_start: 2,
            frames_for_speech_stop: 60,
            queue_capacity: 10,
            agc: AgcConfig::default(),
        }
    }
}

/// Jitter buffer and playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device sample rate in Hz.
    pub output_sample_rate: u32,

    /// Chunks to accumulate before a speaker starts playing.
    pub fill_threshold: usize,

    /// Bounded wait for the next chunk in steady state.
    pub pop_timeout_ms: u64,

    /// Consecutive empty reads after which a speaker thread gives up.
    pub max_empty_reads: u32,

    /// Poll interval while waiting for pre-roll.
    pub preroll_poll_ms: u64,

    /// Number of output channels reserved for voice.
    pub channel_count: usize,

    /// Minimum interval between reads of the output volume provider.
    pub volume_refresh_ms: u64,

    /// Log one line per this many consecutive underruns.
    pub underrun_log_every: u32,

    /// Optional per-speaker high-water mark; oldest chunks are dropped above it.
    pub max_buffered_chunks: Option<usize>,
}

impl PlaybackConfig {
    /// Steady-state pop timeout.
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    /// Pre-roll poll interval.
    pub fn preroll_poll(&self) -> Duration {
        Duration::from_millis(self.preroll_poll_ms)
    }

    /// Volume cache refresh interval.
    pub fn volume_refresh(&self) -> Duration {
        Duration::from_millis(self.volume_refresh_ms)
    }

    /// Validate the playback settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate(self.output_sample_rate));
        }
        if self.fill_threshold == 0 {
            return Err(ConfigError::ZeroValue("playback.fill_threshold"));
        }
        if self.pop_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("playback.pop_timeout_ms"));
        }
        if self.channel_count == 0 {
            return Err(ConfigError::ZeroValue("playback.channel_count"));
        }
        if self.max_buffered_chunks == Some(0) {
            return Err(ConfigError::ZeroValue("playback.max_buffered_chunks"));
        }
        Ok(())
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 22_050,
            fill_threshold: 5,
            pop_timeout_ms: 300,
            max_empty_reads: 100,
            preroll_poll_ms: 5,
            channel_count: 4,
            volume_refresh_ms: 100,
            underrun_log_every: 5,
            max_buffered_chunks: None,
        }
    }
}

/// Complete voice configuration for one room session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Microphone side.
    pub capture: CaptureConfig,

    /// Speaker side.
    pub playback: PlaybackConfig,

    /// Ask the server to echo our own audio back.
    pub self_monitor: bool,
}

impl VoiceConfig {
    /// Validate both halves of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.capture.validate()?;
        self.playback.validate()
    }
}
