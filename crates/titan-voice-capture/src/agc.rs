//! Automatic gain control for outgoing voice.

use titan_voice_ipc::{AgcConfig, AudioChunk};

/// Chunk-rate gain normalizer.
///
/// Each chunk gets a target gain from its RMS and peak level; the applied
/// gain follows the target with separate attack and release smoothing so
/// the level does not pump between chunks.
#[derive(Debug, Clone)]
pub struct AutomaticGainControl {
    config: AgcConfig,
    gain: f32,
}

impl AutomaticGainControl {
    /// Create a gain controller starting at unity gain.
    pub fn new(config: AgcConfig) -> Self {
        Self { config, gain: 1.0 }
    }

    /// Whether gain is applied at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Currently applied gain.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Apply gain to a chunk. Disabled controllers and silent chunks pass
    /// through untouched.
    pub fn process(&mut self, chunk: &AudioChunk) -> AudioChunk {
        if !self.config.enabled {
            return chunk.clone();
        }

        let samples = chunk.samples();
        let Some(target) = self.target_gain(&samples) else {
            return chunk.clone();
        };

        let alpha = if target < self.gain {
            self.config.attack
        } else {
            self.config.release
        };
        self.gain += alpha.clamp(0.0, 1.0) * (target - self.gain);

        let gain = self.gain;
        let scaled: Vec<i16> = samples
            .iter()
            .map(|&s| (f32::from(s) * gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();

        AudioChunk::from_samples(&scaled, chunk.format(), chunk.sequence())
    }

    fn target_gain(&self, samples: &[i16]) -> Option<f32> {
        if samples.is_empty() {
            return None;
        }

        let mut peak = 0.0_f32;
        let mut sum_sq = 0.0_f64;
        for &s in samples {
            let v = f32::from(s) / 32_768.0;
            peak = peak.max(v.abs());
            sum_sq += f64::from(v) * f64::from(v);
        }
        let rms = (sum_sq / samples.len() as f64).sqrt() as f32;

        // Never amplify true silence.
        if peak < 1e-4 {
            return None;
        }

        let gain_peak = self.config.target_peak / peak;
        let gain_rms = if rms > 0.0 {
            self.config.target_rms / rms
        } else {
            1.0
        };
        Some(
            gain_peak
                .min(gain_rms)
                .clamp(self.config.min_gain, self.config.max_gain),
        )
    }
}
