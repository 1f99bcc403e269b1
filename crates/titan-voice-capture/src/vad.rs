//! Voice activity detection.
//!
//! A [`VadEngine`] classifies one frame as speech or silence. The
//! [`SpeechDetector`] turns that stream of labels into speaking / not
//! speaking transitions with asymmetric hysteresis: fast attack, slow
//! release.

use earshot::{VoiceActivityDetector, VoiceActivityProfile};

use titan_voice_ipc::{CaptureConfig, VadEngineKind};

use crate::error::AudioError;
use crate::AudioResult;

/// Frame-level speech classifier.
pub trait VadEngine: Send {
    /// Classify one frame of mono PCM16 samples.
    fn is_speech(&mut self, samples: &[i16]) -> AudioResult<bool>;

    /// Forget any adaptive state.
    fn reset(&mut self);

    /// Stable identifier for logs.
    fn name(&self) -> &'static str;
}

/// Build the classifier selected by the capture configuration.
pub fn create_vad_engine(config: &CaptureConfig) -> Box<dyn VadEngine> {
    match config.vad_engine {
        VadEngineKind::WebRtc => Box::new(WebRtcVad::new(config.sample_rate, config.vad_aggressiveness)),
        VadEngineKind::Energy => Box::new(EnergyVad::new(config.energy_threshold_db)),
    }
}

/// WebRTC voice activity detector.
///
/// Accepts exactly 10, 20 or 30 ms frames at 8, 16 or 32 kHz.
pub struct WebRtcVad {
    detector: VoiceActivityDetector,
    sample_rate: u32,
}

impl WebRtcVad {
    /// Create a detector. `aggressiveness` is clamped to 0..=3.
    pub fn new(sample_rate: u32, aggressiveness: u8) -> Self {
        Self {
            detector: VoiceActivityDetector::new(profile_for(aggressiveness)),
            sample_rate,
        }
    }

    fn check_frame(&self, len: usize) -> AudioResult<()> {
        let per_ms = match self.sample_rate {
            8_000 | 16_000 | 32_000 => self.sample_rate as usize / 1000,
            _ => {
                return Err(AudioError::InvalidFrame {
                    expected: 0,
                    actual: len,
                    sample_rate: self.sample_rate,
                })
            }
        };

        if [10, 20, 30].iter().any(|ms| ms * per_ms == len) {
            Ok(())
        } else {
            Err(AudioError::InvalidFrame {
                expected: 30 * per_ms,
                actual: len,
                sample_rate: self.sample_rate,
            })
        }
    }
}

fn profile_for(aggressiveness: u8) -> VoiceActivityProfile {
    match aggressiveness {
        0 => VoiceActivityProfile::QUALITY,
        1 => VoiceActivityProfile::LBR,
        2 => VoiceActivityProfile::AGGRESSIVE,
        _ => VoiceActivityProfile::VERY_AGGRESSIVE,
    }
}

impl VadEngine for WebRtcVad {
    fn is_speech(&mut self, samples: &[i16]) -> AudioResult<bool> {
        self.check_frame(samples.len())?;

        let result = match self.sample_rate {
            8_000 => self.detector.predict_8khz(samples),
            16_000 => self.detector.predict_16khz(samples),
            _ => self.detector.predict_32khz(samples),
        };
        result.map_err(|e| AudioError::Vad(format!("{:?}", e)))
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "webrtc_vad"
    }
}

/// RMS energy threshold detector.
pub struct EnergyVad {
    threshold_db: f32,
}

impl EnergyVad {
    /// Frames louder than `threshold_db` dBFS count as speech.
    pub fn new(threshold_db: f32) -> Self {
        Self { threshold_db }
    }
}

/// RMS level of PCM16 samples in dBFS. Digital silence is -inf.
pub(crate) fn rms_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s) / 32_768.0;
            v * v
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (20.0 * rms.log10()) as f32
}

impl VadEngine for EnergyVad {
    fn is_speech(&mut self, samples: &[i16]) -> AudioResult<bool> {
        if samples.is_empty() {
            return Err(AudioError::InvalidFrame {
                expected: 1,
                actual: 0,
                sample_rate: 0,
            });
        }
        Ok(rms_dbfs(samples) > self.threshold_db)
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "energy_vad"
    }
}

/// Speaking-state change produced by [`SpeechDetector::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechTransition {
    /// Entered the speaking state.
    Started,

    /// Left the speaking state.
    Stopped,
}

/// Hysteresis over per-frame speech labels.
#[derive(Debug, Clone)]
pub struct SpeechDetector {
    frames_for_start: u32,
    frames_for_stop: u32,
    speech_frames: u32,
    silence_frames: u32,
    speaking: bool,
}

impl SpeechDetector {
    /// Start after `frames_for_start` consecutive speech frames, stop after
    /// `frames_for_stop` consecutive silence frames.
    pub fn new(frames_for_start: u32, frames_for_stop: u32) -> Self {
        Self {
            frames_for_start: frames_for_start.max(1),
            frames_for_stop: frames_for_stop.max(1),
            speech_frames: 0,
            silence_frames: 0,
            speaking: false,
        }
    }

    /// Whether the detector is in the speaking state.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one frame label.
    pub fn update(&mut self, is_speech: bool) -> Option<SpeechTransition> {
        if is_speech {
            self.speech_frames = self.speech_frames.saturating_add(1);
            self.silence_frames = 0;

            if !self.speaking && self.speech_frames >= self.frames_for_start {
                self.speaking = true;
                return Some(SpeechTransition::Started);
            }
            return None;
        }

        self.silence_frames = self.silence_frames.saturating_add(1);

        // Pauses inside an utterance must not reset the speech count.
        if !self.speaking {
            self.speech_frames = 0;
        }

        if self.speaking && self.silence_frames >= self.frames_for_stop {
            self.speaking = false;
            self.speech_frames = 0;
            return Some(SpeechTransition::Stopped);
        }
        None
    }

    /// Return to the initial not-speaking state.
    pub fn reset(&mut self) {
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.speaking = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_burst_does_not_start() {
        let mut detector = SpeechDetector::new(2, 60);
        assert_eq!(detector.update(true), None);
        assert_eq!(detector.update(false), None);
        assert_eq!(detector.update(true), None);
        assert!(!detector.is_speaking());
    }

    #[test]
    fn test_start_fires_once() {
        let mut detector = SpeechDetector::new(2, 60);
        let transitions: Vec<_> = (0..10).filter_map(|_| detector.update(true)).collect();
        assert_eq!(transitions, vec![SpeechTransition::Started]);
    }

    #[test]
    fn test_pause_inside_utterance_is_tolerated() {
        let mut detector = SpeechDetector::new(2, 5);
        detector.update(true);
        detector.update(true);

        for _ in 0..4 {
            assert_eq!(detector.update(false), None);
        }
        // Speech resumes before the release window closes.
        assert_eq!(detector.update(true), None);
        for _ in 0..4 {
            assert_eq!(detector.update(false), None);
        }
        assert!(detector.is_speaking());
        assert_eq!(detector.update(false), Some(SpeechTransition::Stopped));
        assert!(!detector.is_speaking());
    }

    #[test]
    fn test_restart_after_stop_needs_full_attack() {
        let mut detector = SpeechDetector::new(3, 1);
        for _ in 0..3 {
            detector.update(true);
        }
        assert_eq!(detector.update(false), Some(SpeechTransition::Stopped));
        assert_eq!(detector.update(true), None);
        assert_eq!(detector.update(true), None);
        assert_eq!(detector.update(true), Some(SpeechTransition::Started));
    }

    #[test]
    fn test_webrtc_rejects_malformed_frames() {
        let mut vad = WebRtcVad::new(16_000, 0);
        assert!(matches!(
            vad.is_speech(&[0; 100]),
            Err(AudioError::InvalidFrame { expected: 480, actual: 100, .. })
        ));

        let mut vad = WebRtcVad::new(44_100, 0);
        assert!(vad.is_speech(&[0; 441]).is_err());
    }

    #[test]
    fn test_webrtc_accepts_silence_frames() {
        let mut vad = WebRtcVad::new(16_000, 3);
        assert!(!vad.is_speech(&[0; 480]).unwrap());
        assert!(!vad.is_speech(&[0; 160]).unwrap());
    }

    #[test]
    fn test_energy_vad_thresholds() {
        let mut vad = EnergyVad::new(-40.0);
        assert!(!vad.is_speech(&[0; 480]).unwrap());
        assert!(vad.is_speech(&[8_000; 480]).unwrap());
        assert!(!vad.is_speech(&[50; 480]).unwrap());
        assert!(vad.is_speech(&[]).is_err());
    }

    #[test]
    fn test_rms_dbfs_full_scale() {
        let level = rms_dbfs(&[i16::MIN; 16]);
        assert!(level.abs() < 0.01);
        assert_eq!(rms_dbfs(&[0; 16]), f32::NEG_INFINITY);
    }
}
