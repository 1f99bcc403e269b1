//! Sample rate conversion and per-chunk signal processing.

use crate::error::PlaybackError;
use crate::PlaybackResult;

/// Number of samples `len` input samples become after conversion.
pub fn resampled_len(len: usize, from: u32, to: u32) -> usize {
    ((len as f64) * f64::from(to) / f64::from(from)).round() as usize
}

/// Linear-interpolation resampler.
///
/// The output spans the same time window as the input: the first and last
/// output samples land exactly on the first and last input samples.
pub fn resample_linear(samples: &[i16], from: u32, to: u32) -> PlaybackResult<Vec<i16>> {
    if from == 0 || to == 0 {
        return Err(PlaybackError::Resample { from, to });
    }
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let out_len = resampled_len(samples.len(), from, to);
    if out_len == 0 {
        return Ok(Vec::new());
    }
    if out_len == 1 || samples.len() == 1 {
        return Ok(vec![samples[0]; out_len]);
    }

    let step = (samples.len() - 1) as f64 / (out_len - 1) as f64;
    let last = samples.len() - 1;

    let out = (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let index = (pos.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let frac = pos - index as f64;
            let a = f64::from(samples[index]);
            let b = f64::from(samples[next]);
            (a + (b - a) * frac).round() as i16
        })
        .collect();

    Ok(out)
}

/// Duplicate a mono signal into interleaved stereo.
pub fn mono_to_stereo(samples: &[i16]) -> Vec<i16> {
    samples.iter().flat_map(|&s| [s, s]).collect()
}

/// Scale samples by an output volume in percent (0-100).
pub fn apply_volume(samples: &mut [i16], volume: u8) {
    let volume = volume.min(100);
    if volume == 100 {
        return;
    }
    let gain = f32::from(volume) / 100.0;
    for sample in samples.iter_mut() {
        *sample = (f32::from(*sample) * gain).round() as i16;
    }
}

/// Turns received mono chunks into stereo frames at the output rate.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProcessor {
    output_sample_rate: u32,
}

impl ChunkProcessor {
    pub fn new(output_sample_rate: u32) -> Self {
        Self { output_sample_rate }
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output_sample_rate
    }

    /// Resample, duplicate to stereo and apply `volume`.
    pub fn process(&self, samples: &[i16], sample_rate: u32, volume: u8) -> PlaybackResult<Vec<i16>> {
        let resampled = resample_linear(samples, sample_rate, self.output_sample_rate)?;
        let mut stereo = mono_to_stereo(&resampled);
        apply_volume(&mut stereo, volume);
        Ok(stereo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_chunk_length() {
        let samples = vec![1000i16; 480];
        let out = resample_linear(&samples, 16_000, 22_050).unwrap();
        assert_eq!(out.len(), 662);
        assert!(out.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_resample_lengths_across_sizes() {
        for n in [1usize, 2, 7, 160, 320, 479, 480, 481, 960] {
            let samples: Vec<i16> = (0..n).map(|i| i as i16).collect();
            let out = resample_linear(&samples, 16_000, 22_050).unwrap();
            let expected = (n as f64 * 22_050.0 / 16_000.0).round() as i64;
            assert!((out.len() as i64 - expected).abs() <= 1, "n = {}", n);
        }
    }

    #[test]
    fn test_resample_interpolates_ramp() {
        let out = resample_linear(&[0, 100], 1, 3).unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], 0);
        assert_eq!(out[5], 100);
        assert_eq!(out[1], 20);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_resample_downsample() {
        let samples: Vec<i16> = (0..441).map(|i| i as i16).collect();
        let out = resample_linear(&samples, 44_100, 16_000).unwrap();
        assert_eq!(out.len(), 160);
        assert_eq!(out[0], 0);
        assert_eq!(out[159], 440);
    }

    #[test]
    fn test_resample_same_rate_and_invalid_rate() {
        assert_eq!(resample_linear(&[1, 2, 3], 16_000, 16_000).unwrap(), vec![1, 2, 3]);
        assert!(resample_linear(&[1, 2, 3], 0, 16_000).is_err());
        assert!(resample_linear(&[], 16_000, 22_050).unwrap().is_empty());
    }

    #[test]
    fn test_mono_to_stereo_channels_match() {
        let stereo = mono_to_stereo(&[1, -2, 3]);
        assert_eq!(stereo, vec![1, 1, -2, -2, 3, 3]);
        assert!(stereo.chunks(2).all(|f| f[0] == f[1]));
    }

    #[test]
    fn test_apply_volume() {
        let mut samples = vec![1000, -1000];
        apply_volume(&mut samples, 50);
        assert_eq!(samples, vec![500, -500]);

        let mut samples = vec![1000];
        apply_volume(&mut samples, 0);
        assert_eq!(samples, vec![0]);

        let mut samples = vec![i16::MIN];
        apply_volume(&mut samples, 200);
        assert_eq!(samples, vec![i16::MIN]);
    }

    #[test]
    fn test_processor_silence_chunk() {
        let processor = ChunkProcessor::new(22_050);
        let frames = processor.process(&[0; 480], 16_000, 80).unwrap();
        assert_eq!(frames.len(), 662 * 2);
        assert!(frames.iter().all(|&s| s == 0));
    }
}
