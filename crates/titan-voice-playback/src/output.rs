//! Audio output: the voice channel mixer and its cpal stream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use titan_voice_ipc::{pick_sample_rate, PlaybackConfig, RateRange};

use crate::channels::{ChannelPool, OutputChannel};
use crate::error::PlaybackError;
use crate::PlaybackResult;

/// Interleaved stereo output.
pub const OUTPUT_CHANNELS: u16 = 2;

/// An open output stream.
pub trait OutputStream: Send {
    fn close(&mut self);
}

/// What [`OutputBackend::open`] hands back: the channels to queue voice
/// onto and the stream that drains them.
pub struct OpenOutput {
    pub pool: ChannelPool,
    pub stream: Box<dyn OutputStream>,
    /// Rate the stream actually runs at. Differs from the requested rate
    /// when the device only plays its native rate.
    pub sample_rate: u32,
}

/// Opens the voice output.
pub trait OutputBackend: Send {
    fn open(&mut self, config: &PlaybackConfig) -> PlaybackResult<OpenOutput>;
}

/// A software channel mixed into the output stream.
#[derive(Debug)]
pub struct MixerChannel {
    index: usize,
    pending: Mutex<VecDeque<i16>>,
}

impl MixerChannel {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Samples waiting to be played.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl OutputChannel for MixerChannel {
    fn queue(&self, frames: &[i16]) -> PlaybackResult<()> {
        self.pending.lock().extend(frames.iter().copied());
        Ok(())
    }

    fn is_busy(&self) -> bool {
        !self.pending.lock().is_empty()
    }
}

/// Sum every channel into `out`, consuming what was mixed.
///
/// Channels that run dry contribute silence for the remainder.
pub fn mix_into(out: &mut [f32], channels: &[Arc<MixerChannel>]) {
    out.fill(0.0);

    for channel in channels {
        let mut pending = channel.pending.lock();
        let take = pending.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(pending.drain(..take)) {
            *slot += f32::from(sample) / 32_768.0;
        }
    }

    for sample in out.iter_mut() {
        *sample = soft_clip(*sample);
    }
}

/// Soft clipping to avoid harsh digital clipping when voices overlap.
fn soft_clip(sample: f32) -> f32 {
    if sample > 1.0 {
        1.0 - (-sample + 1.0).exp() * 0.5
    } else if sample < -1.0 {
        -1.0 + (sample + 1.0).exp() * 0.5
    } else {
        sample
    }
}

/// Default system output device through cpal.
#[derive(Debug, Default)]
pub struct CpalOutput;

impl CpalOutput {
    pub fn new() -> Self {
        Self
    }
}

impl OutputBackend for CpalOutput {
    #[instrument(name = "cpal_output_open", skip(self, config))]
    fn open(&mut self, config: &PlaybackConfig) -> PlaybackResult<OpenOutput> {
        let channels: Vec<Arc<MixerChannel>> = (0..config.channel_count)
            .map(|i| Arc::new(MixerChannel::new(i)))
            .collect();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<PlaybackResult<u32>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let sample_rate = config.output_sample_rate;
        let mixed = channels.clone();

        let handle = thread::Builder::new()
            .name("titan-voice-output".into())
            .spawn(move || {
                let (stream, actual_rate) = match build_output_stream(sample_rate, mixed) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(actual_rate));

                let _ = stop_rx.recv();
                drop(stream);
                debug!("Output stream closed");
            })
            .map_err(|e| PlaybackError::StreamOpen(e.to_string()))?;

        let actual_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(PlaybackError::StreamOpen("output thread exited".into()));
            }
        };

        let pool = ChannelPool::new(
            channels
                .into_iter()
                .map(|c| c as Arc<dyn OutputChannel>)
                .collect(),
        )?;

        Ok(OpenOutput {
            pool,
            stream: Box::new(CpalOutputStream {
                stop_tx: Some(stop_tx),
                thread: Some(handle),
            }),
            sample_rate: actual_rate,
        })
    }
}

struct CpalOutputStream {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream for CpalOutputStream {
    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalOutputStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// `requested` if the device plays it in stereo, else the device's own rate.
fn choose_output_rate(device: &cpal::Device, requested: u32, device_rate: u32) -> u32 {
    let ranges: Vec<RateRange> = device
        .supported_output_configs()
        .map(|configs| {
            configs
                .map(|c| RateRange {
                    channels: c.channels(),
                    min: c.min_sample_rate().0,
                    max: c.max_sample_rate().0,
                })
                .collect()
        })
        .unwrap_or_default();

    let rate = pick_sample_rate(requested, OUTPUT_CHANNELS, &ranges, device_rate);
    if rate != requested {
        info!(requested, device_rate, "Output rate unsupported, using device rate");
    }
    rate
}

fn build_output_stream(
    requested_rate: u32,
    channels: Vec<Arc<MixerChannel>>,
) -> PlaybackResult<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::DeviceNotFound("no default output device".into()))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
    let default_config = device.default_output_config()?;
    let sample_rate = choose_output_rate(&device, requested_rate, default_config.sample_rate().0);

    let config = cpal::StreamConfig {
        channels: OUTPUT_CHANNELS,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err: cpal::StreamError| warn!("Audio output stream error: {}", err);

    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mix_into(data, &channels),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    mix_into(&mut scratch, &channels);
                    for (out, &sample) in data.iter_mut().zip(&scratch) {
                        *out = (sample * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )?
        }
        other => {
            return Err(PlaybackError::FormatNotSupported(format!(
                "{} uses sample format {:?}",
                device_name, other
            )))
        }
    };

    stream.play()?;

    info!(device = %device_name, sample_rate, "Output stream started");
    Ok((stream, sample_rate))
}
