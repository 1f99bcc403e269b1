//! Input device access.
//!
//! The capture manager talks to the microphone through [`InputBackend`].
//! [`CpalInput`] is the real implementation; tests drive the manager with
//! scripted backends that push chunks straight into the [`FrameSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, info, instrument, trace, warn};

use titan_voice_ipc::{pick_sample_rate, AudioChunk, AudioFormat, InputDeviceInfo, RateRange};

use crate::error::AudioError;
use crate::{AudioResult, DROP_LOG_INTERVAL};

/// Producer side of the capture queue, handed to the device callback.
///
/// Never blocks: when the queue is full the newest chunk is dropped.
#[derive(Clone)]
pub struct FrameSink {
    sender: Sender<AudioChunk>,
    format: AudioFormat,
    sequence: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    pub(crate) fn new(sender: Sender<AudioChunk>, format: AudioFormat, dropped: Arc<AtomicU64>) -> Self {
        Self {
            sender,
            format,
            sequence: Arc::new(AtomicU64::new(0)),
            dropped,
        }
    }

    /// Format every chunk pushed through this sink is expected to have.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Queue raw PCM16 bytes. Returns false if the chunk was dropped.
    pub fn push(&self, data: Bytes) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let chunk = AudioChunk::new(data, self.format, sequence);

        match self.sender.try_send(chunk) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_LOG_INTERVAL == 1 {
                    warn!(dropped, "Capture queue full, dropping newest chunk");
                } else {
                    trace!(dropped, "Capture queue full, dropping newest chunk");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Queue samples as one chunk.
    pub fn push_samples(&self, samples: &[i16]) -> bool {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        self.push(Bytes::from(data))
    }
}

/// An open input stream. Closing it stops the device callback.
pub trait InputStream: Send {
    /// Stop the device and release it.
    fn close(&mut self);
}

/// Opens input streams for the capture manager.
pub trait InputBackend: Send {
    /// Open the input at `format`, delivering fixed-size chunks to `sink`.
    fn open(&mut self, format: AudioFormat, sink: FrameSink) -> AudioResult<Box<dyn InputStream>>;

    /// Available input devices, for diagnostics.
    fn devices(&self) -> AudioResult<Vec<InputDeviceInfo>> {
        Ok(Vec::new())
    }
}

/// Default system input device through cpal.
#[derive(Debug, Default)]
pub struct CpalInput;

impl CpalInput {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

impl InputBackend for CpalInput {
    #[instrument(name = "cpal_input_open", skip(self, sink))]
    fn open(&mut self, format: AudioFormat, sink: FrameSink) -> AudioResult<Box<dyn InputStream>> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<AudioResult<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        // cpal streams are not Send on every platform, so the stream lives
        // and dies on its own thread.
        let handle = thread::Builder::new()
            .name("titan-voice-input".into())
            .spawn(move || {
                let stream = match build_input_stream(format, sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns on explicit stop or when the handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Input stream closed");
            })
            .map_err(|e| AudioError::StreamOpen(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalInputStream {
                stop_tx: Some(stop_tx),
                thread: Some(handle),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::DeviceLost)
            }
        }
    }

    fn devices(&self) -> AudioResult<Vec<InputDeviceInfo>> {
        enumerate_input_devices()
    }
}

struct CpalInputStream {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Re-slices device buffers of arbitrary length into fixed-size mono chunks
/// at the capture rate.
struct Chunker {
    pending: Vec<i16>,
    samples_per_chunk: usize,
    channels: usize,
    converter: Option<RateConverter>,
    sink: FrameSink,
}

impl Chunker {
    fn new(sink: FrameSink, channels: usize, device_rate: u32) -> Self {
        let format = sink.format();
        let samples_per_chunk = format.samples_per_chunk();
        Self {
            pending: Vec::with_capacity(samples_per_chunk),
            samples_per_chunk,
            channels: channels.max(1),
            converter: RateConverter::new(device_rate, format.sample_rate),
            sink,
        }
    }

    fn push_frames<T: Copy>(&mut self, data: &[T], to_i16: impl Fn(T) -> i16) {
        for frame in data.chunks(self.channels) {
            // Downmix by averaging the channels of one frame.
            let sum: i32 = frame.iter().map(|&s| i32::from(to_i16(s))).sum();
            let mono = (sum / frame.len() as i32) as i16;

            let (pending, sink, size) = (&mut self.pending, &self.sink, self.samples_per_chunk);
            match self.converter.as_mut() {
                Some(converter) => converter.push(mono, |s| collect_sample(pending, sink, size, s)),
                None => collect_sample(pending, sink, size, mono),
            }
        }
    }
}

fn collect_sample(pending: &mut Vec<i16>, sink: &FrameSink, samples_per_chunk: usize, sample: i16) {
    pending.push(sample);
    if pending.len() == samples_per_chunk {
        sink.push_samples(pending);
        pending.clear();
    }
}

/// Streaming linear-interpolation rate conversion, for devices that only
/// record at their native rate.
struct RateConverter {
    /// Input samples per output sample.
    step: f64,
    /// Where the next output falls, measured from `previous`.
    position: f64,
    previous: Option<i16>,
}

impl RateConverter {
    /// `None` when no conversion is needed.
    fn new(from: u32, to: u32) -> Option<Self> {
        if from == to || from == 0 || to == 0 {
            return None;
        }
        Some(Self {
            step: f64::from(from) / f64::from(to),
            position: 0.0,
            previous: None,
        })
    }

    fn push(&mut self, sample: i16, mut emit: impl FnMut(i16)) {
        let Some(previous) = self.previous.replace(sample) else {
            return;
        };

        let (a, b) = (f64::from(previous), f64::from(sample));
        while self.position < 1.0 {
            emit((a + (b - a) * self.position).round() as i16);
            self.position += self.step;
        }
        self.position -= 1.0;
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped >= 0.0 {
        (clamped * i16::MAX as f32).round() as i16
    } else {
        (clamped * 32_768.0).round() as i16
    }
}

/// The capture rate if the device records it, else the device's own rate.
fn choose_input_rate(device: &cpal::Device, requested: u32, channels: u16, device_rate: u32) -> u32 {
    let ranges: Vec<RateRange> = device
        .supported_input_configs()
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

    let rate = pick_sample_rate(requested, channels, &ranges, device_rate);
    if rate != requested {
        info!(requested, device_rate, "Capture rate unsupported, resampling from device rate");
    }
    rate
}

fn build_input_stream(format: AudioFormat, sink: FrameSink) -> AudioResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceNotFound("no default input device".into()))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
    let default_config = device.default_input_config()?;
    let channels = default_config.channels();
    let device_rate = choose_input_rate(&device, format.sample_rate, channels, default_config.sample_rate().0);

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err: cpal::StreamError| warn!("Audio input stream error: {}", err);
    let mut chunker = Chunker::new(sink, channels as usize, device_rate);

    let stream = match default_config.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| chunker.push_frames(data, |s| s),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| chunker.push_frames(data, f32_to_i16),
            err_fn,
            None,
        )?,
        other => {
            return Err(AudioError::FormatNotSupported(format!(
                "{} uses sample format {:?}",
                device_name, other
            )))
        }
    };

    stream.play()?;

    info!(
        device = %device_name,
        sample_rate = format.sample_rate,
        device_rate,
        chunk_ms = format.chunk_duration_ms,
        channels,
        "Input stream started"
    );
    Ok(stream)
}

/// Enumerate input devices on the default host.
#[instrument(name = "enumerate_input_devices")]
pub fn enumerate_input_devices() -> AudioResult<Vec<InputDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    for (index, device) in host.input_devices()?.enumerate() {
        let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());

        let channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        if channels == 0 {
            continue;
        }

        let default_sample_rate = device
            .default_input_config()
            .map(|c| c.sample_rate().0)
            .unwrap_or(0);

        let is_default = default_name.as_deref() == Some(name.as_str());

        devices.push(InputDeviceInfo {
            index,
            name,
            channels,
            default_sample_rate,
            is_default,
        });
    }

    debug!(count = devices.len(), "Enumerated input devices");
    Ok(devices)
}
