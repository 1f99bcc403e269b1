//! Voice capture manager.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use titan_voice_ipc::{AudioChunk, CaptureConfig, InputDeviceInfo};

use crate::device::{FrameSink, InputBackend, InputStream};
use crate::vad::{create_vad_engine, SpeechDetector, SpeechTransition, VadEngine};
use crate::{PROCESS_POLL_INTERVAL, WORKER_JOIN_TIMEOUT};

/// Receives capture events.
///
/// All methods except the final `on_speech_stop` of a session run on the
/// capture processing thread; that one runs inside `stop_capture`.
pub trait CaptureListener: Send + Sync {
    /// The local user started speaking (or continuous capture began).
    fn on_speech_start(&self) {}

    /// A chunk to transmit.
    fn on_audio_chunk(&self, chunk: &AudioChunk);

    /// The local user stopped speaking (or capture stopped).
    fn on_speech_stop(&self) {}

    /// The input device could not be opened.
    fn on_error(&self, _message: &str) {}
}

struct NoopListener;

impl CaptureListener for NoopListener {
    fn on_audio_chunk(&self, _chunk: &AudioChunk) {}
}

type ListenerSlot = Arc<RwLock<Arc<dyn CaptureListener>>>;

/// Captures microphone audio and forwards it, optionally gated by VAD.
pub struct VoiceCaptureManager {
    config: CaptureConfig,
    backend: Box<dyn InputBackend>,
    listener: ListenerSlot,
    stream: Option<Box<dyn InputStream>>,
    worker: Option<JoinHandle<()>>,
    should_stop: Arc<AtomicBool>,
    is_speaking: Arc<AtomicBool>,
    dropped_chunks: Arc<AtomicU64>,
}

impl VoiceCaptureManager {
    /// Create a manager over the given input backend.
    pub fn new(config: CaptureConfig, backend: Box<dyn InputBackend>) -> Self {
        Self {
            config,
            backend,
            listener: Arc::new(RwLock::new(Arc::new(NoopListener))),
            stream: None,
            worker: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            is_speaking: Arc::new(AtomicBool::new(false)),
            dropped_chunks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register the event listener, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn CaptureListener>) {
        *self.listener.write() = listener;
    }

    /// Capture configuration.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Start capturing. No-op if already capturing.
    ///
    /// Device failures are reported through `on_error`; the manager stays
    /// stopped.
    #[instrument(name = "voice_capture_start", skip(self))]
    pub fn start_capture(&mut self) {
        if self.is_capturing() {
            debug!("Capture already running, ignoring start");
            return;
        }

        self.should_stop.store(false, Ordering::SeqCst);
        self.is_speaking.store(false, Ordering::SeqCst);
        self.dropped_chunks.store(0, Ordering::Relaxed);

        self.log_devices();

        let format = self.config.format();
        let (sender, receiver) = crossbeam_channel::bounded(self.config.queue_capacity);
        let sink = FrameSink::new(sender, format, Arc::clone(&self.dropped_chunks));

        let stream = match self.backend.open(format, sink) {
            Ok(stream) => stream,
            Err(e) => {
                let message = format!("Failed to start audio capture: {}", e);
                warn!("{}", message);
                self.listener.read().on_error(&message);
                return;
            }
        };

        let gate = SpeechGate::from_config(&self.config);
        let listener = Arc::clone(&self.listener);
        let should_stop = Arc::clone(&self.should_stop);
        let is_speaking = Arc::clone(&self.is_speaking);

        let spawned = thread::Builder::new()
            .name("titan-voice-capture".into())
            .spawn(move || process_thread(receiver, gate, listener, should_stop, is_speaking));

        match spawned {
            Ok(handle) => {
                self.stream = Some(stream);
                self.worker = Some(handle);
                info!(
                    sample_rate = format.sample_rate,
                    chunk_ms = format.chunk_duration_ms,
                    mode = self.mode_name(),
                    "Voice capture started"
                );
            }
            Err(e) => {
                let mut stream = stream;
                stream.close();
                let message = format!("Failed to start capture thread: {}", e);
                warn!("{}", message);
                self.listener.read().on_error(&message);
            }
        }
    }

    /// Stop capturing. Fires `on_speech_stop` before returning if the
    /// speaking state was active. No-op if not capturing.
    #[instrument(name = "voice_capture_stop", skip(self))]
    pub fn stop_capture(&mut self) {
        if !self.is_capturing() {
            return;
        }

        self.should_stop.store(true, Ordering::SeqCst);

        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }

        if let Some(handle) = self.worker.take() {
            join_with_timeout(handle);
        }

        if self.is_speaking.swap(false, Ordering::SeqCst) {
            self.listener.read().on_speech_stop();
        }

        info!(
            mode = self.mode_name(),
            dropped = self.dropped_chunks(),
            "Voice capture stopped"
        );
    }

    /// Whether an input stream is open.
    pub fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether the speaking state is active.
    pub fn is_speaking(&self) -> bool {
        self.is_speaking.load(Ordering::SeqCst)
    }

    /// Chunks dropped by the device callback since the last start.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    /// Set WebRTC VAD aggressiveness (0-3). Out-of-range levels are
    /// ignored. Applies from the next `start_capture`.
    pub fn set_vad_aggressiveness(&mut self, level: u8) {
        if level <= 3 {
            self.config.vad_aggressiveness = level;
            info!(level, "VAD aggressiveness set");
        } else {
            warn!(level, "Ignoring out-of-range VAD aggressiveness");
        }
    }

    /// Input devices known to the backend. Empty on enumeration failure.
    pub fn available_devices(&self) -> Vec<InputDeviceInfo> {
        self.backend.devices().unwrap_or_else(|e| {
            warn!("Error querying audio devices: {}", e);
            Vec::new()
        })
    }

    fn log_devices(&self) {
        for device in self.available_devices() {
            debug!(
                index = device.index,
                name = %device.name,
                channels = device.channels,
                sample_rate = device.default_sample_rate,
                is_default = device.is_default,
                "Input device"
            );
        }
    }

    fn mode_name(&self) -> &'static str {
        if self.config.use_vad {
            "vad"
        } else {
            "continuous"
        }
    }
}

impl Drop for VoiceCaptureManager {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

fn join_with_timeout(handle: JoinHandle<()>) {
    let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Capture thread did not exit in time, detaching");
            return;
        }
        thread::sleep(std::time::Duration::from_millis(5));
    }
    let _ = handle.join();
}

/// What the processing thread does with one chunk.
#[derive(Debug, Default, PartialEq, Eq)]
struct GateDecision {
    started: bool,
    stopped: bool,
    forward: bool,
}

enum SpeechGate {
    Continuous {
        started: bool,
    },
    Vad {
        engine: Box<dyn VadEngine>,
        detector: SpeechDetector,
        error_logged: bool,
    },
}

impl SpeechGate {
    fn from_config(config: &CaptureConfig) -> Self {
        if config.use_vad {
            let engine = create_vad_engine(config);
            debug!(engine = engine.name(), "VAD gate enabled");
            Self::Vad {
                engine,
                detector: SpeechDetector::new(
                    config.frames_for_speech_start,
                    config.frames_for_speech_stop,
                ),
                error_logged: false,
            }
        } else {
            Self::Continuous { started: false }
        }
    }

    fn process(&mut self, chunk: &AudioChunk) -> GateDecision {
        match self {
            Self::Continuous { started } => {
                let first = !*started;
                *started = true;
                GateDecision {
                    started: first,
                    stopped: false,
                    forward: true,
                }
            }
            Self::Vad {
                engine,
                detector,
                error_logged,
            } => {
                let is_speech = match engine.is_speech(&chunk.samples()) {
                    Ok(is_speech) => is_speech,
                    Err(e) => {
                        if !*error_logged {
                            *error_logged = true;
                            warn!(
                                expected_bytes = chunk.format().bytes_per_chunk(),
                                actual_bytes = chunk.data().len(),
                                "VAD rejected chunk, treating as silence: {}",
                                e
                            );
                        }
                        false
                    }
                };

                let transition = detector.update(is_speech);
                GateDecision {
                    started: transition == Some(SpeechTransition::Started),
                    stopped: transition == Some(SpeechTransition::Stopped),
                    forward: detector.is_speaking(),
                }
            }
        }
    }
}

fn process_thread(
    receiver: Receiver<AudioChunk>,
    mut gate: SpeechGate,
    listener: ListenerSlot,
    should_stop: Arc<AtomicBool>,
    is_speaking: Arc<AtomicBool>,
) {
    debug!("Capture processing thread started");

    while !should_stop.load(Ordering::SeqCst) {
        let chunk = match receiver.recv_timeout(PROCESS_POLL_INTERVAL) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let decision = gate.process(&chunk);
        let current = Arc::clone(&*listener.read());

        if decision.started {
            is_speaking.store(true, Ordering::SeqCst);
            current.on_speech_start();
        }
        if decision.stopped {
            is_speaking.store(false, Ordering::SeqCst);
            current.on_speech_stop();
        }
        if decision.forward {
            current.on_audio_chunk(&chunk);
        }
    }

    debug!("Capture processing thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;

    use titan_voice_ipc::{AudioFormat, VadEngineKind};

    use crate::error::AudioError;
    use crate::AudioResult;

    #[derive(Default)]
    struct Recorder {
        starts: AtomicU64,
        stops: AtomicU64,
        chunks: Mutex<Vec<AudioChunk>>,
        errors: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn starts(&self) -> u64 {
            self.starts.load(Ordering::SeqCst)
        }

        fn stops(&self) -> u64 {
            self.stops.load(Ordering::SeqCst)
        }

        fn chunk_count(&self) -> usize {
            self.chunks.lock().len()
        }
    }

    impl CaptureListener for Recorder {
        fn on_speech_start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_audio_chunk(&self, chunk: &AudioChunk) {
            self.chunks.lock().push(chunk.clone());
        }

        fn on_speech_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, message: &str) {
            self.errors.lock().push(message.to_string());
        }
    }

    /// Backend that hands its sink to the test.
    #[derive(Clone, Default)]
    struct ScriptedInput {
        sink: Arc<Mutex<Option<FrameSink>>>,
        opens: Arc<AtomicU64>,
        fail: bool,
    }

    struct ScriptedStream {
        sink: Arc<Mutex<Option<FrameSink>>>,
    }

    impl InputStream for ScriptedStream {
        fn close(&mut self) {
            self.sink.lock().take();
        }
    }

    impl InputBackend for ScriptedInput {
        fn open(&mut self, _format: AudioFormat, sink: FrameSink) -> AudioResult<Box<dyn InputStream>> {
            if self.fail {
                return Err(AudioError::DeviceNotFound("no microphone".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock() = Some(sink);
            Ok(Box::new(ScriptedStream {
                sink: Arc::clone(&self.sink),
            }))
        }
    }

    impl ScriptedInput {
        fn push(&self, samples: &[i16]) -> bool {
            self.sink
                .lock()
                .as_ref()
                .map(|sink| sink.push_samples(samples))
                .unwrap_or(false)
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn manager(config: CaptureConfig) -> (VoiceCaptureManager, ScriptedInput, Arc<Recorder>) {
        let input = ScriptedInput::default();
        let manager = VoiceCaptureManager::new(config, Box::new(input.clone()));
        let recorder = Arc::new(Recorder::default());
        manager.set_listener(recorder.clone());
        (manager, input, recorder)
    }

    fn energy_vad_config() -> CaptureConfig {
        CaptureConfig {
            use_vad: true,
            vad_engine: VadEngineKind::Energy,
            energy_threshold_db: -40.0,
            frames_for_speech_start: 2,
            frames_for_speech_stop: 3,
            ..Default::default()
        }
    }

    const LOUD: i16 = 8_000;

    #[test]
    fn test_continuous_mode_scenario() {
        let (mut manager, input, recorder) = manager(CaptureConfig::default());
        manager.start_capture();
        assert!(manager.is_capturing());

        let sent: Vec<Vec<i16>> = (0..10).map(|i| vec![i as i16; 480]).collect();
        for samples in &sent {
            assert!(input.push(samples));
        }

        assert!(wait_for(|| recorder.chunk_count() == 10));
        assert_eq!(recorder.starts(), 1);
        assert_eq!(recorder.stops(), 0);
        {
            let chunks = recorder.chunks.lock();
            for (chunk, samples) in chunks.iter().zip(&sent) {
                assert_eq!(&chunk.samples(), samples);
            }
        }

        manager.stop_capture();
        assert_eq!(recorder.stops(), 1);
        assert!(!manager.is_capturing());

        manager.stop_capture();
        assert_eq!(recorder.stops(), 1);
    }

    #[test]
    fn test_continuous_mode_silent_chunks_still_forwarded() {
        let (mut manager, input, recorder) = manager(CaptureConfig::default());
        manager.start_capture();
        input.push(&[0; 480]);
        assert!(wait_for(|| recorder.chunk_count() == 1));
        assert_eq!(recorder.starts(), 1);
    }

    #[test]
    fn test_start_twice_opens_one_stream() {
        let (mut manager, input, recorder) = manager(CaptureConfig::default());
        manager.start_capture();
        manager.start_capture();
        assert_eq!(input.opens.load(Ordering::SeqCst), 1);

        input.push(&[1; 480]);
        assert!(wait_for(|| recorder.chunk_count() == 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(recorder.chunk_count(), 1);
        assert_eq!(recorder.starts(), 1);
    }

    #[test]
    fn test_restart_fires_new_start_and_stop() {
        let (mut manager, input, recorder) = manager(CaptureConfig::default());
        for round in 1..=2 {
            manager.start_capture();
            input.push(&[1; 480]);
            assert!(wait_for(|| recorder.starts() == round));
            manager.stop_capture();
            assert_eq!(recorder.stops(), round);
        }
    }

    #[test]
    fn test_stop_without_chunks_fires_no_stop() {
        let (mut manager, _input, recorder) = manager(CaptureConfig::default());
        manager.start_capture();
        manager.stop_capture();
        assert_eq!(recorder.starts(), 0);
        assert_eq!(recorder.stops(), 0);
    }

    #[test]
    fn test_device_failure_reports_error_and_stays_stopped() {
        let input = ScriptedInput {
            fail: true,
            ..Default::default()
        };
        let mut manager = VoiceCaptureManager::new(CaptureConfig::default(), Box::new(input));
        let recorder = Arc::new(Recorder::default());
        manager.set_listener(recorder.clone());

        manager.start_capture();
        assert!(!manager.is_capturing());
        let errors = recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no microphone"));
    }

    #[test]
    fn test_vad_short_burst_is_not_transmitted() {
        let (mut manager, input, recorder) = manager(energy_vad_config());
        manager.start_capture();

        input.push(&[LOUD; 480]);
        input.push(&[0; 480]);
        input.push(&[LOUD; 480]);
        input.push(&[0; 480]);
        thread::sleep(Duration::from_millis(100));

        assert_eq!(recorder.starts(), 0);
        assert_eq!(recorder.chunk_count(), 0);
        manager.stop_capture();
        assert_eq!(recorder.stops(), 0);
    }

    #[test]
    fn test_vad_start_stop_cycle() {
        let (mut manager, input, recorder) = manager(energy_vad_config());
        manager.start_capture();

        for _ in 0..4 {
            input.push(&[LOUD; 480]);
        }
        assert!(wait_for(|| recorder.chunk_count() == 3));
        assert_eq!(recorder.starts(), 1);
        assert!(manager.is_speaking());

        // Two silent frames stay inside the utterance, the third ends it.
        for _ in 0..3 {
            input.push(&[0; 480]);
        }
        assert!(wait_for(|| recorder.stops() == 1));
        assert_eq!(recorder.chunk_count(), 5);
        assert!(!manager.is_speaking());

        manager.stop_capture();
        assert_eq!(recorder.stops(), 1);
    }

    #[test]
    fn test_stop_while_speaking_fires_stop_synchronously() {
        let (mut manager, input, recorder) = manager(energy_vad_config());
        manager.start_capture();
        input.push(&[LOUD; 480]);
        input.push(&[LOUD; 480]);
        assert!(wait_for(|| recorder.starts() == 1));

        manager.stop_capture();
        assert_eq!(recorder.stops(), 1);
    }

    #[test]
    fn test_vad_malformed_chunk_is_silence() {
        let config = CaptureConfig {
            use_vad: true,
            vad_engine: VadEngineKind::WebRtc,
            frames_for_speech_start: 1,
            ..Default::default()
        };
        let (mut manager, input, recorder) = manager(config);
        manager.start_capture();

        for _ in 0..3 {
            input.push(&[LOUD; 100]);
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.starts(), 0);
        assert_eq!(recorder.chunk_count(), 0);
    }

    #[test]
    fn test_vad_aggressiveness_range() {
        let (mut manager, _input, _recorder) = manager(CaptureConfig::default());
        manager.set_vad_aggressiveness(3);
        assert_eq!(manager.config().vad_aggressiveness, 3);
        manager.set_vad_aggressiveness(7);
        assert_eq!(manager.config().vad_aggressiveness, 3);
    }

    #[test]
    fn test_gate_continuous_decisions() {
        let mut gate = SpeechGate::Continuous { started: false };
        let chunk = AudioChunk::silence(AudioFormat::default());
        assert_eq!(
            gate.process(&chunk),
            GateDecision {
                started: true,
                stopped: false,
                forward: true
            }
        );
        assert_eq!(
            gate.process(&chunk),
            GateDecision {
                started: false,
                stopped: false,
                forward: true
            }
        );
    }
}
