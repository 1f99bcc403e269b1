//! One room's voice session: playback, capture and their wiring.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender;
use tracing::{debug, info, instrument, warn};

use titan_voice_capture::{CpalInput, InputBackend, VoiceCaptureManager};
use titan_voice_ipc::{InputDeviceInfo, JoinPhase, VoiceConfig, VoiceEvent, VoiceMetrics};
use titan_voice_playback::{CpalOutput, OutputBackend, OutputStream, PlaybackManager, VolumeProvider};

use crate::cues::{Cue, CueSink};
use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::receive::RoomReceiver;
use crate::transmit::{Transmitter, TransportSink};
use crate::{send_event, EngineResult};

/// Opens the audio devices for a session.
pub trait AudioBackends: Send {
    fn input(&self) -> Box<dyn InputBackend>;
    fn output(&self) -> Box<dyn OutputBackend>;
}

/// The default system input and output devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAudio;

impl AudioBackends for SystemAudio {
    fn input(&self) -> Box<dyn InputBackend> {
        Box::new(CpalInput::new())
    }

    fn output(&self) -> Box<dyn OutputBackend> {
        Box::new(CpalOutput::new())
    }
}

/// Collaborators a session is built from.
pub struct SessionIo {
    pub input: Box<dyn InputBackend>,
    pub output: Box<dyn OutputBackend>,
    pub transport: Arc<dyn TransportSink>,
    pub cues: Arc<dyn CueSink>,
    pub volume: Arc<dyn VolumeProvider>,
    pub event_tx: Sender<VoiceEvent>,
}

/// Voice for one joined room.
///
/// Built by [`VoiceSession::new`], brought up phase by phase with
/// [`VoiceSession::initialize`] and torn down with
/// [`VoiceSession::shutdown`].
pub struct VoiceSession {
    room_id: String,
    config: VoiceConfig,
    input: Option<Box<dyn InputBackend>>,
    output: Box<dyn OutputBackend>,
    transport: Arc<dyn TransportSink>,
    cues: Arc<dyn CueSink>,
    volume: Arc<dyn VolumeProvider>,
    event_tx: Sender<VoiceEvent>,
    metrics: Arc<MetricsCollector>,
    output_stream: Option<Box<dyn OutputStream>>,
    playback: Option<Arc<PlaybackManager>>,
    receiver: Option<Arc<RoomReceiver>>,
    capture: Option<VoiceCaptureManager>,
    current_phase: Option<JoinPhase>,
}

impl VoiceSession {
    pub fn new(room_id: String, config: VoiceConfig, io: SessionIo) -> Self {
        Self {
            room_id,
            config,
            input: Some(io.input),
            output: io.output,
            transport: io.transport,
            cues: io.cues,
            volume: io.volume,
            event_tx: io.event_tx,
            metrics: Arc::new(MetricsCollector::new()),
            output_stream: None,
            playback: None,
            receiver: None,
            capture: None,
            current_phase: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    /// Run every join phase in order. `on_phase` is told about each phase
    /// before it starts. On error the caller should [`rollback`].
    ///
    /// [`rollback`]: VoiceSession::rollback
    #[instrument(name = "session_initialize", skip(self, on_phase), fields(room_id = %self.room_id))]
    pub fn initialize(&mut self, mut on_phase: impl FnMut(JoinPhase)) -> EngineResult<()> {
        let mut phase = JoinPhase::InitPlayback;

        loop {
            self.current_phase = Some(phase);
            on_phase(phase);
            self.init_phase(phase)?;

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        self.metrics.start();
        info!("Voice session ready");
        Ok(())
    }

    fn init_phase(&mut self, phase: JoinPhase) -> EngineResult<()> {
        info!("Initializing phase: {}", phase.name());

        match phase {
            JoinPhase::InitPlayback => self.init_playback(),
            JoinPhase::InitCapture => self.init_capture(),
        }
    }

    fn init_playback(&mut self) -> EngineResult<()> {
        if self.playback.is_some() {
            return Err(EngineError::PhaseAlreadyInitialized(JoinPhase::InitPlayback.name()));
        }
        self.config.playback.validate()?;

        let opened = self.output.open(&self.config.playback)?;
        if opened.sample_rate != self.config.playback.output_sample_rate {
            info!(
                requested = self.config.playback.output_sample_rate,
                actual = opened.sample_rate,
                "Output opened at device rate"
            );
            self.config.playback.output_sample_rate = opened.sample_rate;
        }

        let manager = Arc::new(PlaybackManager::new(
            self.config.playback.clone(),
            self.config.capture.format(),
            opened.pool,
            Arc::clone(&self.volume),
        ));
        self.receiver = Some(Arc::new(RoomReceiver::new(
            self.room_id.clone(),
            self.config.capture.format(),
            Arc::clone(&manager),
            Arc::clone(&self.metrics),
        )));

        self.output_stream = Some(opened.stream);
        self.playback = Some(manager);
        debug!("Playback initialized");
        Ok(())
    }

    fn init_capture(&mut self) -> EngineResult<()> {
        if self.capture.is_some() {
            return Err(EngineError::PhaseAlreadyInitialized(JoinPhase::InitCapture.name()));
        }
        self.config.capture.validate()?;

        let input = self.input.take().ok_or(EngineError::InputConsumed)?;
        let manager = VoiceCaptureManager::new(self.config.capture.clone(), input);
        manager.set_listener(Arc::new(Transmitter::new(
            self.room_id.clone(),
            self.config.self_monitor,
            self.config.capture.agc.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.cues),
            self.event_tx.clone(),
            Arc::clone(&self.metrics),
        )));

        self.capture = Some(manager);
        debug!("Capture initialized");
        Ok(())
    }

    /// Undo every phase from the current one backwards.
    #[instrument(name = "session_rollback", skip(self), fields(room_id = %self.room_id))]
    pub fn rollback(&mut self) {
        let mut phase = self.current_phase.take();

        while let Some(current) = phase {
            info!("Rolling back phase: {}", current.name());
            self.rollback_phase(current);
            phase = current.previous();
        }
    }

    fn rollback_phase(&mut self, phase: JoinPhase) {
        match phase {
            JoinPhase::InitCapture => {
                if let Some(mut capture) = self.capture.take() {
                    capture.stop_capture();
                }
            }
            JoinPhase::InitPlayback => {
                self.receiver = None;
                if let Some(playback) = self.playback.take() {
                    playback.close();
                }
                if let Some(mut stream) = self.output_stream.take() {
                    stream.close();
                }
            }
        }
    }

    /// Stop everything.
    pub fn shutdown(&mut self) {
        self.metrics.stop();
        self.rollback();
    }

    /// Turn the microphone on or off. Returns whether it is now capturing.
    #[instrument(name = "session_set_mic", skip(self))]
    pub fn set_mic_enabled(&mut self, enabled: bool) -> bool {
        let Some(capture) = self.capture.as_mut() else {
            warn!("Capture not initialized");
            return false;
        };

        let was_capturing = capture.is_capturing();
        if enabled {
            capture.start_capture();
        } else {
            capture.stop_capture();
        }

        let capturing = capture.is_capturing();
        if capturing != was_capturing {
            let cue = if capturing { Cue::MicOn } else { Cue::MicOff };
            cue.emit(self.cues.as_ref());
        }
        capturing
    }

    pub fn mic_enabled(&self) -> bool {
        self.capture.as_ref().is_some_and(VoiceCaptureManager::is_capturing)
    }

    /// Set WebRTC VAD aggressiveness (0-3) for the next mic start.
    pub fn set_vad_aggressiveness(&mut self, level: u8) {
        if let Some(capture) = self.capture.as_mut() {
            capture.set_vad_aggressiveness(level);
        }
    }

    /// Hand a chunk from the network to playback. Chunks for other rooms
    /// are ignored. Returns whether the chunk was queued.
    pub fn receive_chunk(&self, user_id: &str, room_id: &str, data: Bytes) -> bool {
        match self.receiver.as_ref() {
            Some(receiver) => receiver.receive_chunk(user_id, room_id, data),
            None => {
                self.metrics.record_receive_drop();
                false
            }
        }
    }

    /// The receive path, once playback is up.
    pub(crate) fn receiver(&self) -> Option<Arc<RoomReceiver>> {
        self.receiver.clone()
    }

    /// A remote user started speaking.
    pub fn speech_started(&self, user_id: &str) {
        debug!(user_id, "Remote speech started");
        Cue::SpeakerStarted {
            user_id: user_id.to_string(),
        }
        .emit(self.cues.as_ref());
        send_event(
            &self.event_tx,
            VoiceEvent::SpeakerStarted {
                user_id: user_id.to_string(),
            },
        );
    }

    /// A remote user stopped speaking: their buffer is discarded.
    pub fn speech_stopped(&self, user_id: &str) {
        debug!(user_id, "Remote speech stopped");
        if let Some(playback) = self.playback.as_ref() {
            playback.stop(user_id);
        }
        Cue::SpeakerStopped {
            user_id: user_id.to_string(),
        }
        .emit(self.cues.as_ref());
        send_event(
            &self.event_tx,
            VoiceEvent::SpeakerStopped {
                user_id: user_id.to_string(),
            },
        );
    }

    /// Users with a live playback buffer.
    pub fn active_speakers(&self) -> Vec<String> {
        self.playback
            .as_ref()
            .map(|playback| playback.active_speakers())
            .unwrap_or_default()
    }

    /// Forget speakers whose playback ended on its own.
    pub fn reap_finished(&self) -> usize {
        self.playback.as_ref().map_or(0, |playback| playback.reap_finished())
    }

    /// Input devices, for diagnostics.
    pub fn available_devices(&self) -> Vec<InputDeviceInfo> {
        match (&self.capture, &self.input) {
            (Some(capture), _) => capture.available_devices(),
            (None, Some(input)) => input.devices().unwrap_or_default(),
            (None, None) => Vec::new(),
        }
    }

    pub fn metrics(&self) -> VoiceMetrics {
        let capture_drops = self.capture.as_ref().map_or(0, VoiceCaptureManager::dropped_chunks);
        let playback = self
            .playback
            .as_ref()
            .map(|playback| playback.stats())
            .unwrap_or_default();
        self.metrics
            .snapshot(capture_drops, playback, self.active_speakers().len())
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.rollback();
    }
}
