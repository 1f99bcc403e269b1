//! Main engine orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use titan_voice_ipc::{LeaveReason, SessionState, VoiceCommand, VoiceConfig, VoiceEvent};
use titan_voice_playback::SharedVolume;

use crate::cues::{Cue, CueSink, SilentCues};
use crate::receive::ReceiveHandle;
use crate::session::{AudioBackends, SessionIo, SystemAudio, VoiceSession};
use crate::transmit::{NullTransport, TransportSink};
use crate::send_event;

/// How long the command loop waits before doing housekeeping.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often metrics are emitted while in a room.
const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// The engine's collaborators outside the audio pipeline.
pub struct EngineIo {
    pub audio: Box<dyn AudioBackends>,
    pub transport: Arc<dyn TransportSink>,
    pub cues: Arc<dyn CueSink>,
    /// Where the network side delivers received audio. The engine points
    /// it at the joined room.
    pub receive: ReceiveHandle,
}

impl EngineIo {
    /// System audio devices with the given transport and no cues.
    pub fn system(transport: Arc<dyn TransportSink>) -> Self {
        Self {
            audio: Box::new(SystemAudio),
            transport,
            cues: Arc::new(SilentCues),
            receive: ReceiveHandle::new(),
        }
    }
}

impl Default for EngineIo {
    fn default() -> Self {
        Self::system(Arc::new(NullTransport))
    }
}

/// The voice engine: owns at most one [`VoiceSession`] and drives it from
/// host commands.
pub struct Engine {
    command_rx: Receiver<VoiceCommand>,
    event_tx: Sender<VoiceEvent>,
    io: EngineIo,
    state: SessionState,
    session: Option<VoiceSession>,
    volume: Arc<SharedVolume>,
    last_metrics: Instant,
}

impl Engine {
    pub fn new(command_rx: Receiver<VoiceCommand>, event_tx: Sender<VoiceEvent>, io: EngineIo) -> Self {
        Self {
            command_rx,
            event_tx,
            io,
            state: SessionState::Idle,
            session: None,
            volume: Arc::new(SharedVolume::default()),
            last_metrics: Instant::now(),
        }
    }

    /// Current session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Entry point for received audio, usable from any thread.
    pub fn receive_handle(&self) -> ReceiveHandle {
        self.io.receive.clone()
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Voice engine starting");
        self.send_event(VoiceEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(COMMAND_POLL_INTERVAL) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.leave_room(LeaveReason::Shutdown);
                    break;
                }
            }
            self.housekeeping();
        }

        info!("Voice engine stopped");
    }

    /// Handle a command. Returns false if the engine should stop.
    pub fn handle_command(&mut self, command: VoiceCommand) -> bool {
        match command {
            VoiceCommand::JoinRoom { room_id, config } => {
                debug!(room_id = %room_id, "Handling join");
                self.join_room(room_id, config);
            }
            VoiceCommand::LeaveRoom => self.leave_room(LeaveReason::UserRequested),
            VoiceCommand::SetMicEnabled(enabled) => self.set_mic_enabled(enabled),
            VoiceCommand::SetOutputVolume(volume) => {
                self.volume.set(volume);
                debug!(volume, "Output volume set");
            }
            VoiceCommand::SpeechStarted { user_id } => {
                if let Some(session) = self.session.as_ref() {
                    session.speech_started(&user_id);
                }
            }
            VoiceCommand::SpeechStopped { user_id } => {
                if let Some(session) = self.session.as_ref() {
                    session.speech_stopped(&user_id);
                }
            }
            VoiceCommand::GetInputDevices => self.send_input_devices(),
            VoiceCommand::GetState => self.send_state(),
            VoiceCommand::Shutdown => {
                self.leave_room(LeaveReason::Shutdown);
                self.send_event(VoiceEvent::Shutdown);
                return false;
            }
        }

        true
    }

    #[instrument(name = "join_room", skip(self, config))]
    fn join_room(&mut self, room_id: String, config: VoiceConfig) {
        if self.state.room_id() == Some(room_id.as_str()) {
            debug!("Already in room, ignoring join");
            return;
        }
        if self.session.is_some() {
            self.leave_room(LeaveReason::SwitchingRoom);
        }

        info!("Joining voice room");

        let io = SessionIo {
            input: self.io.audio.input(),
            output: self.io.audio.output(),
            transport: Arc::clone(&self.io.transport),
            cues: Arc::clone(&self.io.cues),
            volume: self.volume.clone(),
            event_tx: self.event_tx.clone(),
        };
        let mut session = VoiceSession::new(room_id.clone(), config, io);

        let result = {
            let state = &mut self.state;
            let event_tx = &self.event_tx;
            session.initialize(|phase| {
                transition(
                    state,
                    event_tx,
                    SessionState::Joining {
                        room_id: room_id.clone(),
                        phase,
                    },
                )
            })
        };

        match result {
            Ok(()) => {
                if let Some(receiver) = session.receiver() {
                    self.io.receive.attach(receiver);
                }
                self.session = Some(session);
                self.last_metrics = Instant::now();
                self.transition_to(SessionState::InRoom {
                    room_id: room_id.clone(),
                    mic_enabled: false,
                });
                Cue::RoomJoined { room_id }.emit(self.io.cues.as_ref());
                info!("Joined voice room");
            }
            Err(e) => {
                error!("Room join failed: {}", e);
                session.rollback();
                self.transition_to(SessionState::Error {
                    message: e.to_string(),
                    recoverable: true,
                });
            }
        }
    }

    #[instrument(name = "leave_room", skip(self))]
    fn leave_room(&mut self, reason: LeaveReason) {
        let Some(mut session) = self.session.take() else {
            if self.state.is_error() {
                self.transition_to(SessionState::Idle);
            }
            return;
        };

        info!(room_id = %session.room_id(), "Leaving voice room");
        self.transition_to(SessionState::Leaving {
            room_id: session.room_id().to_string(),
            reason,
        });

        self.io.receive.detach();
        self.send_event(VoiceEvent::Metrics(session.metrics()));
        session.shutdown();
        Cue::RoomLeft.emit(self.io.cues.as_ref());

        self.transition_to(SessionState::Idle);
    }

    fn set_mic_enabled(&mut self, enabled: bool) {
        let Some(session) = self.session.as_mut() else {
            warn!("Not in a room, ignoring mic change");
            return;
        };

        let mic_enabled = session.set_mic_enabled(enabled);
        let room_id = session.room_id().to_string();

        if let SessionState::InRoom {
            mic_enabled: current,
            ..
        } = &self.state
        {
            if *current != mic_enabled {
                self.transition_to(SessionState::InRoom { room_id, mic_enabled });
            }
        }
    }

    fn send_input_devices(&self) {
        let devices = match self.session.as_ref() {
            Some(session) => session.available_devices(),
            None => self.io.audio.input().devices().unwrap_or_else(|e| {
                warn!("Error querying audio devices: {}", e);
                Vec::new()
            }),
        };
        self.send_event(VoiceEvent::InputDevices(devices));
    }

    fn send_state(&self) {
        self.send_event(VoiceEvent::StateChanged {
            previous: Box::new(self.state.clone()),
            current: Box::new(self.state.clone()),
        });
    }

    fn housekeeping(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        session.reap_finished();

        if self.last_metrics.elapsed() >= METRICS_INTERVAL {
            self.send_event(VoiceEvent::Metrics(session.metrics()));
            self.last_metrics = Instant::now();
        }
    }

    fn transition_to(&mut self, new_state: SessionState) {
        transition(&mut self.state, &self.event_tx, new_state);
    }

    fn send_event(&self, event: VoiceEvent) {
        send_event(&self.event_tx, event);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.io.receive.detach();
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
    }
}

fn transition(state: &mut SessionState, event_tx: &Sender<VoiceEvent>, new_state: SessionState) {
    let previous = std::mem::replace(state, new_state.clone());

    debug!(
        previous = %previous.name(),
        current = %new_state.name(),
        "State transition"
    );

    send_event(
        event_tx,
        VoiceEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use titan_voice_capture::InputBackend;
    use titan_voice_ipc::{AudioChunk, AudioFormat, JoinPhase, COMMAND_CHANNEL_CAPACITY};
    use titan_voice_playback::OutputBackend;

    use crate::session::tests::{fast_config, wait_for, FakeInput, FakeOutput, RecordingTransport};

    struct FakeAudio {
        input: FakeInput,
        output: FakeOutput,
    }

    impl AudioBackends for FakeAudio {
        fn input(&self) -> Box<dyn InputBackend> {
            Box::new(self.input.clone())
        }

        fn output(&self) -> Box<dyn OutputBackend> {
            Box::new(self.output.clone())
        }
    }

    struct Harness {
        engine: Engine,
        events: Receiver<VoiceEvent>,
        input: FakeInput,
        output: FakeOutput,
        transport: Arc<RecordingTransport>,
    }

    fn harness(output: FakeOutput) -> Harness {
        let (_command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, events) = crossbeam_channel::unbounded();
        let input = FakeInput::default();
        let transport = Arc::new(RecordingTransport::default());
        let io = EngineIo {
            audio: Box::new(FakeAudio {
                input: input.clone(),
                output: output.clone(),
            }),
            transport: transport.clone(),
            cues: Arc::new(SilentCues),
            receive: ReceiveHandle::new(),
        };
        Harness {
            engine: Engine::new(command_rx, event_tx, io),
            events,
            input,
            output,
            transport,
        }
    }

    fn states(events: &Receiver<VoiceEvent>) -> Vec<SessionState> {
        events
            .try_iter()
            .filter_map(|event| match event {
                VoiceEvent::StateChanged { current, .. } => Some(*current),
                _ => None,
            })
            .collect()
    }

    fn join(room: &str) -> VoiceCommand {
        VoiceCommand::JoinRoom {
            room_id: room.into(),
            config: fast_config(),
        }
    }

    #[test]
    fn test_join_walks_through_phases() {
        let mut h = harness(FakeOutput::default());
        assert!(h.engine.handle_command(join("lobby")));

        let states = states(&h.events);
        assert_eq!(
            states,
            vec![
                SessionState::Joining {
                    room_id: "lobby".into(),
                    phase: JoinPhase::InitPlayback
                },
                SessionState::Joining {
                    room_id: "lobby".into(),
                    phase: JoinPhase::InitCapture
                },
                SessionState::InRoom {
                    room_id: "lobby".into(),
                    mic_enabled: false
                },
            ]
        );
    }

    #[test]
    fn test_join_same_room_is_ignored() {
        let mut h = harness(FakeOutput::default());
        h.engine.handle_command(join("lobby"));
        let _ = states(&h.events);
        h.engine.handle_command(join("lobby"));
        assert!(states(&h.events).is_empty());
    }

    #[test]
    fn test_switching_rooms_leaves_first() {
        let mut h = harness(FakeOutput::default());
        h.engine.handle_command(join("lobby"));
        let _ = states(&h.events);

        h.engine.handle_command(join("music"));
        let states = states(&h.events);
        assert_eq!(
            states[0],
            SessionState::Leaving {
                room_id: "lobby".into(),
                reason: LeaveReason::SwitchingRoom
            }
        );
        assert_eq!(states[1], SessionState::Idle);
        assert_eq!(h.engine.state().room_id(), Some("music"));
    }

    #[test]
    fn test_join_failure_is_recoverable_error() {
        let mut h = harness(FakeOutput {
            fail: true,
            ..Default::default()
        });
        h.engine.handle_command(join("lobby"));
        assert!(h.engine.state().is_error());

        h.engine.handle_command(VoiceCommand::LeaveRoom);
        assert!(h.engine.state().is_idle());
    }

    #[test]
    fn test_mic_toggle_updates_state_and_sends() {
        let mut h = harness(FakeOutput::default());
        h.engine.handle_command(join("lobby"));
        h.engine.handle_command(VoiceCommand::SetMicEnabled(true));
        assert_eq!(
            *h.engine.state(),
            SessionState::InRoom {
                room_id: "lobby".into(),
                mic_enabled: true
            }
        );

        h.input.push(&[9; 480]);
        assert!(wait_for(|| h.transport.sent.lock().len() == 1));

        h.engine.handle_command(VoiceCommand::SetMicEnabled(false));
        assert_eq!(
            *h.engine.state(),
            SessionState::InRoom {
                room_id: "lobby".into(),
                mic_enabled: false
            }
        );
    }

    #[test]
    fn test_received_audio_is_played() {
        let mut h = harness(FakeOutput::default());
        h.engine.handle_command(VoiceCommand::SetOutputVolume(50));
        h.engine.handle_command(join("lobby"));

        let receive = h.engine.receive_handle();
        let data = AudioChunk::from_samples(&[1000; 480], AudioFormat::default(), 0).into_data();
        for _ in 0..2 {
            assert!(receive.deliver("amy", "lobby", data.clone()));
        }

        assert!(wait_for(|| h.output.channel.queued.lock().len() >= 2));
        let first = h.output.channel.queued.lock()[0].clone();
        assert!(first.iter().all(|&s| s == 500));

        h.engine.handle_command(VoiceCommand::SpeechStopped { user_id: "amy".into() });
        assert!(h
            .events
            .try_iter()
            .any(|e| matches!(e, VoiceEvent::SpeakerStopped { ref user_id } if user_id == "amy")));
    }

    #[test]
    fn test_receive_handle_follows_room() {
        let mut h = harness(FakeOutput::default());
        let receive = h.engine.receive_handle();
        let data = AudioChunk::from_samples(&[10; 480], AudioFormat::default(), 0).into_data();
        assert!(!receive.deliver("amy", "lobby", data.clone()));

        h.engine.handle_command(join("lobby"));
        assert_eq!(receive.room_id().as_deref(), Some("lobby"));
        // A burst larger than the command queue, while the engine is idle.
        for _ in 0..(COMMAND_CHANNEL_CAPACITY * 2) {
            assert!(receive.deliver("amy", "lobby", data.clone()));
        }

        h.engine.handle_command(join("music"));
        assert_eq!(receive.room_id().as_deref(), Some("music"));
        assert!(!receive.deliver("amy", "lobby", data.clone()));

        let metrics = h
            .events
            .try_iter()
            .find_map(|e| match e {
                VoiceEvent::Metrics(metrics) => Some(metrics),
                _ => None,
            })
            .unwrap();
        assert_eq!(metrics.chunks_received, (COMMAND_CHANNEL_CAPACITY * 2) as u64);
        assert_eq!(metrics.receive_drops, 0);

        h.engine.handle_command(VoiceCommand::LeaveRoom);
        assert_eq!(receive.room_id(), None);
        assert!(!receive.deliver("amy", "music", data));
    }

    #[test]
    fn test_shutdown_leaves_and_stops() {
        let mut h = harness(FakeOutput::default());
        h.engine.handle_command(join("lobby"));
        let _ = states(&h.events);

        assert!(!h.engine.handle_command(VoiceCommand::Shutdown));
        assert!(h.output.closed.load(std::sync::atomic::Ordering::SeqCst));

        let events: Vec<VoiceEvent> = h.events.try_iter().collect();
        assert!(matches!(events.last(), Some(VoiceEvent::Shutdown)));
    }

    #[test]
    fn test_run_loop_exits_on_shutdown() {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, events) = crossbeam_channel::unbounded();
        let io = EngineIo {
            audio: Box::new(FakeAudio {
                input: FakeInput::default(),
                output: FakeOutput::default(),
            }),
            transport: Arc::new(NullTransport),
            cues: Arc::new(SilentCues),
            receive: ReceiveHandle::new(),
        };

        let handle = thread::spawn(move || Engine::new(command_rx, event_tx, io).run());
        command_tx.send(VoiceCommand::GetInputDevices).unwrap();
        command_tx.send(VoiceCommand::Shutdown).unwrap();
        handle.join().unwrap();

        let events: Vec<VoiceEvent> = events.try_iter().collect();
        assert!(matches!(events.first(), Some(VoiceEvent::Ready)));
        assert!(events
            .iter()
            .any(|e| matches!(e, VoiceEvent::InputDevices(devices) if devices.len() == 1)));
        assert!(matches!(events.last(), Some(VoiceEvent::Shutdown)));
    }
}
