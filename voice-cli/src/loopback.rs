//! Loopback transport for microphone tests.

use bytes::Bytes;
use tracing::trace;

use titan_voice_engine::{ReceiveHandle, TransportSink};

/// User id that looped-back audio plays under.
pub const LOOPBACK_USER: &str = "self";

/// Feeds every sent chunk straight back into the engine as a received one.
pub struct LoopbackTransport {
    receive: ReceiveHandle,
}

impl LoopbackTransport {
    pub fn new(receive: ReceiveHandle) -> Self {
        Self { receive }
    }
}

impl TransportSink for LoopbackTransport {
    fn send_chunk(&self, room_id: &str, data: Bytes, _self_monitor: bool) {
        if !self.receive.deliver(LOOPBACK_USER, room_id, data) {
            trace!(room_id, "Looped chunk not accepted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use titan_voice_capture::{AudioResult, FrameSink, InputBackend, InputStream};
    use titan_voice_engine::{create_engine, AudioBackends, EngineIo, SilentCues};
    use titan_voice_ipc::{AudioChunk, AudioFormat, PlaybackConfig, VoiceCommand, VoiceConfig, VoiceEvent};
    use titan_voice_playback::{ChannelPool, MixerChannel, OpenOutput, OutputBackend, OutputChannel, OutputStream, PlaybackResult};

    struct SilentMic;

    struct SilentMicStream;

    impl InputStream for SilentMicStream {
        fn close(&mut self) {}
    }

    impl InputBackend for SilentMic {
        fn open(&mut self, _format: AudioFormat, _sink: FrameSink) -> AudioResult<Box<dyn InputStream>> {
            Ok(Box::new(SilentMicStream))
        }
    }

    struct NullSpeakers;

    struct NullSpeakersStream;

    impl OutputStream for NullSpeakersStream {
        fn close(&mut self) {}
    }

    impl OutputBackend for NullSpeakers {
        fn open(&mut self, config: &PlaybackConfig) -> PlaybackResult<OpenOutput> {
            let channel: Arc<dyn OutputChannel> = Arc::new(MixerChannel::new(0));
            Ok(OpenOutput {
                pool: ChannelPool::new(vec![channel])?,
                stream: Box::new(NullSpeakersStream),
                sample_rate: config.output_sample_rate,
            })
        }
    }

    struct FakeAudio;

    impl AudioBackends for FakeAudio {
        fn input(&self) -> Box<dyn InputBackend> {
            Box::new(SilentMic)
        }

        fn output(&self) -> Box<dyn OutputBackend> {
            Box::new(NullSpeakers)
        }
    }

    #[test]
    fn test_refused_before_join() {
        let transport = LoopbackTransport::new(ReceiveHandle::new());
        // Nothing to deliver to; must not block or panic.
        transport.send_chunk("loopback", Bytes::from_static(&[1, 0, 2, 0]), true);
    }

    #[test]
    fn test_every_looped_chunk_is_received() {
        let receive = ReceiveHandle::new();
        let transport = Arc::new(LoopbackTransport::new(receive.clone()));
        let io = EngineIo {
            audio: Box::new(FakeAudio),
            transport: transport.clone(),
            cues: Arc::new(SilentCues),
            receive,
        };
        let (_command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, events) = crossbeam_channel::unbounded();
        let mut engine = create_engine(command_rx, event_tx, io);

        engine.handle_command(VoiceCommand::JoinRoom {
            room_id: "loopback".into(),
            config: VoiceConfig::default(),
        });

        let data = AudioChunk::from_samples(&[100; 480], AudioFormat::default(), 0).into_data();
        for _ in 0..1000 {
            transport.send_chunk("loopback", data.clone(), true);
        }
        engine.handle_command(VoiceCommand::LeaveRoom);

        let metrics = events
            .try_iter()
            .find_map(|e| match e {
                VoiceEvent::Metrics(metrics) => Some(metrics),
                _ => None,
            })
            .unwrap();
        assert_eq!(metrics.chunks_received, 1000);
        assert_eq!(metrics.receive_drops, 0);
        assert_eq!(metrics.active_speakers, 1);
    }
}
