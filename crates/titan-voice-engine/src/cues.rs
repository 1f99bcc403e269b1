//! Audible feedback for voice events.

use tracing::trace;

/// Sound effects and spoken announcements.
///
/// Implemented by the host's sound and speech layers. Calls must return
/// quickly; they are made from engine and capture threads.
pub trait CueSink: Send + Sync {
    /// Play a named sound effect.
    fn play_sound(&self, name: &str);

    /// Speak `text`. `position` pans from -1.0 (left) to 1.0 (right);
    /// `pitch_offset` shifts the voice in semitones.
    fn speak(&self, _text: &str, _position: f32, _pitch_offset: i32) {}
}

/// Discards every cue.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCues;

impl CueSink for SilentCues {
    fn play_sound(&self, _name: &str) {}
}

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cue {
    RoomJoined { room_id: String },
    RoomLeft,
    MicOn,
    MicOff,
    SpeakerStarted { user_id: String },
    SpeakerStopped { user_id: String },
    CaptureError { message: String },
}

impl Cue {
    /// Sound effect identifier, if the cue has one.
    pub fn sound(&self) -> Option<&'static str> {
        match self {
            Self::RoomJoined { .. } => Some("titannet/titannet_success.ogg"),
            Self::RoomLeft => Some("titannet/bye.ogg"),
            Self::MicOn => Some("titannet/ring_out.ogg"),
            Self::MicOff => Some("titannet/callsuccess.ogg"),
            Self::SpeakerStarted { .. } | Self::SpeakerStopped { .. } => None,
            Self::CaptureError { .. } => Some("titannet/file_error.ogg"),
        }
    }

    /// Spoken text with its stereo position and pitch offset.
    pub fn announcement(&self) -> Option<(String, f32, i32)> {
        match self {
            Self::RoomJoined { room_id } => Some((format!("Joined voice room {}", room_id), 0.0, 0)),
            Self::SpeakerStarted { user_id } => Some((format!("{} is speaking", user_id), 0.0, -2)),
            Self::CaptureError { message } => Some((format!("Microphone error: {}", message), 0.0, 0)),
            Self::RoomLeft | Self::MicOn | Self::MicOff | Self::SpeakerStopped { .. } => None,
        }
    }

    /// Deliver the cue to `sink`.
    pub fn emit(&self, sink: &dyn CueSink) {
        trace!(cue = ?self, "Cue");
        if let Some(sound) = self.sound() {
            sink.play_sound(sound);
        }
        if let Some((text, position, pitch)) = self.announcement() {
            sink.speak(&text, position, pitch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sounds: Mutex<Vec<String>>,
        speech: Mutex<Vec<(String, f32, i32)>>,
    }

    impl CueSink for Recorder {
        fn play_sound(&self, name: &str) {
            self.sounds.lock().push(name.to_string());
        }

        fn speak(&self, text: &str, position: f32, pitch_offset: i32) {
            self.speech.lock().push((text.to_string(), position, pitch_offset));
        }
    }

    #[test]
    fn test_capture_error_plays_and_speaks() {
        let sink = Recorder::default();
        Cue::CaptureError {
            message: "no microphone".into(),
        }
        .emit(&sink);

        assert_eq!(*sink.sounds.lock(), vec!["titannet/file_error.ogg".to_string()]);
        let speech = sink.speech.lock();
        assert_eq!(speech.len(), 1);
        assert!(speech[0].0.contains("no microphone"));
    }

    #[test]
    fn test_speaker_stop_is_silent() {
        let sink = Recorder::default();
        Cue::SpeakerStopped { user_id: "amy".into() }.emit(&sink);
        assert!(sink.sounds.lock().is_empty());
        assert!(sink.speech.lock().is_empty());
    }

    #[test]
    fn test_speaker_start_announces_user() {
        let cue = Cue::SpeakerStarted { user_id: "amy".into() };
        let (text, _, pitch) = cue.announcement().unwrap();
        assert_eq!(text, "amy is speaking");
        assert_eq!(pitch, -2);
        assert_eq!(cue.sound(), None);
    }
}
