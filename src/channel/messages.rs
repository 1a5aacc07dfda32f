//! Transcription channel wire messages
//!
//! Defines the message format for the push-to-talk WebSocket protocol:
//! control and audio frames out, transcription and status events in.

use serde::{Deserialize, Serialize};

/// Messages sent to the transcription service
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begin a recording cycle
    StartRecording,
    /// One 100 ms chunk of base64-encoded PCM16 audio
    AudioChunk { data: String },
    /// Finalize the stream and request a transcription
    EndRecording,
    /// Discard the stream without transcribing
    CancelRecording,
    /// Periodic keep-alive
    KeepAlive,
}

/// Messages received from the transcription service
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Service acknowledged the recording start
    RecordingStarted,
    /// A finished transcription for the cycle
    Transcription {
        text: String,
        confidence: Option<f32>,
        duration_ms: Option<u64>,
    },
    /// The cycle contained no recognizable speech (soft)
    NoSpeech { message: Option<String> },
    /// The cycle was too short to transcribe (soft, silent)
    RecordingTooShort,
    /// Hard service error for the cycle
    Error {
        error_code: Option<String>,
        message: Option<String>,
    },
    /// Keep-alive acknowledgment
    KeepAliveAck,
    /// Catch-all for message types added by the service later
    #[serde(other)]
    Other,
}

impl ServerMessage {
    /// Whether this message terminates a recording cycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::Transcription { .. }
                | ServerMessage::NoSpeech { .. }
                | ServerMessage::RecordingTooShort
                | ServerMessage::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_recording_serialization() {
        let json = serde_json::to_string(&ClientMessage::StartRecording).unwrap();
        assert_eq!(json, r#"{"type":"start_recording"}"#);
    }

    #[test]
    fn test_audio_chunk_serialization() {
        let msg = ClientMessage::AudioChunk {
            data: "base64data".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("audio_chunk"));
        assert!(json.contains("base64data"));
    }

    #[test]
    fn test_transcription_deserialization() {
        let json = r#"{"type": "transcription", "text": "why was downtime high", "confidence": 0.92, "duration_ms": 1850}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::Transcription {
                text,
                confidence,
                duration_ms,
            } => {
                assert_eq!(text, "why was downtime high");
                assert_eq!(confidence, Some(0.92));
                assert_eq!(duration_ms, Some(1850));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_unknown_type_deserializes_to_other() {
        let json = r#"{"type": "diagnostics_report", "detail": "x"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Other));
        assert!(!msg.is_terminal());
    }

    #[test]
    fn test_terminal_messages() {
        assert!(ServerMessage::RecordingTooShort.is_terminal());
        assert!(ServerMessage::NoSpeech { message: None }.is_terminal());
        assert!(ServerMessage::Error {
            error_code: None,
            message: None
        }
        .is_terminal());
        assert!(!ServerMessage::RecordingStarted.is_terminal());
        assert!(!ServerMessage::KeepAliveAck.is_terminal());
    }
}
