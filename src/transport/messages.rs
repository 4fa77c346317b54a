use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// JSON text frame sent by the voice endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Transcription {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
    },
    Response {
        #[serde(default)]
        text: String,
    },
    Complete {
        #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
        response_text: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Status {
        #[serde(default)]
        message: String,
    },
    FirstToken {
        #[serde(default)]
        latency_ms: Option<u64>,
    },
    FirstAudio {
        #[serde(default)]
        latency_ms: Option<u64>,
    },
    Pong,
}

/// Event delivered to the session controller, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// What the endpoint heard the user say
    Transcription { text: String },
    /// The companion's reply text
    ReplyText { text: String },
    /// One chunk of encoded reply audio
    AudioFrame(Bytes),
    /// Terminal marker for the turn
    Complete { response_text: Option<String> },
    /// Endpoint-side failure for the current turn
    ServerError { message: String },
    /// Informational progress update
    Status { message: String },
}

impl ServerMessage {
    /// Map to a session event; latency markers and pongs carry nothing for the session
    pub fn into_event(self) -> Option<SessionEvent> {
        match self {
            ServerMessage::Transcription { text, .. } => Some(SessionEvent::Transcription { text }),
            ServerMessage::Response { text } => Some(SessionEvent::ReplyText { text }),
            ServerMessage::Complete { response_text } => {
                Some(SessionEvent::Complete { response_text })
            }
            ServerMessage::Error { message } => Some(SessionEvent::ServerError { message }),
            ServerMessage::Status { message } => Some(SessionEvent::Status { message }),
            ServerMessage::FirstToken { latency_ms } => {
                debug!("First token after {:?}ms", latency_ms);
                None
            }
            ServerMessage::FirstAudio { latency_ms } => {
                debug!("First audio after {:?}ms", latency_ms);
                None
            }
            ServerMessage::Pong => None,
        }
    }
}

/// Parse a text frame; malformed or unknown frames are logged and skipped
pub fn parse_text_frame(text: &str) -> Option<SessionEvent> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message.into_event(),
        Err(e) => {
            warn!("Skipping unrecognized text frame ({}): {}", e, text);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_turn_messages() {
        assert_eq!(
            parse_text_frame(r#"{"type":"transcription","text":"hello","latency_ms":120}"#),
            Some(SessionEvent::Transcription { text: "hello".to_string() })
        );
        assert_eq!(
            parse_text_frame(r#"{"type":"response","text":"hi there"}"#),
            Some(SessionEvent::ReplyText { text: "hi there".to_string() })
        );
        assert_eq!(
            parse_text_frame(r#"{"type":"complete"}"#),
            Some(SessionEvent::Complete { response_text: None })
        );
        assert_eq!(
            parse_text_frame(r#"{"type":"complete","response_text":"done"}"#),
            Some(SessionEvent::Complete { response_text: Some("done".to_string()) })
        );
    }

    #[test]
    fn latency_markers_are_dropped() {
        assert_eq!(parse_text_frame(r#"{"type":"first_audio","latency_ms":300}"#), None);
        assert_eq!(parse_text_frame(r#"{"type":"pong"}"#), None);
    }

    #[test]
    fn unknown_and_malformed_frames_are_skipped() {
        assert_eq!(parse_text_frame(r#"{"type":"mystery"}"#), None);
        assert_eq!(parse_text_frame("not json"), None);
    }

    #[test]
    fn error_frames_become_server_errors() {
        assert_eq!(
            parse_text_frame(r#"{"type":"error","message":"Could not transcribe audio"}"#),
            Some(SessionEvent::ServerError {
                message: "Could not transcribe audio".to_string()
            })
        );
    }
}
