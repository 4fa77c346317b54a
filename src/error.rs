use thiserror::Error;

/// Errors raised by the voice subsystem.
///
/// None of these are fatal to the application: every failure leaves the
/// session in an idle, retryable state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport is not open")]
    NotConnected,

    #[error("Failed to decode reply audio: {0}")]
    PlaybackDecode(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Assistant call failed: {0}")]
    AssistantCall(String),

    #[error("No response from the voice endpoint within {0} ms")]
    ResponseTimeout(u64),

    #[error("Voice endpoint reported an error: {0}")]
    Server(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Voice session has shut down")]
    SessionClosed,
}

impl VoiceError {
    /// Stable label used in session updates and HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            VoiceError::PermissionDenied(_) => "permission_denied",
            VoiceError::DeviceUnavailable(_) => "device_unavailable",
            VoiceError::Connection(_) => "connection_error",
            VoiceError::NotConnected => "not_connected",
            VoiceError::PlaybackDecode(_) => "playback_decode_error",
            VoiceError::Playback(_) => "playback_error",
            VoiceError::AssistantCall(_) => "assistant_call_error",
            VoiceError::ResponseTimeout(_) => "response_timeout",
            VoiceError::Server(_) => "server_error",
            VoiceError::Capture(_) => "capture_error",
            VoiceError::Io(_) => "io_error",
            VoiceError::SessionClosed => "session_closed",
        }
    }
}

impl From<std::io::Error> for VoiceError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            VoiceError::PermissionDenied(e.to_string())
        } else {
            VoiceError::Io(e.to_string())
        }
    }
}

impl From<hound::Error> for VoiceError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => io.into(),
            other => VoiceError::Capture(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_permission_maps_to_permission_denied() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: VoiceError = io.into();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[test]
    fn other_io_errors_stay_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: VoiceError = io.into();
        assert!(matches!(err, VoiceError::Io(_)));
    }
}
