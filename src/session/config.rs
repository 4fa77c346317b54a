use crate::audio::SilenceConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (used in logs)
    pub session_id: String,

    /// Voice endpoint WebSocket URL
    pub endpoint_url: String,

    /// Upper bound on the connect handshake
    pub connect_timeout: Duration,

    /// How long to wait for the completion marker after sending an utterance
    pub response_timeout: Duration,

    /// Start listening again after each reply finishes playing
    pub continuous: bool,

    /// Grace period before listening resumes in continuous mode
    pub resume_delay: Duration,

    /// End-of-utterance detection
    pub silence: SilenceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            endpoint_url: "ws://localhost:8000/ws/voice-chat-with-audio".to_string(),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
            continuous: false,
            resume_delay: Duration::from_millis(500),
            silence: SilenceConfig::default(),
        }
    }
}
