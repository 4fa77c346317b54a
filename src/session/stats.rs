use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::controller::VoiceState;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current controller state
    pub state: VoiceState,

    /// Whether the microphone was disabled after a permission failure
    pub mic_disabled: bool,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Session age in seconds
    pub duration_secs: f64,

    /// Utterances sent to the voice endpoint
    pub utterances_sent: usize,

    /// Turns that reached the completion marker
    pub turns_completed: usize,

    /// Messages in the conversation history
    pub messages_count: usize,
}
