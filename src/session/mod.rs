//! Voice session management
//!
//! This module provides the `VoiceSession` controller that drives one
//! conversational turn at a time:
//! - Microphone capture with silence-based end of utterance
//! - Sending the utterance over the voice transport
//! - Collecting transcription, reply text and reply audio
//! - Playing the reply and returning to idle (or listening again)

mod config;
mod controller;
mod conversation;
mod stats;

pub use config::SessionConfig;
pub use controller::{CommandOutcome, SessionUpdate, VoiceSession, VoiceState};
pub use conversation::{detect_tags, CompanionTag, ConversationMessage, Speaker, TagSource};
pub use stats::SessionStats;
