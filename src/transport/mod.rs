//! Duplex connection to the voice endpoint
//!
//! The client sends each finalized utterance as one binary frame. The
//! endpoint answers with JSON text frames (transcription, response,
//! complete, error, status) interleaved with binary reply-audio frames.

pub mod client;
pub mod messages;

pub use client::{Transport, TransportEvent, TransportState, WsTransport};
pub use messages::{parse_text_frame, ServerMessage, SessionEvent};
