pub mod assistant;
pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod playback;
pub mod session;
pub mod store;
pub mod transport;

pub use assistant::{chat, Assistant, AssistantContext, ChatReply, TemplateAssistant, FALLBACK_REPLY};
pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioCapture, AudioFile, AudioFrame,
    AudioSource, BackendProvider, CaptureEvent, CaptureHandle, FileBackend, LevelMetric,
    LinearResampler, SilenceConfig, SilenceDetector, Utterance, UtteranceEnd,
};
pub use config::Config;
pub use error::{Result, VoiceError};
pub use http::{create_router, AppState};
pub use playback::{
    live_sink, AudioSink, ClipDecoder, DecodedClip, EncodedClip, PlaybackEvent, PlaybackQueue,
    SymphoniaDecoder, TimedSink, WavDirSink,
};
pub use session::{
    CommandOutcome, CompanionTag, ConversationMessage, SessionConfig, SessionStats, SessionUpdate,
    Speaker, TagSource, VoiceSession, VoiceState,
};
pub use store::{AppStore, JsonStorage, MemoryEntry, MemoryKind, UserProfile};
pub use transport::{SessionEvent, Transport, TransportEvent, TransportState, WsTransport};
