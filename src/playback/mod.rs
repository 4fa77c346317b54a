//! Reply audio playback
//!
//! Frames received during a turn are buffered until the completion marker,
//! joined into one clip, decoded, and played. Clips never overlap: a clip
//! flushed while another is playing waits its turn.

pub mod decode;
pub mod queue;
pub mod sink;

#[cfg(feature = "speaker")]
pub mod speaker;

pub use decode::{ClipDecoder, DecodedClip, SymphoniaDecoder};
pub use queue::{EncodedClip, PlaybackEvent, PlaybackQueue};
pub use sink::{live_sink, AudioSink, TimedSink, WavDirSink};

#[cfg(feature = "speaker")]
pub use speaker::SpeakerSink;
