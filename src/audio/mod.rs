pub mod backend;
pub mod capture;
pub mod file;
pub mod silence;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, BackendProvider,
    LinearResampler,
};
pub use capture::{encode_wav, AudioCapture, CaptureEvent, CaptureHandle, Utterance, UtteranceEnd};
pub use file::{AudioFile, FileBackend};
pub use silence::{LevelMetric, SilenceConfig, SilenceDetected, SilenceDetector};
