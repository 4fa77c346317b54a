use crate::error::{Result, VoiceError};
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate; sources at another rate are resampled
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (also the silence polling cadence)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz speech
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
        }
    }
}

/// Streaming linear-interpolation resampler for interleaved PCM
///
/// Keeps the last input frame and the fractional read position between
/// calls, so a stream fed in arbitrary chunks resamples the same as one
/// fed all at once.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Read position relative to the start of the next chunk, in input frames
    position: f64,
    last: Option<Vec<i16>>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        Self {
            from_rate: from_rate.max(1),
            to_rate: to_rate.max(1),
            channels: channels.max(1) as usize,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() {
            return input.to_vec();
        }

        let channels = self.channels;
        let frames = input.len() / channels;
        if frames == 0 {
            return Vec::new();
        }

        let step = self.from_rate as f64 / self.to_rate as f64;
        let expected = ((frames as f64 - self.position) / step).ceil().max(0.0) as usize;
        let mut out = Vec::with_capacity(expected * channels);

        // Index -1 is the last frame of the previous chunk
        let sample_at = |frame: isize, channel: usize| -> f64 {
            if frame < 0 {
                self.last
                    .as_ref()
                    .map_or(input[channel], |last| last[channel]) as f64
            } else {
                input[frame as usize * channels + channel] as f64
            }
        };

        while self.position <= (frames - 1) as f64 {
            let index = self.position.floor();
            let frac = self.position - index;
            let index = index as isize;
            for channel in 0..channels {
                let a = sample_at(index, channel);
                let value = if frac > 0.0 {
                    a + (sample_at(index + 1, channel) - a) * frac
                } else {
                    a
                };
                out.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            }
            self.position += step;
        }

        self.position -= frames as f64;
        self.last = Some(input[(frames - 1) * channels..frames * channels].to_vec());
        out
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device (`microphone` feature)
/// - File: replay a WAV file as timed frames (CLI turns and tests)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. The channel
    /// closes when a finite source is exhausted.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Creates a fresh backend for every recording turn
pub trait BackendProvider: Send + Sync {
    fn create_backend(&self) -> Result<Box<dyn AudioBackend>>;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input
    Microphone,
    /// File input (a pre-recorded utterance)
    File(String),
}

/// Audio backend factory
#[derive(Debug, Clone)]
pub struct AudioBackendFactory {
    source: AudioSource,
    config: AudioBackendConfig,
}

impl AudioBackendFactory {
    pub fn new(source: AudioSource, config: AudioBackendConfig) -> Self {
        Self { source, config }
    }

    /// Create audio backend based on source and configuration
    pub fn create(
        source: AudioSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    use super::microphone::MicrophoneBackend;
                    Ok(Box::new(MicrophoneBackend::new(config)))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    let _ = config;
                    Err(VoiceError::DeviceUnavailable(
                        "built without the `microphone` feature".to_string(),
                    ))
                }
            }

            AudioSource::File(path) => {
                use super::file::FileBackend;
                Ok(Box::new(FileBackend::new(path, config)))
            }
        }
    }
}

impl BackendProvider for AudioBackendFactory {
    fn create_backend(&self) -> Result<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(self.source.clone(), self.config.clone())
    }
}
