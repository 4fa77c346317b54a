use crate::error::{Result, VoiceError};
use hound::WavReader;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, LinearResampler};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono copy of the samples (stereo is averaged, other layouts keep channel 0)
    pub fn to_mono(&self) -> Vec<i16> {
        match self.channels {
            0 | 1 => self.samples.clone(),
            2 => self
                .samples
                .chunks_exact(2)
                .map(|lr| ((lr[0] as i32 + lr[1] as i32) / 2) as i16)
                .collect(),
            n => self
                .samples
                .chunks_exact(n as usize)
                .map(|frame| frame[0])
                .collect(),
        }
    }
}

/// Replays a WAV file as a stream of timed frames
///
/// Frame timestamps are derived from sample positions, so silence detection
/// behaves the same whether or not playback is paced in real time.
pub struct FileBackend {
    path: String,
    config: AudioBackendConfig,
    realtime: bool,
    cancel: Option<CancellationToken>,
}

impl FileBackend {
    pub fn new(path: impl Into<String>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            realtime: false,
            cancel: None,
        }
    }

    /// Pace frames at the buffer duration instead of emitting them as fast as possible
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.cancel.is_some() {
            return Err(VoiceError::Capture(format!("{} already capturing", self.path)));
        }

        let audio = AudioFile::open(&self.path)?;
        let (channels, samples) = if self.config.target_channels == 1 {
            (1, audio.to_mono())
        } else {
            (audio.channels, audio.samples.clone())
        };
        let (sample_rate, samples) = match self.config.target_sample_rate {
            0 => (audio.sample_rate, samples),
            target if target == audio.sample_rate => (target, samples),
            target => {
                debug!("Resampling {} from {}Hz to {}Hz", self.path, audio.sample_rate, target);
                let mut resampler = LinearResampler::new(audio.sample_rate, target, channels);
                (target, resampler.process(&samples))
            }
        };
        let buffer_ms = self.config.buffer_duration_ms.max(1);
        let frame_len =
            ((sample_rate as u64 * buffer_ms / 1000) as usize * channels as usize).max(1);
        let realtime = self.realtime;

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let (tx, rx) = mpsc::channel(64);
        let path = self.path.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(buffer_ms));
            for (index, chunk) in samples.chunks(frame_len).enumerate() {
                if realtime {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                } else if cancel.is_cancelled() {
                    break;
                }

                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate,
                    channels,
                    timestamp_ms: index as u64 * buffer_ms,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            debug!("File source exhausted: {}", path);
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| !c.is_cancelled())
    }

    fn name(&self) -> &str {
        "file"
    }
}
