use crate::error::{Result, VoiceError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::decode::DecodedClip;

/// Output device for decoded reply audio
///
/// `play` resolves when the clip has finished playing.
#[async_trait::async_trait]
pub trait AudioSink: Send {
    async fn play(&mut self, clip: &DecodedClip) -> Result<()>;

    fn name(&self) -> &str;
}

/// Headless sink: holds for the clip's duration without producing sound
#[derive(Debug, Default)]
pub struct TimedSink;

#[async_trait::async_trait]
impl AudioSink for TimedSink {
    async fn play(&mut self, clip: &DecodedClip) -> Result<()> {
        tokio::time::sleep(clip.duration()).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "timed"
    }
}

/// Sink for a live session: the speaker when built with the `speaker`
/// feature and an output device opens, otherwise `TimedSink`
pub async fn live_sink() -> Box<dyn AudioSink> {
    #[cfg(feature = "speaker")]
    {
        match super::speaker::SpeakerSink::open().await {
            Ok(sink) => return Box::new(sink),
            Err(e) => warn!("No speaker output ({}); replies will not be audible", e),
        }
    }

    #[cfg(not(feature = "speaker"))]
    warn!("Built without the `speaker` feature; replies will not be audible");

    Box::new(TimedSink)
}

/// Saves each reply clip as a numbered WAV file
pub struct WavDirSink {
    output_dir: PathBuf,
    prefix: String,
    clip_index: usize,
}

impl WavDirSink {
    pub fn new(output_dir: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;

        info!("Reply clips will be written to {}", output_dir.display());

        Ok(Self {
            output_dir,
            prefix: prefix.into(),
            clip_index: 0,
        })
    }

    fn next_path(&mut self) -> PathBuf {
        let path = self
            .output_dir
            .join(format!("{}-{:03}.wav", self.prefix, self.clip_index));
        self.clip_index += 1;
        path
    }
}

#[async_trait::async_trait]
impl AudioSink for WavDirSink {
    async fn play(&mut self, clip: &DecodedClip) -> Result<()> {
        let path = self.next_path();
        let spec = hound::WavSpec {
            channels: clip.channels,
            sample_rate: clip.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let samples = clip.samples.clone();
        let duration = clip.duration();

        let path = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let mut writer = hound::WavWriter::create(&path, spec)
                .map_err(|e| VoiceError::Playback(format!("{}: {}", path.display(), e)))?;
            for sample in samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
            Ok(path)
        })
        .await
        .map_err(|e| VoiceError::Playback(format!("clip writer failed: {}", e)))??;

        info!(
            "Saved reply clip {} ({:.1}s)",
            path.display(),
            duration.as_secs_f64()
        );

        Ok(())
    }

    fn name(&self) -> &str {
        "wav-dir"
    }
}
