use crate::error::{Result, VoiceError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::Cursor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioFrame};
use super::silence::{SilenceConfig, SilenceDetected, SilenceDetector};

/// Why an utterance was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceEnd {
    /// Quiet period elapsed after speech
    Silence,
    /// Stopped by the user
    Manual,
    /// The audio source ran out of frames
    SourceEnded,
}

/// One captured speech turn, WAV-encoded
#[derive(Debug, Clone)]
pub struct Utterance {
    pub bytes: Bytes,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_count: usize,
    pub end_reason: UtteranceEnd,
}

impl Utterance {
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.sample_count as u64 * 1000 / per_second
    }
}

/// Signals raised by a running capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    SilenceDetected(SilenceDetected),
    SourceEnded,
}

/// Encode interleaved PCM as an in-memory 16-bit WAV file
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Accumulates frames for the utterance in flight
struct UtteranceBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
    frames: usize,
}

impl UtteranceBuffer {
    fn new() -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: 16000,
            channels: 1,
            frames: 0,
        }
    }

    fn push(&mut self, frame: &AudioFrame) {
        if self.frames == 0 {
            self.sample_rate = frame.sample_rate;
            self.channels = frame.channels;
        } else if frame.sample_rate != self.sample_rate || frame.channels != self.channels {
            warn!(
                "Frame format changed mid-utterance ({}Hz/{}ch -> {}Hz/{}ch), keeping first",
                self.sample_rate, self.channels, frame.sample_rate, frame.channels
            );
        }
        self.samples.extend_from_slice(&frame.samples);
        self.frames += 1;
    }
}

struct CaptureOutcome {
    buffer: UtteranceBuffer,
    end_reason: UtteranceEnd,
    ended_at: DateTime<Utc>,
}

/// Starts captures; one capture equals one utterance
pub struct AudioCapture;

impl AudioCapture {
    /// Start the backend and begin buffering frames
    ///
    /// The backend is stopped again on every exit path, including a failed start.
    pub async fn start(
        mut backend: Box<dyn AudioBackend>,
        silence: SilenceConfig,
    ) -> Result<CaptureHandle> {
        info!("Starting capture on {} backend", backend.name());

        let mut frames = match backend.start().await {
            Ok(rx) => rx,
            Err(e) => {
                if let Err(stop_err) = backend.stop().await {
                    warn!("Failed to release backend after start error: {}", stop_err);
                }
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(4);
        let started_at = Utc::now();

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut detector = SilenceDetector::new(silence);
            let mut buffer = UtteranceBuffer::new();

            let end_reason = loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break UtteranceEnd::Manual,
                    frame = frames.recv() => match frame {
                        Some(frame) => {
                            buffer.push(&frame);
                            if let Some(detected) =
                                detector.observe_samples(&frame.samples, frame.timestamp_ms)
                            {
                                debug!(
                                    "Silence detected at {}ms (last speech {}ms)",
                                    detected.fired_at_ms, detected.last_speech_ms
                                );
                                let _ = event_tx.send(CaptureEvent::SilenceDetected(detected)).await;
                                break UtteranceEnd::Silence;
                            }
                        }
                        None => {
                            let _ = event_tx.send(CaptureEvent::SourceEnded).await;
                            break UtteranceEnd::SourceEnded;
                        }
                    }
                }
            };

            if let Err(e) = backend.stop().await {
                warn!("Failed to stop {} backend: {}", backend.name(), e);
            }

            CaptureOutcome {
                buffer,
                end_reason,
                ended_at: Utc::now(),
            }
        });

        Ok(CaptureHandle {
            cancel,
            task: Some(task),
            events: event_rx,
            started_at,
        })
    }
}

/// Owns the running capture; dropping it cancels capture and releases the device
pub struct CaptureHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<CaptureOutcome>>,
    events: mpsc::Receiver<CaptureEvent>,
    started_at: DateTime<Utc>,
}

impl CaptureHandle {
    /// Next capture signal; `None` once the capture has ended
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        self.events.recv().await
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Stop capturing and return the finalized utterance
    pub async fn stop(mut self) -> Result<Utterance> {
        self.cancel.cancel();

        let task = self
            .task
            .take()
            .ok_or_else(|| VoiceError::Capture("capture already stopped".to_string()))?;
        let outcome = task
            .await
            .map_err(|e| VoiceError::Capture(format!("capture task failed: {}", e)))?;

        let buffer = outcome.buffer;
        let bytes = encode_wav(&buffer.samples, buffer.sample_rate, buffer.channels)?;

        let utterance = Utterance {
            bytes: Bytes::from(bytes),
            started_at: self.started_at,
            ended_at: outcome.ended_at,
            sample_rate: buffer.sample_rate,
            channels: buffer.channels,
            sample_count: buffer.samples.len(),
            end_reason: outcome.end_reason,
        };

        info!(
            "Utterance finalized: {:.1}s, {} bytes ({:?})",
            utterance.duration_ms() as f64 / 1000.0,
            utterance.bytes.len(),
            utterance.end_reason
        );

        Ok(utterance)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
