use crate::error::VoiceError;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decode::ClipDecoder;
use super::sink::AudioSink;

/// One flushed reply, still encoded
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedClip {
    pub id: u64,
    pub bytes: Bytes,
}

/// Progress reported by the player task
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started { clip_id: u64, duration_ms: u64 },
    Ended { clip_id: u64 },
    DecodeFailed { clip_id: u64, error: VoiceError },
    SinkFailed { clip_id: u64, error: VoiceError },
}

impl PlaybackEvent {
    pub fn clip_id(&self) -> u64 {
        match self {
            PlaybackEvent::Started { clip_id, .. }
            | PlaybackEvent::Ended { clip_id }
            | PlaybackEvent::DecodeFailed { clip_id, .. }
            | PlaybackEvent::SinkFailed { clip_id, .. } => *clip_id,
        }
    }

    /// True once the clip will produce no further events
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PlaybackEvent::Started { .. })
    }
}

/// Buffers reply frames per turn and plays flushed clips one at a time
pub struct PlaybackQueue {
    buffer: Vec<Bytes>,
    clips: mpsc::UnboundedSender<EncodedClip>,
    pending: Arc<AtomicUsize>,
    next_id: u64,
    cancel: CancellationToken,
    player: Option<JoinHandle<()>>,
}

impl PlaybackQueue {
    /// Start the player task that owns the sink
    pub fn spawn(
        sink: Box<dyn AudioSink>,
        decoder: Arc<dyn ClipDecoder>,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (clip_tx, clip_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        info!("Playback queue started ({} sink)", sink.name());

        let player = tokio::spawn(run_player(
            sink,
            decoder,
            clip_rx,
            event_tx,
            Arc::clone(&pending),
            cancel.clone(),
        ));

        (
            Self {
                buffer: Vec::new(),
                clips: clip_tx,
                pending,
                next_id: 0,
                cancel,
                player: Some(player),
            },
            event_rx,
        )
    }

    /// Append one audio frame to the current turn's buffer
    pub fn enqueue(&mut self, bytes: Bytes) {
        self.buffer.push(bytes);
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    /// Concatenate the buffer into one clip and schedule it
    ///
    /// The buffer is cleared whether or not the clip later decodes. Returns
    /// `None` when nothing was buffered.
    pub fn flush(&mut self) -> Option<EncodedClip> {
        if self.buffer.is_empty() {
            return None;
        }

        let total: usize = self.buffer.iter().map(|b| b.len()).sum();
        let mut joined = BytesMut::with_capacity(total);
        for frame in self.buffer.drain(..) {
            joined.extend_from_slice(&frame);
        }

        let clip = EncodedClip {
            id: self.next_id,
            bytes: joined.freeze(),
        };
        self.next_id += 1;

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.clips.send(clip.clone()).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Player stopped; dropping clip {}", clip.id);
            return None;
        }

        debug!("Scheduled clip {} ({} bytes)", clip.id, total);
        Some(clip)
    }

    /// Drop buffered frames of an abandoned turn; returns how many were dropped
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            debug!("Discarding {} buffered reply frames", dropped);
        }
        self.buffer.clear();
        dropped
    }

    /// Clips scheduled but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Stop the player, abandoning anything queued or playing
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(player) = self.player.take() {
            if let Err(e) = player.await {
                warn!("Player task failed: {}", e);
            }
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_player(
    mut sink: Box<dyn AudioSink>,
    decoder: Arc<dyn ClipDecoder>,
    mut clips: mpsc::UnboundedReceiver<EncodedClip>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let clip = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            clip = clips.recv() => match clip {
                Some(clip) => clip,
                None => break,
            },
        };

        let clip_decoder = Arc::clone(&decoder);
        let bytes = clip.bytes.clone();
        let decoded = tokio::task::spawn_blocking(move || clip_decoder.decode(&bytes))
            .await
            .unwrap_or_else(|e| Err(VoiceError::PlaybackDecode(format!("decoder panicked: {}", e))));

        let event = match decoded {
            Ok(audio) => {
                let _ = events.send(PlaybackEvent::Started {
                    clip_id: clip.id,
                    duration_ms: audio.duration().as_millis() as u64,
                });

                let played = tokio::select! {
                    _ = cancel.cancelled() => None,
                    played = sink.play(&audio) => Some(played),
                };
                match played {
                    Some(Ok(())) => PlaybackEvent::Ended { clip_id: clip.id },
                    Some(Err(error)) => {
                        warn!("Sink failed on clip {}: {}", clip.id, error);
                        PlaybackEvent::SinkFailed { clip_id: clip.id, error }
                    }
                    None => {
                        pending.fetch_sub(1, Ordering::SeqCst);
                        break;
                    }
                }
            }
            Err(error) => {
                warn!("Skipping clip {}: {}", clip.id, error);
                PlaybackEvent::DecodeFailed { clip_id: clip.id, error }
            }
        };

        pending.fetch_sub(1, Ordering::SeqCst);
        let _ = events.send(event);
    }

    debug!("Player stopped");
}
