// Speaker output via rodio
//
// The rodio output stream is not Send, so a dedicated thread opens it and
// keeps it alive until the sink is dropped. Each clip plays through its own
// `rodio::Sink` on the stream handle.

use crate::error::{Result, VoiceError};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::decode::DecodedClip;
use super::sink::AudioSink;

pub struct SpeakerSink {
    handle: OutputStreamHandle,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerSink {
    /// Open the default output device
    pub async fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Blocks until the sink is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    info!("Speaker released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(e.to_string())));
                }
            })?;

        match ready_rx.await {
            Ok(Ok(handle)) => {
                info!("Speaker output ready");
                Ok(Self {
                    handle,
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::Playback(
                "speaker thread exited before start".to_string(),
            )),
        }
    }
}

/// Silences a clip whose `play` future is dropped mid-playback
struct StopOnDrop(Arc<Sink>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

#[async_trait::async_trait]
impl AudioSink for SpeakerSink {
    async fn play(&mut self, clip: &DecodedClip) -> Result<()> {
        let sink = Sink::try_new(&self.handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Arc::new(sink);
        sink.append(SamplesBuffer::new(
            clip.channels.max(1),
            clip.sample_rate,
            clip.samples.clone(),
        ));
        let _guard = StopOnDrop(Arc::clone(&sink));

        let playing = Arc::clone(&sink);
        tokio::task::spawn_blocking(move || playing.sleep_until_end())
            .await
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        debug!("Played {:.1}s reply clip", clip.duration().as_secs_f64());
        Ok(())
    }

    fn name(&self) -> &str {
        "speaker"
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        // The thread exits on its own once it sees the stop signal.
        self.thread.take();
    }
}
