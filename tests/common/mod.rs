// Shared fakes for integration tests
//
// A scripted audio backend, an in-process transport the test drives by hand,
// and a sink that records what it was asked to play.

#![allow(dead_code)]

use bytes::Bytes;
use eldermama_voice::audio::{encode_wav, AudioBackend, AudioFrame, BackendProvider};
use eldermama_voice::error::{Result, VoiceError};
use eldermama_voice::playback::{AudioSink, DecodedClip};
use eldermama_voice::transport::{SessionEvent, Transport, TransportEvent, TransportState};
use std::f64::consts::PI;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const RATE: u32 = 16000;

/// Voice-like test signal with the given RMS in sample units
///
/// A 150 Hz fundamental with harmonics up to 3.9 kHz (Schroeder phases keep
/// the peaks low), so it reads as speech on both level metrics.
pub fn voiced(duration_ms: u64, rms: i16) -> Vec<i16> {
    let n = (RATE as u64 * duration_ms / 1000) as usize;
    let harmonics = 26;
    let amplitude = rms as f64 * (2.0 / harmonics as f64).sqrt();
    (0..n)
        .map(|i| {
            let t = i as f64 / RATE as f64;
            (1..=harmonics)
                .map(|h| {
                    let phase = -PI * (h * (h - 1)) as f64 / harmonics as f64;
                    amplitude * (2.0 * PI * 150.0 * h as f64 * t + phase).sin()
                })
                .sum::<f64>()
                .clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}

/// `voiced` at a level given in dBFS (RMS relative to full scale)
pub fn speech(duration_ms: u64, dbfs: f64) -> Vec<i16> {
    voiced(duration_ms, (32768.0 * 10f64.powf(dbfs / 20.0)) as i16)
}

pub fn silence(duration_ms: u64) -> Vec<i16> {
    vec![0; (RATE as u64 * duration_ms / 1000) as usize]
}

pub fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    encode_wav(samples, RATE, 1).expect("encode wav")
}

pub fn write_wav(path: &Path, samples: &[i16]) {
    std::fs::write(path, wav_bytes(samples)).expect("write wav");
}

/// Split bytes into `parts` roughly equal frames
pub fn split_frames(bytes: &[u8], parts: usize) -> Vec<Bytes> {
    let size = bytes.len().div_ceil(parts);
    bytes.chunks(size).map(Bytes::copy_from_slice).collect()
}

/// 100ms frames with sequential timestamps
pub fn frames_of(samples: &[i16]) -> Vec<AudioFrame> {
    samples
        .chunks((RATE / 10) as usize)
        .enumerate()
        .map(|(i, chunk)| AudioFrame {
            samples: chunk.to_vec(),
            sample_rate: RATE,
            channels: 1,
            timestamp_ms: i as u64 * 100,
        })
        .collect()
}

/// Backend that emits a fixed list of frames
#[derive(Clone)]
pub struct ScriptedBackend {
    frames: Vec<AudioFrame>,
    hold_open: bool,
    start_error: Option<VoiceError>,
    cancel: Option<CancellationToken>,
    stops: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if let Some(e) = &self.start_error {
            return Err(e.clone());
        }

        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let frames = self.frames.clone();
        let hold_open = self.hold_open;
        tokio::spawn(async move {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            if hold_open {
                cancel.cancelled().await;
            }
        });
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.cancel.is_some()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Hands out a fresh `ScriptedBackend` per recording
#[derive(Clone)]
pub struct ScriptedProvider {
    template: ScriptedBackend,
    created: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    /// Emits the frames, then stays open until stopped
    pub fn holding(frames: Vec<AudioFrame>) -> Self {
        Self::build(frames, true, None)
    }

    /// Emits the frames, then ends the stream
    pub fn finite(frames: Vec<AudioFrame>) -> Self {
        Self::build(frames, false, None)
    }

    pub fn failing(error: VoiceError) -> Self {
        Self::build(Vec::new(), false, Some(error))
    }

    fn build(frames: Vec<AudioFrame>, hold_open: bool, start_error: Option<VoiceError>) -> Self {
        Self {
            template: ScriptedBackend {
                frames,
                hold_open,
                start_error,
                cancel: None,
                stops: Arc::new(AtomicUsize::new(0)),
            },
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn backend(&self) -> ScriptedBackend {
        self.template.clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.template.stops.load(Ordering::SeqCst)
    }
}

impl BackendProvider for ScriptedProvider {
    fn create_backend(&self) -> Result<Box<dyn AudioBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.template.clone()))
    }
}

#[derive(Default)]
struct Wire {
    events: Option<mpsc::Sender<TransportEvent>>,
    sent: Vec<Bytes>,
    state: Option<TransportState>,
    connects: usize,
    fail_connect: Option<VoiceError>,
}

/// Transport whose far end is driven by the test through `MockRemote`
pub struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

/// The test's side of a `MockTransport`
#[derive(Clone)]
pub struct MockRemote {
    wire: Arc<Mutex<Wire>>,
}

pub fn mock_transport() -> (MockTransport, MockRemote) {
    let wire = Arc::new(Mutex::new(Wire::default()));
    (
        MockTransport {
            wire: Arc::clone(&wire),
        },
        MockRemote { wire },
    )
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>> {
        let mut wire = self.wire.lock().unwrap();
        if let Some(e) = &wire.fail_connect {
            return Err(e.clone());
        }
        let (tx, rx) = mpsc::channel(64);
        wire.events = Some(tx);
        wire.state = Some(TransportState::Open);
        wire.connects += 1;
        Ok(rx)
    }

    fn send(&self, bytes: Bytes) -> Result<()> {
        let mut wire = self.wire.lock().unwrap();
        if wire.state != Some(TransportState::Open) {
            return Err(VoiceError::NotConnected);
        }
        wire.sent.push(bytes);
        Ok(())
    }

    async fn close(&mut self) {
        let mut wire = self.wire.lock().unwrap();
        wire.events = None;
        wire.state = Some(TransportState::Closed);
    }

    fn state(&self) -> TransportState {
        self.wire
            .lock()
            .unwrap()
            .state
            .unwrap_or(TransportState::Closed)
    }
}

impl MockRemote {
    pub fn fail_connect(&self, error: VoiceError) {
        self.wire.lock().unwrap().fail_connect = Some(error);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.wire.lock().unwrap().sent.clone()
    }

    pub fn connects(&self) -> usize {
        self.wire.lock().unwrap().connects
    }

    pub async fn emit(&self, event: SessionEvent) {
        let tx = self.wire.lock().unwrap().events.clone();
        if let Some(tx) = tx {
            tx.send(TransportEvent::Event(event))
                .await
                .expect("controller dropped transport events");
        }
    }

    /// Simulate the server dropping the connection
    pub async fn close(&self, reason: &str) {
        let tx = {
            let mut wire = self.wire.lock().unwrap();
            wire.state = Some(TransportState::Closed);
            wire.events.take()
        };
        if let Some(tx) = tx {
            let _ = tx
                .send(TransportEvent::Closed {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    pub async fn wait_for_sent(&self, count: usize) -> Vec<Bytes> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("utterance was never sent")
    }
}

/// Sink that records every clip it is given
#[derive(Clone, Default)]
pub struct RecordingSink {
    played: Arc<Mutex<Vec<DecodedClip>>>,
}

impl RecordingSink {
    pub fn played(&self) -> Vec<DecodedClip> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, clip: &DecodedClip) -> Result<()> {
        self.played.lock().unwrap().push(clip.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
