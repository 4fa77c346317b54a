// Microphone capture via cpal
//
// cpal streams are not Send, so each capture owns a dedicated thread that
// builds the input stream, keeps it alive until stopped, and drops it to
// release the device.

use crate::error::{Result, VoiceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, LinearResampler};

pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }
}

/// Accumulates device samples into fixed-duration frames
struct FrameAssembler {
    tx: mpsc::Sender<AudioFrame>,
    resampler: LinearResampler,
    pending: Vec<i16>,
    frame_len: usize,
    sample_rate: u32,
    channels: u16,
    emitted_samples: u64,
}

impl FrameAssembler {
    fn push(&mut self, samples: &[i16]) {
        if self.resampler.is_passthrough() {
            self.pending.extend_from_slice(samples);
        } else {
            let resampled = self.resampler.process(samples);
            self.pending.extend(resampled);
        }
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            let samples = std::mem::replace(&mut self.pending, rest);
            let per_second = self.sample_rate as u64 * self.channels as u64;
            let frame = AudioFrame {
                timestamp_ms: self.emitted_samples * 1000 / per_second.max(1),
                samples,
                sample_rate: self.sample_rate,
                channels: self.channels,
            };
            self.emitted_samples += self.frame_len as u64;
            // Never block the audio callback; a full channel drops the frame.
            if self.tx.try_send(frame).is_err() {
                warn!("Microphone frame dropped (consumer is behind)");
            }
        }
    }
}

fn downmix(data: &[i16], channels: u16, mono: bool) -> Vec<i16> {
    if !mono || channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels as usize)
        .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
        .collect()
}

fn map_build_error(e: cpal::BuildStreamError) -> VoiceError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            VoiceError::DeviceUnavailable("input device not available".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => classify_backend_error(err.description),
        other => VoiceError::DeviceUnavailable(other.to_string()),
    }
}

fn map_play_error(e: cpal::PlayStreamError) -> VoiceError {
    match e {
        cpal::PlayStreamError::DeviceNotAvailable => {
            VoiceError::DeviceUnavailable("input device not available".to_string())
        }
        cpal::PlayStreamError::BackendSpecific { err } => classify_backend_error(err.description),
    }
}

/// Only an explicit access refusal from the host counts as a permission denial
fn classify_backend_error(description: String) -> VoiceError {
    let lower = description.to_lowercase();
    let refused = ["permission", "denied", "not authorized", "unauthorized", "not permitted"]
        .iter()
        .any(|marker| lower.contains(marker));
    if refused {
        VoiceError::PermissionDenied(description)
    } else {
        VoiceError::DeviceUnavailable(description)
    }
}

fn open_stream(
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("no input device".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    let device_channels = stream_config.channels;
    let mono = config.target_channels == 1;
    let channels = if mono { 1 } else { device_channels };
    let device_rate = stream_config.sample_rate.0;
    let sample_rate = match config.target_sample_rate {
        0 => device_rate,
        target => target,
    };

    info!(
        "Using input device {} ({}Hz, {} channels, {:?}), delivering {}Hz",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        device_rate,
        device_channels,
        sample_format,
        sample_rate
    );

    let mut assembler = FrameAssembler {
        tx: frame_tx,
        resampler: LinearResampler::new(device_rate, sample_rate, channels),
        pending: Vec::new(),
        frame_len: ((sample_rate as u64 * config.buffer_duration_ms / 1000) as usize
            * channels as usize)
            .max(1),
        sample_rate,
        channels,
        emitted_samples: 0,
    };

    let err_fn = |e: cpal::StreamError| error!("Microphone stream error: {}", e);

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    assembler.push(&downmix(data, device_channels, mono));
                },
                err_fn,
                None,
            )
            .map_err(map_build_error)?,
        cpal::SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let pcm: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    assembler.push(&downmix(&pcm, device_channels, mono));
                },
                err_fn,
                None,
            )
            .map_err(map_build_error)?,
        other => {
            return Err(VoiceError::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };

    stream.play().map_err(map_play_error)?;

    Ok(stream)
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.stop_tx.is_some() {
            return Err(VoiceError::Capture("microphone already capturing".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || match open_stream(&config, frame_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until stop() or the backend is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    info!("Microphone released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::Capture(
                "microphone thread exited before start".to_string(),
            )),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || {
                if thread.join().is_err() {
                    error!("Microphone thread panicked");
                }
            })
            .await
            .map_err(|e| VoiceError::Capture(e.to_string()))?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(description: &str) -> cpal::BackendSpecificError {
        cpal::BackendSpecificError {
            description: description.to_string(),
        }
    }

    #[test]
    fn unsupported_config_is_not_a_permission_denial() {
        let err = map_build_error(cpal::BuildStreamError::StreamConfigNotSupported);
        assert_eq!(err.kind(), "device_unavailable");

        let err = map_build_error(cpal::BuildStreamError::InvalidArgument);
        assert_eq!(err.kind(), "device_unavailable");

        let err = map_build_error(cpal::BuildStreamError::BackendSpecific {
            err: backend("ALSA function 'snd_pcm_hw_params' failed with error 'EINVAL'"),
        });
        assert_eq!(err.kind(), "device_unavailable");
    }

    #[test]
    fn access_refusal_maps_to_permission_denied() {
        let err = map_build_error(cpal::BuildStreamError::BackendSpecific {
            err: backend("Permission denied (os error 13)"),
        });
        assert_eq!(err.kind(), "permission_denied");

        let err = map_play_error(cpal::PlayStreamError::BackendSpecific {
            err: backend("microphone access not authorized"),
        });
        assert_eq!(err.kind(), "permission_denied");

        let err = map_play_error(cpal::PlayStreamError::DeviceNotAvailable);
        assert_eq!(err.kind(), "device_unavailable");
    }
}
