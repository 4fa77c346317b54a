use crate::error::{Result, VoiceError};
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// PCM ready for a sink
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClip {
    /// Interleaved i16 samples
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedClip {
    pub fn duration(&self) -> Duration {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.samples.len() as u64 * 1_000_000 / per_second)
    }
}

/// Turns one flushed reply clip into PCM
pub trait ClipDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedClip>;
}

/// Probes the container and decodes the default track (MP3, WAV, OGG, FLAC, ...)
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl ClipDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedClip> {
        let source = Cursor::new(bytes.to_vec());
        let mss = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| VoiceError::PlaybackDecode(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| VoiceError::PlaybackDecode("no audio track".to_string()))?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| VoiceError::PlaybackDecode(e.to_string()))?;

        let mut samples: Vec<i16> = Vec::new();
        let mut sample_rate = 0;
        let mut channels = 0;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(VoiceError::PlaybackDecode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;

                    let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet: {}", e);
                }
                Err(e) => return Err(VoiceError::PlaybackDecode(e.to_string())),
            }
        }

        if sample_rate == 0 {
            return Err(VoiceError::PlaybackDecode("no decodable packets".to_string()));
        }

        debug!(
            "Decoded clip: {} samples, {}Hz, {} channels",
            samples.len(),
            sample_rate,
            channels
        );

        Ok(DecodedClip {
            samples,
            sample_rate,
            channels,
        })
    }
}
