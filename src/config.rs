use crate::audio::{AudioBackendConfig, AudioSource, SilenceConfig};
use crate::session::SessionConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub voice: VoiceConfig,
    pub silence: SilenceConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "eldermama-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub endpoint_url: String,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub continuous: bool,
    pub resume_delay_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            endpoint_url: session.endpoint_url,
            connect_timeout_ms: session.connect_timeout.as_millis() as u64,
            response_timeout_ms: session.response_timeout.as_millis() as u64,
            continuous: session.continuous,
            resume_delay_ms: session.resume_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_duration_ms: u64,
    /// "microphone" or a path to a WAV file
    pub source: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let backend = AudioBackendConfig::default();
        Self {
            sample_rate: backend.target_sample_rate,
            channels: backend.target_channels,
            buffer_duration_ms: backend.buffer_duration_ms,
            source: "microphone".to_string(),
        }
    }
}

impl AudioConfig {
    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.sample_rate,
            target_channels: self.channels,
            buffer_duration_ms: self.buffer_duration_ms,
        }
    }

    pub fn source(&self) -> AudioSource {
        if self.source.eq_ignore_ascii_case("microphone") {
            AudioSource::Microphone
        } else {
            AudioSource::File(self.source.clone())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Load `<path>.toml` (optional) with `ELDERMAMA__SECTION__KEY` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ELDERMAMA").separator("__"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Session settings derived from the `voice` and `silence` sections
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint_url: self.voice.endpoint_url.clone(),
            connect_timeout: Duration::from_millis(self.voice.connect_timeout_ms),
            response_timeout: Duration::from_millis(self.voice.response_timeout_ms),
            continuous: self.voice.continuous,
            resume_delay: Duration::from_millis(self.voice.resume_delay_ms),
            silence: self.silence.clone(),
            ..SessionConfig::default()
        }
    }
}
