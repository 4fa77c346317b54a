// End-of-utterance detection by amplitude thresholding
//
// The detector stays quiet until speech has been heard. Once the level
// crosses the threshold a countdown starts; every later crossing restarts
// it. When the countdown runs out the detector fires once and disarms
// until `reset()`.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::OnceLock;
use std::time::Duration;

/// How a frame's loudness is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelMetric {
    /// Mean of the byte-scaled magnitude spectrum (0-255), as a Web Audio
    /// analyser reports it: 256-point Blackman window, -100 dB maps to 0
    /// and -30 dB to 255. A frame longer than one window reports its
    /// loudest window.
    Spectrum,
    /// Root mean square of the time-domain signal on a 0.0-1.0 scale
    Rms,
}

impl LevelMetric {
    pub fn measure(&self, samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        match self {
            LevelMetric::Spectrum => spectrum_level(samples),
            LevelMetric::Rms => {
                let sum: f64 = samples
                    .iter()
                    .map(|&s| {
                        let v = s as f64 / 32768.0;
                        v * v
                    })
                    .sum();
                (sum / samples.len() as f64).sqrt() as f32
            }
        }
    }
}

const FFT_SIZE: usize = 256;
const MIN_DECIBELS: f64 = -100.0;
const MAX_DECIBELS: f64 = -30.0;

struct SpectrumTables {
    window: Vec<f64>,
    cos: Vec<f64>,
    sin: Vec<f64>,
}

fn spectrum_tables() -> &'static SpectrumTables {
    static TABLES: OnceLock<SpectrumTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let n = FFT_SIZE as f64;
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();
        let cos = (0..FFT_SIZE).map(|i| (2.0 * PI * i as f64 / n).cos()).collect();
        let sin = (0..FFT_SIZE).map(|i| (2.0 * PI * i as f64 / n).sin()).collect();
        SpectrumTables { window, cos, sin }
    })
}

fn spectrum_level(samples: &[i16]) -> f32 {
    if samples.len() <= FFT_SIZE {
        return window_level(samples) as f32;
    }
    samples
        .chunks_exact(FFT_SIZE)
        .map(window_level)
        .fold(0.0, f64::max) as f32
}

/// Byte-scaled spectrum average of one window; short input is zero padded
fn window_level(chunk: &[i16]) -> f64 {
    let tables = spectrum_tables();
    let mut windowed = [0.0f64; FFT_SIZE];
    for (i, &sample) in chunk.iter().take(FFT_SIZE).enumerate() {
        windowed[i] = sample as f64 / 32768.0 * tables.window[i];
    }

    let bins = FFT_SIZE / 2;
    let scale = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
    let mut total = 0.0;
    for k in 0..bins {
        let mut re = 0.0;
        let mut im = 0.0;
        for (i, &x) in windowed.iter().enumerate() {
            let phase = (k * i) % FFT_SIZE;
            re += x * tables.cos[phase];
            im -= x * tables.sin[phase];
        }
        let magnitude = (re * re + im * im).sqrt() / FFT_SIZE as f64;
        if magnitude > 0.0 {
            let db = 20.0 * magnitude.log10();
            total += ((db - MIN_DECIBELS) * scale).clamp(0.0, 255.0).floor();
        }
    }
    total / bins as f64
}

/// Silence detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    pub metric: LevelMetric,
    /// Level that counts as speech (in the metric's units)
    pub threshold: f32,
    /// Quiet time after the last speech crossing that ends the utterance
    pub quiet_duration_ms: u64,
}

impl SilenceConfig {
    /// Companion screen tuning: spectrum average above 10, patient 3 s wait
    pub fn companion() -> Self {
        Self {
            metric: LevelMetric::Spectrum,
            threshold: 10.0,
            quiet_duration_ms: 3000,
        }
    }

    /// Voice chat tuning: RMS above 0.01 (-40 dBFS), 1.5 s wait
    pub fn voice_chat() -> Self {
        Self {
            metric: LevelMetric::Rms,
            threshold: 0.01,
            quiet_duration_ms: 1500,
        }
    }

    pub fn quiet_duration(&self) -> Duration {
        Duration::from_millis(self.quiet_duration_ms)
    }
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self::companion()
    }
}

/// Emitted once per armed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceDetected {
    /// Timestamp of the last frame above threshold
    pub last_speech_ms: u64,
    /// Timestamp at which the quiet period elapsed
    pub fired_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SilenceDetector {
    config: SilenceConfig,
    has_spoken: bool,
    last_speech_ms: Option<u64>,
    fired: bool,
}

impl SilenceDetector {
    pub fn new(config: SilenceConfig) -> Self {
        Self {
            config,
            has_spoken: false,
            last_speech_ms: None,
            fired: false,
        }
    }

    pub fn config(&self) -> &SilenceConfig {
        &self.config
    }

    pub fn has_spoken(&self) -> bool {
        self.has_spoken
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Re-arm for the next turn
    pub fn reset(&mut self) {
        self.has_spoken = false;
        self.last_speech_ms = None;
        self.fired = false;
    }

    /// Measure a frame of samples and feed the level in
    pub fn observe_samples(&mut self, samples: &[i16], at_ms: u64) -> Option<SilenceDetected> {
        let level = self.config.metric.measure(samples);
        self.observe(level, at_ms)
    }

    /// Feed one level reading taken at `at_ms`
    pub fn observe(&mut self, level: f32, at_ms: u64) -> Option<SilenceDetected> {
        if self.fired {
            return None;
        }

        if level > self.config.threshold {
            self.has_spoken = true;
            self.last_speech_ms = Some(at_ms);
            return None;
        }

        self.poll(at_ms)
    }

    /// Advance time without a new reading
    pub fn poll(&mut self, now_ms: u64) -> Option<SilenceDetected> {
        if self.fired || !self.has_spoken {
            return None;
        }
        let last = self.last_speech_ms?;
        let deadline = last + self.config.quiet_duration_ms;
        if now_ms >= deadline {
            self.fired = true;
            return Some(SilenceDetected {
                last_speech_ms: last,
                fired_at_ms: now_ms,
            });
        }
        None
    }
}
