use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub tempo: DetectorConfig,
    pub mixer: MixerConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections and fields fall back
    /// to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Window length of the visualization taps. Must be a power of two.
    pub fft_size: usize,
    /// Redraw loop frequency in Hz.
    pub redraw_hz: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fft_size: 2048,
            redraw_hz: 60,
        }
    }
}

/// Thresholds used by the tempo detector. The defaults are the canonical
/// values; they are deliberately permissive so a correct filename tempo is
/// rarely rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Half-width of the beat window as a fraction of the beat spacing.
    pub beat_window_fraction: f64,
    /// Central zone of the beat window as a fraction of its half-width.
    pub beat_center_fraction: f64,
    /// Multiplier applied to beat energy before comparing with the
    /// surrounding average.
    pub beat_energy_gain: f64,
    /// Fraction of expected beats that must be confirmed to accept a
    /// filename tempo straight away.
    pub beat_confirm_ratio: f64,

    pub bandpass_hz: f64,
    pub bandpass_q: f64,
    pub lowpass_hz: f64,
    /// Low-pass resonance in dB.
    pub lowpass_q: f64,

    /// Envelope chunk length in seconds.
    pub chunk_seconds: f64,
    /// Chunks inspected on each side of a candidate peak.
    pub peak_lookaround: usize,
    pub peak_floor: f32,
    pub peak_mean_ratio: f32,

    /// Multiples of the expected beat interval that count as a match.
    pub interval_ratios: Vec<f64>,
    pub interval_tolerance: f64,
    /// Fraction of intervals that must match to accept a filename tempo.
    pub interval_match_ratio: f64,
    /// Histogram bucket width in seconds.
    pub histogram_bucket: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            beat_window_fraction: 0.2,
            beat_center_fraction: 0.2,
            beat_energy_gain: 1.5,
            beat_confirm_ratio: 0.2,
            bandpass_hz: 50.0,
            bandpass_q: 8.0,
            lowpass_hz: 150.0,
            lowpass_q: 1.0,
            chunk_seconds: 0.01,
            peak_lookaround: 10,
            peak_floor: 0.005,
            peak_mean_ratio: 1.5,
            interval_ratios: vec![0.25, 0.5, 1.0, 2.0, 4.0],
            interval_tolerance: 0.2,
            interval_match_ratio: 0.1,
            histogram_bucket: 0.05,
        }
    }
}

/// Mixer layout and transport defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub deck_count: usize,
    pub global_bpm: f64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            deck_count: 8,
            global_bpm: 120.0,
        }
    }
}
