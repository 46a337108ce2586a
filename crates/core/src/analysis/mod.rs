use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{MixerError, Result};

/// Decibel range mapped onto the 0..=255 spectrum bytes.
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
/// Minimum time between two increases of the held peak.
const PEAK_HOLD_SECONDS: f64 = 0.5;

/// Visualization snapshot of one tap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisFrame {
    /// Audio clock time of the newest sample, in seconds.
    pub time: f64,
    pub rms: f32,
    /// Loudest spectrum bin, normalised to [0, 1].
    pub peak: f32,
    /// Time-domain bytes centred on 128.
    pub waveform: Vec<u8>,
    /// Frequency bytes, one per bin up to (excluding) Nyquist.
    pub spectrum: Vec<u8>,
}

/// Rolling analysis point for a deck or the master bus.
///
/// Audio is pushed in as it is rendered; the redraw loop pulls
/// [`AnalysisFrame`]s without touching playback state.
pub struct AnalysisTap {
    sample_rate: u32,
    fft_size: usize,
    history: Vec<f32>,
    write_pos: usize,
    processed_samples: usize,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl AnalysisTap {
    pub fn new(sample_rate: u32, fft_size: usize) -> Result<Self> {
        if fft_size < 2 {
            return Err(MixerError::InvalidInput(
                "analysis taps need an fft size of at least two samples",
            ));
        }

        Ok(Self {
            sample_rate,
            fft_size,
            history: vec![0.0; fft_size],
            write_pos: 0,
            processed_samples: 0,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Clears the history while preserving configuration.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
        self.processed_samples = 0;
    }

    /// Appends rendered audio to the rolling window.
    pub fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
        self.processed_samples += samples.len();
    }

    /// Computes a frame from the most recent `fft_size` samples.
    pub fn frame(&mut self) -> Result<AnalysisFrame> {
        let window = self.ordered_history();
        let rms = compute_rms(&window);
        let waveform = window[window.len() - self.fft_size / 2..]
            .iter()
            .map(|sample| (128.0 + sample * 128.0).clamp(0.0, 255.0) as u8)
            .collect();
        let spectrum = self.compute_spectrum(&window)?;
        let peak = spectrum.iter().copied().max().unwrap_or(0) as f32 / 255.0;

        Ok(AnalysisFrame {
            time: self.processed_samples as f64 / self.sample_rate.max(1) as f64,
            rms,
            peak,
            waveform,
            spectrum,
        })
    }

    fn ordered_history(&self) -> Vec<f32> {
        let mut ordered = Vec::with_capacity(self.fft_size);
        ordered.extend_from_slice(&self.history[self.write_pos..]);
        ordered.extend_from_slice(&self.history[..self.write_pos]);
        ordered
    }

    fn compute_spectrum(&mut self, window: &[f32]) -> Result<Vec<u8>> {
        let len = window.len();
        let fft = self.prepare_fft(len);

        for (index, value) in window.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let scale = 1.0 / len as f32;
        let span = MAX_DECIBELS - MIN_DECIBELS;
        Ok(fft.spectrum[..len / 2]
            .iter()
            .map(|bin| {
                let db = amplitude_to_db(bin.norm() * scale);
                (255.0 * (db - MIN_DECIBELS) / span).clamp(0.0, 255.0) as u8
            })
            .collect())
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            let plan = self.fft_planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            self.fft = Some(FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            });
        }

        self.fft.as_mut().expect("fft resources must exist")
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AnalysisTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTap")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft_size)
            .field("processed_samples", &self.processed_samples)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

/// Peak readout that only climbs, at most once every half second, until it
/// is reset.
#[derive(Debug, Clone, Default)]
pub struct PeakHold {
    display: f32,
    last_update: Option<f64>,
}

impl PeakHold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers the current peak at audio time `now` and returns the displayed
    /// value.
    pub fn update(&mut self, current: f32, now: f64) -> f32 {
        let due = self
            .last_update
            .map_or(true, |last| now - last > PEAK_HOLD_SECONDS);
        if due && current > self.display {
            self.display = current;
            self.last_update = Some(now);
        }
        self.display
    }

    pub fn display(&self) -> f32 {
        self.display
    }

    /// Displayed peak in dBFS; negative infinity while nothing is held.
    pub fn display_db(&self) -> f32 {
        amplitude_to_db(self.display)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Converts a linear amplitude to decibels. Silence maps to negative
/// infinity.
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * amplitude.log10()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
