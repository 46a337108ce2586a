//! Offline low-band render used to isolate kick-drum transients.

use std::{
    f64::consts::PI,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::config::DetectorConfig;

/// A single biquad (second-order IIR) filter section.
///
/// Direct Form I with coefficients pre-normalized by a0:
///   y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    /// Band-pass with a constant 0 dB peak gain at `freq`.
    pub fn bandpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let (cos_w0, sin_w0) = angular(freq, sample_rate);
        let alpha = sin_w0 / (2.0 * q.max(f64::EPSILON));

        Self::normalized(alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    /// Low-pass whose resonance `q_db` is expressed in decibels.
    pub fn lowpass(freq: f64, q_db: f64, sample_rate: f64) -> Self {
        let (cos_w0, sin_w0) = angular(freq, sample_rate);
        let alpha = sin_w0 / (2.0 * 10f64.powf(q_db / 20.0));
        let b1 = 1.0 - cos_w0;

        Self::normalized(
            b1 / 2.0,
            b1,
            b1 / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

fn angular(freq: f64, sample_rate: f64) -> (f64, f64) {
    let w0 = 2.0 * PI * freq / sample_rate;
    (w0.cos(), w0.sin())
}

/// Samples filtered between two checks of the cancel flag.
const RENDER_CHUNK: usize = 8192;

/// Renders one channel through the band-pass → low-pass chain.
///
/// The output has the same length as the input. This is the expensive part
/// of detection and is meant to run off the event thread.
pub fn render_low_band(samples: &[f32], sample_rate: f64, config: &DetectorConfig) -> Vec<f32> {
    render_low_band_until(samples, sample_rate, config, &AtomicBool::new(false)).unwrap_or_default()
}

/// Same as [`render_low_band`], but gives up with `None` once `cancelled`
/// is set. The flag is checked before every chunk of samples.
pub fn render_low_band_until(
    samples: &[f32],
    sample_rate: f64,
    config: &DetectorConfig,
    cancelled: &AtomicBool,
) -> Option<Vec<f32>> {
    let mut bandpass = Biquad::bandpass(config.bandpass_hz, config.bandpass_q, sample_rate);
    let mut lowpass = Biquad::lowpass(config.lowpass_hz, config.lowpass_q, sample_rate);
    let mut rendered = Vec::with_capacity(samples.len());

    for chunk in samples.chunks(RENDER_CHUNK) {
        if cancelled.load(Ordering::Relaxed) {
            return None;
        }
        rendered.extend(chunk.iter().map(|&sample| {
            let band = bandpass.process_sample(sample as f64);
            lowpass.process_sample(band) as f32
        }));
    }
    Some(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, seconds: f64) -> Vec<f32> {
        let len = (sample_rate * seconds) as usize;
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin() as f32)
            .collect()
    }

    fn tail_peak(samples: &[f32]) -> f32 {
        samples[samples.len() / 2..]
            .iter()
            .fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn output_length_matches_input() {
        let config = DetectorConfig::default();
        let input = sine(50.0, 8_000.0, 0.25);
        assert_eq!(render_low_band(&input, 8_000.0, &config).len(), input.len());
        assert!(render_low_band(&[], 8_000.0, &config).is_empty());
    }

    #[test]
    fn passes_kick_band_and_rejects_highs() {
        let config = DetectorConfig::default();
        let low = render_low_band(&sine(50.0, 8_000.0, 2.0), 8_000.0, &config);
        let high = render_low_band(&sine(1_000.0, 8_000.0, 2.0), 8_000.0, &config);

        let low_peak = tail_peak(&low);
        let high_peak = tail_peak(&high);
        assert!(low_peak > 0.5, "50 Hz should pass, got {low_peak}");
        assert!(high_peak < 0.01, "1 kHz should be rejected, got {high_peak}");
    }

    #[test]
    fn silence_stays_silent() {
        let config = DetectorConfig::default();
        let out = render_low_band(&vec![0.0; 4_000], 8_000.0, &config);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn cancelled_render_gives_up() {
        let config = DetectorConfig::default();
        let input = sine(50.0, 8_000.0, 2.0);

        let stopped = AtomicBool::new(true);
        assert!(render_low_band_until(&input, 8_000.0, &config, &stopped).is_none());

        let running = AtomicBool::new(false);
        let full = render_low_band_until(&input, 8_000.0, &config, &running).unwrap();
        assert_eq!(full, render_low_band(&input, 8_000.0, &config));
    }

    #[test]
    fn reset_clears_state() {
        let mut filter = Biquad::bandpass(50.0, 8.0, 8_000.0);
        filter.process_sample(1.0);
        filter.reset();
        assert_eq!(filter.process_sample(0.0), 0.0);
    }
}
