use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

use crate::{config::DetectorConfig, SampleBuffer};

use super::{
    extract_bpm, render_low_band, render_low_band_until,
    signal::{
        confirm_beat_grid, energy_envelope, find_peaks, histogram_tempo, interval_match,
        peak_intervals,
    },
    Bpm,
};

/// Which piece of evidence settled a track's tempo, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempoSource {
    /// The filename tempo lines up with raw beat energy.
    FilenameBeatAligned,
    /// The filename tempo agrees with the spacing of low-band peaks.
    FilenameIntervalMatched,
    /// Most common peak spacing, without any filename help.
    IntervalHistogram,
    /// Nothing usable was found.
    Default,
}

/// Final tempo for a track together with how it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoDecision {
    pub bpm: Bpm,
    pub source: TempoSource,
    pub filename_guess: Option<Bpm>,
}

impl TempoDecision {
    fn new(bpm: Bpm, source: TempoSource, filename_guess: Option<Bpm>) -> Self {
        Self {
            bpm,
            source,
            filename_guess,
        }
    }

    fn fallback(filename_guess: Option<Bpm>) -> Self {
        Self::new(Bpm::DEFAULT, TempoSource::Default, filename_guess)
    }
}

/// Resolves a track's tempo by walking the evidence tiers in order and
/// stopping at the first one that passes its threshold:
///
/// 1. filename tempo confirmed by beat energy on the raw signal,
/// 2. filename tempo confirmed by low-band peak spacing,
/// 3. histogram of low-band peak spacing,
/// 4. 120 BPM.
///
/// Detection never fails; the result is deterministic for identical input.
#[derive(Debug, Clone, Default)]
pub struct TempoDetector {
    config: Arc<DetectorConfig>,
}

impl TempoDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Runs detection to completion on the calling thread.
    pub fn detect_blocking(&self, buffer: &SampleBuffer, filename: &str) -> TempoDecision {
        let guess = extract_bpm(filename);
        if let Some(decision) = self.screen(buffer, guess) {
            return decision;
        }

        let rendered = render_low_band(buffer.channel(0), buffer.sample_rate(), &self.config);
        self.decide_from_render(&rendered, buffer.sample_rate(), guess)
    }

    /// Runs detection with the offline render moved to the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn detect(&self, buffer: Arc<SampleBuffer>, filename: &str) -> TempoDecision {
        let guess = extract_bpm(filename);
        if let Some(decision) = self.screen(&buffer, guess) {
            return decision;
        }

        let config = Arc::clone(&self.config);
        let source = Arc::clone(&buffer);
        let cancel = CancelOnDrop::default();
        let cancelled = Arc::clone(&cancel.0);
        let rendered = tokio::task::spawn_blocking(move || {
            render_low_band_until(source.channel(0), source.sample_rate(), &config, &cancelled)
        })
        .await;
        drop(cancel);

        match rendered {
            Ok(Some(rendered)) => self.decide_from_render(&rendered, buffer.sample_rate(), guess),
            Ok(None) => TempoDecision::fallback(guess),
            Err(err) => {
                tracing::warn!(filename, %err, "offline render did not complete, using default tempo");
                TempoDecision::fallback(guess)
            }
        }
    }

    /// Handles degenerate buffers and the raw-energy confirmation. Returns
    /// `None` when the offline render is needed.
    fn screen(&self, buffer: &SampleBuffer, guess: Option<Bpm>) -> Option<TempoDecision> {
        let sample_rate = buffer.sample_rate();
        let samples = buffer.channel(0);
        if samples.is_empty() || !sample_rate.is_finite() || sample_rate <= 0.0 {
            tracing::debug!(len = samples.len(), sample_rate, "nothing to analyse");
            return Some(TempoDecision::fallback(guess));
        }

        let guess_bpm = guess?;
        let confirmation = confirm_beat_grid(samples, sample_rate, guess_bpm, &self.config);
        tracing::debug!(
            bpm = %guess_bpm,
            confirmed = confirmation.confirmed,
            expected = confirmation.expected,
            "beat energy confirmation"
        );

        confirmation
            .accepted(self.config.beat_confirm_ratio)
            .then(|| TempoDecision::new(guess_bpm, TempoSource::FilenameBeatAligned, guess))
    }

    fn decide_from_render(
        &self,
        rendered: &[f32],
        sample_rate: f64,
        guess: Option<Bpm>,
    ) -> TempoDecision {
        let config = &*self.config;
        let envelope = energy_envelope(rendered, sample_rate, config.chunk_seconds);
        let peaks = find_peaks(&envelope, config);
        if peaks.len() < 2 {
            tracing::debug!(peaks = peaks.len(), "too few peaks");
            return TempoDecision::fallback(guess);
        }

        let intervals = peak_intervals(&peaks, config.chunk_seconds);

        if let Some(guess_bpm) = guess {
            let matched = interval_match(&intervals, guess_bpm, config);
            tracing::debug!(
                bpm = %guess_bpm,
                matching = matched.matching,
                total = matched.total,
                "peak interval match"
            );
            if matched.accepted(config.interval_match_ratio) {
                return TempoDecision::new(guess_bpm, TempoSource::FilenameIntervalMatched, guess);
            }
        }

        match histogram_tempo(&intervals, config.histogram_bucket) {
            Some(bpm) => TempoDecision::new(bpm, TempoSource::IntervalHistogram, guess),
            None => TempoDecision::fallback(guess),
        }
    }
}

/// Stops the blocking render when the awaiting future is dropped, e.g.
/// because its task was aborted.
#[derive(Debug, Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
