//! Building blocks for signal-based tempo detection.
//!
//! Everything here is pure and synchronous; [`super::TempoDetector`] decides
//! how the results are combined.

use crate::config::DetectorConfig;

use super::Bpm;

/// Outcome of checking a tempo guess against raw beat energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeatConfirmation {
    /// Number of beats that fit in the buffer at the guessed tempo.
    pub expected: usize,
    pub confirmed: usize,
}

impl BeatConfirmation {
    pub fn accepted(&self, ratio: f64) -> bool {
        self.confirmed as f64 > self.expected as f64 * ratio
    }
}

/// Outcome of comparing peak intervals with a tempo guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntervalMatch {
    pub matching: usize,
    pub total: usize,
}

impl IntervalMatch {
    pub fn accepted(&self, ratio: f64) -> bool {
        self.matching as f64 > self.total as f64 * ratio
    }
}

/// Walks the expected beat positions of `guess` and counts the beats whose
/// central energy stands out from their surroundings.
pub fn confirm_beat_grid(
    samples: &[f32],
    sample_rate: f64,
    guess: Bpm,
    config: &DetectorConfig,
) -> BeatConfirmation {
    let samples_per_beat = sample_rate * 60.0 / guess.as_f64();
    if !(samples_per_beat.is_finite() && samples_per_beat > 0.0) {
        return BeatConfirmation::default();
    }

    let expected = (samples.len() as f64 / samples_per_beat).floor() as usize;
    let window = (samples_per_beat * config.beat_window_fraction).floor() as i64;
    if window <= 0 {
        return BeatConfirmation {
            expected,
            confirmed: 0,
        };
    }

    let center = window as f64 * config.beat_center_fraction;
    let len = samples.len() as i64;
    let mut confirmed = 0;

    for beat in 0..expected {
        let position = (beat as f64 * samples_per_beat).floor() as i64;
        let mut beat_energy = 0.0_f64;
        let mut surrounding_energy = 0.0_f64;

        for offset in -window..window {
            let index = position + offset;
            if !(0..len).contains(&index) {
                continue;
            }
            let value = samples[index as usize].abs() as f64;
            if (offset.abs() as f64) < center {
                beat_energy += value;
            } else {
                surrounding_energy += value;
            }
        }

        if beat_energy * config.beat_energy_gain > surrounding_energy / (2 * window) as f64 {
            confirmed += 1;
        }
    }

    BeatConfirmation {
        expected,
        confirmed,
    }
}

/// RMS energy of consecutive fixed-length chunks. A trailing partial chunk
/// is dropped.
pub fn energy_envelope(samples: &[f32], sample_rate: f64, chunk_seconds: f64) -> Vec<f32> {
    let chunk = (sample_rate * chunk_seconds).floor();
    if !(chunk.is_finite() && chunk >= 1.0) {
        return Vec::new();
    }

    samples
        .chunks_exact(chunk as usize)
        .map(|chunk| {
            let sum: f32 = chunk.iter().map(|sample| sample * sample).sum();
            (sum / chunk.len() as f32).sqrt()
        })
        .collect()
}

/// Indices of chunks that are the strict local maximum of their surrounding
/// window, above the absolute floor and well above the window mean.
pub fn find_peaks(energies: &[f32], config: &DetectorConfig) -> Vec<usize> {
    let reach = config.peak_lookaround;
    let mut peaks = Vec::new();

    for index in reach..energies.len().saturating_sub(reach) {
        let window = &energies[index - reach..=index + reach];
        let energy = energies[index];
        let max = window.iter().copied().fold(f32::MIN, f32::max);

        if energy != max || energy <= config.peak_floor {
            continue;
        }

        let mean = window.iter().sum::<f32>() / window.len() as f32;
        if energy > mean * config.peak_mean_ratio {
            peaks.push(index);
        }
    }

    peaks
}

/// Seconds between consecutive peaks.
pub fn peak_intervals(peaks: &[usize], chunk_seconds: f64) -> Vec<f64> {
    peaks
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f64 * chunk_seconds)
        .collect()
}

/// Counts intervals that sit near the guessed beat interval or one of its
/// configured multiples.
pub fn interval_match(intervals: &[f64], guess: Bpm, config: &DetectorConfig) -> IntervalMatch {
    let expected = guess.beat_interval();
    let matching = intervals
        .iter()
        .filter(|&&interval| {
            config.interval_ratios.iter().any(|ratio| {
                let target = expected * ratio;
                (interval - target).abs() <= target * config.interval_tolerance
            })
        })
        .count();

    IntervalMatch {
        matching,
        total: intervals.len(),
    }
}

/// Tempo of the most common interval bucket.
///
/// Ties go to the bucket seen first. Returns `None` when the winning bucket
/// converts to a tempo outside `[60, 200]`.
pub fn histogram_tempo(intervals: &[f64], bucket_seconds: f64) -> Option<Bpm> {
    let per_second = 1.0 / bucket_seconds;
    let mut buckets: Vec<(i64, usize)> = Vec::new();

    for interval in intervals {
        let key = (interval * per_second).round() as i64;
        match buckets.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, count)) => *count += 1,
            None => buckets.push((key, 1)),
        }
    }

    let mut winner: Option<(i64, usize)> = None;
    for &(key, count) in &buckets {
        if winner.map_or(true, |(_, best)| count > best) {
            winner = Some((key, count));
        }
    }

    let (key, _) = winner?;
    if key <= 0 {
        return None;
    }
    let interval = key as f64 / per_second;
    Bpm::from_rounded(60.0 / interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpm(value: i64) -> Bpm {
        Bpm::new(value).unwrap()
    }

    #[test]
    fn confirms_clicks_on_the_grid() {
        let config = DetectorConfig::default();
        let sample_rate = 8_000.0;
        let spacing = sample_rate * 60.0 / 120.0;
        let mut samples = vec![0.0_f32; (spacing * 8.0) as usize];
        for beat in 0..8 {
            let start = (beat as f64 * spacing) as usize;
            samples[start..start + 20].fill(1.0);
        }

        let result = confirm_beat_grid(&samples, sample_rate, bpm(120), &config);
        assert_eq!(result.expected, 8);
        assert_eq!(result.confirmed, 8);
        assert!(result.accepted(config.beat_confirm_ratio));
    }

    #[test]
    fn silence_confirms_nothing() {
        let config = DetectorConfig::default();
        let result = confirm_beat_grid(&vec![0.0; 48_000], 8_000.0, bpm(128), &config);

        assert!(result.expected > 0);
        assert_eq!(result.confirmed, 0);
        assert!(!result.accepted(config.beat_confirm_ratio));
    }

    #[test]
    fn short_buffer_expects_no_beats() {
        let config = DetectorConfig::default();
        let result = confirm_beat_grid(&[0.5; 10], 8_000.0, bpm(120), &config);
        assert_eq!(result, BeatConfirmation::default());
        assert!(!result.accepted(config.beat_confirm_ratio));
    }

    #[test]
    fn envelope_drops_partial_chunk() {
        let samples = vec![0.5_f32; 250];
        let envelope = energy_envelope(&samples, 10_000.0, 0.01);

        assert_eq!(envelope.len(), 2);
        assert!(envelope.iter().all(|e| (e - 0.5).abs() < 1e-6));
        assert!(energy_envelope(&samples, 50.0, 0.01).is_empty());
    }

    #[test]
    fn finds_isolated_peaks() {
        let config = DetectorConfig::default();
        let mut energies = vec![0.001_f32; 120];
        energies[30] = 0.2;
        energies[31] = 0.1;
        energies[80] = 0.3;

        assert_eq!(find_peaks(&energies, &config), vec![30, 80]);
    }

    #[test]
    fn peaks_need_floor_and_contrast() {
        let config = DetectorConfig::default();

        let mut quiet = vec![0.0_f32; 60];
        quiet[30] = 0.004;
        assert!(find_peaks(&quiet, &config).is_empty());

        let mut flat = vec![0.1_f32; 60];
        flat[30] = 0.12;
        assert!(find_peaks(&flat, &config).is_empty());
    }

    #[test]
    fn peaks_ignore_edges_and_short_envelopes() {
        let config = DetectorConfig::default();
        let mut energies = vec![0.0_f32; 40];
        energies[5] = 1.0;
        energies[35] = 1.0;
        assert!(find_peaks(&energies, &config).is_empty());
        assert!(find_peaks(&[1.0; 15], &config).is_empty());
    }

    #[test]
    fn intervals_are_chunk_deltas() {
        let intervals = peak_intervals(&[10, 60, 110, 130], 0.01);
        assert_eq!(intervals.len(), 3);
        assert!((intervals[0] - 0.5).abs() < 1e-9);
        assert!((intervals[2] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn matches_multiples_of_expected_interval() {
        let config = DetectorConfig::default();
        // 120 BPM → 0.5 s; 0.25 and 1.0 are half and double.
        let intervals = [0.5, 0.25, 1.0, 0.37, 0.55];
        let result = interval_match(&intervals, bpm(120), &config);

        assert_eq!(result.matching, 4);
        assert_eq!(result.total, 5);
        assert!(result.accepted(config.interval_match_ratio));
    }

    #[test]
    fn interval_match_threshold_is_strict() {
        let config = DetectorConfig::default();
        let mut intervals = vec![0.37; 9];
        intervals.push(0.5);
        let result = interval_match(&intervals, bpm(120), &config);

        assert_eq!(result.matching, 1);
        assert!(!result.accepted(config.interval_match_ratio));
    }

    #[test]
    fn histogram_picks_most_common_bucket() {
        let intervals = [0.4, 0.41, 0.39, 0.5, 0.5];
        assert_eq!(histogram_tempo(&intervals, 0.05), Some(bpm(150)));
    }

    #[test]
    fn histogram_ties_go_to_first_bucket() {
        let intervals = [0.6, 0.5, 0.6, 0.5];
        assert_eq!(histogram_tempo(&intervals, 0.05), Some(bpm(100)));
    }

    #[test]
    fn histogram_rejects_out_of_range() {
        assert_eq!(histogram_tempo(&[0.2, 0.2], 0.05), None);
        assert_eq!(histogram_tempo(&[1.5, 1.5], 0.05), None);
        assert_eq!(histogram_tempo(&[0.01], 0.05), None);
        assert_eq!(histogram_tempo(&[], 0.05), None);
    }
}
