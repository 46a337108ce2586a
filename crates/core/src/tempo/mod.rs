//! Tempo inference for decoded tracks.
//!
//! A track's tempo is guessed from its filename ([`extract_bpm`]), checked
//! against the signal, and settled by [`TempoDetector`], which always ends
//! in a usable [`Bpm`].

mod arbiter;
mod filename;
mod filter;
mod signal;

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{MixerError, SampleBuffer};

pub use arbiter::{TempoDecision, TempoDetector, TempoSource};
pub use filename::extract_bpm;
pub use filter::{render_low_band, render_low_band_until, Biquad};
pub use signal::{
    confirm_beat_grid, energy_envelope, find_peaks, histogram_tempo, interval_match,
    peak_intervals, BeatConfirmation, IntervalMatch,
};

/// Musical tempo in beats per minute, restricted to `[60, 200]`.
///
/// Values outside the range cannot be represented, so an out-of-range
/// estimate is always replaced by the next fallback instead of leaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Bpm(u16);

impl Bpm {
    pub const MIN: u32 = 60;
    pub const MAX: u32 = 200;
    /// Used whenever there is no usable tempo evidence.
    pub const DEFAULT: Bpm = Bpm(120);

    /// Returns `None` unless `value` lies within `[60, 200]`.
    pub fn new(value: i64) -> Option<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Some(Self(value as u16))
        } else {
            None
        }
    }

    /// Rounds a fractional tempo to the nearest integer before range checking.
    pub fn from_rounded(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Self::new(value.round() as i64)
    }

    pub fn get(self) -> u32 {
        self.0 as u32
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }

    /// Seconds between two beats.
    pub fn beat_interval(self) -> f64 {
        60.0 / self.as_f64()
    }
}

impl Default for Bpm {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Bpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for Bpm {
    type Error = MixerError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value as i64).ok_or(MixerError::InvalidTempo(value as f64))
    }
}

impl From<Bpm> for u32 {
    fn from(value: Bpm) -> Self {
        value.get()
    }
}

/// Parses the text of a manual tempo field.
///
/// The leading integer is used, so `"128.5"` and `"128abc"` both read as
/// 128. Text without one, or a value outside `[60, 200]`, yields `None`;
/// callers keep their previous state in that case.
pub fn parse_manual_override(input: &str) -> Option<Bpm> {
    leading_integer(input).and_then(Bpm::new)
}

/// Reads an optional sign and the digit run that follows, after leading
/// whitespace. Anything after the digits is ignored. Saturates on overflow.
pub(crate) fn leading_integer(input: &str) -> Option<i64> {
    let text = input.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    let signed = if negative {
        format!("-{}", &rest[..digits])
    } else {
        rest[..digits].to_string()
    };
    Some(signed.parse().unwrap_or(if negative { i64::MIN } else { i64::MAX }))
}

/// Detects the tempo of `buffer` using the default detector settings.
///
/// The offline render runs on the blocking pool, so awaiting this never
/// stalls the caller's event loop. Identical input always yields the same
/// tempo.
pub async fn detect_tempo(buffer: Arc<SampleBuffer>, filename: &str) -> Bpm {
    TempoDetector::default().detect(buffer, filename).await.bpm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_range_is_inclusive() {
        assert_eq!(Bpm::new(60).map(Bpm::get), Some(60));
        assert_eq!(Bpm::new(200).map(Bpm::get), Some(200));
        assert!(Bpm::new(59).is_none());
        assert!(Bpm::new(201).is_none());
        assert!(Bpm::new(-120).is_none());
    }

    #[test]
    fn rounds_fractional_tempo() {
        assert_eq!(Bpm::from_rounded(127.6), Bpm::new(128));
        assert!(Bpm::from_rounded(f64::INFINITY).is_none());
        assert!(Bpm::from_rounded(f64::NAN).is_none());
        assert!(Bpm::from_rounded(200.6).is_none());
    }

    #[test]
    fn manual_override_is_bounds_checked() {
        assert_eq!(parse_manual_override(" 128 "), Bpm::new(128));
        assert!(parse_manual_override("").is_none());
        assert!(parse_manual_override("12x").is_none());
        assert!(parse_manual_override("45").is_none());
        assert!(parse_manual_override("240").is_none());
        assert!(parse_manual_override("abc").is_none());
    }

    #[test]
    fn manual_override_reads_leading_integer() {
        assert_eq!(parse_manual_override("128.5"), Bpm::new(128));
        assert_eq!(parse_manual_override("128abc"), Bpm::new(128));
        assert_eq!(parse_manual_override("+90"), Bpm::new(90));
        assert!(parse_manual_override("-128").is_none());
        assert!(parse_manual_override(".5").is_none());
    }

    #[test]
    fn leading_integer_stops_at_first_non_digit() {
        assert_eq!(leading_integer("  42 bpm"), Some(42));
        assert_eq!(leading_integer("-7x"), Some(-7));
        assert_eq!(leading_integer("99999999999999999999"), Some(i64::MAX));
        assert_eq!(leading_integer("-"), None);
        assert_eq!(leading_integer(""), None);
    }

    #[test]
    fn serde_rejects_out_of_range() {
        let ok: Bpm = serde_json::from_str("140").unwrap();
        assert_eq!(ok.get(), 140);
        assert!(serde_json::from_str::<Bpm>("20").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "140");
    }
}
