//! Tempo synchronisation by playback rate.
//!
//! Every deck plays at `global / deck` speed. There is no time-stretching, so
//! pitch follows the rate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{tempo::leading_integer, Bpm, MixerError, Result};

/// Playback rate that makes a track at `deck` sound at `global` BPM.
pub fn compute_rate(global: f64, deck: Bpm) -> f64 {
    global / deck.as_f64()
}

/// A manual override always beats the detected tempo.
pub fn effective_tempo(manual: Option<Bpm>, detected: Option<Bpm>) -> Option<Bpm> {
    manual.or(detected)
}

/// Rate for a deck, or 1.0 while it has no tempo at all.
pub fn rate_for(global: GlobalTempo, manual: Option<Bpm>, detected: Option<Bpm>) -> f64 {
    effective_tempo(manual, detected).map_or(1.0, |tempo| compute_rate(global.bpm(), tempo))
}

/// The transport tempo every deck follows.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct GlobalTempo(f64);

impl GlobalTempo {
    pub fn new(bpm: f64) -> Result<Self> {
        if bpm.is_finite() && bpm > 0.0 {
            Ok(Self(bpm))
        } else {
            Err(MixerError::InvalidTempo(bpm))
        }
    }

    pub fn bpm(self) -> f64 {
        self.0
    }

    /// Interprets the text of the transport tempo field.
    ///
    /// Only the leading integer counts, so `"128.5"` reads as 128. Empty or
    /// non-numeric text changes nothing. Entries of three or more characters
    /// are clamped into `[60, 200]`; shorter ones are taken only when already
    /// in range, so half-typed values are ignored.
    pub fn parse_input(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let value = leading_integer(trimmed)?;
        let (min, max) = (Bpm::MIN as i64, Bpm::MAX as i64);

        let bpm = if trimmed.len() >= 3 {
            value.clamp(min, max)
        } else if (min..=max).contains(&value) {
            value
        } else {
            return None;
        };
        Some(Self(bpm as f64))
    }
}

impl Default for GlobalTempo {
    fn default() -> Self {
        Self(Bpm::DEFAULT.as_f64())
    }
}

impl fmt::Display for GlobalTempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<f64> for GlobalTempo {
    type Error = MixerError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<GlobalTempo> for f64 {
    fn from(value: GlobalTempo) -> Self {
        value.0
    }
}
