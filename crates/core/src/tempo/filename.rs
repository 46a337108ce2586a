use std::sync::LazyLock;

use regex::Regex;

use super::Bpm;

/// `Bpm128`: the explicit form, tried before anything else.
static EXPLICIT: LazyLock<Regex> = LazyLock::new(|| compile(r"Bpm(\d+)"));

/// Looser spellings, in priority order.
static FALLBACKS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        compile(r"(?i)\D(\d{2,3})bpm"),
        compile(r"(?i)\D(\d{2,3})_bpm"),
        compile(r"[(\[\s](\d{2,3})[)\]\s]"),
        compile(r"(?i)bpm(\d{2,3})"),
    ]
});

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("invalid tempo pattern {pattern}: {err}"))
}

/// Guesses a tempo from a track's filename.
///
/// Each pattern is tried on its first match only; a value outside `[60, 200]`
/// moves on to the next pattern rather than ending the search.
pub fn extract_bpm(filename: &str) -> Option<Bpm> {
    std::iter::once(&*EXPLICIT)
        .chain(FALLBACKS.iter())
        .find_map(|pattern| first_capture(pattern, filename))
        .inspect(|bpm| tracing::debug!(filename, %bpm, "tempo found in filename"))
}

fn first_capture(pattern: &Regex, filename: &str) -> Option<Bpm> {
    let digits = pattern.captures(filename)?.get(1)?.as_str();
    // Overlong digit runs overflow the parse and are treated as out of range.
    digits.parse::<i64>().ok().and_then(Bpm::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpm(filename: &str) -> Option<u32> {
        extract_bpm(filename).map(Bpm::get)
    }

    #[test]
    fn explicit_form_wins() {
        assert_eq!(bpm("LoopBpm128.wav"), Some(128));
        assert_eq!(bpm("Bpm60_kick.wav"), Some(60));
        assert_eq!(bpm("Bpm200.wav"), Some(200));
        assert_eq!(bpm("DrumsBpm174 (90).wav"), Some(174));
    }

    #[test]
    fn explicit_form_is_case_sensitive() {
        // "BPM140" does not match `Bpm(\d+)` but falls through to `bpm(\d{2,3})`.
        assert_eq!(bpm("LoopBPM140.wav"), Some(140));
    }

    #[test]
    fn explicit_out_of_range_falls_back() {
        assert_eq!(bpm("Bpm1000 (95).wav"), Some(95));
        assert_eq!(bpm("Bpm30.wav"), None);
    }

    #[test]
    fn suffix_forms() {
        assert_eq!(bpm("Track_128bpm.wav"), Some(128));
        assert_eq!(bpm("track-90BPM.mp3"), Some(90));
        assert_eq!(bpm("track 128_bpm.wav"), Some(128));
    }

    #[test]
    fn suffix_requires_leading_non_digit() {
        // Four digits: the only non-digit precedes "1280", which is too long.
        assert_eq!(bpm("x1280bpm"), None);
    }

    #[test]
    fn delimited_numbers() {
        assert_eq!(bpm("Song (124).wav"), Some(124));
        assert_eq!(bpm("Song [98] mix.wav"), Some(98));
        assert_eq!(bpm("Song 140 final.wav"), Some(140));
        assert_eq!(bpm("Song (45).wav"), None);
    }

    #[test]
    fn prefix_form() {
        assert_eq!(bpm("bpm96_break.wav"), Some(96));
        assert_eq!(bpm("BPM172-neuro.wav"), Some(172));
    }

    #[test]
    fn no_pattern_is_no_guess() {
        assert_eq!(bpm("kick.wav"), None);
        assert_eq!(bpm(""), None);
        assert_eq!(bpm("track_2024_final.wav"), None);
        assert_eq!(bpm("Bpm.wav"), None);
    }
}
