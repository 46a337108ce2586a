//! Deck state: the loaded track, its tempo and the live voice.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use crate::{
    sync::{effective_tempo, rate_for},
    tempo::parse_manual_override,
    Bpm, GlobalTempo, MixerError, Result, TempoDecision, TempoSource, Track, Voice,
};

/// Deck identifier, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeckId(u8);

impl DeckId {
    /// Deck number as shown to the user, starting at 1.
    pub fn new(number: usize) -> Option<Self> {
        u8::try_from(number).ok().filter(|n| *n > 0).map(Self)
    }

    /// Get the deck from a zero-based index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::new(index + 1)
    }

    pub fn number(&self) -> usize {
        self.0 as usize
    }

    /// Zero-based position of the deck in the mixer.
    pub fn index(&self) -> usize {
        self.0 as usize - 1
    }
}

impl TryFrom<u8> for DeckId {
    type Error = MixerError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value as usize).ok_or(MixerError::InvalidInput("deck numbers start at 1"))
    }
}

impl From<DeckId> for u8 {
    fn from(value: DeckId) -> Self {
        value.0
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deck lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeckState {
    /// No track loaded.
    #[default]
    Empty,
    /// Track loaded, tempo detection still running.
    Detecting,
    /// Track loaded with a detected tempo.
    Resolved,
}

impl DeckState {
    pub fn has_track(&self) -> bool {
        !matches!(self, Self::Empty)
    }
}

/// Identifies one load of one deck. Results carrying an older ticket are
/// stale and must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetectionTicket {
    pub deck: DeckId,
    generation: u64,
}

/// What happened to a manual tempo entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideChange {
    Set(Bpm),
    Cleared,
    /// Not a tempo in range; the previous override stays.
    Ignored,
}

/// Complete deck state.
#[derive(Debug)]
pub struct Deck {
    id: DeckId,
    state: DeckState,
    track: Option<Track>,
    detected: Option<TempoDecision>,
    manual_override: Option<Bpm>,
    /// Text last typed into the override field, kept even when invalid.
    override_input: String,
    playback_rate: f64,
    voice: Option<Box<dyn Voice>>,
    generation: u64,
    detection: Option<AbortHandle>,
}

impl Deck {
    /// Create a new empty deck.
    pub fn new(id: DeckId) -> Self {
        Self {
            id,
            state: DeckState::Empty,
            track: None,
            detected: None,
            manual_override: None,
            override_input: String::new(),
            playback_rate: 1.0,
            voice: None,
            generation: 0,
            detection: None,
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn state(&self) -> DeckState {
        self.state
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.track.as_ref().map(|track| track.filename.as_str())
    }

    pub fn detected_tempo(&self) -> Option<Bpm> {
        self.detected.map(|decision| decision.bpm)
    }

    pub fn tempo_source(&self) -> Option<TempoSource> {
        self.detected.map(|decision| decision.source)
    }

    pub fn manual_override(&self) -> Option<Bpm> {
        self.manual_override
    }

    pub fn override_input(&self) -> &str {
        &self.override_input
    }

    /// Tempo used for rate computation: the override if set, else the
    /// detected tempo.
    pub fn effective_tempo(&self) -> Option<Bpm> {
        effective_tempo(self.manual_override, self.detected_tempo())
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn voice(&self) -> Option<&dyn Voice> {
        self.voice.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.voice.as_ref().is_some_and(|voice| voice.is_playing())
    }

    /// Empties the deck and loads `track`, returning the ticket its
    /// detection must present.
    pub(crate) fn load(&mut self, track: Track) -> DetectionTicket {
        self.clear();
        self.track = Some(track);
        self.state = DeckState::Detecting;
        self.ticket()
    }

    pub(crate) fn attach_detection(&mut self, handle: AbortHandle) {
        self.detection = Some(handle);
    }

    /// Applies a finished detection. Returns false and changes nothing when
    /// the ticket is stale or the deck is not waiting for a tempo.
    pub(crate) fn resolve(&mut self, ticket: DetectionTicket, decision: TempoDecision) -> bool {
        if ticket != self.ticket() || self.state != DeckState::Detecting {
            return false;
        }
        self.detected = Some(decision);
        self.state = DeckState::Resolved;
        self.detection = None;
        true
    }

    /// Interprets the text of the manual tempo field. Empty text removes the
    /// override; anything else outside `[60, 200]` is ignored.
    pub(crate) fn set_override_input(&mut self, input: &str) -> OverrideChange {
        self.override_input = input.to_string();
        if input.trim().is_empty() {
            self.manual_override = None;
            return OverrideChange::Cleared;
        }
        match parse_manual_override(input) {
            Some(bpm) => {
                self.manual_override = Some(bpm);
                OverrideChange::Set(bpm)
            }
            None => OverrideChange::Ignored,
        }
    }

    /// Recomputes the playback rate and schedules it on the live voice at
    /// audio time `now`. Returns the new rate when it changed.
    pub(crate) fn sync_rate(&mut self, global: GlobalTempo, now: f64) -> Option<f64> {
        let rate = if self.state.has_track() {
            rate_for(global, self.manual_override, self.detected_tempo())
        } else {
            1.0
        };
        if rate == self.playback_rate {
            return None;
        }

        self.playback_rate = rate;
        if let Some(voice) = self.voice.as_mut().filter(|voice| voice.is_playing()) {
            voice.set_rate_at(rate, now);
        }
        Some(rate)
    }

    /// Starts `voice` at the current playback rate, replacing any previous
    /// voice.
    pub(crate) fn start(&mut self, mut voice: Box<dyn Voice>, when: f64) {
        self.stop();
        voice.start(when, self.playback_rate);
        self.voice = Some(voice);
    }

    pub(crate) fn stop(&mut self) {
        if let Some(mut voice) = self.voice.take() {
            voice.stop();
        }
    }

    pub(crate) fn render(&mut self, now: f64, frames: usize) -> Option<Vec<f32>> {
        self.voice
            .as_mut()
            .filter(|voice| voice.is_playing())
            .map(|voice| voice.render(now, frames))
    }

    /// Back to empty: track, tempo, override, rate and voice go together and
    /// any running detection is abandoned.
    pub(crate) fn clear(&mut self) {
        self.stop();
        if let Some(detection) = self.detection.take() {
            detection.abort();
        }
        self.generation += 1;
        self.state = DeckState::Empty;
        self.track = None;
        self.detected = None;
        self.manual_override = None;
        self.override_input.clear();
        self.playback_rate = 1.0;
    }

    fn ticket(&self) -> DetectionTicket {
        DetectionTicket {
            deck: self.id,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{BufferVoice, SampleBuffer};

    fn deck() -> Deck {
        Deck::new(DeckId::new(3).unwrap())
    }

    fn track() -> Track {
        Track::new("loop.wav", SampleBuffer::mono(vec![0.1; 800], 8_000.0))
    }

    fn decision(bpm: i64) -> TempoDecision {
        TempoDecision {
            bpm: Bpm::new(bpm).unwrap(),
            source: TempoSource::IntervalHistogram,
            filename_guess: None,
        }
    }

    fn global(bpm: f64) -> GlobalTempo {
        GlobalTempo::new(bpm).unwrap()
    }

    #[test]
    fn deck_ids_are_one_based() {
        let id = DeckId::from_index(0).unwrap();
        assert_eq!(id.number(), 1);
        assert_eq!(id.index(), 0);
        assert_eq!(id.to_string(), "1");
        assert!(DeckId::new(0).is_none());
        assert!(DeckId::new(256).is_none());
    }

    #[test]
    fn deck_id_serde_keeps_numbering() {
        let id: DeckId = serde_json::from_str("4").unwrap();
        assert_eq!(id.index(), 3);
        assert_eq!(serde_json::to_string(&id).unwrap(), "4");
        assert!(serde_json::from_str::<DeckId>("0").is_err());
        assert!(serde_json::from_str::<DeckId>("300").is_err());
    }

    #[test]
    fn walks_empty_detecting_resolved() {
        let mut deck = deck();
        assert_eq!(deck.state(), DeckState::Empty);

        let ticket = deck.load(track());
        assert_eq!(deck.state(), DeckState::Detecting);
        assert_eq!(ticket.deck, deck.id());

        assert!(deck.resolve(ticket, decision(100)));
        assert_eq!(deck.state(), DeckState::Resolved);
        assert_eq!(deck.detected_tempo(), Bpm::new(100));
        assert_eq!(deck.tempo_source(), Some(TempoSource::IntervalHistogram));
    }

    #[test]
    fn stale_tickets_are_refused() {
        let mut deck = deck();
        let first = deck.load(track());
        let second = deck.load(track());

        assert!(!deck.resolve(first, decision(100)));
        assert_eq!(deck.state(), DeckState::Detecting);
        assert!(deck.resolve(second, decision(110)));
        assert!(!deck.resolve(second, decision(90)));
        assert_eq!(deck.detected_tempo(), Bpm::new(110));

        let third = deck.load(track());
        deck.clear();
        assert!(!deck.resolve(third, decision(100)));
        assert_eq!(deck.state(), DeckState::Empty);
    }

    #[test]
    fn override_input_rules() {
        let mut deck = deck();
        let ticket = deck.load(track());
        deck.resolve(ticket, decision(100));

        assert_eq!(deck.set_override_input("90"), OverrideChange::Set(Bpm::new(90).unwrap()));
        assert_eq!(deck.effective_tempo(), Bpm::new(90));

        assert_eq!(deck.set_override_input("300"), OverrideChange::Ignored);
        assert_eq!(deck.override_input(), "300");
        assert_eq!(deck.manual_override(), Bpm::new(90));

        assert_eq!(deck.set_override_input(""), OverrideChange::Cleared);
        assert_eq!(deck.effective_tempo(), Bpm::new(100));
        assert_eq!(deck.detected_tempo(), Bpm::new(100));
    }

    #[test]
    fn rate_follows_effective_tempo() {
        let mut deck = deck();
        assert_eq!(deck.sync_rate(global(140.0), 0.0), None);

        let ticket = deck.load(track());
        assert_eq!(deck.sync_rate(global(140.0), 0.0), None);
        assert_eq!(deck.playback_rate(), 1.0);

        deck.resolve(ticket, decision(100));
        assert_eq!(deck.sync_rate(global(140.0), 0.0), Some(1.4));
        assert_eq!(deck.sync_rate(global(140.0), 0.0), None);

        deck.set_override_input("70");
        assert_eq!(deck.sync_rate(global(140.0), 0.0), Some(2.0));
    }

    #[test]
    fn live_voice_gets_scheduled_rate() {
        let mut deck = deck();
        let ticket = deck.load(track());
        let buffer = Arc::clone(&deck.track().unwrap().buffer);
        deck.start(Box::new(BufferVoice::new(buffer, 8_000)), 0.0);
        assert!(deck.is_playing());
        assert_eq!(deck.voice().unwrap().rate(), 1.0);

        deck.resolve(ticket, decision(100));
        deck.sync_rate(global(120.0), 0.25);
        assert_eq!(deck.voice().unwrap().rate(), 1.2);
        assert!(deck.render(0.25, 16).is_some());
    }

    #[test]
    fn clear_resets_everything() {
        let mut deck = deck();
        let ticket = deck.load(track());
        deck.resolve(ticket, decision(100));
        deck.set_override_input("90");
        deck.sync_rate(global(180.0), 0.0);
        let buffer = Arc::clone(&deck.track().unwrap().buffer);
        deck.start(Box::new(BufferVoice::new(buffer, 8_000)), 0.0);

        deck.clear();

        assert_eq!(deck.state(), DeckState::Empty);
        assert!(deck.track().is_none());
        assert!(deck.detected_tempo().is_none());
        assert!(deck.manual_override().is_none());
        assert_eq!(deck.override_input(), "");
        assert_eq!(deck.playback_rate(), 1.0);
        assert!(deck.voice().is_none());
        assert!(!deck.is_playing());
        assert!(deck.render(0.0, 4).is_none());
    }
}
