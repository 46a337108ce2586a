//! Core library for the Deck Mixer.
//!
//! Eight decks play looped tracks against one global tempo. Each deck's
//! tempo is detected from its filename and its audio, and every deck is
//! brought to the global tempo by changing its playback rate. Each module
//! owns one concern (detection, rate sync, deck state, the shared audio
//! graph, visualization taps) and the [`Mixer`] ties them together.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod deck;
pub mod error;
pub mod mixer;
pub mod sync;
pub mod tempo;
pub mod timeline;

pub use analysis::{amplitude_to_db, AnalysisFrame, AnalysisTap, PeakHold};
pub use audio::{AudioGraph, BufferVoice, SampleBuffer, Track, VisualFrame, Voice};
pub use config::{AppConfig, AudioConfig, DetectorConfig, MixerConfig};
pub use deck::{Deck, DeckId, DeckState, DetectionTicket, OverrideChange};
pub use error::{MixerError, Result};
pub use mixer::{DetectionJob, DetectionOutcome, Mixer, MixerEvent};
pub use sync::{compute_rate, effective_tempo, rate_for, GlobalTempo};
pub use tempo::{
    detect_tempo, extract_bpm, parse_manual_override, Bpm, TempoDecision, TempoDetector,
    TempoSource,
};
pub use timeline::{beat_indicator, PlaybackClock, RedrawLoop};
