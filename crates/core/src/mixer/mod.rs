//! The mixer: every deck, the global transport and the shared audio graph.
//!
//! A single owner drives the [`Mixer`] from its event loop. Tempo detection
//! runs as tokio tasks; their results come back as [`DetectionOutcome`]s and
//! are applied with [`Mixer::apply_detection`], which drops anything that
//! belongs to an earlier load of the deck.

use std::sync::Arc;

use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{
    beat_indicator, AppConfig, AudioGraph, BufferVoice, Deck, DeckId, DeckState, DetectionTicket,
    GlobalTempo, MixerError, OverrideChange, Result, TempoDecision, TempoDetector, Track,
};

/// Delay between pressing play and the first rendered sample, in seconds.
const START_LEAD_SECONDS: f64 = 0.01;

/// Notifications published to subscribers after the mixer state changed.
#[derive(Debug, Clone, PartialEq)]
pub enum MixerEvent {
    TrackLoaded { deck: DeckId, filename: String },
    TempoResolved { deck: DeckId, decision: TempoDecision },
    RateChanged { deck: DeckId, rate: f64 },
    /// A running detection was abandoned by a reload or clear.
    DetectionDiscarded { deck: DeckId },
    Cleared { deck: DeckId },
    GlobalTempoChanged { bpm: f64 },
}

/// Finished detection waiting to be applied.
#[derive(Debug, Clone, Copy)]
pub struct DetectionOutcome {
    pub ticket: DetectionTicket,
    pub decision: TempoDecision,
}

/// Handle on a running detection task.
#[derive(Debug)]
pub struct DetectionJob {
    ticket: DetectionTicket,
    handle: JoinHandle<TempoDecision>,
}

impl DetectionJob {
    pub fn ticket(&self) -> DetectionTicket {
        self.ticket
    }

    /// Waits for the task. Returns `None` when it was aborted.
    pub async fn wait(self) -> Option<DetectionOutcome> {
        match self.handle.await {
            Ok(decision) => Some(DetectionOutcome {
                ticket: self.ticket,
                decision,
            }),
            Err(err) if err.is_cancelled() => {
                tracing::debug!(deck = %self.ticket.deck, "detection aborted");
                None
            }
            Err(err) => {
                tracing::warn!(deck = %self.ticket.deck, %err, "detection task failed");
                None
            }
        }
    }
}

/// Decks plus global transport.
#[derive(Debug)]
pub struct Mixer {
    decks: Vec<Deck>,
    global: GlobalTempo,
    graph: AudioGraph,
    detector: TempoDetector,
    playing: bool,
    transport_started: f64,
    subscribers: Vec<UnboundedSender<MixerEvent>>,
}

impl Mixer {
    /// Builds a mixer around an existing audio graph. The graph should carry
    /// one analysis tap per deck.
    pub fn new(config: &AppConfig, graph: AudioGraph) -> Result<Self> {
        let deck_count = config.mixer.deck_count;
        if deck_count == 0 || DeckId::new(deck_count).is_none() {
            return Err(MixerError::InvalidInput("deck count must be between 1 and 255"));
        }
        let global = GlobalTempo::new(config.mixer.global_bpm)?;
        let decks = (0..deck_count)
            .filter_map(DeckId::from_index)
            .map(Deck::new)
            .collect();

        Ok(Self {
            decks,
            global,
            graph,
            detector: TempoDetector::new(config.tempo.clone()),
            playing: false,
            transport_started: 0.0,
            subscribers: Vec::new(),
        })
    }

    /// Registers a new event receiver.
    pub fn subscribe(&mut self) -> UnboundedReceiver<MixerEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn deck(&self, id: DeckId) -> Result<&Deck> {
        self.decks
            .get(id.index())
            .ok_or(MixerError::UnknownDeck(id.number()))
    }

    pub fn decks(&self) -> &[Deck] {
        &self.decks
    }

    pub fn global_tempo(&self) -> GlobalTempo {
        self.global
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Loads `track` into a deck and starts detecting its tempo.
    ///
    /// Whatever the deck held before is cleared, including a detection that
    /// is still running. Must be called from within a tokio runtime.
    pub fn load_track(&mut self, id: DeckId, track: Track) -> Result<DetectionJob> {
        let detector = self.detector.clone();
        let buffer = Arc::clone(&track.buffer);
        let filename = track.filename.clone();

        let deck = self.deck_mut(id)?;
        let abandoned = deck.state() == DeckState::Detecting;
        let ticket = deck.load(track);

        let name = filename.clone();
        let handle = tokio::spawn(async move { detector.detect(buffer, &name).await });
        deck.attach_detection(handle.abort_handle());

        tracing::info!(deck = %id, filename = %filename, "track loaded");
        self.reset_tap(id);
        if abandoned {
            self.notify(MixerEvent::DetectionDiscarded { deck: id });
        }
        self.notify(MixerEvent::TrackLoaded { deck: id, filename });

        Ok(DetectionJob { ticket, handle })
    }

    /// Applies a finished detection. Returns `false` when the result was
    /// stale and has been dropped.
    pub fn apply_detection(&mut self, outcome: DetectionOutcome) -> Result<bool> {
        let DetectionOutcome { ticket, decision } = outcome;
        let now = self.graph.current_time()?;
        let global = self.global;

        let deck = self.deck_mut(ticket.deck)?;
        if !deck.resolve(ticket, decision) {
            tracing::debug!(deck = %ticket.deck, "dropping stale detection result");
            return Ok(false);
        }
        let rate = deck.sync_rate(global, now);

        tracing::info!(
            deck = %ticket.deck,
            bpm = %decision.bpm,
            source = ?decision.source,
            "tempo resolved"
        );
        self.notify(MixerEvent::TempoResolved {
            deck: ticket.deck,
            decision,
        });
        if let Some(rate) = rate {
            self.notify(MixerEvent::RateChanged {
                deck: ticket.deck,
                rate,
            });
        }
        Ok(true)
    }

    /// Waits for every job and applies the results in order. Returns how
    /// many were applied.
    pub async fn resolve_all(&mut self, jobs: impl IntoIterator<Item = DetectionJob>) -> Result<usize> {
        let mut applied = 0;
        for job in jobs {
            if let Some(outcome) = job.wait().await {
                if self.apply_detection(outcome)? {
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }

    /// Changes the transport tempo and re-derives every deck's rate.
    pub fn set_global_tempo(&mut self, tempo: GlobalTempo) -> Result<()> {
        self.global = tempo;
        tracing::debug!(bpm = tempo.bpm(), "global tempo changed");
        self.notify(MixerEvent::GlobalTempoChanged { bpm: tempo.bpm() });
        self.sync_all()
    }

    /// Feeds the text of the transport tempo field. Returns the tempo that
    /// was applied, if any.
    pub fn set_global_tempo_input(&mut self, input: &str) -> Result<Option<GlobalTempo>> {
        match GlobalTempo::parse_input(input) {
            Some(tempo) => {
                self.set_global_tempo(tempo)?;
                Ok(Some(tempo))
            }
            None => Ok(None),
        }
    }

    /// Feeds the text of a deck's manual tempo field.
    pub fn set_manual_override(&mut self, id: DeckId, input: &str) -> Result<OverrideChange> {
        let now = self.graph.current_time()?;
        let global = self.global;
        let deck = self.deck_mut(id)?;

        let change = deck.set_override_input(input);
        if change == OverrideChange::Ignored {
            tracing::debug!(deck = %id, input, "ignoring manual tempo");
            return Ok(change);
        }
        if let Some(rate) = deck.sync_rate(global, now) {
            self.notify(MixerEvent::RateChanged { deck: id, rate });
        }
        Ok(change)
    }

    /// Empties a deck, abandoning its detection if one is running.
    pub fn clear_deck(&mut self, id: DeckId) -> Result<()> {
        let deck = self.deck_mut(id)?;
        let abandoned = deck.state() == DeckState::Detecting;
        deck.clear();

        tracing::info!(deck = %id, "deck cleared");
        self.reset_tap(id);
        if abandoned {
            self.notify(MixerEvent::DetectionDiscarded { deck: id });
        }
        self.notify(MixerEvent::Cleared { deck: id });
        Ok(())
    }

    /// Starts every loaded deck at its current rate. Decks loaded while the
    /// transport runs wait for the next play.
    pub fn play(&mut self) -> Result<()> {
        if self.playing {
            return Ok(());
        }
        let when = self.graph.current_time()? + START_LEAD_SECONDS;
        let output_rate = self.graph.sample_rate();

        for deck in &mut self.decks {
            let Some(buffer) = deck.track().map(|track| Arc::clone(&track.buffer)) else {
                continue;
            };
            deck.start(Box::new(BufferVoice::new(buffer, output_rate)), when);
        }

        self.playing = true;
        self.transport_started = when;
        tracing::info!(at = when, "transport started");
        Ok(())
    }

    pub fn stop(&mut self) {
        for deck in &mut self.decks {
            deck.stop();
        }
        if self.playing {
            tracing::info!("transport stopped");
        }
        self.playing = false;
    }

    /// Renders `frames` samples from every playing deck, feeds the analysis
    /// taps and advances the audio clock. Returns the new clock time.
    pub fn process(&mut self, frames: usize) -> Result<f64> {
        let now = self.graph.current_time()?;
        let mut master = vec![0.0_f32; frames];
        let mut blocks = Vec::new();

        for (index, deck) in self.decks.iter_mut().enumerate() {
            if let Some(block) = deck.render(now, frames) {
                for (mixed, sample) in master.iter_mut().zip(&block) {
                    *mixed += sample;
                }
                blocks.push((index, block));
            }
        }

        self.graph.feed(&blocks, &master)?;
        self.graph.advance(frames)
    }

    /// Lit beat light, or `None` while the transport is stopped.
    pub fn current_beat(&self) -> Result<Option<u8>> {
        if !self.playing {
            return Ok(None);
        }
        let elapsed = (self.graph.current_time()? - self.transport_started).max(0.0);
        Ok(Some(beat_indicator(elapsed, self.global.bpm())))
    }

    /// Stops playback, empties every deck and closes the audio graph.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop();
        for deck in &mut self.decks {
            deck.clear();
        }
        self.subscribers.clear();
        self.graph.close()
    }

    fn sync_all(&mut self) -> Result<()> {
        let now = self.graph.current_time()?;
        let global = self.global;
        let changes: Vec<_> = self
            .decks
            .iter_mut()
            .filter_map(|deck| deck.sync_rate(global, now).map(|rate| (deck.id(), rate)))
            .collect();

        for (deck, rate) in changes {
            tracing::debug!(%deck, rate, "playback rate changed");
            self.notify(MixerEvent::RateChanged { deck, rate });
        }
        Ok(())
    }

    fn deck_mut(&mut self, id: DeckId) -> Result<&mut Deck> {
        self.decks
            .get_mut(id.index())
            .ok_or(MixerError::UnknownDeck(id.number()))
    }

    fn reset_tap(&self, id: DeckId) {
        if let Err(err) = self.graph.reset_deck(id.index()) {
            tracing::debug!(deck = %id, %err, "could not reset analysis tap");
        }
    }

    fn notify(&mut self, event: MixerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
