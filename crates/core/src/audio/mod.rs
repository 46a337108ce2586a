use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};

use crate::{AnalysisFrame, AnalysisTap, AudioConfig, MixerError, PlaybackClock, Result};

/// Decoded audio, immutable once built.
#[derive(Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: f64,
}

impl SampleBuffer {
    /// Builds a buffer from per-channel samples. Every channel must have the
    /// same length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: f64) -> Result<Self> {
        if let Some(first) = channels.first() {
            if channels.iter().any(|channel| channel.len() != first.len()) {
                return Err(MixerError::InvalidInput(
                    "all channels of a buffer must have the same length",
                ));
            }
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: f64) -> Self {
        Self {
            channels: vec![samples],
            sample_rate,
        }
    }

    /// Splits interleaved frames into channels. A trailing partial frame is
    /// dropped.
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: f64) -> Result<Self> {
        if channel_count == 0 {
            return Err(MixerError::InvalidInput("a buffer needs at least one channel"));
        }
        let mut channels = vec![Vec::with_capacity(samples.len() / channel_count); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Samples of channel `index`; empty when the channel does not exist.
    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.len() as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("channels", &self.channels.len())
            .field("frames", &self.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// A decoded file together with the name it was loaded from.
#[derive(Debug, Clone)]
pub struct Track {
    pub filename: String,
    pub buffer: Arc<SampleBuffer>,
}

impl Track {
    pub fn new(filename: impl Into<String>, buffer: SampleBuffer) -> Self {
        Self {
            filename: filename.into(),
            buffer: Arc::new(buffer),
        }
    }
}

/// Snapshot of every analysis tap in the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualFrame {
    pub master: AnalysisFrame,
    pub decks: Vec<AnalysisFrame>,
}

/// Shared audio graph handle: the audio clock plus the master and per-deck
/// analysis taps.
///
/// The handle is passed explicitly to whoever needs it and is cheap to
/// clone. [`AudioGraph::close`] releases the taps; afterwards feeding or
/// sampling the graph fails with [`MixerError::GraphClosed`].
#[derive(Clone)]
pub struct AudioGraph {
    sample_rate: u32,
    shared: Arc<Mutex<GraphState>>,
}

struct GraphState {
    clock: PlaybackClock,
    master: Option<AnalysisTap>,
    decks: Vec<AnalysisTap>,
}

impl AudioGraph {
    pub fn new(config: &AudioConfig, deck_count: usize) -> Result<Self> {
        if config.sample_rate == 0 {
            return Err(MixerError::InvalidInput("sample rate must be positive"));
        }
        let master = AnalysisTap::new(config.sample_rate, config.fft_size)?;
        let decks = (0..deck_count)
            .map(|_| AnalysisTap::new(config.sample_rate, config.fft_size))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sample_rate: config.sample_rate,
            shared: Arc::new(Mutex::new(GraphState {
                clock: PlaybackClock::default(),
                master: Some(master),
                decks,
            })),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current audio clock time in seconds.
    pub fn current_time(&self) -> Result<f64> {
        Ok(self.lock()?.clock.time_seconds)
    }

    /// Moves the audio clock forward by `frames` and returns the new time.
    pub fn advance(&self, frames: usize) -> Result<f64> {
        let mut state = self.lock()?;
        state.clock.advance(frames as f64 / self.sample_rate as f64);
        Ok(state.clock.time_seconds)
    }

    /// Pushes rendered deck blocks (by deck index) and the master mix into
    /// their taps. Nothing is written when any index is unknown.
    pub fn feed(&self, deck_blocks: &[(usize, Vec<f32>)], master: &[f32]) -> Result<()> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let master_tap = state.master.as_mut().ok_or(MixerError::GraphClosed)?;
        if let Some((index, _)) = deck_blocks
            .iter()
            .find(|(index, _)| *index >= state.decks.len())
        {
            return Err(MixerError::UnknownDeck(index + 1));
        }

        for (index, block) in deck_blocks {
            state.decks[*index].push(block);
        }
        master_tap.push(master);
        Ok(())
    }

    /// Clears one deck's tap, e.g. after the deck was emptied.
    pub fn reset_deck(&self, index: usize) -> Result<()> {
        let mut state = self.lock()?;
        if state.master.is_none() {
            return Err(MixerError::GraphClosed);
        }
        if let Some(tap) = state.decks.get_mut(index) {
            tap.reset();
        }
        Ok(())
    }

    /// Reads every tap. Does not touch playback state.
    pub fn snapshot(&self) -> Result<VisualFrame> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let master = state.master.as_mut().ok_or(MixerError::GraphClosed)?.frame()?;
        let decks = state
            .decks
            .iter_mut()
            .map(AnalysisTap::frame)
            .collect::<Result<Vec<_>>>()?;
        Ok(VisualFrame { master, decks })
    }

    /// Tears down the graph and releases every tap.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.master.take().is_some() {
            tracing::info!("audio graph closed");
        }
        state.decks.clear();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|state| state.master.is_none()).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, GraphState>> {
        self.shared
            .lock()
            .map_err(|_| MixerError::msg("audio graph has been poisoned"))
    }
}

impl fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioGraph")
            .field("sample_rate", &self.sample_rate)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A playing instance of a track.
///
/// Rate changes are scheduled against the audio clock and take effect at the
/// next render at or after `when`; they never move the play position.
pub trait Voice: Send + fmt::Debug {
    fn start(&mut self, when: f64, rate: f64);
    fn stop(&mut self);
    fn set_rate_at(&mut self, rate: f64, when: f64);
    /// Most recently requested playback rate.
    fn rate(&self) -> f64;
    fn position_seconds(&self) -> f64;
    fn is_playing(&self) -> bool;
    /// Renders `frames` output samples starting at audio time `now`.
    fn render(&mut self, now: f64, frames: usize) -> Vec<f32>;
}

/// Looping voice over channel 0 of a buffer, resampled by linear
/// interpolation.
#[derive(Debug)]
pub struct BufferVoice {
    buffer: Arc<SampleBuffer>,
    output_rate: f64,
    position: f64,
    applied_rate: f64,
    pending: Option<(f64, f64)>,
    start_at: f64,
    playing: bool,
}

impl BufferVoice {
    pub fn new(buffer: Arc<SampleBuffer>, output_rate: u32) -> Self {
        Self {
            buffer,
            output_rate: output_rate.max(1) as f64,
            position: 0.0,
            applied_rate: 1.0,
            pending: None,
            start_at: 0.0,
            playing: false,
        }
    }

    /// Rate currently used for rendering.
    pub fn applied_rate(&self) -> f64 {
        self.applied_rate
    }

    fn sample_at(&self, position: f64) -> f32 {
        let samples = self.buffer.channel(0);
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;
        let current = samples[index % samples.len()];
        let next = samples[(index + 1) % samples.len()];
        current + (next - current) * frac
    }
}

impl Voice for BufferVoice {
    fn start(&mut self, when: f64, rate: f64) {
        self.position = 0.0;
        self.applied_rate = rate;
        self.pending = None;
        self.start_at = when;
        self.playing = true;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.pending = None;
    }

    fn set_rate_at(&mut self, rate: f64, when: f64) {
        self.pending = Some((rate, when));
    }

    fn rate(&self) -> f64 {
        self.pending.map_or(self.applied_rate, |(rate, _)| rate)
    }

    fn position_seconds(&self) -> f64 {
        let source_rate = self.buffer.sample_rate();
        if source_rate > 0.0 {
            self.position / source_rate
        } else {
            0.0
        }
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn render(&mut self, now: f64, frames: usize) -> Vec<f32> {
        let len = self.buffer.len();
        if !self.playing || now < self.start_at || len == 0 {
            return vec![0.0; frames];
        }
        if let Some((rate, when)) = self.pending {
            if now >= when {
                self.applied_rate = rate;
                self.pending = None;
            }
        }

        let step = self.applied_rate * self.buffer.sample_rate() / self.output_rate;
        let mut out = Vec::with_capacity(frames);
        for _ in 0..frames {
            out.push(self.sample_at(self.position));
            self.position = (self.position + step) % len as f64;
        }
        out
    }
}
