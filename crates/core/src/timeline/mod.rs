use std::time::Duration;

use tokio::task::JoinHandle;

use crate::{AudioGraph, MixerError, VisualFrame};

/// Audio clock, advanced by the number of frames the graph renders.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    pub time_seconds: f64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        self.time_seconds = 0.0;
    }

    pub fn advance(&mut self, delta: f64) {
        self.time_seconds = (self.time_seconds + delta).max(0.0);
    }
}

/// Which of the four beat lights is lit `elapsed` seconds after the
/// transport started at `bpm`.
pub fn beat_indicator(elapsed: f64, bpm: f64) -> u8 {
    if !(elapsed.is_finite() && bpm.is_finite()) || elapsed < 0.0 || bpm <= 0.0 {
        return 0;
    }
    let beats = (elapsed / (60.0 / bpm)).floor() as u64;
    (beats % 4) as u8
}

/// Periodic redraw task that samples the graph's analysis taps.
///
/// The task only reads taps. It stops on [`RedrawLoop::cancel`], when the
/// handle is dropped, or once the graph has been closed.
#[derive(Debug)]
pub struct RedrawLoop {
    handle: Option<JoinHandle<()>>,
}

impl RedrawLoop {
    /// Spawns the loop on the current tokio runtime.
    pub fn spawn<F>(graph: AudioGraph, period: Duration, mut on_frame: F) -> Self
    where
        F: FnMut(VisualFrame) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match graph.snapshot() {
                    Ok(frame) => on_frame(frame),
                    Err(MixerError::GraphClosed) => {
                        tracing::debug!("audio graph closed, stopping redraw loop");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(%err, "redraw loop stopped");
                        break;
                    }
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Stops the loop. No callback runs after this returns control to the
    /// runtime.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Waits for the loop to end on its own.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RedrawLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::AudioConfig;

    fn graph() -> AudioGraph {
        AudioGraph::new(&AudioConfig::default(), 2).unwrap()
    }

    #[test]
    fn clock_never_goes_negative() {
        let mut clock = PlaybackClock::default();
        clock.advance(0.5);
        clock.advance(-2.0);
        assert_eq!(clock.time_seconds, 0.0);
        clock.advance(1.25);
        clock.reset();
        assert_eq!(clock.time_seconds, 0.0);
    }

    #[test]
    fn beat_light_cycles_through_four() {
        assert_eq!(beat_indicator(0.0, 120.0), 0);
        assert_eq!(beat_indicator(0.49, 120.0), 0);
        assert_eq!(beat_indicator(0.5, 120.0), 1);
        assert_eq!(beat_indicator(1.6, 120.0), 3);
        assert_eq!(beat_indicator(2.0, 120.0), 0);
        assert_eq!(beat_indicator(1.0, 0.0), 0);
        assert_eq!(beat_indicator(-1.0, 120.0), 0);
    }

    #[tokio::test]
    async fn delivers_frames_until_cancelled() {
        let graph = graph();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut redraw = RedrawLoop::spawn(graph.clone(), Duration::from_millis(5), move |frame| {
            let _ = tx.send(frame.decks.len());
        });

        let decks = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(decks, Some(2));
        assert!(redraw.is_running());

        redraw.cancel();
        assert!(!redraw.is_running());
        // The sender lives in the aborted task, so the channel closes.
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }

    #[tokio::test]
    async fn stops_when_graph_closes() {
        let graph = graph();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let redraw = RedrawLoop::spawn(graph.clone(), Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        graph.close().unwrap();
        let joined = tokio::time::timeout(Duration::from_secs(2), redraw.join()).await;
        assert!(joined.is_ok());

        let after = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after);
    }
}
