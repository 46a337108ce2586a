use std::{path::Path, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use deck_mixer_core::{
    AppConfig, AudioGraph, DeckId, GlobalTempo, Mixer, MixerError, PeakHold, RedrawLoop,
    SampleBuffer, TempoDetector, Track, VisualFrame,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> deck_mixer_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Detect { files, json } => run_detect(&config, &files, json).await,
        Commands::Session {
            global,
            seconds,
            files,
        } => run_session(&config, global, seconds, &files).await,
    }
}

async fn run_detect(config: &AppConfig, files: &[PathBuf], json: bool) -> deck_mixer_core::Result<()> {
    let detector = TempoDetector::new(config.tempo.clone());

    let mut pending = Vec::with_capacity(files.len());
    for path in files {
        let track = decode_track(path)?;
        let detector = detector.clone();
        pending.push(tokio::spawn(async move {
            let decision = detector.detect(track.buffer, &track.filename).await;
            (track.filename, decision)
        }));
    }

    let mut reports = Vec::with_capacity(pending.len());
    for task in pending {
        let (filename, decision) = task.await.map_err(|err| MixerError::msg(err.to_string()))?;
        reports.push(serde_json::json!({
            "file": filename,
            "bpm": decision.bpm,
            "source": decision.source,
            "filename_guess": decision.filename_guess,
        }));
        if !json {
            println!("{:>4} bpm  {:<24} {}", decision.bpm.get(), format!("{:?}", decision.source), filename);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(())
}

async fn run_session(
    config: &AppConfig,
    global: f64,
    seconds: f64,
    files: &[PathBuf],
) -> deck_mixer_core::Result<()> {
    let deck_count = config.mixer.deck_count;
    if files.len() > deck_count {
        tracing::warn!(files = files.len(), deck_count, "more files than decks, extra files are skipped");
    }

    let graph = AudioGraph::new(&config.audio, deck_count)?;
    let mut mixer = Mixer::new(config, graph.clone())?;

    let mut jobs = Vec::new();
    for (index, path) in files.iter().take(deck_count).enumerate() {
        let id = DeckId::from_index(index).ok_or(MixerError::UnknownDeck(index + 1))?;
        jobs.push(mixer.load_track(id, decode_track(path)?)?);
    }
    let resolved = mixer.resolve_all(jobs).await?;
    tracing::info!(resolved, "tempo detection finished");

    mixer.set_global_tempo(GlobalTempo::new(global)?)?;

    let redraw_hz = config.audio.redraw_hz.max(1);
    let period = Duration::from_secs_f64(1.0 / redraw_hz as f64);
    let mut meter = PeakHold::new();
    let mut redraw = RedrawLoop::spawn(graph.clone(), period, move |frame: VisualFrame| {
        let held = meter.update(frame.master.peak, frame.master.time);
        tracing::debug!(
            time = frame.master.time,
            rms = frame.master.rms,
            peak_db = deck_mixer_core::amplitude_to_db(held),
            "master meter"
        );
    });

    mixer.play()?;
    let block = (config.audio.sample_rate / redraw_hz).max(1) as usize;
    let mut ticker = tokio::time::interval(period);
    let mut now = 0.0;
    while now < seconds {
        ticker.tick().await;
        now = mixer.process(block)?;
        if let Some(beat) = mixer.current_beat()? {
            tracing::trace!(beat, "beat");
        }
    }
    mixer.stop();
    redraw.cancel();

    print_rate_table(&mixer);
    mixer.shutdown()
}

fn print_rate_table(mixer: &Mixer) {
    println!("global tempo: {} bpm", mixer.global_tempo());
    println!("{:<5} {:>8} {:>9} {:>6}  file", "deck", "detected", "effective", "rate");
    for deck in mixer.decks() {
        let Some(filename) = deck.filename() else {
            continue;
        };
        let show = |bpm: Option<deck_mixer_core::Bpm>| bpm.map_or_else(|| "-".to_string(), |bpm| bpm.to_string());
        println!(
            "{:<5} {:>8} {:>9} {:>6.3}  {}",
            deck.id().number(),
            show(deck.detected_tempo()),
            show(deck.effective_tempo()),
            deck.playback_rate(),
            filename
        );
    }
}

/// Decodes a WAV file into a track named after the file.
fn decode_track(path: &Path) -> deck_mixer_core::Result<Track> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut reader = hound::WavReader::open(path).map_err(|err| MixerError::decode(&name, err))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|err| MixerError::decode(&name, err))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|err| MixerError::decode(&name, err))?
        }
    };

    let buffer = SampleBuffer::from_interleaved(&samples, spec.channels as usize, spec.sample_rate as f64)?;
    tracing::info!(
        file = %name,
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        seconds = buffer.duration_seconds(),
        "decoded"
    );
    Ok(Track::new(name, buffer))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Tempo-synchronized eight deck mixer", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect the tempo of each file.
    Detect {
        files: Vec<PathBuf>,
        /// Print the results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load files onto decks, sync them to a global tempo and play a short
    /// session.
    Session {
        /// Global tempo in BPM.
        #[arg(short, long, default_value_t = 120.0)]
        global: f64,
        /// Seconds of audio to render.
        #[arg(short, long, default_value_t = 2.0)]
        seconds: f64,
        files: Vec<PathBuf>,
    },
}
