use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use vocal_pitch::audio::{AudioSettings, DeviceProfile, StubBackend};
use vocal_pitch::config::AppConfig;
use vocal_pitch::engine::{NoopCallbacks, PitchEngine, PitchUpdate, StubTimeSource};
use vocal_pitch::managers::AudioManager;

#[derive(Parser, Debug)]
#[command(name = "pitch_cli", about = "Offline and live harness for the vocal pitch engine")]
struct Cli {
    /// JSON configuration file (defaults to assets/pitch_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a WAV file through the detection loop and print one JSON line per frame
    Analyze {
        wav: PathBuf,
        /// Samples fed between detection passes
        #[arg(long, default_value_t = 1024)]
        hop: usize,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Only emit frames with a detected pitch
        #[arg(long)]
        pitched_only: bool,
    },
    /// Detect from the default microphone
    Live {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Print the effective configuration
    DumpConfig,
}

#[derive(Serialize)]
struct FrameReport<'a> {
    time_s: f64,
    #[serde(flatten)]
    update: &'a PitchUpdate,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Analyze {
            wav,
            hop,
            output,
            pitched_only,
        } => run_analyze(&config, &wav, hop, output, pitched_only).await,
        Commands::Live { seconds } => run_live(&config, Duration::from_secs(seconds)).await,
        Commands::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Decode a WAV file to mono f32 samples.
fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

async fn run_analyze(
    config: &AppConfig,
    wav: &Path,
    hop: usize,
    output: Option<PathBuf>,
    pitched_only: bool,
) -> Result<ExitCode> {
    if hop == 0 {
        bail!("--hop must be at least 1");
    }
    let (samples, sample_rate) = read_wav(wav)?;
    tracing::info!(
        "Analyzing {} ({} samples at {} Hz)",
        wav.display(),
        samples.len(),
        sample_rate
    );

    // Enough pool capacity for one hop between passes
    let settings = AudioSettings {
        sample_rate,
        buffer_count: (hop / config.audio.block_size.max(1) + 2).max(config.audio.buffer_count),
        ..config.audio
    };
    let (backend, controls) = StubBackend::new();
    let audio = AudioManager::new(Arc::new(backend), DeviceProfile::pc(), settings);
    let clock = Arc::new(StubTimeSource::new());
    let mut engine =
        PitchEngine::with_time_source(audio, config, Box::new(NoopCallbacks), clock.clone());
    engine.initialize().await?;
    if !engine.start_detection() {
        bail!("detector did not become ready");
    }

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(&path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };

    let hop_duration = Duration::from_secs_f64(hop as f64 / f64::from(sample_rate));
    let mut fed = 0usize;
    let mut frames = 0usize;
    let mut pitched = 0usize;
    for chunk in samples.chunks(hop) {
        controls.feed(chunk);
        fed += chunk.len();
        if let Some(update) = engine.tick() {
            frames += 1;
            if update.frequency > 0.0 {
                pitched += 1;
            }
            if !pitched_only || update.frequency > 0.0 {
                let report = FrameReport {
                    time_s: fed as f64 / f64::from(sample_rate),
                    update: &update,
                };
                writeln!(writer, "{}", serde_json::to_string(&report)?)?;
            }
        }
        clock.advance(hop_duration);
    }
    writer.flush()?;
    engine.cleanup();

    tracing::info!("Processed {} frames, {} with pitch", frames, pitched);
    Ok(ExitCode::SUCCESS)
}

#[cfg(not(target_os = "android"))]
async fn run_live(config: &AppConfig, duration: Duration) -> Result<ExitCode> {
    use vocal_pitch::audio::CpalBackend;
    use vocal_pitch::managers::{LifecycleEvent, MicrophoneLifecycleManager};

    let audio = AudioManager::new(
        Arc::new(CpalBackend::new()),
        DeviceProfile::pc(),
        config.audio,
    );
    let lifecycle = MicrophoneLifecycleManager::new(audio.clone(), config.lifecycle);
    let mut events = lifecycle.subscribe();
    lifecycle.acquire().await?;

    let mut engine = PitchEngine::new(audio, config, Box::new(NoopCallbacks));
    engine.initialize().await?;
    if !engine.start_detection() {
        bail!("detector did not become ready");
    }

    let deadline = tokio::time::Instant::now() + duration;
    let mut ticker = tokio::time::interval(Duration::from_millis(5));
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        while let Ok(event) = events.try_recv() {
            match event {
                LifecycleEvent::Error(err) | LifecycleEvent::AutoRecoveryFailed(err) => {
                    tracing::warn!("Lifecycle: {}", err)
                }
                other => tracing::info!("Lifecycle: {:?}", other),
            }
        }
        if let Some(update) = engine.tick() {
            if update.frequency > 0.0 {
                lifecycle.record_activity();
                println!("{}", serde_json::to_string(&update)?);
            }
        }
    }

    tracing::info!("Stats: {:?}", engine.performance_stats());
    engine.cleanup();
    lifecycle.release()?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(target_os = "android")]
async fn run_live(_config: &AppConfig, _duration: Duration) -> Result<ExitCode> {
    bail!("live capture is not available on this platform");
}
