//! Headless host for the flux engine: offline WAV rendering, live playback and
//! device listing.

mod patch;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use flux_backend::{Engine, EngineHandle, MemorySink};
use flux_core::EngineConfig;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use patch::{Arpeggio, DEFAULT_NOTES, Preset};

#[derive(Parser)]
#[command(name = "flux")]
#[command(about = "Real-time additive synthesis engine", long_about = None)]
struct Cli {
    /// Engine configuration (JSON); flags below override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sample rate in Hz
    #[arg(long, global = true)]
    sample_rate: Option<u32>,

    /// Samples per renderer block
    #[arg(long, global = true)]
    block_size: Option<usize>,

    /// Voice pool capacity
    #[arg(long, global = true)]
    voices: Option<usize>,

    /// Voices evaluated by each worker thread
    #[arg(long, global = true)]
    voices_per_worker: Option<usize>,

    /// Base seed for per-voice random generators
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a demo patch to a 16-bit mono WAV file
    Render {
        /// Output WAV file path
        output: PathBuf,

        /// Duration in seconds
        #[arg(short, long, default_value = "4.0")]
        duration: f64,

        #[arg(short, long, value_enum, default_value = "drone")]
        preset: Preset,

        /// Notes in Hz, one voice each (default: an A minor chord)
        #[arg(short, long, value_delimiter = ',')]
        notes: Vec<f64>,
    },

    /// Play a demo patch on an output device
    Play {
        /// Duration in seconds
        #[arg(short, long, default_value = "4.0")]
        duration: f64,

        #[arg(short, long, value_enum, default_value = "drone")]
        preset: Preset,

        #[arg(short, long, value_delimiter = ',')]
        notes: Vec<f64>,

        /// Output device name (partial match)
        #[arg(long)]
        device: Option<String>,
    },

    /// List output devices
    Devices,

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Render {
            output,
            duration,
            preset,
            notes,
        } => render(config, &output, duration, preset, &notes),
        Commands::Play {
            duration,
            preset,
            notes,
            device,
        } => play(config, duration, preset, &notes, device),
        Commands::Devices => list_devices(),
        Commands::Config => {
            println!("{}", config.to_json_string()?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(rate) = cli.sample_rate {
        config = config.with_sample_rate(rate);
    }
    if let Some(size) = cli.block_size {
        config = config.with_block_size(size);
    }
    if let Some(voices) = cli.voices {
        config = config.with_voices(voices);
    }
    if let Some(per_worker) = cli.voices_per_worker {
        config = config.with_voices_per_worker(per_worker);
    }
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    config.validate()?;
    Ok(config)
}

fn log_host(config: &EngineConfig) {
    let system =
        System::new_with_specifics(RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()));
    let cpus = system.cpus().len();
    let workers = config.voices.div_ceil(config.voices_per_worker.max(1));
    info!(
        os = %System::name().unwrap_or_else(|| "unknown".to_string()),
        cpus,
        "host"
    );
    if config.voices > config.voices_per_worker && workers + 2 > cpus {
        warn!(workers, cpus, "more pipeline threads than CPUs; consider raising voices_per_worker");
    }
}

fn build_engine(
    config: EngineConfig,
    preset: Preset,
    notes: &[f64],
) -> anyhow::Result<Engine> {
    log_host(&config);
    let notes = if notes.is_empty() { &DEFAULT_NOTES[..] } else { notes };
    let sample_rate = config.sample_rate;

    let mut engine = Engine::new(config)?;
    let loaded = patch::load(&engine, preset, notes)?;
    if preset == Preset::Pluck {
        // an eighth of a second per note
        engine.set_automation(Arpeggio::new(sample_rate / 8));
    }
    info!(voices = loaded, ?preset, "patch loaded");
    Ok(engine)
}

fn report(handle: &EngineHandle) {
    let snap = handle.diagnostics(false);
    info!(
        steps = snap.producer_steps,
        producer_wait_ratio = format!("{:.3}", snap.producer_wait_ratio()),
        renderer_wait_ratio = format!("{:.3}", snap.renderer_wait_ratio()),
        frames = snap.frames_consumed,
        load_percent = format!("{:.1}", snap.avg_load_percent),
        "pipeline"
    );
    if handle.take_clipped() {
        warn!("output clipped");
    }
    if handle.take_glitched() {
        warn!("audio glitches detected");
    }
}

fn render(
    config: EngineConfig,
    output: &Path,
    duration: f64,
    preset: Preset,
    notes: &[f64],
) -> anyhow::Result<()> {
    let sample_rate = config.sample_rate;
    let mut engine = build_engine(config, preset, notes)?;

    let samples = (duration.max(0.0) * sample_rate as f64) as usize;
    let mut sink = MemorySink::new();
    let capture = sink.capture();
    engine.render_offline(&mut sink, samples)?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("creating {}", output.display()))?;
    for sample in capture.samples().into_iter().take(samples) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    report(&engine.handle());
    info!(path = %output.display(), samples, "wrote WAV");
    Ok(())
}

#[cfg(feature = "device")]
fn play(
    config: EngineConfig,
    duration: f64,
    preset: Preset,
    notes: &[f64],
    device: Option<String>,
) -> anyhow::Result<()> {
    use std::time::Duration;

    use flux_backend::DeviceSink;

    let engine = build_engine(config, preset, notes)?;
    let sink = match device {
        Some(name) => DeviceSink::named(name),
        None => DeviceSink::new(),
    };
    let running = engine.start(sink)?;

    let mut remaining = duration.max(0.0);
    while remaining > 0.0 {
        let slice = remaining.min(1.0);
        std::thread::sleep(Duration::from_secs_f64(slice));
        remaining -= slice;
        report(&running.handle);
    }
    // pipeline threads run until the process exits
    info!(ticks = running.handle.ticks_rendered(), "playback finished");
    Ok(())
}

#[cfg(not(feature = "device"))]
fn play(
    _config: EngineConfig,
    _duration: f64,
    _preset: Preset,
    _notes: &[f64],
    _device: Option<String>,
) -> anyhow::Result<()> {
    anyhow::bail!("flux was built without the `device` feature; use `render` instead")
}

#[cfg(feature = "device")]
fn list_devices() -> anyhow::Result<()> {
    for device in flux_backend::list_output_devices()? {
        println!("{device}");
        println!("    sample rates: {:?}", device.supported_sample_rates);
    }
    Ok(())
}

#[cfg(not(feature = "device"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("flux was built without the `device` feature")
}
