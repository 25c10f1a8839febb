use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use aurora_core::{
    config::CenterImageConfig,
    record::FrameSink,
    timeline::{TimeSource, WallTime},
    AppConfig, AudioSource, AuroraError, DrawFrame, FeatureExtractor, Hop,
    JsonLinesEncoder, LiveFeed, MemorySource, Renderer, Scheduler, SchedulerState, VisualMode,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod decode;

fn main() -> aurora_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live { input, visual } => run_live(&input, &visual),
        Commands::Export {
            input,
            output,
            duration,
            visual,
        } => run_export(&input, &output, duration, &visual),
        Commands::Analyse {
            input,
            output,
            config,
        } => run_analyse(&input, output.as_deref(), config.as_deref()),
    }
}

fn run_live(input: &Path, visual: &VisualArgs) -> aurora_core::Result<()> {
    let config = visual.resolve(false)?;
    let mut track = decode::read_wav(input)?;
    let sample_rate = track.sample_rate();
    tracing::info!(?input, fps = config.live.fps, "starting live mode");

    let capacity = (config.audio.live_buffer_seconds * sample_rate as f32) as usize;
    let (writer, reader) = LiveFeed::channel(sample_rate, capacity);

    let mut scheduler = Scheduler::new(config.clone());
    let control = scheduler.control();
    let acquisition = thread::Builder::new()
        .name("aurora-acquire".into())
        .spawn(move || -> aurora_core::Result<()> {
            // Stream the decoded track at its natural rate, 10ms at a time.
            let chunk = (sample_rate as usize / 100).max(1);
            let started = Instant::now();
            let mut pushed = 0_u64;
            while control.state() != SchedulerState::Stopped {
                match track.next_hop(chunk)? {
                    Hop::Samples(samples) => {
                        writer.push(&samples)?;
                        pushed += samples.len() as u64;
                        let due = Duration::from_secs_f64(pushed as f64 / sample_rate as f64);
                        if let Some(wait) = due.checked_sub(started.elapsed()) {
                            thread::sleep(wait);
                        }
                    }
                    Hop::EndOfStream => break,
                }
            }
            writer.close()
        })?;

    let renderer = TraceRenderer::default();
    let sink = FrameSink::live(
        renderer,
        config.live.queue_depth,
        Duration::from_millis(config.live.render_timeout_ms),
    )?;
    let time: Box<dyn TimeSource> = Box::new(WallTime::new());
    let session = scheduler.live_session(reader, sink, time)?;
    let outcome = scheduler.run_live(session);

    match acquisition.join() {
        Ok(Err(err)) => tracing::warn!(%err, "audio acquisition failed"),
        Err(_) => tracing::warn!("audio acquisition thread panicked"),
        Ok(Ok(())) => {}
    }

    let report = outcome?;
    tracing::info!(
        frames = report.frames_emitted,
        dropped = report.frames_dropped,
        underruns = report.underruns,
        timed_out = report.sink.timed_out,
        "live mode finished"
    );
    Ok(())
}

fn run_export(
    input: &Path,
    output: &Path,
    duration: Option<f64>,
    visual: &VisualArgs,
) -> aurora_core::Result<()> {
    let mut config = visual.resolve(true)?;
    if duration.is_some() {
        config.export.duration_seconds = duration;
    }
    let mut track = decode::read_wav(input)?;
    tracing::info!(?input, ?output, fps = config.export.fps, "running export");

    let file = BufWriter::new(File::create(output)?);
    let sink = FrameSink::export(JsonLinesEncoder::new(file), config.export.queue_depth)?;
    let mut scheduler = Scheduler::new(config);
    let report = scheduler.run_export(&mut track, sink)?;

    tracing::info!(
        frames = report.frames_emitted,
        hops = report.hops_analysed,
        waits = report.sink.backpressure_waits,
        "export written"
    );
    Ok(())
}

fn run_analyse(input: &Path, output: Option<&Path>, config: Option<&Path>) -> aurora_core::Result<()> {
    let mut config = load_config(config)?;
    let mut track: MemorySource = decode::read_wav(input)?;
    config.audio.sample_rate = track.sample_rate();
    let issues = config.sanitize();
    for issue in &issues {
        tracing::warn!(%issue, "configuration value clamped");
    }

    let mut extractor = FeatureExtractor::new(&config.audio, &config.analysis);
    let mut out: Option<BufWriter<File>> = output.map(File::create).transpose()?.map(BufWriter::new);

    let mut hops = 0_u64;
    let mut loudest = 0.0_f32;
    let mut flux_total = 0.0_f64;
    while let Hop::Samples(samples) = track.next_hop(extractor.hop_size())? {
        let mut features = extractor.process_hop(&samples)?;
        hops += 1;
        loudest = loudest.max(features.envelope);
        flux_total += features.flux as f64;
        if let Some(out) = out.as_mut() {
            features.samples.clear();
            serde_json::to_writer(&mut *out, &features)?;
            out.write_all(b"\n")?;
        }
    }
    if let Some(out) = out.as_mut() {
        out.flush()?;
    }

    tracing::info!(
        hops,
        peak_envelope = loudest,
        mean_flux = flux_total / hops.max(1) as f64,
        "analysis finished"
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> aurora_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Logs frame summaries instead of drawing them.
#[derive(Debug, Default)]
struct TraceRenderer {
    presented: u64,
}

impl Renderer for TraceRenderer {
    fn present(&mut self, frame: &DrawFrame, _timeout: Duration) -> aurora_core::Result<()> {
        self.presented += 1;
        tracing::debug!(
            frame = frame.frame_index(),
            t = frame.timestamp(),
            primitives = frame.primitives().len(),
            particles = frame.particle_count(),
            "frame"
        );
        if self.presented % 300 == 0 {
            tracing::info!(presented = self.presented, "live frames presented");
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a track in real time against the wall clock.
    Live {
        /// WAV file streamed as if it were a live input.
        input: PathBuf,
        #[command(flatten)]
        visual: VisualArgs,
    },
    /// Render every frame of a track offline into a JSON lines file.
    Export {
        /// Path to the audio file to render.
        input: PathBuf,
        /// Output path for the frame stream.
        output: PathBuf,
        /// Seconds to render; defaults to the whole track.
        #[arg(long)]
        duration: Option<f64>,
        #[command(flatten)]
        visual: VisualArgs,
    },
    /// Run feature extraction only and optionally dump every hop.
    Analyse {
        /// Path to the audio file that should be analysed.
        input: PathBuf,
        /// Optional JSON lines output with one feature set per hop.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// TOML or JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct VisualArgs {
    /// TOML or JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Visual mode, overriding the configuration.
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,
    /// Frame rate, overriding the configuration.
    #[arg(long)]
    fps: Option<u32>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Image drawn in the centre with a feathered mask.
    #[arg(long)]
    image: Option<PathBuf>,
}

impl VisualArgs {
    fn resolve(&self, export: bool) -> aurora_core::Result<AppConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(mode) = self.mode {
            config.visual.mode = mode.into();
        }
        if let Some(fps) = self.fps {
            if export {
                config.export.fps = fps;
            } else {
                config.live.fps = fps;
            }
        }
        if let Some(width) = self.width {
            config.visual.width = width;
        }
        if let Some(height) = self.height {
            config.visual.height = height;
        }
        if let Some(image) = &self.image {
            let path = image
                .to_str()
                .ok_or(AuroraError::InvalidInput("image path is not valid UTF-8"))?;
            config.visual.center_image = Some(CenterImageConfig {
                path: path.to_owned(),
                ..config.visual.center_image.take().unwrap_or_default()
            });
        }

        for issue in config.sanitize() {
            tracing::warn!(%issue, "option clamped");
        }
        Ok(config)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Waveform,
    Spectrum,
    Particle,
}

impl From<ModeArg> for VisualMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Waveform => VisualMode::Waveform,
            ModeArg::Spectrum => VisualMode::Spectrum,
            ModeArg::Particle => VisualMode::Particle,
        }
    }
}
