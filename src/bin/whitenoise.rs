use anyhow::bail;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use whitenoise::command::spawn_stdin_reader;
use whitenoise::controller::install_interrupt_handler;
use whitenoise::logging::init_logging;
use whitenoise::{
    CancellationToken, Clock, CommandChannel, Config, CpalSink, PngPlotter, SampleClock, Sink,
    StreamController, StreamSettings, WavSink,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Command-line ambient random noise generator",
    allow_negative_numbers = true
)]
struct Args {
    /// Lowpass cutoff as a fraction of Nyquist, in (0, 1)
    #[arg(short = 'c', value_name = "CUTOFF")]
    cutoff: Option<f64>,
    /// Sample rate in Hz: 11025 or 22050
    #[arg(short = 'r', value_name = "RATE")]
    rate: Option<i64>,
    /// Window: 0 Blackman, 1 Bartlett, 2 Hanning, 3 Hamming, 4 Rectangular
    #[arg(short = 'F', value_name = "FILTNUM")]
    window: Option<i64>,
    /// FIR filter length, in [1, 100]
    #[arg(short = 'l', value_name = "LENGTH")]
    length: Option<i64>,
    /// Minutes of noise before stopping (or fading)
    #[arg(short = 't', value_name = "TIME")]
    time: Option<i64>,
    /// Fade out over this many seconds once the run time is up
    #[arg(short = 'f', value_name = "FADETIME")]
    fade: Option<i64>,
    /// Plot the frequency response to ~/.whitenoise/filter.png
    #[arg(short = 'p', value_name = "WIDTH", num_args = 0..=1, default_missing_value = "320")]
    plot: Option<i64>,
    /// Audio buffering in milliseconds, in [100, 10000]
    #[arg(short = 'L', value_name = "LATENCY")]
    latency: Option<i64>,
    /// Read commands from stdin while playing
    #[arg(short = 's')]
    stdin: bool,
    /// Render to an 8-bit WAV file instead of the audio device
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// Seed the noise generator for reproducible output
    #[arg(long)]
    seed: Option<u64>,
    /// TOML file with default settings; flags override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Args {
    fn to_config(&self) -> Config {
        Config {
            cutoff: self.cutoff,
            rate: self.rate,
            window: self.window,
            filter_length: self.length,
            run_minutes: self.time,
            fade_seconds: self.fade,
            latency_ms: self.latency,
            plot_width: self.plot,
            read_commands: self.stdin.then_some(true),
            seed: self.seed,
        }
    }
}

fn main() -> ExitCode {
    init_logging();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("whitenoise: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let file = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let settings = file.overlay(args.to_config()).resolve();

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone())?;

    match &args.output {
        Some(path) => {
            if settings.run_time.is_none() {
                bail!("rendering to a file needs a run time (-t)");
            }
            let sink = WavSink::create(path, settings.sample_rate)?;
            let controller =
                StreamController::with_clock(&settings, sink, SampleClock::new(), cancel);
            drive(controller, &settings)
        }
        None => {
            let sink = CpalSink::open(settings.sample_rate, settings.latency_ms)?;
            drive(StreamController::new(&settings, sink, cancel), &settings)
        }
    }
}

fn drive<S: Sink, C: Clock>(
    mut controller: StreamController<S, C>,
    settings: &StreamSettings,
) -> anyhow::Result<()> {
    if settings.plot_width.is_some() || settings.read_commands {
        match PngPlotter::in_home() {
            Ok(plotter) => controller = controller.with_plotter(Box::new(plotter)),
            Err(e) => log::warn!("frequency response plots disabled: {e:#}"),
        }
    }
    if let Some(width) = settings.plot_width {
        controller.plot(width);
    }
    if settings.read_commands {
        controller = controller.with_commands(CommandChannel::new(spawn_stdin_reader()));
        log::info!("now accepting commands from stdin");
    }

    controller.run()?;
    Ok(())
}
