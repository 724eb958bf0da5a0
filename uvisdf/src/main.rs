use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uviscore::rejection::fixed::FixedIterationConfig;
use uviscore::rejection::free::FreeIterationConfig;
use uviscore::{DiagnosticLevel, Replacement, Spread};

use uvisdf::config::{load_config, RejectionMethod, Stage1Config};
use uvisdf::data::observation::{read_observation, ObservationSummary};
use uvisdf::stage::run_stage;

#[derive(Parser)]
#[command(name = "uvisdf")]
#[command(version, about = "Temporal outlier rejection for UVIS image cubes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct OutputArgs {
    /// Observation file (.json or .json.zst)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Corrected observation, compressed if it ends in .zst
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Diagnostics: 0 off, 1 aggregate, 2 per frame
    #[arg(long, value_name = "LEVEL", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    diagnostics: u8,

    /// Directory for diagnostics frames
    #[arg(long, value_name = "DIR")]
    diagnostics_dir: Option<PathBuf>,

    /// Write a JSON report of the run
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Number of parallel threads, 0 uses all cores
    #[arg(short = 'j', long, value_name = "N", default_value_t = 0)]
    threads: usize,

    /// zstd level for compressed outputs
    #[arg(long, value_name = "LEVEL", default_value_t = 3)]
    compression_level: i32,
}

#[derive(Subcommand)]
enum Commands {
    /// Reject outliers with a fixed sequence of sigma thresholds
    Fixed {
        #[command(flatten)]
        out: OutputArgs,

        /// Sigma of each pass, in order (e.g. 10,8,6)
        #[arg(long, value_name = "SIGMA", num_args = 1.., value_delimiter = ',', default_values_t = [10.0, 10.0])]
        sigma: Vec<f64>,

        /// Replace with the median of +-N frames instead of the whole series
        #[arg(long, value_name = "N")]
        window: Option<usize>,
    },

    /// Sigma-clip every pixel until its retained samples stop changing
    Free {
        #[command(flatten)]
        out: OutputArgs,

        /// Clipping threshold in units of the spread
        #[arg(long, value_name = "SIGMA", default_value_t = 3.5)]
        threshold: f64,

        /// Use the scaled median absolute deviation instead of the standard deviation
        #[arg(long)]
        robust: bool,

        /// Clip iterations per pixel before giving up
        #[arg(long, value_name = "N")]
        max_iterations: Option<usize>,
    },

    /// Run from a JSON configuration file
    Run {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Print a summary of an observation file
    Inspect {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Fixed { out, sigma, window } => {
            let mut config = FixedIterationConfig::new(sigma, Replacement::from_window(window));
            config.diagnostics = DiagnosticLevel::from(out.diagnostics);
            config.diagnostics_dir = out.diagnostics_dir.clone();
            config.num_threads = out.threads;
            cmd_reject(out, RejectionMethod::Fixed(config))
        }

        Commands::Free {
            out,
            threshold,
            robust,
            max_iterations,
        } => {
            let mut config = FreeIterationConfig::new(threshold);
            if robust {
                config.clip = config.clip.with_spread(Spread::Mad);
            }
            if let Some(n) = max_iterations {
                config.clip = config.clip.with_max_iterations(n);
            }
            config.diagnostics = DiagnosticLevel::from(out.diagnostics);
            config.diagnostics_dir = out.diagnostics_dir.clone();
            config.num_threads = out.threads;
            cmd_reject(out, RejectionMethod::Free(config))
        }

        Commands::Run { config } => {
            let config = load_config(&config)?;
            run_stage(&config)?;
            Ok(())
        }

        Commands::Inspect { input } => {
            let obs = read_observation(&input)?;
            println!("{}", ObservationSummary::new(&obs).summary());
            Ok(())
        }
    }
}

fn cmd_reject(out: OutputArgs, rejection: RejectionMethod) -> Result<(), Box<dyn Error>> {
    let mut config = Stage1Config::new(out.input, out.output, vec![rejection]);
    config.report = out.report;
    config.compression_level = out.compression_level;

    let report = run_stage(&config)?;
    println!(
        "{} samples flagged in {} frames of {}x{} ({:.2}s)",
        report.newly_flagged(),
        report.frames,
        report.rows,
        report.cols,
        report.elapsed_seconds
    );
    Ok(())
}
