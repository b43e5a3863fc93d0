//! CLI tool for fma-bench (fmabench)
//!
//! Exit status: 0 when at least one backend produced results, 2 when none
//! did, 1 on configuration or output errors.

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use colored::Colorize;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use fmalib::{
    driver::connect_backends, report::format_text_block, BackendKind, BenchConfig, BenchDriver,
    BenchError, ResultsCsv,
};

#[cfg(feature = "cli")]
const EXIT_OK: i32 = 0;
#[cfg(feature = "cli")]
const EXIT_FAILURE: i32 = 1;
#[cfg(feature = "cli")]
const EXIT_NO_BACKEND: i32 = 2;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "fmabench")]
#[command(about = "Fused-multiply-add throughput benchmark for GPUs and the host CPU", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file (command-line flags override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target duration of each measurement in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Requested elements per vector before memory-based sizing
    #[arg(short, long)]
    size: Option<usize>,

    /// Trials per backend and mode
    #[arg(short, long)]
    repeats: Option<u32>,

    /// Print device, sizing and calibration details
    #[arg(short, long)]
    verbose: bool,

    /// Directory of the results CSV
    #[arg(long)]
    csv_dir: Option<PathBuf>,

    /// Node id for the results file (default: short hostname)
    #[arg(long)]
    node: Option<String>,

    /// Fraction of device memory to fill (0.05 - 0.95)
    #[arg(long)]
    vram_frac: Option<f64>,

    /// Warmup launches before calibration (0 - 50)
    #[arg(long)]
    warmup: Option<u32>,

    /// Backend to run, in order (repeatable: cuda, host)
    #[arg(short, long = "backend")]
    backends: Vec<BackendKind>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Do not write the results CSV
    #[arg(long)]
    no_csv: bool,

    /// Print a sample configuration file and exit
    #[arg(long)]
    print_config: bool,
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();

    // the filter admits info; the max level is narrowed until the config is known
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    apply_default_level(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "[error]".red(), e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

#[cfg(feature = "cli")]
fn default_level(verbose: bool) -> log::LevelFilter {
    if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    }
}

/// Set the log level from the verbose flag unless `RUST_LOG` chose one
#[cfg(feature = "cli")]
fn apply_default_level(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(default_level(verbose));
    }
}

#[cfg(feature = "cli")]
fn load_config(cli: &Cli) -> Result<BenchConfig, BenchError> {
    let mut config = match &cli.config {
        Some(path) => BenchConfig::from_toml_file(&path.to_string_lossy())?,
        None => BenchConfig::default(),
    };

    if let Some(duration) = cli.duration {
        config.duration_secs = duration;
    }
    if let Some(size) = cli.size {
        config.size = size;
    }
    if let Some(repeats) = cli.repeats {
        config.repeats = repeats;
    }
    if let Some(dir) = &cli.csv_dir {
        config.csv_dir = dir.clone();
    }
    if cli.node.is_some() {
        config.node = cli.node.clone();
    }
    if !cli.backends.is_empty() {
        config.backends = cli.backends.clone();
    }
    config.verbose |= cli.verbose;
    config.sanitize()?;

    if let Some(frac) = cli.vram_frac {
        if config.set_vram_target(frac) {
            if config.verbose {
                eprintln!("{} VRAM target fraction override: {:.3}", "[cfg]".cyan(), frac);
            }
        } else {
            eprintln!(
                "{} --vram-frac {} outside [0.05, 0.95], keeping {:.3}",
                "[warn]".yellow(),
                frac,
                config.vram_target
            );
        }
    }
    if let Some(steps) = cli.warmup {
        if config.set_warmup_steps(steps) {
            if config.verbose {
                eprintln!("{} Warmup steps override: {}", "[cfg]".cyan(), steps);
            }
        } else {
            eprintln!(
                "{} --warmup {} outside [0, 50], keeping {}",
                "[warn]".yellow(),
                steps,
                config.warmup_steps
            );
        }
    }

    Ok(config)
}

#[cfg(feature = "cli")]
fn run(cli: Cli) -> Result<i32, BenchError> {
    if cli.print_config {
        print!("{}", BenchConfig::sample_toml());
        return Ok(EXIT_OK);
    }

    let json = match cli.format.as_str() {
        "text" => false,
        "json" => true,
        other => {
            return Err(BenchError::Configuration(format!(
                "unknown format '{}', expected text or json",
                other
            )))
        }
    };

    let config = load_config(&cli)?;
    apply_default_level(config.verbose);
    let node = config.node_name();
    let csv = if cli.no_csv {
        None
    } else {
        Some(ResultsCsv::open(&config.csv_dir, &node)?)
    };
    if config.verbose {
        if let Some(csv) = &csv {
            eprintln!("{} results: {}", "[cfg]".cyan(), csv.path().display());
        }
    }

    let backends = connect_backends(&config);
    let outcome = BenchDriver::new(&config).run(backends, |report| {
        if json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            print!("{}", format_text_block(report));
        }
        if let Some(csv) = &csv {
            csv.append(report)?;
        }
        Ok(())
    });

    match outcome {
        Ok(summary) => {
            log::info!(
                "{} report(s), {} backend(s) skipped",
                summary.reports.len(),
                summary.failures.len()
            );
            Ok(EXIT_OK)
        }
        Err(BenchError::NoBackendSucceeded) => {
            let tried: Vec<&str> = config.backends.iter().map(|b| b.as_str()).collect();
            eprintln!(
                "{} no compute backend available ({})",
                "[error]".red(),
                tried.join("/")
            );
            Ok(EXIT_NO_BACKEND)
        }
        Err(e) => Err(e),
    }
}


#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
