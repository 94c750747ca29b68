//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - loads the model configuration and transition table
//! - runs measurement, equilibrium or solver pipelines
//! - prints reports and writes optional exports

use std::fs;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{BenchmarkArgs, Command, ConfigArgs, MeasureArgs, SimulateArgs, SolveArgs, StateArgs, ThetaArgs};
use crate::data::{SimulationConfig, simulate_spectrum};
use crate::domain::{ModelConfig, PartialParameters, Spectrum, StellarParameters, TransitionTable};
use crate::error::AppError;
use crate::io::{
    EstimateFile, read_benchmark_stars, read_estimate_json, write_estimate_json, write_profiles_csv,
    write_records_csv, write_spectrum, write_transitions_path,
};
use crate::physics::{ExternalEngine, Synthesiser};
use crate::report::{compute_line_residuals, format, rank_line_residuals};

pub mod pipeline;

/// Entry point for the `equilibria` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Measure(args) => handle_measure(args),
        Command::State(args) => handle_state(args),
        Command::Solve(args) => handle_solve(args),
        Command::Benchmark(args) => handle_benchmark(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

/// `RUST_LOG` wins over `--verbose`. Logs go to stderr so reports can be piped.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_measure(args: MeasureArgs) -> Result<(), AppError> {
    let (config, table) = load_model(&args.config)?;
    let spectra = pipeline::load_spectra(&args.spectra)?;

    // Synthesis is only needed for blended lines; a missing engine surfaces
    // as a fit error when one is actually required.
    let engine = match ExternalEngine::new(&config.engine) {
        Ok(engine) => Some(engine),
        Err(e) => {
            info!(reason = %e, "no external engine; blend synthesis disabled");
            None
        }
    };
    let synthesiser = engine.as_ref().map(|e| e as &dyn Synthesiser);
    let parameters = match base_theta(&args.theta, &config)? {
        Some(base) => PartialParameters::from(args.theta.overlay(base)),
        None => args.theta.partial(),
    };

    let fitted = pipeline::run_measure(&config, &table, &spectra, parameters, synthesiser)?;
    println!("{}", format::format_fit_summary(&fitted));

    if let Some(path) = &args.export_table {
        write_transitions_path(path, fitted.table.transitions())?;
    }
    if let Some(path) = &args.export_profiles {
        write_profiles_csv(path, &fitted)?;
    }
    Ok(())
}

fn handle_state(args: StateArgs) -> Result<(), AppError> {
    let (config, table) = load_model(&args.config)?;
    let spectra = optional_spectra(&args.spectra)?;
    let engine = ExternalEngine::new(&config.engine)?;
    let physics = pipeline::physics(&config, &engine);

    let theta = args.theta.overlay(base_theta(&args.theta, &config)?.unwrap_or_default());
    let run = pipeline::run_state(&config, &table, spectra.as_deref(), &theta, &physics)?;

    if let Some(fitted) = &run.fitted {
        println!("{}", format::format_fit_summary(fitted));
    }
    println!("{}", format::format_equilibrium(&theta, &run.outcome));
    let residuals = rank_line_residuals(&compute_line_residuals(&run.outcome), args.top);
    if !residuals.is_empty() {
        println!("{}", format::format_line_residuals(&residuals));
    }

    if let Some(path) = &args.export_records {
        write_records_csv(path, &run.outcome.records)?;
    }
    Ok(())
}

fn handle_solve(args: SolveArgs) -> Result<(), AppError> {
    let (config, table) = load_model(&args.config)?;
    let spectra = optional_spectra(&args.spectra)?;
    let engine = ExternalEngine::new(&config.engine)?;
    let physics = pipeline::physics(&config, &engine);

    let initial = args.theta.overlay(base_theta(&args.theta, &config)?.unwrap_or_default());
    let estimate = pipeline::run_solve(&config, &table, spectra.as_deref(), initial, &physics)?;

    if let Some(fitted) = &estimate.fitted {
        println!("{}", format::format_fit_summary(fitted));
    }
    println!("{}", format::format_estimate(&estimate));

    if let Some(path) = &args.export_json {
        write_estimate_json(path, &EstimateFile::from_estimate(&estimate, Utc::now()))?;
    }
    if let Some(path) = &args.export_records {
        write_records_csv(path, &estimate.records)?;
    }
    Ok(())
}

fn handle_benchmark(args: BenchmarkArgs) -> Result<(), AppError> {
    let (config, table) = load_model(&args.config)?;
    let stars = read_benchmark_stars(&args.stars)?;
    let engine = ExternalEngine::new(&config.engine)?;
    let physics = pipeline::physics(&config, &engine);

    let rows = pipeline::run_benchmark(&config, &table, &stars, &args.data, &physics);
    let markdown = format::format_benchmark_markdown(&rows);
    println!("{markdown}");

    if let Some(path) = &args.output {
        fs::write(path, &markdown)
            .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", path.display())))?;
    }
    if rows.iter().all(|row| row.result.is_err()) {
        return Err(AppError::new(3, "No benchmark star could be solved."));
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let (_, table) = load_model(&args.config)?;
    let sim = simulate_spectrum(
        &table,
        &SimulationConfig {
            start: args.start,
            end: args.end,
            pixel_size: args.pixel_size,
            stddev: args.stddev,
            snr: (!args.no_noise).then_some(args.snr),
            seed: args.seed,
            ..SimulationConfig::default()
        },
    )?;
    write_spectrum(&args.output, &sim.spectrum)?;
    info!(lines = sim.lines, pixels = sim.spectrum.len(), path = %args.output.display(), "spectrum written");

    if let Some(path) = &args.truth {
        write_transitions_path(path, sim.truth.transitions())?;
    }
    Ok(())
}

/// Configuration with command-line overrides applied, plus its transition table.
fn load_model(args: &ConfigArgs) -> Result<(ModelConfig, TransitionTable), AppError> {
    let mut config = ModelConfig::from_path(&args.config)?;
    if let Some(path) = &args.transitions {
        config.atomic_transitions_filename = Some(path.clone());
        config.atomic_transitions = None;
    }
    if let Some(threads) = args.threads {
        config.settings.threads = threads;
    }
    config.validate()?;

    let table = config.transition_table()?;
    info!(transitions = table.len(), "transition table loaded");
    Ok((config, table))
}

/// Starting point before flag overrides: a previous estimate, else the configured one.
fn base_theta(theta: &ThetaArgs, config: &ModelConfig) -> Result<Option<StellarParameters>, AppError> {
    if let Some(path) = &theta.from_estimate {
        let previous = read_estimate_json(path)?;
        if config.initial_theta.is_some() {
            warn!(path = %path.display(), "--from-estimate overrides initial_theta");
        }
        return Ok(Some(previous.parameters));
    }
    Ok(config.initial_theta)
}

fn optional_spectra(paths: &[std::path::PathBuf]) -> Result<Option<Vec<Spectrum>>, AppError> {
    if paths.is_empty() {
        return Ok(None);
    }
    pipeline::load_spectra(paths).map(Some)
}
