//! Command-line parsing.
//!
//! Argument parsing and command dispatch stay separate from the fitting and
//! solving code: every subcommand resolves to a [`ModelConfig`] plus a few
//! run-specific paths.
//!
//! [`ModelConfig`]: crate::domain::ModelConfig

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{PartialParameters, StellarParameters};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "equilibria",
    version,
    about = "Stellar parameters from excitation/ionisation equilibrium"
)]
pub struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit line profiles and report equivalent widths.
    Measure(MeasureArgs),
    /// Evaluate the equilibrium state at fixed stellar parameters.
    State(StateArgs),
    /// Solve for the stellar parameters that zero the equilibrium state.
    Solve(SolveArgs),
    /// Solve every star of a benchmark list and compare with literature values.
    Benchmark(BenchmarkArgs),
    /// Write a seeded synthetic spectrum for the configured transitions.
    Simulate(SimulateArgs),
}

/// Model configuration shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    /// JSON model configuration.
    #[arg(short, long, value_name = "JSON")]
    pub config: PathBuf,

    /// Transition table CSV (overrides the configured one).
    #[arg(long, value_name = "CSV")]
    pub transitions: Option<PathBuf>,

    /// Worker threads for profile fitting (overrides `settings.threads`).
    #[arg(long)]
    pub threads: Option<usize>,
}

/// Stellar parameters given on the command line.
#[derive(Debug, Args, Clone, Default)]
pub struct ThetaArgs {
    /// Effective temperature (K).
    #[arg(long)]
    pub teff: Option<f64>,
    /// Surface gravity (log cgs).
    #[arg(long)]
    pub logg: Option<f64>,
    /// Metallicity [M/H].
    #[arg(long)]
    pub mh: Option<f64>,
    /// Microturbulence (km/s).
    #[arg(long)]
    pub xi: Option<f64>,
    /// Start from a previous `solve --export-json` result.
    #[arg(long, value_name = "JSON")]
    pub from_estimate: Option<PathBuf>,
}

impl ThetaArgs {
    pub fn partial(&self) -> PartialParameters {
        PartialParameters {
            effective_temperature: self.teff,
            surface_gravity: self.logg,
            metallicity: self.mh,
            microturbulence: self.xi,
        }
    }

    /// Overlay the given flags on `base`.
    pub fn overlay(&self, base: StellarParameters) -> StellarParameters {
        StellarParameters::new(
            self.teff.unwrap_or(base.effective_temperature),
            self.logg.unwrap_or(base.surface_gravity),
            self.mh.unwrap_or(base.metallicity),
            self.xi.unwrap_or(base.microturbulence),
        )
    }
}

#[derive(Debug, Args, Clone)]
pub struct MeasureArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Spectrum files or directories of `*.txt` spectra.
    #[arg(long, required = true, num_args = 1.., value_name = "PATH")]
    pub spectra: Vec<PathBuf>,

    /// Photosphere for blend synthesis.
    #[command(flatten)]
    pub theta: ThetaArgs,

    /// Write the fitted transition table (with equivalent widths).
    #[arg(long, value_name = "CSV")]
    pub export_table: Option<PathBuf>,

    /// Write one row per fitted profile.
    #[arg(long, value_name = "CSV")]
    pub export_profiles: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct StateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Spectra to measure first; without them the table's equivalent widths are used.
    #[arg(long, num_args = 1.., value_name = "PATH")]
    pub spectra: Vec<PathBuf>,

    #[command(flatten)]
    pub theta: ThetaArgs,

    /// Show the N lines furthest from the excitation regression.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Write line records with abundances and flags.
    #[arg(long, value_name = "CSV")]
    pub export_records: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SolveArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Spectra to measure at the initial guess; without them the table's
    /// equivalent widths are used.
    #[arg(long, num_args = 1.., value_name = "PATH")]
    pub spectra: Vec<PathBuf>,

    /// Initial guess (overrides `initial_theta`).
    #[command(flatten)]
    pub theta: ThetaArgs,

    /// Write the estimate as JSON.
    #[arg(long, value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Write line records at the estimate.
    #[arg(long, value_name = "CSV")]
    pub export_records: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct BenchmarkArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Benchmark list CSV.
    #[arg(long, value_name = "CSV")]
    pub stars: PathBuf,

    /// Directory with one sub-directory of spectra per star.
    #[arg(long, value_name = "DIR")]
    pub data: PathBuf,

    /// Write the markdown results table here as well as to stdout.
    #[arg(long, value_name = "MD")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output spectrum (two-column text).
    #[arg(short, long, value_name = "TXT")]
    pub output: PathBuf,

    /// Write the injected equivalent widths as a transition table.
    #[arg(long, value_name = "CSV")]
    pub truth: Option<PathBuf>,

    /// First wavelength (Å).
    #[arg(long, default_value_t = 5000.0)]
    pub start: f64,

    /// Last wavelength (Å).
    #[arg(long, default_value_t = 5100.0)]
    pub end: f64,

    /// Pixel size (Å).
    #[arg(long, default_value_t = 0.02)]
    pub pixel_size: f64,

    /// Gaussian σ of every line (Å).
    #[arg(long, default_value_t = 0.1)]
    pub stddev: f64,

    /// Signal-to-noise per pixel.
    #[arg(long, default_value_t = 200.0)]
    pub snr: f64,

    /// Noise-free spectrum.
    #[arg(long)]
    pub no_noise: bool,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_solve_with_overrides() {
        let cli = Cli::parse_from([
            "equilibria", "-v", "solve", "--config", "model.json", "--spectra", "blue.txt", "red.txt", "--teff", "5700",
            "--threads", "4",
        ]);
        assert!(cli.verbose);
        let Command::Solve(args) = cli.command else {
            panic!("expected solve");
        };
        assert_eq!(args.spectra.len(), 2);
        assert_eq!(args.config.threads, Some(4));
        let theta = args.theta.overlay(StellarParameters::default());
        assert_eq!(theta.effective_temperature, 5700.0);
        assert_eq!(theta.surface_gravity, StellarParameters::default().surface_gravity);
    }

    #[test]
    fn measure_requires_spectra() {
        assert!(Cli::try_parse_from(["equilibria", "measure", "--config", "model.json"]).is_err());
    }
}
