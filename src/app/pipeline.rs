//! Shared pipeline logic used by the CLI subcommands.
//!
//! Keeping the workflows here avoids duplicating them across commands:
//!
//! ```text
//! config -> table (+ spectra) -> fitted lines -> records -> state / estimate
//! ```
//!
//! The CLI layer only resolves paths and prints.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::domain::{ModelConfig, PartialParameters, Spectrum, StellarParameters, TransitionTable};
use crate::equilibrium::{EquilibriumError, EquilibriumOutcome, build_records, measure_state};
use crate::error::AppError;
use crate::fit::{FitContext, FittedLines, ProfileFit, fit_atomic_transitions};
use crate::io::{BenchmarkStar, read_spectra_dir, read_spectrum};
use crate::physics::{Asplund2009, ExternalEngine, Synthesiser};
use crate::report::{BenchmarkRow, BenchmarkSolution};
use crate::solve::{EstimateRequest, Event, Observer, Physics, SolveLog, StellarEstimate, estimate_stellar_parameters};

/// Spectra from files and/or directories, in argument order.
pub fn load_spectra(paths: &[PathBuf]) -> Result<Vec<Spectrum>, AppError> {
    let mut spectra = Vec::new();
    for path in paths {
        if path.is_dir() {
            spectra.extend(read_spectra_dir(path)?);
        } else {
            spectra.push(read_spectrum(path)?);
        }
    }
    info!(channels = spectra.len(), "spectra loaded");
    Ok(spectra)
}

/// Fit every measurable line.
pub fn run_measure(
    config: &ModelConfig,
    table: &TransitionTable,
    spectra: &[Spectrum],
    parameters: PartialParameters,
    synthesiser: Option<&dyn Synthesiser>,
) -> Result<FittedLines, AppError> {
    let ctx = FitContext {
        spectra,
        parameters,
        options: &config.profile,
        synthesiser,
        interpolator: &config.photosphere_grid,
        threads: config.settings.threads,
    };
    let mut observer = |index: usize, _: &crate::domain::AtomicTransition, fit: &ProfileFit| {
        debug!(
            index,
            wavelength = fit.wavelength,
            equivalent_width = fit.equivalent_width,
            outliers = fit.outlier_means.len(),
            "profile fitted"
        );
    };
    let fitted = fit_atomic_transitions(table, &ctx, &mut observer)?;
    info!(measured = fitted.fits.len(), skipped = fitted.skipped.len(), "profiles fitted");
    if fitted.fits.is_empty() && !fitted.table.iter().any(|t| t.equivalent_width.is_finite()) {
        return Err(AppError::new(3, "No transitions could be measured in the given spectra."));
    }
    Ok(fitted)
}

#[derive(Debug, Clone)]
pub struct StateRun {
    pub fitted: Option<FittedLines>,
    pub outcome: EquilibriumOutcome,
}

/// Equilibrium state at fixed parameters.
pub fn run_state(
    config: &ModelConfig,
    table: &TransitionTable,
    spectra: Option<&[Spectrum]>,
    theta: &StellarParameters,
    physics: &Physics<'_>,
) -> Result<StateRun, AppError> {
    let fitted = match spectra {
        Some(spectra) => Some(run_measure(config, table, spectra, (*theta).into(), physics.synthesiser)?),
        None => None,
    };
    let records = match &fitted {
        Some(f) => build_records(&f.table, &config.filter, |i| f.stddev(i)),
        None => build_records(table, &config.filter, |_| None),
    };
    let outcome = measure_state(&records, theta, &physics.equilibrium(), &config.equilibrium)?;
    Ok(StateRun { fitted, outcome })
}

/// Solve for the stellar parameters, logging every solver step.
pub fn run_solve(
    config: &ModelConfig,
    table: &TransitionTable,
    spectra: Option<&[Spectrum]>,
    initial: StellarParameters,
    physics: &Physics<'_>,
) -> Result<StellarEstimate, AppError> {
    let request = EstimateRequest {
        table,
        spectra,
        initial,
        profile: &config.profile,
        filter: &config.filter,
        equilibrium: &config.equilibrium,
        estimate: &config.solver,
        threads: config.settings.threads,
    };
    let mut log = SolveLog::default();
    let observer = |event: &Event<'_, 4, EquilibriumError>| log.observe(event);
    let estimate = estimate_stellar_parameters(&request, physics, observer)?;
    if log.rejected > 0 {
        info!(rejected = log.rejected, steps = log.steps, "solver steered around rejected points");
    }
    Ok(estimate)
}

/// Solve every benchmark star; failures are recorded per star.
pub fn run_benchmark(
    config: &ModelConfig,
    table: &TransitionTable,
    stars: &[BenchmarkStar],
    data_dir: &Path,
    physics: &Physics<'_>,
) -> Vec<BenchmarkRow> {
    let fallback = config.initial_theta.unwrap_or_default();
    stars
        .iter()
        .map(|star| {
            let started = Instant::now();
            let initial = star.initial.unwrap_or(fallback);
            info!(star = %star.name, initial = %initial, "benchmark star");

            let result = read_spectra_dir(&star.spectra_dir(data_dir))
                .map_err(AppError::from)
                .and_then(|spectra| run_solve(config, table, Some(&spectra), initial, physics))
                .map(|estimate| BenchmarkSolution {
                    parameters: estimate.parameters,
                    status: estimate.status,
                    evaluations: estimate.evaluations,
                    lines_used: estimate.records.len(),
                })
                .map_err(|e| {
                    warn!(star = %star.name, error = %e, "benchmark star failed");
                    e.to_string()
                });

            BenchmarkRow {
                star: star.name.clone(),
                literature: star.literature,
                result,
                elapsed: started.elapsed(),
            }
        })
        .collect()
}

/// Engine-backed physics for `config`.
pub fn physics<'a>(config: &'a ModelConfig, engine: &'a ExternalEngine) -> Physics<'a> {
    Physics {
        evaluator: engine,
        interpolator: &config.photosphere_grid,
        synthesiser: Some(engine),
        solar: &Asplund2009,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AtomicTransition, CustomMasks};
    use crate::data::{SimulationConfig, simulate_spectrum};
    use crate::io::write_spectrum;
    use crate::physics::{AbundanceEvaluator, EvaluatorError, GridBounds, Photosphere};

    /// Neutral-line abundances trend with excitation potential away from 5777 K.
    struct TrendEvaluator;

    impl AbundanceEvaluator for TrendEvaluator {
        fn abundances(
            &self,
            lines: &[AtomicTransition],
            photosphere: &Photosphere,
            _microturbulence: f64,
        ) -> Result<Vec<f64>, EvaluatorError> {
            Ok(lines
                .iter()
                .map(|l| {
                    let slope = if l.is_neutral() { 1e-4 * (photosphere.effective_temperature - 5777.0) } else { 0.0 };
                    7.5 + photosphere.metallicity + slope * (l.excitation_potential - 2.5)
                })
                .collect())
        }
    }

    fn table() -> TransitionTable {
        let mut lines: Vec<AtomicTransition> = (0..6)
            .map(|i| AtomicTransition::new(5000.0 + 10.0 * i as f64, 26.0, i as f64, -1.0).with_equivalent_width(20.0 + 10.0 * i as f64))
            .collect();
        lines.push(AtomicTransition::new(5100.0, 26.1, 2.5, -2.0).with_equivalent_width(35.0));
        TransitionTable::new(lines, CustomMasks::new()).unwrap()
    }

    #[test]
    fn state_from_table_equivalent_widths() {
        let config = ModelConfig::default();
        let grid = GridBounds::default();
        let physics = Physics {
            evaluator: &TrendEvaluator,
            interpolator: &grid,
            synthesiser: None,
            solar: &Asplund2009,
        };
        let run = run_state(&config, &table(), None, &StellarParameters::new(5777.0, 4.44, 0.0, 1.0), &physics).unwrap();
        assert!(run.fitted.is_none());
        assert!(run.outcome.state().excitation_slope.abs() < 1e-12);
        assert!(run.outcome.state().abundance_offset.abs() < 1e-9);
    }

    #[test]
    fn benchmark_isolates_failing_stars() {
        let config = ModelConfig::default();
        let grid = GridBounds::default();
        let physics = Physics {
            evaluator: &TrendEvaluator,
            interpolator: &grid,
            synthesiser: None,
            solar: &Asplund2009,
        };
        let table = table();
        let star = |name: &str| BenchmarkStar {
            name: name.to_string(),
            literature: StellarParameters::new(5777.0, 4.44, 0.0, f64::NAN),
            initial: None,
        };
        let stars = vec![star("missing"), star("sun")];

        let dir = tempfile::tempdir().unwrap();
        let simulated = simulate_spectrum(
            &table,
            &SimulationConfig {
                start: 4995.0,
                end: 5105.0,
                snr: None,
                ..SimulationConfig::default()
            },
        )
        .unwrap();
        let sun = stars[1].spectra_dir(dir.path());
        std::fs::create_dir(&sun).unwrap();
        write_spectrum(&sun.join("blue.txt"), &simulated.spectrum).unwrap();

        let rows = run_benchmark(&config, &table, &stars, dir.path(), &physics);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].star, "missing");
        assert!(rows[0].result.is_err());
        let solution = rows[1].result.as_ref().unwrap();
        assert_eq!(solution.lines_used, 7);
        assert!((solution.parameters.effective_temperature - 5777.0).abs() < 1.0);
    }
}
