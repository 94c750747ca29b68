//! Reporting utilities: line residuals, benchmark rows, and formatted output.

pub mod format;

use std::time::Duration;

use crate::domain::{LineRecord, StellarParameters};
use crate::equilibrium::EquilibriumOutcome;
use crate::solve::Status;

pub use format::*;

/// A used line and its distance from the excitation regression.
#[derive(Debug, Clone, PartialEq)]
pub struct LineResidual {
    pub record: LineRecord,
    pub expected: f64,
    pub residual: f64,
}

/// Residuals of every used neutral line against the refit excitation regression.
pub fn compute_line_residuals(outcome: &EquilibriumOutcome) -> Vec<LineResidual> {
    let fit = outcome.refit.excitation_fit;
    outcome
        .used_records()
        .filter(|r| r.is_neutral())
        .map(|r| {
            let expected = fit.predict(r.excitation_potential);
            LineResidual {
                record: r.clone(),
                expected,
                residual: r.abundance - expected,
            }
        })
        .collect()
}

/// The `top_n` lines furthest from the regression, largest first.
pub fn rank_line_residuals(residuals: &[LineResidual], top_n: usize) -> Vec<LineResidual> {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual.abs().total_cmp(&a.residual.abs()));
    sorted.truncate(top_n);
    sorted
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSolution {
    pub parameters: StellarParameters,
    pub status: Status,
    pub evaluations: usize,
    pub lines_used: usize,
}

/// One star of a benchmark run; failures are kept as messages.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRow {
    pub star: String,
    pub literature: StellarParameters,
    pub result: Result<BenchmarkSolution, String>,
    pub elapsed: Duration,
}

impl BenchmarkRow {
    /// `(ΔTeff, Δlogg, Δ[M/H])`, estimate minus literature.
    pub fn difference(&self) -> Option<[f64; 3]> {
        let solution = self.result.as_ref().ok()?;
        let [t, g, m, _] = solution.parameters.to_array();
        let [lt, lg, lm, _] = self.literature.to_array();
        Some([t - lt, g - lg, m - lm])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AtomicTransition;
    use crate::equilibrium::reject_outliers;
    use crate::physics::Asplund2009;

    fn outcome() -> EquilibriumOutcome {
        let abundances = [7.50, 7.52, 7.48, 7.80, 7.50, 7.49];
        let mut records: Vec<LineRecord> = abundances
            .iter()
            .enumerate()
            .map(|(i, &a)| {
                let t = AtomicTransition::new(5000.0 + i as f64, 26.0, i as f64, -1.0).with_equivalent_width(20.0 + 5.0 * i as f64);
                LineRecord {
                    abundance: a,
                    is_filtered: true,
                    ..LineRecord::from_transition(&t)
                }
            })
            .collect();
        let ionised = AtomicTransition::new(5100.0, 26.1, 3.0, -2.0).with_equivalent_width(40.0);
        records.push(LineRecord {
            abundance: 7.5,
            is_filtered: true,
            ..LineRecord::from_transition(&ionised)
        });
        reject_outliers(records, 0.0, &Asplund2009, None).unwrap()
    }

    #[test]
    fn ranks_the_most_discrepant_neutral_lines_first() {
        let residuals = compute_line_residuals(&outcome());
        assert_eq!(residuals.len(), 6);
        let ranked = rank_line_residuals(&residuals, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].record.wavelength, 5003.0);
        assert!(ranked[0].residual > 0.0);
    }

    #[test]
    fn benchmark_difference_only_for_solved_stars() {
        let literature = StellarParameters::new(5777.0, 4.44, 0.0, f64::NAN);
        let solved = BenchmarkRow {
            star: "Sun".into(),
            literature,
            result: Ok(BenchmarkSolution {
                parameters: StellarParameters::new(5800.0, 4.40, 0.05, 1.0),
                status: Status::Converged,
                evaluations: 20,
                lines_used: 80,
            }),
            elapsed: Duration::from_secs(3),
        };
        let [dt, dg, dm] = solved.difference().unwrap();
        assert!((dt - 23.0).abs() < 1e-9);
        assert!((dg + 0.04).abs() < 1e-9);
        assert!((dm - 0.05).abs() < 1e-9);

        let failed = BenchmarkRow {
            result: Err("out of grid".into()),
            ..solved
        };
        assert!(failed.difference().is_none());
    }
}
