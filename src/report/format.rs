//! Formatted terminal and markdown output.
//!
//! Formatting lives here so the fitting and solving code stays free of
//! presentation details.

use crate::domain::StellarParameters;
use crate::equilibrium::{EquilibriumOutcome, EquilibriumState};
use crate::fit::FittedLines;
use crate::report::{BenchmarkRow, LineResidual};
use crate::solve::StellarEstimate;

/// Counts of measured and skipped lines.
pub fn format_fit_summary(fitted: &FittedLines) -> String {
    let mut out = String::new();
    let blended = fitted.fits.iter().filter(|(_, f)| f.blended).count();
    let with_outliers = fitted.fits.iter().filter(|(_, f)| !f.outlier_means.is_empty()).count();

    out.push_str("=== Profile fits ===\n");
    out.push_str(&format!(
        "Transitions: {} | measured={} (blended={}, outlier profiles={}) | skipped={}\n",
        fitted.table.len(),
        fitted.fits.len(),
        blended,
        with_outliers,
        fitted.skipped.len()
    ));
    for skipped in &fitted.skipped {
        out.push_str(&format!("  (skipped {:.3}) {}\n", skipped.wavelength, skipped.reason));
    }
    out
}

/// The four diagnostics, one per line.
pub fn format_state(state: &EquilibriumState) -> String {
    format!(
        "  excitation slope    {:>+12.6} dex/eV\n  ionisation offset   {:>+12.6} dex\n  abundance offset    {:>+12.6} dex\n  line-strength slope {:>+12.6}\n",
        state.excitation_slope, state.ionisation_offset, state.abundance_offset, state.line_strength_slope
    )
}

pub fn format_equilibrium(parameters: &StellarParameters, outcome: &EquilibriumOutcome) -> String {
    let mut out = String::new();
    let used = outcome.used_records().count();
    let neutral = outcome.used_records().filter(|r| r.is_neutral()).count();

    out.push_str("=== Equilibrium state ===\n");
    out.push_str(&format!("Parameters: {parameters}\n"));
    out.push_str(&format!(
        "Lines: used={} (neutral={}, ionised={}) | outliers={}\n",
        used,
        neutral,
        used - neutral,
        outcome.flagged
    ));
    if outcome.flagged > 0 {
        out.push_str("Before outlier rejection:\n");
        out.push_str(&format_state(&outcome.initial.state));
        out.push_str("After outlier rejection:\n");
    }
    out.push_str(&format_state(&outcome.state()));
    out
}

/// Lines furthest from the excitation regression.
pub fn format_line_residuals(rows: &[LineResidual]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>10} {:>8} {:>7} {:>9} {:>9} {:>9}\n",
        "wavelength", "species", "chi", "EW", "A(X)", "residual"
    ));
    out.push_str(&format!(
        "{:->10} {:->8} {:->7} {:->9} {:->9} {:->9}\n",
        "", "", "", "", "", ""
    ));
    for row in rows {
        let r = &row.record;
        out.push_str(&format!(
            "{:>10.3} {:>8} {:>7.3} {:>9.2} {:>9.3} {:>+9.3}\n",
            r.wavelength,
            r.species.to_string(),
            r.excitation_potential,
            r.equivalent_width,
            r.abundance,
            row.residual
        ));
    }
    out
}

pub fn format_estimate(estimate: &StellarEstimate) -> String {
    let mut out = String::new();
    out.push_str("=== Stellar parameters ===\n");
    out.push_str(&format!("Initial : {}\n", estimate.initial));
    out.push_str(&format!("Estimate: {}\n", estimate.parameters));
    out.push_str(&format!(
        "Status: {:?} | evaluations={} | iterations={} | lines={} | outliers={}\n",
        estimate.status,
        estimate.evaluations,
        estimate.iterations,
        estimate.records.len(),
        estimate.initial_outcome.flagged
    ));
    out.push_str("State at estimate:\n");
    out.push_str(&format_state(&estimate.state));
    out
}

/// Markdown table of a benchmark run.
pub fn format_benchmark_markdown(rows: &[BenchmarkRow]) -> String {
    let mut out = String::new();
    out.push_str("| Star | Teff (lit) | logg (lit) | [M/H] (lit) | Teff | logg | [M/H] | xi | ΔTeff | Δlogg | Δ[M/H] | Status | Time (s) |\n");
    out.push_str("|---|---:|---:|---:|---:|---:|---:|---:|---:|---:|---:|---|---:|\n");

    for row in rows {
        let lit = &row.literature;
        let elapsed = row.elapsed.as_secs_f64();
        match &row.result {
            Ok(solution) => {
                let p = &solution.parameters;
                let [dt, dg, dm] = [
                    p.effective_temperature - lit.effective_temperature,
                    p.surface_gravity - lit.surface_gravity,
                    p.metallicity - lit.metallicity,
                ];
                out.push_str(&format!(
                    "| {} | {:.0} | {:.2} | {:+.2} | {:.0} | {:.2} | {:+.2} | {:.2} | {:+.0} | {:+.2} | {:+.2} | {:?} | {:.1} |\n",
                    row.star,
                    lit.effective_temperature,
                    lit.surface_gravity,
                    lit.metallicity,
                    p.effective_temperature,
                    p.surface_gravity,
                    p.metallicity,
                    p.microturbulence,
                    dt,
                    dg,
                    dm,
                    solution.status,
                    elapsed
                ));
            }
            Err(message) => {
                out.push_str(&format!(
                    "| {} | {:.0} | {:.2} | {:+.2} | - | - | - | - | - | - | - | failed: {} | {:.1} |\n",
                    row.star,
                    lit.effective_temperature,
                    lit.surface_gravity,
                    lit.metallicity,
                    escape_pipes(message),
                    elapsed
                ));
            }
        }
    }

    let diffs: Vec<[f64; 3]> = rows.iter().filter_map(BenchmarkRow::difference).collect();
    if !diffs.is_empty() {
        let n = diffs.len() as f64;
        let mean = |k: usize| diffs.iter().map(|d| d[k]).sum::<f64>() / n;
        let rms = |k: usize| (diffs.iter().map(|d| d[k] * d[k]).sum::<f64>() / n).sqrt();
        out.push_str(&format!(
            "\nSolved {}/{} stars. Mean (rms) differences: ΔTeff {:+.0} ({:.0}) K, Δlogg {:+.2} ({:.2}), Δ[M/H] {:+.2} ({:.2})\n",
            diffs.len(),
            rows.len(),
            mean(0),
            rms(0),
            mean(1),
            rms(1),
            mean(2),
            rms(2)
        ));
    }
    out
}

fn escape_pipes(s: &str) -> String {
    s.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::report::BenchmarkSolution;
    use crate::solve::Status;

    #[test]
    fn benchmark_markdown_lists_failures_and_summary() {
        let rows = vec![
            BenchmarkRow {
                star: "Sun".into(),
                literature: StellarParameters::new(5777.0, 4.44, 0.0, f64::NAN),
                result: Ok(BenchmarkSolution {
                    parameters: StellarParameters::new(5827.0, 4.50, -0.02, 1.05),
                    status: Status::Converged,
                    evaluations: 18,
                    lines_used: 90,
                }),
                elapsed: Duration::from_millis(2500),
            },
            BenchmarkRow {
                star: "HD 122563".into(),
                literature: StellarParameters::new(4587.0, 1.61, -2.64, f64::NAN),
                result: Err("diagnostic | undefined".into()),
                elapsed: Duration::from_millis(400),
            },
        ];
        let md = format_benchmark_markdown(&rows);
        let lines: Vec<&str> = md.lines().collect();
        assert!(lines[2].starts_with("| Sun | 5777 | 4.44 | +0.00 | 5827 | 4.50 | -0.02 | 1.05 | +50 | +0.06 | -0.02 | Converged | 2.5 |"));
        assert!(lines[3].contains("failed: diagnostic \\| undefined"));
        assert!(md.contains("Solved 1/2 stars"));
    }

    #[test]
    fn state_lists_all_four_diagnostics() {
        let text = format_state(&EquilibriumState {
            excitation_slope: 0.001,
            ionisation_offset: -0.02,
            abundance_offset: 0.0,
            line_strength_slope: 0.3,
        });
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("-0.020000"));
    }
}
