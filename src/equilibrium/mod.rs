//! Excitation/ionisation equilibrium.
//!
//! Pipeline from a fitted transition table to an equilibrium state:
//!
//! 1. [`build_records`]: line records with `is_filtered` set by the
//!    equivalent-width (and optional width) filter
//! 2. [`evaluate_abundances`]: one abundance-evaluator call for the selected lines
//! 3. [`outliers::reject_outliers`]: state, single clipping pass, final state
//!
//! [`measure_state`] chains the three.

pub mod outliers;
pub mod state;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{AtomicTransition, LineRecord, StellarParameters, TransitionTable};
use crate::physics::{AbundanceEvaluator, PhotosphereInterpolator, SolarAbundances};

pub use outliers::{DEFAULT_SIGMA_CLIP, EquilibriumOutcome, reject_outliers};
pub use state::{Diagnostic, EquilibriumError, EquilibriumState, StateEvaluation, compute_state};

/// Measurement-quality filter applied before abundances are computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineFilter {
    /// Exclusive lower limit (mÅ).
    pub min_equivalent_width: f64,
    /// Exclusive upper limit (mÅ).
    pub max_equivalent_width: f64,
    /// Upper limit (Å) on the fitted profile width, when the width is known.
    pub max_stddev: Option<f64>,
}

impl Default for LineFilter {
    fn default() -> Self {
        Self {
            min_equivalent_width: 5.0,
            max_equivalent_width: 200.0,
            max_stddev: None,
        }
    }
}

impl LineFilter {
    pub fn accepts(&self, equivalent_width: f64, stddev: Option<f64>) -> bool {
        let ew_ok = equivalent_width.is_finite()
            && equivalent_width > self.min_equivalent_width
            && equivalent_width < self.max_equivalent_width;
        let width_ok = match (self.max_stddev, stddev) {
            (Some(limit), Some(s)) => s < limit,
            _ => true,
        };
        ew_ok && width_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquilibriumOptions {
    /// `None` (or a non-positive value) disables outlier rejection.
    pub outlier_sigma_clip: Option<f64>,
}

impl Default for EquilibriumOptions {
    fn default() -> Self {
        Self {
            outlier_sigma_clip: Some(DEFAULT_SIGMA_CLIP),
        }
    }
}

/// The collaborators used to turn line records into a state.
#[derive(Clone, Copy)]
pub struct EquilibriumContext<'a> {
    pub evaluator: &'a dyn AbundanceEvaluator,
    pub interpolator: &'a dyn PhotosphereInterpolator,
    pub solar: &'a dyn SolarAbundances,
}

/// One record per transition, `is_filtered` set by `filter`.
///
/// `stddev` gives the fitted width of a transition, when known.
pub fn build_records(
    table: &TransitionTable,
    filter: &LineFilter,
    stddev: impl Fn(usize) -> Option<f64>,
) -> Vec<LineRecord> {
    table
        .iter()
        .enumerate()
        .map(|(i, t)| LineRecord {
            is_filtered: filter.accepts(t.equivalent_width, stddev(i)),
            ..LineRecord::from_transition(t)
        })
        .collect()
}

/// Fresh abundances at `parameters` for every filtered, non-outlier record.
///
/// Other records get `NaN`. The evaluator is called once.
pub fn evaluate_abundances(
    records: &[LineRecord],
    parameters: &StellarParameters,
    ctx: &EquilibriumContext<'_>,
) -> Result<Vec<LineRecord>, EquilibriumError> {
    let photosphere = ctx.interpolator.interpolate(
        parameters.effective_temperature,
        parameters.surface_gravity,
        parameters.metallicity,
    )?;

    let selected: Vec<usize> = (0..records.len()).filter(|&i| records[i].is_used()).collect();
    let lines: Vec<AtomicTransition> = selected.iter().map(|&i| records[i].to_transition()).collect();
    let abundances = ctx.evaluator.abundances(&lines, &photosphere, parameters.microturbulence)?;
    if abundances.len() != lines.len() {
        return Err(EquilibriumError::AbundanceCount {
            expected: lines.len(),
            got: abundances.len(),
        });
    }

    let mut out: Vec<LineRecord> = records
        .iter()
        .map(|r| LineRecord {
            abundance: f64::NAN,
            ..r.clone()
        })
        .collect();
    for (&i, abundance) in selected.iter().zip(abundances) {
        out[i].abundance = abundance;
    }
    Ok(out)
}

/// Filtered records -> abundances -> state with one outlier-rejection pass.
pub fn measure_state(
    records: &[LineRecord],
    parameters: &StellarParameters,
    ctx: &EquilibriumContext<'_>,
    options: &EquilibriumOptions,
) -> Result<EquilibriumOutcome, EquilibriumError> {
    let records = evaluate_abundances(records, parameters, ctx)?;
    let outcome = reject_outliers(records, parameters.metallicity, ctx.solar, options.outlier_sigma_clip)?;
    info!(
        used = outcome.used_records().count(),
        flagged = outcome.flagged,
        state = ?outcome.state().to_array(),
        "equilibrium state measured"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CustomMasks;
    use crate::physics::{Asplund2009, EvaluatorError, GridBounds, Photosphere};

    /// Abundance rises with excitation potential unless Teff is 5800 K.
    struct SlopedEvaluator;

    impl AbundanceEvaluator for SlopedEvaluator {
        fn abundances(
            &self,
            lines: &[AtomicTransition],
            photosphere: &Photosphere,
            _microturbulence: f64,
        ) -> Result<Vec<f64>, EvaluatorError> {
            let slope = (photosphere.effective_temperature - 5800.0) * 1e-4;
            Ok(lines.iter().map(|l| 7.5 + slope * l.excitation_potential).collect())
        }
    }

    fn table() -> TransitionTable {
        let mut lines: Vec<AtomicTransition> = (0..6)
            .map(|i| AtomicTransition::new(5000.0 + 10.0 * i as f64, 26.0, i as f64, -1.0).with_equivalent_width(20.0 + 10.0 * i as f64))
            .collect();
        lines.push(AtomicTransition::new(5100.0, 26.1, 2.5, -2.0).with_equivalent_width(35.0));
        lines.push(AtomicTransition::new(5110.0, 26.0, 1.0, -2.0).with_equivalent_width(350.0));
        lines.push(AtomicTransition::new(5120.0, 26.0, 1.0, -2.0));
        TransitionTable::new(lines, CustomMasks::new()).unwrap()
    }

    #[test]
    fn filter_limits_are_exclusive() {
        let filter = LineFilter::default();
        assert!(!filter.accepts(5.0, None));
        assert!(filter.accepts(5.1, None));
        assert!(!filter.accepts(200.0, None));
        assert!(!filter.accepts(f64::NAN, None));

        let filter = LineFilter {
            max_stddev: Some(0.2),
            ..LineFilter::default()
        };
        assert!(filter.accepts(50.0, Some(0.1)));
        assert!(!filter.accepts(50.0, Some(0.25)));
        assert!(filter.accepts(50.0, None));
    }

    #[test]
    fn measures_state_from_filtered_lines() {
        let records = build_records(&table(), &LineFilter::default(), |_| None);
        assert_eq!(records.iter().filter(|r| r.is_filtered).count(), 7);

        let grid = GridBounds::default();
        let ctx = EquilibriumContext {
            evaluator: &SlopedEvaluator,
            interpolator: &grid,
            solar: &Asplund2009,
        };
        // Noise-level deviations make clipping meaningless on exact data.
        let options = EquilibriumOptions {
            outlier_sigma_clip: None,
        };

        let sun = StellarParameters::new(5800.0, 4.44, 0.0, 1.0);
        let outcome = measure_state(&records, &sun, &ctx, &options).unwrap();
        assert!(outcome.state().excitation_slope.abs() < 1e-12);
        assert!(outcome.records[7].abundance.is_nan());
        assert!(outcome.records[8].abundance.is_nan());

        let hot = StellarParameters::new(6300.0, 4.44, 0.0, 1.0);
        let outcome = measure_state(&records, &hot, &ctx, &options).unwrap();
        assert!((outcome.state().excitation_slope - 0.05).abs() < 1e-9);
    }

    #[test]
    fn out_of_grid_parameters_surface_as_evaluator_errors() {
        let records = build_records(&table(), &LineFilter::default(), |_| None);
        let grid = GridBounds::default();
        let ctx = EquilibriumContext {
            evaluator: &SlopedEvaluator,
            interpolator: &grid,
            solar: &Asplund2009,
        };
        let err = measure_state(
            &records,
            &StellarParameters::new(12000.0, 4.0, 0.0, 1.0),
            &ctx,
            &EquilibriumOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EquilibriumError::Evaluator(e) if e.is_out_of_grid()));
    }
}
