//! The four equilibrium diagnostics.
//!
//! At the true stellar parameters, abundances derived from individual lines of
//! one element should not depend on excitation potential or line strength,
//! neutral and ionised lines should agree, and the mean abundance should match
//! the scaled-solar value. Each diagnostic measures one of those departures.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{LineRecord, Species};
use crate::math::{LinearFit, RegressionError, linear_regression, mean};
use crate::physics::{EvaluatorError, SolarAbundances};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    ExcitationSlope,
    IonisationOffset,
    AbundanceOffset,
    LineStrengthSlope,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExcitationSlope => "excitation slope",
            Self::IonisationOffset => "ionisation offset",
            Self::AbundanceOffset => "abundance offset",
            Self::LineStrengthSlope => "line strength slope",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EquilibriumError {
    #[error("{diagnostic} is undefined: {reason}")]
    DiagnosticUndefined { diagnostic: Diagnostic, reason: String },
    #[error("no solar abundance for species {0}")]
    UnknownElement(Species),
    #[error("{got} abundances returned for {expected} lines")]
    AbundanceCount { expected: usize, got: usize },
    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),
}

impl EquilibriumError {
    fn undefined(diagnostic: Diagnostic, reason: impl Into<String>) -> Self {
        Self::DiagnosticUndefined {
            diagnostic,
            reason: reason.into(),
        }
    }

    fn from_regression(diagnostic: Diagnostic, e: RegressionError) -> Self {
        Self::undefined(diagnostic, e.to_string())
    }
}

/// `[excitation_slope, ionisation_offset, abundance_offset, line_strength_slope]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumState {
    /// d(abundance)/d(excitation potential), neutral lines (dex/eV).
    pub excitation_slope: f64,
    /// mean(neutral) - mean(ionised) (dex).
    pub ionisation_offset: f64,
    /// mean(abundance - (solar + [M/H])) over all used lines (dex).
    pub abundance_offset: f64,
    /// d(abundance)/d(reduced EW), neutral lines.
    pub line_strength_slope: f64,
}

impl EquilibriumState {
    pub fn to_array(self) -> [f64; 4] {
        [
            self.excitation_slope,
            self.ionisation_offset,
            self.abundance_offset,
            self.line_strength_slope,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// A state together with the regressions it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateEvaluation {
    pub state: EquilibriumState,
    /// Abundance vs excitation potential (neutral lines).
    pub excitation_fit: LinearFit,
    /// Abundance vs reduced equivalent width (neutral lines).
    pub line_strength_fit: LinearFit,
    pub neutral_lines: usize,
    pub ionised_lines: usize,
}

/// Compute the equilibrium state from the used lines (`is_used`) in `records`.
pub fn compute_state(
    records: &[LineRecord],
    metallicity: f64,
    solar: &dyn SolarAbundances,
) -> Result<StateEvaluation, EquilibriumError> {
    let used: Vec<&LineRecord> = records.iter().filter(|r| r.is_used()).collect();
    let (neutral, ionised): (Vec<&LineRecord>, Vec<&LineRecord>) = used.iter().copied().partition(|r| r.is_neutral());

    let excitation: Vec<f64> = neutral.iter().map(|r| r.excitation_potential).collect();
    let reduced_ew: Vec<f64> = neutral.iter().map(|r| r.reduced_equivalent_width()).collect();
    let neutral_abundances: Vec<f64> = neutral.iter().map(|r| r.abundance).collect();
    let ionised_abundances: Vec<f64> = ionised.iter().map(|r| r.abundance).collect();

    let excitation_fit = linear_regression(&excitation, &neutral_abundances)
        .map_err(|e| EquilibriumError::from_regression(Diagnostic::ExcitationSlope, e))?;

    let ionisation_offset = match (mean(&neutral_abundances), mean(&ionised_abundances)) {
        (Some(n), Some(i)) => n - i,
        (_, None) => {
            return Err(EquilibriumError::undefined(Diagnostic::IonisationOffset, "no ionised lines"));
        }
        (None, _) => {
            return Err(EquilibriumError::undefined(Diagnostic::IonisationOffset, "no neutral lines"));
        }
    };

    let mut differences = Vec::with_capacity(used.len());
    for r in &used {
        let reference = solar
            .abundance(r.species.element())
            .ok_or(EquilibriumError::UnknownElement(r.species))?;
        differences.push(r.abundance - (reference + metallicity));
    }
    let abundance_offset = mean(&differences)
        .ok_or_else(|| EquilibriumError::undefined(Diagnostic::AbundanceOffset, "no lines"))?;

    let line_strength_fit = linear_regression(&reduced_ew, &neutral_abundances)
        .map_err(|e| EquilibriumError::from_regression(Diagnostic::LineStrengthSlope, e))?;

    let state = EquilibriumState {
        excitation_slope: excitation_fit.slope,
        ionisation_offset,
        abundance_offset,
        line_strength_slope: line_strength_fit.slope,
    };
    let checks = [
        (Diagnostic::ExcitationSlope, state.excitation_slope),
        (Diagnostic::IonisationOffset, state.ionisation_offset),
        (Diagnostic::AbundanceOffset, state.abundance_offset),
        (Diagnostic::LineStrengthSlope, state.line_strength_slope),
    ];
    if let Some((diagnostic, _)) = checks.iter().find(|(_, v)| !v.is_finite()) {
        return Err(EquilibriumError::undefined(*diagnostic, "not finite"));
    }

    Ok(StateEvaluation {
        state,
        excitation_fit,
        line_strength_fit,
        neutral_lines: neutral.len(),
        ionised_lines: ionised.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AtomicTransition;
    use crate::physics::Asplund2009;

    fn record(species: f64, ep: f64, ew: f64, abundance: f64) -> LineRecord {
        let mut r = LineRecord::from_transition(&AtomicTransition::new(6000.0, species, ep, -1.0).with_equivalent_width(ew));
        r.abundance = abundance;
        r.is_filtered = true;
        r
    }

    #[test]
    fn flat_abundances_give_zero_slopes() {
        let mut records: Vec<LineRecord> = (1..=5).map(|i| record(26.0, i as f64, 10.0 * i as f64, 7.5)).collect();
        records.push(record(26.1, 2.0, 40.0, 7.5));
        records.push(record(26.1, 3.0, 60.0, 7.5));

        let eval = compute_state(&records, 0.0, &Asplund2009).unwrap();
        assert!(eval.state.excitation_slope.abs() < 1e-12);
        assert!(eval.state.ionisation_offset.abs() < 1e-12);
        assert!(eval.state.abundance_offset.abs() < 1e-12);
        assert!(eval.state.line_strength_slope.abs() < 1e-12);
        assert_eq!((eval.neutral_lines, eval.ionised_lines), (5, 2));
    }

    #[test]
    fn diagnostics_follow_the_abundances() {
        // abundance = 7.3 + 0.1 * ep on neutrals; ionised at 7.8.
        let mut records: Vec<LineRecord> =
            (0..4).map(|i| record(26.0, i as f64, 50.0, 7.3 + 0.1 * i as f64)).collect();
        records.push(record(26.1, 1.0, 50.0, 7.8));
        records.push(record(26.0, 9.0, 50.0, 99.0));
        records.last_mut().unwrap().is_outlier = true;

        let eval = compute_state(&records, 0.1, &Asplund2009).unwrap_err();
        // Identical EWs make the line strength slope undefined.
        assert!(matches!(
            eval,
            EquilibriumError::DiagnosticUndefined {
                diagnostic: Diagnostic::LineStrengthSlope,
                ..
            }
        ));

        for (i, r) in records.iter_mut().take(4).enumerate() {
            r.equivalent_width = 20.0 + 10.0 * i as f64;
        }
        let eval = compute_state(&records, 0.1, &Asplund2009).unwrap();
        assert!((eval.state.excitation_slope - 0.1).abs() < 1e-12);
        assert!((eval.state.ionisation_offset - (7.45 - 7.8)).abs() < 1e-12);
        // (7.3 + 7.4 + 7.5 + 7.6 + 7.8) / 5 - 7.6
        assert!((eval.state.abundance_offset - (7.52 - 7.6)).abs() < 1e-12);
    }

    #[test]
    fn zero_excitation_spread_is_undefined() {
        let mut records: Vec<LineRecord> = (0..4).map(|i| record(26.0, 2.0, 20.0 + i as f64, 7.5)).collect();
        records.push(record(26.1, 2.0, 30.0, 7.5));
        let err = compute_state(&records, 0.0, &Asplund2009).unwrap_err();
        assert!(matches!(
            err,
            EquilibriumError::DiagnosticUndefined {
                diagnostic: Diagnostic::ExcitationSlope,
                ..
            }
        ));
    }

    #[test]
    fn missing_ionised_lines_is_undefined() {
        let records: Vec<LineRecord> = (0..4).map(|i| record(26.0, i as f64, 20.0 + i as f64, 7.5)).collect();
        let err = compute_state(&records, 0.0, &Asplund2009).unwrap_err();
        assert!(matches!(
            err,
            EquilibriumError::DiagnosticUndefined {
                diagnostic: Diagnostic::IonisationOffset,
                ..
            }
        ));
    }

    #[test]
    fn unknown_element_is_reported() {
        let mut records: Vec<LineRecord> = (0..3).map(|i| record(26.0, i as f64, 20.0 + i as f64, 7.5)).collect();
        records.push(record(43.1, 1.0, 30.0, 1.0));
        let err = compute_state(&records, 0.0, &Asplund2009).unwrap_err();
        assert!(matches!(err, EquilibriumError::UnknownElement(s) if s.element() == 43));
    }
}
