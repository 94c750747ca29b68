//! Single-pass sigma clipping against the diagnostic regressions.
//!
//! The state is computed once, lines that sit far from either neutral-line
//! regression are flagged, and the state is computed a second time without
//! them. There is no further iteration: the second state is final.
//!
//! Lines are judged by their distance from the regression lines rather than
//! by their position in the distribution, so that a poor initial guess does
//! not strip the weakest or strongest lines.

use tracing::debug;

use crate::domain::LineRecord;
use crate::equilibrium::state::{EquilibriumError, EquilibriumState, StateEvaluation, compute_state};
use crate::math::std_dev;
use crate::physics::SolarAbundances;

/// Default clipping threshold (in units of the deviation spread).
pub const DEFAULT_SIGMA_CLIP: f64 = 3.0;

/// Result of the equilibrium evaluation with outlier rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct EquilibriumOutcome {
    /// State before any line was rejected.
    pub initial: StateEvaluation,
    /// State after rejection (identical to `initial` when nothing was flagged).
    pub refit: StateEvaluation,
    /// Records with `is_outlier` updated.
    pub records: Vec<LineRecord>,
    /// Lines flagged by this pass.
    pub flagged: usize,
}

impl EquilibriumOutcome {
    pub fn state(&self) -> EquilibriumState {
        self.refit.state
    }

    pub fn used_records(&self) -> impl Iterator<Item = &LineRecord> {
        self.records.iter().filter(|r| r.is_used())
    }
}

/// `|d| / std(|d|)` with a zero spread mapping every line to 0.
fn normalised(deviations: &[f64]) -> Vec<f64> {
    match std_dev(deviations) {
        Some(spread) if spread > 0.0 && spread.is_finite() => deviations.iter().map(|d| d / spread).collect(),
        _ => vec![0.0; deviations.len()],
    }
}

/// Compute the state, flag outliers once, and recompute.
///
/// A threshold that is absent, non-finite or not positive disables rejection.
pub fn reject_outliers(
    mut records: Vec<LineRecord>,
    metallicity: f64,
    solar: &dyn SolarAbundances,
    sigma_clip: Option<f64>,
) -> Result<EquilibriumOutcome, EquilibriumError> {
    let initial = compute_state(&records, metallicity, solar)?;

    let Some(limit) = sigma_clip.filter(|l| l.is_finite() && *l > 0.0) else {
        return Ok(EquilibriumOutcome {
            initial,
            refit: initial,
            records,
            flagged: 0,
        });
    };

    let used: Vec<usize> = (0..records.len()).filter(|&i| records[i].is_used()).collect();
    let excitation: Vec<f64> = used
        .iter()
        .map(|&i| (initial.excitation_fit.predict(records[i].excitation_potential) - records[i].abundance).abs())
        .collect();
    let line_strength: Vec<f64> = used
        .iter()
        .map(|&i| {
            let r = &records[i];
            (initial.line_strength_fit.predict(r.reduced_equivalent_width()) - r.abundance).abs()
        })
        .collect();
    let excitation = normalised(&excitation);
    let line_strength = normalised(&line_strength);

    let mut flagged = 0;
    for (k, &i) in used.iter().enumerate() {
        if excitation[k] > limit || line_strength[k] > limit {
            records[i].is_outlier = true;
            flagged += 1;
            debug!(
                wavelength = records[i].wavelength,
                species = %records[i].species,
                excitation_sigma = excitation[k],
                line_strength_sigma = line_strength[k],
                "line flagged as outlier"
            );
        }
    }

    let refit = if flagged == 0 {
        initial
    } else {
        compute_state(&records, metallicity, solar)?
    };

    Ok(EquilibriumOutcome {
        initial,
        refit,
        records,
        flagged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AtomicTransition;
    use crate::physics::Asplund2009;

    fn record(species: f64, ep: f64, ew: f64, abundance: f64) -> LineRecord {
        let t = AtomicTransition::new(6000.0, species, ep, -1.0).with_equivalent_width(ew);
        LineRecord {
            abundance,
            is_filtered: true,
            ..LineRecord::from_transition(&t)
        }
    }

    /// Nine flat neutral lines, one discrepant neutral line, three ionised lines.
    fn records() -> Vec<LineRecord> {
        let mut records: Vec<LineRecord> = (0..9)
            .map(|i| {
                let t = -0.8 + 0.2 * i as f64;
                record(26.0, 1.0 + i as f64, 50.0 * t.exp(), 7.5)
            })
            .collect();
        records.push(record(26.0, 5.0, 50.0, 9.5));
        for ep in [2.0, 3.0, 4.0] {
            records.push(record(26.1, ep, 40.0, 7.5));
        }
        records
    }

    #[test]
    fn discrepant_line_is_flagged_and_state_recomputed() {
        let outcome = reject_outliers(records(), 0.0, &Asplund2009, Some(DEFAULT_SIGMA_CLIP)).unwrap();
        assert_eq!(outcome.flagged, 1);
        assert!(outcome.records[9].is_outlier);
        assert!(outcome.records.iter().enumerate().all(|(i, r)| i == 9 || !r.is_outlier));

        assert!((outcome.initial.state.ionisation_offset - 0.2).abs() < 1e-9);
        assert!(outcome.state().ionisation_offset.abs() < 1e-12);
        assert!(outcome.state().abundance_offset.abs() < 1e-12);
        assert_eq!(outcome.used_records().count(), 12);
    }

    #[test]
    fn second_pass_flags_nothing_new() {
        let first = reject_outliers(records(), 0.0, &Asplund2009, Some(3.0)).unwrap();
        let second = reject_outliers(first.records.clone(), 0.0, &Asplund2009, Some(3.0)).unwrap();
        assert_eq!(second.flagged, 0);
        assert_eq!(second.records, first.records);
        assert_eq!(second.state(), first.state());
    }

    #[test]
    fn disabled_threshold_returns_initial_state() {
        for clip in [None, Some(f64::NAN), Some(0.0), Some(-1.0)] {
            let outcome = reject_outliers(records(), 0.0, &Asplund2009, clip).unwrap();
            assert_eq!(outcome.flagged, 0);
            assert_eq!(outcome.refit, outcome.initial);
            assert!(!outcome.records[9].is_outlier);
        }
    }
}
