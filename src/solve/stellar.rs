//! Estimate `(Teff, logg, [M/H], ξ)` by driving the equilibrium state to zero.
//!
//! Profiles are fitted once at the initial guess (or the table's equivalent
//! widths are reused). The initial equilibrium evaluation, with outlier
//! rejection, fixes the set of lines used by the objective; every trial point
//! then gets fresh abundances for exactly those lines.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{LineRecord, Spectrum, StellarParameters, TransitionTable};
use crate::equilibrium::{
    EquilibriumContext, EquilibriumError, EquilibriumOptions, EquilibriumOutcome, EquilibriumState, LineFilter,
    build_records, compute_state, evaluate_abundances, measure_state,
};
use crate::fit::{FitContext, FittedLines, ProfileOptions, fit_atomic_transitions};
use crate::physics::{AbundanceEvaluator, PhotosphereInterpolator, SolarAbundances, Synthesiser};
use crate::solve::newton::{NewtonConfig, Status, newton};
use crate::solve::observe::Observer;
use crate::solve::SolveError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateOptions {
    pub newton: NewtonConfig,
    /// Weight of the abundance offset in the objective.
    pub abundance_offset_scale: f64,
    /// Refit profiles every N evaluations. Only 0 (fit once) is supported.
    pub fitting_frequency: usize,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            newton: NewtonConfig::default(),
            abundance_offset_scale: 0.1,
            fitting_frequency: 0,
        }
    }
}

impl EstimateOptions {
    pub fn validate(&self) -> Result<(), SolveError> {
        if self.fitting_frequency != 0 {
            return Err(SolveError::UnsupportedFittingFrequency(self.fitting_frequency));
        }
        if !(self.abundance_offset_scale.is_finite() && self.abundance_offset_scale > 0.0) {
            return Err(SolveError::InvalidConfig(
                "abundance_offset_scale must be positive".into(),
            ));
        }
        self.newton.validate()
    }
}

/// External collaborators.
#[derive(Clone, Copy)]
pub struct Physics<'a> {
    pub evaluator: &'a dyn AbundanceEvaluator,
    pub interpolator: &'a dyn PhotosphereInterpolator,
    pub synthesiser: Option<&'a dyn Synthesiser>,
    pub solar: &'a dyn SolarAbundances,
}

impl<'a> Physics<'a> {
    pub fn equilibrium(&self) -> EquilibriumContext<'a> {
        EquilibriumContext {
            evaluator: self.evaluator,
            interpolator: self.interpolator,
            solar: self.solar,
        }
    }
}

pub struct EstimateRequest<'a> {
    pub table: &'a TransitionTable,
    /// Spectra to fit at the initial guess; `None` reuses the table's equivalent widths.
    pub spectra: Option<&'a [Spectrum]>,
    pub initial: StellarParameters,
    pub profile: &'a ProfileOptions,
    pub filter: &'a LineFilter,
    pub equilibrium: &'a EquilibriumOptions,
    pub estimate: &'a EstimateOptions,
    pub threads: usize,
}

#[derive(Debug, Clone)]
pub struct StellarEstimate {
    pub initial: StellarParameters,
    pub parameters: StellarParameters,
    pub status: Status,
    pub evaluations: usize,
    pub iterations: usize,
    /// Objective at `parameters` (abundance offset scaled).
    pub residual: [f64; 4],
    /// Unscaled state at `parameters`.
    pub state: EquilibriumState,
    pub initial_outcome: EquilibriumOutcome,
    /// Used lines with abundances at `parameters`.
    pub records: Vec<LineRecord>,
    pub fitted: Option<FittedLines>,
}

/// Objective vector at `theta` for a fixed set of lines.
pub fn state_vector(
    lines: &[LineRecord],
    theta: &StellarParameters,
    ctx: &EquilibriumContext<'_>,
    abundance_offset_scale: f64,
) -> Result<[f64; 4], EquilibriumError> {
    let records = evaluate_abundances(lines, theta, ctx)?;
    let s = compute_state(&records, theta.metallicity, ctx.solar)?.state;
    Ok([
        s.excitation_slope,
        s.ionisation_offset,
        abundance_offset_scale * s.abundance_offset,
        s.line_strength_slope,
    ])
}

pub fn estimate_stellar_parameters<Obs>(
    request: &EstimateRequest<'_>,
    physics: &Physics<'_>,
    observer: Obs,
) -> Result<StellarEstimate, SolveError>
where
    Obs: Observer<4, EquilibriumError>,
{
    request.estimate.validate()?;
    let initial = request.initial;
    if !initial.is_finite() {
        return Err(SolveError::NonFiniteStart);
    }

    let fitted = match request.spectra {
        Some(spectra) => {
            let ctx = FitContext {
                spectra,
                parameters: initial.into(),
                options: request.profile,
                synthesiser: physics.synthesiser,
                interpolator: physics.interpolator,
                threads: request.threads,
            };
            Some(fit_atomic_transitions(request.table, &ctx, &mut ())?)
        }
        None => None,
    };
    let records = match &fitted {
        Some(f) => build_records(&f.table, request.filter, |i| f.stddev(i)),
        None => build_records(request.table, request.filter, |_| None),
    };

    let ctx = physics.equilibrium();
    let initial_outcome = measure_state(&records, &initial, &ctx, request.equilibrium)?;
    let lines: Vec<LineRecord> = initial_outcome.used_records().cloned().collect();
    info!(lines = lines.len(), initial = %initial, "solving for stellar parameters");

    let scale = request.estimate.abundance_offset_scale;
    let objective = |x: &[f64; 4]| state_vector(&lines, &StellarParameters::from_array(*x), &ctx, scale);
    let solution = newton(objective, initial.to_array(), &request.estimate.newton, observer)?;

    let parameters = StellarParameters::from_array(solution.x);
    let records = evaluate_abundances(&lines, &parameters, &ctx)?;
    let state = compute_state(&records, parameters.metallicity, ctx.solar)?.state;
    info!(
        status = ?solution.status,
        evaluations = solution.evaluations,
        estimate = %parameters,
        "stellar parameter estimate"
    );

    Ok(StellarEstimate {
        initial,
        parameters,
        status: solution.status,
        evaluations: solution.evaluations,
        iterations: solution.iterations,
        residual: solution.residual,
        state,
        initial_outcome,
        records,
        fitted,
    })
}
