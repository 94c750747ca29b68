//! Solving for stellar parameters.
//!
//! - `newton`: generic multivariate root-finder
//! - `stellar`: the equilibrium objective and the estimation driver
//! - `observe`: observer hooks shared by both

pub mod newton;
pub mod observe;
pub mod stellar;

use thiserror::Error;

use crate::equilibrium::EquilibriumError;
use crate::fit::FitError;

pub use newton::{Action, Event, NewtonConfig, REJECTED_RESIDUAL, Solution, Status, newton};
pub use observe::{Observer, SolveLog};
pub use stellar::{EstimateOptions, EstimateRequest, Physics, StellarEstimate, estimate_stellar_parameters};

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),
    #[error("initial guess must be finite")]
    NonFiniteStart,
    #[error("objective cannot be evaluated at the initial guess: {0}")]
    InitialPointRejected(String),
    #[error("fitting frequency {0} is not supported: profiles are fitted once, before solving")]
    UnsupportedFittingFrequency(usize),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Equilibrium(#[from] EquilibriumError),
}
