//! Multivariate Newton root-finder with a finite-difference Jacobian.
//!
//! Each iteration:
//!
//! 1. approximates `J` column by column with forward differences (backward if
//!    the forward point is rejected)
//! 2. solves `J δ = -F` by SVD
//! 3. halves the step until `‖F‖²` decreases
//!
//! Points the objective cannot evaluate are not errors: they score
//! [`REJECTED_RESIDUAL`] in every component, so the line search backs away
//! from them.

use std::fmt::Display;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::math::solve_least_squares;
use crate::solve::SolveError;
use crate::solve::observe::Observer;

/// Residual assigned to every component at a rejected trial point.
pub const REJECTED_RESIDUAL: f64 = 1.0e3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Total objective evaluations allowed (Jacobian columns included).
    pub max_evaluations: usize,
    /// Converged when every step component is below `x_tol * (|x| + x_tol)`.
    pub x_tol: f64,
    /// Converged when every residual component is below this.
    pub residual_tol: f64,
    /// Finite-difference step relative to `max(|x|, step_floor)`.
    pub relative_step: f64,
    pub step_floor: f64,
    /// Step halvings tried before the line search gives up.
    pub max_halvings: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 100,
            x_tol: 1e-10,
            residual_tol: 1e-5,
            relative_step: 1e-3,
            step_floor: 1.0,
            max_halvings: 10,
        }
    }
}

impl NewtonConfig {
    pub fn validate(&self) -> Result<(), SolveError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if self.max_evaluations == 0 {
            return Err(SolveError::InvalidConfig("max_evaluations must be positive".into()));
        }
        if !(self.x_tol.is_finite() && self.x_tol >= 0.0) {
            return Err(SolveError::InvalidConfig("x_tol must be finite and non-negative".into()));
        }
        if !(self.residual_tol.is_finite() && self.residual_tol >= 0.0) {
            return Err(SolveError::InvalidConfig(
                "residual_tol must be finite and non-negative".into(),
            ));
        }
        if !positive(self.relative_step) || !positive(self.step_floor) {
            return Err(SolveError::InvalidConfig(
                "relative_step and step_floor must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Residual or step below tolerance.
    Converged,
    /// Evaluation budget exhausted.
    MaxEvaluations,
    /// Stopped early due to an observer decision.
    StoppedByObserver,
    /// No step reduced the residual (or the linear solve failed).
    Stalled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution<const N: usize> {
    pub status: Status,
    /// Best point found.
    pub x: [f64; N],
    /// Residual at `x`.
    pub residual: [f64; N],
    pub evaluations: usize,
    pub iterations: usize,
}

/// Events emitted by the Newton solver.
pub enum Event<'a, const N: usize, E> {
    /// The objective failed at `x`; it scores [`REJECTED_RESIDUAL`].
    Rejected { x: &'a [f64; N], error: &'a E },
    /// A step was accepted.
    Step {
        iteration: usize,
        x: &'a [f64; N],
        residual: &'a [f64; N],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stop and return the current point.
    StopEarly,
}

/// Evaluate, mapping failures to the sentinel. Returns `(residual, accepted, action)`.
fn evaluate<const N: usize, F, E, Obs>(
    objective: &mut F,
    x: &[f64; N],
    observer: &mut Obs,
    evaluations: &mut usize,
) -> ([f64; N], bool, Option<Action>)
where
    F: FnMut(&[f64; N]) -> Result<[f64; N], E>,
    E: Display,
    Obs: Observer<N, E>,
{
    *evaluations += 1;
    match objective(x) {
        Ok(r) if r.iter().all(|v| v.is_finite()) => (r, true, None),
        Ok(_) => ([REJECTED_RESIDUAL; N], false, None),
        Err(error) => {
            debug!(x = ?x, %error, "trial point rejected");
            let action = observer.observe(&Event::Rejected { x, error: &error });
            ([REJECTED_RESIDUAL; N], false, action)
        }
    }
}

fn norm_sq<const N: usize>(r: &[f64; N]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Find `x` with `objective(x) ≈ 0`, starting from `x0`.
///
/// Fails only for an invalid configuration or when `x0` itself is rejected.
pub fn newton<const N: usize, F, E, Obs>(
    mut objective: F,
    x0: [f64; N],
    config: &NewtonConfig,
    mut observer: Obs,
) -> Result<Solution<N>, SolveError>
where
    F: FnMut(&[f64; N]) -> Result<[f64; N], E>,
    E: Display,
    Obs: Observer<N, E>,
{
    config.validate()?;
    if x0.iter().any(|v| !v.is_finite()) {
        return Err(SolveError::NonFiniteStart);
    }

    let mut x = x0;
    let mut f = match objective(&x) {
        Ok(r) if r.iter().all(|v| v.is_finite()) => r,
        Ok(_) => return Err(SolveError::InitialPointRejected("non-finite residual".into())),
        Err(e) => return Err(SolveError::InitialPointRejected(e.to_string())),
    };
    let mut evaluations = 1;

    let finish = |status, x, residual, evaluations, iterations| {
        Ok(Solution {
            status,
            x,
            residual,
            evaluations,
            iterations,
        })
    };

    let mut iteration = 0;
    loop {
        if f.iter().all(|v| v.abs() <= config.residual_tol) {
            return finish(Status::Converged, x, f, evaluations, iteration);
        }
        if evaluations + N > config.max_evaluations {
            return finish(Status::MaxEvaluations, x, f, evaluations, iteration);
        }
        iteration += 1;

        // Jacobian.
        let mut jac = DMatrix::<f64>::zeros(N, N);
        for j in 0..N {
            let h = config.relative_step * x[j].abs().max(config.step_floor);
            let mut column = None;
            for step in [h, -h] {
                let mut xh = x;
                xh[j] += step;
                let (fh, accepted, action) = evaluate(&mut objective, &xh, &mut observer, &mut evaluations);
                if action == Some(Action::StopEarly) {
                    return finish(Status::StoppedByObserver, x, f, evaluations, iteration);
                }
                if accepted {
                    column = Some((fh, step));
                    break;
                }
            }
            if let Some((fh, step)) = column {
                for i in 0..N {
                    jac[(i, j)] = (fh[i] - f[i]) / step;
                }
            }
        }

        let rhs = DVector::from_iterator(N, f.iter().map(|v| -v));
        let Some(delta) = solve_least_squares(&jac, &rhs) else {
            debug!(iteration, "Jacobian solve failed");
            return finish(Status::Stalled, x, f, evaluations, iteration);
        };

        // Backtracking line search on ‖F‖².
        let current = norm_sq(&f);
        let mut t = 1.0;
        let mut accepted_step = None;
        for _ in 0..=config.max_halvings {
            if evaluations >= config.max_evaluations {
                return finish(Status::MaxEvaluations, x, f, evaluations, iteration);
            }
            let mut xt = x;
            for i in 0..N {
                xt[i] += t * delta[i];
            }
            let (ft, accepted, action) = evaluate(&mut objective, &xt, &mut observer, &mut evaluations);
            if action == Some(Action::StopEarly) {
                return finish(Status::StoppedByObserver, x, f, evaluations, iteration);
            }
            if accepted && norm_sq(&ft) < current {
                accepted_step = Some((xt, ft));
                break;
            }
            t *= 0.5;
        }

        let Some((xt, ft)) = accepted_step else {
            debug!(iteration, "line search found no descent");
            return finish(Status::Stalled, x, f, evaluations, iteration);
        };

        let small_step = (0..N).all(|i| (xt[i] - x[i]).abs() <= config.x_tol * (x[i].abs() + config.x_tol));
        x = xt;
        f = ft;
        debug!(iteration, x = ?x, residual = ?f, evaluations = evaluations, "newton step");

        let event = Event::Step {
            iteration,
            x: &x,
            residual: &f,
        };
        if observer.observe(&event) == Some(Action::StopEarly) {
            return finish(Status::StoppedByObserver, x, f, evaluations, iteration);
        }
        if small_step {
            return finish(Status::Converged, x, f, evaluations, iteration);
        }
    }
}
