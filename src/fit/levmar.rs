//! Bounded Levenberg–Marquardt least squares.
//!
//! Minimises `Σ (y_i - f(x_i; p))²` over the free parameters of a
//! [`ParameterSet`]:
//!
//! - the Jacobian is approximated by forward differences (backward when the
//!   forward step would leave the bounds)
//! - each step solves the augmented system `[J; sqrt(λ)·D] δ = [r; 0]`
//!   where `D` holds the column norms of `J` (Marquardt scaling)
//! - parameters held on a bound the step pushes against are left out of it
//! - trial values are clipped into bounds, ties are recomputed, and the step
//!   is accepted only if the cost decreases
//! - hitting the iteration limit keeps the best parameters found

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::{trace, warn};

use crate::fit::params::ParameterSet;
use crate::math::solve_least_squares;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevMarConfig {
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit is converged.
    pub ftol: f64,
    /// Relative step size below which the fit is converged.
    pub xtol: f64,
    pub initial_lambda: f64,
}

impl Default for LevMarConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LevMarError {
    #[error("model and data have different lengths ({model} vs {data})")]
    LengthMismatch { model: usize, data: usize },
    #[error("model is not finite at the initial parameters")]
    NonFiniteModel,
    #[error("not enough data points ({points}) for {free} free parameters")]
    Underdetermined { points: usize, free: usize },
}

#[derive(Debug, Clone)]
pub struct LevMarFit {
    pub params: ParameterSet,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub iterations: usize,
    /// `false` when the iteration limit was reached first.
    pub converged: bool,
}

impl LevMarFit {
    fn at_minimum(params: ParameterSet, cost: f64, iterations: usize) -> Self {
        Self {
            params,
            cost,
            iterations,
            converged: true,
        }
    }
}

const MAX_LAMBDA: f64 = 1e12;
const MIN_LAMBDA: f64 = 1e-12;

/// Fit `model` to `(x, y)` starting from `params`.
///
/// `model` must return one value per element of `x`.
pub fn levenberg_marquardt<F>(
    model: F,
    x: &[f64],
    y: &[f64],
    params: ParameterSet,
    config: &LevMarConfig,
) -> Result<LevMarFit, LevMarError>
where
    F: Fn(&[f64], &ParameterSet) -> Vec<f64>,
{
    let mut params = params;
    params.apply_ties();

    let free = params.free_indices();
    let n = x.len();
    if y.len() != n {
        return Err(LevMarError::LengthMismatch {
            model: n,
            data: y.len(),
        });
    }
    if n < free.len() {
        return Err(LevMarError::Underdetermined {
            points: n,
            free: free.len(),
        });
    }

    let mut fitted = model(x, &params);
    let mut cost = sum_sq(y, &fitted);
    if !cost.is_finite() {
        return Err(LevMarError::NonFiniteModel);
    }
    if free.is_empty() {
        return Ok(LevMarFit::at_minimum(params, cost, 0));
    }

    let mut lambda = config.initial_lambda;
    for iteration in 1..=config.max_iterations {
        let jacobian = jacobian(&model, x, &params, &free, &fitted);
        let residual = DVector::from_iterator(n, y.iter().zip(&fitted).map(|(yi, fi)| yi - fi));

        let scale: Vec<f64> = (0..free.len())
            .map(|j| {
                let norm = jacobian.column(j).norm();
                if norm > 0.0 { norm } else { 1.0 }
            })
            .collect();

        // Raise λ until the step reduces the cost, or give up at MAX_LAMBDA.
        loop {
            let Some(delta) = projected_step(&jacobian, &residual, &scale, lambda, &params, &free) else {
                lambda *= 10.0;
                if lambda > MAX_LAMBDA {
                    return Ok(LevMarFit::at_minimum(params, cost, iteration));
                }
                continue;
            };

            let mut trial = params.clone();
            for (j, &index) in free.iter().enumerate() {
                trial.set_clipped(index, params.value(index) + delta[j]);
            }
            trial.apply_ties();

            let step: f64 = free
                .iter()
                .map(|&i| (trial.value(i) - params.value(i)).powi(2))
                .sum::<f64>()
                .sqrt();
            if step == 0.0 {
                // Every parameter that wanted to move is held on a bound.
                return Ok(LevMarFit::at_minimum(params, cost, iteration));
            }

            let trial_fitted = model(x, &trial);
            let trial_cost = sum_sq(y, &trial_fitted);

            if trial_cost.is_finite() && trial_cost < cost {
                let reduction = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
                let size: f64 = free.iter().map(|&i| params.value(i).powi(2)).sum::<f64>().sqrt();

                params = trial;
                fitted = trial_fitted;
                cost = trial_cost;
                lambda = (lambda / 10.0).max(MIN_LAMBDA);
                trace!(iteration, cost, lambda, "levmar step accepted");

                if cost == 0.0 || reduction < config.ftol || step <= config.xtol * (size + config.xtol) {
                    return Ok(LevMarFit::at_minimum(params, cost, iteration));
                }
                break;
            }

            lambda *= 10.0;
            if lambda > MAX_LAMBDA {
                // No downhill step left at machine precision: a minimum.
                return Ok(LevMarFit::at_minimum(params, cost, iteration));
            }
        }
    }

    warn!(
        iterations = config.max_iterations,
        cost, "levmar hit the iteration limit; keeping the best parameters"
    );
    Ok(LevMarFit {
        params,
        cost,
        iterations: config.max_iterations,
        converged: false,
    })
}

/// Damped Gauss–Newton step over the free parameters.
///
/// Parameters sitting on a bound that the step pushes against are dropped
/// from the system and the step is solved again without them. `None` when
/// the system is singular.
fn projected_step(
    jacobian: &DMatrix<f64>,
    residual: &DVector<f64>,
    scale: &[f64],
    lambda: f64,
    params: &ParameterSet,
    free: &[usize],
) -> Option<Vec<f64>> {
    let n = residual.len();
    let mut moving: Vec<usize> = (0..free.len()).collect();
    loop {
        let mut delta = vec![0.0; free.len()];
        if moving.is_empty() {
            return Some(delta);
        }

        let m = moving.len();
        let mut a = DMatrix::<f64>::zeros(n + m, m);
        for (c, &j) in moving.iter().enumerate() {
            for i in 0..n {
                a[(i, c)] = jacobian[(i, j)];
            }
            a[(n + c, c)] = lambda.sqrt() * scale[j];
        }
        let mut b = DVector::<f64>::zeros(n + m);
        b.rows_mut(0, n).copy_from(residual);

        let solution = solve_least_squares(&a, &b)?;
        for (c, &j) in moving.iter().enumerate() {
            delta[j] = solution[c];
        }

        let before = moving.len();
        moving.retain(|&j| !params.get(free[j]).pinned_by(delta[j]));
        if moving.len() == before {
            return Some(delta);
        }
    }
}

fn sum_sq(y: &[f64], fitted: &[f64]) -> f64 {
    y.iter().zip(fitted).map(|(a, b)| (a - b) * (a - b)).sum()
}

/// Forward-difference Jacobian of the model (not the residual) w.r.t. the free parameters.
fn jacobian<F>(model: &F, x: &[f64], params: &ParameterSet, free: &[usize], fitted: &[f64]) -> DMatrix<f64>
where
    F: Fn(&[f64], &ParameterSet) -> Vec<f64>,
{
    let n = x.len();
    let mut jac = DMatrix::<f64>::zeros(n, free.len());
    for (j, &index) in free.iter().enumerate() {
        let value = params.value(index);
        let mut h = f64::EPSILON.sqrt() * value.abs().max(1e-8);
        if params.get(index).clip(value + h) != value + h {
            h = -h;
        }

        let mut shifted = params.clone();
        shifted.get_mut(index).value = value + h;
        shifted.apply_ties();
        let shifted_fit = model(x, &shifted);

        for i in 0..n {
            let d = (shifted_fit[i] - fitted[i]) / h;
            jac[(i, j)] = if d.is_finite() { d } else { 0.0 };
        }
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::params::{Constraint, Parameter};

    fn line(x: &[f64], p: &ParameterSet) -> Vec<f64> {
        x.iter().map(|v| p.value(0) * v + p.value(1)).collect()
    }

    #[test]
    fn recovers_linear_parameters() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.5 * v - 2.0).collect();
        let mut params = ParameterSet::new();
        params.push(Parameter::new("slope", 0.1));
        params.push(Parameter::new("offset", 0.0));

        let fit = levenberg_marquardt(line, &x, &y, params, &LevMarConfig::default()).unwrap();
        assert!((fit.params.value(0) - 1.5).abs() < 1e-6);
        assert!((fit.params.value(1) + 2.0).abs() < 1e-6);
        assert!(fit.cost < 1e-10);
    }

    #[test]
    fn fixed_parameters_do_not_move_and_bounds_hold() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        let mut params = ParameterSet::new();
        let mut slope = Parameter::new("slope", 0.5);
        slope.bounds = Some((0.0, 2.0));
        params.push(slope);
        let mut offset = Parameter::new("offset", 1.0);
        offset.constraint = Constraint::Fixed;
        params.push(offset);

        let fit = levenberg_marquardt(line, &x, &y, params, &LevMarConfig::default()).unwrap();
        assert_eq!(fit.params.value(1), 1.0);
        assert!(fit.params.value(0) <= 2.0);
        assert!((fit.params.value(0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn parameters_pinned_on_a_bound_let_the_rest_converge() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        let mut params = ParameterSet::new();
        let mut slope = Parameter::new("slope", 2.0);
        slope.bounds = Some((0.0, 2.0));
        params.push(slope);
        params.push(Parameter::new("offset", 0.0));

        let fit = levenberg_marquardt(line, &x, &y, params, &LevMarConfig::default()).unwrap();
        assert!(fit.converged);
        assert!(fit.iterations < 50);
        assert_eq!(fit.params.value(0), 2.0);
        // Best offset with the slope held at 2: mean(x) + 1.
        assert!((fit.params.value(1) - 10.5).abs() < 1e-6);
    }

    #[test]
    fn iteration_limit_keeps_the_best_parameters() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.4).collect();
        let y: Vec<f64> = x.iter().map(|v| (0.5 * v).exp()).collect();
        let mut params = ParameterSet::new();
        params.push(Parameter::new("rate", 0.1));
        let exponential = |x: &[f64], p: &ParameterSet| x.iter().map(|v| (p.value(0) * v).exp()).collect::<Vec<f64>>();
        let start = sum_sq(&y, &exponential(&x, &params));

        let config = LevMarConfig {
            max_iterations: 1,
            ..LevMarConfig::default()
        };
        let fit = levenberg_marquardt(exponential, &x, &y, params, &config).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 1);
        assert!(fit.cost < start);
    }

    #[test]
    fn non_finite_start_is_an_error() {
        let x = [0.0, 1.0, 2.0];
        let y = [0.0, 1.0, 2.0];
        let mut params = ParameterSet::new();
        params.push(Parameter::new("slope", f64::NAN));
        params.push(Parameter::new("offset", 0.0));
        let err = levenberg_marquardt(line, &x, &y, params, &LevMarConfig::default()).unwrap_err();
        assert_eq!(err, LevMarError::NonFiniteModel);
    }
}
