//! Simple linear regression (`y = slope * x + intercept`).

use thiserror::Error;

/// Why a regression could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegressionError {
    #[error("need at least 2 points, got {0}")]
    TooFewPoints(usize),
    #[error("all x values are identical")]
    DegenerateX,
    #[error("x and y have different lengths")]
    LengthMismatch,
    #[error("non-finite input")]
    NonFinite,
}

/// Ordinary least-squares line through a set of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub n: usize,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Fit `y = slope * x + intercept` by ordinary least squares.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Result<LinearFit, RegressionError> {
    if x.len() != y.len() {
        return Err(RegressionError::LengthMismatch);
    }
    let n = x.len();
    if n < 2 {
        return Err(RegressionError::TooFewPoints(n));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(RegressionError::NonFinite);
    }

    let x_mean = x.iter().sum::<f64>() / n as f64;
    let y_mean = y.iter().sum::<f64>() / n as f64;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - x_mean;
        sxx += dx * dx;
        sxy += dx * (yi - y_mean);
    }
    if sxx == 0.0 {
        return Err(RegressionError::DegenerateX);
    }

    let slope = sxy / sxx;
    Ok(LinearFit {
        slope,
        intercept: y_mean - slope * x_mean,
        n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y: Vec<f64> = x.iter().map(|v| 0.5 - 2.0 * v).collect();
        let fit = linear_regression(&x, &y).unwrap();
        assert!((fit.slope + 2.0).abs() < 1e-12);
        assert!((fit.intercept - 0.5).abs() < 1e-12);
        assert!((fit.predict(10.0) + 19.5).abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs_are_errors() {
        assert_eq!(linear_regression(&[1.0], &[2.0]), Err(RegressionError::TooFewPoints(1)));
        assert_eq!(
            linear_regression(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]),
            Err(RegressionError::DegenerateX)
        );
        assert_eq!(
            linear_regression(&[1.0, f64::NAN], &[1.0, 2.0]),
            Err(RegressionError::NonFinite)
        );
    }
}
