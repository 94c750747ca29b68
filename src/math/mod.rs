//! Mathematical utilities: least squares, regression, statistics and
//! Gaussian helpers.

pub mod gaussian;
pub mod ols;
pub mod regression;
pub mod stats;

pub use gaussian::*;
pub use ols::*;
pub use regression::*;
pub use stats::*;
