//! Process-level error: an exit code plus a printable message.
//!
//! Exit codes:
//! - 2: configuration or input problem
//! - 3: not enough usable data
//! - 4: numerical or runtime failure

use crate::domain::{ConfigError, TableError};
use crate::equilibrium::EquilibriumError;
use crate::fit::{FitError, ProfileError};
use crate::io::{BenchmarkError, SpectrumFileError};
use crate::physics::EvaluatorError;
use crate::solve::SolveError;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

fn evaluator_code(err: &EvaluatorError) -> u8 {
    match err {
        EvaluatorError::NotConfigured(_) | EvaluatorError::InvalidEngine(_) => 2,
        _ => 4,
    }
}

fn fit_code(err: &FitError) -> u8 {
    match err {
        FitError::Profile(e) if e.is_configuration() => 2,
        FitError::NoSynthesiser(_) => 2,
        FitError::NoSpectra => 3,
        FitError::Photosphere(e) => evaluator_code(e),
        _ => 4,
    }
}

fn equilibrium_code(err: &EquilibriumError) -> u8 {
    match err {
        EquilibriumError::DiagnosticUndefined { .. } => 3,
        EquilibriumError::UnknownElement(_) => 2,
        EquilibriumError::AbundanceCount { .. } => 4,
        EquilibriumError::Evaluator(e) => evaluator_code(e),
    }
}

impl From<TableError> for AppError {
    fn from(err: TableError) -> Self {
        let code = match err {
            TableError::Empty => 3,
            _ => 2,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<SpectrumFileError> for AppError {
    fn from(err: SpectrumFileError) -> Self {
        AppError::new(2, err.to_string())
    }
}

impl From<BenchmarkError> for AppError {
    fn from(err: BenchmarkError) -> Self {
        let code = match err {
            BenchmarkError::Empty => 3,
            _ => 2,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(2, err.to_string())
    }
}

impl From<ProfileError> for AppError {
    fn from(err: ProfileError) -> Self {
        let code = if err.is_configuration() { 2 } else { 4 };
        AppError::new(code, err.to_string())
    }
}

impl From<EvaluatorError> for AppError {
    fn from(err: EvaluatorError) -> Self {
        AppError::new(evaluator_code(&err), err.to_string())
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        AppError::new(fit_code(&err), err.to_string())
    }
}

impl From<EquilibriumError> for AppError {
    fn from(err: EquilibriumError) -> Self {
        AppError::new(equilibrium_code(&err), err.to_string())
    }
}

impl From<SolveError> for AppError {
    fn from(err: SolveError) -> Self {
        let code = match &err {
            SolveError::InvalidConfig(_) | SolveError::NonFiniteStart | SolveError::UnsupportedFittingFrequency(_) => 2,
            SolveError::InitialPointRejected(_) => 4,
            SolveError::Fit(e) => fit_code(e),
            SolveError::Equilibrium(e) => equilibrium_code(e),
        };
        AppError::new(code, err.to_string())
    }
}
