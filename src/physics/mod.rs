//! Collaborators that turn stellar parameters into physics.
//!
//! The analysis never computes radiative transfer itself. It talks to three
//! narrow interfaces:
//!
//! - [`PhotosphereInterpolator`]: `(Teff, logg, [M/H])` -> photosphere handle
//! - [`AbundanceEvaluator`]: line list + photosphere + ξ -> per-line abundances
//! - [`Synthesiser`]: line list + photosphere -> synthetic spectrum (blends)
//!
//! [`external::ExternalEngine`] implements the last two by running a configured
//! program; [`GridBounds`] is the built-in interpolator.

pub mod external;
pub mod solar;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::AtomicTransition;

pub use external::{CancellationToken, EngineConfig, ExternalEngine};
pub use solar::{Asplund2009, SolarAbundances, solar_abundance};

/// Errors from the photosphere interpolator, abundance evaluator or synthesiser.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// The requested parameters fall outside the photosphere grid.
    #[error("parameters outside the photosphere grid: {0}")]
    OutOfGrid(String),
    #[error("expected {expected} values from the engine, got {got}")]
    CountMismatch { expected: usize, got: usize },
    #[error("engine output could not be parsed: {0}")]
    Parse(String),
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine call cancelled")]
    Cancelled,
    #[error("no radiative transfer engine configured ({0})")]
    NotConfigured(String),
    #[error("invalid engine configuration: {0}")]
    InvalidEngine(String),
    #[error("engine failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EvaluatorError {
    pub fn is_out_of_grid(&self) -> bool {
        matches!(self, Self::OutOfGrid(_))
    }
}

/// A model photosphere, identified by the point it was interpolated at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photosphere {
    pub effective_temperature: f64,
    pub surface_gravity: f64,
    pub metallicity: f64,
    /// Grid family the photosphere came from (passed through to the engine).
    pub kind: String,
}

/// A synthetic spectrum on its own dispersion grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpectrum {
    pub dispersion: Vec<f64>,
    pub flux: Vec<f64>,
}

pub trait PhotosphereInterpolator: Send + Sync {
    fn interpolate(
        &self,
        effective_temperature: f64,
        surface_gravity: f64,
        metallicity: f64,
    ) -> Result<Photosphere, EvaluatorError>;
}

pub trait AbundanceEvaluator: Send + Sync {
    /// One abundance per line, in input order.
    fn abundances(
        &self,
        lines: &[AtomicTransition],
        photosphere: &Photosphere,
        microturbulence: f64,
    ) -> Result<Vec<f64>, EvaluatorError>;
}

pub trait Synthesiser: Send + Sync {
    /// Synthesise `lines` over `region` (Å) with pixel size `step`.
    fn synthesise(
        &self,
        lines: &[AtomicTransition],
        photosphere: &Photosphere,
        microturbulence: Option<f64>,
        region: [f64; 2],
        step: f64,
    ) -> Result<SyntheticSpectrum, EvaluatorError>;
}

/// Rectangular photosphere grid: any point inside the bounds is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridBounds {
    pub kind: String,
    pub effective_temperature: [f64; 2],
    pub surface_gravity: [f64; 2],
    pub metallicity: [f64; 2],
}

impl Default for GridBounds {
    fn default() -> Self {
        Self {
            kind: "marcs".to_string(),
            effective_temperature: [2500.0, 8000.0],
            surface_gravity: [-0.5, 5.5],
            metallicity: [-5.0, 1.0],
        }
    }
}

impl GridBounds {
    pub fn contains(&self, effective_temperature: f64, surface_gravity: f64, metallicity: f64) -> bool {
        let inside = |v: f64, [lo, hi]: [f64; 2]| v.is_finite() && v >= lo && v <= hi;
        inside(effective_temperature, self.effective_temperature)
            && inside(surface_gravity, self.surface_gravity)
            && inside(metallicity, self.metallicity)
    }
}

impl PhotosphereInterpolator for GridBounds {
    fn interpolate(
        &self,
        effective_temperature: f64,
        surface_gravity: f64,
        metallicity: f64,
    ) -> Result<Photosphere, EvaluatorError> {
        if !self.contains(effective_temperature, surface_gravity, metallicity) {
            return Err(EvaluatorError::OutOfGrid(format!(
                "Teff={effective_temperature}, logg={surface_gravity}, [M/H]={metallicity}"
            )));
        }
        Ok(Photosphere {
            effective_temperature,
            surface_gravity,
            metallicity,
            kind: self.kind.clone(),
        })
    }
}
