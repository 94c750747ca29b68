//! JSON model configuration.
//!
//! Every section has defaults, so `{}` is a valid (if not very useful)
//! configuration. A minimal real one names the transition table:
//!
//! ```json
//! {
//!   "atomic_transitions_filename": "lines.csv",
//!   "custom_mask": { "telluric": [[6276.0, 6278.5]] },
//!   "settings": { "threads": 4 },
//!   "profile": { "wavelength_region": 2.5, "outlier_modeling": true },
//!   "initial_theta": {
//!     "effective_temperature": 5750, "surface_gravity": 4.4,
//!     "metallicity": 0.0, "microturbulence": 1.1
//!   }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AtomicTransition, CustomMasks, StellarParameters, TableError, TransitionTable};
use crate::equilibrium::{EquilibriumOptions, LineFilter};
use crate::fit::{ProfileError, ProfileOptions};
use crate::physics::{EngineConfig, GridBounds};
use crate::solve::{EstimateOptions, SolveError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read model configuration '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid model configuration: {0}")]
    Invalid(String),
    #[error("no atomic transitions: set `atomic_transitions_filename` or `atomic_transitions`")]
    NoTransitions,
    #[error("set only one of `atomic_transitions_filename` and `atomic_transitions`")]
    AmbiguousTransitions,
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Solver(#[from] SolveError),
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker threads for profile fitting.
    pub threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self { threads: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// CSV transition table; relative paths resolve against the config file.
    pub atomic_transitions_filename: Option<PathBuf>,
    pub atomic_transitions: Option<Vec<AtomicTransition>>,
    pub custom_mask: CustomMasks,
    pub settings: Settings,
    pub profile: ProfileOptions,
    pub filter: LineFilter,
    pub equilibrium: EquilibriumOptions,
    pub solver: EstimateOptions,
    pub engine: EngineConfig,
    pub photosphere_grid: GridBounds,
    pub initial_theta: Option<StellarParameters>,
}

impl ModelConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json_str(&text)?;
        if let (Some(file), Some(dir)) = (&config.atomic_transitions_filename, path.parent()) {
            if file.is_relative() {
                config.atomic_transitions_filename = Some(dir.join(file));
            }
        }
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.threads == 0 {
            return Err(ConfigError::Invalid("settings.threads must be at least 1".into()));
        }
        if self.atomic_transitions_filename.is_some() && self.atomic_transitions.is_some() {
            return Err(ConfigError::AmbiguousTransitions);
        }
        for (name, regions) in &self.custom_mask {
            for &[lo, hi] in regions {
                if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                    return Err(ConfigError::Invalid(format!(
                        "custom mask '{name}' has an invalid region [{lo}, {hi}]"
                    )));
                }
            }
        }
        let lo_hi = [
            ("effective_temperature", self.photosphere_grid.effective_temperature),
            ("surface_gravity", self.photosphere_grid.surface_gravity),
            ("metallicity", self.photosphere_grid.metallicity),
        ];
        for (name, [lo, hi]) in lo_hi {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(ConfigError::Invalid(format!(
                    "photosphere_grid.{name} must be an increasing pair, got [{lo}, {hi}]"
                )));
            }
        }
        if let Some(theta) = &self.initial_theta {
            if !theta.is_finite() {
                return Err(ConfigError::Invalid("initial_theta must be finite".into()));
            }
        }
        if self.filter.min_equivalent_width >= self.filter.max_equivalent_width {
            return Err(ConfigError::Invalid(
                "filter.min_equivalent_width must be below filter.max_equivalent_width".into(),
            ));
        }
        self.profile.validate()?;
        self.solver.validate()?;
        self.engine
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("engine: {e}")))?;
        Ok(())
    }

    /// The configured transition table, with custom masks checked.
    pub fn transition_table(&self) -> Result<TransitionTable, ConfigError> {
        match (&self.atomic_transitions_filename, &self.atomic_transitions) {
            (Some(path), None) => Ok(crate::io::read_transitions(path, self.custom_mask.clone())?),
            (None, Some(lines)) => Ok(TransitionTable::new(lines.clone(), self.custom_mask.clone())?),
            (None, None) => Err(ConfigError::NoTransitions),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousTransitions),
        }
    }
}
