//! The atomic transition table.
//!
//! The table is loaded once and never mutated in place. Measurement passes
//! produce *new* tables (`with_equivalent_widths`) or line records, which
//! keeps the pipeline order explicit:
//!
//! ```text
//! input table -> fitted table (EWs) -> abundance records -> annotated records
//! ```

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::domain::{AtomicTransition, Spectrum};

/// Named wavelength regions (Å) that can be excluded from a line's fit window.
pub type CustomMasks = BTreeMap<String, Vec<[f64; 2]>>;

/// Columns every transition table must provide.
pub const REQUIRED_COLUMNS: [&str; 4] = ["wavelength", "species", "excitation_potential", "loggf"];

/// Errors raised while loading or validating a transition table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("missing required column '{0}' in the atomic transitions table")]
    MissingColumn(String),
    #[error("row {row}: invalid value {value:?} in column '{column}'")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("row {row}: column '{column}' must be finite")]
    NonFinite { row: usize, column: String },
    #[error("cannot find custom mask '{0}' in the model configuration")]
    UnknownCustomMask(String),
    #[error("no atomic transitions found")]
    Empty,
    #[error("failed to read atomic transitions from '{path}': {message}")]
    Read { path: String, message: String },
    #[error("failed to write atomic transitions to '{path}': {message}")]
    Write { path: String, message: String },
}

/// Immutable collection of atomic transitions plus the custom masks they reference.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTable {
    transitions: Vec<AtomicTransition>,
    masks: CustomMasks,
}

impl TransitionTable {
    /// Validate and wrap a list of transitions.
    ///
    /// Every custom mask referenced by a transition must exist in `masks`.
    pub fn new(transitions: Vec<AtomicTransition>, masks: CustomMasks) -> Result<Self, TableError> {
        if transitions.is_empty() {
            return Err(TableError::Empty);
        }

        for (row, t) in transitions.iter().enumerate() {
            let mandatory = [
                ("wavelength", t.wavelength),
                ("species", t.species.0),
                ("excitation_potential", t.excitation_potential),
                ("loggf", t.loggf),
            ];
            for (column, value) in mandatory {
                if !value.is_finite() {
                    return Err(TableError::NonFinite {
                        row,
                        column: column.to_string(),
                    });
                }
            }
            if t.wavelength <= 0.0 {
                return Err(TableError::InvalidValue {
                    row,
                    column: "wavelength".to_string(),
                    value: t.wavelength.to_string(),
                });
            }
            if let Some(mask) = &t.custom_mask {
                if !masks.contains_key(mask) {
                    return Err(TableError::UnknownCustomMask(mask.clone()));
                }
            }
        }

        Ok(Self { transitions, masks })
    }

    pub fn transitions(&self) -> &[AtomicTransition] {
        &self.transitions
    }

    pub fn get(&self, index: usize) -> Option<&AtomicTransition> {
        self.transitions.get(index)
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AtomicTransition> {
        self.transitions.iter()
    }

    /// Wavelength regions excluded for the transition at `index`.
    pub fn mask_regions(&self, index: usize) -> &[[f64; 2]] {
        self.transitions
            .get(index)
            .and_then(|t| t.custom_mask.as_ref())
            .and_then(|name| self.masks.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Indices of every other transition within `±region` of transition `index`.
    pub fn blending(&self, index: usize, region: f64) -> Vec<usize> {
        let Some(target) = self.transitions.get(index) else {
            return Vec::new();
        };
        self.transitions
            .iter()
            .enumerate()
            .filter(|(j, t)| *j != index && (t.wavelength - target.wavelength).abs() <= region)
            .map(|(j, _)| j)
            .collect()
    }

    /// A copy of this table with equivalent widths replaced at the given rows.
    pub fn with_equivalent_widths(&self, updates: &[(usize, f64)]) -> Self {
        let mut out = self.clone();
        for &(index, ew) in updates {
            if let Some(t) = out.transitions.get_mut(index) {
                t.equivalent_width = ew;
            }
        }
        out
    }
}

/// Warn once when a loaded table had no `clean` column.
pub(crate) fn warn_missing_clean_column() {
    warn!(
        "No 'clean' column found in atomic transitions. All the transitions are assumed to \
         have no blending by nearby lines."
    );
}

/// Pick the channel with the finest pixel sampling at `wavelength`.
///
/// Returns `None` when no channel covers the wavelength. Ties go to the later
/// channel.
pub fn locate_channel(spectra: &[Spectrum], wavelength: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, spectrum) in spectra.iter().enumerate() {
        let Some(pixel_size) = spectrum.pixel_size_at(wavelength) else {
            continue;
        };
        match best {
            Some((_, size)) if pixel_size > size => {}
            _ => best = Some((i, pixel_size)),
        }
    }
    best.map(|(i, _)| i)
}
