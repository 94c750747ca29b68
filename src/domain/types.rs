//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory while fitting profiles and solving for parameters
//! - exported to JSON/CSV
//! - reloaded later for comparisons between runs

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Ionisation state encoded by the fractional part of a species code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ionisation {
    Neutral,
    Ionised,
}

/// Species code: element number plus ionisation as a decimal.
///
/// `26.0` is neutral iron (Fe I), `26.1` is singly-ionised iron (Fe II).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Species(pub f64);

impl Species {
    /// Atomic number of the element.
    pub fn element(self) -> u32 {
        self.0.trunc().max(0.0) as u32
    }

    pub fn ionisation(self) -> Ionisation {
        if self.0 % 1.0 == 0.0 {
            Ionisation::Neutral
        } else {
            Ionisation::Ionised
        }
    }

    pub fn is_neutral(self) -> bool {
        self.ionisation() == Ionisation::Neutral
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// One spectral line of one element/ionisation state.
///
/// `wavelength`, `species`, `excitation_potential` and `loggf` are the atomic
/// data; `equivalent_width` and `abundance` are derived measurements that stay
/// `NaN` until a measurement pass fills them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicTransition {
    /// Rest wavelength (Å).
    pub wavelength: f64,
    pub species: Species,
    /// Lower-level excitation potential (eV).
    pub excitation_potential: f64,
    pub loggf: f64,
    #[serde(default)]
    pub van_der_waals_broadening: f64,
    /// `true` when the line has no known blends.
    #[serde(default = "default_clean")]
    pub clean: bool,
    /// Equivalent width (mÅ).
    #[serde(default = "undefined", deserialize_with = "nan_if_null")]
    pub equivalent_width: f64,
    #[serde(default = "undefined", deserialize_with = "nan_if_null")]
    pub abundance: f64,
    /// Name of a wavelength mask defined in the model configuration.
    #[serde(default)]
    pub custom_mask: Option<String>,
}

impl AtomicTransition {
    pub fn new(wavelength: f64, species: f64, excitation_potential: f64, loggf: f64) -> Self {
        Self {
            wavelength,
            species: Species(species),
            excitation_potential,
            loggf,
            van_der_waals_broadening: 0.0,
            clean: true,
            equivalent_width: f64::NAN,
            abundance: f64::NAN,
            custom_mask: None,
        }
    }

    pub fn with_equivalent_width(mut self, equivalent_width: f64) -> Self {
        self.equivalent_width = equivalent_width;
        self
    }

    pub fn is_neutral(&self) -> bool {
        self.species.is_neutral()
    }

    /// `ln(EW / wavelength)`, or `NaN` while the equivalent width is unknown.
    pub fn reduced_equivalent_width(&self) -> f64 {
        (self.equivalent_width / self.wavelength).ln()
    }
}

fn default_clean() -> bool {
    true
}

fn undefined() -> f64 {
    f64::NAN
}

/// JSON has no `NaN`; `serde_json` writes it as `null`, so accept that back.
fn nan_if_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Errors raised while constructing an observed spectrum.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpectrumError {
    #[error("dispersion has {dispersion} pixels but flux has {flux}")]
    LengthMismatch { dispersion: usize, flux: usize },
    #[error("spectrum needs at least 2 pixels, got {0}")]
    TooShort(usize),
    #[error("dispersion must be strictly increasing (pixel {index}: {previous} then {current})")]
    NonIncreasing {
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("dispersion value at pixel {index} is not finite")]
    NonFiniteDispersion { index: usize },
}

/// One wavelength-ordered flux record from one detector channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    dispersion: Vec<f64>,
    flux: Vec<f64>,
}

impl Spectrum {
    pub fn new(dispersion: Vec<f64>, flux: Vec<f64>) -> Result<Self, SpectrumError> {
        if dispersion.len() != flux.len() {
            return Err(SpectrumError::LengthMismatch {
                dispersion: dispersion.len(),
                flux: flux.len(),
            });
        }
        if dispersion.len() < 2 {
            return Err(SpectrumError::TooShort(dispersion.len()));
        }
        for (index, value) in dispersion.iter().enumerate() {
            if !value.is_finite() {
                return Err(SpectrumError::NonFiniteDispersion { index });
            }
        }
        for (i, pair) in dispersion.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(SpectrumError::NonIncreasing {
                    index: i + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        Ok(Self { dispersion, flux })
    }

    pub fn dispersion(&self) -> &[f64] {
        &self.dispersion
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn len(&self) -> usize {
        self.dispersion.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispersion.is_empty()
    }

    pub fn start(&self) -> f64 {
        self.dispersion[0]
    }

    pub fn end(&self) -> f64 {
        self.dispersion[self.dispersion.len() - 1]
    }

    pub fn contains(&self, wavelength: f64) -> bool {
        self.start() <= wavelength && wavelength <= self.end()
    }

    /// Index of the first pixel whose dispersion is `>= wavelength`.
    pub fn searchsorted(&self, wavelength: f64) -> usize {
        self.dispersion.partition_point(|&d| d < wavelength)
    }

    /// Pixel size at the given wavelength, or `None` outside the channel.
    pub fn pixel_size_at(&self, wavelength: f64) -> Option<f64> {
        if !self.contains(wavelength) {
            return None;
        }
        let index = self.searchsorted(wavelength).min(self.len() - 2);
        Some(self.dispersion[index + 1] - self.dispersion[index])
    }

    /// Pixel indices within `±half_width` of `center`.
    ///
    /// The upper edge includes one extra pixel so the window always spans the
    /// full requested region when the grid does not land on it exactly.
    pub fn window(&self, center: f64, half_width: f64) -> Range<usize> {
        let lo = self.searchsorted(center - half_width);
        let hi = (self.searchsorted(center + half_width) + 1).min(self.len());
        lo..hi.max(lo)
    }
}

/// The four photospheric parameters solved for by the equilibrium analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StellarParameters {
    /// Effective temperature (K).
    pub effective_temperature: f64,
    /// Surface gravity (log cgs).
    pub surface_gravity: f64,
    /// Scaled-solar metallicity [M/H].
    pub metallicity: f64,
    /// Microturbulence (km/s).
    pub microturbulence: f64,
}

impl StellarParameters {
    pub const LABELS: [&'static str; 4] = [
        "effective_temperature",
        "surface_gravity",
        "metallicity",
        "microturbulence",
    ];

    pub fn new(effective_temperature: f64, surface_gravity: f64, metallicity: f64, microturbulence: f64) -> Self {
        Self {
            effective_temperature,
            surface_gravity,
            metallicity,
            microturbulence,
        }
    }

    pub fn to_array(self) -> [f64; 4] {
        [
            self.effective_temperature,
            self.surface_gravity,
            self.metallicity,
            self.microturbulence,
        ]
    }

    pub fn from_array(x: [f64; 4]) -> Self {
        Self::new(x[0], x[1], x[2], x[3])
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl Default for StellarParameters {
    /// The Sun.
    fn default() -> Self {
        Self::new(5777.0, 4.44, 0.0, 1.0)
    }
}

impl fmt::Display for StellarParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Teff={:.0} K, logg={:.3}, [M/H]={:+.3}, xi={:.3} km/s",
            self.effective_temperature, self.surface_gravity, self.metallicity, self.microturbulence
        )
    }
}

/// Photosphere parameters that may be only partially known.
///
/// Profile fitting only needs a photosphere when blends must be synthesised,
/// so any of these can be missing for clean windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialParameters {
    pub effective_temperature: Option<f64>,
    pub surface_gravity: Option<f64>,
    pub metallicity: Option<f64>,
    pub microturbulence: Option<f64>,
}

impl PartialParameters {
    /// `(Teff, logg, [M/H])` when all three are known.
    pub fn photosphere_point(&self) -> Option<(f64, f64, f64)> {
        Some((self.effective_temperature?, self.surface_gravity?, self.metallicity?))
    }
}

impl From<StellarParameters> for PartialParameters {
    fn from(value: StellarParameters) -> Self {
        Self {
            effective_temperature: Some(value.effective_temperature),
            surface_gravity: Some(value.surface_gravity),
            metallicity: Some(value.metallicity),
            microturbulence: Some(value.microturbulence),
        }
    }
}

/// A measured line as used by the equilibrium analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub wavelength: f64,
    pub species: Species,
    pub excitation_potential: f64,
    pub loggf: f64,
    pub van_der_waals_broadening: f64,
    pub equivalent_width: f64,
    pub abundance: f64,
    /// Passed the measurement-quality filter.
    pub is_filtered: bool,
    /// Flagged by sigma-clipping against the diagnostic regressions.
    pub is_outlier: bool,
}

impl LineRecord {
    pub fn from_transition(transition: &AtomicTransition) -> Self {
        Self {
            wavelength: transition.wavelength,
            species: transition.species,
            excitation_potential: transition.excitation_potential,
            loggf: transition.loggf,
            van_der_waals_broadening: transition.van_der_waals_broadening,
            equivalent_width: transition.equivalent_width,
            abundance: f64::NAN,
            is_filtered: false,
            is_outlier: false,
        }
    }

    pub fn is_used(&self) -> bool {
        self.is_filtered && !self.is_outlier
    }

    pub fn is_neutral(&self) -> bool {
        self.species.is_neutral()
    }

    pub fn reduced_equivalent_width(&self) -> f64 {
        (self.equivalent_width / self.wavelength).ln()
    }

    /// The atomic data of this record as a transition (for evaluator calls).
    pub fn to_transition(&self) -> AtomicTransition {
        AtomicTransition {
            van_der_waals_broadening: self.van_der_waals_broadening,
            abundance: self.abundance,
            ..AtomicTransition::new(self.wavelength, self.species.0, self.excitation_potential, self.loggf)
                .with_equivalent_width(self.equivalent_width)
        }
    }
}
