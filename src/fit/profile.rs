//! Gaussian absorption profile fitting for a single transition.
//!
//! The model is a product of absorption components
//!
//! ```text
//! f(x) = B(x; σ₀) · Π_k (1 - A_k · exp(-(x - μ_k)² / (2 σ_k²)))
//! ```
//!
//! where component 0 is the transition being measured and components `k > 0`
//! are "outlier" profiles added to soak up unmodelled absorption nearby.
//! `B` is 1 for clean windows; for blended windows it is a synthetic spectrum
//! of the neighbouring transitions, smoothed to the fitted line width and
//! interpolated onto the observed pixels.
//!
//! The equivalent width (mÅ) comes from component 0 only.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::rc::Rc;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::domain::Spectrum;
use crate::fit::levmar::{LevMarConfig, LevMarError, levenberg_marquardt};
use crate::fit::params::{Constraint, Parameter, ParameterSet, Tie};
use crate::math::{gaussian, gaussian_filter1d, interp, mean_spacing};
use crate::physics::{EvaluatorError, SyntheticSpectrum};

/// Data/model ratio at the line centre must stay inside this band.
const CENTRE_RATIO_BAND: (f64, f64) = (0.95, 1.05);

/// Half-width (in initial σ) around existing components excluded when
/// placing a new outlier profile.
const OUTLIER_EXCLUSION_SIGMA: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOptions {
    /// Half-width (Å) of the fit window and of the blend search.
    pub wavelength_region: f64,
    /// Allowed shift (Å) of the line centre. `0` fixes the centre.
    pub wavelength_tolerance: f64,
    /// Synthetic pixels per observed pixel for blends.
    pub oversampling_rate: usize,
    /// Bounds by parameter-name prefix (`stddev`, `amplitude`). Configured
    /// entries are merged over the defaults.
    #[serde(deserialize_with = "merge_default_bounds")]
    pub bounds: BTreeMap<String, [f64; 2]>,
    pub outlier_modeling: bool,
    /// Most absorption components per fit, the measured line included.
    pub max_outlier_profiles: usize,
    pub max_iterations: usize,
}

fn default_bounds() -> BTreeMap<String, [f64; 2]> {
    BTreeMap::from([
        ("stddev".to_string(), [0.0, 0.3]),
        ("amplitude".to_string(), [0.0, 1.0]),
    ])
}

fn merge_default_bounds<'de, D>(deserializer: D) -> Result<BTreeMap<String, [f64; 2]>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut bounds = default_bounds();
    bounds.extend(BTreeMap::<String, [f64; 2]>::deserialize(deserializer)?);
    Ok(bounds)
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            wavelength_region: 2.5,
            wavelength_tolerance: 0.0,
            oversampling_rate: 4,
            bounds: default_bounds(),
            outlier_modeling: true,
            max_outlier_profiles: 5,
            max_iterations: LevMarConfig::default().max_iterations,
        }
    }
}

impl ProfileOptions {
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.oversampling_rate < 1 {
            return Err(ProfileError::InvalidOversampling);
        }
        if !(self.wavelength_region.is_finite() && self.wavelength_region > 0.0) {
            return Err(ProfileError::InvalidOption(format!(
                "wavelength_region must be positive, got {}",
                self.wavelength_region
            )));
        }
        if !self.wavelength_tolerance.is_finite() {
            return Err(ProfileError::InvalidOption(
                "wavelength_tolerance must be finite".to_string(),
            ));
        }
        for (name, [lo, hi]) in &self.bounds {
            if name == "mean" || name == "wavelength" {
                return Err(ProfileError::BoundsOnLocation);
            }
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(ProfileError::InvalidBounds {
                    name: name.clone(),
                    lo: *lo,
                    hi: *hi,
                });
            }
        }
        Ok(())
    }

    /// The tolerance as an absolute shift.
    pub fn tolerance(&self) -> f64 {
        self.wavelength_tolerance.abs()
    }

    fn levmar(&self) -> LevMarConfig {
        LevMarConfig {
            max_iterations: self.max_iterations,
            ..LevMarConfig::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(
        "transition at {wavelength:.3} Å has blending lines within {region} Å, which need a synthesised \
         background, but effective temperature, surface gravity and metallicity were not all given"
    )]
    MissingStellarParameters { wavelength: f64, region: f64 },
    #[error("bounds on the profile location are not supported: use wavelength_tolerance instead")]
    BoundsOnLocation,
    #[error("oversampling rate must be a positive integer")]
    InvalidOversampling,
    #[error("invalid bounds for '{name}': ({lo}, {hi})")]
    InvalidBounds { name: String, lo: f64, hi: f64 },
    #[error("invalid profile option: {0}")]
    InvalidOption(String),
    #[error("fit window around {wavelength:.3} Å has only {pixels} pixels")]
    TooFewPixels { wavelength: f64, pixels: usize },
    #[error("profile fit at {wavelength:.3} Å failed: {source}")]
    Fit {
        wavelength: f64,
        #[source]
        source: LevMarError,
    },
    #[error("blend synthesis around {wavelength:.3} Å failed: {source}")]
    Synthesis {
        wavelength: f64,
        #[source]
        source: EvaluatorError,
    },
}

impl ProfileError {
    /// Errors that invalidate the whole run rather than one line.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingStellarParameters { .. }
                | Self::BoundsOnLocation
                | Self::InvalidOversampling
                | Self::InvalidBounds { .. }
                | Self::InvalidOption(_)
        )
    }
}

/// Synthetic blend spectrum, smoothed on demand to the current line width.
///
/// The smoothed flux is cached for the last σ seen; finite-difference steps on
/// the other parameters reuse it.
#[derive(Debug)]
pub struct BlendBackground {
    synthetic: SyntheticSpectrum,
    pixel_size: f64,
    cache: RefCell<Option<(u64, Rc<Vec<f64>>)>>,
}

impl BlendBackground {
    pub fn new(synthetic: SyntheticSpectrum, pixel_size: f64) -> Self {
        Self {
            synthetic,
            pixel_size,
            cache: RefCell::new(None),
        }
    }

    fn smoothed(&self, stddev: f64) -> Rc<Vec<f64>> {
        let key = stddev.to_bits();
        if let Some((cached, flux)) = self.cache.borrow().as_ref() {
            if *cached == key {
                return Rc::clone(flux);
            }
        }
        let flux = Rc::new(gaussian_filter1d(&self.synthetic.flux, stddev / self.pixel_size));
        *self.cache.borrow_mut() = Some((key, Rc::clone(&flux)));
        flux
    }

    /// Background flux at `x` for line width `stddev` (1 outside the synthesis).
    pub fn sample(&self, x: &[f64], stddev: f64) -> Vec<f64> {
        let flux = self.smoothed(stddev);
        x.iter()
            .map(|&xi| interp(xi, &self.synthetic.dispersion, &flux, 1.0, 1.0))
            .collect()
    }
}

/// The compound absorption model. Parameters are laid out as
/// `[amplitude_k, mean_k, stddev_k]` per component.
#[derive(Debug)]
struct ProfileModel {
    background: Option<BlendBackground>,
}

impl ProfileModel {
    fn components(params: &ParameterSet) -> usize {
        params.len() / 3
    }

    fn evaluate(&self, x: &[f64], params: &ParameterSet) -> Vec<f64> {
        let mut out = match &self.background {
            Some(bg) => bg.sample(x, params.value(2)),
            None => vec![1.0; x.len()],
        };
        for k in 0..Self::components(params) {
            let (a, m, s) = (params.value(3 * k), params.value(3 * k + 1), params.value(3 * k + 2));
            for (o, &xi) in out.iter_mut().zip(x) {
                *o *= 1.0 - gaussian(xi, a, m, s);
            }
        }
        out
    }
}

/// `10⁴ · √π · A · 0.25 · σ` in mÅ.
pub fn equivalent_width(amplitude: f64, stddev: f64) -> f64 {
    1e4 * PI.sqrt() * amplitude * 0.25 * stddev
}

/// Best-fit profile of one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFit {
    pub wavelength: f64,
    pub amplitude: f64,
    pub mean: f64,
    pub stddev: f64,
    /// mÅ.
    pub equivalent_width: f64,
    pub blended: bool,
    /// Centres of the outlier profiles that were added.
    pub outlier_means: Vec<f64>,
    pub chi_sq: f64,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub initial: Vec<f64>,
    pub fitted: Vec<f64>,
}

/// Fit window: pixels within `±region` of `wavelength` outside every mask region.
pub fn select_window(spectrum: &Spectrum, wavelength: f64, region: f64, masks: &[[f64; 2]]) -> (Vec<f64>, Vec<f64>) {
    let (dispersion, flux) = (spectrum.dispersion(), spectrum.flux());
    spectrum
        .window(wavelength, region)
        .filter(|&i| !masks.iter().any(|[a, b]| dispersion[i] >= *a && dispersion[i] <= *b))
        .map(|i| (dispersion[i], flux[i]))
        .unzip()
}

fn push_component(params: &mut ParameterSet, amplitude: f64, mean: f64, stddev: f64) {
    let k = params.len() / 3;
    params.push(Parameter::new(format!("amplitude_{k}"), amplitude));
    params.push(Parameter::new(format!("mean_{k}"), mean));
    params.push(Parameter::new(format!("stddev_{k}"), stddev));
}

/// Bounds by prefix, then location and width constraints per component.
fn apply_constraints(params: &mut ParameterSet, wavelength: f64, options: &ProfileOptions) {
    let tolerance = options.tolerance();
    for index in 0..params.len() {
        let component = index / 3;
        let p = params.get_mut(index);
        p.bounds = options.bounds.get(p.prefix()).map(|[lo, hi]| (*lo, *hi));
        match (index % 3, component) {
            (1, 0) if tolerance > 0.0 => {
                p.bounds = Some((wavelength - tolerance, wavelength + tolerance));
                p.constraint = Constraint::Free;
            }
            (1, _) => p.constraint = Constraint::Fixed,
            (2, k) if k > 0 => {
                p.constraint = Constraint::Tied(Tie {
                    base: 2,
                    numerator: 3 * k + 1,
                    denominator: 1,
                })
            }
            _ => p.constraint = Constraint::Free,
        }
        let clipped = p.clip(p.value);
        p.value = clipped;
    }
    params.apply_ties();
}

fn needs_outlier_profile(params: &ParameterSet, y: &[f64], fitted: &[f64], centre: usize) -> bool {
    if params.get(2).at_upper_bound() {
        return true;
    }
    let ratio = y[centre] / fitted[centre];
    !(ratio > CENTRE_RATIO_BAND.0 && ratio < CENTRE_RATIO_BAND.1)
}

/// Where to put the next outlier profile: the largest model excess, away from
/// existing components.
fn next_outlier_pixel(params: &ParameterSet, x: &[f64], y: &[f64], fitted: &[f64], initial_stddev: f64) -> Option<usize> {
    let n = x.len();
    let mut excess: Vec<f64> = fitted.iter().zip(y).map(|(f, d)| f - d).collect();
    for k in 0..params.len() / 3 {
        let mean = params.value(3 * k + 1);
        let lo = x.partition_point(|&v| v < mean - OUTLIER_EXCLUSION_SIGMA * initial_stddev);
        let hi = (x.partition_point(|&v| v < mean + OUTLIER_EXCLUSION_SIGMA * initial_stddev) + 1).min(n);
        for e in &mut excess[lo.min(n)..hi.max(lo.min(n))] {
            *e = 0.0;
        }
    }
    let (index, value) = excess
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });
    (value > 0.0).then_some(index)
}

/// Fit the transition at `wavelength` to the window `(x, y)`.
pub fn fit_profile(
    wavelength: f64,
    x: &[f64],
    y: &[f64],
    background: Option<BlendBackground>,
    options: &ProfileOptions,
) -> Result<ProfileFit, ProfileError> {
    if x.len() < 4 || x.len() != y.len() {
        return Err(ProfileError::TooFewPixels {
            wavelength,
            pixels: x.len().min(y.len()),
        });
    }

    let initial_stddev = 5.0 * mean_spacing(x).unwrap_or(0.0);
    let centre = x.partition_point(|&v| v < wavelength).min(x.len() - 1);

    let mut params = ParameterSet::new();
    push_component(&mut params, 1.0 - y[centre], wavelength, initial_stddev);
    apply_constraints(&mut params, wavelength, options);

    let blended = background.is_some();
    let model = ProfileModel { background };
    let initial = model.evaluate(x, &params);
    let levmar = options.levmar();
    let fit_error = |source| ProfileError::Fit { wavelength, source };

    let mut fit = levenberg_marquardt(|x, p| model.evaluate(x, p), x, y, params, &levmar).map_err(fit_error)?;
    let mut outlier_means = Vec::new();

    // The primary component counts towards `max_outlier_profiles`.
    while options.outlier_modeling && outlier_means.len() + 1 < options.max_outlier_profiles {
        let fitted = model.evaluate(x, &fit.params);
        if !needs_outlier_profile(&fit.params, y, &fitted, centre) {
            break;
        }
        let Some(pixel) = next_outlier_pixel(&fit.params, x, y, &fitted, initial_stddev) else {
            break;
        };
        trace!(wavelength, at = x[pixel], "adding outlier profile");

        let mut params = fit.params.clone();
        push_component(&mut params, 1.0 - y[pixel], x[pixel], initial_stddev);
        apply_constraints(&mut params, wavelength, options);

        match levenberg_marquardt(|x, p| model.evaluate(x, p), x, y, params, &levmar) {
            Ok(refit) => {
                fit = refit;
                outlier_means.push(x[pixel]);
            }
            Err(error) => {
                warn!(wavelength, at = x[pixel], %error, "outlier refit failed; keeping the previous profile");
                break;
            }
        }
    }

    let fitted = model.evaluate(x, &fit.params);
    let (amplitude, mean, stddev) = (fit.params.value(0), fit.params.value(1), fit.params.value(2));
    let ew = equivalent_width(amplitude, stddev);
    debug!(
        wavelength,
        amplitude,
        stddev,
        equivalent_width = ew,
        outliers = outlier_means.len(),
        "profile fitted"
    );

    Ok(ProfileFit {
        wavelength,
        amplitude,
        mean,
        stddev,
        equivalent_width: ew,
        blended,
        outlier_means,
        chi_sq: fit.cost,
        x: x.to_vec(),
        y: y.to_vec(),
        initial,
        fitted,
    })
}
