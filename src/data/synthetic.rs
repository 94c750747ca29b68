//! Seeded synthetic spectra for demonstrations and tests.
//!
//! Every transition inside the requested range becomes a Gaussian absorption
//! line with a common width. Lines with a known equivalent width keep it;
//! others draw one uniformly from `equivalent_width_range`. Amplitudes invert
//! the profile fitter's equivalent-width formula, so measuring a noise-free
//! spectrum returns the input widths.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{Spectrum, TransitionTable};
use crate::error::AppError;
use crate::fit::equivalent_width;
use crate::math::gaussian;

/// Deepest line the generator will produce.
const MAX_DEPTH: f64 = 0.95;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub start: f64,
    pub end: f64,
    pub pixel_size: f64,
    /// Gaussian σ (Å) of every line.
    pub stddev: f64,
    /// Signal-to-noise per pixel; `None` for a noise-free spectrum.
    pub snr: Option<f64>,
    pub seed: u64,
    /// mÅ.
    pub equivalent_width_range: [f64; 2],
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start: 5000.0,
            end: 5100.0,
            pixel_size: 0.02,
            stddev: 0.1,
            snr: Some(200.0),
            seed: 42,
            equivalent_width_range: [10.0, 120.0],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedSpectrum {
    pub spectrum: Spectrum,
    /// The input table with the equivalent widths actually injected.
    pub truth: TransitionTable,
    pub lines: usize,
}

pub fn simulate_spectrum(table: &TransitionTable, config: &SimulationConfig) -> Result<SimulatedSpectrum, AppError> {
    if !(config.start.is_finite() && config.end.is_finite() && config.end > config.start) {
        return Err(AppError::new(2, "Invalid wavelength range for simulation."));
    }
    if !(config.pixel_size.is_finite() && config.pixel_size > 0.0) {
        return Err(AppError::new(2, "Pixel size must be > 0."));
    }
    if !(config.stddev.is_finite() && config.stddev > 0.0) {
        return Err(AppError::new(2, "Line width must be > 0."));
    }
    if config.snr.is_some_and(|snr| !(snr.is_finite() && snr > 0.0)) {
        return Err(AppError::new(2, "Signal-to-noise must be > 0."));
    }
    let [ew_lo, ew_hi] = config.equivalent_width_range;
    if !(ew_lo.is_finite() && ew_hi.is_finite() && 0.0 < ew_lo && ew_lo <= ew_hi) {
        return Err(AppError::new(2, "Invalid equivalent-width range."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let unit_ew = equivalent_width(1.0, config.stddev);

    let mut components = Vec::new();
    let mut injected = Vec::new();
    for (index, t) in table.iter().enumerate() {
        if t.wavelength < config.start || t.wavelength > config.end {
            continue;
        }
        let ew = if t.equivalent_width.is_finite() && t.equivalent_width > 0.0 {
            t.equivalent_width
        } else {
            rng.gen_range(ew_lo..=ew_hi)
        };
        let amplitude = (ew / unit_ew).min(MAX_DEPTH);
        components.push((amplitude, t.wavelength));
        injected.push((index, amplitude * unit_ew));
    }
    if components.is_empty() {
        return Err(AppError::new(3, "No transitions fall inside the simulated range."));
    }

    let pixels = ((config.end - config.start) / config.pixel_size).floor() as usize + 1;
    let dispersion: Vec<f64> = (0..pixels).map(|i| config.start + i as f64 * config.pixel_size).collect();
    let mut flux: Vec<f64> = dispersion
        .iter()
        .map(|&x| {
            components
                .iter()
                .map(|&(a, mu)| 1.0 - gaussian(x, a, mu, config.stddev))
                .product()
        })
        .collect();

    if let Some(snr) = config.snr {
        let normal = Normal::new(0.0, 1.0 / snr)
            .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;
        for f in &mut flux {
            *f += normal.sample(&mut rng);
        }
    }

    let spectrum =
        Spectrum::new(dispersion, flux).map_err(|e| AppError::new(4, format!("Simulated spectrum is invalid: {e}")))?;
    Ok(SimulatedSpectrum {
        spectrum,
        truth: table.with_equivalent_widths(&injected),
        lines: injected.len(),
    })
}
