//! Batch measurement of equivalent widths.
//!
//! Every clean transition covered by a spectrum channel is fitted
//! independently. Fits may run on a dedicated rayon pool; results are merged
//! in table order afterwards, so the output never depends on scheduling.

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{AtomicTransition, PartialParameters, Spectrum, TransitionTable, locate_channel};
use crate::fit::profile::{BlendBackground, ProfileError, ProfileFit, ProfileOptions, fit_profile, select_window};
use crate::math::mean_spacing;
use crate::physics::{EvaluatorError, Photosphere, PhotosphereInterpolator, Synthesiser};

#[derive(Debug, Error)]
pub enum FitError {
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("no spectra to fit")]
    NoSpectra,
    #[error("transition at {0:.3} Å has blending lines but no synthesiser is configured")]
    NoSynthesiser(f64),
    #[error("cannot interpolate a photosphere for blend synthesis: {0}")]
    Photosphere(#[source] EvaluatorError),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

/// Receives each fitted profile after the batch is merged, in table order.
pub trait ProfileObserver {
    fn observe(&mut self, index: usize, transition: &AtomicTransition, fit: &ProfileFit);
}

impl ProfileObserver for () {
    fn observe(&mut self, _: usize, _: &AtomicTransition, _: &ProfileFit) {}
}

impl<F> ProfileObserver for F
where
    F: FnMut(usize, &AtomicTransition, &ProfileFit),
{
    fn observe(&mut self, index: usize, transition: &AtomicTransition, fit: &ProfileFit) {
        self(index, transition, fit)
    }
}

/// Everything a batch fit needs besides the table.
#[derive(Clone, Copy)]
pub struct FitContext<'a> {
    pub spectra: &'a [Spectrum],
    /// Photosphere point for blend synthesis; may be partial for clean windows.
    pub parameters: PartialParameters,
    pub options: &'a ProfileOptions,
    pub synthesiser: Option<&'a dyn Synthesiser>,
    pub interpolator: &'a dyn PhotosphereInterpolator,
    pub threads: usize,
}

/// A transition that could not be measured.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    pub index: usize,
    pub wavelength: f64,
    pub reason: String,
}

/// Output of a batch fit: a new table with equivalent widths, plus diagnostics.
#[derive(Debug, Clone)]
pub struct FittedLines {
    pub table: TransitionTable,
    /// `(table index, fit)` in table order.
    pub fits: Vec<(usize, ProfileFit)>,
    pub skipped: Vec<SkippedLine>,
}

impl FittedLines {
    /// Fitted σ of the transition at `index`, if it was measured.
    pub fn stddev(&self, index: usize) -> Option<f64> {
        self.fits
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|pos| self.fits[pos].1.stddev)
    }
}

struct Job {
    index: usize,
    channel: usize,
    blending: Vec<usize>,
}

/// Fit every measurable clean transition in `table`.
///
/// Configuration problems (invalid options, blends without a full photosphere
/// point or without a synthesiser) are detected before any fitting starts.
/// Per-line failures are logged and reported in [`FittedLines::skipped`].
pub fn fit_atomic_transitions(
    table: &TransitionTable,
    ctx: &FitContext<'_>,
    observer: &mut impl ProfileObserver,
) -> Result<FittedLines, FitError> {
    ctx.options.validate()?;
    if ctx.spectra.is_empty() {
        return Err(FitError::NoSpectra);
    }
    let region = ctx.options.wavelength_region;

    let mut jobs = Vec::new();
    for (index, transition) in table.iter().enumerate() {
        if !transition.clean {
            continue;
        }
        let Some(channel) = locate_channel(ctx.spectra, transition.wavelength) else {
            debug!(wavelength = transition.wavelength, "transition not covered by any channel");
            continue;
        };
        let blending = table.blending(index, region);
        if !blending.is_empty() {
            if ctx.parameters.photosphere_point().is_none() {
                return Err(ProfileError::MissingStellarParameters {
                    wavelength: transition.wavelength,
                    region,
                }
                .into());
            }
            if ctx.synthesiser.is_none() {
                return Err(FitError::NoSynthesiser(transition.wavelength));
            }
        }
        jobs.push(Job {
            index,
            channel,
            blending,
        });
    }

    let photosphere = match ctx.parameters.photosphere_point() {
        Some((teff, logg, mh)) if jobs.iter().any(|j| !j.blending.is_empty()) => Some(
            ctx.interpolator
                .interpolate(teff, logg, mh)
                .map_err(FitError::Photosphere)?,
        ),
        _ => None,
    };

    info!(lines = jobs.len(), threads = ctx.threads, "fitting atomic transitions");
    let run = |job: &Job| fit_one(table, ctx, photosphere.as_ref(), job);
    let results: Vec<Result<ProfileFit, ProfileError>> = if ctx.threads > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ctx.threads)
            .build()
            .map_err(|e| FitError::ThreadPool(e.to_string()))?;
        pool.install(|| jobs.par_iter().map(run).collect())
    } else {
        jobs.iter().map(run).collect()
    };

    let mut updates = Vec::new();
    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    for (job, result) in jobs.iter().zip(results) {
        let transition = &table.transitions()[job.index];
        match result {
            Ok(fit) => {
                observer.observe(job.index, transition, &fit);
                updates.push((job.index, fit.equivalent_width));
                fits.push((job.index, fit));
            }
            Err(e) if e.is_configuration() => return Err(e.into()),
            Err(e) => {
                warn!(wavelength = transition.wavelength, error = %e, "skipping transition");
                skipped.push(SkippedLine {
                    index: job.index,
                    wavelength: transition.wavelength,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(fitted = fits.len(), skipped = skipped.len(), "profile fitting finished");
    Ok(FittedLines {
        table: table.with_equivalent_widths(&updates),
        fits,
        skipped,
    })
}

fn fit_one(
    table: &TransitionTable,
    ctx: &FitContext<'_>,
    photosphere: Option<&Photosphere>,
    job: &Job,
) -> Result<ProfileFit, ProfileError> {
    let transition = &table.transitions()[job.index];
    let wavelength = transition.wavelength;
    let spectrum = &ctx.spectra[job.channel];
    let (x, y) = select_window(
        spectrum,
        wavelength,
        ctx.options.wavelength_region,
        table.mask_regions(job.index),
    );
    if x.len() < 4 {
        return Err(ProfileError::TooFewPixels {
            wavelength,
            pixels: x.len(),
        });
    }

    let background = match (job.blending.is_empty(), ctx.synthesiser, photosphere) {
        (false, Some(synthesiser), Some(photosphere)) => {
            let pixel_size = mean_spacing(&x).unwrap_or(0.0) / ctx.options.oversampling_rate as f64;
            let lines: Vec<AtomicTransition> =
                job.blending.iter().map(|&j| table.transitions()[j].clone()).collect();
            let region = [x[0], x[x.len() - 1]];
            let synthetic = synthesiser
                .synthesise(&lines, photosphere, ctx.parameters.microturbulence, region, pixel_size)
                .map_err(|source| ProfileError::Synthesis { wavelength, source })?;
            Some(BlendBackground::new(synthetic, pixel_size))
        }
        _ => None,
    };

    fit_profile(wavelength, &x, &y, background, ctx.options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CustomMasks, StellarParameters};
    use crate::fit::profile::equivalent_width;
    use crate::math::gaussian;
    use crate::physics::{GridBounds, SyntheticSpectrum};

    struct FlatSynthesiser;

    impl Synthesiser for FlatSynthesiser {
        fn synthesise(
            &self,
            _: &[AtomicTransition],
            _: &Photosphere,
            _: Option<f64>,
            region: [f64; 2],
            step: f64,
        ) -> Result<SyntheticSpectrum, EvaluatorError> {
            let n = ((region[1] - region[0]) / step).round() as usize + 1;
            let dispersion: Vec<f64> = (0..n).map(|i| region[0] + step * i as f64).collect();
            Ok(SyntheticSpectrum {
                flux: vec![1.0; n],
                dispersion,
            })
        }
    }

    fn spectrum(lines: &[(f64, f64, f64)]) -> Spectrum {
        let x: Vec<f64> = (0..1001).map(|i| 4990.0 + 0.02 * i as f64).collect();
        let y = x
            .iter()
            .map(|&xi| lines.iter().map(|&(a, m, s)| 1.0 - gaussian(xi, a, m, s)).product())
            .collect();
        Spectrum::new(x, y).unwrap()
    }

    fn table(wavelengths: &[f64]) -> TransitionTable {
        let lines = wavelengths
            .iter()
            .map(|&w| AtomicTransition::new(w, 26.0, 2.0, -1.0))
            .collect();
        TransitionTable::new(lines, CustomMasks::new()).unwrap()
    }

    #[test]
    fn measures_clean_lines_and_ignores_uncovered_ones() {
        let spectra = [spectrum(&[(0.4, 4995.0, 0.1), (0.2, 5005.0, 0.1)])];
        let table = table(&[4995.0, 5005.0, 6000.0]);
        let options = ProfileOptions::default();
        let grid = GridBounds::default();
        let ctx = FitContext {
            spectra: &spectra,
            parameters: PartialParameters::default(),
            options: &options,
            synthesiser: None,
            interpolator: &grid,
            threads: 1,
        };

        let mut seen = Vec::new();
        let mut observer = |i: usize, _: &AtomicTransition, _: &ProfileFit| seen.push(i);
        let fitted = fit_atomic_transitions(&table, &ctx, &mut observer).unwrap();

        let ews: Vec<f64> = fitted.table.iter().map(|t| t.equivalent_width).collect();
        assert!((ews[0] - equivalent_width(0.4, 0.1)).abs() < 0.5);
        assert!((ews[1] - equivalent_width(0.2, 0.1)).abs() < 0.5);
        assert!(ews[2].is_nan());
        assert!(table.transitions()[0].equivalent_width.is_nan());
        assert_eq!(seen, vec![0, 1]);
        assert!(fitted.stddev(1).is_some());
        assert!(fitted.stddev(2).is_none());
    }

    #[test]
    fn unmeasurable_lines_are_skipped_and_the_batch_continues() {
        let spectra = [spectrum(&[(0.4, 4995.0, 0.1), (0.2, 5005.0, 0.1)])];
        let mut masked = AtomicTransition::new(5005.0, 26.0, 2.0, -1.0);
        masked.custom_mask = Some("telluric".to_string());
        let lines = vec![AtomicTransition::new(4995.0, 26.0, 2.0, -1.0), masked];
        let masks = CustomMasks::from([("telluric".to_string(), vec![[5000.0, 5010.0]])]);
        let table = TransitionTable::new(lines, masks).unwrap();
        let options = ProfileOptions::default();
        let grid = GridBounds::default();
        let ctx = FitContext {
            spectra: &spectra,
            parameters: PartialParameters::default(),
            options: &options,
            synthesiser: None,
            interpolator: &grid,
            threads: 2,
        };

        let fitted = fit_atomic_transitions(&table, &ctx, &mut ()).unwrap();
        assert_eq!(fitted.fits.len(), 1);
        assert_eq!(fitted.fits[0].0, 0);
        assert!((fitted.table.transitions()[0].equivalent_width - equivalent_width(0.4, 0.1)).abs() < 0.5);

        assert_eq!(fitted.skipped.len(), 1);
        assert_eq!(fitted.skipped[0].index, 1);
        assert_eq!(fitted.skipped[0].wavelength, 5005.0);
        assert!(fitted.skipped[0].reason.contains("pixels"));
        assert!(fitted.table.transitions()[1].equivalent_width.is_nan());
    }

    #[test]
    fn parallel_fits_match_serial_fits() {
        let spectra = [spectrum(&[(0.4, 4995.0, 0.1), (0.3, 5000.0, 0.12), (0.2, 5005.0, 0.1)])];
        let table = table(&[4995.0, 5000.0, 5005.0]);
        let options = ProfileOptions::default();
        let grid = GridBounds::default();
        let serial = FitContext {
            spectra: &spectra,
            parameters: PartialParameters::default(),
            options: &options,
            synthesiser: None,
            interpolator: &grid,
            threads: 1,
        };
        let parallel = FitContext { threads: 3, ..serial };

        let a = fit_atomic_transitions(&table, &serial, &mut ()).unwrap();
        let b = fit_atomic_transitions(&table, &parallel, &mut ()).unwrap();
        assert_eq!(a.fits, b.fits);
    }

    #[test]
    fn blends_without_photosphere_are_a_configuration_error() {
        let spectra = [spectrum(&[(0.4, 5000.0, 0.1), (0.2, 5001.0, 0.1)])];
        let table = table(&[5000.0, 5001.0]);
        let options = ProfileOptions::default();
        let grid = GridBounds::default();
        let ctx = FitContext {
            spectra: &spectra,
            parameters: PartialParameters {
                effective_temperature: Some(5777.0),
                surface_gravity: None,
                metallicity: Some(0.0),
                microturbulence: None,
            },
            options: &options,
            synthesiser: Some(&FlatSynthesiser),
            interpolator: &grid,
            threads: 1,
        };

        let err = fit_atomic_transitions(&table, &ctx, &mut ()).unwrap_err();
        assert!(matches!(
            err,
            FitError::Profile(ProfileError::MissingStellarParameters { wavelength, .. }) if wavelength == 5000.0
        ));
    }

    #[test]
    fn blended_lines_use_the_synthesiser() {
        let spectra = [spectrum(&[(0.4, 5000.0, 0.1)])];
        let mut lines = vec![AtomicTransition::new(5000.0, 26.0, 2.0, -1.0)];
        let mut blend = AtomicTransition::new(5001.5, 22.0, 1.0, -3.0);
        blend.clean = false;
        lines.push(blend);
        let table = TransitionTable::new(lines, CustomMasks::new()).unwrap();
        let options = ProfileOptions::default();
        let grid = GridBounds::default();
        let ctx = FitContext {
            spectra: &spectra,
            parameters: StellarParameters::default().into(),
            options: &options,
            synthesiser: Some(&FlatSynthesiser),
            interpolator: &grid,
            threads: 1,
        };

        let fitted = fit_atomic_transitions(&table, &ctx, &mut ()).unwrap();
        assert_eq!(fitted.fits.len(), 1);
        assert!(fitted.fits[0].1.blended);
        assert!((fitted.fits[0].1.amplitude - 0.4).abs() < 1e-3);
        assert!(fitted.table.transitions()[1].equivalent_width.is_nan());
    }
}
