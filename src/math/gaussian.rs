//! Gaussian profile, Gaussian smoothing and linear interpolation.
//!
//! Smoothing follows the usual image-filter conventions: the kernel is truncated
//! at 4σ and the signal is extended by half-sample reflection
//! (`d c b a | a b c d | d c b a`).

const TRUNCATE: f64 = 4.0;

/// `amplitude * exp(-(x - mean)² / (2 stddev²))`.
pub fn gaussian(x: f64, amplitude: f64, mean: f64, stddev: f64) -> f64 {
    let z = (x - mean) / stddev;
    amplitude * (-0.5 * z * z).exp()
}

/// Smooth `input` with a Gaussian kernel of width `sigma` (in samples).
pub fn gaussian_filter1d(input: &[f64], sigma: f64) -> Vec<f64> {
    if input.is_empty() || !(sigma.is_finite() && sigma > 0.0) {
        return input.to_vec();
    }
    let radius = (TRUNCATE * sigma + 0.5) as usize;
    if radius == 0 {
        return input.to_vec();
    }

    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (-0.5 * d * d / (sigma * sigma)).exp()
        })
        .collect();
    let norm: f64 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= norm;
    }

    let n = input.len() as isize;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let j = reflect_index(i + k as isize - radius as isize, n);
                    w * input[j]
                })
                .sum()
        })
        .collect()
}

fn reflect_index(mut j: isize, n: isize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * n;
    j = j.rem_euclid(period);
    if j >= n {
        j = period - 1 - j;
    }
    j as usize
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` must be increasing. Points below/above the grid take `left`/`right`.
pub fn interp(x: f64, xp: &[f64], fp: &[f64], left: f64, right: f64) -> f64 {
    if xp.is_empty() {
        return left;
    }
    if x < xp[0] {
        return left;
    }
    let last = xp.len() - 1;
    if x > xp[last] {
        return right;
    }
    if x == xp[last] {
        return fp[last];
    }
    let hi = xp.partition_point(|&v| v <= x);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];
    if span == 0.0 {
        return fp[lo];
    }
    let u = (x - xp[lo]) / span;
    fp[lo] + u * (fp[hi] - fp[lo])
}
