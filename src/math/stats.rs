//! Small descriptive statistics helpers.

/// Arithmetic mean, or `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Mean spacing between consecutive samples.
pub fn mean_spacing(x: &[f64]) -> Option<f64> {
    if x.len() < 2 {
        return None;
    }
    Some((x[x.len() - 1] - x[0]) / (x.len() - 1) as f64)
}
