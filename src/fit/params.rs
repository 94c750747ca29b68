//! Named model parameters with bounds, fixed values and ties.
//!
//! Profile models are products of Gaussian absorption components. Each component
//! contributes three parameters named `amplitude_k`, `mean_k` and `stddev_k`, so
//! constraints can be addressed by name prefix (all `stddev_*`, all
//! `amplitude_*`) as well as by component.

/// How a parameter participates in a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    /// Adjusted by the optimizer (within bounds, if any).
    Free,
    /// Held at its current value.
    Fixed,
    /// Derived from other parameters before every model evaluation.
    Tied(Tie),
}

/// A derived parameter: `value = params[base] * params[numerator] / params[denominator]`.
///
/// Used to keep outlier line widths at the resolution of the primary line:
/// `stddev_k = stddev_0 * mean_k / mean_0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tie {
    pub base: usize,
    pub numerator: usize,
    pub denominator: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub bounds: Option<(f64, f64)>,
    pub constraint: Constraint,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            bounds: None,
            constraint: Constraint::Free,
        }
    }

    /// Name up to the first `_` (`stddev_2` -> `stddev`).
    pub fn prefix(&self) -> &str {
        self.name.split('_').next().unwrap_or(&self.name)
    }

    pub fn is_free(&self) -> bool {
        self.constraint == Constraint::Free
    }

    /// Clip a candidate value into this parameter's bounds.
    pub fn clip(&self, value: f64) -> f64 {
        match self.bounds {
            Some((lo, hi)) => value.clamp(lo, hi),
            None => value,
        }
    }

    /// `true` when the value sits on its upper bound.
    pub fn at_upper_bound(&self) -> bool {
        match self.bounds {
            Some((_, hi)) => self.value >= hi - bound_slack(hi),
            None => false,
        }
    }

    pub fn at_lower_bound(&self) -> bool {
        match self.bounds {
            Some((lo, _)) => self.value <= lo + bound_slack(lo),
            None => false,
        }
    }

    /// `true` when a step of `delta` would push the value further past a bound it sits on.
    pub fn pinned_by(&self, delta: f64) -> bool {
        (delta > 0.0 && self.at_upper_bound()) || (delta < 0.0 && self.at_lower_bound())
    }
}

fn bound_slack(bound: f64) -> f64 {
    1e-12 * bound.abs().max(1.0)
}

/// An ordered set of parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, param: Parameter) -> usize {
        self.params.push(param);
        self.params.len() - 1
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, index: usize) -> &Parameter {
        &self.params[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Parameter {
        &mut self.params[index]
    }

    pub fn value(&self, index: usize) -> f64 {
        self.params[index].value
    }

    /// Indices of the parameters the optimizer may move.
    pub fn free_indices(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_free())
            .map(|(i, _)| i)
            .collect()
    }

    /// Set a free parameter, clipping it into bounds.
    pub fn set_clipped(&mut self, index: usize, value: f64) {
        let p = &mut self.params[index];
        p.value = p.clip(value);
    }

    /// Recompute every tied parameter from its sources.
    pub fn apply_ties(&mut self) {
        for i in 0..self.params.len() {
            if let Constraint::Tied(tie) = self.params[i].constraint {
                let value = self.params[tie.base].value * self.params[tie.numerator].value
                    / self.params[tie.denominator].value;
                self.params[i].value = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_follow_their_sources() {
        let mut set = ParameterSet::new();
        let sd0 = set.push(Parameter::new("stddev_0", 0.1));
        let m0 = set.push(Parameter::new("mean_0", 5000.0));
        let m1 = set.push(Parameter::new("mean_1", 5500.0));
        let mut sd1 = Parameter::new("stddev_1", 0.0);
        sd1.constraint = Constraint::Tied(Tie {
            base: sd0,
            numerator: m1,
            denominator: m0,
        });
        let sd1 = set.push(sd1);

        set.apply_ties();
        assert!((set.value(sd1) - 0.11).abs() < 1e-12);
        assert_eq!(set.free_indices(), vec![sd0, m0, m1]);
    }

    #[test]
    fn clipping_and_prefixes() {
        let mut p = Parameter::new("stddev_3", 0.5);
        p.bounds = Some((0.0, 0.3));
        assert_eq!(p.prefix(), "stddev");
        assert_eq!(p.clip(0.5), 0.3);

        p.value = 0.2;
        assert!(!p.at_upper_bound());
        assert!(!p.pinned_by(1.0));

        p.value = p.clip(0.5);
        assert!(p.at_upper_bound());
        assert!(p.pinned_by(0.1));
        assert!(!p.pinned_by(-0.1));

        p.value = 0.0;
        assert!(p.at_lower_bound());
        assert!(p.pinned_by(-0.1));
    }
}
