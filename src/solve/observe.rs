//! Hooks into the Newton iteration.
//!
//! Observers see every [`Event`] and may end the solve early. Closures and `()`
//! are observers; [`SolveLog`] logs a stellar-parameter solve.

use tracing::{debug, warn};

use crate::domain::StellarParameters;
use crate::equilibrium::EquilibriumError;
use crate::solve::newton::{Action, Event};

pub trait Observer<const N: usize, E> {
    /// `Some(Action::StopEarly)` ends the solve at the current point.
    fn observe(&mut self, event: &Event<'_, N, E>) -> Option<Action>;
}

impl<const N: usize, E, F> Observer<N, E> for F
where
    F: FnMut(&Event<'_, N, E>) -> Option<Action>,
{
    fn observe(&mut self, event: &Event<'_, N, E>) -> Option<Action> {
        self(event)
    }
}

impl<const N: usize, E> Observer<N, E> for () {
    fn observe(&mut self, _event: &Event<'_, N, E>) -> Option<Action> {
        None
    }
}

/// Logs accepted steps at debug level and rejected trial points as warnings.
///
/// Counts the rejections so callers can report them.
#[derive(Debug, Default)]
pub struct SolveLog {
    pub steps: usize,
    pub rejected: usize,
}

impl Observer<4, EquilibriumError> for SolveLog {
    fn observe(&mut self, event: &Event<'_, 4, EquilibriumError>) -> Option<Action> {
        match event {
            Event::Step { iteration, x, residual } => {
                self.steps += 1;
                debug!(iteration, theta = %StellarParameters::from_array(**x), residual = ?residual, "solver step");
            }
            Event::Rejected { x, error } => {
                self.rejected += 1;
                warn!(theta = %StellarParameters::from_array(**x), %error, "trial point rejected");
            }
        }
        None
    }
}
