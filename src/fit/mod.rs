//! Profile fitting.
//!
//! - `params`: named parameters with bounds, fixed values and ties
//! - `levmar`: bounded Levenberg–Marquardt least squares
//! - `profile`: compound Gaussian absorption model for one transition
//! - `transitions`: batch measurement over a transition table

pub mod levmar;
pub mod params;
pub mod profile;
pub mod transitions;

pub use levmar::*;
pub use params::*;
pub use profile::*;
pub use transitions::*;
