//! Input/output helpers.
//!
//! - transition tables as CSV (`table`)
//! - observed spectra as two-column text (`spectrum`)
//! - benchmark star lists (`benchmark`)
//! - result exports (CSV/JSON) (`export`)

pub mod benchmark;
pub mod export;
pub mod spectrum;
pub mod table;

pub use benchmark::*;
pub use export::*;
pub use spectrum::*;
pub use table::*;
