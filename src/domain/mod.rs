//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - atomic transitions, species codes and observed spectra (`types`)
//! - the immutable transition table and channel lookup (`table`)
//! - the JSON model configuration (`config`)

pub mod config;
pub mod table;
pub mod types;

pub use config::*;
pub use table::*;
pub use types::*;
