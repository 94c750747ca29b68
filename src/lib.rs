//! `stellar-equilibria` library crate.
//!
//! Stellar parameters (Teff, logg, [M/H], ξ) from the excitation and
//! ionisation balance of iron-like lines:
//!
//! - [`fit`]: Gaussian profile fits and equivalent widths
//! - [`equilibrium`]: per-line abundances, the four-component state, outlier rejection
//! - [`solve`]: Newton iteration on the state
//!
//! The binary (`equilibria`) is a thin wrapper around [`app::run`].

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod equilibrium;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod physics;
pub mod report;
pub mod solve;
