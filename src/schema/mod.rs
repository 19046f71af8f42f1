//! Schema module - Configuration types for the evolver.

mod config;

pub use config::*;
