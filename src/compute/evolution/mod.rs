//! Evolutionary search over vector paintings.
//!
//! # Overview
//!
//! - **Organisms** (`organism`): instruction lists with memoized hashes
//! - **Patches** (`patch`): hash-addressed, replayable genome deltas
//! - **Patch cache** (`patch_cache`): rebuilds multi-generation deltas
//! - **Population files** (`population`): generation counter plus genomes
//! - **Mutator** (`mutator`): one random edit per child
//! - **Worker pool** (`worker_pool`): parallel render/score/encode
//! - **Incubator** (`incubator`, `handle`): the generation loop and its
//!   control task
//!
//! # Example
//!
//! ```rust,no_run
//! use evolver::compute::evolution::{Incubator, IncubatorHandle};
//! use evolver::schema::EvolverConfig;
//!
//! let target = image::open("target.png").unwrap().to_rgba8();
//! let incubator = Incubator::new(EvolverConfig::default(), target, None).unwrap();
//! let handle = IncubatorHandle::spawn(incubator).unwrap();
//!
//! for _ in 0..100 {
//!     let report = handle.iterate().unwrap();
//!     println!("generation {}: {:.5}", report.iteration, report.top_score);
//! }
//! ```

mod handle;
mod incubator;
mod mutator;
mod organism;
mod patch;
mod patch_cache;
mod population;
mod worker_pool;

pub use handle::*;
pub use incubator::*;
pub use mutator::*;
pub use organism::*;
pub use patch::*;
pub use patch_cache::*;
pub use population::*;
pub use worker_pool::*;
