//! Evolver - Distributed evolutionary search for vector paintings.
//!
//! A painting is an ordered list of drawing instructions (lines, circles,
//! polygons). Each generation mutates the best painting found so far,
//! scores the children against a target image in CIE Lab space, and keeps
//! the improvements. A coordinator shares its best painting with any number
//! of peers, and everyone exchanges small hash-addressed patches instead of
//! whole paintings.
//!
//! # Architecture
//!
//! - `schema`: Configuration types and validation
//! - `compute`: Rendering, scoring, and the evolutionary loop
//! - `sync`: Coordinator HTTP server and peer client
//! - `animation`: Time-lapse videos from coordinator snapshots
//!
//! # Example
//!
//! ```rust,no_run
//! use evolver::{
//!     compute::evolution::Incubator,
//!     schema::EvolverConfig,
//! };
//!
//! let target = image::open("target.png").unwrap().to_rgba8();
//! let mut incubator = Incubator::new(EvolverConfig::default(), target, None).unwrap();
//!
//! for _ in 0..100 {
//!     incubator.iterate().unwrap();
//! }
//!
//! let top = incubator.top_organism().unwrap();
//! println!("{} instructions, score {:.5}", top.len(), top.score());
//! ```

pub mod animation;
pub mod compute;
pub mod schema;
pub mod sync;

// Re-export commonly used types
pub use compute::evolution::{Incubator, IncubatorHandle, Organism, Patch, PatchCache};
pub use compute::{Instruction, Ranker, Renderer};
pub use schema::EvolverConfig;
