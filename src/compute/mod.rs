//! Compute module - Rendering, ranking, and evolutionary search.

mod color;
mod diffmap;
mod geometry;
mod instruction;
mod ranker;
mod render;

pub mod evolution;

pub use color::*;
pub use diffmap::*;
pub use geometry::*;
pub use instruction::*;
pub use ranker::*;
pub use render::*;
