//! Sync module - Coordinator/peer exchange of patches over HTTP.
//!
//! One coordinator serves its top organism and accepts patches. Peers pull
//! deltas from the hash they last imported and push the concatenated
//! patches of their own improvements. Anything that cannot be verified
//! falls back to a full organism transfer.

mod client;
mod portal;
mod server;

pub use client::*;
pub use portal::*;
pub use server::*;

use crate::compute::evolution::IncubatorError;
use crate::compute::{InstructionError, RenderError};

/// Errors crossing the coordinator/peer boundary, and from the run loops
/// on either side.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Coordinator returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid genome: {0}")]
    Genome(#[from] InstructionError),
    #[error("Invalid image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Incubator failed: {0}")]
    Incubator(#[from] IncubatorError),
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use image::RgbaImage;
    use tokio::net::TcpListener;

    use super::*;
    use crate::compute::evolution::{Incubator, IncubatorHandle};
    use crate::schema::EvolverConfig;

    /// Solid target every test coordinator evolves toward.
    pub const TARGET_RGB: [u8; 3] = [30, 140, 200];

    pub fn config() -> EvolverConfig {
        let mut config = EvolverConfig::default();
        config.population.max_population = 4;
        config.population.min_complexity = 2;
        config.population.max_complexity = 5;
        config.worker_count = 2;
        config
    }

    pub fn handle(seed: u64) -> IncubatorHandle {
        let [r, g, b] = TARGET_RGB;
        let target = RgbaImage::from_pixel(8, 8, image::Rgba([r, g, b, 255]));
        let incubator = Incubator::new(config(), target, None)
            .unwrap()
            .with_seed(seed);
        IncubatorHandle::spawn(incubator).unwrap()
    }

    /// Serve `state` on a loopback port and return a client for it.
    pub async fn serve_local(state: CoordinatorState) -> SyncClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));
        SyncClient::new(format!("http://{addr}"), Duration::from_secs(10)).unwrap()
    }
}
