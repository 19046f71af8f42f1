//! Incubator control task.
//!
//! The incubator runs on its own thread and is driven only through a
//! request queue. Every request carries a reply channel, so callers block
//! until their own request is done while other callers wait their turn.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;

use image::ImageFormat;
use log::debug;

use super::{Incubator, IncubatorError, Organism, Patch, TickReport};

type Reply<T> = mpsc::Sender<T>;

/// Requests understood by the control task.
pub enum IncubatorRequest {
    Iterate(Reply<Result<TickReport, IncubatorError>>),
    SubmitPatch(Patch, Reply<()>),
    SetTopOrganism(Organism, Reply<()>),
    GetTopOrganism(Reply<Option<Arc<Organism>>>),
    Save(PathBuf, Reply<Result<(), IncubatorError>>),
    Load(PathBuf, Reply<Result<(), IncubatorError>>),
    GetTargetImage(Reply<Result<Vec<u8>, IncubatorError>>),
}

/// Cloneable handle to an incubator running on its control thread.
#[derive(Clone)]
pub struct IncubatorHandle {
    requests: mpsc::Sender<IncubatorRequest>,
}

impl IncubatorHandle {
    /// Move `incubator` onto a dedicated thread. The thread exits once every
    /// handle has been dropped.
    pub fn spawn(mut incubator: Incubator) -> Result<Self, IncubatorError> {
        let (tx, rx) = mpsc::channel::<IncubatorRequest>();
        thread::Builder::new()
            .name("incubator".to_owned())
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    handle_request(&mut incubator, request);
                }
                debug!("incubator control task stopped");
            })?;
        Ok(Self { requests: tx })
    }

    fn call<T>(&self, request: impl FnOnce(Reply<T>) -> IncubatorRequest) -> Result<T, IncubatorError> {
        let (tx, rx) = mpsc::channel();
        self.requests
            .send(request(tx))
            .map_err(|_| IncubatorError::Stopped)?;
        rx.recv().map_err(|_| IncubatorError::Stopped)
    }

    /// Run one generation.
    pub fn iterate(&self) -> Result<TickReport, IncubatorError> {
        self.call(IncubatorRequest::Iterate)?
    }

    /// Queue a patch for the next generation.
    pub fn submit_patch(&self, patch: Patch) -> Result<(), IncubatorError> {
        self.call(|reply| IncubatorRequest::SubmitPatch(patch, reply))
    }

    /// Queue a replacement top organism for the next generation.
    pub fn set_top_organism(&self, organism: Organism) -> Result<(), IncubatorError> {
        self.call(|reply| IncubatorRequest::SetTopOrganism(organism, reply))
    }

    pub fn top_organism(&self) -> Result<Option<Arc<Organism>>, IncubatorError> {
        self.call(IncubatorRequest::GetTopOrganism)
    }

    pub fn save(&self, path: impl Into<PathBuf>) -> Result<(), IncubatorError> {
        let path = path.into();
        self.call(|reply| IncubatorRequest::Save(path, reply))?
    }

    pub fn load(&self, path: impl Into<PathBuf>) -> Result<(), IncubatorError> {
        let path = path.into();
        self.call(|reply| IncubatorRequest::Load(path, reply))?
    }

    /// Target image as PNG.
    pub fn target_png(&self) -> Result<Vec<u8>, IncubatorError> {
        self.call(IncubatorRequest::GetTargetImage)?
    }
}

fn handle_request(incubator: &mut Incubator, request: IncubatorRequest) {
    // A dropped reply receiver only means the caller gave up waiting.
    match request {
        IncubatorRequest::Iterate(reply) => {
            let _ = reply.send(incubator.iterate());
        }
        IncubatorRequest::SubmitPatch(patch, reply) => {
            incubator.submit_patch(patch);
            let _ = reply.send(());
        }
        IncubatorRequest::SetTopOrganism(organism, reply) => {
            incubator.set_top_organism(organism);
            let _ = reply.send(());
        }
        IncubatorRequest::GetTopOrganism(reply) => {
            let _ = reply.send(incubator.top_organism());
        }
        IncubatorRequest::Save(path, reply) => {
            let _ = reply.send(incubator.save(&path));
        }
        IncubatorRequest::Load(path, reply) => {
            let _ = reply.send(incubator.load(&path));
        }
        IncubatorRequest::GetTargetImage(reply) => {
            let mut cursor = Cursor::new(Vec::new());
            let result = match incubator.target().write_to(&mut cursor, ImageFormat::Png) {
                Ok(()) => Ok(cursor.into_inner()),
                Err(e) => Err(IncubatorError::from(e)),
            };
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EvolverConfig;
    use image::RgbaImage;

    fn handle() -> IncubatorHandle {
        let mut config = EvolverConfig::default();
        config.population.max_population = 3;
        config.population.min_complexity = 2;
        config.population.max_complexity = 6;
        config.worker_count = 1;
        let target = RgbaImage::from_pixel(6, 6, image::Rgba([200, 100, 50, 255]));
        let incubator = Incubator::new(config, target, None).unwrap().with_seed(5);
        IncubatorHandle::spawn(incubator).unwrap()
    }

    #[test]
    fn test_requests_round_trip() {
        let handle = handle();
        assert!(handle.top_organism().unwrap().is_none());
        let report = handle.iterate().unwrap();
        assert_eq!(report.iteration, 1);
        let top = handle.top_organism().unwrap().unwrap();
        assert_eq!(top.hash(), report.top_hash);
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let handle = handle();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for _ in 0..3 {
                        handle.iterate().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(handle.iterate().unwrap().iteration, 13);
    }

    #[test]
    fn test_target_png_decodes() {
        let handle = handle();
        let png = handle.target_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (6, 6));
        assert_eq!(decoded.get_pixel(0, 0).0, [200, 100, 50, 255]);
    }
}
