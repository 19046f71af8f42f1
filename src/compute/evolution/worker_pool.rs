//! Fixed-size pool of evaluators for rendering, scoring, and genome I/O.
//!
//! Requests are typed and fanned out over a dedicated rayon pool; every
//! batch call blocks until all of its results are back.

use std::sync::Arc;

use rayon::prelude::*;

use crate::compute::{
    DiffMap, DiffMapPool, InstructionError, Ranker, RankerError, RenderError, Renderer,
};

use super::Organism;

/// One unit of work for the pool.
pub enum WorkRequest<'a> {
    /// Render and rank.
    Score(&'a Organism),
    /// Child of the organism linked to it as parent.
    Clone(&'a Arc<Organism>),
    /// Content hash.
    Hash(&'a Organism),
    /// Genome encoding.
    Save(&'a Organism),
    /// Genome decoding.
    Load(&'a str),
}

/// Outcome of one [`WorkRequest`].
pub enum WorkResult {
    Scored(ScoreResult),
    Cloned(Organism),
    Hashed(String),
    Saved(String),
    Loaded(Organism),
}

/// Score of an organism, keyed by its hash at evaluation time.
#[derive(Debug)]
pub struct ScoreResult {
    pub hash: String,
    pub score: f32,
    pub diff_map: DiffMap,
}

/// Renders and ranks organisms, incrementally when possible.
pub struct Evaluator {
    renderer: Renderer,
    ranker: Arc<Ranker>,
    diff_pool: Arc<DiffMapPool>,
}

impl Evaluator {
    pub fn new(ranker: Arc<Ranker>, diff_pool: Arc<DiffMapPool>) -> Self {
        Self {
            renderer: Renderer::new(ranker.width(), ranker.height()),
            ranker,
            diff_pool,
        }
    }

    /// Score `organism`. When its parent carries a diff map and the
    /// organism knows which regions changed, only those regions are
    /// re-rendered on top of a copy of the parent's map.
    pub fn score(&self, organism: &Organism) -> Result<ScoreResult, WorkError> {
        let parent_diff = organism
            .parent()
            .and_then(|parent| parent.diff_map())
            .filter(|_| !organism.affected().is_empty());

        let (score, diff_map) = match parent_diff {
            Some(parent_diff) => {
                let mut diff_map = self.diff_pool.acquire_copy(parent_diff);
                let mut score = diff_map.average();
                let (width, height) = (self.renderer.width(), self.renderer.height());
                for rect in organism.affected() {
                    let Some(region) = rect.to_pixels(width, height) else {
                        continue;
                    };
                    let canvas = self.renderer.render_region(organism.instructions(), region)?;
                    score = self
                        .ranker
                        .distance_from_precalculated_bounds(&canvas, &[*rect], &mut diff_map)?;
                }
                (score, diff_map)
            }
            None => {
                let mut diff_map = self.diff_pool.acquire_blank();
                let canvas = self.renderer.render(organism.instructions())?;
                let score = self
                    .ranker
                    .distance_from_precalculated(&canvas, &mut diff_map)?;
                (score, diff_map)
            }
        };

        Ok(ScoreResult {
            hash: organism.hash().to_string(),
            score,
            diff_map,
        })
    }

    fn process(&self, request: WorkRequest<'_>) -> Result<WorkResult, WorkError> {
        Ok(match request {
            WorkRequest::Score(organism) => WorkResult::Scored(self.score(organism)?),
            WorkRequest::Clone(organism) => WorkResult::Cloned(organism.spawn_child()),
            WorkRequest::Hash(organism) => WorkResult::Hashed(organism.hash().to_string()),
            WorkRequest::Save(organism) => WorkResult::Saved(organism.to_genome()?),
            WorkRequest::Load(genome) => WorkResult::Loaded(Organism::from_genome(genome)?),
        })
    }
}

/// A fixed set of evaluator threads.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    evaluator: Evaluator,
}

impl WorkerPool {
    pub fn new(
        threads: usize,
        ranker: Arc<Ranker>,
        diff_pool: Arc<DiffMapPool>,
    ) -> Result<Self, WorkError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("evaluator-{i}"))
            .build()?;
        Ok(Self {
            pool,
            evaluator: Evaluator::new(ranker, diff_pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Process a batch of requests in parallel. Results keep request order.
    pub fn run(&self, requests: Vec<WorkRequest<'_>>) -> Vec<Result<WorkResult, WorkError>> {
        self.pool.install(|| {
            requests
                .into_par_iter()
                .map(|request| self.evaluator.process(request))
                .collect()
        })
    }

    /// Score every organism.
    pub fn score_all(&self, organisms: &[Organism]) -> Vec<Result<ScoreResult, WorkError>> {
        let requests = organisms.iter().map(WorkRequest::Score).collect();
        self.run(requests)
            .into_iter()
            .map(|result| match result? {
                WorkResult::Scored(scored) => Ok(scored),
                _ => Err(WorkError::UnexpectedResult),
            })
            .collect()
    }

    /// `count` children of `parent`.
    pub fn spawn_children(&self, parent: &Arc<Organism>, count: usize) -> Vec<Organism> {
        let requests = (0..count).map(|_| WorkRequest::Clone(parent)).collect();
        self.run(requests)
            .into_iter()
            .filter_map(|result| match result {
                Ok(WorkResult::Cloned(child)) => Some(child),
                _ => None,
            })
            .collect()
    }

    /// Hash every organism, warming their memoized hashes.
    pub fn hash_all(&self, organisms: &[Organism]) -> Vec<String> {
        let requests = organisms.iter().map(WorkRequest::Hash).collect();
        self.run(requests)
            .into_iter()
            .filter_map(|result| match result {
                Ok(WorkResult::Hashed(hash)) => Some(hash),
                _ => None,
            })
            .collect()
    }

    /// Encode genomes.
    pub fn save_all(&self, organisms: &[&Organism]) -> Result<Vec<String>, WorkError> {
        let requests = organisms.iter().map(|o| WorkRequest::Save(o)).collect();
        self.run(requests)
            .into_iter()
            .map(|result| match result? {
                WorkResult::Saved(genome) => Ok(genome),
                _ => Err(WorkError::UnexpectedResult),
            })
            .collect()
    }

    /// Decode genomes. The first failure is reported with its index.
    pub fn load_all(&self, genomes: &[&str]) -> Result<Vec<Organism>, (usize, WorkError)> {
        let requests = genomes.iter().map(|g| WorkRequest::Load(g)).collect();
        self.run(requests)
            .into_iter()
            .enumerate()
            .map(|(idx, result)| match result {
                Ok(WorkResult::Loaded(organism)) => Ok(organism),
                Ok(_) => Err((idx, WorkError::UnexpectedResult)),
                Err(e) => Err((idx, e)),
            })
            .collect()
    }
}

/// Evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),
    #[error("Ranking failed: {0}")]
    Rank(#[from] RankerError),
    #[error("Genome encoding failed: {0}")]
    Genome(#[from] InstructionError),
    #[error("Failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Worker returned a result of the wrong kind")]
    UnexpectedResult,
}
