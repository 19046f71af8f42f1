//! The evolutionary loop.
//!
//! An [`Incubator`] owns the population and its top organism. Each call to
//! [`Incubator::iterate`] is one generation:
//!
//! 1. apply queued external changes (a new top organism, peer patches)
//! 2. grow children of the top organism, one mutation each
//! 3. score them on the worker pool
//! 4. adopt the single improver, or a merge of several improvers
//! 5. keep the best `max_population` organisms
//!
//! External changes are only ever queued and then applied here, so all
//! population mutation goes through one path.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;
use log::{debug, info, warn};

use crate::compute::{DiffMapPool, Ranker, Rect};
use crate::schema::EvolverConfig;

use super::{
    FocusMap, Mutator, Organism, Patch, PatchOperation, PopulationFile, WorkError, WorkerPool,
};

/// Mutation attempts per requested child before a generation settles for
/// fewer children.
const GROWTH_ATTEMPTS: usize = 10;

/// Lifecycle of an incubator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncubatorState {
    /// No top organism yet.
    Empty,
    /// A top organism exists but no generation has run from it.
    Seeded,
    /// Generations are running.
    Steady,
}

/// Summary of one generation.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub iteration: u64,
    pub top_hash: String,
    pub top_score: f32,
    pub instructions: usize,
    pub improved: bool,
    pub population: usize,
}

/// Owns the population and runs generations.
pub struct Incubator {
    config: EvolverConfig,
    target: RgbaImage,
    pool: WorkerPool,
    diff_pool: Arc<DiffMapPool>,
    mutator: Mutator,
    state: IncubatorState,
    top: Option<Arc<Organism>>,
    population: Vec<Arc<Organism>>,
    iteration: u64,
    pending_top: Option<Organism>,
    pending_patches: VecDeque<Patch>,
}

impl Incubator {
    pub fn new(
        config: EvolverConfig,
        target: RgbaImage,
        focus: Option<FocusMap>,
    ) -> Result<Self, IncubatorError> {
        let (width, height) = target.dimensions();
        let ranker = Arc::new(Ranker::new(&target));
        // Children plus a merge candidate per generation.
        let diff_pool = Arc::new(DiffMapPool::new(
            width,
            height,
            config.population.max_population + 2,
        ));
        let pool = WorkerPool::new(
            config.effective_worker_count(),
            ranker,
            Arc::clone(&diff_pool),
        )?;
        let mutator = Mutator::new(
            config.mutation.clone(),
            config.instruction_types.clone(),
            width,
            height,
        )
        .with_focus(focus);
        info!(
            "incubator ready: {width}x{height} target, {} evaluators",
            pool.threads()
        );
        Ok(Self {
            config,
            target,
            pool,
            diff_pool,
            mutator,
            state: IncubatorState::Empty,
            top: None,
            population: Vec::new(),
            iteration: 0,
            pending_top: None,
            pending_patches: VecDeque::new(),
        })
    }

    /// Make mutation deterministic.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.mutator = self.mutator.with_seed(seed);
        self
    }

    pub fn state(&self) -> IncubatorState {
        self.state
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn top_organism(&self) -> Option<Arc<Organism>> {
        self.top.clone()
    }

    /// Retained organisms, best first.
    pub fn population(&self) -> &[Arc<Organism>] {
        &self.population
    }

    pub fn target(&self) -> &RgbaImage {
        &self.target
    }

    /// Queue a patch to be applied to the top organism on the next tick.
    pub fn submit_patch(&mut self, patch: Patch) {
        self.pending_patches.push_back(patch);
    }

    /// Queue a replacement top organism for the next tick.
    pub fn set_top_organism(&mut self, organism: Organism) {
        self.pending_top = Some(organism);
    }

    /// Run one generation.
    pub fn iterate(&mut self) -> Result<TickReport, IncubatorError> {
        self.iteration += 1;

        if let Some(organism) = self.pending_top.take() {
            self.adopt_external(organism)?;
        }
        let top = match &self.top {
            Some(top) => Arc::clone(top),
            None => {
                let (min, max) = (
                    self.config.population.min_complexity,
                    self.config.population.max_complexity,
                );
                let seed = self.mutator.random_organism(min, max);
                info!("seeding with {} random instructions", seed.len());
                self.adopt_external(seed)?;
                self.top.clone().ok_or(IncubatorError::Unscored)?
            }
        };

        let mut seen: HashSet<String> = HashSet::from([top.hash().to_string()]);
        let mut children = self.children_from_patches(&top, &mut seen);
        self.grow(&top, &mut seen, &mut children);
        self.score(&mut children);
        children.sort_by(|a, b| a.rank_cmp(b));

        let adopted = self.select_improvement(&top, &mut children, &seen);
        let improved = adopted.is_some();
        let new_top = match adopted {
            Some(mut organism) => {
                organism.release_parent();
                Arc::new(organism)
            }
            None => Arc::clone(&top),
        };

        let mut population = vec![Arc::clone(&new_top)];
        if improved {
            population.push(top);
        }
        for mut child in children {
            child.release_parent();
            if let Some(map) = child.take_diff_map() {
                self.diff_pool.release(map);
            }
            population.push(Arc::new(child));
        }
        population.sort_by(|a, b| a.rank_cmp(b));
        let keep = population.len().min(self.config.population.max_population);
        for organism in population.split_off(keep) {
            self.recycle(Arc::into_inner(organism));
        }
        self.replace_population(population);

        self.top = Some(Arc::clone(&new_top));
        self.state = IncubatorState::Steady;
        Ok(TickReport {
            iteration: self.iteration,
            top_hash: new_top.hash().to_string(),
            top_score: new_top.score(),
            instructions: new_top.len(),
            improved,
            population: self.population.len(),
        })
    }

    /// Children produced by queued peer patches. Patches are replayed onto
    /// the current top, whatever their recorded baseline.
    fn children_from_patches(
        &mut self,
        top: &Arc<Organism>,
        seen: &mut HashSet<String>,
    ) -> Vec<Organism> {
        let mut replayed = Vec::with_capacity(self.pending_patches.len());
        let mut operations = Vec::with_capacity(self.pending_patches.len());
        while let Some(patch) = self.pending_patches.pop_front() {
            if patch.baseline != top.hash() {
                debug!(
                    "replaying patch for {} onto current top {}",
                    patch.baseline,
                    top.hash()
                );
            }
            let mut child = top.spawn_child();
            child.apply_operations(&patch.operations);
            replayed.push(child);
            operations.push(patch.operations);
        }
        self.pool.hash_all(&replayed);

        let mut children = Vec::with_capacity(replayed.len());
        for (mut child, operations) in replayed.into_iter().zip(operations) {
            if !seen.insert(child.hash().to_string()) {
                debug!("patch produced a known organism, ignoring");
                continue;
            }
            child.record_patch(operations, top.hash());
            children.push(child);
        }
        children
    }

    /// Add up to `max_population` mutated children of `top`. Each batch is
    /// hashed on the pool before duplicates are dropped.
    fn grow(&mut self, top: &Arc<Organism>, seen: &mut HashSet<String>, children: &mut Vec<Organism>) {
        let wanted = self.config.population.max_population;
        let budget = wanted * GROWTH_ATTEMPTS;
        let mut attempts = 0;
        let mut grown = 0;
        while grown < wanted && attempts < budget {
            let batch_size = (wanted - grown).min(budget - attempts);
            attempts += batch_size;

            let mut clones = self.pool.spawn_children(top, batch_size);
            let mut batch = Vec::with_capacity(batch_size);
            let mut mutations = Vec::with_capacity(batch_size);
            for _ in 0..batch_size {
                let mut child = clones.pop().unwrap_or_else(|| top.spawn_child());
                let mutation = self.mutator.mutate(&child);
                child.apply_operations(std::slice::from_ref(&mutation.operation));
                batch.push(child);
                mutations.push(mutation);
            }
            self.pool.hash_all(&batch);

            for (mut child, mutation) in batch.into_iter().zip(mutations) {
                if !seen.insert(child.hash().to_string()) {
                    continue;
                }
                child.record_patch(vec![mutation.operation], top.hash());
                child.set_affected(mutation.affected);
                children.push(child);
                grown += 1;
            }
        }
        if grown < wanted {
            debug!("generation grew {grown} of {wanted} children");
        }
    }

    /// Score `organisms` in place. Unscorable organisms are dropped.
    fn score(&self, organisms: &mut Vec<Organism>) {
        let index: HashMap<String, usize> = organisms
            .iter()
            .enumerate()
            .map(|(i, o)| (o.hash().to_string(), i))
            .collect();
        for result in self.pool.score_all(organisms) {
            match result {
                Ok(scored) => match index.get(&scored.hash) {
                    Some(&i) => {
                        organisms[i].set_score(scored.score);
                        organisms[i].set_diff_map(scored.diff_map);
                    }
                    None => {
                        warn!("dropping score for unknown organism {}", scored.hash);
                        self.diff_pool.release(scored.diff_map);
                    }
                },
                Err(e) => warn!("scoring failed: {e}"),
            }
        }
        organisms.retain(Organism::is_scored);
    }

    /// Pick the organism that replaces `top`: the single improver, or a
    /// merge of all improvers when it does at least as well as the best one.
    /// `children` must be sorted best first.
    fn select_improvement(
        &self,
        top: &Arc<Organism>,
        children: &mut Vec<Organism>,
        seen: &HashSet<String>,
    ) -> Option<Organism> {
        // Equal scores still improve when the genome is shorter.
        let improvers = children
            .iter()
            .take_while(|c| c.rank_cmp(top) == Ordering::Less)
            .count();
        match improvers {
            0 => None,
            1 => Some(children.remove(0)),
            _ => match self.merge(top, &children[..improvers], seen) {
                Some(merged)
                    if merged.rank_cmp(top) == Ordering::Less
                        && merged.rank_cmp(&children[0]) != Ordering::Greater =>
                {
                    debug!(
                        "merged {improvers} improvers: {:.6} -> {:.6}",
                        top.score(),
                        merged.score()
                    );
                    Some(merged)
                }
                rejected => {
                    self.recycle(rejected);
                    Some(children.remove(0))
                }
            },
        }
    }

    /// Replay every improver's operations onto one fresh child of `top`.
    fn merge(
        &self,
        top: &Arc<Organism>,
        improvers: &[Organism],
        seen: &HashSet<String>,
    ) -> Option<Organism> {
        let operations: Vec<PatchOperation> = improvers
            .iter()
            .filter_map(Organism::patch)
            .flat_map(|patch| patch.operations.iter().cloned())
            .collect();
        // Regions are only known if every improver knows its own.
        let affected: Vec<Rect> = if improvers.iter().all(|o| !o.affected().is_empty()) {
            improvers.iter().flat_map(|o| o.affected().iter().copied()).collect()
        } else {
            Vec::new()
        };

        let mut merged = top.spawn_child();
        merged.apply_operations(&operations);
        if seen.contains(merged.hash()) {
            return None;
        }
        merged.record_patch(operations, top.hash());
        merged.set_affected(affected);

        let mut batch = vec![merged];
        self.score(&mut batch);
        batch.pop()
    }

    /// Score and install an organism that did not come from this loop.
    fn adopt_external(&mut self, mut organism: Organism) -> Result<(), IncubatorError> {
        if let Some(top) = &self.top
            && top.hash() == organism.hash()
        {
            debug!("ignoring top organism {}, already current", organism.hash());
            return Ok(());
        }
        organism.release_parent();
        organism.set_affected(Vec::new());
        let mut batch = vec![organism];
        self.score(&mut batch);
        let organism = batch.pop().ok_or(IncubatorError::Unscored)?;
        info!(
            "adopted top organism {} ({} instructions, score {:.6})",
            organism.hash(),
            organism.len(),
            organism.score()
        );
        let organism = Arc::new(organism);
        self.replace_population(vec![Arc::clone(&organism)]);
        self.top = Some(organism);
        if self.state == IncubatorState::Empty {
            self.state = IncubatorState::Seeded;
        }
        Ok(())
    }

    fn replace_population(&mut self, population: Vec<Arc<Organism>>) {
        let old = std::mem::replace(&mut self.population, population);
        for organism in old {
            self.recycle(Arc::into_inner(organism));
        }
    }

    fn recycle(&self, organism: Option<Organism>) {
        if let Some(mut organism) = organism
            && let Some(map) = organism.take_diff_map()
        {
            self.diff_pool.release(map);
        }
    }

    /// Write the generation counter and the top organism (or the whole
    /// population when configured) to `path`.
    pub fn save(&self, path: &Path) -> Result<(), IncubatorError> {
        let organisms: Vec<&Organism> = if self.config.persistence.persist_population {
            self.population.iter().map(Arc::as_ref).collect()
        } else {
            self.top.iter().map(Arc::as_ref).collect()
        };
        let genomes = self.pool.save_all(&organisms)?;
        PopulationFile {
            iteration: self.iteration,
            genomes,
        }
        .write(path)?;
        debug!("saved {} organisms to {}", organisms.len(), path.display());
        Ok(())
    }

    /// Replace the population with the contents of `path`. The best loaded
    /// organism becomes the top organism.
    pub fn load(&mut self, path: &Path) -> Result<(), IncubatorError> {
        let file = PopulationFile::read(path)?;
        let iteration = file.iteration;
        let genomes: Vec<&str> = file.genomes.iter().map(String::as_str).collect();
        let mut organisms =
            self.pool
                .load_all(&genomes)
                .map_err(|(idx, e)| IncubatorError::MalformedPopulation {
                    line: idx + 2,
                    reason: e.to_string(),
                })?;

        self.score(&mut organisms);
        organisms.sort_by(|a, b| a.rank_cmp(b));
        // Keep one organism per genome.
        let mut seen = HashSet::new();
        organisms.retain(|o| seen.insert(o.hash().to_string()));
        organisms.truncate(self.config.population.max_population);

        let population: Vec<Arc<Organism>> = organisms.into_iter().map(Arc::new).collect();
        self.iteration = iteration;
        self.top = population.first().cloned();
        self.state = if self.top.is_some() {
            IncubatorState::Seeded
        } else {
            IncubatorState::Empty
        };
        info!(
            "loaded {} organisms at generation {iteration} from {}",
            population.len(),
            path.display()
        );
        self.replace_population(population);
        Ok(())
    }
}

/// Incubator errors.
#[derive(Debug, thiserror::Error)]
pub enum IncubatorError {
    #[error("Population file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed population file at line {line}: {reason}")]
    MalformedPopulation { line: usize, reason: String },
    #[error("Evaluation failed: {0}")]
    Work(#[from] WorkError),
    #[error("Organism could not be scored")]
    Unscored,
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("Incubator control task has stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::compute::{Circle, Instruction, Rgba};

    fn config(max_population: usize) -> EvolverConfig {
        let mut config = EvolverConfig::default();
        config.population.max_population = max_population;
        config.population.min_complexity = 3;
        config.population.max_complexity = 10;
        config.worker_count = 2;
        config
    }

    fn target(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x * 20) as u8, (y * 20) as u8, 90, 255])
        })
    }

    fn incubator(width: u32, height: u32, max_population: usize) -> Incubator {
        Incubator::new(config(max_population), target(width, height), None)
            .unwrap()
            .with_seed(42)
    }

    fn circle(x: f32) -> Instruction {
        Instruction::Circle(Circle {
            x,
            y: 1.0,
            radius: 1.0,
            color: Rgba::opaque(50, 60, 70),
        })
    }

    #[test]
    fn test_first_tick_on_tiny_target() {
        let mut incubator = incubator(2, 2, 4);
        assert_eq!(incubator.state(), IncubatorState::Empty);
        incubator.iterate().unwrap();
        assert_eq!(incubator.state(), IncubatorState::Steady);

        let population = incubator.population();
        assert!(!population.is_empty() && population.len() <= 4);
        assert!(population.iter().all(|o| o.is_scored()));
        assert!(
            population
                .windows(2)
                .all(|w| w[0].rank_cmp(&w[1]) != std::cmp::Ordering::Greater)
        );
    }

    #[test]
    fn test_top_score_never_increases() {
        let mut incubator = incubator(16, 16, 6);
        let mut last = f32::INFINITY;
        for _ in 0..25 {
            let report = incubator.iterate().unwrap();
            assert!(report.top_score <= last, "{} > {last}", report.top_score);
            last = report.top_score;
        }
        let top = incubator.top_organism().unwrap();
        assert_eq!(incubator.population()[0].hash(), top.hash());
    }

    #[test]
    fn test_submitted_patch_applies_next_tick() {
        let solid = RgbaImage::from_pixel(8, 8, image::Rgba([30, 140, 200, 255]));
        let mut incubator = Incubator::new(config(3), solid, None)
            .unwrap()
            .with_seed(9);
        incubator.set_top_organism(Organism::new(Vec::new()));
        incubator.iterate().unwrap();
        let top = incubator.top_organism().unwrap();

        let cover = Instruction::Circle(Circle {
            x: 4.0,
            y: 4.0,
            radius: 20.0,
            color: Rgba::opaque(30, 140, 200),
        });
        incubator.submit_patch(Patch::new(
            vec![PatchOperation::Append(cover.clone())],
            top.hash().to_string(),
            String::new(),
        ));
        // Nothing changes until the next tick.
        assert_eq!(incubator.top_organism().unwrap().hash(), top.hash());

        let report = incubator.iterate().unwrap();
        assert!(report.improved);
        let top = incubator.top_organism().unwrap();
        assert!(top.instructions().contains(&cover));
        assert!(top.score() < 1e-3);
    }

    #[test]
    fn test_duplicate_patch_is_noop() {
        let mut incubator = incubator(8, 8, 2);
        incubator.iterate().unwrap();
        let top = incubator.top_organism().unwrap();

        // Deleting a missing instruction leaves the top organism unchanged.
        incubator.submit_patch(Patch::new(
            vec![PatchOperation::Delete("missing".to_string())],
            top.hash().to_string(),
            top.hash().to_string(),
        ));
        let mut seen = HashSet::from([top.hash().to_string()]);
        let children = incubator.children_from_patches(&top, &mut seen);
        assert!(children.is_empty());
    }

    fn disc(x: f32, y: f32, radius: f32, color: Rgba) -> Instruction {
        Instruction::Circle(Circle { x, y, radius, color })
    }

    fn append(top: &Organism, instruction: Instruction) -> Patch {
        Patch::new(
            vec![PatchOperation::Append(instruction)],
            top.hash().to_string(),
            String::new(),
        )
    }

    /// Replay queued patches onto an empty top and return it with its scored
    /// children, best first.
    fn patch_children(
        incubator: &mut Incubator,
        instructions: &[Instruction],
    ) -> (Arc<Organism>, Vec<Organism>, HashSet<String>) {
        incubator.adopt_external(Organism::new(Vec::new())).unwrap();
        let top = incubator.top_organism().unwrap();
        for instruction in instructions {
            incubator.submit_patch(append(&top, instruction.clone()));
        }
        let mut seen = HashSet::from([top.hash().to_string()]);
        let mut children = incubator.children_from_patches(&top, &mut seen);
        incubator.score(&mut children);
        children.sort_by(|a, b| a.rank_cmp(b));
        (top, children, seen)
    }

    #[test]
    fn test_disjoint_improvements_merge() {
        let target = RgbaImage::from_fn(24, 8, |x, _| {
            if x < 8 {
                image::Rgba([220, 40, 40, 255])
            } else if x >= 16 {
                image::Rgba([40, 40, 220, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        let mut incubator = Incubator::new(config(4), target, None)
            .unwrap()
            .with_seed(3);
        let left = disc(4.0, 4.0, 4.0, Rgba::opaque(220, 40, 40));
        let right = disc(20.0, 4.0, 4.0, Rgba::opaque(40, 40, 220));

        let (top, mut children, seen) =
            patch_children(&mut incubator, &[left.clone(), right.clone()]);
        assert_eq!(children.len(), 2);
        assert!(
            children
                .iter()
                .all(|c| c.rank_cmp(&top) == std::cmp::Ordering::Less)
        );

        let merged = incubator
            .select_improvement(&top, &mut children, &seen)
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged.instructions().contains(&left));
        assert!(merged.instructions().contains(&right));
        // Both improvers are still there, so the merge was not a fallback.
        assert_eq!(children.len(), 2);
        assert!(merged.score() < children[0].score());
    }

    #[test]
    fn test_worse_merge_falls_back_to_best_improver() {
        let solid = RgbaImage::from_pixel(8, 8, image::Rgba([220, 40, 40, 255]));
        let mut incubator = Incubator::new(config(4), solid, None)
            .unwrap()
            .with_seed(5);
        let exact = disc(4.0, 4.0, 20.0, Rgba::opaque(220, 40, 40));
        let dull = disc(4.0, 4.0, 20.0, Rgba::opaque(120, 20, 20));

        let (top, mut children, seen) =
            patch_children(&mut incubator, &[dull.clone(), exact.clone()]);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].instructions(), std::slice::from_ref(&exact));
        let best = children[0].hash().to_string();

        // The merge paints the dull cover over the exact one.
        let adopted = incubator
            .select_improvement(&top, &mut children, &seen)
            .unwrap();
        assert_eq!(adopted.hash(), best);
        assert!(!adopted.instructions().contains(&dull));
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn test_grown_children_are_distinct() {
        let mut incubator = incubator(8, 8, 6);
        incubator.iterate().unwrap();
        let top = incubator.top_organism().unwrap();

        let mut seen = HashSet::from([top.hash().to_string()]);
        let mut children = Vec::new();
        incubator.grow(&top, &mut seen, &mut children);
        assert!(!children.is_empty() && children.len() <= 6);

        let hashes: HashSet<&str> = children.iter().map(Organism::hash).collect();
        assert_eq!(hashes.len(), children.len());
        assert!(!hashes.contains(top.hash()));
        assert!(
            children
                .iter()
                .all(|c| seen.contains(c.hash()) && c.patch().is_some())
        );
    }

    #[test]
    fn test_set_top_organism_replaces_on_next_tick() {
        let mut incubator = incubator(8, 8, 3);
        incubator.iterate().unwrap();
        let replacement = Organism::new(vec![circle(4.0)]);
        let hash = replacement.hash().to_string();
        incubator.set_top_organism(replacement);
        incubator.iterate().unwrap();
        let top = incubator.top_organism().unwrap();
        // The new top is the replacement or one of its improved children.
        let lineage = top.hash() == hash
            || top.patch().map(|p| p.baseline.as_str()) == Some(hash.as_str());
        assert!(lineage);
    }

    #[test]
    fn test_save_and_load_single_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("population.txt");
        let mut incubator = incubator(8, 8, 3);
        for _ in 0..3 {
            incubator.iterate().unwrap();
        }
        incubator.save(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("3\n"));

        let mut restored = self::incubator(8, 8, 3);
        restored.load(&path).unwrap();
        assert_eq!(restored.state(), IncubatorState::Seeded);
        assert_eq!(restored.iteration(), 3);
        assert_eq!(
            restored.top_organism().unwrap().hash(),
            incubator.top_organism().unwrap().hash()
        );
    }

    #[test]
    fn test_save_legacy_population() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("population.txt");
        let mut config = config(3);
        config.persistence.persist_population = true;
        let mut incubator = Incubator::new(config, target(8, 8), None)
            .unwrap()
            .with_seed(3);
        incubator.iterate().unwrap();
        incubator.save(&path).unwrap();
        let lines = fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 1 + incubator.population().len());

        let mut restored = self::incubator(8, 8, 3);
        restored.load(&path).unwrap();
        assert_eq!(restored.population().len(), incubator.population().len());
        let saved: HashSet<&str> = incubator.population().iter().map(|o| o.hash()).collect();
        assert!(saved.contains(restored.top_organism().unwrap().hash()));
    }

    #[test]
    fn test_malformed_population_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("population.txt");
        fs::write(&path, "7\nline|{not json}\n").unwrap();
        let mut incubator = incubator(4, 4, 2);
        assert!(matches!(
            incubator.load(&path),
            Err(IncubatorError::MalformedPopulation { line: 2, .. })
        ));

        fs::write(&path, "not a number\n").unwrap();
        assert!(matches!(
            incubator.load(&path),
            Err(IncubatorError::MalformedPopulation { line: 1, .. })
        ));
    }
}
