//! Organisms: candidate paintings and their genome encoding.

use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

use crate::compute::{DiffMap, Instruction, InstructionError, Rect};

use super::{Patch, PatchOperation};

/// Score of an organism that has not been evaluated yet.
pub const UNSCORED: f32 = -1.0;

/// An ordered list of drawing instructions plus its evaluation state.
#[derive(Debug)]
pub struct Organism {
    instructions: Vec<Instruction>,
    hash: OnceLock<String>,
    score: f32,
    parent: Option<Arc<Organism>>,
    patch: Option<Patch>,
    affected: Vec<Rect>,
    diff_map: Option<DiffMap>,
}

impl Organism {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            hash: OnceLock::new(),
            score: UNSCORED,
            parent: None,
            patch: None,
            affected: Vec::new(),
            diff_map: None,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Mutable access to the genome. Drops the memoized hash and the score.
    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        self.hash = OnceLock::new();
        self.score = UNSCORED;
        &mut self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Hash of the concatenated instruction hashes, memoized until the
    /// genome changes.
    pub fn hash(&self) -> &str {
        self.hash.get_or_init(|| {
            let mut hasher = blake3::Hasher::new();
            for instruction in &self.instructions {
                hasher.update(instruction.hash().as_bytes());
            }
            hex::encode(hasher.finalize().as_bytes())
        })
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn is_scored(&self) -> bool {
        self.score != UNSCORED
    }

    pub fn set_score(&mut self, score: f32) {
        self.score = score;
    }

    pub fn parent(&self) -> Option<&Arc<Organism>> {
        self.parent.as_ref()
    }

    /// Forget the parent once it is no longer needed for scoring.
    pub fn release_parent(&mut self) {
        self.parent = None;
    }

    pub fn patch(&self) -> Option<&Patch> {
        self.patch.as_ref()
    }

    /// Canvas regions changed relative to the parent. Empty means unknown.
    pub fn affected(&self) -> &[Rect] {
        &self.affected
    }

    pub fn set_affected(&mut self, affected: Vec<Rect>) {
        self.affected = affected;
    }

    pub fn diff_map(&self) -> Option<&DiffMap> {
        self.diff_map.as_ref()
    }

    pub fn set_diff_map(&mut self, diff_map: DiffMap) {
        self.diff_map = Some(diff_map);
    }

    pub fn take_diff_map(&mut self) -> Option<DiffMap> {
        self.diff_map.take()
    }

    /// Unscored copy of this genome that remembers `self` as its parent.
    pub fn spawn_child(self: &Arc<Self>) -> Organism {
        let mut child = Organism::new(self.instructions.clone());
        if let Some(hash) = self.hash.get() {
            let _ = child.hash.set(hash.clone());
        }
        child.parent = Some(Arc::clone(self));
        child
    }

    /// Unscored, parentless copy of this genome.
    pub fn clone_genome(&self) -> Organism {
        let child = Organism::new(self.instructions.clone());
        if let Some(hash) = self.hash.get() {
            let _ = child.hash.set(hash.clone());
        }
        child
    }

    /// Replay patch operations against this genome. Operations whose
    /// referenced instructions are missing are skipped.
    pub fn apply_operations(&mut self, operations: &[PatchOperation]) {
        let instructions = self.instructions_mut();
        for operation in operations {
            operation.apply(instructions);
        }
    }

    /// Record how this organism was derived from `baseline`.
    pub fn record_patch(&mut self, operations: Vec<PatchOperation>, baseline: &str) {
        let target = self.hash().to_string();
        self.patch = Some(Patch::new(operations, baseline.to_string(), target));
    }

    /// Encode as tab-separated `type|data` records.
    pub fn to_genome(&self) -> Result<String, InstructionError> {
        let records = self
            .instructions
            .iter()
            .map(Instruction::to_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records.join("\t"))
    }

    /// Decode tab- or newline-separated records.
    pub fn from_genome(genome: &str) -> Result<Self, InstructionError> {
        let instructions = genome
            .split(['\t', '\n'])
            .map(str::trim)
            .filter(|record| !record.is_empty())
            .map(Instruction::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(instructions))
    }

    /// Population order: lower score first, then fewer instructions.
    pub fn rank_cmp(&self, other: &Organism) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.len().cmp(&other.len()))
    }
}
