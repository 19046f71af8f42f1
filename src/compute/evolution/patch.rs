//! Content-addressed genome deltas.
//!
//! Operations reference instructions by hash rather than position, so a
//! patch stays meaningful when other parts of the genome have moved.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::compute::{Instruction, InstructionKind};

use super::Organism;

/// One atomic genome edit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawOperation")]
pub enum PatchOperation {
    /// Add an instruction at the end of the genome.
    Append(Instruction),
    /// Remove the first instruction with this hash.
    Delete(String),
    /// Replace the first instruction with hash `old`.
    Replace { old: String, instruction: Instruction },
    /// Exchange the positions of two instructions.
    Swap(String, String),
}

impl PatchOperation {
    /// Apply to a genome. Returns `false` when a referenced instruction is
    /// missing and the operation was skipped.
    pub fn apply(&self, instructions: &mut Vec<Instruction>) -> bool {
        match self {
            PatchOperation::Append(instruction) => {
                instructions.push(instruction.clone());
                true
            }
            PatchOperation::Delete(hash) => match position_of(instructions, hash) {
                Some(idx) => {
                    instructions.remove(idx);
                    true
                }
                None => false,
            },
            PatchOperation::Replace { old, instruction } => match position_of(instructions, old) {
                Some(idx) => {
                    instructions[idx] = instruction.clone();
                    true
                }
                None => false,
            },
            PatchOperation::Swap(a, b) => {
                let mut first = None;
                let mut second = None;
                for (idx, instruction) in instructions.iter().enumerate() {
                    let hash = instruction.hash();
                    if first.is_none() && hash == *a {
                        first = Some(idx);
                    } else if second.is_none() && hash == *b {
                        second = Some(idx);
                    }
                    if first.is_some() && second.is_some() {
                        break;
                    }
                }
                match (first, second) {
                    (Some(i), Some(j)) => {
                        instructions.swap(i, j);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            PatchOperation::Append(_) => "a",
            PatchOperation::Delete(_) => "d",
            PatchOperation::Replace { .. } => "r",
            PatchOperation::Swap(..) => "s",
        }
    }
}

fn position_of(instructions: &[Instruction], hash: &str) -> Option<usize> {
    instructions.iter().position(|i| i.hash() == hash)
}

/// Wire shape of an operation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    op: String,
    #[serde(default)]
    hash1: Option<String>,
    #[serde(default)]
    hash2: Option<String>,
    #[serde(default)]
    instruction_type: Option<InstructionKind>,
    #[serde(default)]
    instruction_data: Option<String>,
}

impl RawOperation {
    fn instruction(&self) -> Result<Instruction, PatchError> {
        match (self.instruction_type, &self.instruction_data) {
            (Some(kind), Some(data)) => Instruction::decode(kind, data)
                .map_err(|e| PatchError::MalformedOperation(e.to_string())),
            _ => Err(PatchError::MalformedOperation(format!(
                "operation '{}' carries no instruction",
                self.op
            ))),
        }
    }

    fn hash(value: Option<String>, field: &str) -> Result<String, PatchError> {
        value.ok_or_else(|| PatchError::MalformedOperation(format!("missing {field}")))
    }
}

impl TryFrom<RawOperation> for PatchOperation {
    type Error = PatchError;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        match raw.op.as_str() {
            "a" => Ok(PatchOperation::Append(raw.instruction()?)),
            "d" => Ok(PatchOperation::Delete(RawOperation::hash(raw.hash1, "hash1")?)),
            "r" => {
                let instruction = raw.instruction()?;
                Ok(PatchOperation::Replace {
                    old: RawOperation::hash(raw.hash1, "hash1")?,
                    instruction,
                })
            }
            "s" => Ok(PatchOperation::Swap(
                RawOperation::hash(raw.hash1, "hash1")?,
                RawOperation::hash(raw.hash2, "hash2")?,
            )),
            other => Err(PatchError::MalformedOperation(format!(
                "unknown op '{other}'"
            ))),
        }
    }
}

impl Serialize for PatchOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("op", self.code())?;
        let instruction = match self {
            PatchOperation::Append(instruction) => Some(instruction),
            PatchOperation::Delete(hash) => {
                map.serialize_entry("hash1", hash)?;
                None
            }
            PatchOperation::Replace { old, instruction } => {
                map.serialize_entry("hash1", old)?;
                Some(instruction)
            }
            PatchOperation::Swap(a, b) => {
                map.serialize_entry("hash1", a)?;
                map.serialize_entry("hash2", b)?;
                None
            }
        };
        if let Some(instruction) = instruction {
            let data = instruction
                .encode_data()
                .map_err(<S::Error as serde::ser::Error>::custom)?;
            map.serialize_entry("instructionType", &instruction.kind())?;
            map.serialize_entry("instructionData", &data)?;
        }
        map.end()
    }
}

/// Replayable delta from the organism hashed `baseline` to the organism
/// hashed `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub operations: Vec<PatchOperation>,
    pub baseline: String,
    pub target: String,
}

impl Patch {
    pub fn new(operations: Vec<PatchOperation>, baseline: String, target: String) -> Self {
        Self {
            operations,
            baseline,
            target,
        }
    }

    /// Patch meaning "no change" at `hash`.
    pub fn empty(hash: &str) -> Self {
        Self::new(Vec::new(), hash.to_string(), hash.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.baseline == self.target
    }

    /// Replay onto a copy of `organism`. The result's patch records the
    /// actual hashes, which differ from `self` when `organism` is not the
    /// baseline.
    pub fn apply_to(&self, organism: &Organism) -> Organism {
        let mut result = organism.clone_genome();
        result.apply_operations(&self.operations);
        result.record_patch(self.operations.clone(), organism.hash());
        result
    }

    /// Replay onto `baseline` and check both ends of the chain.
    pub fn replay_verified(&self, baseline: &Organism) -> Result<Organism, PatchError> {
        if baseline.hash() != self.baseline {
            return Err(PatchError::BaselineMismatch {
                expected: self.baseline.clone(),
                actual: baseline.hash().to_string(),
            });
        }
        let result = self.apply_to(baseline);
        if result.hash() != self.target {
            return Err(PatchError::TargetMismatch {
                expected: self.target.clone(),
                actual: result.hash().to_string(),
            });
        }
        Ok(result)
    }
}

/// Patch replay and decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Patch baseline {expected} does not match organism {actual}")]
    BaselineMismatch { expected: String, actual: String },
    #[error("Replayed patch produced {actual}, expected {expected}")]
    TargetMismatch { expected: String, actual: String },
    #[error("Malformed patch operation: {0}")]
    MalformedOperation(String),
}
