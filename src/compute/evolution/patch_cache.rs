//! Time-bounded cache of patches keyed by the hash they produce.
//!
//! Patches chain through their `baseline` field, so a delta between two
//! organisms several generations apart can be assembled by walking the
//! chain backwards from the newer hash.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error};

use super::{Organism, Patch};

struct CacheEntry {
    patch: Arc<Patch>,
    inserted: Instant,
}

/// Patch store with a retention window and a maximum chain length.
pub struct PatchCache {
    entries: HashMap<String, CacheEntry>,
    retention: Duration,
    max_hops: usize,
}

impl PatchCache {
    pub fn new(retention: Duration, max_hops: usize) -> Self {
        Self {
            entries: HashMap::new(),
            retention,
            max_hops,
        }
    }

    fn is_live(&self, entry: &CacheEntry) -> bool {
        entry.inserted.elapsed() < self.retention
    }

    /// Store `patch` under its target hash, evicting expired entries.
    pub fn put(&mut self, patch: Patch) {
        self.evict_expired();
        debug!(
            "caching patch {} -> {} ({} ops)",
            patch.baseline,
            patch.target,
            patch.operations.len()
        );
        self.entries.insert(
            patch.target.clone(),
            CacheEntry {
                patch: Arc::new(patch),
                inserted: Instant::now(),
            },
        );
    }

    /// The patch that produced `target`, if still retained.
    pub fn get(&self, target: &str) -> Option<Arc<Patch>> {
        self.entries
            .get(target)
            .filter(|entry| self.is_live(entry))
            .map(|entry| Arc::clone(&entry.patch))
    }

    pub fn contains(&self, target: &str) -> bool {
        self.get(target).is_some()
    }

    pub fn evict_expired(&mut self) {
        let retention = self.retention;
        self.entries
            .retain(|_, entry| entry.inserted.elapsed() < retention);
    }

    /// Assemble one patch from `baseline` to `target` by walking cached
    /// patches backwards from `target`.
    ///
    /// Returns `None` when the chain is broken, longer than the hop limit, or
    /// (when `verify_with` holds the baseline organism) fails replay.
    pub fn get_patch(
        &self,
        baseline: &str,
        target: &str,
        verify_with: Option<&Organism>,
    ) -> Option<Patch> {
        if baseline == target {
            return Some(Patch::empty(target));
        }

        let mut chain = Vec::new();
        let mut current = target.to_string();
        while current != baseline {
            if chain.len() >= self.max_hops {
                debug!("patch chain {baseline} -> {target} exceeds {} hops", self.max_hops);
                return None;
            }
            let Some(patch) = self.get(&current) else {
                debug!("patch chain {baseline} -> {target} broken at {current}");
                return None;
            };
            current = patch.baseline.clone();
            chain.push(patch);
        }

        let operations = chain
            .iter()
            .rev()
            .flat_map(|patch| patch.operations.iter().cloned())
            .collect();
        let assembled = Patch::new(operations, baseline.to_string(), target.to_string());

        if let Some(organism) = verify_with {
            if let Err(e) = assembled.replay_verified(organism) {
                let before = organism.to_genome().unwrap_or_else(|e| e.to_string());
                let after = assembled
                    .apply_to(organism)
                    .to_genome()
                    .unwrap_or_else(|e| e.to_string());
                let operations = serde_json::to_string(&assembled.operations)
                    .unwrap_or_else(|e| e.to_string());
                error!(
                    "assembled patch failed verification: {e}\nbefore: {before}\nafter: {after}\noperations: {operations}"
                );
                return None;
            }
        }
        Some(assembled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::PatchOperation;
    use crate::compute::{Circle, Instruction, Rgba};

    fn circle(x: f32) -> Instruction {
        Instruction::Circle(Circle {
            x,
            y: 1.0,
            radius: 1.0,
            color: Rgba::opaque(1, 1, 1),
        })
    }

    /// Derive a child of `parent` by applying `operations`.
    fn derive(parent: &Organism, operations: Vec<PatchOperation>) -> (Organism, Patch) {
        let mut child = parent.clone_genome();
        child.apply_operations(&operations);
        let patch = Patch::new(operations, parent.hash().to_string(), child.hash().to_string());
        (child, patch)
    }

    fn chain() -> (Organism, Organism, Organism, Patch, Patch) {
        let a = Organism::new(vec![circle(0.0)]);
        let (b, ab) = derive(&a, vec![PatchOperation::Append(circle(1.0))]);
        let (c, bc) = derive(
            &b,
            vec![PatchOperation::Replace {
                old: circle(0.0).hash(),
                instruction: circle(5.0),
            }],
        );
        (a, b, c, ab, bc)
    }

    #[test]
    fn test_chain_composition() {
        let (a, _b, c, ab, bc) = chain();
        let mut cache = PatchCache::new(Duration::from_secs(60), 100);
        cache.put(ab.clone());
        cache.put(bc.clone());

        let assembled = cache.get_patch(a.hash(), c.hash(), Some(&a)).unwrap();
        let expected: Vec<_> = ab.operations.iter().chain(&bc.operations).cloned().collect();
        assert_eq!(assembled.operations, expected);
        assert_eq!(assembled.apply_to(&a).hash(), c.hash());
    }

    #[test]
    fn test_missing_link_is_miss() {
        let (a, _b, c, _ab, bc) = chain();
        let mut cache = PatchCache::new(Duration::from_secs(60), 100);
        cache.put(bc);
        assert!(cache.get_patch(a.hash(), c.hash(), None).is_none());
    }

    #[test]
    fn test_hop_limit_is_miss() {
        let (a, _b, c, ab, bc) = chain();
        let mut cache = PatchCache::new(Duration::from_secs(60), 1);
        cache.put(ab);
        cache.put(bc);
        assert!(cache.get_patch(a.hash(), c.hash(), None).is_none());
    }

    #[test]
    fn test_expired_entries_are_miss() {
        let (a, b, _c, ab, _bc) = chain();
        let mut cache = PatchCache::new(Duration::ZERO, 100);
        cache.put(ab);
        assert!(cache.get_patch(a.hash(), b.hash(), None).is_none());
        cache.evict_expired();
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn test_same_hash_gives_empty_patch() {
        let cache = PatchCache::new(Duration::from_secs(60), 100);
        let patch = cache.get_patch("abc", "abc", None).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_tampered_chain_fails_verification() {
        let (a, b, _c, mut ab, _bc) = chain();
        ab.operations = vec![PatchOperation::Append(circle(42.0))];
        let mut cache = PatchCache::new(Duration::from_secs(60), 100);
        cache.put(ab);
        assert!(cache.get_patch(a.hash(), b.hash(), None).is_some());
        assert!(cache.get_patch(a.hash(), b.hash(), Some(&a)).is_none());
    }
}
