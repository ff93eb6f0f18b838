//! Lineage — hash-linked ancestry of a seed
//!
//! Every generation appends one entry that commits to the previous entry's
//! hash and to the commitment root of the generation it replaced. Provenance
//! can be checked by anyone without seeing prior factor values.

use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What produced a generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineageEvent {
    /// Fresh factorization
    Genesis,
    /// Bounded perturbation after feedback
    Mutation,
    /// Composite of two seeds; heads of both parent chains
    Composition { parent_a: Digest, parent_b: Digest },
}

impl LineageEvent {
    fn tag(&self) -> &'static [u8] {
        match self {
            LineageEvent::Genesis => b"genesis",
            LineageEvent::Mutation => b"mutation",
            LineageEvent::Composition { .. } => b"composition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub epoch: u64,
    pub event: LineageEvent,
    /// Commitment root of this generation
    pub commitment_root: Digest,
    /// Commitment root of the generation this one replaced
    pub parent_root: Option<Digest>,
    pub prev_hash: Option<Digest>,
    /// Fitness when the entry was written
    pub fitness: f64,
    pub timestamp: DateTime<Utc>,
    pub hash: Digest,
}

impl LineageEntry {
    fn new(
        epoch: u64,
        event: LineageEvent,
        commitment_root: Digest,
        parent_root: Option<Digest>,
        prev_hash: Option<Digest>,
        fitness: f64,
    ) -> Self {
        let mut entry = Self {
            epoch,
            event,
            commitment_root,
            parent_root,
            prev_hash,
            fitness,
            timestamp: Utc::now(),
            hash: Digest::default(),
        };
        entry.hash = entry.compute_hash();
        entry
    }

    fn compute_hash(&self) -> Digest {
        let none = Digest::default();
        let (parent_a, parent_b) = match &self.event {
            LineageEvent::Composition { parent_a, parent_b } => (*parent_a, *parent_b),
            _ => (none, none),
        };
        Digest::of_parts(
            b"dlrs/lineage",
            &[
                self.prev_hash.as_ref().unwrap_or(&none).as_bytes(),
                &self.epoch.to_le_bytes(),
                self.event.tag(),
                parent_a.as_bytes(),
                parent_b.as_bytes(),
                self.commitment_root.as_bytes(),
                self.parent_root.as_ref().unwrap_or(&none).as_bytes(),
                &self.fitness.to_bits().to_le_bytes(),
                &self.timestamp.timestamp_micros().to_le_bytes(),
            ],
        )
    }
}

/// Append-only chain of generations, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLineage")]
pub struct Lineage {
    entries: Vec<LineageEntry>,
    /// Composition depth: 0 for a fresh seed, max(parents) + 1 for a composite
    pub generation: u64,
}

#[derive(Deserialize)]
struct RawLineage {
    entries: Vec<LineageEntry>,
    generation: u64,
}

impl TryFrom<RawLineage> for Lineage {
    type Error = String;

    fn try_from(raw: RawLineage) -> std::result::Result<Self, Self::Error> {
        if raw.entries.is_empty() {
            return Err("lineage has no entries".into());
        }
        Ok(Self {
            entries: raw.entries,
            generation: raw.generation,
        })
    }
}

impl Lineage {
    pub fn genesis(root: Digest, fitness: f64) -> Self {
        Self {
            entries: vec![LineageEntry::new(
                0,
                LineageEvent::Genesis,
                root,
                None,
                None,
                fitness,
            )],
            generation: 0,
        }
    }

    /// Start the chain of a composite of `a` and `b`
    pub fn composition(a: &Lineage, b: &Lineage, root: Digest, fitness: f64) -> Self {
        let event = LineageEvent::Composition {
            parent_a: a.head_hash(),
            parent_b: b.head_hash(),
        };
        Self {
            entries: vec![LineageEntry::new(0, event, root, None, None, fitness)],
            generation: a.generation.max(b.generation) + 1,
        }
    }

    /// Append a mutated generation
    pub fn record_mutation(&mut self, epoch: u64, root: Digest, fitness: f64) -> Result<()> {
        let head = self.head();
        if epoch <= head.epoch {
            return Err(DlrsError::InvalidInput(format!(
                "lineage epochs must increase: head at {}, got {}",
                head.epoch, epoch
            )));
        }
        let entry = LineageEntry::new(
            epoch,
            LineageEvent::Mutation,
            root,
            Some(head.commitment_root),
            Some(head.hash),
            fitness,
        );
        self.entries.push(entry);
        Ok(())
    }

    pub fn head(&self) -> &LineageEntry {
        // never empty: constructors and deserialization both insist on an entry
        &self.entries[self.entries.len() - 1]
    }

    pub fn head_hash(&self) -> Digest {
        self.head().hash
    }

    pub fn entries(&self) -> &[LineageEntry] {
        &self.entries
    }

    /// Number of generations recorded
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn mutation_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.event == LineageEvent::Mutation)
            .count()
    }

    /// Check hashes, links and epoch order of the whole chain
    pub fn verify(&self) -> Result<()> {
        let broken = |why: String| Err(DlrsError::ProofVerificationFailed(format!("lineage: {}", why)));
        let Some(first) = self.entries.first() else {
            return broken("empty chain".into());
        };
        if first.prev_hash.is_some() || first.parent_root.is_some() {
            return broken("first entry links to a predecessor".into());
        }
        match (&first.event, self.generation) {
            (LineageEvent::Genesis, 0) | (LineageEvent::Composition { .. }, 1..) => {}
            _ => return broken("first entry does not match the generation".into()),
        }

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.compute_hash() != entry.hash {
                return broken(format!("entry {} hash mismatch", i));
            }
            if i == 0 {
                continue;
            }
            let prev = &self.entries[i - 1];
            if entry.event != LineageEvent::Mutation {
                return broken(format!("entry {} is not a mutation", i));
            }
            if entry.prev_hash != Some(prev.hash) {
                return broken(format!("entry {} does not link to its predecessor", i));
            }
            if entry.parent_root != Some(prev.commitment_root) {
                return broken(format!("entry {} names the wrong parent commitment", i));
            }
            if entry.epoch <= prev.epoch {
                return broken(format!("entry {} epoch does not increase", i));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<LineageEntry> {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(tag: &str) -> Digest {
        Digest::of_parts(b"test", &[tag.as_bytes()])
    }

    #[test]
    fn test_genesis() {
        let lineage = Lineage::genesis(root("a"), 0.5);
        assert_eq!(lineage.generation, 0);
        assert_eq!(lineage.depth(), 1);
        assert_eq!(lineage.head().commitment_root, root("a"));
        lineage.verify().unwrap();
    }

    #[test]
    fn test_mutations_chain() {
        let mut lineage = Lineage::genesis(root("g0"), 0.5);
        for epoch in 1..=10 {
            lineage
                .record_mutation(epoch, root(&format!("g{}", epoch)), 0.5)
                .unwrap();
        }
        lineage.verify().unwrap();
        assert_eq!(lineage.mutation_count(), 10);
        assert_eq!(lineage.head().parent_root, Some(root("g9")));
        assert_eq!(lineage.head().prev_hash, Some(lineage.entries()[9].hash));
    }

    #[test]
    fn test_epoch_must_increase() {
        let mut lineage = Lineage::genesis(root("g0"), 0.5);
        lineage.record_mutation(3, root("g1"), 0.5).unwrap();
        assert!(lineage.record_mutation(3, root("g2"), 0.5).is_err());
        assert!(lineage.record_mutation(2, root("g2"), 0.5).is_err());
    }

    #[test]
    fn test_composition() {
        let a = Lineage::genesis(root("a"), 0.5);
        let mut b = Lineage::genesis(root("b"), 0.5);
        b.record_mutation(1, root("b1"), 0.6).unwrap();
        let c = Lineage::composition(&a, &b, root("c"), 0.55);
        assert_eq!(c.generation, 1);
        assert_eq!(
            c.head().event,
            LineageEvent::Composition {
                parent_a: a.head_hash(),
                parent_b: b.head_hash(),
            }
        );
        c.verify().unwrap();
    }

    #[test]
    fn test_tampering_detected() {
        let mut lineage = Lineage::genesis(root("g0"), 0.5);
        lineage.record_mutation(1, root("g1"), 0.4).unwrap();
        lineage.record_mutation(2, root("g2"), 0.3).unwrap();

        let mut forged = lineage.clone();
        forged.entries_mut()[1].fitness = 0.9;
        assert!(forged.verify().is_err());

        // a consistent re-hash still breaks the link from entry 2
        let mut relinked = lineage.clone();
        relinked.entries_mut()[1].fitness = 0.9;
        let rehashed = relinked.entries()[1].compute_hash();
        relinked.entries_mut()[1].hash = rehashed;
        assert!(relinked.verify().is_err());

        let mut truncated = lineage;
        truncated.entries_mut().remove(1);
        assert!(truncated.verify().is_err());
    }

    #[test]
    fn test_empty_chain_rejected_on_decode() {
        let json = r#"{"entries":[],"generation":0}"#;
        assert!(serde_json::from_str::<Lineage>(json).is_err());
    }

    #[test]
    fn test_wire_format_preserves_hash() {
        let mut lineage = Lineage::genesis(root("g0"), 0.5);
        lineage.record_mutation(1, root("g1"), 0.25).unwrap();
        let json = serde_json::to_string(&lineage).unwrap();
        let back: Lineage = serde_json::from_str(&json).unwrap();
        back.verify().unwrap();
        assert_eq!(back, lineage);
    }
}
