//! Seeds — the atomic unit of Distributed Low-Rank Space
//!
//! A seed is committed knowledge (low-rank factors) plus a program
//! (expression, mutation and replication rules), proofs and a hash-linked
//! lineage.

mod dna;
mod evolution;
mod fitness;
mod lineage;
mod mutation;
mod replication;

pub use dna::{
    Activation, CompositionCertificate, DomainAttestation, Instruction, OwnedSeed, Seed,
    SeedState, INITIAL_FITNESS,
};
pub use evolution::{evolve, prune_reason, Evolution, PruneReason};
pub use fitness::{
    AnyChangeTrigger, Feedback, FitnessDropTrigger, FitnessPolicy, MutationTrigger,
    ReconstructionFitness,
};
pub use lineage::{Lineage, LineageEntry, LineageEvent};
pub use mutation::{MutationRules, MutationStrategy};
pub use replication::{ReplicationPolicy, ReplicationTrigger};
