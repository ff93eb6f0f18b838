//! Zero-Knowledge Proof module for DLRS
//!
//! Enables proving properties of low-rank factors without revealing them:
//! - Commitment: Pedersen commitment to every factor entry
//! - CapabilityProof: quality of a seed along a challenge direction
//! - CompatibilityProof: weighted overlap of two seeds' expressions
//! - CollaborationProof: joint task result over two seeds
//!
//! All three predicates go through the generic [`Predicate`] interface.

pub mod bilinear;
pub mod codec;
mod capability;
mod collaborative;
mod commitment;
mod compatibility;
mod expression;
mod group;
mod predicate;
mod sigma;
mod transcript;

pub use capability::{
    encoded_quality, prove_capability, verify_capability, Capability, CapabilityProof,
    CapabilityStatement, Challenge,
};
pub use collaborative::{
    compute_locally, verify_collaboration, Collaboration, CollaborationOutcome,
    CollaborationProof, CollaborationStatement, TaskSpec,
};
pub use commitment::{commit, open, Commitment, OpeningSecret, Shape};
pub use compatibility::{
    check_compatibility, verify_compatibility, Compatibility, CompatibilityOutcome,
    CompatibilityProof, CompatibilityStatement, SubspaceClaim,
};
pub use bilinear::{BilinearPredicate, BilinearProof, BilinearStatement, JointOpening, Side};
pub use expression::{expression_levels, ExpressionProof, ExpressionWitness};
pub use group::{
    encode_fixed, fr_to_f64, hash_to_curve, inner_product, random_scalar, Generators, ZkContext,
};
pub use predicate::{prove, statement_transcript, verify, Predicate};
pub use sigma::{LinkProof, MulProof, RangeProof};
pub use transcript::Transcript;
