//! DLRS — Distributed Low-Rank Space
//!
//! Knowledge as committed low-rank factors, shared across a trustless
//! network. Owners prove properties of their factors in zero knowledge;
//! peers verify before they keep anything.

pub mod config;
pub mod digest;
pub mod error;
pub mod factor;
pub mod mpc;
pub mod network;
pub mod seed;
pub mod storage;
pub mod zk;

pub use config::{CryptoParams, DlrsConfig};
pub use error::{DlrsError, Result};
pub use factor::{factorize, FactorTarget, LowRankFactorSet, Method};
pub use network::{GossipNode, MemoryNetwork, PeerView};
pub use seed::{MutationRules, OwnedSeed, ReplicationPolicy, Seed, SeedState};
pub use storage::SeedStore;
pub use zk::{CapabilityProof, Commitment, CompatibilityProof, ZkContext};
