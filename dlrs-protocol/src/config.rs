//! Node configuration
//!
//! Every section has sensible defaults so a node can start with no file at
//! all. A JSON file can override any subset of fields, and `DLRS_*`
//! environment variables override the file.

use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use crate::factor::Method;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Elliptic-curve group used for commitments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveId {
    Bn254,
}

impl CurveId {
    pub fn name(&self) -> &'static str {
        match self {
            CurveId::Bn254 => "bn254-g1",
        }
    }
}

/// Cryptographic parameters; peers must agree on all of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoParams {
    pub curve: CurveId,
    /// Fractional bits of the fixed-point encoding of factor entries
    pub fixed_point_bits: u32,
    /// Bit length of range proofs (capability margin must fit)
    pub range_bits: u32,
    /// Domain tag the Pedersen generators are hashed from
    pub generator_tag: String,
}

impl Default for CryptoParams {
    fn default() -> Self {
        Self {
            curve: CurveId::Bn254,
            fixed_point_bits: 16,
            range_bits: 64,
            generator_tag: "dlrs/pedersen/v1".to_string(),
        }
    }
}

impl CryptoParams {
    /// Digest exchanged at handshakes to detect mismatched groups
    pub fn fingerprint(&self) -> Digest {
        Digest::of_parts(
            b"dlrs/params",
            &[
                self.curve.name().as_bytes(),
                &self.fixed_point_bits.to_le_bytes(),
                &self.range_bits.to_le_bytes(),
                self.generator_tag.as_bytes(),
            ],
        )
    }

    /// Fail with `ParameterMismatch` unless `remote` equals our fingerprint
    pub fn ensure_matches(&self, remote: &Digest) -> Result<()> {
        let local = self.fingerprint();
        if &local != remote {
            return Err(DlrsError::ParameterMismatch {
                local: local.short(),
                remote: remote.short(),
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(4..=24).contains(&self.fixed_point_bits) {
            return Err(DlrsError::Config(format!(
                "fixed_point_bits must be in 4..=24, got {}",
                self.fixed_point_bits
            )));
        }
        if !(16..=128).contains(&self.range_bits) {
            return Err(DlrsError::Config(format!(
                "range_bits must be in 16..=128, got {}",
                self.range_bits
            )));
        }
        if self.generator_tag.is_empty() {
            return Err(DlrsError::Config("generator_tag must not be empty".into()));
        }
        Ok(())
    }
}

/// Defaults for seed factorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorizationConfig {
    pub default_rank: usize,
    /// When set, seeds are factorized to the smallest rank meeting this error
    pub tolerance: Option<f64>,
    pub randomized: bool,
    pub oversample: usize,
    pub power_iterations: usize,
    pub seed: u64,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            default_rank: 8,
            tolerance: None,
            randomized: false,
            oversample: 5,
            power_iterations: 2,
            seed: 0,
        }
    }
}

impl FactorizationConfig {
    pub fn method(&self) -> Method {
        if self.randomized {
            Method::Randomized {
                oversample: self.oversample,
                power_iterations: self.power_iterations,
                seed: self.seed,
            }
        } else {
            Method::Exact
        }
    }
}

/// Gossip engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    pub announce_interval_ms: u64,
    pub lifecycle_interval_ms: u64,
    /// Number of peers each announce round targets
    pub fanout: usize,
    /// Announced fitness below this is never pulled
    pub min_fitness: f64,
    /// Domains this node pulls seeds for (empty = all)
    pub interested_domains: Vec<String>,
    pub max_seeds: usize,
    /// Failed verifications tolerated before a peer is ignored
    pub max_strikes: u32,
    pub inbox_capacity: usize,
    /// Unanswered seed requests expire after this and may go to another peer
    pub request_timeout_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            announce_interval_ms: 30_000,
            lifecycle_interval_ms: 120_000,
            fanout: 3,
            min_fitness: 0.3,
            interested_domains: Vec::new(),
            max_seeds: 1000,
            max_strikes: 3,
            inbox_capacity: 256,
            request_timeout_ms: 10_000,
        }
    }
}

impl GossipConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn lifecycle_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn is_interested_in(&self, domain: &str) -> bool {
        self.interested_domains.is_empty() || self.interested_domains.iter().any(|d| d == domain)
    }
}

/// Retention and composition thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Seeds whose fitness drops below this are pruned
    pub fitness_floor: f64,
    /// Seeds whose lineage grows beyond this are pruned
    pub max_lineage_depth: usize,
    /// Minimum compatibility score required to compose two seeds
    pub min_compatibility: f64,
    /// Fraction below the true quality that domain attestations claim
    pub attestation_margin: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            fitness_floor: 0.1,
            max_lineage_depth: 64,
            min_compatibility: 0.0,
            attestation_margin: 0.05,
        }
    }
}

/// Two-party session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            channel_capacity: 16,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Identity and local paths of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub name: String,
    /// Port to listen on (0 = random)
    pub listen_port: u16,
    pub store_path: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "dlrs-node".to_string(),
            listen_port: 0,
            store_path: "dlrs-store.json".to_string(),
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DlrsConfig {
    pub node: NodeConfig,
    pub crypto: CryptoParams,
    pub factorization: FactorizationConfig,
    pub gossip: GossipConfig,
    pub lifecycle: LifecycleConfig,
    pub session: SessionConfig,
}

impl DlrsConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| DlrsError::Config(format!("{}: {}", path.display(), e)))?;
        let config: DlrsConfig = serde_json::from_str(&data)
            .map_err(|e| DlrsError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the file if it exists, otherwise start from defaults; then apply env and validate
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::load(p)?,
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply `DLRS_*` overrides from an arbitrary lookup
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DLRS_NODE_NAME") {
            self.node.name = v;
        }
        if let Some(v) = lookup("DLRS_LISTEN_PORT").and_then(|v| v.parse().ok()) {
            self.node.listen_port = v;
        }
        if let Some(v) = lookup("DLRS_STORE") {
            self.node.store_path = v;
        }
        if let Some(v) = lookup("DLRS_FANOUT").and_then(|v| v.parse().ok()) {
            self.gossip.fanout = v;
        }
        if let Some(v) = lookup("DLRS_MIN_FITNESS").and_then(|v| v.parse().ok()) {
            self.gossip.min_fitness = v;
        }
        if let Some(v) = lookup("DLRS_DOMAINS") {
            self.gossip.interested_domains = v
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }
        if let Some(v) = lookup("DLRS_SESSION_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.session.timeout_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.crypto.validate()?;
        if self.factorization.default_rank == 0 {
            return Err(DlrsError::Config("default_rank must be at least 1".into()));
        }
        if let Some(tol) = self.factorization.tolerance {
            if !tol.is_finite() || tol < 0.0 {
                return Err(DlrsError::Config(format!("invalid tolerance {}", tol)));
            }
        }
        if self.gossip.fanout == 0 {
            return Err(DlrsError::Config("fanout must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.lifecycle.attestation_margin) {
            return Err(DlrsError::Config("attestation_margin must be in [0, 1)".into()));
        }
        if self.session.timeout_ms == 0 {
            return Err(DlrsError::Config("session timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
