//! Local storage for owned seeds
//!
//! A JSON snapshot of the seeds this node created, including their openings.
//! The file is a convenience for restarting a node, not a source of truth:
//! peers only ever trust the proofs a seed carries.

use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use crate::network::PeerView;
use crate::seed::OwnedSeed;
use crate::zk::{open, ZkContext};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub owner: String,
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the parameters the commitments were made under
    pub params: Digest,
    pub total_seeds_ever: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeedStore {
    seeds: BTreeMap<String, OwnedSeed>,
    pub metadata: StoreMetadata,
    #[serde(skip)]
    path: PathBuf,
}

impl SeedStore {
    /// Load the snapshot at `path`, or start an empty one if there is none
    pub fn open(path: impl AsRef<Path>, owner: &str, params: Digest) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                seeds: BTreeMap::new(),
                metadata: StoreMetadata {
                    owner: owner.to_string(),
                    created_at: Utc::now(),
                    params,
                    total_seeds_ever: 0,
                },
                path,
            });
        }

        let data = std::fs::read_to_string(&path)
            .map_err(|e| DlrsError::Storage(format!("{}: {}", path.display(), e)))?;
        let mut store: SeedStore = serde_json::from_str(&data)
            .map_err(|e| DlrsError::Storage(format!("{}: {}", path.display(), e)))?;
        if store.metadata.params != params {
            return Err(DlrsError::ParameterMismatch {
                local: params.to_hex(),
                remote: store.metadata.params.to_hex(),
            });
        }
        store.path = path;
        info!("Loaded {}", store.summary());
        Ok(store)
    }

    /// Write the snapshot; the previous file is replaced only once the new
    /// one is complete
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&mut self, seed: OwnedSeed) -> String {
        let id = seed.id();
        if self.seeds.insert(id.clone(), seed).is_none() {
            self.metadata.total_seeds_ever += 1;
        }
        id
    }

    pub fn get(&self, id: &str) -> Option<&OwnedSeed> {
        self.seeds.get(id)
    }

    /// Look a seed up by a unique id prefix
    pub fn find(&self, prefix: &str) -> Result<&OwnedSeed> {
        let mut matches = self
            .seeds
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some((_, seed)), None) => Ok(seed),
            (None, _) => Err(DlrsError::SeedNotFound(prefix.to_string())),
            (Some(_), Some(_)) => Err(DlrsError::InvalidInput(format!(
                "seed id prefix '{}' is ambiguous",
                prefix
            ))),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<OwnedSeed> {
        self.seeds.remove(id)
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn list_by_fitness(&self) -> Vec<&OwnedSeed> {
        let mut seeds: Vec<&OwnedSeed> = self.seeds.values().collect();
        seeds.sort_by(|a, b| b.seed().fitness.total_cmp(&a.seed().fitness));
        seeds
    }

    pub fn list_by_domain(&self, domain: &str) -> Vec<&OwnedSeed> {
        self.seeds
            .values()
            .filter(|s| s.seed().domains.iter().any(|d| d == domain))
            .collect()
    }

    /// Check every stored opening against its commitment
    pub fn verify(&self, ctx: &ZkContext) -> Result<()> {
        for (id, owned) in &self.seeds {
            open(ctx, &owned.seed().commitment, owned.secret()).map_err(|e| {
                DlrsError::Storage(format!("seed {}: {}", &id[..8.min(id.len())], e))
            })?;
        }
        Ok(())
    }

    /// Hand every stored seed to a running node
    pub async fn restore_into(&self, view: &PeerView) -> Result<usize> {
        let mut restored = 0;
        for owned in self.seeds.values() {
            match view.insert_owned(owned.clone()).await {
                Ok(_) => restored += 1,
                Err(e) => warn!("Could not restore {}: {}", owned.seed().root().short(), e),
            }
        }
        Ok(restored)
    }

    /// Replace the snapshot contents with the node's current owned seeds
    pub async fn capture(&mut self, view: &PeerView) {
        let owned = view.owned_seeds().await;
        let previous = std::mem::take(&mut self.seeds);
        for seed in owned {
            let id = seed.id();
            if !previous.contains_key(&id) {
                self.metadata.total_seeds_ever += 1;
            }
            self.seeds.insert(id, seed);
        }
    }

    pub fn summary(&self) -> String {
        let total = self.seeds.len();
        let avg_fitness = if total > 0 {
            self.seeds.values().map(|s| s.seed().fitness).sum::<f64>() / total as f64
        } else {
            0.0
        };
        let domains: Vec<String> = {
            let mut d: Vec<String> = self
                .seeds
                .values()
                .flat_map(|s| s.seed().domains.clone())
                .collect();
            d.sort();
            d.dedup();
            d
        };
        format!(
            "SeedStore '{}' | {} seeds | avg fitness {:.3} | domains: {:?}",
            self.metadata.owner, total, avg_fitness, domains
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoParams;
    use crate::seed::SeedState;
    use nalgebra::DMatrix;

    fn seed(ctx: &ZkContext, domain: &str) -> OwnedSeed {
        OwnedSeed::new(
            ctx,
            domain,
            &DMatrix::new_random(5, 4),
            2,
            vec![domain.to_string()],
            &mut rand::thread_rng(),
        )
        .unwrap()
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.json");
        let ctx = ZkContext::new(CryptoParams::default()).unwrap();

        let mut store = SeedStore::open(&path, "alice", ctx.fingerprint()).unwrap();
        assert!(store.is_empty());
        let mut shared = seed(&ctx, "ai");
        shared.mark_shared().unwrap();
        let ai = store.add(shared);
        store.add(seed(&ctx, "vision"));
        store.save().unwrap();

        let loaded = SeedStore::open(&path, "ignored", ctx.fingerprint()).unwrap();
        println!("{}", loaded.summary());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.metadata.owner, "alice");
        assert_eq!(loaded.metadata.total_seeds_ever, 2);
        let restored = loaded.get(&ai).unwrap();
        assert_eq!(restored.seed(), store.get(&ai).unwrap().seed());
        assert_eq!(restored.state(), SeedState::Shared);
        assert_eq!(loaded.list_by_domain("vision").len(), 1);
        loaded.verify(&ctx).unwrap();
        assert_eq!(loaded.find(&ai[..10]).unwrap().id(), ai);
    }

    #[test]
    fn test_foreign_parameters_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("seeds.json");
        let ctx = ZkContext::new(CryptoParams::default()).unwrap();
        let mut store = SeedStore::open(&path, "alice", ctx.fingerprint()).unwrap();
        store.add(seed(&ctx, "ai"));
        store.save().unwrap();

        let other = CryptoParams {
            generator_tag: "elsewhere".into(),
            ..CryptoParams::default()
        };
        assert!(matches!(
            SeedStore::open(&path, "alice", other.fingerprint()),
            Err(DlrsError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.json");
        std::fs::write(&path, "{ not json").unwrap();
        let params = CryptoParams::default().fingerprint();
        assert!(matches!(
            SeedStore::open(&path, "alice", params),
            Err(DlrsError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_and_capture() {
        let ctx = ZkContext::new(CryptoParams::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut store = SeedStore::open(dir.path().join("s.json"), "bob", ctx.fingerprint()).unwrap();
        store.add(seed(&ctx, "ai"));

        let view = PeerView::new(10, 3);
        assert_eq!(store.restore_into(&view).await.unwrap(), 1);
        view.insert_owned(seed(&ctx, "nlp")).await.unwrap();
        store.capture(&view).await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.list_by_fitness().len(), 2);
    }
}
