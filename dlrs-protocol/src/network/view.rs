//! Per-node view of the network: held seeds and known peers
//!
//! Reads go through a `RwLock` map. Anything that changes a seed (accept,
//! evolve, prune, compose) first takes that seed id's own mutex, so two
//! mutations of the same seed never interleave while unrelated seeds proceed
//! in parallel.

use crate::config::LifecycleConfig;
use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use crate::seed::{
    evolve, prune_reason, CompositionCertificate, Feedback, FitnessPolicy, MutationTrigger,
    OwnedSeed, PruneReason, Seed, SeedState,
};
use crate::zk::ZkContext;
use super::protocol::SeedFingerprint;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// A seed held by this node
#[derive(Debug, Clone)]
pub enum StoredSeed {
    /// Created here; we hold the opening
    Owned(OwnedSeed),
    /// Received from a peer and verified
    Remote(Seed),
}

impl StoredSeed {
    pub fn seed(&self) -> &Seed {
        match self {
            StoredSeed::Owned(owned) => owned.seed(),
            StoredSeed::Remote(seed) => seed,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, StoredSeed::Owned(_))
    }
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Parameter fingerprint from the peer's Hello
    pub params: Option<Digest>,
    pub compatible: bool,
    /// Rejected payloads so far
    pub strikes: u32,
    pub last_seen: DateTime<Utc>,
}

impl PeerInfo {
    fn new() -> Self {
        Self {
            params: None,
            compatible: true,
            strikes: 0,
            last_seen: Utc::now(),
        }
    }
}

type SeedLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Holds one seed id's mutex; the id's entry is dropped with its last holder
struct SeedGuard<'a> {
    locks: &'a SeedLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SeedGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        // waiters hold a clone of the Arc, so only the map's reference means idle
        if locks.get(&self.id).map_or(false, |lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.id);
        }
    }
}

pub struct PeerView {
    seeds: RwLock<HashMap<String, StoredSeed>>,
    seed_locks: SeedLocks,
    peers: RwLock<HashMap<String, PeerInfo>>,
    capacity: usize,
    max_strikes: u32,
}

impl PeerView {
    pub fn new(capacity: usize, max_strikes: u32) -> Self {
        Self {
            seeds: RwLock::new(HashMap::new()),
            seed_locks: StdMutex::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            capacity,
            max_strikes,
        }
    }

    async fn lock_seed(&self, id: &str) -> SeedGuard<'_> {
        let lock = {
            let mut locks = self.seed_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.to_string()).or_default().clone()
        };
        SeedGuard {
            locks: &self.seed_locks,
            id: id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.seed_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ---- seeds ----

    pub async fn len(&self) -> usize {
        self.seeds.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seeds.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.seeds.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &str) -> Option<Seed> {
        self.seeds.read().await.get(id).map(|s| s.seed().clone())
    }

    pub async fn owned(&self, id: &str) -> Option<OwnedSeed> {
        match self.seeds.read().await.get(id) {
            Some(StoredSeed::Owned(owned)) => Some(owned.clone()),
            _ => None,
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.seeds.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of every owned seed, e.g. for persistence
    pub async fn owned_seeds(&self) -> Vec<OwnedSeed> {
        self.seeds
            .read()
            .await
            .values()
            .filter_map(|s| match s {
                StoredSeed::Owned(owned) => Some(owned.clone()),
                StoredSeed::Remote(_) => None,
            })
            .collect()
    }

    pub async fn fingerprints(&self) -> Vec<SeedFingerprint> {
        self.seeds
            .read()
            .await
            .values()
            .map(|s| SeedFingerprint::from(s.seed()))
            .collect()
    }

    /// Fittest seeds declaring `domain`, best first
    pub async fn top_seeds(&self, domain: &str, limit: usize) -> Vec<Seed> {
        let seeds = self.seeds.read().await;
        let mut ranked: Vec<&Seed> = seeds
            .values()
            .map(StoredSeed::seed)
            .filter(|s| s.domains.iter().any(|d| d == domain))
            .collect();
        ranked.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        ranked.into_iter().take(limit).map(Seed::clone).collect()
    }

    /// Evict the least fit remote seed when full. A remote newcomer only
    /// displaces a seed less fit than itself; owned seeds are never evicted.
    fn make_room(
        &self,
        seeds: &mut HashMap<String, StoredSeed>,
        newcomer_fitness: Option<f64>,
    ) -> Result<()> {
        if seeds.len() < self.capacity {
            return Ok(());
        }
        let worst = seeds
            .iter()
            .filter(|(_, s)| !s.is_owned())
            .min_by(|a, b| a.1.seed().fitness.total_cmp(&b.1.seed().fitness))
            .map(|(id, s)| (id.clone(), s.seed().fitness));
        match worst {
            Some((id, worst_fitness)) if newcomer_fitness.map_or(true, |f| worst_fitness < f) => {
                debug!("Evicting seed {} (fitness {:.3})", &id[..8.min(id.len())], worst_fitness);
                seeds.remove(&id);
                Ok(())
            }
            _ => Err(DlrsError::CapacityReached(self.capacity)),
        }
    }

    /// Hold a seed created on this node
    pub async fn insert_owned(&self, owned: OwnedSeed) -> Result<String> {
        let id = owned.id();
        let _guard = self.lock_seed(&id).await;
        let mut seeds = self.seeds.write().await;
        if !seeds.contains_key(&id) {
            self.make_room(&mut seeds, None)?;
        }
        seeds.insert(id.clone(), StoredSeed::Owned(owned));
        Ok(id)
    }

    /// Admit a verified remote seed; a full view evicts its least fit seed if
    /// the newcomer is fitter. Returns false when the seed is already held or
    /// loses the competition.
    pub async fn accept(&self, seed: Seed) -> Result<bool> {
        let id = seed.id();
        let _guard = self.lock_seed(&id).await;
        let mut seeds = self.seeds.write().await;
        if seeds.contains_key(&id) {
            return Ok(false);
        }
        if let Err(e) = self.make_room(&mut seeds, Some(seed.fitness)) {
            debug!("Seed {} not admitted: {}", &id[..8.min(id.len())], e);
            return Ok(false);
        }
        info!("Accepted {}", seed.summary());
        seeds.insert(id, StoredSeed::Remote(seed));
        Ok(true)
    }

    /// Seeds to announce this round
    ///
    /// Owned seeds still in Committed become Shared on their first
    /// announcement. Owned seeds are re-announced while their replication
    /// policy allows it, which counts as one replication. Remote seeds are
    /// forwarded as-is.
    pub async fn announceable(&self) -> Vec<SeedFingerprint> {
        let mut seeds = self.seeds.write().await;
        let mut out = Vec::new();
        for stored in seeds.values_mut() {
            match stored {
                StoredSeed::Owned(owned) => {
                    if owned.state() == SeedState::Committed {
                        if let Err(e) = owned.mark_shared() {
                            warn!("Cannot share {}: {}", owned.seed().root().short(), e);
                            continue;
                        }
                        out.push(SeedFingerprint::from(owned.seed()));
                    } else if owned.state() == SeedState::Shared {
                        let seed = owned.seed();
                        if seed.replication.should_replicate(seed.fitness, seed.epoch) {
                            owned.record_replication();
                            out.push(SeedFingerprint::from(owned.seed()));
                        }
                    }
                }
                StoredSeed::Remote(seed) => out.push(SeedFingerprint::from(&*seed)),
            }
        }
        out
    }

    /// Feed `feedback` to an owned seed; returns the seed's id afterwards,
    /// which is new when it mutated
    #[allow(clippy::too_many_arguments)]
    pub async fn evolve(
        &self,
        ctx: &ZkContext,
        id: &str,
        feedback: &Feedback,
        policy: &dyn FitnessPolicy,
        trigger: &dyn MutationTrigger,
        attestation_margin: f64,
    ) -> Result<String> {
        let _guard = self.lock_seed(id).await;
        let mut owned = match self.seeds.read().await.get(id) {
            Some(StoredSeed::Owned(owned)) => owned.clone(),
            Some(StoredSeed::Remote(_)) => {
                return Err(DlrsError::InvalidInput(format!(
                    "seed {} is not owned by this node",
                    id
                )))
            }
            None => return Err(DlrsError::SeedNotFound(id.to_string())),
        };

        let evolution = evolve(&owned, feedback, policy, trigger)?;
        let mutated = {
            let mut rng = rand::thread_rng();
            owned.apply(ctx, evolution, attestation_margin, &mut rng)?
        };
        let new_id = owned.id();

        let mut seeds = self.seeds.write().await;
        if mutated.is_some() {
            seeds.remove(id);
        }
        seeds.insert(new_id.clone(), StoredSeed::Owned(owned));
        Ok(new_id)
    }

    /// Drop every seed below the fitness floor or past the lineage limit
    pub async fn prune(&self, lifecycle: &LifecycleConfig) -> Vec<(String, PruneReason)> {
        let candidates: Vec<String> = self
            .seeds
            .read()
            .await
            .iter()
            .filter(|(_, s)| prune_reason(s.seed(), lifecycle).is_some())
            .map(|(id, _)| id.clone())
            .collect();

        let mut pruned = Vec::new();
        for id in candidates {
            let _guard = self.lock_seed(&id).await;
            let mut seeds = self.seeds.write().await;
            // re-check: the seed may have evolved meanwhile
            let reason = match seeds.get(&id).and_then(|s| prune_reason(s.seed(), lifecycle)) {
                Some(reason) => reason,
                None => continue,
            };
            if let Some(StoredSeed::Owned(mut owned)) = seeds.remove(&id) {
                if let Err(e) = owned.prune() {
                    warn!("Pruning {}: {}", owned.seed().root().short(), e);
                }
            }
            info!("Pruned seed {}: {:?}", &id[..8.min(id.len())], reason);
            pruned.push((id, reason));
        }
        pruned
    }

    /// Compose two owned seeds held here
    pub async fn compose(
        &self,
        ctx: &ZkContext,
        name: &str,
        a_id: &str,
        b_id: &str,
        lifecycle: &LifecycleConfig,
    ) -> Result<String> {
        if a_id == b_id {
            return Err(DlrsError::InvalidInput("cannot compose a seed with itself".into()));
        }
        let (first, second) = if a_id < b_id { (a_id, b_id) } else { (b_id, a_id) };
        let _first = self.lock_seed(first).await;
        let _second = self.lock_seed(second).await;

        let (a, b) = {
            let seeds = self.seeds.read().await;
            let owned = |id: &str| match seeds.get(id) {
                Some(StoredSeed::Owned(owned)) => Ok(owned.clone()),
                Some(StoredSeed::Remote(_)) => Err(DlrsError::InvalidInput(format!(
                    "seed {} is not owned by this node",
                    id
                ))),
                None => Err(DlrsError::SeedNotFound(id.to_string())),
            };
            (owned(a_id)?, owned(b_id)?)
        };
        let composite = {
            let mut rng = rand::thread_rng();
            OwnedSeed::compose(ctx, name, &a, &b, lifecycle, &mut rng)?
        };
        drop((_first, _second));
        self.insert_owned(composite).await
    }

    /// Admit the composite of two held seeds whose compatibility was proven
    /// in a two-party session
    pub async fn compose_with_certificate(
        &self,
        ctx: &ZkContext,
        name: &str,
        a_id: &str,
        b_id: &str,
        certificate: CompositionCertificate,
        lifecycle: &LifecycleConfig,
    ) -> Result<String> {
        let (a, b) = {
            let seeds = self.seeds.read().await;
            let get = |id: &str| {
                seeds
                    .get(id)
                    .map(|s| s.seed().clone())
                    .ok_or_else(|| DlrsError::SeedNotFound(id.to_string()))
            };
            (get(a_id)?, get(b_id)?)
        };
        let composite = Seed::composite(name, &a, &b, certificate)?;
        composite.verify(ctx, lifecycle)?;
        let id = composite.id();
        if !self.accept(composite).await? {
            return Err(DlrsError::CapacityReached(self.capacity));
        }
        Ok(id)
    }

    // ---- peers ----

    pub async fn touch_peer(&self, peer: &str) {
        self.peers
            .write()
            .await
            .entry(peer.to_string())
            .or_insert_with(PeerInfo::new)
            .last_seen = Utc::now();
    }

    /// Record a peer's Hello; returns true the first time we hear from it
    pub async fn record_hello(&self, peer: &str, params: Digest, compatible: bool) -> bool {
        let mut peers = self.peers.write().await;
        let info = peers.entry(peer.to_string()).or_insert_with(PeerInfo::new);
        let first = info.params.is_none();
        info.params = Some(params);
        info.compatible = compatible;
        info.last_seen = Utc::now();
        first
    }

    /// Count a rejected payload; returns the peer's strikes so far
    pub async fn strike(&self, peer: &str) -> u32 {
        let mut peers = self.peers.write().await;
        let info = peers.entry(peer.to_string()).or_insert_with(PeerInfo::new);
        info.strikes += 1;
        if info.strikes == self.max_strikes {
            warn!("Peer {} banned after {} rejected payloads", peer, info.strikes);
        }
        info.strikes
    }

    pub async fn is_banned(&self, peer: &str) -> bool {
        self.peers
            .read()
            .await
            .get(peer)
            .map_or(false, |p| p.strikes >= self.max_strikes)
    }

    /// Whether messages from `peer` should be processed
    pub async fn is_trusted(&self, peer: &str) -> bool {
        self.peers
            .read()
            .await
            .get(peer)
            .map_or(true, |p| p.compatible && p.strikes < self.max_strikes)
    }

    pub async fn peer(&self, peer: &str) -> Option<PeerInfo> {
        self.peers.read().await.get(peer).cloned()
    }

    pub async fn stats(&self) -> String {
        let seeds = self.seeds.read().await;
        let owned = seeds.values().filter(|s| s.is_owned()).count();
        format!(
            "View: {} seeds ({} owned), {} peers",
            seeds.len(),
            owned,
            self.peers.read().await.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CryptoParams, SessionConfig};
    use crate::mpc::{initiate, respond, Dealer, Link};
    use crate::seed::{MutationRules, ReconstructionFitness};
    use crate::zk::{Compatibility, CompatibilityStatement, SubspaceClaim};
    use nalgebra::DMatrix;

    fn ctx() -> ZkContext {
        ZkContext::new(CryptoParams::default()).unwrap()
    }

    fn owned(ctx: &ZkContext, name: &str, domains: &[&str]) -> OwnedSeed {
        OwnedSeed::new(
            ctx,
            name,
            &DMatrix::new_random(6, 5),
            2,
            domains.iter().map(|d| d.to_string()).collect(),
            &mut rand::thread_rng(),
        )
        .unwrap()
    }

    fn remote(ctx: &ZkContext, fitness: f64, domain: &str) -> Seed {
        let mut seed = owned(ctx, "remote", &[domain]).seed().clone();
        seed.fitness = fitness;
        seed
    }

    struct Always;

    impl MutationTrigger for Always {
        fn should_mutate(&self, _previous: f64, _current: f64) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_fit() {
        let ctx = ctx();
        let view = PeerView::new(2, 3);
        let weak = remote(&ctx, 0.2, "ai");
        let weak_id = weak.id();
        assert!(view.accept(weak.clone()).await.unwrap());
        assert!(!view.accept(weak).await.unwrap());
        assert!(view.accept(remote(&ctx, 0.6, "ai")).await.unwrap());

        assert!(!view.accept(remote(&ctx, 0.1, "ai")).await.unwrap());
        assert!(view.accept(remote(&ctx, 0.9, "ai")).await.unwrap());
        assert_eq!(view.len().await, 2);
        assert!(!view.contains(&weak_id).await);

        let top = view.top_seeds("ai", 1).await;
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].fitness, 0.9);
        assert!(view.top_seeds("finance", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_owned_seeds_are_not_evicted_by_remote() {
        let ctx = ctx();
        let view = PeerView::new(1, 3);
        view.insert_owned(owned(&ctx, "mine", &["ai"])).await.unwrap();
        assert!(!view.accept(remote(&ctx, 0.99, "ai")).await.unwrap());
        assert_eq!(view.owned_seeds().await.len(), 1);
    }

    #[tokio::test]
    async fn test_announce_marks_shared() {
        let ctx = ctx();
        let view = PeerView::new(10, 3);
        let id = view.insert_owned(owned(&ctx, "mine", &["ai"])).await.unwrap();
        assert_eq!(view.owned(&id).await.unwrap().state(), SeedState::Committed);
        let fingerprints = view.announceable().await;
        assert_eq!(fingerprints.len(), 1);
        assert_eq!(fingerprints[0].seed_id, id);
        assert_eq!(view.owned(&id).await.unwrap().state(), SeedState::Shared);
    }

    #[tokio::test]
    async fn test_concurrent_evolution_is_serialized() {
        let ctx = ctx();
        let view = PeerView::new(10, 3);
        let seed = owned(&ctx, "mine", &["ai"]).with_mutation_rules(MutationRules::aggressive());
        let target = seed.factors().reconstruct() * 1.5;
        let id = view.insert_owned(seed).await.unwrap();
        view.announceable().await;
        let feedback = Feedback::new(target, 0.05).unwrap();

        let (first, second) = tokio::join!(
            view.evolve(&ctx, &id, &feedback, &ReconstructionFitness, &Always, 0.05),
            view.evolve(&ctx, &id, &feedback, &ReconstructionFitness, &Always, 0.05),
        );
        let results = [first, second];
        let winners: Vec<&String> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(DlrsError::SeedNotFound(_)))));

        let new_id = winners[0];
        assert_ne!(new_id, &id);
        let evolved = view.owned(new_id).await.unwrap();
        assert_eq!(evolved.seed().epoch, 1);
        assert_eq!(evolved.seed().lineage.depth(), 2);
        assert!(!view.contains(&id).await);
    }

    #[tokio::test]
    async fn test_prune() {
        let ctx = ctx();
        let view = PeerView::new(10, 3);
        let keep = remote(&ctx, 0.8, "ai");
        let keep_id = keep.id();
        view.accept(keep).await.unwrap();
        view.accept(remote(&ctx, 0.05, "ai")).await.unwrap();
        let pruned = view.prune(&LifecycleConfig::default()).await;
        assert_eq!(pruned.len(), 1);
        assert!(matches!(pruned[0].1, PruneReason::FitnessBelowFloor { .. }));
        assert_eq!(view.ids().await, vec![keep_id]);
    }

    #[tokio::test]
    async fn test_local_composition() {
        let ctx = ctx();
        let lifecycle = LifecycleConfig::default();
        let view = PeerView::new(10, 3);
        let a = view.insert_owned(owned(&ctx, "a", &["ai", "nlp"])).await.unwrap();
        let b = view.insert_owned(owned(&ctx, "b", &["ai"])).await.unwrap();
        assert!(view.compose(&ctx, "twice", &a, &a, &lifecycle).await.is_err());

        let composite = view.compose(&ctx, "a+b", &a, &b, &lifecycle).await.unwrap();
        let seed = view.get(&composite).await.unwrap();
        assert_eq!(seed.shape().rank(), 4);
        seed.verify(&ctx, &lifecycle).unwrap();

        let r = remote(&ctx, 0.7, "ai");
        let r_id = r.id();
        view.accept(r).await.unwrap();
        assert!(matches!(
            view.compose(&ctx, "nope", &a, &r_id, &lifecycle).await,
            Err(DlrsError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_composition_from_session() {
        let ctx = ctx();
        let lifecycle = LifecycleConfig::default();
        let alice = owned(&ctx, "alice", &["ai", "vision"]);
        let bob = owned(&ctx, "bob", &["ai"]);
        let subspace = SubspaceClaim::shared_domains(
            &alice.seed().domains,
            &bob.seed().domains,
            alice.seed().shape().n(),
        );
        let statement = CompatibilityStatement {
            commitment_a: alice.seed().commitment.clone(),
            commitment_b: bob.seed().commitment.clone(),
            subspace: subspace.clone(),
        };
        let (ra, rb) = Dealer::session(subspace.weights.len(), &mut rand::thread_rng());
        let (mut la, mut lb, _cancel) = Link::pair(&SessionConfig::default());
        let (outcome, _) = tokio::join!(
            initiate::<Compatibility>(&ctx, &mut la, &statement, alice.secret(), ra),
            respond::<Compatibility>(&ctx, &mut lb, &statement, bob.secret(), rb),
        );
        let outcome = outcome.unwrap();

        let view = PeerView::new(10, 3);
        let a_id = view.insert_owned(alice).await.unwrap();
        view.accept(bob.seed().clone()).await.unwrap();
        let certificate = CompositionCertificate::new(statement, outcome.score, outcome.proof);
        let mut forged = certificate.clone();
        forged.score += 1.0;
        assert!(view
            .compose_with_certificate(&ctx, "forged", &a_id, &bob.id(), forged, &lifecycle)
            .await
            .is_err());

        let id = view
            .compose_with_certificate(&ctx, "alice+bob", &a_id, &bob.id(), certificate, &lifecycle)
            .await
            .unwrap();
        assert_eq!(view.get(&id).await.unwrap().lineage.generation, 1);
    }

    #[tokio::test]
    async fn test_strikes_and_bans() {
        let view = PeerView::new(10, 2);
        assert!(view.is_trusted("p").await);
        assert_eq!(view.strike("p").await, 1);
        assert!(!view.is_banned("p").await);
        view.strike("p").await;
        assert!(view.is_banned("p").await);
        assert!(!view.is_trusted("p").await);

        let params = CryptoParams::default().fingerprint();
        assert!(view.record_hello("q", params, false).await);
        assert!(!view.record_hello("q", params, false).await);
        assert!(!view.is_trusted("q").await);
    }

    #[tokio::test]
    async fn test_seed_locks_do_not_accumulate() {
        let ctx = ctx();
        let view = Arc::new(PeerView::new(1, 3));
        let fit = remote(&ctx, 0.7, "ai");
        assert!(view.accept(fit.clone()).await.unwrap());
        assert!(!view.accept(fit).await.unwrap());
        assert!(!view.accept(remote(&ctx, 0.2, "ai")).await.unwrap());
        assert_eq!(view.tracked_locks(), 0);

        let held = view.lock_seed("x").await;
        assert_eq!(view.tracked_locks(), 1);
        let waiter = {
            let view = Arc::clone(&view);
            tokio::spawn(async move {
                let _guard = view.lock_seed("x").await;
            })
        };
        tokio::task::yield_now().await;
        drop(held);
        waiter.await.unwrap();
        assert_eq!(view.tracked_locks(), 0);
    }
}
