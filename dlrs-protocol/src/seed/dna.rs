//! Seed — committed knowledge plus program, rules, lineage and proofs
//!
//! A [`Seed`] is the public record that travels through gossip. Its identifier
//! is the hex commitment root, so every generation has its own id. The owner
//! additionally holds the opening in an [`OwnedSeed`].

use super::evolution::Evolution;
use super::{Lineage, LineageEvent, MutationRules, ReplicationPolicy};
use crate::config::LifecycleConfig;
use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use crate::factor::{factorize, FactorTarget, LowRankFactorSet, Matrix, Method};
use crate::zk::{
    check_compatibility, commit, encoded_quality, prove_capability, verify_capability,
    verify_compatibility, CapabilityProof, Challenge, Commitment, CompatibilityProof,
    CompatibilityStatement, JointOpening, OpeningSecret, Shape, SubspaceClaim, ZkContext,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use nalgebra::DVector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fitness a freshly created seed starts with
pub const INITIAL_FITNESS: f64 = 0.5;

/// Expression instruction — how the seed unfolds on an input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// e(x) = V·diag(σ)·Uᵀ·x
    Transform {
        input_domain: String,
        output_domain: String,
    },
    /// Stop unless the current activation has at least this norm
    Gate { threshold: f64 },
    /// Hand the activation to another seed
    Chain { next_seed_id: String },
    /// Emit a signal to the network
    Signal {
        channel: String,
        payload_type: String,
    },
}

/// Result of running a seed's program
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    /// None when a gate closed
    pub output: Option<DVector<f64>>,
    pub chained: Vec<String>,
    pub signals: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedState {
    Created,
    Committed,
    Shared,
    Evolving,
    Pruned,
}

impl SeedState {
    pub fn can_transition(self, to: SeedState) -> bool {
        use SeedState::*;
        matches!(
            (self, to),
            (Created, Committed)
                | (Committed, Shared)
                | (Shared, Evolving)
                | (Evolving, Shared)
                | (Created | Committed | Shared | Evolving, Pruned)
        )
    }

    pub fn transition(self, to: SeedState) -> Result<SeedState> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(DlrsError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for SeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Capability proof on the canonical challenge of one declared domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAttestation {
    pub domain: String,
    pub quality_bound: f64,
    pub proof: CapabilityProof,
}

impl DomainAttestation {
    /// Attest slightly below the true quality so fixed-point rounding never fails the proof
    pub fn prove<R: Rng + ?Sized>(
        ctx: &ZkContext,
        commitment: &Commitment,
        secret: &OpeningSecret,
        domain: &str,
        margin: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let challenge = Challenge::for_domain(domain, commitment.shape.n());
        let quality = encoded_quality(ctx, secret, &challenge)?;
        let quality_bound = (quality * (1.0 - margin) - quality * 1e-9).max(0.0);
        let proof = prove_capability(ctx, commitment, secret, &challenge, quality_bound, rng)?;
        Ok(Self {
            domain: domain.to_string(),
            quality_bound,
            proof,
        })
    }

    pub fn verify(&self, ctx: &ZkContext, commitment: &Commitment) -> Result<()> {
        let challenge = Challenge::for_domain(&self.domain, commitment.shape.n());
        verify_capability(ctx, commitment, &challenge, self.quality_bound, &self.proof)
    }
}

fn attest_all<R: Rng + ?Sized>(
    ctx: &ZkContext,
    commitment: &Commitment,
    secret: &OpeningSecret,
    domains: &[String],
    margin: f64,
    rng: &mut R,
) -> Result<Vec<DomainAttestation>> {
    domains
        .iter()
        .map(|d| DomainAttestation::prove(ctx, commitment, secret, d, margin, rng))
        .collect()
}

/// Proof that a composite commits to `concat(parent_a, parent_b)` of two compatible seeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionCertificate {
    pub parent_a: Commitment,
    pub parent_b: Commitment,
    pub subspace: SubspaceClaim,
    pub score: f64,
    pub proof: CompatibilityProof,
    /// Parent A's own attestations; they back the composite's domains
    #[serde(default)]
    pub attestations_a: Vec<DomainAttestation>,
    #[serde(default)]
    pub attestations_b: Vec<DomainAttestation>,
}

impl CompositionCertificate {
    pub fn new(statement: CompatibilityStatement, score: f64, proof: CompatibilityProof) -> Self {
        Self {
            parent_a: statement.commitment_a,
            parent_b: statement.commitment_b,
            subspace: statement.subspace,
            score,
            proof,
            attestations_a: Vec::new(),
            attestations_b: Vec::new(),
        }
    }

    /// Check that a parent attested `domain` against its own commitment
    fn backs_domain(&self, ctx: &ZkContext, domain: &str) -> Result<()> {
        if let Some(a) = self.attestations_a.iter().find(|a| a.domain == domain) {
            return a.verify(ctx, &self.parent_a);
        }
        if let Some(b) = self.attestations_b.iter().find(|b| b.domain == domain) {
            return b.verify(ctx, &self.parent_b);
        }
        Err(DlrsError::ProofVerificationFailed(format!(
            "no parent attests domain '{}'",
            domain
        )))
    }

    fn statement(&self) -> CompatibilityStatement {
        CompatibilityStatement {
            commitment_a: self.parent_a.clone(),
            commitment_b: self.parent_b.clone(),
            subspace: self.subspace.clone(),
        }
    }

    /// Check the certificate against the composite's commitment
    pub fn verify(
        &self,
        ctx: &ZkContext,
        composite: &Commitment,
        min_compatibility: f64,
    ) -> Result<()> {
        let expected = SubspaceClaim::shared_domains(
            &self.subspace.domains,
            &self.subspace.domains,
            self.parent_a.shape.n(),
        );
        if expected.weights != self.subspace.weights {
            return Err(DlrsError::ProofVerificationFailed(
                "subspace weights do not match the declared domains".into(),
            ));
        }
        if Commitment::concat(&self.parent_a, &self.parent_b)? != *composite {
            return Err(DlrsError::ProofVerificationFailed(
                "composite does not commit to its parents".into(),
            ));
        }
        let score = verify_compatibility(ctx, &self.statement(), &self.proof)?;
        if score != self.score {
            return Err(DlrsError::ProofVerificationFailed(format!(
                "certificate claims score {}, proof reveals {}",
                self.score, score
            )));
        }
        if score < min_compatibility {
            return Err(DlrsError::ProofVerificationFailed(format!(
                "compatibility {:.6} is below the minimum {:.6}",
                score, min_compatibility
            )));
        }
        Ok(())
    }
}

/// The public seed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub name: String,
    pub commitment: Commitment,
    pub express: Vec<Instruction>,
    pub mutation: MutationRules,
    pub replication: ReplicationPolicy,
    pub lineage: Lineage,
    pub epoch: u64,
    pub fitness: f64,
    pub domains: Vec<String>,
    pub attestations: Vec<DomainAttestation>,
    pub composition: Option<CompositionCertificate>,
    pub created_at: DateTime<Utc>,
}

impl Seed {
    pub fn root(&self) -> Digest {
        self.commitment.root()
    }

    /// Content address: hex of the commitment root
    pub fn id(&self) -> String {
        self.root().to_hex()
    }

    pub fn shape(&self) -> Shape {
        self.commitment.shape
    }

    /// Public record of the composite of `a` and `b`
    pub fn composite(
        name: impl Into<String>,
        a: &Seed,
        b: &Seed,
        mut certificate: CompositionCertificate,
    ) -> Result<Seed> {
        if certificate.parent_a != a.commitment || certificate.parent_b != b.commitment {
            return Err(DlrsError::InvalidInput(
                "certificate was issued for other parents".into(),
            ));
        }
        let commitment = Commitment::concat(&a.commitment, &b.commitment)?;
        let fitness = (a.fitness + b.fitness) / 2.0;
        // only domains a parent attested itself carry over
        let mut domains: Vec<String> = Vec::new();
        for d in a.domains.iter().chain(&b.domains) {
            let attested = a
                .attestations
                .iter()
                .chain(&b.attestations)
                .any(|x| &x.domain == d);
            if attested && !domains.contains(d) {
                domains.push(d.clone());
            }
        }
        certificate.attestations_a = a.attestations.clone();
        certificate.attestations_b = b.attestations.clone();
        Ok(Seed {
            name: name.into(),
            lineage: Lineage::composition(&a.lineage, &b.lineage, commitment.root(), fitness),
            commitment,
            express: Vec::new(),
            mutation: MutationRules::default(),
            replication: ReplicationPolicy::default(),
            epoch: 0,
            fitness,
            domains,
            attestations: Vec::new(),
            composition: Some(certificate),
            created_at: Utc::now(),
        })
    }

    /// Everything a receiving node checks before accepting the seed
    pub fn verify(&self, ctx: &ZkContext, lifecycle: &LifecycleConfig) -> Result<()> {
        let reject = |why: String| Err(DlrsError::ProofVerificationFailed(why));
        if !(0.0..=1.0).contains(&self.fitness) {
            return reject(format!("fitness {} is outside [0, 1]", self.fitness));
        }
        self.commitment
            .validate()
            .map_err(|e| DlrsError::ProofVerificationFailed(e.to_string()))?;
        self.lineage.verify()?;
        let head = self.lineage.head();
        if head.commitment_root != self.root() {
            return reject("lineage head names another commitment".into());
        }
        if head.epoch != self.epoch {
            return reject(format!(
                "lineage head is at epoch {}, seed claims {}",
                head.epoch, self.epoch
            ));
        }

        if let Some(certificate) = &self.composition {
            if !matches!(head.event, LineageEvent::Composition { .. }) {
                return reject("certificate on a seed that was not composed".into());
            }
            certificate.verify(ctx, &self.commitment, lifecycle.min_compatibility)?;
        }
        for domain in &self.domains {
            let attestation = self.attestations.iter().find(|a| &a.domain == domain);
            match (attestation, &self.composition) {
                (Some(a), _) => a.verify(ctx, &self.commitment)?,
                (None, Some(certificate)) => certificate.backs_domain(ctx, domain)?,
                (None, None) => {
                    return reject(format!("no capability attestation for domain '{}'", domain))
                }
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed '{}' [{}] | {} | fitness={:.3} | epoch={} | generation={} | domains={:?}",
            self.name,
            self.root().short(),
            self.shape(),
            self.fitness,
            self.epoch,
            self.lineage.generation,
            self.domains
        )
    }
}

/// A seed together with the opening of its commitment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedSeed {
    seed: Seed,
    secret: OpeningSecret,
    state: SeedState,
}

impl OwnedSeed {
    /// Factorize `knowledge` at `rank` and seal it
    pub fn new<R: Rng + ?Sized>(
        ctx: &ZkContext,
        name: impl Into<String>,
        knowledge: &Matrix,
        rank: usize,
        domains: Vec<String>,
        rng: &mut R,
    ) -> Result<Self> {
        let factors = factorize(knowledge, FactorTarget::Rank(rank), &Method::Exact)?;
        Self::from_factors(
            ctx,
            name,
            factors,
            domains,
            LifecycleConfig::default().attestation_margin,
            rng,
        )
    }

    /// Commit to `factors`, attest every domain and start a lineage
    pub fn from_factors<R: Rng + ?Sized>(
        ctx: &ZkContext,
        name: impl Into<String>,
        factors: LowRankFactorSet,
        domains: Vec<String>,
        attestation_margin: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let state = SeedState::Created;
        let (commitment, secret) = commit(ctx, &factors, rng)?;
        let attestations = attest_all(ctx, &commitment, &secret, &domains, attestation_margin, rng)?;
        let seed = Seed {
            name: name.into(),
            lineage: Lineage::genesis(commitment.root(), INITIAL_FITNESS),
            commitment,
            express: Vec::new(),
            mutation: MutationRules::default(),
            replication: ReplicationPolicy::default(),
            epoch: 0,
            fitness: INITIAL_FITNESS,
            domains,
            attestations,
            composition: None,
            created_at: Utc::now(),
        };
        info!("Created {}", seed.summary());
        Ok(Self {
            seed,
            secret,
            state: state.transition(SeedState::Committed)?,
        })
    }

    /// Compose two owned seeds after proving them compatible on their shared domains
    pub fn compose<R: Rng + ?Sized>(
        ctx: &ZkContext,
        name: impl Into<String>,
        a: &OwnedSeed,
        b: &OwnedSeed,
        lifecycle: &LifecycleConfig,
        rng: &mut R,
    ) -> Result<Self> {
        let subspace =
            SubspaceClaim::shared_domains(&a.seed.domains, &b.seed.domains, a.seed.shape().n());
        let statement = CompatibilityStatement {
            commitment_a: a.seed.commitment.clone(),
            commitment_b: b.seed.commitment.clone(),
            subspace,
        };
        let openings = JointOpening {
            a: a.secret.clone(),
            b: b.secret.clone(),
        };
        let outcome = check_compatibility(ctx, &statement, &openings, rng)?;
        if outcome.score < lifecycle.min_compatibility {
            return Err(DlrsError::InvalidInput(format!(
                "compatibility {:.6} is below the minimum {:.6}",
                outcome.score, lifecycle.min_compatibility
            )));
        }
        let certificate = CompositionCertificate::new(statement, outcome.score, outcome.proof);
        let mut seed = Seed::composite(name, &a.seed, &b.seed, certificate)?;
        let secret = OpeningSecret::concat(&openings.a, &openings.b)?;

        // the owner of both openings attests every parent domain on the composite itself
        let mut domains = a.seed.domains.clone();
        for d in &b.seed.domains {
            if !domains.contains(d) {
                domains.push(d.clone());
            }
        }
        seed.attestations = attest_all(
            ctx,
            &seed.commitment,
            &secret,
            &domains,
            lifecycle.attestation_margin,
            rng,
        )?;
        seed.domains = domains;
        info!("Composed {}", seed.summary());
        Ok(Self {
            seed,
            secret,
            state: SeedState::Created.transition(SeedState::Committed)?,
        })
    }

    pub fn with_program(mut self, program: Vec<Instruction>) -> Self {
        self.seed.express = program;
        self
    }

    pub fn with_mutation_rules(mut self, rules: MutationRules) -> Self {
        self.seed.mutation = rules;
        self
    }

    pub fn with_replication_policy(mut self, policy: ReplicationPolicy) -> Self {
        self.seed.replication = policy;
        self
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn id(&self) -> String {
        self.seed.id()
    }

    pub fn factors(&self) -> &LowRankFactorSet {
        self.secret.factors()
    }

    pub fn secret(&self) -> &OpeningSecret {
        &self.secret
    }

    pub fn state(&self) -> SeedState {
        self.state
    }

    /// Committed → Shared on first announcement; a no-op once shared
    pub fn mark_shared(&mut self) -> Result<()> {
        if self.state != SeedState::Shared {
            self.state = self.state.transition(SeedState::Shared)?;
        }
        Ok(())
    }

    pub fn prune(&mut self) -> Result<()> {
        self.state = self.state.transition(SeedState::Pruned)?;
        Ok(())
    }

    pub fn record_replication(&mut self) {
        self.seed.replication.record_replication();
    }

    /// Run the seed's program on `input` (length m)
    pub fn express(&self, input: &DVector<f64>) -> Result<Activation> {
        let default_program = [Instruction::Transform {
            input_domain: String::new(),
            output_domain: String::new(),
        }];
        let program = if self.seed.express.is_empty() {
            &default_program[..]
        } else {
            &self.seed.express[..]
        };

        let factors = self.factors();
        let mut activation = Activation {
            output: Some(input.clone()),
            chained: Vec::new(),
            signals: Vec::new(),
        };
        let mut current = input.clone();
        for instruction in program {
            match instruction {
                Instruction::Transform { .. } => {
                    if current.len() != factors.m {
                        return Err(DlrsError::InvalidInput(format!(
                            "transform input has length {}, seed has {} rows",
                            current.len(),
                            factors.m
                        )));
                    }
                    let projected = factors.u.transpose() * &current;
                    current = &factors.v * projected.component_mul(&factors.sigma);
                }
                Instruction::Gate { threshold } => {
                    if current.norm() < *threshold {
                        activation.output = None;
                        return Ok(activation);
                    }
                }
                Instruction::Chain { next_seed_id } => activation.chained.push(next_seed_id.clone()),
                Instruction::Signal {
                    channel,
                    payload_type,
                } => activation
                    .signals
                    .push((channel.clone(), payload_type.clone())),
            }
        }
        activation.output = Some(current);
        Ok(activation)
    }

    /// Apply an evolution result: Shared → Evolving → Shared
    ///
    /// A mutation re-commits, re-attests every domain and appends a lineage
    /// entry; the seed then has a new id, which is returned. Nothing changes
    /// if any step fails.
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        ctx: &ZkContext,
        evolution: Evolution,
        attestation_margin: f64,
        rng: &mut R,
    ) -> Result<Option<Digest>> {
        let evolving = self.state.transition(SeedState::Evolving)?;
        let shared = evolving.transition(SeedState::Shared)?;
        match evolution {
            Evolution::Unchanged { fitness } => {
                debug!("Seed {} unchanged (fitness {:.3})", self.seed.root().short(), fitness);
                self.seed.fitness = fitness;
                self.state = shared;
                Ok(None)
            }
            Evolution::Mutated { factors, fitness } => {
                let epoch = self.seed.epoch + 1;
                let (commitment, secret) = commit(ctx, &factors, rng)?;
                let attestations = attest_all(
                    ctx,
                    &commitment,
                    &secret,
                    &self.seed.domains,
                    attestation_margin,
                    rng,
                )?;
                let mut lineage = self.seed.lineage.clone();
                lineage.record_mutation(epoch, commitment.root(), fitness)?;
                let previous = self.seed.root();

                self.seed.mutation.record(epoch);
                self.seed.commitment = commitment;
                self.seed.attestations = attestations;
                self.seed.composition = None;
                self.seed.lineage = lineage;
                self.seed.epoch = epoch;
                self.seed.fitness = fitness;
                self.secret = secret;
                self.state = shared;
                info!(
                    "Seed {} mutated into {} (epoch {}, fitness {:.3})",
                    previous.short(),
                    self.seed.root().short(),
                    epoch,
                    fitness
                );
                Ok(Some(self.seed.root()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoParams;
    use nalgebra::DMatrix;

    fn ctx() -> ZkContext {
        ZkContext::new(CryptoParams::default()).unwrap()
    }

    fn domains(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_create_seed() {
        let ctx = ctx();
        let k = DMatrix::new_random(12, 8);
        let owned = OwnedSeed::new(&ctx, "knowledge", &k, 3, domains(&["ai", "crypto"]), &mut rand::thread_rng())
            .unwrap();
        println!("{}", owned.seed().summary());
        assert_eq!(owned.state(), SeedState::Committed);
        assert_eq!(owned.seed().shape().rank(), 3);
        assert_eq!(owned.id(), owned.seed().commitment.root().to_hex());
        assert_eq!(owned.seed().attestations.len(), 2);
        owned.seed().verify(&ctx, &LifecycleConfig::default()).unwrap();
    }

    #[test]
    fn test_state_machine() {
        use SeedState::*;
        assert!(Created.transition(Shared).is_err());
        assert!(Committed.transition(Evolving).is_err());
        assert!(Pruned.transition(Shared).is_err());
        assert_eq!(Shared.transition(Evolving).unwrap(), Evolving);
        assert_eq!(Evolving.transition(Pruned).unwrap(), Pruned);
        match Committed.transition(Evolving) {
            Err(DlrsError::InvalidTransition { from, to }) => {
                assert_eq!(from, "Committed");
                assert_eq!(to, "Evolving");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unshared_seed_cannot_evolve() {
        let ctx = ctx();
        let mut owned =
            OwnedSeed::new(&ctx, "s", &DMatrix::new_random(5, 5), 2, Vec::new(), &mut rand::thread_rng())
                .unwrap();
        let result = owned.apply(
            &ctx,
            Evolution::Unchanged { fitness: 0.4 },
            0.05,
            &mut rand::thread_rng(),
        );
        assert!(matches!(result, Err(DlrsError::InvalidTransition { .. })));
        assert_eq!(owned.seed().fitness, INITIAL_FITNESS);
    }

    #[test]
    fn test_tampered_record_rejected() {
        let ctx = ctx();
        let lifecycle = LifecycleConfig::default();
        let owned = OwnedSeed::new(
            &ctx,
            "s",
            &DMatrix::new_random(6, 5),
            2,
            domains(&["vision"]),
            &mut rand::thread_rng(),
        )
        .unwrap();

        let mut claims_more = owned.seed().clone();
        claims_more.domains.push("finance".into());
        assert!(claims_more.verify(&ctx, &lifecycle).is_err());

        let mut inflated = owned.seed().clone();
        inflated.attestations[0].quality_bound += 10.0;
        assert!(inflated.verify(&ctx, &lifecycle).is_err());

        let mut wrong_epoch = owned.seed().clone();
        wrong_epoch.epoch = 4;
        assert!(wrong_epoch.verify(&ctx, &lifecycle).is_err());

        let other = OwnedSeed::new(&ctx, "t", &DMatrix::new_random(6, 5), 2, Vec::new(), &mut rand::thread_rng())
            .unwrap();
        let mut swapped = owned.seed().clone();
        swapped.commitment = other.seed().commitment.clone();
        assert!(swapped.verify(&ctx, &lifecycle).is_err());
    }

    #[test]
    fn test_express_program() {
        let ctx = ctx();
        let k = DMatrix::from_fn(4, 3, |i, j| (i as f64 + 1.0) * (j as f64 - 1.0));
        let owned = OwnedSeed::new(&ctx, "p", &k, 1, Vec::new(), &mut rand::thread_rng())
            .unwrap()
            .with_program(vec![
                Instruction::Transform {
                    input_domain: "rows".into(),
                    output_domain: "cols".into(),
                },
                Instruction::Signal {
                    channel: "out".into(),
                    payload_type: "vector".into(),
                },
                Instruction::Chain {
                    next_seed_id: "next".into(),
                },
            ]);
        let x = DVector::from_vec(vec![1.0, 0.0, -1.0, 0.5]);
        let activation = owned.express(&x).unwrap();
        let expected = k.transpose() * &x;
        let output = activation.output.unwrap();
        assert!((output - expected).norm() < 1e-9);
        assert_eq!(activation.chained, vec!["next".to_string()]);
        assert_eq!(activation.signals.len(), 1);

        let gated = owned.clone().with_program(vec![Instruction::Gate { threshold: 1e9 }]);
        assert!(gated.express(&x).unwrap().output.is_none());
        assert!(owned.express(&DVector::zeros(3)).is_err());
    }

    #[test]
    fn test_composition_verifies() {
        let ctx = ctx();
        let lifecycle = LifecycleConfig::default();
        let mut rng = rand::thread_rng();
        let a = OwnedSeed::new(&ctx, "a", &DMatrix::new_random(6, 6), 2, domains(&["nlp", "ai"]), &mut rng)
            .unwrap();
        let b = OwnedSeed::new(&ctx, "b", &DMatrix::new_random(6, 6), 2, domains(&["ai"]), &mut rng)
            .unwrap();
        let composite = OwnedSeed::compose(&ctx, "a+b", &a, &b, &lifecycle, &mut rng).unwrap();
        assert_eq!(composite.seed().shape().rank(), 4);
        assert_eq!(composite.seed().lineage.generation, 1);
        composite.seed().verify(&ctx, &lifecycle).unwrap();
        crate::zk::open(&ctx, &composite.seed().commitment, composite.secret()).unwrap();

        assert_eq!(composite.seed().attestations.len(), 2);

        let strict = LifecycleConfig {
            min_compatibility: composite.seed().composition.as_ref().unwrap().score + 1.0,
            ..LifecycleConfig::default()
        };
        assert!(composite.seed().verify(&ctx, &strict).is_err());
    }

    #[test]
    fn test_composite_domains_must_be_attested() {
        let ctx = ctx();
        let lifecycle = LifecycleConfig::default();
        let mut rng = rand::thread_rng();
        let a = OwnedSeed::new(&ctx, "a", &DMatrix::new_random(6, 6), 2, domains(&["nlp", "ai"]), &mut rng)
            .unwrap();
        let b = OwnedSeed::new(&ctx, "b", &DMatrix::new_random(6, 6), 2, domains(&["ai"]), &mut rng)
            .unwrap();
        let statement = CompatibilityStatement {
            commitment_a: a.seed().commitment.clone(),
            commitment_b: b.seed().commitment.clone(),
            subspace: SubspaceClaim::shared_domains(&a.seed().domains, &b.seed().domains, 6),
        };
        let openings = JointOpening {
            a: a.secret().clone(),
            b: b.secret().clone(),
        };
        let outcome = check_compatibility(&ctx, &statement, &openings, &mut rng).unwrap();
        let certificate = CompositionCertificate::new(statement, outcome.score, outcome.proof);

        // composed without the openings: domains rest on the parents' attestations
        let composite = Seed::composite("a+b", a.seed(), b.seed(), certificate).unwrap();
        assert!(composite.attestations.is_empty());
        assert_eq!(composite.domains, domains(&["nlp", "ai"]));
        composite.verify(&ctx, &lifecycle).unwrap();

        let mut advertised = composite.clone();
        advertised.domains.push("finance".into());
        assert!(matches!(
            advertised.verify(&ctx, &lifecycle),
            Err(DlrsError::ProofVerificationFailed(_))
        ));

        // one parent's attestations do not stand in for the other's
        let mut swapped = composite.clone();
        let certificate = swapped.composition.as_mut().unwrap();
        std::mem::swap(&mut certificate.attestations_a, &mut certificate.attestations_b);
        assert!(swapped.verify(&ctx, &lifecycle).is_err());
    }
}
