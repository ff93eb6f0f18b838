//! CapabilityProof — prove domain capability without revealing knowledge
//!
//! Quality of a seed against a challenge direction d is |dᵀ·V·σ|. The proof
//! shows `quality ≥ bound` for the committed factors: the expression vector is
//! committed via an [`ExpressionProof`], the signed quality is folded out of it
//! homomorphically, and a [`RangeProof`] shows that `±q − bound` is a small
//! non-negative integer. The polarity bit is public.

use super::codec::canonical_serde;
use super::commitment::{Commitment, OpeningSecret};
use super::expression::ExpressionProof;
use super::group::{fr_to_u128, inner_product, msm, ZkContext};
use super::predicate::{self, Predicate};
use super::sigma::RangeProof;
use super::transcript::Transcript;
use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use crate::factor::LowRankFactorSet;
use ark_bn254::{Fr, G1Affine};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use nalgebra::DVector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Fixed-point levels of a quality value: d (1) times e (2)
const QUALITY_LEVELS: u32 = 3;

/// Widest margin the range proof accepts
const MAX_MARGIN_BITS: u32 = 128;

/// Bits of the margin range proof. `range_bits` counts the margin at a
/// single fixed-point level; the quality carries two more.
fn margin_bits(ctx: &ZkContext) -> u32 {
    (ctx.params.range_bits + (QUALITY_LEVELS - 1) * ctx.params.fixed_point_bits)
        .min(MAX_MARGIN_BITS)
}

/// A public challenge direction for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// The domain this challenge tests
    pub domain: String,
    /// Unit-length direction in the n-dimensional domain space
    pub vector: Vec<f64>,
    /// Freshness nonce
    pub nonce: Digest,
}

fn unit(mut vector: Vec<f64>) -> Vec<f64> {
    let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    } else {
        let fill = 1.0 / (vector.len().max(1) as f64).sqrt();
        vector.iter_mut().for_each(|x| *x = fill);
    }
    vector
}

impl Challenge {
    /// Fresh random challenge
    pub fn random<R: Rng + ?Sized>(domain: &str, dim: usize, rng: &mut R) -> Self {
        let vector = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self {
            domain: domain.to_string(),
            vector: unit(vector),
            nonce: Digest(rng.gen()),
        }
    }

    /// Canonical challenge of a domain tag; every node derives the same one
    pub fn for_domain(domain: &str, dim: usize) -> Self {
        let vector = (0..dim as u64)
            .map(|j| {
                let digest = Sha256::new()
                    .chain_update(b"dlrs/domain-direction")
                    .chain_update(domain.as_bytes())
                    .chain_update(j.to_le_bytes())
                    .finalize();
                let mut word = [0u8; 8];
                word.copy_from_slice(&digest[..8]);
                u64::from_le_bytes(word) as f64 / u64::MAX as f64 * 2.0 - 1.0
            })
            .collect();
        Self {
            domain: domain.to_string(),
            vector: unit(vector),
            nonce: Digest::of_parts(b"dlrs/challenge", &[domain.as_bytes(), &(dim as u64).to_le_bytes()]),
        }
    }

    pub fn direction(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.vector)
    }

    /// Plaintext quality of a factor set against this challenge
    pub fn quality(&self, factors: &LowRankFactorSet) -> Result<f64> {
        factors.capability_in_domain(&self.direction())
    }

    fn encoded(&self, ctx: &ZkContext) -> Result<Vec<Fr>> {
        self.vector.iter().map(|x| ctx.encode(*x, 1)).collect()
    }
}

/// Public inputs of a capability proof
#[derive(Debug, Clone)]
pub struct CapabilityStatement {
    pub commitment: Commitment,
    pub challenge: Challenge,
    pub quality_bound: f64,
}

impl CapabilityStatement {
    fn encoded_bound(&self, ctx: &ZkContext) -> Result<Fr> {
        if !self.quality_bound.is_finite() || self.quality_bound < 0.0 {
            return Err(DlrsError::InvalidInput(format!(
                "quality bound must be a non-negative number, got {}",
                self.quality_bound
            )));
        }
        ctx.encode(self.quality_bound, QUALITY_LEVELS)
    }

    fn encoded_direction(&self, ctx: &ZkContext) -> Result<Vec<Fr>> {
        if self.challenge.vector.len() != self.commitment.shape.n() {
            return Err(DlrsError::InvalidInput(format!(
                "challenge has dimension {}, seed domain space has {}",
                self.challenge.vector.len(),
                self.commitment.shape.n()
            )));
        }
        self.challenge.encoded(ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct CapabilityProof {
    expression: ExpressionProof,
    negated: bool,
    margin: RangeProof,
}

canonical_serde!(CapabilityProof);

/// The capability predicate: quality(commitment, challenge) ≥ bound
pub struct Capability;

impl Predicate for Capability {
    const LABEL: &'static [u8] = b"dlrs/capability/v1";

    type Statement = CapabilityStatement;
    type Witness = OpeningSecret;
    type Proof = CapabilityProof;

    fn bind_statement(
        ctx: &ZkContext,
        statement: &Self::Statement,
        tr: &mut Transcript,
    ) -> Result<()> {
        tr.append_message(b"commitment", statement.commitment.root().as_bytes());
        tr.append_message(b"domain", statement.challenge.domain.as_bytes());
        tr.append_message(b"nonce", statement.challenge.nonce.as_bytes());
        tr.append_scalars(b"direction", &statement.encoded_direction(ctx)?);
        tr.append_scalar(b"bound", &statement.encoded_bound(ctx)?);
        Ok(())
    }

    fn prove_bound<R: Rng + ?Sized>(
        ctx: &ZkContext,
        statement: &Self::Statement,
        witness: &Self::Witness,
        tr: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self::Proof> {
        let d = statement.encoded_direction(ctx)?;
        let bound = statement.encoded_bound(ctx)?;
        let (expression, e) =
            ExpressionProof::prove(ctx, tr, &statement.commitment, witness, None, rng)?;

        let q = inner_product(&d, &e.values);
        let q_blinding = inner_product(&d, &e.blindings);
        let negated = ctx.decode(&q, QUALITY_LEVELS) < 0.0;
        let (signed, blinding) = if negated {
            (-q, -q_blinding)
        } else {
            (q, q_blinding)
        };
        let delta = signed - bound;
        let value = fr_to_u128(&delta).ok_or_else(|| {
            DlrsError::ProofGeneration("true quality is below the claimed bound".into())
        })?;

        let margin_commitment: G1Affine = ctx.commit(&delta, &blinding).into();
        tr.append_u64(b"polarity", negated as u64);
        let margin = RangeProof::prove(
            ctx,
            tr,
            &margin_commitment,
            value,
            &blinding,
            margin_bits(ctx),
            rng,
        )
        .map_err(|e| match e {
            DlrsError::ProofGeneration(msg) => DlrsError::ProofGeneration(format!(
                "quality margin out of range: {}",
                msg
            )),
            other => other,
        })?;

        Ok(CapabilityProof {
            expression,
            negated,
            margin,
        })
    }

    fn verify_bound(
        ctx: &ZkContext,
        statement: &Self::Statement,
        proof: &Self::Proof,
        tr: &mut Transcript,
    ) -> Result<()> {
        let d = statement.encoded_direction(ctx)?;
        let bound = statement.encoded_bound(ctx)?;
        let e = proof
            .expression
            .verify(ctx, tr, &statement.commitment, None)?;

        let q = msm(&e, &d)?;
        let signed = if proof.negated { -q } else { q };
        let margin_commitment: G1Affine = (signed - ctx.gens.g * bound).into();

        tr.append_u64(b"polarity", proof.negated as u64);
        if !proof
            .margin
            .verify(ctx, tr, &margin_commitment, margin_bits(ctx))
        {
            return Err(DlrsError::ProofVerificationFailed(
                "quality margin range proof rejected".into(),
            ));
        }
        Ok(())
    }
}

/// Prove that the committed seed reaches `quality_bound` on `challenge`
pub fn prove_capability<R: Rng + ?Sized>(
    ctx: &ZkContext,
    commitment: &Commitment,
    secret: &OpeningSecret,
    challenge: &Challenge,
    quality_bound: f64,
    rng: &mut R,
) -> Result<CapabilityProof> {
    let statement = CapabilityStatement {
        commitment: commitment.clone(),
        challenge: challenge.clone(),
        quality_bound,
    };
    predicate::prove::<Capability, R>(ctx, &statement, secret, rng)
}

pub fn verify_capability(
    ctx: &ZkContext,
    commitment: &Commitment,
    challenge: &Challenge,
    quality_bound: f64,
    proof: &CapabilityProof,
) -> Result<()> {
    let statement = CapabilityStatement {
        commitment: commitment.clone(),
        challenge: challenge.clone(),
        quality_bound,
    };
    predicate::verify::<Capability>(ctx, &statement, proof)
}

/// Quality as the prover sees it after fixed-point encoding
pub fn encoded_quality(ctx: &ZkContext, secret: &OpeningSecret, challenge: &Challenge) -> Result<f64> {
    let d = challenge.encoded(ctx)?;
    let shape = secret.shape();
    if d.len() != shape.n() {
        return Err(DlrsError::InvalidInput("challenge dimension mismatch".into()));
    }
    let values = secret.values();
    let r = shape.rank();
    let e: Vec<Fr> = (0..shape.n())
        .map(|j| (0..r).map(|i| values.v[j * r + i] * values.sigma[i]).sum())
        .collect();
    Ok(ctx.decode(&inner_product(&d, &e), QUALITY_LEVELS).abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoParams;
    use crate::zk::commitment::commit;
    use nalgebra::DMatrix;
    use proptest::prelude::*;

    fn ctx() -> ZkContext {
        ZkContext::new(CryptoParams::default()).unwrap()
    }

    fn seeded(m: usize, n: usize, r: usize) -> (ZkContext, Commitment, OpeningSecret) {
        let ctx = ctx();
        let f = LowRankFactorSet::from_matrix(&DMatrix::new_random(m, n), r).unwrap();
        let (c, s) = commit(&ctx, &f, &mut rand::thread_rng()).unwrap();
        (ctx, c, s)
    }

    #[test]
    fn test_capability_completeness() {
        let (ctx, c, secret) = seeded(6, 5, 2);
        let mut rng = rand::thread_rng();
        let challenge = Challenge::random("math", 5, &mut rng);
        let quality = challenge.quality(secret.factors()).unwrap();
        let bound = quality * 0.9;

        let proof = prove_capability(&ctx, &c, &secret, &challenge, bound, &mut rng).unwrap();
        verify_capability(&ctx, &c, &challenge, bound, &proof).unwrap();
        println!("quality {:.4}, proved bound {:.4}", quality, bound);
    }

    #[test]
    fn test_large_margin_is_provable() {
        let ctx = ctx();
        let mut rng = rand::thread_rng();
        let f = LowRankFactorSet::from_matrix(&DMatrix::from_element(1, 1, 100_000.0), 1).unwrap();
        let (c, secret) = commit(&ctx, &f, &mut rng).unwrap();
        let challenge = Challenge::random("d", 1, &mut rng);

        for bound in [0.0, 10_000.0] {
            let proof = prove_capability(&ctx, &c, &secret, &challenge, bound, &mut rng).unwrap();
            verify_capability(&ctx, &c, &challenge, bound, &proof).unwrap();
        }
    }

    #[test]
    fn test_negative_polarity() {
        let (ctx, c, secret) = seeded(5, 4, 2);
        let mut rng = rand::thread_rng();
        let mut challenge = Challenge::random("code", 4, &mut rng);
        let signed = secret.factors().expression_vector().dot(&challenge.direction());
        if signed > 0.0 {
            challenge.vector.iter_mut().for_each(|x| *x = -*x);
        }
        let bound = challenge.quality(secret.factors()).unwrap() * 0.5;
        let proof = prove_capability(&ctx, &c, &secret, &challenge, bound, &mut rng).unwrap();
        assert!(proof.negated || signed == 0.0);
        verify_capability(&ctx, &c, &challenge, bound, &proof).unwrap();
    }

    #[test]
    fn test_prover_refuses_false_statement() {
        let (ctx, c, secret) = seeded(6, 5, 2);
        let mut rng = rand::thread_rng();
        let challenge = Challenge::random("math", 5, &mut rng);
        let quality = challenge.quality(secret.factors()).unwrap();
        assert!(matches!(
            prove_capability(&ctx, &c, &secret, &challenge, quality + 1.0, &mut rng),
            Err(DlrsError::ProofGeneration(_))
        ));
    }

    #[test]
    fn test_proof_does_not_transfer() {
        let (ctx, c, secret) = seeded(6, 5, 2);
        let mut rng = rand::thread_rng();
        let challenge = Challenge::random("math", 5, &mut rng);
        let bound = challenge.quality(secret.factors()).unwrap() * 0.5;
        let proof = prove_capability(&ctx, &c, &secret, &challenge, bound, &mut rng).unwrap();

        // higher bound
        assert!(matches!(
            verify_capability(&ctx, &c, &challenge, bound * 1.5 + 0.1, &proof),
            Err(DlrsError::ProofVerificationFailed(_))
        ));
        // other challenge
        let other = Challenge::random("math", 5, &mut rng);
        assert!(verify_capability(&ctx, &c, &other, bound, &proof).is_err());
        // other commitment
        let (c2, _) = commit(&ctx, secret.factors(), &mut rng).unwrap();
        assert!(verify_capability(&ctx, &c2, &challenge, bound, &proof).is_err());
    }

    #[test]
    fn test_proof_survives_json() {
        let (ctx, c, secret) = seeded(4, 4, 1);
        let mut rng = rand::thread_rng();
        let challenge = Challenge::for_domain("vision", 4);
        let bound = challenge.quality(secret.factors()).unwrap() * 0.8;
        let proof = prove_capability(&ctx, &c, &secret, &challenge, bound, &mut rng).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        let back: CapabilityProof = serde_json::from_str(&json).unwrap();
        verify_capability(&ctx, &c, &challenge, bound, &back).unwrap();
    }

    #[test]
    fn test_domain_challenges_are_canonical_unit_vectors() {
        let a = Challenge::for_domain("math", 8);
        assert_eq!(a, Challenge::for_domain("math", 8));
        assert_ne!(a.vector, Challenge::for_domain("code", 8).vector);
        assert!((a.direction().norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_encoded_quality_tracks_plaintext() {
        let (ctx, _, secret) = seeded(5, 5, 3);
        let challenge = Challenge::for_domain("math", 5);
        let plain = challenge.quality(secret.factors()).unwrap();
        let fixed = encoded_quality(&ctx, &secret, &challenge).unwrap();
        assert!((plain - fixed).abs() < 1e-3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(6))]

        #[test]
        fn fuzz_false_bounds_never_verify(excess in 0.05f64..5.0, seed in any::<u64>()) {
            use rand::SeedableRng;
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let ctx = ctx();
            let k = DMatrix::from_fn(4, 3, |_, _| rng.gen_range(-1.0..1.0));
            let f = LowRankFactorSet::from_matrix(&k, 2).unwrap();
            let (c, secret) = commit(&ctx, &f, &mut rng).unwrap();
            let challenge = Challenge::random("fuzz", 3, &mut rng);
            let quality = challenge.quality(&f).unwrap();

            // honest prover cannot prove more than it has
            let false_bound = quality + excess;
            prop_assert!(prove_capability(&ctx, &c, &secret, &challenge, false_bound, &mut rng).is_err());

            // a valid proof for a true bound never verifies for the false one
            let proof = prove_capability(&ctx, &c, &secret, &challenge, quality * 0.5, &mut rng).unwrap();
            prop_assert!(verify_capability(&ctx, &c, &challenge, false_bound, &proof).is_err());
        }
    }
}
