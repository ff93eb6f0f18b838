//! CompatibilityCheck — how well two seeds overlap in a claimed subspace
//!
//! score = Σ_j w_j·e^a_j·e^b_j with e = V·σ. Neither owner learns the other's
//! factors; the score is public.

use super::bilinear::{self, BilinearPredicate, BilinearProof, BilinearStatement, JointOpening};
use super::capability::Challenge;
use super::commitment::Commitment;
use super::group::ZkContext;
use super::predicate::{self, Predicate};
use super::transcript::Transcript;
use crate::error::{DlrsError, Result};
use ark_bn254::Fr;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Public non-negative weights selecting the compared subspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubspaceClaim {
    /// Domain tags the weights were derived from (informational)
    pub domains: Vec<String>,
    pub weights: Vec<f64>,
}

impl SubspaceClaim {
    pub fn explicit(weights: Vec<f64>) -> Result<Self> {
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DlrsError::InvalidInput(
                "subspace weights must be finite and non-negative".into(),
            ));
        }
        Ok(Self {
            domains: Vec::new(),
            weights,
        })
    }

    /// Weights from the domain tags both seeds declare
    ///
    /// w_j sums the squared components of every shared domain direction; with
    /// no shared domain all weights are zero.
    pub fn shared_domains(a: &[String], b: &[String], dim: usize) -> Self {
        let mut shared: Vec<String> = a.iter().filter(|d| b.contains(d)).cloned().collect();
        shared.sort();
        shared.dedup();
        let mut weights = vec![0.0; dim];
        for domain in &shared {
            let direction = Challenge::for_domain(domain, dim);
            for (w, x) in weights.iter_mut().zip(&direction.vector) {
                *w += x * x;
            }
        }
        Self {
            domains: shared,
            weights,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.weights.iter().all(|w| *w == 0.0)
    }

    pub(crate) fn encoded(&self, ctx: &ZkContext) -> Result<Vec<Fr>> {
        self.weights.iter().map(|w| ctx.encode(*w, 1)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CompatibilityStatement {
    pub commitment_a: Commitment,
    pub commitment_b: Commitment,
    pub subspace: SubspaceClaim,
}

impl CompatibilityStatement {
    pub fn bilinear(&self, ctx: &ZkContext) -> Result<BilinearStatement> {
        Ok(BilinearStatement {
            commitment_a: self.commitment_a.clone(),
            commitment_b: self.commitment_b.clone(),
            query_a: None,
            query_b: None,
            weights: self.subspace.encoded(ctx)?,
            weight_levels: 1,
        })
    }
}

pub type CompatibilityProof = BilinearProof;

pub struct Compatibility;

impl Predicate for Compatibility {
    const LABEL: &'static [u8] = b"dlrs/compatibility/v1";

    type Statement = CompatibilityStatement;
    type Witness = JointOpening;
    type Proof = CompatibilityProof;

    fn bind_statement(
        ctx: &ZkContext,
        statement: &Self::Statement,
        tr: &mut Transcript,
    ) -> Result<()> {
        statement.bilinear(ctx)?.bind(tr)
    }

    fn prove_bound<R: Rng + ?Sized>(
        ctx: &ZkContext,
        statement: &Self::Statement,
        witness: &Self::Witness,
        tr: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self::Proof> {
        let cross_term = statement.bilinear(ctx)?;
        bilinear::prove_joint(ctx, tr, &cross_term, &witness.a, &witness.b, rng)
    }

    fn verify_bound(
        ctx: &ZkContext,
        statement: &Self::Statement,
        proof: &Self::Proof,
        tr: &mut Transcript,
    ) -> Result<()> {
        bilinear::verify(ctx, tr, &statement.bilinear(ctx)?, proof)
    }
}

impl BilinearPredicate for Compatibility {
    fn bilinear(ctx: &ZkContext, statement: &Self::Statement) -> Result<BilinearStatement> {
        statement.bilinear(ctx)
    }
}

/// Accepted proof plus its decoded score
#[derive(Debug, Clone)]
pub struct CompatibilityOutcome {
    pub score: f64,
    pub proof: CompatibilityProof,
}

pub fn check_compatibility<R: Rng + ?Sized>(
    ctx: &ZkContext,
    statement: &CompatibilityStatement,
    openings: &JointOpening,
    rng: &mut R,
) -> Result<CompatibilityOutcome> {
    let proof = predicate::prove::<Compatibility, R>(ctx, statement, openings, rng)?;
    let score = statement.bilinear(ctx)?.decode(ctx, &proof.score);
    Ok(CompatibilityOutcome { score, proof })
}

/// Verify and return the score the proof reveals
pub fn verify_compatibility(
    ctx: &ZkContext,
    statement: &CompatibilityStatement,
    proof: &CompatibilityProof,
) -> Result<f64> {
    predicate::verify::<Compatibility>(ctx, statement, proof)?;
    Ok(statement.bilinear(ctx)?.decode(ctx, &proof.score))
}
