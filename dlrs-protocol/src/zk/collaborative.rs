//! CollaborativeCompute — a joint result over two seeds neither owner reveals

use super::bilinear::{self, BilinearPredicate, BilinearProof, BilinearStatement, JointOpening};
use super::commitment::Commitment;
use super::compatibility::SubspaceClaim;
use super::group::ZkContext;
use super::predicate::{self, Predicate};
use super::transcript::Transcript;
use crate::error::{DlrsError, Result};
use ark_bn254::Fr;
use ark_ff::One;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Public description of the joint computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSpec {
    /// f = (K_aᵀ·x)·(K_bᵀ·y)
    CrossResponse { left_a: Vec<f64>, left_b: Vec<f64> },
    /// Weighted overlap of the two expression vectors
    ExpressionOverlap { subspace: SubspaceClaim },
}

#[derive(Debug, Clone)]
pub struct CollaborationStatement {
    pub commitment_a: Commitment,
    pub commitment_b: Commitment,
    pub task: TaskSpec,
}

fn encode_query(ctx: &ZkContext, query: &[f64], commitment: &Commitment) -> Result<Vec<Fr>> {
    if query.len() != commitment.shape.m() {
        return Err(DlrsError::InvalidInput(format!(
            "query has length {}, seed has {} rows",
            query.len(),
            commitment.shape.m()
        )));
    }
    query.iter().map(|x| ctx.encode(*x, 1)).collect()
}

impl CollaborationStatement {
    pub fn bilinear(&self, ctx: &ZkContext) -> Result<BilinearStatement> {
        let n = self.commitment_a.shape.n();
        let (query_a, query_b, weights, weight_levels) = match &self.task {
            TaskSpec::CrossResponse { left_a, left_b } => (
                Some(encode_query(ctx, left_a, &self.commitment_a)?),
                Some(encode_query(ctx, left_b, &self.commitment_b)?),
                vec![Fr::one(); n],
                0,
            ),
            TaskSpec::ExpressionOverlap { subspace } => (None, None, subspace.encoded(ctx)?, 1),
        };
        Ok(BilinearStatement {
            commitment_a: self.commitment_a.clone(),
            commitment_b: self.commitment_b.clone(),
            query_a,
            query_b,
            weights,
            weight_levels,
        })
    }
}

pub type CollaborationProof = BilinearProof;

pub struct Collaboration;

impl Predicate for Collaboration {
    const LABEL: &'static [u8] = b"dlrs/collaboration/v1";

    type Statement = CollaborationStatement;
    type Witness = JointOpening;
    type Proof = CollaborationProof;

    fn bind_statement(
        ctx: &ZkContext,
        statement: &Self::Statement,
        tr: &mut Transcript,
    ) -> Result<()> {
        let kind: &[u8] = match statement.task {
            TaskSpec::CrossResponse { .. } => b"cross-response",
            TaskSpec::ExpressionOverlap { .. } => b"expression-overlap",
        };
        tr.append_message(b"task", kind);
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

impl BilinearPredicate for Collaboration {
    fn bilinear(ctx: &ZkContext, statement: &Self::Statement) -> Result<BilinearStatement> {
        statement.bilinear(ctx)
    }
}

#[derive(Debug, Clone)]
pub struct CollaborationOutcome {
    pub result: f64,
    pub proof: CollaborationProof,
}

/// Joint computation by an owner holding both openings
pub fn compute_locally<R: Rng + ?Sized>(
    ctx: &ZkContext,
    statement: &CollaborationStatement,
    openings: &JointOpening,
    rng: &mut R,
) -> Result<CollaborationOutcome> {
    let proof = predicate::prove::<Collaboration, R>(ctx, statement, openings, rng)?;
    let result = statement.bilinear(ctx)?.decode(ctx, &proof.score);
    Ok(CollaborationOutcome { result, proof })
}

pub fn verify_collaboration(
    ctx: &ZkContext,
    statement: &CollaborationStatement,
    proof: &CollaborationProof,
) -> Result<f64> {
    predicate::verify::<Collaboration>(ctx, statement, proof)?;
    Ok(statement.bilinear(ctx)?.decode(ctx, &proof.score))
}
