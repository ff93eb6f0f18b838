//! Weighted cross terms between two committed seeds
//!
//! Compatibility and collaboration both reveal `Σ_j w_j·e^a_j·e^b_j` for the
//! expression vectors of two different owners. Each owner proves its own
//! expression on a fork of the statement transcript; the responder (party B)
//! publishes `S = Σ_j w_j·e^b_j·E^a_j + μ·H` with a [`LinkProof`]; the proof is
//! accepted iff the revealed `(score, ρ)` opens S.
//!
//! The proof object is the same whether it was produced by one owner holding
//! both openings or by the two-party session in `crate::mpc`.

use super::codec::canonical_serde;
use super::commitment::{Commitment, OpeningSecret};
use super::expression::{expression_levels, ExpressionProof, ExpressionWitness};
use super::group::{inner_product, msm, normalize, random_scalar, ZkContext};
use super::predicate::Predicate;
use super::sigma::{LinkProof, LinkStatement};
use super::transcript::Transcript;
use crate::error::{DlrsError, Result};
use ark_bn254::{Fr, G1Affine, G1Projective};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::Rng;

/// Both openings, for an owner proving about two of its own seeds
#[derive(Debug, Clone)]
pub struct JointOpening {
    pub a: OpeningSecret,
    pub b: OpeningSecret,
}

/// A predicate whose proof is a weighted cross term; these can also be
/// proved by two owners over a session
pub trait BilinearPredicate: Predicate<Witness = JointOpening, Proof = BilinearProof> {
    fn bilinear(ctx: &ZkContext, statement: &Self::Statement) -> Result<BilinearStatement>;
}

/// Which owner of a two-seed statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    fn label(&self) -> &'static [u8] {
        match self {
            Side::A => b"party-a",
            Side::B => b"party-b",
        }
    }
}

/// Public inputs of a weighted cross term
#[derive(Debug, Clone)]
pub struct BilinearStatement {
    pub commitment_a: Commitment,
    pub commitment_b: Commitment,
    pub query_a: Option<Vec<Fr>>,
    pub query_b: Option<Vec<Fr>>,
    pub weights: Vec<Fr>,
    /// Fixed-point levels of the weights
    pub weight_levels: u32,
}

impl BilinearStatement {
    pub fn commitment(&self, side: Side) -> &Commitment {
        match side {
            Side::A => &self.commitment_a,
            Side::B => &self.commitment_b,
        }
    }

    pub fn query(&self, side: Side) -> Option<&[Fr]> {
        match side {
            Side::A => self.query_a.as_deref(),
            Side::B => self.query_b.as_deref(),
        }
    }

    pub fn output_levels(&self) -> u32 {
        expression_levels(self.query(Side::A))
            + expression_levels(self.query(Side::B))
            + self.weight_levels
    }

    /// Decode a revealed score to a real number
    pub fn decode(&self, ctx: &ZkContext, score: &Fr) -> f64 {
        ctx.decode(score, self.output_levels())
    }

    pub fn bind(&self, tr: &mut Transcript) -> Result<()> {
        let n = self.commitment_a.shape.n();
        if self.commitment_b.shape.n() != n || self.weights.len() != n {
            return Err(DlrsError::InvalidInput(format!(
                "domain dimensions differ: a {}, b {}, weights {}",
                n,
                self.commitment_b.shape.n(),
                self.weights.len()
            )));
        }
        tr.append_message(b"commitment-a", self.commitment_a.root().as_bytes());
        tr.append_message(b"commitment-b", self.commitment_b.root().as_bytes());
        for (label, query) in [(b"query-a", &self.query_a), (b"query-b", &self.query_b)] {
            match query {
                Some(x) => tr.append_scalars(label, x),
                None => tr.append_u64(label, 0),
            }
        }
        tr.append_scalars(b"weights", &self.weights);
        tr.append_u64(b"weight-levels", self.weight_levels as u64);
        Ok(())
    }

    fn link_statement<'a>(
        &'a self,
        e_a: &'a [G1Affine],
        e_b: &'a [G1Affine],
        cross: &'a G1Affine,
    ) -> LinkStatement<'a> {
        LinkStatement {
            z_commitments: e_b,
            bases: e_a,
            weights: &self.weights,
            cross,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct BilinearProof {
    pub expr_a: ExpressionProof,
    pub expr_b: ExpressionProof,
    /// S, the commitment to the score
    pub cross: G1Affine,
    pub link: LinkProof,
    /// Revealed score (fixed-point, `output_levels` levels)
    pub score: Fr,
    /// Revealed blinding of S
    pub blinding: Fr,
}

canonical_serde!(BilinearProof);

/// Expression proof of one owner, on that owner's transcript fork
pub fn prove_party<R: Rng + ?Sized>(
    ctx: &ZkContext,
    base: &Transcript,
    side: Side,
    statement: &BilinearStatement,
    secret: &OpeningSecret,
    rng: &mut R,
) -> Result<(ExpressionProof, ExpressionWitness)> {
    let mut tr = base.fork(side.label());
    ExpressionProof::prove(
        ctx,
        &mut tr,
        statement.commitment(side),
        secret,
        statement.query(side),
        rng,
    )
}

pub fn verify_party(
    ctx: &ZkContext,
    base: &Transcript,
    side: Side,
    statement: &BilinearStatement,
    proof: &ExpressionProof,
) -> Result<Vec<G1Affine>> {
    let mut tr = base.fork(side.label());
    proof.verify(ctx, &mut tr, statement.commitment(side), statement.query(side))
}

/// w ∘ e^b, the vector party B contributes to both inner products
pub fn weighted_values(statement: &BilinearStatement, witness_b: &ExpressionWitness) -> Vec<Fr> {
    statement
        .weights
        .iter()
        .zip(&witness_b.values)
        .map(|(w, e)| *w * e)
        .collect()
}

/// Party B's cross commitment S and its link proof
pub fn prove_link<R: Rng + ?Sized>(
    ctx: &ZkContext,
    base: &Transcript,
    statement: &BilinearStatement,
    e_a: &[G1Affine],
    witness_b: &ExpressionWitness,
    mu: &Fr,
    rng: &mut R,
) -> Result<(G1Affine, LinkProof)> {
    let y = weighted_values(statement, witness_b);
    let cross: G1Affine = (msm(e_a, &y)? + ctx.gens.h * mu).into();
    let e_b = commitments_of(ctx, witness_b);
    let link_statement = statement.link_statement(e_a, &e_b, &cross);
    let mut tr = base.fork(b"link");
    let link = LinkProof::prove(
        ctx,
        &mut tr,
        &link_statement,
        &witness_b.values,
        &witness_b.blindings,
        mu,
        rng,
    )?;
    Ok((cross, link))
}

pub fn verify_link(
    ctx: &ZkContext,
    base: &Transcript,
    statement: &BilinearStatement,
    e_a: &[G1Affine],
    e_b: &[G1Affine],
    cross: &G1Affine,
    link: &LinkProof,
) -> bool {
    let link_statement = statement.link_statement(e_a, e_b, cross);
    let mut tr = base.fork(b"link");
    link.verify(ctx, &mut tr, &link_statement)
}

/// S − score·G == ρ·H
pub fn opens_cross(ctx: &ZkContext, cross: &G1Affine, score: &Fr, blinding: &Fr) -> bool {
    G1Projective::from(*cross) == ctx.commit(score, blinding)
}

pub fn commitments_of(ctx: &ZkContext, witness: &ExpressionWitness) -> Vec<G1Affine> {
    let points: Vec<G1Projective> = witness
        .values
        .iter()
        .zip(&witness.blindings)
        .map(|(x, r)| ctx.commit(x, r))
        .collect();
    normalize(&points)
}

/// Both openings held by one prover
pub fn prove_joint<R: Rng + ?Sized>(
    ctx: &ZkContext,
    base: &Transcript,
    statement: &BilinearStatement,
    secret_a: &OpeningSecret,
    secret_b: &OpeningSecret,
    rng: &mut R,
) -> Result<BilinearProof> {
    let (expr_a, witness_a) = prove_party(ctx, base, Side::A, statement, secret_a, rng)?;
    let (expr_b, witness_b) = prove_party(ctx, base, Side::B, statement, secret_b, rng)?;
    let e_a = commitments_of(ctx, &witness_a);

    let mu = random_scalar(rng);
    let (cross, link) = prove_link(ctx, base, statement, &e_a, &witness_b, &mu, rng)?;
    let y = weighted_values(statement, &witness_b);
    Ok(BilinearProof {
        expr_a,
        expr_b,
        cross,
        link,
        score: inner_product(&witness_a.values, &y),
        blinding: inner_product(&witness_a.blindings, &y) + mu,
    })
}

pub fn verify(
    ctx: &ZkContext,
    base: &Transcript,
    statement: &BilinearStatement,
    proof: &BilinearProof,
) -> Result<()> {
    let e_a = verify_party(ctx, base, Side::A, statement, &proof.expr_a)?;
    let e_b = verify_party(ctx, base, Side::B, statement, &proof.expr_b)?;
    if !verify_link(ctx, base, statement, &e_a, &e_b, &proof.cross, &proof.link) {
        return Err(DlrsError::ProofVerificationFailed(
            "cross commitment is not linked to the committed expressions".into(),
        ));
    }
    if !opens_cross(ctx, &proof.cross, &proof.score, &proof.blinding) {
        return Err(DlrsError::ProofVerificationFailed(
            "revealed score does not open the cross commitment".into(),
        ));
    }
    Ok(())
}
