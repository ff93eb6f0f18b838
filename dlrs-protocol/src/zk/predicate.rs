//! Generic predicate interface
//!
//! Capability, compatibility and collaboration proofs are all "a predicate
//! over committed values, proved without opening the commitment". Each one
//! implements [`Predicate`]; [`prove`] and [`verify`] set up the transcript
//! the same way for all of them.

use super::group::ZkContext;
use super::transcript::Transcript;
use crate::error::{DlrsError, Result};
use rand::Rng;

pub trait Predicate {
    /// Domain separator of the transcript
    const LABEL: &'static [u8];

    type Statement;
    type Witness;
    type Proof;

    /// Absorb every public input into the transcript
    fn bind_statement(ctx: &ZkContext, statement: &Self::Statement, tr: &mut Transcript)
        -> Result<()>;

    fn prove_bound<R: Rng + ?Sized>(
        ctx: &ZkContext,
        statement: &Self::Statement,
        witness: &Self::Witness,
        tr: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self::Proof>;

    fn verify_bound(
        ctx: &ZkContext,
        statement: &Self::Statement,
        proof: &Self::Proof,
        tr: &mut Transcript,
    ) -> Result<()>;
}

/// Transcript with the parameters and statement of `P` absorbed
pub fn statement_transcript<P: Predicate>(
    ctx: &ZkContext,
    statement: &P::Statement,
) -> Result<Transcript> {
    let mut tr = Transcript::new(P::LABEL);
    tr.append_message(b"params", ctx.fingerprint().as_bytes());
    P::bind_statement(ctx, statement, &mut tr)?;
    Ok(tr)
}

pub fn prove<P: Predicate, R: Rng + ?Sized>(
    ctx: &ZkContext,
    statement: &P::Statement,
    witness: &P::Witness,
    rng: &mut R,
) -> Result<P::Proof> {
    let mut tr = statement_transcript::<P>(ctx, statement)?;
    P::prove_bound(ctx, statement, witness, &mut tr, rng)
}

/// Accepts with `Ok(())`; any rejection is `ProofVerificationFailed`
pub fn verify<P: Predicate>(ctx: &ZkContext, statement: &P::Statement, proof: &P::Proof) -> Result<()> {
    let mut tr = statement_transcript::<P>(ctx, statement).map_err(as_rejection)?;
    P::verify_bound(ctx, statement, proof, &mut tr).map_err(as_rejection)
}

fn as_rejection(e: DlrsError) -> DlrsError {
    match e {
        DlrsError::ProofVerificationFailed(_) => e,
        other => DlrsError::ProofVerificationFailed(other.to_string()),
    }
}
