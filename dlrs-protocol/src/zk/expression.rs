//! Expression proofs
//!
//! Derives commitments to the expression vector of a committed factor set
//! without opening it:
//!
//! - no query: `e = V·σ` (two fixed-point levels)
//! - left query x: `e = V·diag(σ)·(Uᵀx)` (four levels)
//!
//! `Uᵀx` is computed homomorphically from the U commitments; each product with
//! σ ("pivot") and with V ("product") is a committed multiplication.

use super::commitment::{Commitment, OpeningSecret};
use super::group::{msm, normalize, random_scalar, ZkContext};
use super::sigma::MulProof;
use super::transcript::Transcript;
use crate::error::{DlrsError, Result};
use ark_bn254::{Fr, G1Affine, G1Projective};
use ark_ff::Zero;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::Rng;

/// Fixed-point levels carried by an expression vector
pub fn expression_levels(query: Option<&[Fr]>) -> u32 {
    if query.is_some() {
        4
    } else {
        2
    }
}

#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct ExpressionProof {
    pivots: Vec<G1Affine>,
    pivot_proofs: Vec<MulProof>,
    products: Vec<G1Affine>,
    product_proofs: Vec<MulProof>,
}

/// Prover-side openings of the expression commitments
pub struct ExpressionWitness {
    pub values: Vec<Fr>,
    pub blindings: Vec<Fr>,
}

impl Drop for ExpressionWitness {
    fn drop(&mut self) {
        for x in self.values.iter_mut().chain(self.blindings.iter_mut()) {
            *x = Fr::zero();
        }
    }
}

fn bind_query(tr: &mut Transcript, commitment: &Commitment, query: Option<&[Fr]>) {
    tr.append_message(b"expr-root", commitment.root().as_bytes());
    match query {
        Some(x) => tr.append_scalars(b"expr-query", x),
        None => tr.append_u64(b"expr-query", 0),
    }
}

/// H_i = Σ_k x_k·U_ki for every column i
fn query_images(commitment: &Commitment, x: &[Fr]) -> Result<Vec<G1Affine>> {
    let (m, r) = (commitment.shape.m(), commitment.shape.rank());
    let mut images = Vec::with_capacity(r);
    for i in 0..r {
        let column: Vec<G1Affine> = (0..m).map(|k| commitment.u_entry(k, i)).collect();
        images.push(msm(&column, x)?);
    }
    Ok(normalize(&images))
}

fn check_query(commitment: &Commitment, query: Option<&[Fr]>) -> Result<()> {
    match query {
        Some(x) if x.len() != commitment.shape.m() => Err(DlrsError::InvalidInput(format!(
            "query has length {}, expected {}",
            x.len(),
            commitment.shape.m()
        ))),
        _ => Ok(()),
    }
}

impl ExpressionProof {
    pub fn prove<R: Rng + ?Sized>(
        ctx: &ZkContext,
        tr: &mut Transcript,
        commitment: &Commitment,
        secret: &OpeningSecret,
        query: Option<&[Fr]>,
        rng: &mut R,
    ) -> Result<(Self, ExpressionWitness)> {
        if secret.shape() != commitment.shape {
            return Err(DlrsError::ProofGeneration(format!(
                "opening shape {} does not match commitment {}",
                secret.shape(),
                commitment.shape
            )));
        }
        check_query(commitment, query)?;
        let (m, n, r) = (commitment.shape.m(), commitment.shape.n(), commitment.shape.rank());
        let values = secret.values();
        let blinds = secret.blindings();
        bind_query(tr, commitment, query);

        let mut pivots = Vec::new();
        let mut pivot_proofs = Vec::new();
        let (pivot_points, pivot_values, pivot_blindings) = match query {
            None => (
                commitment.sigma.clone(),
                values.sigma.clone(),
                blinds.sigma.clone(),
            ),
            Some(x) => {
                let images = query_images(commitment, x)?;
                let mut pivot_values = Vec::with_capacity(r);
                let mut pivot_blindings = Vec::with_capacity(r);
                for i in 0..r {
                    let h_value: Fr = (0..m).map(|k| x[k] * values.u[k * r + i]).sum();
                    let h_blinding: Fr = (0..m).map(|k| x[k] * blinds.u[k * r + i]).sum();
                    let s = random_scalar(rng);
                    let point: G1Affine = (images[i] * values.sigma[i] + ctx.gens.h * s).into();
                    pivot_values.push(values.sigma[i] * h_value);
                    pivot_blindings.push(values.sigma[i] * h_blinding + s);
                    pivot_proofs.push(MulProof::prove(
                        ctx,
                        tr,
                        (&commitment.sigma[i], &images[i], &point),
                        &values.sigma[i],
                        &blinds.sigma[i],
                        &s,
                        rng,
                    ));
                    pivots.push(point);
                }
                (pivots.clone(), pivot_values, pivot_blindings)
            }
        };

        let mut products = Vec::with_capacity(n * r);
        let mut product_proofs = Vec::with_capacity(n * r);
        let mut e_values = vec![Fr::zero(); n];
        let mut e_blindings = vec![Fr::zero(); n];
        for j in 0..n {
            for i in 0..r {
                let idx = j * r + i;
                let s = random_scalar(rng);
                let point: G1Affine =
                    (pivot_points[i] * values.v[idx] + ctx.gens.h * s).into();
                product_proofs.push(MulProof::prove(
                    ctx,
                    tr,
                    (&commitment.v[idx], &pivot_points[i], &point),
                    &values.v[idx],
                    &blinds.v[idx],
                    &s,
                    rng,
                ));
                products.push(point);
                e_values[j] += values.v[idx] * pivot_values[i];
                e_blindings[j] += values.v[idx] * pivot_blindings[i] + s;
            }
        }

        Ok((
            Self {
                pivots,
                pivot_proofs,
                products,
                product_proofs,
            },
            ExpressionWitness {
                values: e_values,
                blindings: e_blindings,
            },
        ))
    }

    /// Check the proof and return the commitments to e_1..e_n
    pub fn verify(
        &self,
        ctx: &ZkContext,
        tr: &mut Transcript,
        commitment: &Commitment,
        query: Option<&[Fr]>,
    ) -> Result<Vec<G1Affine>> {
        commitment
            .validate()
            .map_err(|e| DlrsError::ProofVerificationFailed(e.to_string()))?;
        check_query(commitment, query)
            .map_err(|e| DlrsError::ProofVerificationFailed(e.to_string()))?;
        let (n, r) = (commitment.shape.n(), commitment.shape.rank());
        let expected_pivots = if query.is_some() { r } else { 0 };
        if self.pivots.len() != expected_pivots
            || self.pivot_proofs.len() != expected_pivots
            || self.products.len() != n * r
            || self.product_proofs.len() != n * r
        {
            return Err(DlrsError::ProofVerificationFailed(
                "expression proof has the wrong shape".into(),
            ));
        }
        bind_query(tr, commitment, query);

        let pivot_points = match query {
            None => commitment.sigma.clone(),
            Some(x) => {
                let images = query_images(commitment, x)?;
                for i in 0..r {
                    let statement = (&commitment.sigma[i], &images[i], &self.pivots[i]);
                    if !self.pivot_proofs[i].verify(ctx, tr, statement) {
                        return Err(DlrsError::ProofVerificationFailed(format!(
                            "pivot {} does not verify",
                            i
                        )));
                    }
                }
                self.pivots.clone()
            }
        };

        let mut sums = vec![G1Projective::zero(); n];
        for j in 0..n {
            for i in 0..r {
                let idx = j * r + i;
                let statement = (&commitment.v[idx], &pivot_points[i], &self.products[idx]);
                if !self.product_proofs[idx].verify(ctx, tr, statement) {
                    return Err(DlrsError::ProofVerificationFailed(format!(
                        "product ({}, {}) does not verify",
                        j, i
                    )));
                }
                sums[j] += self.products[idx];
            }
        }
        Ok(normalize(&sums))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoParams;
    use crate::factor::LowRankFactorSet;
    use crate::zk::commitment::commit;
    use ark_ec::CurveGroup;
    use nalgebra::{DMatrix, DVector};

    fn setup(m: usize, n: usize, r: usize) -> (ZkContext, Commitment, OpeningSecret) {
        let ctx = ZkContext::new(CryptoParams::default()).unwrap();
        let f = LowRankFactorSet::from_matrix(&DMatrix::new_random(m, n), r).unwrap();
        let (c, s) = commit(&ctx, &f, &mut rand::thread_rng()).unwrap();
        (ctx, c, s)
    }

    #[test]
    fn test_expression_without_query() {
        let (ctx, c, secret) = setup(5, 4, 2);
        let mut rng = rand::thread_rng();
        let (proof, witness) =
            ExpressionProof::prove(&ctx, &mut Transcript::new(b"t"), &c, &secret, None, &mut rng)
                .unwrap();
        let points = proof.verify(&ctx, &mut Transcript::new(b"t"), &c, None).unwrap();
        assert_eq!(points.len(), 4);
        for j in 0..4 {
            assert_eq!(
                points[j],
                ctx.commit(&witness.values[j], &witness.blindings[j]).into_affine()
            );
        }

        let expected = secret.factors().expression_vector();
        for j in 0..4 {
            let decoded = ctx.decode(&witness.values[j], expression_levels(None));
            assert!((decoded - expected[j]).abs() < 1e-3, "{} vs {}", decoded, expected[j]);
        }
    }

    #[test]
    fn test_expression_with_query_matches_transposed_product() {
        let (ctx, c, secret) = setup(4, 3, 2);
        let mut rng = rand::thread_rng();
        let x_real = DVector::from_vec(vec![0.5, -1.0, 0.25, 2.0]);
        let x: Vec<Fr> = x_real.iter().map(|v| ctx.encode(*v, 1).unwrap()).collect();

        let (proof, witness) = ExpressionProof::prove(
            &ctx,
            &mut Transcript::new(b"t"),
            &c,
            &secret,
            Some(&x),
            &mut rng,
        )
        .unwrap();
        let points = proof
            .verify(&ctx, &mut Transcript::new(b"t"), &c, Some(&x))
            .unwrap();
        assert_eq!(points.len(), 3);

        let expected = secret.factors().reconstruct().transpose() * &x_real;
        for j in 0..3 {
            let decoded = ctx.decode(&witness.values[j], expression_levels(Some(&x)));
            assert!((decoded - expected[j]).abs() < 1e-3);
        }

        // a different query does not verify
        let mut other = x.clone();
        other[0] += Fr::from(1u64);
        assert!(proof
            .verify(&ctx, &mut Transcript::new(b"t"), &c, Some(&other))
            .is_err());
    }

    #[test]
    fn test_proof_bound_to_commitment() {
        let (ctx, c, secret) = setup(4, 4, 1);
        let (c2, _) = commit(&ctx, secret.factors(), &mut rand::thread_rng()).unwrap();
        let (proof, _) = ExpressionProof::prove(
            &ctx,
            &mut Transcript::new(b"t"),
            &c,
            &secret,
            None,
            &mut rand::thread_rng(),
        )
        .unwrap();
        assert!(matches!(
            proof.verify(&ctx, &mut Transcript::new(b"t"), &c2, None),
            Err(DlrsError::ProofVerificationFailed(_))
        ));
    }
}
