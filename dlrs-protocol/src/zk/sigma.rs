//! Σ-protocol building blocks
//!
//! Every predicate is assembled from four non-interactive proofs over Pedersen
//! commitments, all made non-interactive with the shared [`Transcript`]:
//!
//! - [`MulProof`]: C = a·B + s·H for a committed `a`
//! - [`BitProof`]: a commitment opens to 0 or 1 (CDS OR-composition)
//! - [`RangeProof`]: a commitment opens to a value in [0, 2^L)
//! - [`LinkProof`]: a weighted cross term is formed from committed values

use super::group::{msm, normalize, random_scalar, ZkContext};
use super::transcript::Transcript;
use crate::error::{DlrsError, Result};
use ark_bn254::{Fr, G1Affine, G1Projective};
use ark_ff::{One, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::Rng;

/// Proof that `C = a·B + s·H` where `A = a·G + r_a·H`
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct MulProof {
    t_a: G1Affine,
    t_c: G1Affine,
    z_a: Fr,
    z_ra: Fr,
    z_s: Fr,
}

fn bind_mul(
    tr: &mut Transcript,
    (a, b, c): (&G1Affine, &G1Affine, &G1Affine),
    t_a: &G1Affine,
    t_c: &G1Affine,
) -> Fr {
    tr.append_point(b"mul-a", a);
    tr.append_point(b"mul-b", b);
    tr.append_point(b"mul-c", c);
    tr.append_point(b"mul-ta", t_a);
    tr.append_point(b"mul-tc", t_c);
    tr.challenge_scalar(b"mul")
}

impl MulProof {
    #[allow(clippy::too_many_arguments)]
    pub fn prove<R: Rng + ?Sized>(
        ctx: &ZkContext,
        tr: &mut Transcript,
        (a_com, b_com, c_com): (&G1Affine, &G1Affine, &G1Affine),
        a: &Fr,
        r_a: &Fr,
        s: &Fr,
        rng: &mut R,
    ) -> Self {
        let alpha = random_scalar(rng);
        let beta = random_scalar(rng);
        let gamma = random_scalar(rng);
        let t = normalize(&[
            ctx.commit(&alpha, &beta),
            *b_com * alpha + ctx.gens.h * gamma,
        ]);
        let e = bind_mul(tr, (a_com, b_com, c_com), &t[0], &t[1]);
        Self {
            t_a: t[0],
            t_c: t[1],
            z_a: alpha + e * a,
            z_ra: beta + e * r_a,
            z_s: gamma + e * s,
        }
    }

    pub fn verify(
        &self,
        ctx: &ZkContext,
        tr: &mut Transcript,
        (a_com, b_com, c_com): (&G1Affine, &G1Affine, &G1Affine),
    ) -> bool {
        let e = bind_mul(tr, (a_com, b_com, c_com), &self.t_a, &self.t_c);
        ctx.commit(&self.z_a, &self.z_ra) == *a_com * e + self.t_a
            && *b_com * self.z_a + ctx.gens.h * self.z_s == *c_com * e + self.t_c
    }
}

/// OR-proof that a commitment opens to 0 or to 1
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct BitProof {
    e0: Fr,
    e1: Fr,
    s0: Fr,
    s1: Fr,
}

fn bit_statements(ctx: &ZkContext, commitment: &G1Affine) -> [G1Projective; 2] {
    let y0 = G1Projective::from(*commitment);
    [y0, y0 - ctx.gens.g]
}

fn bind_bit(tr: &mut Transcript, commitment: &G1Affine, t: &[G1Projective; 2]) -> Fr {
    let t = normalize(t);
    tr.append_point(b"bit", commitment);
    tr.append_point(b"bit-t0", &t[0]);
    tr.append_point(b"bit-t1", &t[1]);
    tr.challenge_scalar(b"bit")
}

impl BitProof {
    fn prove<R: Rng + ?Sized>(
        ctx: &ZkContext,
        tr: &mut Transcript,
        commitment: &G1Affine,
        bit: bool,
        blinding: &Fr,
        rng: &mut R,
    ) -> Self {
        let ys = bit_statements(ctx, commitment);
        let real = bit as usize;
        let other = 1 - real;

        let k = random_scalar(rng);
        let e_other = random_scalar(rng);
        let s_other = random_scalar(rng);
        let mut t = [G1Projective::zero(); 2];
        t[real] = ctx.gens.h * k;
        t[other] = ctx.gens.h * s_other - ys[other] * e_other;

        let e = bind_bit(tr, commitment, &t);
        let e_real = e - e_other;
        let s_real = k + e_real * blinding;

        let mut es = [Fr::zero(); 2];
        let mut ss = [Fr::zero(); 2];
        es[real] = e_real;
        ss[real] = s_real;
        es[other] = e_other;
        ss[other] = s_other;
        Self {
            e0: es[0],
            e1: es[1],
            s0: ss[0],
            s1: ss[1],
        }
    }

    fn verify(&self, ctx: &ZkContext, tr: &mut Transcript, commitment: &G1Affine) -> bool {
        let ys = bit_statements(ctx, commitment);
        let t = [
            ctx.gens.h * self.s0 - ys[0] * self.e0,
            ctx.gens.h * self.s1 - ys[1] * self.e1,
        ];
        let e = bind_bit(tr, commitment, &t);
        self.e0 + self.e1 == e
    }
}

/// Bit-decomposition proof that a commitment opens to a value in [0, 2^L)
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct RangeProof {
    bits: Vec<G1Affine>,
    proofs: Vec<BitProof>,
}

fn powers_of_two(count: usize) -> Vec<Fr> {
    let two = Fr::from(2u64);
    let mut pow = Fr::one();
    (0..count)
        .map(|_| {
            let current = pow;
            pow *= two;
            current
        })
        .collect()
}

impl RangeProof {
    pub fn prove<R: Rng + ?Sized>(
        ctx: &ZkContext,
        tr: &mut Transcript,
        commitment: &G1Affine,
        value: u128,
        blinding: &Fr,
        num_bits: u32,
        rng: &mut R,
    ) -> Result<Self> {
        if num_bits == 0 || num_bits > 128 {
            return Err(DlrsError::InvalidInput(format!(
                "range proofs support 1..=128 bits, got {}",
                num_bits
            )));
        }
        if num_bits < 128 && value >> num_bits != 0 {
            return Err(DlrsError::ProofGeneration(format!(
                "value does not fit in {} bits",
                num_bits
            )));
        }
        let count = num_bits as usize;
        let powers = powers_of_two(count);

        // r_0 absorbs the rest so that Σ 2^k B_k = C
        let mut blindings: Vec<Fr> = (0..count).map(|_| random_scalar(rng)).collect();
        let tail: Fr = blindings[1..]
            .iter()
            .zip(&powers[1..])
            .map(|(r, p)| *r * p)
            .sum();
        blindings[0] = *blinding - tail;

        let bit_values: Vec<bool> = (0..count).map(|k| (value >> k) & 1 == 1).collect();
        let points: Vec<G1Projective> = bit_values
            .iter()
            .zip(&blindings)
            .map(|(b, r)| {
                let v = if *b { Fr::one() } else { Fr::zero() };
                ctx.commit(&v, r)
            })
            .collect();
        let bits = normalize(&points);

        tr.append_point(b"range-commitment", commitment);
        tr.append_points(b"range-bits", &bits);
        let proofs = bits
            .iter()
            .zip(bit_values.iter().zip(&blindings))
            .map(|(point, (b, r))| BitProof::prove(ctx, tr, point, *b, r, rng))
            .collect();
        Ok(Self { bits, proofs })
    }

    pub fn verify(
        &self,
        ctx: &ZkContext,
        tr: &mut Transcript,
        commitment: &G1Affine,
        num_bits: u32,
    ) -> bool {
        let count = num_bits as usize;
        if count == 0 || self.bits.len() != count || self.proofs.len() != count {
            return false;
        }
        match msm(&self.bits, &powers_of_two(count)) {
            Ok(sum) if sum == G1Projective::from(*commitment) => {}
            _ => return false,
        }
        tr.append_point(b"range-commitment", commitment);
        tr.append_points(b"range-bits", &self.bits);
        self.bits
            .iter()
            .zip(&self.proofs)
            .all(|(point, proof)| proof.verify(ctx, tr, point))
    }
}

/// Public side of a weighted link
///
/// Claims knowledge of `z_j, r_j, μ` with `Z_j = z_j·G + r_j·H` for every j
/// and `S = Σ_j w_j·z_j·E_j + μ·H`.
pub struct LinkStatement<'a> {
    pub z_commitments: &'a [G1Affine],
    pub bases: &'a [G1Affine],
    pub weights: &'a [Fr],
    pub cross: &'a G1Affine,
}

impl LinkStatement<'_> {
    fn len_ok(&self) -> bool {
        self.z_commitments.len() == self.bases.len() && self.bases.len() == self.weights.len()
    }

    fn bind(&self, tr: &mut Transcript, t: &[G1Affine], t_s: &G1Affine) -> Fr {
        tr.append_points(b"link-z", self.z_commitments);
        tr.append_points(b"link-bases", self.bases);
        tr.append_scalars(b"link-weights", self.weights);
        tr.append_point(b"link-cross", self.cross);
        tr.append_points(b"link-t", t);
        tr.append_point(b"link-ts", t_s);
        tr.challenge_scalar(b"link")
    }

    fn weighted(&self, scalars: &[Fr]) -> Vec<Fr> {
        self.weights.iter().zip(scalars).map(|(w, s)| *w * s).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct LinkProof {
    t: Vec<G1Affine>,
    t_s: G1Affine,
    s: Vec<Fr>,
    u: Vec<Fr>,
    u_mu: Fr,
}

impl LinkProof {
    pub fn prove<R: Rng + ?Sized>(
        ctx: &ZkContext,
        tr: &mut Transcript,
        statement: &LinkStatement<'_>,
        z: &[Fr],
        r: &[Fr],
        mu: &Fr,
        rng: &mut R,
    ) -> Result<Self> {
        let n = statement.z_commitments.len();
        if !statement.len_ok() || z.len() != n || r.len() != n {
            return Err(DlrsError::ProofGeneration("link statement length mismatch".into()));
        }
        let alpha: Vec<Fr> = (0..n).map(|_| random_scalar(rng)).collect();
        let beta: Vec<Fr> = (0..n).map(|_| random_scalar(rng)).collect();
        let gamma = random_scalar(rng);

        let t_points: Vec<G1Projective> = alpha
            .iter()
            .zip(&beta)
            .map(|(a, b)| ctx.commit(a, b))
            .collect();
        let t = normalize(&t_points);
        let t_s = G1Affine::from(msm(statement.bases, &statement.weighted(&alpha))? + ctx.gens.h * gamma);

        let e = statement.bind(tr, &t, &t_s);
        let s = alpha.iter().zip(z).map(|(a, z)| *a + e * z).collect();
        let u = beta.iter().zip(r).map(|(b, r)| *b + e * r).collect();
        Ok(Self {
            t,
            t_s,
            s,
            u,
            u_mu: gamma + e * mu,
        })
    }

    pub fn verify(&self, ctx: &ZkContext, tr: &mut Transcript, statement: &LinkStatement<'_>) -> bool {
        let n = statement.z_commitments.len();
        if !statement.len_ok() || self.t.len() != n || self.s.len() != n || self.u.len() != n {
            return false;
        }
        let e = statement.bind(tr, &self.t, &self.t_s);
        let openings_hold = (0..n).all(|j| {
            ctx.commit(&self.s[j], &self.u[j]) == statement.z_commitments[j] * e + self.t[j]
        });
        if !openings_hold {
            return false;
        }
        match msm(statement.bases, &statement.weighted(&self.s)) {
            Ok(lhs) => lhs + ctx.gens.h * self.u_mu == *statement.cross * e + self.t_s,
            Err(_) => false,
        }
    }
}
