//! Commitment — Pedersen commitments to a low-rank factor set
//!
//! Every entry of U, σ and V is committed separately as `x·G + ρ·H`, which
//! keeps the commitment additively homomorphic per entry. The shape (m, n, r)
//! is public. Layout: U row-major (entry (k, i) at `k·r + i`), σ in order,
//! V row-major (entry (j, i) at `j·r + i`).

use super::codec::canonical_serde;
use super::group::{canonical_bytes, normalize, random_scalar, ZkContext};
use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use crate::factor::LowRankFactorSet;
use ark_bn254::{Fr, G1Affine};
use ark_ff::Zero;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Public dimensions of a committed factor set
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, CanonicalSerialize, CanonicalDeserialize,
)]
pub struct Shape {
    pub m: u32,
    pub n: u32,
    pub rank: u32,
}

impl Shape {
    pub fn of(factors: &LowRankFactorSet) -> Self {
        Self {
            m: factors.m as u32,
            n: factors.n as u32,
            rank: factors.rank as u32,
        }
    }

    pub fn m(&self) -> usize {
        self.m as usize
    }

    pub fn n(&self) -> usize {
        self.n as usize
    }

    pub fn rank(&self) -> usize {
        self.rank as usize
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} rank {}", self.m, self.n, self.rank)
    }
}

/// A binding, hiding commitment to (U, σ, V)
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Commitment {
    pub shape: Shape,
    pub u: Vec<G1Affine>,
    pub sigma: Vec<G1Affine>,
    pub v: Vec<G1Affine>,
}

canonical_serde!(Commitment);

impl Commitment {
    /// SHA-256 of the canonical encoding; doubles as the seed identifier
    pub fn root(&self) -> Digest {
        Digest::of_parts(b"dlrs/commitment", &[&canonical_bytes(self)])
    }

    pub fn u_entry(&self, k: usize, i: usize) -> G1Affine {
        self.u[k * self.shape.rank() + i]
    }

    pub fn v_entry(&self, j: usize, i: usize) -> G1Affine {
        self.v[j * self.shape.rank() + i]
    }

    /// Structural checks for commitments received from peers
    pub fn validate(&self) -> Result<()> {
        let (m, n, r) = (self.shape.m(), self.shape.n(), self.shape.rank());
        if r == 0 || r > m.min(n) {
            return Err(DlrsError::InvalidInput(format!("invalid shape {}", self.shape)));
        }
        if self.u.len() != m * r || self.sigma.len() != r || self.v.len() != n * r {
            return Err(DlrsError::InvalidInput(format!(
                "commitment vectors do not match shape {}",
                self.shape
            )));
        }
        Ok(())
    }

    /// Commitment to the composite factor set `concat(a, b)`, from public data only
    pub fn concat(a: &Self, b: &Self) -> Result<Self> {
        a.validate()?;
        b.validate()?;
        let shape = concat_shape(&a.shape, &b.shape)?;
        let (ra, rb) = (a.shape.rank(), b.shape.rank());
        Ok(Self {
            shape,
            u: interleave_rows(&a.u, ra, &b.u, rb, shape.m()),
            sigma: [a.sigma.as_slice(), b.sigma.as_slice()].concat(),
            v: interleave_rows(&a.v, ra, &b.v, rb, shape.n()),
        })
    }
}

fn concat_shape(a: &Shape, b: &Shape) -> Result<Shape> {
    if a.m != b.m || a.n != b.n {
        return Err(DlrsError::InvalidInput(format!(
            "cannot concatenate {} with {}",
            a, b
        )));
    }
    let rank = a.rank + b.rank;
    if rank > a.m.min(a.n) {
        return Err(DlrsError::RankUnattainable(format!(
            "composite rank {} exceeds min({}, {})",
            rank, a.m, a.n
        )));
    }
    Ok(Shape {
        m: a.m,
        n: a.n,
        rank,
    })
}

fn interleave_rows<T: Clone>(a: &[T], ra: usize, b: &[T], rb: usize, rows: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(rows * (ra + rb));
    for row in 0..rows {
        out.extend_from_slice(&a[row * ra..(row + 1) * ra]);
        out.extend_from_slice(&b[row * rb..(row + 1) * rb]);
    }
    out
}

/// Field elements laid out like a commitment: values or blindings
#[derive(Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct FieldFactors {
    pub u: Vec<Fr>,
    pub sigma: Vec<Fr>,
    pub v: Vec<Fr>,
}

canonical_serde!(FieldFactors);

impl FieldFactors {
    fn encode(ctx: &ZkContext, factors: &LowRankFactorSet) -> Result<Self> {
        let r = factors.rank;
        let mut u = Vec::with_capacity(factors.m * r);
        for k in 0..factors.m {
            for i in 0..r {
                u.push(ctx.encode(factors.u[(k, i)], 1)?);
            }
        }
        let sigma = factors
            .sigma
            .iter()
            .map(|s| ctx.encode(*s, 1))
            .collect::<Result<Vec<_>>>()?;
        let mut v = Vec::with_capacity(factors.n * r);
        for j in 0..factors.n {
            for i in 0..r {
                v.push(ctx.encode(factors.v[(j, i)], 1)?);
            }
        }
        Ok(Self { u, sigma, v })
    }

    fn random<R: Rng + ?Sized>(shape: &Shape, rng: &mut R) -> Self {
        let mut draw = |len: usize| (0..len).map(|_| random_scalar(&mut *rng)).collect::<Vec<_>>();
        let r = shape.rank();
        let u = draw(shape.m() * r);
        let sigma = draw(r);
        let v = draw(shape.n() * r);
        Self { u, sigma, v }
    }

    fn concat(a: &Self, ra: usize, b: &Self, rb: usize, shape: &Shape) -> Self {
        Self {
            u: interleave_rows(&a.u, ra, &b.u, rb, shape.m()),
            sigma: [a.sigma.as_slice(), b.sigma.as_slice()].concat(),
            v: interleave_rows(&a.v, ra, &b.v, rb, shape.n()),
        }
    }

    fn wipe(&mut self) {
        for x in self.u.iter_mut().chain(self.sigma.iter_mut()).chain(self.v.iter_mut()) {
            *x = Fr::zero();
        }
    }
}

fn commit_entries(ctx: &ZkContext, values: &[Fr], blindings: &[Fr]) -> Vec<G1Affine> {
    let points: Vec<_> = values
        .iter()
        .zip(blindings)
        .map(|(x, r)| ctx.commit(x, r))
        .collect();
    normalize(&points)
}

/// Owner-only opening: the exact factors plus one blinding per entry
#[derive(Clone, Serialize, Deserialize)]
pub struct OpeningSecret {
    factors: LowRankFactorSet,
    values: FieldFactors,
    blindings: FieldFactors,
    fixed_point_bits: u32,
}

impl OpeningSecret {
    pub fn factors(&self) -> &LowRankFactorSet {
        &self.factors
    }

    pub fn shape(&self) -> Shape {
        Shape::of(&self.factors)
    }

    pub fn fixed_point_bits(&self) -> u32 {
        self.fixed_point_bits
    }

    pub(crate) fn values(&self) -> &FieldFactors {
        &self.values
    }

    pub(crate) fn blindings(&self) -> &FieldFactors {
        &self.blindings
    }

    /// Opening of `Commitment::concat(a, b)`
    pub fn concat(a: &Self, b: &Self) -> Result<Self> {
        if a.fixed_point_bits != b.fixed_point_bits {
            return Err(DlrsError::InvalidOpening(
                "openings use different fixed-point scales".into(),
            ));
        }
        let shape = concat_shape(&a.shape(), &b.shape())?;
        let (ra, rb) = (a.factors.rank, b.factors.rank);
        Ok(Self {
            factors: LowRankFactorSet::concat(&a.factors, &b.factors)?,
            values: FieldFactors::concat(&a.values, ra, &b.values, rb, &shape),
            blindings: FieldFactors::concat(&a.blindings, ra, &b.blindings, rb, &shape),
            fixed_point_bits: a.fixed_point_bits,
        })
    }
}

impl fmt::Debug for OpeningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpeningSecret")
            .field("shape", &self.shape())
            .finish_non_exhaustive()
    }
}

impl Drop for OpeningSecret {
    fn drop(&mut self) {
        self.values.wipe();
        self.blindings.wipe();
    }
}

/// Commit to every entry of a factor set with fresh blindings
pub fn commit<R: Rng + ?Sized>(
    ctx: &ZkContext,
    factors: &LowRankFactorSet,
    rng: &mut R,
) -> Result<(Commitment, OpeningSecret)> {
    let shape = Shape::of(factors);
    let values = FieldFactors::encode(ctx, factors)?;
    let blindings = FieldFactors::random(&shape, rng);

    let commitment = Commitment {
        shape,
        u: commit_entries(ctx, &values.u, &blindings.u),
        sigma: commit_entries(ctx, &values.sigma, &blindings.sigma),
        v: commit_entries(ctx, &values.v, &blindings.v),
    };
    let secret = OpeningSecret {
        factors: factors.clone(),
        values,
        blindings,
        fixed_point_bits: ctx.fixed_point_bits(),
    };
    Ok((commitment, secret))
}

/// Check an opening against a commitment and return the committed factors
pub fn open(
    ctx: &ZkContext,
    commitment: &Commitment,
    secret: &OpeningSecret,
) -> Result<LowRankFactorSet> {
    if secret.fixed_point_bits != ctx.fixed_point_bits() {
        return Err(DlrsError::InvalidOpening(format!(
            "opening encoded at {} bits, context uses {}",
            secret.fixed_point_bits,
            ctx.fixed_point_bits()
        )));
    }
    if commitment.shape != secret.shape() {
        return Err(DlrsError::InvalidOpening(format!(
            "shape mismatch: commitment {}, opening {}",
            commitment.shape,
            secret.shape()
        )));
    }
    commitment
        .validate()
        .map_err(|e| DlrsError::InvalidOpening(e.to_string()))?;

    let encoded = FieldFactors::encode(ctx, &secret.factors)
        .map_err(|e| DlrsError::InvalidOpening(e.to_string()))?;
    if encoded != secret.values {
        return Err(DlrsError::InvalidOpening(
            "factor values do not match their encoding".into(),
        ));
    }

    let checks = [
        ("U", &commitment.u, &secret.values.u, &secret.blindings.u),
        ("sigma", &commitment.sigma, &secret.values.sigma, &secret.blindings.sigma),
        ("V", &commitment.v, &secret.values.v, &secret.blindings.v),
    ];
    for (name, points, values, blindings) in checks {
        if blindings.len() != values.len() {
            return Err(DlrsError::InvalidOpening(format!("{} blindings truncated", name)));
        }
        if commit_entries(ctx, values, blindings) != *points {
            return Err(DlrsError::InvalidOpening(format!(
                "{} entries do not match the commitment",
                name
            )));
        }
    }
    Ok(secret.factors.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoParams;
    use crate::factor::LowRankFactorSet;
    use nalgebra::{DMatrix, DVector};

    fn ctx() -> ZkContext {
        ZkContext::new(CryptoParams::default()).unwrap()
    }

    fn factors(m: usize, n: usize, r: usize) -> LowRankFactorSet {
        LowRankFactorSet::from_matrix(&DMatrix::new_random(m, n), r).unwrap()
    }

    #[test]
    fn test_commit_and_open() {
        let ctx = ctx();
        let f = factors(6, 5, 2);
        let (c, secret) = commit(&ctx, &f, &mut rand::thread_rng()).unwrap();
        assert_eq!(c.shape, Shape { m: 6, n: 5, rank: 2 });
        assert_eq!(c.u.len(), 12);
        assert_eq!(c.v.len(), 10);
        assert_eq!(open(&ctx, &c, &secret).unwrap(), f);
    }

    #[test]
    fn test_tampered_commitment_rejected() {
        let ctx = ctx();
        let (mut c, secret) = commit(&ctx, &factors(4, 4, 2), &mut rand::thread_rng()).unwrap();
        c.v.swap(0, 1);
        assert!(matches!(open(&ctx, &c, &secret), Err(DlrsError::InvalidOpening(_))));
    }

    #[test]
    fn test_wrong_opening_rejected() {
        let ctx = ctx();
        let mut rng = rand::thread_rng();
        let (c1, _) = commit(&ctx, &factors(4, 4, 2), &mut rng).unwrap();
        let (_, s2) = commit(&ctx, &factors(4, 4, 2), &mut rng).unwrap();
        assert!(matches!(open(&ctx, &c1, &s2), Err(DlrsError::InvalidOpening(_))));

        let (_, s3) = commit(&ctx, &factors(4, 4, 1), &mut rng).unwrap();
        assert!(matches!(open(&ctx, &c1, &s3), Err(DlrsError::InvalidOpening(_))));
    }

    #[test]
    fn test_root_survives_json() {
        let ctx = ctx();
        let (c, _) = commit(&ctx, &factors(5, 3, 2), &mut rand::thread_rng()).unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let back: Commitment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert_eq!(back.root(), c.root());
    }

    #[test]
    fn test_same_factors_commit_differently() {
        let ctx = ctx();
        let f = factors(4, 3, 1);
        let mut rng = rand::thread_rng();
        let (a, _) = commit(&ctx, &f, &mut rng).unwrap();
        let (b, _) = commit(&ctx, &f, &mut rng).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_hiding_distinguisher_is_no_better_than_chance() {
        // the adversary sees only the commitment and guesses which of two
        // known factor sets was committed
        let ctx = ctx();
        let one = DMatrix::from_element(1, 1, 1.0);
        let f0 = LowRankFactorSet::new(one.clone(), DVector::from_element(1, 1.0), one.clone())
            .unwrap();
        let f1 = LowRankFactorSet::new(one.clone(), DVector::from_element(1, 9.0), one).unwrap();
        let mut rng = rand::thread_rng();
        let trials = 200;
        let mut correct = 0;
        for _ in 0..trials {
            let b = rng.gen_bool(0.5);
            let (c, _) = commit(&ctx, if b { &f1 } else { &f0 }, &mut rng).unwrap();
            let guess = c.root().as_bytes()[0] & 1 == 1;
            if guess == b {
                correct += 1;
            }
        }
        let accuracy = correct as f64 / trials as f64;
        assert!((0.35..=0.65).contains(&accuracy), "accuracy {}", accuracy);
    }

    #[test]
    fn test_concat_opens_to_composite() {
        let ctx = ctx();
        let mut rng = rand::thread_rng();
        let (ca, sa) = commit(&ctx, &factors(6, 5, 2), &mut rng).unwrap();
        let (cb, sb) = commit(&ctx, &factors(6, 5, 1), &mut rng).unwrap();
        let c = Commitment::concat(&ca, &cb).unwrap();
        let s = OpeningSecret::concat(&sa, &sb).unwrap();
        assert_eq!(c.shape.rank, 3);
        let f = open(&ctx, &c, &s).unwrap();
        assert_eq!(f, LowRankFactorSet::concat(sa.factors(), sb.factors()).unwrap());

        let (cc, _) = commit(&ctx, &factors(6, 5, 3), &mut rng).unwrap();
        assert!(matches!(
            Commitment::concat(&c, &cc),
            Err(DlrsError::RankUnattainable(_))
        ));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let ctx = ctx();
        let (_, secret) = commit(&ctx, &factors(3, 3, 1), &mut rand::thread_rng()).unwrap();
        let printed = format!("{:?}", secret);
        assert!(printed.contains("OpeningSecret"));
        assert!(!printed.contains("sigma"));
    }
}
