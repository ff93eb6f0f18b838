//! Group, generators and fixed-point encoding
//!
//! All commitments live in BN254 G1. Real factor entries are embedded in the
//! scalar field as fixed-point integers `round(x · 2^F)`; products of encoded
//! values carry the sum of their scales.

use crate::config::CryptoParams;
use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use ark_bn254::{Fq, Fr, G1Affine, G1Projective};
use ark_ec::{AffineRepr, CurveGroup, VariableBaseMSM};
use ark_ff::{PrimeField, Zero};
use ark_serialize::CanonicalSerialize;
use ark_std::UniformRand;
use rand::Rng;
use sha2::{Digest as _, Sha256};

/// Largest magnitude accepted by the fixed-point encoder
const MAX_ENCODED: f64 = 4_611_686_018_427_387_904.0; // 2^62

/// Pedersen bases; nobody knows log_G H
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generators {
    pub g: G1Affine,
    pub h: G1Affine,
}

impl Generators {
    pub fn derive(tag: &str) -> Self {
        Self {
            g: hash_to_curve(format!("{}/G", tag).as_bytes()),
            h: hash_to_curve(format!("{}/H", tag).as_bytes()),
        }
    }
}

/// Try-and-increment hash to G1
pub fn hash_to_curve(tag: &[u8]) -> G1Affine {
    let mut counter: u64 = 0;
    loop {
        let digest = Sha256::new()
            .chain_update(tag)
            .chain_update(counter.to_le_bytes())
            .finalize();
        let x = Fq::from_le_bytes_mod_order(&digest);
        if let Some(point) = G1Affine::get_point_from_x_unchecked(x, true) {
            let point = point.clear_cofactor();
            if !point.is_zero() {
                return point;
            }
        }
        counter += 1;
    }
}

/// Parameters plus the generators derived from them, shared by every prover and verifier
#[derive(Debug, Clone)]
pub struct ZkContext {
    pub params: CryptoParams,
    pub gens: Generators,
    fingerprint: Digest,
}

impl ZkContext {
    pub fn new(params: CryptoParams) -> Result<Self> {
        params.validate()?;
        let gens = Generators::derive(&params.generator_tag);
        let fingerprint = params.fingerprint();
        Ok(Self {
            params,
            gens,
            fingerprint,
        })
    }

    pub fn fingerprint(&self) -> Digest {
        self.fingerprint
    }

    pub fn fixed_point_bits(&self) -> u32 {
        self.params.fixed_point_bits
    }

    /// Encode at `levels` multiples of the fixed-point scale
    pub fn encode(&self, x: f64, levels: u32) -> Result<Fr> {
        encode_fixed(x, self.params.fixed_point_bits * levels)
    }

    /// Decode a value carrying `levels` multiples of the fixed-point scale
    pub fn decode(&self, x: &Fr, levels: u32) -> f64 {
        fr_to_f64(x, self.params.fixed_point_bits * levels)
    }

    /// x·G + r·H
    pub fn commit(&self, value: &Fr, blinding: &Fr) -> G1Projective {
        self.gens.g * value + self.gens.h * blinding
    }
}

/// Encode a real number as `round(x · 2^bits)` in the scalar field
pub fn encode_fixed(x: f64, bits: u32) -> Result<Fr> {
    let scaled = (x * 2f64.powi(bits as i32)).round();
    if !scaled.is_finite() || scaled.abs() >= MAX_ENCODED {
        return Err(DlrsError::InvalidInput(format!(
            "value {} does not fit the fixed-point encoding at {} bits",
            x, bits
        )));
    }
    Ok(fr_from_i128(scaled as i128))
}

pub fn fr_from_i128(x: i128) -> Fr {
    if x >= 0 {
        Fr::from(x as u128)
    } else {
        -Fr::from(x.unsigned_abs())
    }
}

/// Interpret a field element as a signed integer scaled by 2^-bits
pub fn fr_to_f64(x: &Fr, scale_bits: u32) -> f64 {
    let value = x.into_bigint();
    let (negative, magnitude) = if value > Fr::MODULUS_MINUS_ONE_DIV_TWO {
        (true, (-*x).into_bigint())
    } else {
        (false, value)
    };
    let limb_base = 2f64.powi(64);
    let float = magnitude
        .0
        .iter()
        .rev()
        .fold(0.0f64, |acc, limb| acc * limb_base + *limb as f64)
        / 2f64.powi(scale_bits as i32);
    if negative {
        -float
    } else {
        float
    }
}

/// Field element as an unsigned integer, if it fits in 128 bits
pub fn fr_to_u128(x: &Fr) -> Option<u128> {
    let limbs = x.into_bigint().0;
    if limbs[2] != 0 || limbs[3] != 0 {
        return None;
    }
    Some(((limbs[1] as u128) << 64) | limbs[0] as u128)
}

pub fn random_scalar<R: Rng + ?Sized>(rng: &mut R) -> Fr {
    Fr::rand(rng)
}

pub fn inner_product(a: &[Fr], b: &[Fr]) -> Fr {
    a.iter().zip(b).map(|(x, y)| *x * y).sum()
}

/// Σ scalars[i] · bases[i]; lengths must agree
pub fn msm(bases: &[G1Affine], scalars: &[Fr]) -> Result<G1Projective> {
    if bases.len() != scalars.len() {
        return Err(DlrsError::InvalidInput(format!(
            "msm with {} bases and {} scalars",
            bases.len(),
            scalars.len()
        )));
    }
    if bases.is_empty() {
        return Ok(G1Projective::zero());
    }
    Ok(G1Projective::msm_unchecked(bases, scalars))
}

pub fn normalize(points: &[G1Projective]) -> Vec<G1Affine> {
    G1Projective::normalize_batch(points)
}

/// Compressed canonical bytes of any arkworks value
pub fn canonical_bytes<T: CanonicalSerialize>(value: &T) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.compressed_size());
    value
        .serialize_compressed(&mut bytes)
        .expect("serializing into a Vec cannot fail");
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::One;

    #[test]
    fn test_generators_deterministic_and_distinct() {
        let a = Generators::derive("dlrs/pedersen/v1");
        let b = Generators::derive("dlrs/pedersen/v1");
        assert_eq!(a, b);
        assert_ne!(a.g, a.h);
        assert!(a.g.is_on_curve() && a.h.is_on_curve());
        assert_ne!(Generators::derive("other").g, a.g);
    }

    #[test]
    fn test_fixed_point_signed_decode() {
        for x in [0.0, 1.5, -2.25, 1234.0625, -0.000015] {
            let encoded = encode_fixed(x, 16).unwrap();
            let decoded = fr_to_f64(&encoded, 16);
            assert!((decoded - x).abs() <= 2f64.powi(-16), "{} vs {}", x, decoded);
        }
        assert_eq!(fr_to_f64(&-Fr::one(), 0), -1.0);
    }

    #[test]
    fn test_encoding_rejects_out_of_range() {
        assert!(encode_fixed(f64::NAN, 16).is_err());
        assert!(encode_fixed(f64::INFINITY, 16).is_err());
        assert!(encode_fixed(1e30, 16).is_err());
    }

    #[test]
    fn test_u128_conversion() {
        assert_eq!(fr_to_u128(&Fr::from(42u64)), Some(42));
        assert_eq!(fr_to_u128(&Fr::from(u128::MAX)), Some(u128::MAX));
        assert_eq!(fr_to_u128(&-Fr::one()), None);
    }

    #[test]
    fn test_commit_is_homomorphic() {
        let ctx = ZkContext::new(CryptoParams::default()).unwrap();
        let mut rng = rand::thread_rng();
        let (a, ra, b, rb) = (
            random_scalar(&mut rng),
            random_scalar(&mut rng),
            random_scalar(&mut rng),
            random_scalar(&mut rng),
        );
        let sum = ctx.commit(&a, &ra) + ctx.commit(&b, &rb);
        assert_eq!(sum, ctx.commit(&(a + b), &(ra + rb)));
    }
}
