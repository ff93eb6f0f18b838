//! Fiat–Shamir transcript over SHA-512
//!
//! Every append is labeled and length-prefixed. A challenge hashes the
//! current state and is absorbed back, so later challenges depend on it.

use super::group::canonical_bytes;
use ark_bn254::{Fr, G1Affine};
use ark_ff::PrimeField;
use sha2::{Digest, Sha512};

#[derive(Clone)]
pub struct Transcript {
    hasher: Sha512,
}

impl Transcript {
    pub fn new(label: &[u8]) -> Self {
        let mut t = Self {
            hasher: Sha512::new(),
        };
        t.append_message(b"dlrs-transcript", label);
        t
    }

    pub fn append_message(&mut self, label: &[u8], bytes: &[u8]) {
        self.hasher.update((label.len() as u64).to_le_bytes());
        self.hasher.update(label);
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub fn append_u64(&mut self, label: &[u8], value: u64) {
        self.append_message(label, &value.to_le_bytes());
    }

    pub fn append_point(&mut self, label: &[u8], point: &G1Affine) {
        self.append_message(label, &canonical_bytes(point));
    }

    pub fn append_points(&mut self, label: &[u8], points: &[G1Affine]) {
        self.append_u64(label, points.len() as u64);
        for p in points {
            self.append_point(label, p);
        }
    }

    pub fn append_scalar(&mut self, label: &[u8], scalar: &Fr) {
        self.append_message(label, &canonical_bytes(scalar));
    }

    pub fn append_scalars(&mut self, label: &[u8], scalars: &[Fr]) {
        self.append_u64(label, scalars.len() as u64);
        for s in scalars {
            self.append_scalar(label, s);
        }
    }

    pub fn challenge_scalar(&mut self, label: &[u8]) -> Fr {
        self.append_message(b"challenge", label);
        let output = self.hasher.clone().finalize();
        self.hasher.update(output);
        Fr::from_le_bytes_mod_order(&output)
    }

    /// Independent branch that shares everything absorbed so far
    pub fn fork(&self, label: &[u8]) -> Self {
        let mut t = self.clone();
        t.append_message(b"fork", label);
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenges_are_deterministic() {
        let mut a = Transcript::new(b"test");
        let mut b = Transcript::new(b"test");
        a.append_u64(b"x", 7);
        b.append_u64(b"x", 7);
        assert_eq!(a.challenge_scalar(b"c"), b.challenge_scalar(b"c"));
        // absorbed challenge changes the next one
        assert_ne!(a.challenge_scalar(b"c"), Transcript::new(b"test").challenge_scalar(b"c"));
    }

    #[test]
    fn test_forks_diverge() {
        let base = Transcript::new(b"test");
        let mut left = base.fork(b"left");
        let mut right = base.fork(b"right");
        assert_ne!(left.challenge_scalar(b"c"), right.challenge_scalar(b"c"));
    }
}
