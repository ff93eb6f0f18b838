//! Randomized range-finder SVD
//!
//! Sketches the column space with a seeded uniform [-1, 1] test matrix,
//! sharpens it with QR-stabilized power iterations, then solves the small
//! projected problem exactly.

use super::{exact_svd, Matrix, SvdTriplets};
use crate::error::{DlrsError, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn orthonormal_basis(y: Matrix) -> Matrix {
    y.qr().q()
}

pub(super) fn randomized_svd(
    k: &Matrix,
    rank: usize,
    oversample: usize,
    power_iterations: usize,
    seed: u64,
) -> Result<SvdTriplets> {
    let (m, n) = k.shape();
    let full = m.min(n);
    if rank == 0 || rank > full {
        return Err(DlrsError::RankUnattainable(format!(
            "rank {} not in 1..={}",
            rank, full
        )));
    }
    let sketch = (rank + oversample).min(full);

    let mut rng = StdRng::seed_from_u64(seed);
    let omega = DMatrix::from_fn(n, sketch, |_, _| rng.gen_range(-1.0..1.0));

    let mut q = orthonormal_basis(k * &omega);
    for _ in 0..power_iterations {
        let z = orthonormal_basis(k.transpose() * &q);
        q = orthonormal_basis(k * &z);
    }

    let projected = q.transpose() * k;
    let small = exact_svd(&projected)?;

    Ok(SvdTriplets {
        u: &q * small.u,
        s: small.s,
        v: small.v,
    })
}
