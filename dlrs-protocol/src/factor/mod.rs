//! Low-rank factorization engine
//!
//! Every entity in DLRS is represented by K ≈ U · diag(σ) · Vᵀ where
//! U = capability basis (m × r), σ = strengths, V = domain projection (n × r).
//! Factorization is pure: the input matrix is never modified.

mod randomized;

use crate::error::{DlrsError, Result};
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub type Matrix = DMatrix<f64>;

/// What the factorization has to achieve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FactorTarget {
    /// Exactly this rank
    Rank(usize),
    /// Smallest rank whose Frobenius reconstruction error is within the tolerance
    Tolerance(f64),
    /// Smallest rank up to `max_rank` within the tolerance
    Bounded { max_rank: usize, tolerance: f64 },
}

/// Numerical method used to obtain the singular triplets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Full SVD, truncated
    Exact,
    /// Randomized range finder; reproducible for a fixed `seed`
    Randomized {
        oversample: usize,
        power_iterations: usize,
        seed: u64,
    },
}

/// The factor triple (U, σ, V) of a low-rank approximation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowRankFactorSet {
    /// Capability basis vectors (m × r)
    pub u: DMatrix<f64>,
    /// Capability strengths (diagonal of Σ, length r)
    pub sigma: DVector<f64>,
    /// Domain projections (n × r)
    pub v: DMatrix<f64>,
    pub rank: usize,
    pub m: usize,
    pub n: usize,
}

impl LowRankFactorSet {
    /// Assemble a factor set from raw factors, checking shapes and r ≤ min(m, n)
    pub fn new(u: DMatrix<f64>, sigma: DVector<f64>, v: DMatrix<f64>) -> Result<Self> {
        let rank = sigma.len();
        let m = u.nrows();
        let n = v.nrows();
        if rank == 0 {
            return Err(DlrsError::InvalidInput("factor set must have rank >= 1".into()));
        }
        if u.ncols() != rank || v.ncols() != rank {
            return Err(DlrsError::InvalidInput(format!(
                "U has {} columns and V has {} columns, expected rank {}",
                u.ncols(),
                v.ncols(),
                rank
            )));
        }
        if rank > m.min(n) {
            return Err(DlrsError::RankUnattainable(format!(
                "rank {} exceeds min({}, {})",
                rank, m, n
            )));
        }
        let finite = u.iter().chain(sigma.iter()).chain(v.iter()).all(|x| x.is_finite());
        if !finite {
            return Err(DlrsError::InvalidInput("factor entries must be finite".into()));
        }
        Ok(Self { u, sigma, v, rank, m, n })
    }

    /// Truncated exact SVD at (at most) the given rank
    pub fn from_matrix(k: &Matrix, target_rank: usize) -> Result<Self> {
        let r = target_rank.min(k.nrows().min(k.ncols()));
        factorize(k, FactorTarget::Rank(r), &Method::Exact)
    }

    /// Reconstruct the approximate matrix K ≈ U · diag(σ) · Vᵀ
    pub fn reconstruct(&self) -> Matrix {
        let sigma_mat = DMatrix::from_diagonal(&self.sigma);
        &self.u * sigma_mat * self.v.transpose()
    }

    /// Frobenius norm of K − UΣVᵀ
    pub fn reconstruction_error(&self, original: &Matrix) -> f64 {
        (original - self.reconstruct()).norm()
    }

    /// Compression ratio: original_params / low_rank_params
    pub fn compression_ratio(&self) -> f64 {
        let original = (self.m * self.n) as f64;
        let compressed = ((self.m + self.n) * self.rank + self.rank) as f64;
        original / compressed
    }

    /// e = V · σ, the image every capability challenge is evaluated against
    pub fn expression_vector(&self) -> DVector<f64> {
        &self.v * &self.sigma
    }

    /// |Σᵢ σᵢ (Vᵀd)ᵢ|: capability in the direction of a domain vector
    pub fn capability_in_domain(&self, domain_vector: &DVector<f64>) -> Result<f64> {
        if domain_vector.len() != self.n {
            return Err(DlrsError::InvalidInput(format!(
                "domain vector has length {}, expected {}",
                domain_vector.len(),
                self.n
            )));
        }
        let projection = self.v.transpose() * domain_vector;
        let weighted: f64 = projection
            .iter()
            .zip(self.sigma.iter())
            .map(|(p, s)| p * s)
            .sum();
        Ok(weighted.abs())
    }

    /// Merge two factor sets by re-factorizing K_a + K_b at the combined (capped) rank
    pub fn merge(a: &Self, b: &Self) -> Result<Self> {
        ensure_same_shape(a, b)?;
        let combined = a.reconstruct() + b.reconstruct();
        let target_rank = (a.rank + b.rank).min(a.m.min(a.n));
        factorize(&combined, FactorTarget::Rank(target_rank), &Method::Exact)
    }

    /// Exact composite [U_a | U_b], diag(σ_a, σ_b), [V_a | V_b], representing K_a + K_b
    pub fn concat(a: &Self, b: &Self) -> Result<Self> {
        ensure_same_shape(a, b)?;
        let ra = a.rank;
        let rank = a.rank + b.rank;
        let u = DMatrix::from_fn(a.m, rank, |row, col| {
            if col < ra {
                a.u[(row, col)]
            } else {
                b.u[(row, col - ra)]
            }
        });
        let v = DMatrix::from_fn(a.n, rank, |row, col| {
            if col < ra {
                a.v[(row, col)]
            } else {
                b.v[(row, col - ra)]
            }
        });
        let sigma = DVector::from_fn(rank, |i, _| {
            if i < ra {
                a.sigma[i]
            } else {
                b.sigma[i - ra]
            }
        });
        Self::new(u, sigma, v)
    }
}

fn ensure_same_shape(a: &LowRankFactorSet, b: &LowRankFactorSet) -> Result<()> {
    if a.m != b.m || a.n != b.n {
        return Err(DlrsError::InvalidInput(format!(
            "shape mismatch: {}x{} vs {}x{}",
            a.m, a.n, b.m, b.n
        )));
    }
    Ok(())
}

/// Singular triplets sorted by decreasing singular value
pub(crate) struct SvdTriplets {
    pub u: Matrix,
    pub s: DVector<f64>,
    pub v: Matrix,
}

impl SvdTriplets {
    fn len(&self) -> usize {
        self.s.len()
    }

    fn truncate(&self, r: usize) -> Result<LowRankFactorSet> {
        LowRankFactorSet::new(
            self.u.columns(0, r).into_owned(),
            self.s.rows(0, r).into_owned(),
            self.v.columns(0, r).into_owned(),
        )
    }

    /// Flip each singular pair so its V column sums to a non-negative value;
    /// U·diag(σ)·Vᵀ is unchanged
    fn fix_signs(&mut self) {
        for i in 0..self.len() {
            if self.v.column(i).sum() < 0.0 {
                self.u.column_mut(i).neg_mut();
                self.v.column_mut(i).neg_mut();
            }
        }
    }

    /// Smallest rank whose discarded singular values stay within `eps`
    fn tail_rank(&self, eps: f64) -> usize {
        let mut tail: f64 = self.s.iter().map(|s| s * s).sum();
        for r in 0..self.len() {
            if tail.max(0.0).sqrt() <= eps {
                return r.max(1);
            }
            tail -= self.s[r] * self.s[r];
        }
        self.len().max(1)
    }
}

pub(crate) fn exact_svd(k: &Matrix) -> Result<SvdTriplets> {
    let svd = k.clone().svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| DlrsError::RankUnattainable("SVD did not produce U".into()))?;
    let v = svd
        .v_t
        .ok_or_else(|| DlrsError::RankUnattainable("SVD did not produce Vt".into()))?
        .transpose();
    let s = svd.singular_values;

    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[b].partial_cmp(&s[a]).unwrap_or(Ordering::Equal));

    Ok(SvdTriplets {
        u: DMatrix::from_fn(u.nrows(), order.len(), |row, col| u[(row, order[col])]),
        s: DVector::from_fn(order.len(), |i, _| s[order[i]]),
        v: DMatrix::from_fn(v.nrows(), order.len(), |row, col| v[(row, order[col])]),
    })
}

fn validate_matrix(k: &Matrix) -> Result<()> {
    if k.nrows() == 0 || k.ncols() == 0 {
        return Err(DlrsError::InvalidInput("matrix must be non-empty".into()));
    }
    if k.iter().any(|x| !x.is_finite()) {
        return Err(DlrsError::InvalidInput("matrix entries must be finite".into()));
    }
    Ok(())
}

fn validate_tolerance(eps: f64) -> Result<f64> {
    if !eps.is_finite() || eps < 0.0 {
        return Err(DlrsError::InvalidInput(format!("invalid tolerance {}", eps)));
    }
    Ok(eps)
}

/// Factorize `k` to meet `target` using `method`
///
/// With a tolerance, the returned factor set's actual reconstruction error is
/// checked against it; if no admissible rank reaches it the call fails with
/// `RankUnattainable`.
pub fn factorize(k: &Matrix, target: FactorTarget, method: &Method) -> Result<LowRankFactorSet> {
    validate_matrix(k)?;
    let full = k.nrows().min(k.ncols());

    let (max_rank, tolerance) = match target {
        FactorTarget::Rank(r) => {
            if r == 0 || r > full {
                return Err(DlrsError::RankUnattainable(format!(
                    "rank {} not in 1..={} for a {}x{} matrix",
                    r,
                    full,
                    k.nrows(),
                    k.ncols()
                )));
            }
            (r, None)
        }
        FactorTarget::Tolerance(eps) => (full, Some(validate_tolerance(eps)?)),
        FactorTarget::Bounded { max_rank, tolerance } => {
            if max_rank == 0 {
                return Err(DlrsError::InvalidInput("max_rank must be at least 1".into()));
            }
            (max_rank.min(full), Some(validate_tolerance(tolerance)?))
        }
    };

    let mut triplets = match method {
        Method::Exact => exact_svd(k)?,
        Method::Randomized {
            oversample,
            power_iterations,
            seed,
        } => randomized::randomized_svd(k, max_rank, *oversample, *power_iterations, *seed)?,
    };
    triplets.fix_signs();

    let available = triplets.len().min(max_rank);
    let Some(eps) = tolerance else {
        return triplets.truncate(available);
    };

    let mut best = f64::INFINITY;
    for r in triplets.tail_rank(eps).min(available)..=available {
        let factors = triplets.truncate(r)?;
        let error = factors.reconstruction_error(k);
        if error <= eps {
            debug!(
                "Factorized {}x{} at rank {} (error {:.3e} <= {:.3e})",
                k.nrows(),
                k.ncols(),
                r,
                error,
                eps
            );
            return Ok(factors);
        }
        best = best.min(error);
    }
    Err(DlrsError::RankUnattainable(format!(
        "no rank <= {} reaches tolerance {:.3e} (best error {:.3e})",
        available, eps, best
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_like(n: usize) -> Matrix {
        // one dominant direction plus a faint diagonal
        DMatrix::from_fn(n, n, |r, c| 1.0 + if r == c { 1e-4 } else { 0.0 })
    }

    #[test]
    fn test_factorize_and_reconstruct() {
        let k = DMatrix::new_random(10, 8);
        let f = factorize(&k, FactorTarget::Rank(3), &Method::Exact).unwrap();
        assert_eq!((f.rank, f.m, f.n), (3, 10, 8));

        let full = factorize(&k, FactorTarget::Rank(8), &Method::Exact).unwrap();
        assert!(full.reconstruction_error(&k) < 1e-10, "Full rank error should be ~0");
    }

    #[test]
    fn test_identity_like_tolerance_gives_rank_one() {
        let k = identity_like(10);
        let f = factorize(&k, FactorTarget::Tolerance(0.01), &Method::Exact).unwrap();
        assert_eq!(f.rank, 1);
        assert!(f.reconstruction_error(&k) <= 0.01);
        assert!(f.sigma[0] > 9.9);
    }

    #[test]
    fn test_singular_values_sorted() {
        let k = DMatrix::new_random(12, 9);
        let f = factorize(&k, FactorTarget::Rank(9), &Method::Exact).unwrap();
        for i in 1..f.rank {
            assert!(f.sigma[i - 1] >= f.sigma[i]);
        }
    }

    #[test]
    fn test_rank_unattainable() {
        let k = DMatrix::new_random(6, 4);
        assert!(matches!(
            factorize(&k, FactorTarget::Rank(5), &Method::Exact),
            Err(DlrsError::RankUnattainable(_))
        ));
        assert!(matches!(
            factorize(&k, FactorTarget::Rank(0), &Method::Exact),
            Err(DlrsError::RankUnattainable(_))
        ));
        // a generic random matrix needs its full rank to get within 1e-6
        assert!(matches!(
            factorize(
                &k,
                FactorTarget::Bounded { max_rank: 2, tolerance: 1e-6 },
                &Method::Exact
            ),
            Err(DlrsError::RankUnattainable(_))
        ));
    }

    #[test]
    fn test_tolerance_bound_holds() {
        let k = DMatrix::new_random(15, 12);
        for eps in [2.0, 1.0, 0.5, 0.1] {
            match factorize(&k, FactorTarget::Tolerance(eps), &Method::Exact) {
                Ok(f) => assert!(f.reconstruction_error(&k) <= eps),
                Err(e) => assert!(matches!(e, DlrsError::RankUnattainable(_))),
            }
        }
    }

    #[test]
    fn test_input_validation() {
        let empty = DMatrix::<f64>::zeros(0, 3);
        assert!(matches!(
            factorize(&empty, FactorTarget::Rank(1), &Method::Exact),
            Err(DlrsError::InvalidInput(_))
        ));
        let mut k = DMatrix::new_random(3, 3);
        k[(1, 1)] = f64::NAN;
        assert!(factorize(&k, FactorTarget::Rank(1), &Method::Exact).is_err());
        let k = DMatrix::new_random(3, 3);
        assert!(matches!(
            factorize(&k, FactorTarget::Tolerance(-1.0), &Method::Exact),
            Err(DlrsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_does_not_mutate_input() {
        let k = DMatrix::new_random(7, 5);
        let before = k.clone();
        let _ = factorize(&k, FactorTarget::Rank(2), &Method::Exact).unwrap();
        assert_eq!(k, before);
    }

    #[test]
    fn test_compression_ratio() {
        let k = DMatrix::new_random(200, 100);
        let f = LowRankFactorSet::from_matrix(&k, 4).unwrap();
        assert!(f.compression_ratio() > 10.0, "Should achieve significant compression");
    }

    #[test]
    fn test_capability_matches_expression_vector() {
        let k = DMatrix::new_random(6, 5);
        let f = LowRankFactorSet::from_matrix(&k, 3).unwrap();
        let d = DVector::new_random(5);
        let via_expression = f.expression_vector().dot(&d).abs();
        assert!((f.capability_in_domain(&d).unwrap() - via_expression).abs() < 1e-12);
        assert!(f.capability_in_domain(&DVector::new_random(4)).is_err());
    }

    #[test]
    fn test_merge_caps_rank() {
        let a = LowRankFactorSet::from_matrix(&DMatrix::new_random(10, 8), 3).unwrap();
        let b = LowRankFactorSet::from_matrix(&DMatrix::new_random(10, 8), 3).unwrap();
        let merged = LowRankFactorSet::merge(&a, &b).unwrap();
        assert!(merged.rank <= 6);
    }

    #[test]
    fn test_concat_is_exact_sum() {
        let a = LowRankFactorSet::from_matrix(&DMatrix::new_random(8, 6), 2).unwrap();
        let b = LowRankFactorSet::from_matrix(&DMatrix::new_random(8, 6), 3).unwrap();
        let c = LowRankFactorSet::concat(&a, &b).unwrap();
        assert_eq!(c.rank, 5);
        let diff = c.reconstruct() - (a.reconstruct() + b.reconstruct());
        assert!(diff.norm() < 1e-12);

        let too_big = LowRankFactorSet::from_matrix(&DMatrix::new_random(8, 6), 4).unwrap();
        assert!(matches!(
            LowRankFactorSet::concat(&b, &too_big),
            Err(DlrsError::RankUnattainable(_))
        ));
    }
}
