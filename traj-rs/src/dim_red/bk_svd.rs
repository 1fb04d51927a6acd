#![allow(non_snake_case)]

use super::full_svd::FullSvd;
use super::{check_dims, sorted_svd, to_dmatrix, truncate, Pca, PcaResult};
use anyhow::Error;
use log::debug;
use nalgebra::DMatrix;
use ndarray::ArrayView2;
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_pcg::Pcg64;

/// Based on the "Randomized Block Krylov Methods for Stronger and Faster Approximate
/// Singular Value Decomposition", by Cameron and Christopher Musco, NIPS 2015
/// <https://papers.nips.cc/paper/5735-randomized-block-krylov-methods-for-stronger-and-faster-approximate-singular-value-decomposition.pdf>

/// Settings for Block Krylov SVD
#[derive(Clone, Debug)]
pub struct BkSvd {
    /// Multiple of the requested k to use as block size in randomized projections,
    /// must be >= 1.0
    pub k_multiplier: f64,

    /// Number of power iteration to perform
    pub n_iter: usize,

    /// Seed of the random starting block
    pub seed: u64,
}

impl BkSvd {
    /// Create a new BkSvd with default settings.
    pub fn new() -> BkSvd {
        BkSvd {
            k_multiplier: 2.0,
            n_iter: 5,
            seed: 0,
        }
    }
}

impl Default for BkSvd {
    fn default() -> Self {
        Self::new()
    }
}

impl Pca for BkSvd {
    fn run_pca(&self, matrix: &ArrayView2<f64>, k: usize) -> Result<PcaResult, Error> {
        let bsize = (k as f64 * self.k_multiplier.max(1.0)).ceil() as usize;
        svd_bk(matrix, k, bsize, self.n_iter.max(1), self.seed)
    }
}

/// Perform an SVD of matrix `A`, making a rank `k` approximation. Use blocks of `b`
/// random projections and `n_iter` power iterations.
pub fn svd_bk(A: &ArrayView2<f64>, k: usize, b: usize, n_iter: usize, seed: u64) -> Result<PcaResult, Error> {
    let (m, n) = A.dim();
    check_dims(m, n, k)?;

    if m < n {
        let (U, S, V) = svd_bk(&A.t(), k, b, n_iter, seed)?;
        return Ok((V, S, U));
    }

    // m >= n from here on
    let b = b.max(k).min(n);
    if b * n_iter >= n {
        debug!("Krylov space of {} columns spans all {} columns, using exact SVD", b * n_iter, n);
        return FullSvd.run_pca(A, k);
    }

    let A = to_dmatrix(A);
    let At = A.transpose();
    let mut rng = Pcg64::seed_from_u64(seed);
    let unif = Uniform::new(-1.0, 1.0);

    let mut B = DMatrix::from_fn(n, b, |_, _| unif.sample(&mut rng));
    let mut K = DMatrix::<f64>::zeros(n, b * n_iter);
    for i in 0..n_iter {
        B = (&At * (&A * &B)).qr().q();
        K.view_mut((0, i * b), (n, b)).copy_from(&B);
    }
    let Q = K.qr().q();

    let (U, sigma, Va) = sorted_svd(&A * &Q)?;
    let V = &Q * Va;
    Ok(truncate(&U, &sigma, &V, k))
}
