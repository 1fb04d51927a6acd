use super::{check_dims, sorted_svd, to_dmatrix, truncate, Pca, PcaResult};
use anyhow::Error;
use ndarray::ArrayView2;

/// Exact SVD of the whole matrix, truncated to the requested rank.
/// Cost grows with the full matrix size; preferred for small inputs and as a reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct FullSvd;

impl Pca for FullSvd {
    fn run_pca(&self, matrix: &ArrayView2<f64>, k: usize) -> Result<PcaResult, Error> {
        let (m, n) = matrix.dim();
        check_dims(m, n, k)?;
        let (u, s, v) = sorted_svd(to_dmatrix(matrix))?;
        Ok(truncate(&u, &s, &v, k))
    }
}
