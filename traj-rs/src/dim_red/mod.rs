#![allow(non_snake_case)]

//! PCA of the centered cells x genes expression matrix.
//!
//! Every SVD method implements the `Pca` trait and returns `(U, S, V)` for a
//! rank-`k` approximation `A ~ U diag(S) V'`, singular values in decreasing order.
//! The dense factorizations underneath are done by `nalgebra`; the inputs and
//! outputs stay `ndarray` arrays.

use crate::normalization::center_and_scale;
use anyhow::{ensure, format_err, Error};
use log::info;
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use traj_types::{ExpressionMatrix, Pseudotime};

/// Block Krylov SVD method
pub mod bk_svd;

/// Exact SVD method
pub mod full_svd;

#[cfg(test)]
pub(crate) mod test;

type PcaResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// Perform a SVD of a `matrix`, retaining `k` principal components.
/// This trait always performs the pure SVD of the matrix. Special cases of SVD
/// such as PCA can be achieved by the appropriate shifts and scaling of `matrix`
pub trait Pca {
    /// Compute a rank `k` PCA for `matrix`
    fn run_pca(&self, matrix: &ArrayView2<f64>, k: usize) -> Result<PcaResult, Error>;
}

/// Choice of SVD method, as named in configuration files
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcaMethod {
    /// exact SVD
    #[serde(rename = "full")]
    Full,
    /// randomized block Krylov SVD with default settings
    #[default]
    #[serde(rename = "bk")]
    BkSvd,
}

impl FromStr for PcaMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(PcaMethod::Full),
            "bk" => Ok(PcaMethod::BkSvd),
            _ => Err(format_err!("PCA method not recognized: {}", s)),
        }
    }
}

impl Pca for PcaMethod {
    fn run_pca(&self, matrix: &ArrayView2<f64>, k: usize) -> Result<PcaResult, Error> {
        match self {
            PcaMethod::Full => full_svd::FullSvd.run_pca(matrix, k),
            PcaMethod::BkSvd => bk_svd::BkSvd::new().run_pca(matrix, k),
        }
    }
}

pub(crate) fn check_dims(m: usize, n: usize, k: usize) -> Result<(), Error> {
    ensure!(m >= 2 && n >= 2, "The input matrix must be at least 2x2.");
    ensure!(
        k >= 1 && k <= m.min(n),
        "cannot compute {} components of a {} x {} matrix",
        k,
        m,
        n
    );
    Ok(())
}

pub(crate) fn to_dmatrix(a: &ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// SVD with singular values sorted in decreasing order: `U` is m x r, `V` is n x r,
/// r = min(m, n).
pub(crate) fn sorted_svd(a: DMatrix<f64>) -> Result<(DMatrix<f64>, Vec<f64>, DMatrix<f64>), Error> {
    let svd = a
        .try_svd(true, true, f64::EPSILON, 0)
        .ok_or_else(|| format_err!("SVD did not converge"))?;
    let u = svd.u.ok_or_else(|| format_err!("SVD returned no left singular vectors"))?;
    let v_t = svd.v_t.ok_or_else(|| format_err!("SVD returned no right singular vectors"))?;
    let s = svd.singular_values;

    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

    let U = DMatrix::from_fn(u.nrows(), order.len(), |i, j| u[(i, order[j])]);
    let V = DMatrix::from_fn(v_t.ncols(), order.len(), |i, j| v_t[(order[j], i)]);
    let S = order.iter().map(|&j| s[j]).collect();
    Ok((U, S, V))
}

/// Leading `k` triplets as ndarray arrays
pub(crate) fn truncate(U: &DMatrix<f64>, S: &[f64], V: &DMatrix<f64>, k: usize) -> PcaResult {
    (
        Array2::from_shape_fn((U.nrows(), k), |(i, j)| U[(i, j)]),
        Array1::from_iter(S[..k].iter().copied()),
        Array2::from_shape_fn((V.nrows(), k), |(i, j)| V[(i, j)]),
    )
}

/// Flip each singular vector pair so that the largest-magnitude entry of `v` is positive.
pub(crate) fn orient_components(u: &mut Array2<f64>, v: &mut Array2<f64>) {
    for j in 0..v.ncols() {
        let mut col = v.column_mut(j);
        let largest = col.iter().fold(0.0f64, |acc, &x| if x.abs() > acc.abs() { x } else { acc });
        if largest < 0.0 {
            col.mapv_inplace(|x| -x);
            u.column_mut(j).mapv_inplace(|x| -x);
        }
    }
}

/// Principal components of a set of cells.
#[derive(Clone, Debug)]
pub struct PcaEmbedding {
    /// cells x k coordinates, `U * S`
    pub scores: Array2<f64>,
    /// genes x k loadings, unit columns
    pub loadings: Array2<f64>,
    /// singular values, decreasing
    pub singular_values: Array1<f64>,
    /// fraction of the total variance captured by each component
    pub variance_explained: Array1<f64>,
}

impl PcaEmbedding {
    /// Number of components
    pub fn n_components(&self) -> usize {
        self.singular_values.len()
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.scores.nrows()
    }
}

/// PCA of the cells of `matrix`, with genes centered and, if `scale`, scaled to unit variance.
pub fn pca_embedding(
    matrix: &ExpressionMatrix,
    k: usize,
    scale: bool,
    method: &impl Pca,
) -> Result<PcaEmbedding, Error> {
    let x = center_and_scale(matrix.cells_by_genes(), scale);
    let total_ss: f64 = x.iter().map(|v| v * v).sum();

    let (mut u, s, mut v) = method.run_pca(&x.view(), k)?;
    orient_components(&mut u, &mut v);

    let scores = &u * &s;
    let variance_explained = if total_ss > 0.0 {
        s.mapv(|x| x * x / total_ss)
    } else {
        Array1::zeros(s.len())
    };
    info!(
        "PCA of {} cells x {} genes, {} components explain {:.1}% of the variance",
        matrix.n_cells(),
        matrix.n_genes(),
        k,
        100.0 * variance_explained.sum()
    );

    Ok(PcaEmbedding {
        scores,
        loadings: v,
        singular_values: s,
        variance_explained,
    })
}

/// Order cells along the first principal component. Returns 1-based ordinal ranks.
/// With `orient_root`, the axis is flipped when needed so that the root cell falls in
/// the lower half of the ordering.
pub fn pca_pseudotime(embedding: &PcaEmbedding, orient_root: Option<usize>) -> Result<Pseudotime, Error> {
    ensure!(embedding.n_components() >= 1, "PCA embedding has no components");
    let pc1: Vec<f64> = embedding.scores.index_axis(Axis(1), 0).to_vec();
    let ranks = Pseudotime::from_values(&pc1).ordinal_ranks();

    let Some(root) = orient_root else {
        return Ok(ranks);
    };
    ensure!(
        root < pc1.len(),
        "root cell {} out of range for {} cells",
        root,
        pc1.len()
    );
    let rank = ranks.get(root).unwrap_or(0.0);
    if 2.0 * rank > (pc1.len() + 1) as f64 {
        Ok(Pseudotime::from_values(&pc1).reversed().ordinal_ranks())
    } else {
        Ok(ranks)
    }
}
