//! Diffusion maps.
//!
//! Cells are connected by a Gaussian affinity kernel. The kernel is (optionally)
//! density normalized and turned into a Markov transition matrix `P = D^-1 A`. The
//! spectrum of `P` is taken from the symmetric conjugate `S = D^1/2 P D^-1/2`, so the
//! eigenvalues are real. The leading pair (eigenvalue 1, constant eigenvector) is the
//! stationary state and is not part of the embedding. A graph with several connected
//! components has one such pair per component, and all of them are left out.
//!
//! References:
//! * Coifman & Lafon (2006), Diffusion maps. Appl. Comput. Harmon. Anal. 21:5-30
//! * Haghverdi, Buettner & Theis (2015), Diffusion maps for high-dimensional single-cell
//!   analysis of differentiation data. Bioinformatics 31:2989-2998

use crate::stats::median;
use anyhow::{bail, ensure, Error};
use log::{info, warn};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

/// Off-diagonal affinity above which the kernel is considered saturated
pub const SATURATION: f64 = 0.99;

/// Eigenvalues this close to 1 belong to stationary states
pub const UNIT_EIGENVALUE_TOL: f64 = 1e-9;

/// Width of the Gaussian kernel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bandwidth {
    /// One global sigma
    Fixed(f64),
    /// Per-cell sigma: the distance of each cell to its `k`-th nearest neighbour
    Local {
        /// neighbour rank
        k: usize,
    },
    /// One global sigma: the median over cells of the distance to the `k`-th nearest neighbour
    Auto {
        /// neighbour rank
        k: usize,
    },
}

impl Default for Bandwidth {
    fn default() -> Self {
        Bandwidth::Auto { k: 5 }
    }
}

/// Parameters of the diffusion map
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionParams {
    /// number of non-trivial components to keep
    pub n_components: usize,
    /// kernel width
    pub bandwidth: Bandwidth,
    /// density normalization exponent; 0 keeps the plain Gaussian kernel, 1 removes
    /// the influence of sampling density (Laplace-Beltrami normalization)
    pub alpha: f64,
    /// restrict the kernel to the symmetrized k-nearest-neighbour graph
    pub knn: Option<usize>,
    /// affinities below this value are set to 0
    pub min_affinity: f64,
}

impl Default for DiffusionParams {
    fn default() -> Self {
        DiffusionParams {
            n_components: 10,
            bandwidth: Bandwidth::default(),
            alpha: 0.0,
            knn: None,
            min_affinity: 1e-10,
        }
    }
}

/// Diagnosis of a kernel that cannot produce a meaningful embedding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Degeneracy {
    /// the graph is connected and not saturated
    None,
    /// no cell has a neighbour: the bandwidth is too small
    Isolated,
    /// the graph falls into several connected components
    Disconnected {
        /// number of connected components
        n_components: usize,
    },
    /// every pair of cells has affinity close to 1: the bandwidth is too large
    Saturated,
}

/// A diffusion map of a set of cells
#[derive(Clone, Debug)]
pub struct DiffusionMap {
    /// row-stochastic transition matrix
    pub transition: Array2<f64>,
    /// the full spectrum of the transition matrix, decreasing; the first value is the
    /// stationary eigenvalue 1
    pub spectrum: Array1<f64>,
    /// eigenvalues of the kept components, decreasing
    pub eigenvalues: Array1<f64>,
    /// cells x components right eigenvectors of the transition matrix
    pub components: Array2<f64>,
    /// connected component of each cell in the kernel graph
    pub connected_components: Vec<usize>,
    /// kernel width of each cell
    pub sigmas: Array1<f64>,
    /// kernel diagnosis
    pub degeneracy: Degeneracy,
}

impl DiffusionMap {
    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.transition.nrows()
    }

    /// Number of kept components
    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Number of connected components of the kernel graph
    pub fn n_connected_components(&self) -> usize {
        self.connected_components.iter().max().map_or(0, |&c| c + 1)
    }
}

fn squared_distances(points: &ArrayView2<f64>) -> Array2<f64> {
    let n = points.nrows();
    let mut d2 = Array2::<f64>::zeros((n, n));
    Zip::indexed(&mut d2).par_for_each(|(i, j), d| {
        *d = points
            .row(i)
            .iter()
            .zip(points.row(j).iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
    });
    d2
}

/// Other cells ordered by distance to `i`, ties by index
fn neighbours_by_distance(d2: &Array2<f64>, i: usize) -> Vec<usize> {
    let row = d2.row(i);
    let mut others: Vec<usize> = (0..row.len()).filter(|&j| j != i).collect();
    others.sort_by(|&a, &b| row[a].total_cmp(&row[b]).then(a.cmp(&b)));
    others
}

/// Distance of every cell to its `k`-th nearest neighbour
fn kth_neighbour_distances(d2: &Array2<f64>, k: usize) -> Result<Array1<f64>, Error> {
    let n = d2.nrows();
    ensure!(
        k >= 1 && k < n,
        "neighbour rank {} must be between 1 and {} for {} cells",
        k,
        n - 1,
        n
    );
    Ok((0..n)
        .map(|i| {
            let nb = neighbours_by_distance(d2, i);
            d2[[i, nb[k - 1]]].sqrt()
        })
        .collect())
}

fn check_sigma(sigma: f64) -> Result<f64, Error> {
    if !sigma.is_finite() || sigma <= 0.0 {
        bail!("kernel bandwidth must be positive and finite, got {}", sigma);
    }
    Ok(sigma)
}

/// Gaussian affinities and the per-cell sigmas they were built with
fn affinities(d2: &Array2<f64>, bandwidth: Bandwidth) -> Result<(Array2<f64>, Array1<f64>), Error> {
    let n = d2.nrows();
    let sigmas = match bandwidth {
        Bandwidth::Fixed(sigma) => Array1::from_elem(n, check_sigma(sigma)?),
        Bandwidth::Auto { k } => {
            let kth = kth_neighbour_distances(d2, k)?;
            let sigma = median(&kth.to_vec())?;
            info!("bandwidth from the median distance to the neighbour of rank {}: {}", k, sigma);
            Array1::from_elem(n, check_sigma(sigma)?)
        }
        Bandwidth::Local { k } => {
            // coincident cells would get a zero width
            kth_neighbour_distances(d2, k)?.mapv_into(|s| s.max(f64::EPSILON))
        }
    };

    let mut a = Array2::<f64>::zeros((n, n));
    match bandwidth {
        Bandwidth::Local { .. } => {
            Zip::indexed(&mut a).and(d2).par_for_each(|(i, j), a, &d| {
                let (si, sj) = (sigmas[i], sigmas[j]);
                let ss = si * si + sj * sj;
                *a = (2.0 * si * sj / ss).sqrt() * (-d / ss).exp();
            });
        }
        Bandwidth::Fixed(_) | Bandwidth::Auto { .. } => {
            let s2 = sigmas[0] * sigmas[0];
            Zip::from(&mut a).and(d2).par_for_each(|a, &d| *a = (-d / s2).exp());
        }
    }
    Ok((a, sigmas))
}

/// Keep only edges between cells that are among each other's `k` nearest neighbours
/// (in either direction).
fn restrict_to_knn(a: &mut Array2<f64>, d2: &Array2<f64>, k: usize) -> Result<(), Error> {
    let n = a.nrows();
    ensure!(k >= 1, "the neighbour graph needs k >= 1");
    let mut keep = Array2::from_elem((n, n), false);
    for i in 0..n {
        keep[[i, i]] = true;
        for j in neighbours_by_distance(d2, i).into_iter().take(k) {
            keep[[i, j]] = true;
            keep[[j, i]] = true;
        }
    }
    Zip::from(a).and(&keep).for_each(|a, &k| {
        if !k {
            *a = 0.0;
        }
    });
    Ok(())
}

/// Connected components of the graph with an edge wherever `a` is positive,
/// labelled 0.. in order of first appearance.
fn connected_components(a: &Array2<f64>) -> Vec<usize> {
    let n = a.nrows();
    let mut uf = UnionFind::<usize>::new(n);
    for ((i, j), &v) in a.indexed_iter() {
        if i < j && v > 0.0 {
            uf.union(i, j);
        }
    }

    let roots = uf.into_labeling();
    let mut compact = vec![usize::MAX; n];
    let mut next = 0;
    roots
        .into_iter()
        .map(|r| {
            if compact[r] == usize::MAX {
                compact[r] = next;
                next += 1;
            }
            compact[r]
        })
        .collect()
}

fn diagnose(a: &Array2<f64>, labels: &[usize]) -> Degeneracy {
    let n = a.nrows();
    let n_components = labels.iter().max().map_or(0, |&c| c + 1);
    if n_components == n {
        return Degeneracy::Isolated;
    }
    if n_components > 1 {
        return Degeneracy::Disconnected { n_components };
    }
    let saturated = a.indexed_iter().all(|((i, j), &v)| i == j || v >= SATURATION);
    if saturated {
        Degeneracy::Saturated
    } else {
        Degeneracy::None
    }
}

/// Compute the diffusion map of the rows of `points` (cells x features).
pub fn diffusion_map(points: ArrayView2<f64>, params: &DiffusionParams) -> Result<DiffusionMap, Error> {
    let (n, n_features) = points.dim();
    ensure!(n >= 2, "a diffusion map needs at least 2 cells, got {}", n);
    ensure!(n_features >= 1, "cells have no features");
    ensure!(params.n_components >= 1, "at least one diffusion component is needed");
    ensure!(
        params.alpha.is_finite() && params.alpha >= 0.0,
        "density normalization exponent must be >= 0, got {}",
        params.alpha
    );
    if let Some(((i, j), v)) = points.indexed_iter().find(|(_, v)| !v.is_finite()) {
        bail!("non-finite feature {} for cell {} (feature {})", v, i, j);
    }
    info!(
        "diffusion map of {} cells x {} features, {:.1} MB per cell x cell matrix",
        n,
        n_features,
        (n * n * std::mem::size_of::<f64>()) as f64 / 1e6
    );

    let d2 = squared_distances(&points);
    let (mut a, sigmas) = affinities(&d2, params.bandwidth)?;
    let min_affinity = params.min_affinity;
    a.indexed_iter_mut().for_each(|((i, j), v)| {
        if i != j && *v < min_affinity {
            *v = 0.0;
        }
    });
    if let Some(k) = params.knn {
        restrict_to_knn(&mut a, &d2, k)?;
    }

    let labels = connected_components(&a);
    let degeneracy = diagnose(&a, &labels);
    match degeneracy {
        Degeneracy::None => (),
        Degeneracy::Isolated => warn!("kernel bandwidth too small: every cell is disconnected from all others"),
        Degeneracy::Disconnected { n_components } => warn!(
            "kernel graph has {} connected components; pseudotime is undefined across components",
            n_components
        ),
        Degeneracy::Saturated => warn!("kernel bandwidth too large: all cells are near-equally connected"),
    }

    // density normalization, A_ij / (q_i q_j)^alpha
    if params.alpha > 0.0 {
        let q = a.sum_axis(Axis(1)).mapv(|x| x.powf(-params.alpha));
        Zip::indexed(&mut a).for_each(|(i, j), v| *v *= q[i] * q[j]);
    }

    // rows always have their diagonal, so degrees are positive
    let degree = a.sum_axis(Axis(1));
    let transition = &a / &degree.view().insert_axis(Axis(1));

    let inv_sqrt = degree.mapv(|d| 1.0 / d.sqrt());
    let sym = DMatrix::from_fn(n, n, |i, j| {
        let v = a[[i, j]] * inv_sqrt[i] * inv_sqrt[j];
        // symmetric by construction; average away rounding
        let w = a[[j, i]] * inv_sqrt[j] * inv_sqrt[i];
        0.5 * (v + w)
    });
    let eigen = sym.symmetric_eigen();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| eigen.eigenvalues[y].total_cmp(&eigen.eigenvalues[x]).then(x.cmp(&y)));
    let spectrum: Array1<f64> = order.iter().map(|&o| eigen.eigenvalues[o].clamp(-1.0, 1.0)).collect();

    // each connected component contributes one stationary pair (eigenvalue 1,
    // psi constant on the component); none of them is part of the embedding
    let n_stationary = labels.iter().max().map_or(1, |&c| c + 1);
    let available = n - n_stationary;
    let mut k = params.n_components;
    if k > available {
        warn!(
            "{} diffusion components requested but {} cells in {} connected components only have {}",
            k, n, n_stationary, available
        );
        k = available;
    }

    let mut components = Array2::<f64>::zeros((n, k));
    for (c, &o) in order.iter().skip(n_stationary).take(k).enumerate() {
        let mut col = components.column_mut(c);
        for i in 0..n {
            col[i] = eigen.eigenvectors[(i, o)] * inv_sqrt[i];
        }
        let largest = col.iter().fold(0.0f64, |m, &x| if x.abs() > m.abs() { x } else { m });
        if largest < 0.0 {
            col.mapv_inplace(|x| -x);
        }
    }
    let eigenvalues = spectrum.slice(ndarray::s![n_stationary..n_stationary + k]).to_owned();
    info!("leading diffusion eigenvalues: {}", eigenvalues);

    Ok(DiffusionMap {
        transition,
        spectrum,
        eigenvalues,
        components,
        connected_components: labels,
        sigmas,
        degeneracy,
    })
}
