//! Diffusion pseudotime (Haghverdi et al. 2016, Nature Methods 13:845-848).
//!
//! The accumulated transition matrix `M = sum_{t>=1} P^t` has the closed form
//! `sum_k lambda_k / (1 - lambda_k) psi_k psi_k'` over the non-stationary eigenpairs,
//! so the DPT distance of a cell to the root is a weighted Euclidean distance in
//! diffusion component space.

use crate::diffusion::{DiffusionMap, UNIT_EIGENVALUE_TOL};
use anyhow::{bail, ensure, format_err, Error};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use traj_types::{CellMetadata, Pseudotime};

/// How the root cell of the trajectory is chosen
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSpec {
    /// cell index, in matrix column order
    Cell(usize),
    /// cell id
    CellId(String),
    /// the extreme cell of a stage on the first diffusion component
    Stage(String),
    /// as `Stage`, for the earliest stage of the vocabulary that has cells
    #[default]
    EarliestStage,
}

fn stage_root(dmap: &DiffusionMap, cells: &[usize], stage: &str) -> Result<usize, Error> {
    ensure!(!cells.is_empty(), "no cell has stage '{}'", stage);
    ensure!(dmap.n_components() >= 1, "diffusion map has no components");
    let dc1 = dmap.components.column(0);

    let overall = dc1.mean().unwrap_or(0.0);
    let in_stage = cells.iter().map(|&c| dc1[c]).sum::<f64>() / cells.len() as f64;

    // the stage sits at one end of DC1: take its outermost cell at that end
    let low_end = in_stage <= overall;
    let mut best = cells[0];
    for &c in &cells[1..] {
        let better = if low_end { dc1[c] < dc1[best] } else { dc1[c] > dc1[best] };
        if better {
            best = c;
        }
    }
    Ok(best)
}

/// Resolve `spec` to a cell index.
pub fn resolve_root(spec: &RootSpec, dmap: &DiffusionMap, metadata: &CellMetadata) -> Result<usize, Error> {
    let n = dmap.n_cells();
    ensure!(
        metadata.len() == n,
        "metadata has {} cells but the diffusion map has {}",
        metadata.len(),
        n
    );
    let stages = metadata.stages();

    let root = match spec {
        RootSpec::Cell(c) => {
            if *c >= n {
                bail!("root cell {} out of range for {} cells", c, n);
            }
            *c
        }
        RootSpec::CellId(id) => metadata
            .cells()
            .iter()
            .position(|c| c == id)
            .ok_or_else(|| format_err!("root cell '{}' is not in the dataset", id))?,
        RootSpec::Stage(stage) => {
            let cells = stages
                .cells_in_stage(stage)
                .ok_or_else(|| format_err!("root stage '{}' is not in the stage vocabulary", stage))?;
            stage_root(dmap, &cells, stage)?
        }
        RootSpec::EarliestStage => {
            let vocabulary = stages.vocabulary();
            let counts = stages.counts();
            let earliest = counts
                .iter()
                .position(|&c| c > 0)
                .ok_or_else(|| format_err!("no cell carries a stage label"))?;
            let stage = &vocabulary.levels()[earliest];
            let cells = stages.cells_in_stage(stage).unwrap_or_default();
            stage_root(dmap, &cells, stage)?
        }
    };
    info!("root cell {} ('{}', stage {})", root, metadata.cells()[root], stages.stage_of(root));
    Ok(root)
}

/// Diffusion pseudotime of every cell relative to `root`.
///
/// Cells outside the root's connected component of the kernel graph are undefined.
pub fn dpt(dmap: &DiffusionMap, root: usize) -> Result<Pseudotime, Error> {
    let n = dmap.n_cells();
    ensure!(root < n, "root cell {} out of range for {} cells", root, n);

    // weight of each component in the accumulated transition matrix
    let weights: Vec<(usize, f64)> = dmap
        .eigenvalues
        .iter()
        .enumerate()
        .filter(|&(_, &l)| l < 1.0 - UNIT_EIGENVALUE_TOL)
        .map(|(k, &l)| (k, l / (1.0 - l)))
        .collect();
    if weights.len() < dmap.n_components() {
        warn!(
            "{} diffusion components with eigenvalue 1 are left out of the pseudotime",
            dmap.n_components() - weights.len()
        );
    }
    ensure!(
        !weights.is_empty(),
        "the diffusion map has no component with eigenvalue below 1 ({:?}), so no cell can be ordered",
        dmap.degeneracy
    );

    let psi = &dmap.components;
    let root_component = dmap.connected_components[root];
    let values: Vec<Option<f64>> = (0..n)
        .map(|i| {
            if dmap.connected_components[i] != root_component {
                return None;
            }
            let ss: f64 = weights
                .iter()
                .map(|&(k, w)| {
                    let d = w * (psi[[i, k]] - psi[[root, k]]);
                    d * d
                })
                .sum();
            Some(ss.sqrt())
        })
        .collect();

    // components living on other parts of the graph are zero here up to rounding
    let reachable = values.iter().filter(|v| v.is_some()).count();
    if reachable > 1 && values.iter().flatten().all(|&v| v < 1e-9) {
        bail!(
            "none of the {} kept diffusion components varies over the {} cells connected to the root; \
             more components are needed",
            weights.len(),
            reachable
        );
    }

    let pseudotime = Pseudotime::new(values);
    if pseudotime.n_defined() < n {
        warn!(
            "{} of {} cells are not connected to the root and have no diffusion pseudotime",
            n - pseudotime.n_defined(),
            n
        );
    }
    Ok(pseudotime)
}
