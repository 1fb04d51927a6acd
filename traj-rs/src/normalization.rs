use crate::stats::median;
use anyhow::{bail, Context, Error};
use log::info;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use traj_types::ExpressionMatrix;

/// Normalization scheme for a genes x cells count matrix
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Normalization {
    /// Values are already log-scale expression and are used as given
    #[default]
    #[serde(rename = "none")]
    None,
    /// vanilla log 2, `x -> log2(1 + x)` with no library size scaling
    #[serde(rename = "log2")]
    LogTransform,
    /// Cell Ranger style log normalization. Cell count totals are scaled to the median
    /// and the transformation `x -> log2(1 + x)` is applied
    #[serde(rename = "cellranger")]
    CellRanger,
    /// Seurat style log normalization. Cell count totals are scaled
    /// to 10,000 and the transformation `x -> ln(1 + x)` is applied
    #[serde(rename = "seuratlog")]
    SeuratLog,
}

impl FromStr for Normalization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Normalization::None),
            "log2" => Ok(Normalization::LogTransform),
            "cellranger" => Ok(Normalization::CellRanger),
            "seuratlog" => Ok(Normalization::SeuratLog),
            _ => bail!("Normalization not recognized: {}", s),
        }
    }
}

/// Base of logarithm used by log_normalize
#[derive(Clone, Copy, Debug)]
pub enum LogBase {
    /// ln
    E,
    /// log2
    Two,
}

impl LogBase {
    fn log1p(self, x: f64) -> f64 {
        match self {
            LogBase::E => x.ln_1p(),
            LogBase::Two => x.ln_1p() / std::f64::consts::LN_2,
        }
    }
}

/// Normalize the counts of `matrix` with the scheme `norm`.
pub fn normalize(matrix: &ExpressionMatrix, norm: Normalization) -> Result<ExpressionMatrix, Error> {
    let values = match norm {
        Normalization::None => {
            matrix
                .check_log_expression()
                .context("values are used as log expression without normalization")?;
            return Ok(matrix.clone());
        }
        Normalization::LogTransform => log_normalize(matrix.values(), Some(1.0), LogBase::Two, false)?,
        Normalization::CellRanger => log_normalize(matrix.values(), None, LogBase::Two, true)?,
        Normalization::SeuratLog => log_normalize(matrix.values(), Some(10_000_f64), LogBase::E, true)?,
    };
    matrix.with_values(values)
}

/// Log-normalize a genes x cells count matrix:
/// 1. if `scale_cells`, scale each column (cell) to have the same total count given by
///    `count_sum`. If `count_sum` is `None`, use the median total count.
///    Cells with no counts are left at zero
/// 2. Apply a transform `x -> log_b(1 + x)`, with `b` specified by `log_base`
pub fn log_normalize(
    counts: ArrayView2<f64>,
    count_sum: Option<f64>,
    log_base: LogBase,
    scale_cells: bool,
) -> Result<Array2<f64>, Error> {
    if let Some(((g, c), v)) = counts.indexed_iter().find(|(_, &v)| v < 0.0) {
        bail!("negative count {} at gene {}, cell {}: log normalization needs counts", v, g, c);
    }

    if !scale_cells {
        return Ok(counts.mapv(|x| log_base.log1p(x)));
    }

    let totals = counts.sum_axis(Axis(0));
    let target = match count_sum {
        Some(s) => s,
        None => median(&totals.to_vec())?,
    };
    if target <= 0.0 {
        bail!("cannot scale cells to a total count of {}", target);
    }
    info!("scaling cells to a total count of {}", target);

    let factors = totals.mapv(|t| if t > 0.0 { target / t } else { 0.0 });
    let mut out = counts.to_owned();
    for (mut col, f) in out.axis_iter_mut(Axis(1)).zip(factors.iter()) {
        col.mapv_inplace(|x| log_base.log1p(x * f));
    }
    Ok(out)
}

/// Center each column (gene) of a cells x genes matrix to mean 0, and if `scale` also
/// divide by its standard deviation. Columns with zero variance are only centered.
pub fn center_and_scale(cells_by_genes: ArrayView2<f64>, scale: bool) -> Array2<f64> {
    let n = cells_by_genes.nrows().max(1) as f64;
    let means = cells_by_genes.sum_axis(Axis(0)) / n;
    let mut out = &cells_by_genes - &means;
    if scale {
        let sd = out.mapv(|x| x * x).sum_axis(Axis(0)).mapv_into(|ss| {
            let sd = (ss / n).sqrt();
            if sd > 0.0 {
                sd
            } else {
                1.0
            }
        });
        out /= &sd;
    }
    out
}
