use crate::dist::smoother_f_test;
use crate::loess::Loess;
use crate::stat::Statistics;
use anyhow::{ensure, Error};
use log::{info, warn};
use ndarray::Axis;
use rayon::prelude::*;
use std::cmp::Ordering;
use traj_types::{ExpressionMatrix, Pseudotime};

/// Minimum number of cells with a defined pseudotime for a scan to run
pub const MIN_CELLS: usize = 3;

/// Association of one gene's expression with pseudotime.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneTrend {
    /// gene name
    pub gene: String,
    /// row of the gene in the scanned matrix
    pub gene_index: usize,
    /// raw p-value of the F test; NaN when the gene could not be tested
    pub p_value: f64,
    /// F statistic of the smooth against the intercept-only fit
    pub f_statistic: f64,
    /// equivalent degrees of freedom of the smoother
    pub edf: f64,
    /// number of cells that entered the test
    pub n_cells: usize,
}

/// Rows of the `n` genes with the largest variance across cells, largest first.
/// Ties keep gene order. `n` larger than the number of genes selects all of them.
pub fn top_variable_genes(matrix: &ExpressionMatrix, n: usize) -> Vec<usize> {
    let values = matrix.values();
    let variances: Vec<f64> = values
        .axis_iter(Axis(0))
        .map(|row| row.to_vec().var(1.0))
        .collect();

    let mut order: Vec<usize> = (0..variances.len()).collect();
    order.sort_by(|&a, &b| variances[b].total_cmp(&variances[a]));
    order.truncate(n);
    order
}

/// p-values ascending, NaN last, ties by gene order
fn by_p_value(a: &GeneTrend, b: &GeneTrend) -> Ordering {
    match (a.p_value.is_nan(), b.p_value.is_nan()) {
        (false, false) => a
            .p_value
            .partial_cmp(&b.p_value)
            .unwrap_or(Ordering::Equal)
            .then(a.gene_index.cmp(&b.gene_index)),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => a.gene_index.cmp(&b.gene_index),
    }
}

/// Test every gene of `matrix` for a trend along `pseudotime` with a LOESS smoother,
/// and return the genes ranked by p-value.
///
/// Cells whose pseudotime is undefined are left out. The p-values are raw: no
/// multiple-testing correction is applied.
pub fn gene_trend_scan(
    matrix: &ExpressionMatrix,
    pseudotime: &Pseudotime,
    loess: &Loess,
) -> Result<Vec<GeneTrend>, Error> {
    ensure!(
        pseudotime.len() == matrix.n_cells(),
        "pseudotime covers {} cells but the expression matrix '{}' has {}",
        pseudotime.len(),
        matrix.name,
        matrix.n_cells()
    );

    let cells = pseudotime.defined_indices();
    ensure!(
        cells.len() >= MIN_CELLS,
        "only {} cells have a defined pseudotime, at least {} are needed for a trend test",
        cells.len(),
        MIN_CELLS
    );
    if cells.len() < matrix.n_cells() {
        warn!(
            "{} of {} cells have no pseudotime and are left out of the trend test",
            matrix.n_cells() - cells.len(),
            matrix.n_cells()
        );
    }

    let t: Vec<f64> = cells.iter().filter_map(|&c| pseudotime.get(c)).collect();
    let smoother = loess.smoother(&t)?;
    info!(
        "testing {} genes over {} cells, loess span {} degree {}, edf {:.2}",
        matrix.n_genes(),
        cells.len(),
        loess.span,
        loess.degree,
        smoother.edf()
    );

    let values = matrix.values();
    let mut trends = (0..matrix.n_genes())
        .into_par_iter()
        .map(|g| {
            let row = values.row(g);
            let y: Vec<f64> = cells.iter().map(|&c| row[c]).collect();
            let mean = y.mean();
            let rss0 = y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>();
            let fit = smoother.fit(&y)?;
            let test = smoother_f_test(rss0, fit.rss, fit.edf, y.len())?;
            Ok(GeneTrend {
                gene: matrix.genes()[g].clone(),
                gene_index: g,
                p_value: test.p_value,
                f_statistic: test.f_statistic,
                edf: fit.edf,
                n_cells: y.len(),
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    trends.sort_by(by_p_value);
    Ok(trends)
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array2;

    /// 64-bit LCG, uniform in [-0.5, 0.5)
    fn lcg_noise(n: usize, seed: u64) -> Vec<f64> {
        let mut s = seed;
        (0..n)
            .map(|_| {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (s >> 11) as f64 / (1u64 << 53) as f64 - 0.5
            })
            .collect()
    }

    fn matrix(rows: Vec<Vec<f64>>) -> ExpressionMatrix {
        let n_genes = rows.len();
        let n_cells = rows[0].len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        ExpressionMatrix::new(
            "test",
            (0..n_genes).map(|g| format!("gene{g}")).collect(),
            (0..n_cells).map(|c| format!("cell{c}")).collect(),
            Array2::from_shape_vec((n_genes, n_cells), flat).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_top_variable_genes() {
        let m = matrix(vec![
            vec![1.0, 1.0, 1.0, 1.0],
            vec![0.0, 4.0, 0.0, 4.0],
            vec![0.0, 1.0, 0.0, 1.0],
            vec![4.0, 0.0, 4.0, 0.0],
        ]);
        assert_eq!(top_variable_genes(&m, 2), vec![1, 3]);
        assert_eq!(top_variable_genes(&m, 10), vec![1, 3, 2, 0]);
        assert!(top_variable_genes(&m, 0).is_empty());
    }

    #[test]
    fn test_trend_and_noise() {
        let n = 40;
        let t: Vec<f64> = (0..n).map(|i| i as f64 / (n - 1) as f64).collect();
        let noise = lcg_noise(n, 42);
        let flat: Vec<f64> = noise.iter().map(|e| 1.0 + e).collect();
        let trend: Vec<f64> = t.iter().zip(&noise).map(|(a, e)| 2.0 * a + 0.2 * e).collect();
        let constant = vec![3.0; n];
        let m = matrix(vec![flat, constant, trend]);

        let trends = gene_trend_scan(&m, &Pseudotime::from_values(&t), &Loess::default()).unwrap();
        let names: Vec<&str> = trends.iter().map(|t| t.gene.as_str()).collect();
        assert_eq!(names, vec!["gene2", "gene0", "gene1"]);

        assert!(trends[0].p_value < 1e-20);
        assert!(trends[1].p_value > 0.1);
        assert_eq!(trends[2].p_value, 1.0);
        assert!(trends.iter().all(|t| t.n_cells == n));
        assert!((trends[0].edf - 4.25186591109773).abs() < 1e-8);
    }

    #[test]
    fn test_local_linear_tracks_a_slope() {
        // a local mean is biased at both ends of a straight line, a local line is not
        let n = 40;
        let t: Vec<f64> = (0..n).map(|i| i as f64 / (n - 1) as f64).collect();
        let y: Vec<f64> = t
            .iter()
            .zip(lcg_noise(n, 7))
            .map(|(a, e)| 3.0 * a - 1.0 + 1e-3 * e)
            .collect();
        let m = matrix(vec![y]);
        let pt = Pseudotime::from_values(&t);

        let linear = gene_trend_scan(&m, &pt, &Loess::new(0.5, 1).unwrap()).unwrap();
        let mean = gene_trend_scan(&m, &pt, &Loess::new(0.5, 0).unwrap()).unwrap();
        assert!((linear[0].edf - 4.25186591109773).abs() < 1e-8);
        assert!((mean[0].edf - 3.3227318096499965).abs() < 1e-8);
        assert!(linear[0].p_value < 1e-100);
        assert!(mean[0].p_value > 1e-40);
        assert!(linear[0].f_statistic > 1000.0 * mean[0].f_statistic);
    }

    #[test]
    fn test_undefined_cells_are_excluded() {
        let n = 30;
        let t: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y: Vec<f64> = t.iter().map(|v| v * 0.5).collect();
        // the gene is wildly off in the cells without pseudotime
        let mut corrupted = y.clone();
        corrupted[3] = 1000.0;
        corrupted[17] = -1000.0;
        let m = matrix(vec![corrupted]);

        let mut pt: Vec<Option<f64>> = t.iter().map(|&v| Some(v)).collect();
        pt[3] = None;
        pt[17] = None;
        let trends = gene_trend_scan(&m, &Pseudotime::new(pt), &Loess::default()).unwrap();
        assert_eq!(trends[0].n_cells, n - 2);
        assert!(trends[0].p_value < 1e-12);
    }

    #[test]
    fn test_scan_errors() {
        let m = matrix(vec![vec![1.0, 2.0, 3.0, 4.0]]);
        assert!(gene_trend_scan(&m, &Pseudotime::from_values(&[0.0, 1.0, 2.0]), &Loess::default()).is_err());

        let sparse = Pseudotime::new(vec![Some(0.0), None, None, Some(1.0)]);
        assert!(gene_trend_scan(&m, &sparse, &Loess::default()).is_err());
    }

    #[test]
    fn test_untestable_sorts_last() {
        let a = GeneTrend {
            gene: "a".into(),
            gene_index: 0,
            p_value: f64::NAN,
            f_statistic: f64::NAN,
            edf: 1.0,
            n_cells: 3,
        };
        let b = GeneTrend {
            gene: "b".into(),
            gene_index: 1,
            p_value: 0.5,
            ..a.clone()
        };
        let c = GeneTrend {
            gene: "c".into(),
            gene_index: 2,
            p_value: 0.5,
            ..a.clone()
        };
        let mut v = vec![a, c, b];
        v.sort_by(by_p_value);
        let names: Vec<&str> = v.iter().map(|t| t.gene.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }
}
