//! LOESS: locally weighted polynomial regression with tricube weights.
//!
//! The fitted values are linear in the response, `y_hat = L y`, where the smoother
//! matrix `L` only depends on the predictor. [`Loess::smoother`] computes `L` once so
//! that many responses (genes) can be fitted against the same pseudotime.

use anyhow::{bail, ensure, Error};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Smoothing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Loess {
    /// Fraction of the points used in each local fit. Values above 1 widen the
    /// neighbourhood beyond the full range of the data.
    pub span: f64,
    /// Degree of the local polynomial, 0, 1 or 2.
    pub degree: usize,
}

impl Default for Loess {
    fn default() -> Self {
        Loess { span: 0.5, degree: 1 }
    }
}

/// Sparse row of the smoother matrix: (column, weight) pairs.
type SmootherRow = Vec<(usize, f64)>;

/// The smoother matrix for a fixed predictor.
#[derive(Clone, Debug)]
pub struct LoessSmoother {
    rows: Vec<SmootherRow>,
    edf: f64,
}

/// Result of smoothing one response.
#[derive(Clone, Debug, PartialEq)]
pub struct LoessFit {
    /// Fitted values, in input order
    pub fitted: Vec<f64>,
    /// Residual sum of squares
    pub rss: f64,
    /// Equivalent number of parameters, the trace of the smoother matrix
    pub edf: f64,
}

#[inline]
fn tricube(u: f64) -> f64 {
    if u < 1.0 {
        let v = 1.0 - u * u * u;
        v * v * v
    } else {
        0.0
    }
}

impl Loess {
    /// Validated parameters.
    pub fn new(span: f64, degree: usize) -> Result<Loess, Error> {
        let loess = Loess { span, degree };
        loess.validate()?;
        Ok(loess)
    }

    fn validate(&self) -> Result<(), Error> {
        ensure!(
            self.span.is_finite() && self.span > 0.0,
            "loess span must be positive, got {}",
            self.span
        );
        ensure!(self.degree <= 2, "loess degree must be 0, 1 or 2, got {}", self.degree);
        Ok(())
    }

    /// Number of nearest neighbours in each local fit for `n` points.
    fn neighbourhood(&self, n: usize) -> usize {
        let q = (self.span * n as f64).floor() as usize;
        q.max(self.degree + 1).min(n).max(1)
    }

    /// Build the smoother matrix for predictor values `x`.
    pub fn smoother(&self, x: &[f64]) -> Result<LoessSmoother, Error> {
        self.validate()?;
        ensure!(!x.is_empty(), "cannot smooth an empty predictor");
        if let Some(bad) = x.iter().find(|v| !v.is_finite()) {
            bail!("non-finite predictor value {}", bad);
        }

        let n = x.len();
        let q = self.neighbourhood(n);
        let mut rows = Vec::with_capacity(n);
        let mut edf = 0.0;
        let mut dist = vec![0.0; n];

        for (i, &xi) in x.iter().enumerate() {
            for (d, &xj) in dist.iter_mut().zip(x) {
                *d = (xj - xi).abs();
            }
            let mut sorted = dist.clone();
            let (_, &mut h, _) = sorted.select_nth_unstable_by(q - 1, f64::total_cmp);
            let h = if self.span > 1.0 { h * self.span } else { h };

            // local coordinates and weights of the points in the neighbourhood
            let local: Vec<(usize, f64, f64)> = if h > 0.0 {
                dist.iter()
                    .enumerate()
                    .filter_map(|(j, &d)| {
                        let w = tricube(d / h);
                        (w > 0.0).then(|| (j, (x[j] - xi) / h, w))
                    })
                    .collect()
            } else {
                // all q nearest points sit on top of x_i
                dist.iter()
                    .enumerate()
                    .filter(|&(_, &d)| d == 0.0)
                    .map(|(j, _)| (j, 0.0, 1.0))
                    .collect()
            };

            let (row, self_weight) = local_fit_row(&local, self.degree, i);
            edf += self_weight;
            rows.push(row);
        }

        Ok(LoessSmoother { rows, edf })
    }
}

/// One row of the smoother matrix, and its diagonal entry. The local degree drops
/// when the neighbourhood has too few distinct points to support it.
fn local_fit_row(local: &[(usize, f64, f64)], degree: usize, center: usize) -> (SmootherRow, f64) {
    let mut distinct: Vec<f64> = local.iter().map(|&(_, u, _)| u).collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    let mut degree = degree.min(distinct.len().saturating_sub(1));

    loop {
        let p = degree + 1;
        let mut m = DMatrix::<f64>::zeros(p, p);
        for &(_, u, w) in local {
            let mut pow_a = 1.0;
            for a in 0..p {
                // m[a, b] = sum w u^(a + b)
                let mut pow_b = pow_a * pow_a;
                for b in a..p {
                    m[(a, b)] += w * pow_b;
                    pow_b *= u;
                }
                pow_a *= u;
            }
        }
        for a in 0..p {
            for b in 0..a {
                m[(a, b)] = m[(b, a)];
            }
        }

        // fitted value at the centre is e0' M^-1 Z' W y; c = M^-1 e0
        if let Some(chol) = m.cholesky() {
            let mut e0 = DVector::<f64>::zeros(p);
            e0[0] = 1.0;
            let c = chol.solve(&e0);

            let mut self_weight = 0.0;
            let row = local
                .iter()
                .map(|&(j, u, w)| {
                    let mut z = 1.0;
                    let mut l = 0.0;
                    for k in 0..p {
                        l += c[k] * z;
                        z *= u;
                    }
                    let l = w * l;
                    if j == center {
                        self_weight = l;
                    }
                    (j, l)
                })
                .collect();
            return (row, self_weight);
        }
        if degree == 0 {
            // unreachable in practice: the centre point always carries weight 1
            return (vec![(center, 1.0)], 1.0);
        }
        degree -= 1;
    }
}

impl LoessSmoother {
    /// Number of points
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if built for no points
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Trace of the smoother matrix
    pub fn edf(&self) -> f64 {
        self.edf
    }

    /// Fitted values of `y`, which must have one value per predictor point.
    pub fn fit(&self, y: &[f64]) -> Result<LoessFit, Error> {
        ensure!(
            y.len() == self.rows.len(),
            "response has {} values but the smoother was built for {}",
            y.len(),
            self.rows.len()
        );
        let fitted: Vec<f64> = self
            .rows
            .iter()
            .map(|row| row.iter().map(|&(j, l)| l * y[j]).sum())
            .collect();
        let rss = fitted.iter().zip(y).map(|(f, v)| (v - f) * (v - f)).sum();
        Ok(LoessFit {
            fitted,
            rss,
            edf: self.edf,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn grid(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 / (n - 1) as f64).collect()
    }

    #[test]
    fn test_reproduces_polynomials() {
        let x = grid(20);

        let linear: Vec<f64> = x.iter().map(|v| 3.0 * v - 1.0).collect();
        let fit = Loess::default().smoother(&x).unwrap().fit(&linear).unwrap();
        for (f, y) in fit.fitted.iter().zip(&linear) {
            assert_approx_eq!(f, y, 1e-10);
        }
        assert!(fit.rss < 1e-20);
        assert_approx_eq!(fit.edf, 4.287331207795224, 1e-9);

        let quadratic: Vec<f64> = x.iter().map(|v| v * v).collect();
        let fit = Loess::new(0.5, 2).unwrap().smoother(&x).unwrap().fit(&quadratic).unwrap();
        for (f, y) in fit.fitted.iter().zip(&quadratic) {
            assert_approx_eq!(f, y, 1e-10);
        }
        assert_approx_eq!(fit.edf, 6.949826252343158, 1e-9);
    }

    #[test]
    fn test_rows_sum_to_one() {
        let x = [0.3, 0.1, 0.9, 0.5, 0.5, 0.7, 0.2];
        let smoother = Loess::default().smoother(&x).unwrap();
        let fit = smoother.fit(&[2.5; 7]).unwrap();
        for f in fit.fitted {
            assert_approx_eq!(f, 2.5, 1e-12);
        }
    }

    #[test]
    fn test_wide_span_approaches_least_squares() {
        let x = grid(20);
        let y: Vec<f64> = x.iter().map(|v| (6.0 * v).sin()).collect();

        let n = x.len() as f64;
        let mx = x.iter().sum::<f64>() / n;
        let my = y.iter().sum::<f64>() / n;
        let sxy: f64 = x.iter().zip(&y).map(|(a, b)| (a - mx) * (b - my)).sum();
        let sxx: f64 = x.iter().map(|a| (a - mx) * (a - mx)).sum();
        let slope = sxy / sxx;

        let fit = Loess::new(100.0, 1).unwrap().smoother(&x).unwrap().fit(&y).unwrap();
        assert_approx_eq!(fit.edf, 2.0, 1e-5);
        for (f, a) in fit.fitted.iter().zip(&x) {
            assert_approx_eq!(f, my + slope * (a - mx), 1e-5);
        }
    }

    #[test]
    fn test_tied_predictor() {
        // no spread at all: the local fit falls back to the mean
        let smoother = Loess::default().smoother(&[1.0; 5]).unwrap();
        assert_approx_eq!(smoother.edf(), 1.0, 1e-12);
        let fit = smoother.fit(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        for f in fit.fitted {
            assert_approx_eq!(f, 3.0, 1e-12);
        }
    }

    #[test]
    fn test_invalid_input() {
        assert!(Loess::new(0.0, 1).is_err());
        assert!(Loess::new(f64::NAN, 1).is_err());
        assert!(Loess::new(0.5, 3).is_err());
        assert!(Loess::default().smoother(&[]).is_err());
        assert!(Loess::default().smoother(&[0.0, f64::NAN]).is_err());

        let smoother = Loess::default().smoother(&[0.0, 1.0, 2.0]).unwrap();
        assert!(smoother.fit(&[1.0, 2.0]).is_err());
    }
}
