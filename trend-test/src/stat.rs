//! statistics
//!
//! ## `Statistics` trait
//!
//! * To make generic code over numeric slices, there is the `Statistics` trait
//!     * `sum`: compensated sum
//!     * `mean`: just mean
//!     * `var`: variance with `ddof` delta degrees of freedom

use num_traits::ToPrimitive;

/// Statistics Trait
///
/// It contains `sum`, `mean` and `var`
pub trait Statistics {
    /// Sum, with Neumaier compensation
    fn sum(&self) -> f64;
    /// mean stats
    fn mean(&self) -> f64;
    /// var stats. `ddof = 1.0` gives the sample variance.
    fn var(&self, ddof: f64) -> f64;
}

impl<T: ToPrimitive + Copy> Statistics for [T] {
    fn sum(&self) -> f64 {
        let mut sum = 0.0f64;
        let mut comp = 0.0f64;
        for x in self {
            let x = x.to_f64().unwrap_or(f64::NAN);
            let t = sum + x;
            // the smaller operand loses its low-order bits
            if sum.abs() >= x.abs() {
                comp += (sum - t) + x;
            } else {
                comp += (x - t) + sum;
            }
            sum = t;
        }
        sum + comp
    }

    fn mean(&self) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        Statistics::sum(self) / (self.len() as f64)
    }

    fn var(&self, ddof: f64) -> f64 {
        if (self.len() as f64) <= ddof {
            return 0.0;
        }
        let mean = self.mean();
        let ss = self
            .iter()
            .map(|x| {
                let d = x.to_f64().unwrap_or(f64::NAN) - mean;
                d * d
            })
            .collect::<Vec<f64>>();
        Statistics::sum(ss.as_slice()) / (self.len() as f64 - ddof)
    }
}

/// Pearson correlation of two equally long slices. NaN if the lengths differ, either side
/// has zero variance or fewer than two points are given.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return f64::NAN;
    }
    let mx = x.mean();
    let my = y.mean();
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Ranks with ties replaced by their average rank (1-based), as used by Spearman correlation.
pub fn average_ranks(x: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

    let mut ranks = vec![0.0; x.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && x[order[j + 1]] == x[order[i]] {
            j += 1;
        }
        // positions i..=j share the mean of ranks i+1..=j+1
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman rank correlation: Pearson correlation of the average ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    pearson(&average_ranks(x), &average_ranks(y))
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_stats() {
        let v = vec![1, 2, 4, 3, 5, 6];
        assert_approx_eq!(v.mean(), 3.5, 1e-11);
        assert_approx_eq!(v.var(0.0), 2.9166666666666665, 1e-11);
        assert_approx_eq!(v.var(1.0), 3.5, 1e-11);

        // naive summation loses the 1.0 entirely
        let v = [1e16f64, 1.0, -1e16];
        assert_eq!(Statistics::sum(&v[..]), 1.0);

        let empty: Vec<f64> = vec![];
        assert!(empty.mean().is_nan());
        assert_eq!([2.0f64].var(1.0), 0.0);
    }

    #[test]
    fn test_average_ranks() {
        assert_eq!(average_ranks(&[10.0, 30.0, 20.0]), vec![1.0, 3.0, 2.0]);
        assert_eq!(average_ranks(&[1.0, 2.0, 2.0, 3.0]), vec![1.0, 2.5, 2.5, 4.0]);
        assert_eq!(average_ranks(&[5.0, 5.0, 5.0]), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_correlations() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert_approx_eq!(pearson(&x, &y), 1.0, 1e-12);
        let neg: Vec<f64> = y.iter().map(|v| -v).collect();
        assert_approx_eq!(pearson(&x, &neg), -1.0, 1e-12);

        // monotone but not linear: spearman is exactly 1, pearson is not
        let cubic: Vec<f64> = x.iter().map(|v| v * v * v).collect();
        assert_approx_eq!(spearman(&x, &cubic), 1.0, 1e-12);
        assert!(pearson(&x, &cubic) < 1.0);

        // x = [1..5], y = [1, 3, 2, 5, 4]: sum d^2 = 4 -> rho = 1 - 6*4/(5*24) = 0.8
        assert_approx_eq!(spearman(&x, &[1.0, 3.0, 2.0, 5.0, 4.0]), 0.8, 1e-12);

        assert!(pearson(&x, &[1.0; 5]).is_nan());
        assert!(pearson(&[1.0], &[2.0]).is_nan());
        assert!(pearson(&x, &y[..4]).is_nan());
        assert!(spearman(&x[..3], &y).is_nan());
    }
}
