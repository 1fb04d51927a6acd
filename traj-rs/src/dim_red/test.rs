// Shared checks for the SVD methods, and PCA / pseudotime tests on synthetic data

use super::bk_svd::BkSvd;
use super::full_svd::FullSvd;
use super::*;
use ndarray::{s, Array, Array2};
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg64;

fn seeded_rng() -> Pcg64 {
    Pcg64::seed_from_u64(0)
}

/// Root of the summed squares of `a`, per entry
fn frobenius(a: &ArrayView2<f64>) -> f64 {
    let acc: f64 = a.iter().map(|v| v * v).sum();
    let sz = (a.shape()[0] * a.shape()[1]) as f64;
    acc.sqrt() / sz
}

// deterministic matrix (useful for comparing w/ other tools)
fn simple_deterministic_ex(m: usize, n: usize) -> Array2<f64> {
    let v = (0..m * n)
        .map(|x| (x % 7 + x % 4 + x % 50 + x % 47 + x % 12) as f64)
        .collect();
    Array::from_shape_vec((m, n), v).unwrap()
}

// low rank signal with a decaying spectrum plus a little noise
fn low_rank_ex(m: usize, n: usize, rank: usize) -> Array2<f64> {
    let mut rng = seeded_rng();
    let noise = Normal::new(0.0, 0.01).unwrap();
    let left = Array2::random_using((m, rank), Normal::new(0.0, 1.0).unwrap(), &mut rng);
    let right = Array2::random_using((rank, n), Normal::new(0.0, 1.0).unwrap(), &mut rng);
    let weights = Array1::from_shape_fn(rank, |i| 10.0 / (1.0 + i as f64));
    let signal = (&left * &weights).dot(&right);
    signal.mapv(|x| x + noise.sample(&mut rng))
}

fn check_against_exact(a: &Array2<f64>, k: usize, pca: &impl Pca) {
    let (u, s, v) = pca.run_pca(&a.view(), k).unwrap();
    assert_eq!(u.dim(), (a.nrows(), k));
    assert_eq!(v.dim(), (a.ncols(), k));

    // A v = U S for the returned triplets
    let av = a.dot(&v);
    let us = &u * &s;
    let frob_err = frobenius(&(&av - &us).view());
    assert!(frob_err < 1e-6, "||Av - Us||_frob = {frob_err}");

    let (_, s_gt, _) = FullSvd.run_pca(&a.view(), k).unwrap();
    let s_err = ((&s - &s_gt) / &s_gt).mapv(f64::abs).fold(0.0f64, |m, &x| m.max(x));
    assert!(s_err < 1e-3, "||S - S_exact||_inf = {s_err}");
}

#[test]
fn bksvd_matches_exact() {
    let svd = BkSvd::new();
    check_against_exact(&low_rank_ex(200, 60, 8), 5, &svd);
    check_against_exact(&low_rank_ex(60, 200, 8), 5, &svd);
    check_against_exact(&simple_deterministic_ex(40, 30), 4, &svd);
}

#[test]
fn bksvd_is_deterministic() {
    let a = low_rank_ex(120, 50, 6);
    let first = BkSvd::new().run_pca(&a.view(), 3).unwrap();
    let second = BkSvd::new().run_pca(&a.view(), 3).unwrap();
    assert_eq!(first.1, second.1);
    assert_eq!(first.2, second.2);
}

#[test]
fn bksvd_rejects_bad_rank() {
    let a = simple_deterministic_ex(10, 5);
    assert!(BkSvd::new().run_pca(&a.view(), 6).is_err());
    assert!(BkSvd::new().run_pca(&a.slice(s![..1, ..]), 1).is_err());
}

fn expression(cells_by_genes: Array2<f64>) -> ExpressionMatrix {
    let (c, g) = cells_by_genes.dim();
    ExpressionMatrix::new(
        "synthetic",
        (0..g).map(|i| format!("gene{i}")).collect(),
        (0..c).map(|i| format!("cell{i}")).collect(),
        cells_by_genes.reversed_axes(),
    )
    .unwrap()
}

#[test]
fn pca_scores_orthogonal_and_ordered() {
    let m = expression(low_rank_ex(80, 30, 6));
    for method in [PcaMethod::Full, PcaMethod::BkSvd] {
        let pca = pca_embedding(&m, 5, false, &method).unwrap();
        assert_eq!(pca.scores.dim(), (80, 5));
        assert_eq!(pca.loadings.dim(), (30, 5));

        let gram = pca.scores.t().dot(&pca.scores);
        let scale = gram[[0, 0]];
        for i in 0..5 {
            for j in 0..5 {
                if i != j {
                    assert!(gram[[i, j]].abs() < 1e-8 * scale, "scores {i} and {j} not orthogonal");
                }
            }
        }
        for w in pca.variance_explained.windows(2) {
            assert!(w[0] >= w[1]);
        }
        assert!(pca.variance_explained.sum() <= 1.0 + 1e-12);

        // largest loading of each component is positive
        for j in 0..5 {
            let col = pca.loadings.column(j);
            let largest = col.iter().fold(0.0f64, |a, &x| if x.abs() > a.abs() { x } else { a });
            assert!(largest > 0.0);
        }
    }
}

#[test]
fn pca_scaled_genes() {
    // gene 1 has a much larger scale than gene 0 but the same shape
    let x = Array2::from_shape_fn((10, 3), |(c, g)| match g {
        0 => c as f64,
        1 => 1000.0 * c as f64,
        _ => ((c * 7) % 5) as f64,
    });
    let m = expression(x);
    let unscaled = pca_embedding(&m, 2, false, &FullSvd).unwrap();
    assert!(unscaled.loadings[[1, 0]] > 0.99);
    let scaled = pca_embedding(&m, 2, true, &FullSvd).unwrap();
    assert!((scaled.loadings[[0, 0]] - scaled.loadings[[1, 0]]).abs() < 1e-9);
}

#[test]
fn pca_pseudotime_ranks_and_orientation() {
    // cells on a line through gene space
    let x = Array2::from_shape_fn((7, 4), |(c, g)| {
        let wobble = if g == 3 { 0.01 * (c % 2) as f64 } else { 0.0 };
        (c as f64) * (g as f64 + 1.0) + wobble
    });
    let m = expression(x);
    let pca = pca_embedding(&m, 2, false, &FullSvd).unwrap();

    let free = pca_pseudotime(&pca, None).unwrap();
    let mut sorted: Vec<f64> = free.values().iter().map(|v| v.unwrap()).collect();
    sorted.sort_by(f64::total_cmp);
    assert_eq!(sorted, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

    let from_first = pca_pseudotime(&pca, Some(0)).unwrap();
    assert_eq!(from_first.get(0), Some(1.0));
    assert_eq!(from_first.get(6), Some(7.0));

    let from_last = pca_pseudotime(&pca, Some(6)).unwrap();
    assert_eq!(from_last.get(6), Some(1.0));
    assert_eq!(from_last.get(0), Some(7.0));

    assert!(pca_pseudotime(&pca, Some(7)).is_err());
}
