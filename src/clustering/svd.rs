//! Truncated SVD via seeded randomized subspace iteration.

use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const OVERSAMPLE: usize = 10;
const JACOBI_MAX_SWEEPS: usize = 100;
const EPS: f64 = 1e-12;

/// Orthonormalizes columns in place (modified Gram-Schmidt). Degenerate
/// columns are zeroed.
fn orthonormalize(m: &mut Array2<f64>) {
    for j in 0..m.ncols() {
        for i in 0..j {
            let proj = m.column(i).dot(&m.column(j));
            let basis = m.column(i).to_owned();
            m.column_mut(j).scaled_add(-proj, &basis);
        }
        let norm = m.column(j).dot(&m.column(j)).sqrt();
        if norm > EPS {
            m.column_mut(j).mapv_inplace(|v| v / norm);
        } else {
            m.column_mut(j).fill(0.0);
        }
    }
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
/// Returns eigenvalues (descending) and eigenvectors as columns.
fn symmetric_eigen(mut a: Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| ((p + 1)..n).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]].powi(2))
            .sum();
        if off < EPS {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[[p, q]].abs() < EPS {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * a[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let sn = t * c;
                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - sn * akq;
                    a[[k, q]] = sn * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - sn * aqk;
                    a[[q, k]] = sn * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - sn * vkq;
                    v[[k, q]] = sn * vkp + c * vkq;
                }
            }
        }
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[j, j]].total_cmp(&a[[i, i]]).then(i.cmp(&j)));
    let values = order.iter().map(|&i| a[[i, i]]).collect();
    let vectors = v.select(Axis(1), &order);
    (values, vectors)
}

/// Projects `x` onto its top `n_components` singular directions (`U·Σ`).
///
/// Columns are sign-normalized so the largest-magnitude entry is positive,
/// which keeps the output stable for a fixed seed.
#[must_use]
pub fn truncated_svd(
    x: ArrayView2<'_, f32>,
    n_components: usize,
    n_iter: usize,
    seed: u64,
) -> Array2<f32> {
    let (n, d) = x.dim();
    let k = n_components.min(n).min(d);
    if k == 0 {
        return Array2::zeros((n, 0));
    }
    let x = x.mapv(f64::from);
    let l = (k + OVERSAMPLE).min(n).min(d);

    let mut rng = StdRng::seed_from_u64(seed);
    let omega = Array2::from_shape_fn((d, l), |_| rng.random_range(-1.0..1.0));
    let mut q = x.dot(&omega);
    orthonormalize(&mut q);
    for _ in 0..n_iter {
        let mut z = x.t().dot(&q);
        orthonormalize(&mut z);
        q = x.dot(&z);
        orthonormalize(&mut q);
    }

    let b = q.t().dot(&x);
    let gram = b.dot(&b.t());
    let (values, vectors) = symmetric_eigen(gram);
    let singular = values.slice(s![..k]).mapv(|v| v.max(0.0).sqrt());
    let mut projected = q.dot(&vectors.slice(s![.., ..k]));
    for (j, mut column) in projected.axis_iter_mut(Axis(1)).enumerate() {
        column.mapv_inplace(|v| v * singular[j]);
        let pivot = column
            .iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(0.0);
        if pivot < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }
    #[allow(clippy::cast_possible_truncation)]
    projected.mapv(|v| v as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn eigen_recovers_diagonal_spectrum() {
        let (values, _) = symmetric_eigen(array![[2.0, 1.0], [1.0, 2.0]]);
        assert!((values[0] - 3.0).abs() < 1e-9);
        assert!((values[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rank_one_data_keeps_its_norms() {
        let x = array![[1.0_f32, 2.0, 2.0], [2.0, 4.0, 4.0], [-1.0, -2.0, -2.0]];
        let reduced = truncated_svd(x.view(), 1, 4, 0);
        assert_eq!(reduced.dim(), (3, 1));
        let expected = [3.0_f32, 6.0, -3.0];
        let sign = reduced[[1, 0]].signum();
        for (row, want) in expected.iter().enumerate() {
            assert!((reduced[[row, 0]] - sign * want).abs() < 1e-4, "row {row}");
        }
    }

    #[test]
    fn components_are_capped_by_shape() {
        let x = Array2::<f32>::ones((4, 2));
        assert_eq!(truncated_svd(x.view(), 10, 2, 1).dim(), (4, 2));
    }
}
