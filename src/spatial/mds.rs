//! Metric multidimensional scaling into two dimensions.
//!
//! Classical (Torgerson) scaling provides the starting configuration, which
//! SMACOF then refines against the raw dissimilarities.

use crate::error::{Result, TerrainError};
use nalgebra::{DMatrix, SymmetricEigen};
use tracing::debug;

/// SMACOF iteration limit.
pub const MAX_ITER: usize = 300;

/// Stop when normalised stress improves by less than this.
pub const EPS: f64 = 1e-3;

/// Sweep limit for the symmetric eigendecomposition.
const EIGEN_MAX_ITER: usize = 1000;

/// Embed a symmetric dissimilarity matrix in the plane.
pub fn embed(dissimilarity: &[Vec<f64>]) -> Result<Vec<[f64; 2]>> {
    let n = dissimilarity.len();
    if n < 2 {
        return Ok(vec![[0.0, 0.0]; n]);
    }
    let init = classical(dissimilarity)?;
    Ok(smacof(dissimilarity, init, MAX_ITER, EPS))
}

/// Classical scaling from the two leading eigenpairs of the double-centred
/// squared dissimilarities.
pub fn classical(dissimilarity: &[Vec<f64>]) -> Result<Vec<[f64; 2]>> {
    let n = dissimilarity.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let eigen = SymmetricEigen::try_new(double_centre(dissimilarity), f64::EPSILON, EIGEN_MAX_ITER)
        .ok_or(TerrainError::Convergence {
            algorithm: "symmetric eigendecomposition",
            iterations: EIGEN_MAX_ITER,
        })?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut coords = vec![[0.0; 2]; n];
    for (axis, &k) in order.iter().take(2).enumerate() {
        let scale = eigen.eigenvalues[k].max(0.0).sqrt();
        let vector = eigen.eigenvectors.column(k);
        for (i, point) in coords.iter_mut().enumerate() {
            point[axis] = vector[i] * scale;
        }
    }
    Ok(coords)
}

fn double_centre(d: &[Vec<f64>]) -> DMatrix<f64> {
    let n = d.len();
    let sq = DMatrix::from_fn(n, n, |i, j| d[i][j] * d[i][j]);
    let row_mean: Vec<f64> = sq.row_iter().map(|r| r.sum() / n as f64).collect();
    let grand = row_mean.iter().sum::<f64>() / n as f64;

    DMatrix::from_fn(n, n, |i, j| -0.5 * (sq[(i, j)] - row_mean[i] - row_mean[j] + grand))
}

fn distances(x: &[[f64; 2]]) -> Vec<Vec<f64>> {
    x.iter()
        .map(|a| {
            x.iter()
                .map(|b| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt())
                .collect()
        })
        .collect()
}

fn stress(d: &[Vec<f64>], delta: &[Vec<f64>]) -> f64 {
    let n = d.len();
    let mut s = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            s += (d[i][j] - delta[i][j]).powi(2);
        }
    }
    s
}

/// Metric SMACOF by repeated Guttman transforms.
pub fn smacof(
    dissimilarity: &[Vec<f64>],
    init: Vec<[f64; 2]>,
    max_iter: usize,
    eps: f64,
) -> Vec<[f64; 2]> {
    let n = dissimilarity.len();
    let mut x = init;
    let mut previous: Option<f64> = None;

    for iteration in 0..max_iter {
        let d = distances(&x);
        let s = stress(&d, dissimilarity);

        let scale: f64 = x.iter().map(|p| (p[0] * p[0] + p[1] * p[1]).sqrt()).sum();
        let normalised = if scale > 0.0 { s / scale } else { s };
        if let Some(prev) = previous {
            if prev - normalised < eps {
                debug!("SMACOF converged after {} iterations (stress {:.4})", iteration, s);
                break;
            }
        }
        previous = Some(normalised);

        let mut next = vec![[0.0; 2]; n];
        for i in 0..n {
            let mut bii = 0.0;
            for j in 0..n {
                if i == j || d[i][j] <= 0.0 {
                    continue;
                }
                let bij = -dissimilarity[i][j] / d[i][j];
                bii -= bij;
                next[i][0] += bij * x[j][0];
                next[i][1] += bij * x[j][1];
            }
            next[i][0] += bii * x[i][0];
            next[i][1] += bii * x[i][1];
        }
        for p in &mut next {
            p[0] /= n as f64;
            p[1] /= n as f64;
        }
        x = next;
    }
    x
}

/// Shift each axis to start at 0 and scale so the largest coordinate is `extent`.
pub fn normalise_extent(points: &mut [[f64; 2]], extent: f64) {
    if points.is_empty() {
        return;
    }
    for axis in 0..2 {
        let min = points.iter().map(|p| p[axis]).fold(f64::INFINITY, f64::min);
        points.iter_mut().for_each(|p| p[axis] -= min);
    }
    let max = points
        .iter()
        .flat_map(|p| p.iter().copied())
        .fold(0.0, f64::max);
    if max > 0.0 {
        points
            .iter_mut()
            .for_each(|p| p.iter_mut().for_each(|v| *v = *v / max * extent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairwise(points: &[[f64; 2]]) -> Vec<Vec<f64>> {
        distances(points)
    }

    #[test]
    fn test_recovers_square_distances() {
        let square = [[0.0, 0.0], [3.0, 0.0], [0.0, 3.0], [3.0, 3.0]];
        let delta = pairwise(&square);
        let embedded = embed(&delta).unwrap();
        let d = pairwise(&embedded);

        for i in 0..4 {
            for j in 0..4 {
                assert!(
                    (d[i][j] - delta[i][j]).abs() < 1e-3,
                    "pair ({}, {}): {} vs {}",
                    i,
                    j,
                    d[i][j],
                    delta[i][j]
                );
            }
        }
    }

    #[test]
    fn test_classical_recovers_irregular_layout() {
        let layout = [[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [1.0, 5.0], [-2.0, 2.0]];
        let delta = pairwise(&layout);
        let d = pairwise(&classical(&delta).unwrap());

        for i in 0..layout.len() {
            for j in 0..layout.len() {
                assert!((d[i][j] - delta[i][j]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_two_points_keep_their_distance() {
        let delta = vec![vec![0.0, 5.0], vec![5.0, 0.0]];
        let embedded = embed(&delta).unwrap();
        let d = pairwise(&embedded);
        assert!((d[0][1] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_point_at_origin() {
        assert_eq!(embed(&[vec![0.0]]).unwrap(), vec![[0.0, 0.0]]);
        assert!(embed(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_smacof_does_not_increase_stress() {
        let delta = vec![
            vec![0.0, 2.0, 4.0],
            vec![2.0, 0.0, 3.0],
            vec![4.0, 3.0, 0.0],
        ];
        let init = vec![[0.0, 0.0], [1.0, 1.0], [2.0, -1.0]];
        let before = stress(&distances(&init), &delta);
        let after_x = smacof(&delta, init, MAX_ITER, EPS);
        let after = stress(&distances(&after_x), &delta);
        assert!(after <= before + 1e-9);
    }

    #[test]
    fn test_normalise_extent() {
        let mut pts = [[-1.0, 2.0], [1.0, 6.0], [0.0, 4.0]];
        normalise_extent(&mut pts, 10.0);
        assert_eq!(pts[0], [0.0, 0.0]);
        assert_eq!(pts[1], [5.0, 10.0]);
        assert_eq!(pts[2], [2.5, 5.0]);

        let mut same = [[1.0, 1.0], [1.0, 1.0]];
        normalise_extent(&mut same, 10.0);
        assert_eq!(same, [[0.0, 0.0], [0.0, 0.0]]);
    }
}
