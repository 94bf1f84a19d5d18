//! Rigid-body superposition of paired point sets.
//!
//! The optimal rotation is found with Horn's closed-form quaternion method:
//! the best-fit quaternion is the eigenvector belonging to the largest
//! eigenvalue of a symmetric 4x4 matrix built from the cross-covariance of
//! the centered point sets. The eigenproblem is solved by cyclic Jacobi
//! rotations, which converge quadratically for a matrix this small.

use crate::convert;
use crate::error::{Error, Result};

/// Distance each landmark pair must close to after superposition, in the
/// same unit as the coordinates (Angstroms throughout this crate).
pub const LANDMARK_TOLERANCE: f64 = 0.001;

const JACOBI_SWEEPS: usize = 50;

/// A fitted rigid-body transform together with its residual.
#[derive(Clone, Copy, Debug)]
pub struct Superposition {
    /// Row-major rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// Translation applied after the rotation.
    pub translation: [f64; 3],
    /// Root-mean-square deviation of the fitted pairs.
    pub rmsd: f64,
}

impl Superposition {
    /// Applies this transform to a point.
    #[must_use]
    pub fn transform(&self, point: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for row in 0..3 {
            out[row] = self.rotation[row][0].mul_add(
                point[0],
                self.rotation[row][1]
                    .mul_add(point[1], self.rotation[row][2].mul_add(point[2], 0.0)),
            ) + self.translation[row];
        }
        out
    }
}

/// Computes the rigid transform that best maps `mobile` onto `fixed`.
///
/// # Panics
///
/// Panics if the point sets are empty or of unequal length.
#[must_use]
pub fn superposition(fixed: &[[f64; 3]], mobile: &[[f64; 3]]) -> Superposition {
    assert_eq!(fixed.len(), mobile.len());
    assert!(!fixed.is_empty());

    let n = convert::f64_from_usize(fixed.len());
    let mut fixed_centroid = [0.0; 3];
    let mut mobile_centroid = [0.0; 3];
    for (f, m) in fixed.iter().zip(mobile) {
        for axis in 0..3 {
            fixed_centroid[axis] += f[axis] / n;
            mobile_centroid[axis] += m[axis] / n;
        }
    }

    // cross-covariance of the centered sets: s[a][b] = sum of p_a * q_b
    // with p the centered mobile point and q the centered fixed point
    let mut s = [[0.0_f64; 3]; 3];
    for (f, m) in fixed.iter().zip(mobile) {
        for a in 0..3 {
            for b in 0..3 {
                s[a][b] += (m[a] - mobile_centroid[a]) * (f[b] - fixed_centroid[b]);
            }
        }
    }

    let quad = [
        [
            s[0][0] + s[1][1] + s[2][2],
            s[1][2] - s[2][1],
            s[2][0] - s[0][2],
            s[0][1] - s[1][0],
        ],
        [
            s[1][2] - s[2][1],
            s[0][0] - s[1][1] - s[2][2],
            s[0][1] + s[1][0],
            s[2][0] + s[0][2],
        ],
        [
            s[2][0] - s[0][2],
            s[0][1] + s[1][0],
            -s[0][0] + s[1][1] - s[2][2],
            s[1][2] + s[2][1],
        ],
        [
            s[0][1] - s[1][0],
            s[2][0] + s[0][2],
            s[1][2] + s[2][1],
            -s[0][0] - s[1][1] + s[2][2],
        ],
    ];

    let quaternion = dominant_eigenvector(quad);
    let rotation = rotation_from_quaternion(quaternion);

    let mut translation = [0.0; 3];
    for row in 0..3 {
        translation[row] = fixed_centroid[row]
            - rotation[row][0].mul_add(
                mobile_centroid[0],
                rotation[row][1].mul_add(
                    mobile_centroid[1],
                    rotation[row][2] * mobile_centroid[2],
                ),
            );
    }

    let mut fit = Superposition {
        rotation,
        translation,
        rmsd: 0.0,
    };

    let mut sum_sq = 0.0;
    for (f, m) in fixed.iter().zip(mobile) {
        let mapped = fit.transform(*m);
        sum_sq += distance_squared(mapped, *f);
    }
    fit.rmsd = (sum_sq / n).sqrt();

    fit
}

/// Superimposes the full `mobile` point set onto `fixed` using the given
/// `(mobile_index, fixed_index)` landmark pairs, transforming `mobile` in
/// place.
///
/// After the fit every landmark pair is re-checked atom-by-atom; any pair
/// left farther apart than [`LANDMARK_TOLERANCE`] aborts the alignment.
///
/// # Errors
///
/// Returns [`Error::AlignmentOutOfTolerance`] carrying the landmark rmsd if
/// the re-check fails. `mobile` is still transformed in that case.
///
/// # Panics
///
/// Panics if `landmark_pairs` is empty or indexes out of bounds.
pub fn align_onto(
    fixed: &[[f64; 3]],
    mobile: &mut [[f64; 3]],
    landmark_pairs: &[(usize, usize)],
) -> Result<f64> {
    assert!(!landmark_pairs.is_empty());

    let mobile_landmarks: Vec<[f64; 3]> =
        landmark_pairs.iter().map(|&(m, _)| mobile[m]).collect();
    let fixed_landmarks: Vec<[f64; 3]> = landmark_pairs.iter().map(|&(_, f)| fixed[f]).collect();

    let fit = superposition(&fixed_landmarks, &mobile_landmarks);

    for point in mobile.iter_mut() {
        *point = fit.transform(*point);
    }

    let mut worst = 0.0_f64;
    for &(m, f) in landmark_pairs {
        let deviation = distance_squared(mobile[m], fixed[f]).sqrt();
        worst = worst.max(deviation);
    }

    if worst > LANDMARK_TOLERANCE {
        return Err(Error::AlignmentOutOfTolerance {
            rmsd: fit.rmsd,
            cutoff: LANDMARK_TOLERANCE,
        });
    }

    Ok(fit.rmsd)
}

fn distance_squared(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn rotation_from_quaternion([w, x, y, z]: [f64; 4]) -> [[f64; 3]; 3] {
    [
        [
            w * w + x * x - y * y - z * z,
            2.0 * (x * y - w * z),
            2.0 * (x * z + w * y),
        ],
        [
            2.0 * (x * y + w * z),
            w * w - x * x + y * y - z * z,
            2.0 * (y * z - w * x),
        ],
        [
            2.0 * (x * z - w * y),
            2.0 * (y * z + w * x),
            w * w - x * x - y * y + z * z,
        ],
    ]
}

/// Returns the unit eigenvector of the largest eigenvalue of a symmetric
/// 4x4 matrix, by cyclic Jacobi rotations.
fn dominant_eigenvector(mut a: [[f64; 4]; 4]) -> [f64; 4] {
    let mut v = [[0.0_f64; 4]; 4];
    for (i, row) in v.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for _ in 0..JACOBI_SWEEPS {
        let mut off_diagonal = 0.0;
        for p in 0..4 {
            for q in (p + 1)..4 {
                off_diagonal += a[p][q].abs();
            }
        }
        if off_diagonal < 1e-14 {
            break;
        }

        for p in 0..4 {
            for q in (p + 1)..4 {
                if a[p][q].abs() < 1e-300 {
                    continue;
                }

                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + theta.hypot(1.0));
                let c = 1.0 / t.hypot(1.0);
                let s = t * c;

                for k in 0..4 {
                    let akp = a[k][p];
                    let akq = a[k][q];
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..4 {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in &mut v {
                    let vkp = row[p];
                    let vkq = row[q];
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut best = 0;
    for i in 1..4 {
        if a[i][i] > a[best][best] {
            best = i;
        }
    }

    let mut eigenvector = [0.0; 4];
    for (k, row) in v.iter().enumerate() {
        eigenvector[k] = row[best];
    }
    let norm: f64 = eigenvector.iter().map(|e| e * e).sum::<f64>().sqrt();
    for e in &mut eigenvector {
        *e /= norm;
    }
    eigenvector
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    const TRIPOD: [[f64; 3]; 4] = [
        [0.0, 0.0, 0.0],
        [1.5, 0.0, 0.0],
        [0.0, 2.0, 0.0],
        [0.3, 0.4, 1.2],
    ];

    fn rotate_z_90_and_shift(points: &[[f64; 3]]) -> Vec<[f64; 3]> {
        points
            .iter()
            .map(|&[x, y, z]| [-y + 4.0, x - 2.5, z + 1.0])
            .collect()
    }

    #[test]
    fn identity_fit_has_zero_rmsd() {
        let fit = superposition(&TRIPOD, &TRIPOD);

        assert_approx_eq!(f64, fit.rmsd, 0.0, epsilon = 1e-9);
        for (row, expected) in fit.rotation.iter().zip([
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]) {
            for (got, want) in row.iter().zip(expected) {
                assert_approx_eq!(f64, *got, want, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn recovers_rotation_and_translation() {
        let fixed = rotate_z_90_and_shift(&TRIPOD);
        let fit = superposition(&fixed, &TRIPOD);

        assert_approx_eq!(f64, fit.rmsd, 0.0, epsilon = 1e-9);
        for (mobile, target) in TRIPOD.iter().zip(&fixed) {
            let mapped = fit.transform(*mobile);
            for axis in 0..3 {
                assert_approx_eq!(f64, mapped[axis], target[axis], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn align_onto_transforms_every_mobile_point() {
        let fixed = rotate_z_90_and_shift(&TRIPOD);
        let mut mobile = TRIPOD.to_vec();
        // a non-landmark point rides along with the fitted transform
        mobile.push([5.0, 5.0, 5.0]);

        let pairs: Vec<(usize, usize)> = (0..4).map(|i| (i, i)).collect();
        let rmsd = align_onto(&fixed, &mut mobile, &pairs).unwrap();

        assert_approx_eq!(f64, rmsd, 0.0, epsilon = 1e-9);
        let expected = rotate_z_90_and_shift(&[[5.0, 5.0, 5.0]]);
        for axis in 0..3 {
            assert_approx_eq!(f64, mobile[4][axis], expected[0][axis], epsilon = 1e-9);
        }
    }

    #[test]
    fn align_onto_rejects_incompatible_landmarks() {
        // second set is a sheared copy, so no rigid transform can close
        // every landmark to within tolerance
        let mut sheared: Vec<[f64; 3]> = TRIPOD.to_vec();
        sheared[1] = [1.5, 0.7, 0.0];

        let pairs: Vec<(usize, usize)> = (0..4).map(|i| (i, i)).collect();
        let err = align_onto(&TRIPOD, &mut sheared, &pairs).unwrap_err();

        assert!(matches!(
            err,
            crate::error::Error::AlignmentOutOfTolerance { .. }
        ));
    }
}
