extern crate nalgebra as na;

/// Index permutation between the two 6-DOF orderings used in this crate.
///
/// Externally a pose mean/covariance is ordered `(x, y, z, roll, pitch, yaw)`.
/// The factor-graph solver orders its parameters `(roll, pitch, yaw, x, y, z)`.
/// `PERM[i]` gives, for row/column `i` of the target ordering, the row/column
/// in the source ordering.
const PERM: [usize; 6] = [3, 4, 5, 0, 1, 2];

/// Reorder a 6x6 pose covariance between the external `(x y z r p y)` and the
/// solver-internal `(r p y x y z)` conventions.
///
/// The permutation swaps the translation and rotation 3-blocks, so applying it
/// twice returns the original matrix and a single function serves both
/// directions. Every covariance crossing the factor-graph boundary must pass
/// through here exactly once.
pub fn swap_pose_covariance_order(cov: &na::Matrix6<f64>) -> na::Matrix6<f64> {
    let mut out = na::Matrix6::zeros();
    for i in 0..6 {
        for j in 0..6 {
            out[(i, j)] = cov[(PERM[i], PERM[j])];
        }
    }
    out
}

/// Wrap an angle into the interval $(-\pi, \pi]$.
pub fn normalize_angle(a: f64) -> f64 {
    let mut a = a % std::f64::consts::TAU;
    if a > std::f64::consts::PI {
        a -= std::f64::consts::TAU;
    } else if a <= -std::f64::consts::PI {
        a += std::f64::consts::TAU;
    }
    a
}
