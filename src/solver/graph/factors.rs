extern crate nalgebra as na;

use crate::camera::CameraInfo;

/// One term of the nonlinear least-squares graph. Residuals are whitened: a
/// factor's noise model is folded into the residual itself so the optimizer
/// minimizes a plain sum of squares.
#[derive(Debug, Clone)]
pub(crate) enum Factor {
    /// Reprojection of a fixed 3D point against one observed image corner.
    /// Error is `project(point; pose) - observed` over an isotropic 2-D
    /// Gaussian with standard deviation `sigma`.
    Projection {
        var: usize,
        point: na::Point3<f64>,
        observed: na::Point2<f64>,
        sigma: f64,
    },
    /// Absolute pose prior on a single variable.
    Prior {
        var: usize,
        mean: na::Isometry3<f64>,
        sqrt_info: na::Matrix6<f64>,
    },
    /// Relative pose constraint: the camera variable should sit at
    /// `marker_pose * mean`, where `mean` is a measured marker-to-camera
    /// transform.
    Between {
        marker: usize,
        camera: usize,
        mean: na::Isometry3<f64>,
        sqrt_info: na::Matrix6<f64>,
    },
}

impl Factor {
    pub(crate) fn dim(&self) -> usize {
        match self {
            Factor::Projection { .. } => 2,
            Factor::Prior { .. } | Factor::Between { .. } => 6,
        }
    }

    /// Evaluate the whitened residual against the current variable poses.
    pub(crate) fn residual_into(
        &self,
        camera: &CameraInfo,
        poses: &[na::Isometry3<f64>],
        out: &mut [f64],
    ) {
        match self {
            Factor::Projection {
                var,
                point,
                observed,
                sigma,
            } => {
                let p_camera = poses[*var].inverse_transform_point(point);
                let predicted = camera.project(&p_camera);
                out[0] = (predicted.x - observed.x) / sigma;
                out[1] = (predicted.y - observed.y) / sigma;
            }
            Factor::Prior {
                var,
                mean,
                sqrt_info,
            } => {
                let error = pose_error(mean, &poses[*var]);
                whiten_into(sqrt_info, &error, out);
            }
            Factor::Between {
                marker,
                camera: camera_var,
                mean,
                sqrt_info,
            } => {
                let actual = poses[*marker].inv_mul(&poses[*camera_var]);
                let error = pose_error(mean, &actual);
                whiten_into(sqrt_info, &error, out);
            }
        }
    }
}

/// Local 6-DOF error between a measured and an actual pose, ordered
/// `(roll, pitch, yaw, x, y, z)` to match the solver-internal convention:
/// the log-map rotation vector of `mean^-1 * actual` followed by its
/// translation.
fn pose_error(mean: &na::Isometry3<f64>, actual: &na::Isometry3<f64>) -> na::Vector6<f64> {
    let delta = mean.inv_mul(actual);
    let r = delta.rotation.scaled_axis();
    let t = delta.translation.vector;
    na::Vector6::new(r.x, r.y, r.z, t.x, t.y, t.z)
}

fn whiten_into(sqrt_info: &na::Matrix6<f64>, error: &na::Vector6<f64>, out: &mut [f64]) {
    let whitened = sqrt_info * error;
    out.copy_from_slice(whitened.as_slice());
}

/// The whitening matrix `L^-1` of a 6x6 covariance `C = L L^T`, with the
/// diagonal floored at `sigma_floor^2` so a degenerate covariance (the
/// geometric backend hands over exact zeros) still yields a usable Gaussian.
pub(crate) fn sqrt_information(cov: &na::Matrix6<f64>, sigma_floor: f64) -> na::Matrix6<f64> {
    let mut c = *cov;
    let variance_floor = sigma_floor * sigma_floor;
    for i in 0..6 {
        if c[(i, i)] < variance_floor {
            c[(i, i)] = variance_floor;
        }
    }
    if let Some(cholesky) = na::Cholesky::new(c)
        && let Some(inv) = cholesky.l().try_inverse()
    {
        return inv;
    }
    // not positive definite even after flooring; keep only the diagonal
    let mut w = na::Matrix6::zeros();
    for i in 0..6 {
        w[(i, i)] = 1.0 / c[(i, i)].sqrt();
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_error_zero_at_mean() {
        let mean = na::Isometry3::new(
            na::Vector3::new(0.4, -0.1, 2.0),
            na::Vector3::new(0.2, 0.1, -0.3),
        );
        let error = pose_error(&mean, &mean);
        assert!(error.norm() < 1e-12);
    }

    #[test]
    fn test_pose_error_translation_in_local_frame() {
        use std::f64::consts::FRAC_PI_2;
        let mean = na::Isometry3::identity();
        let actual = na::Isometry3::new(
            na::Vector3::new(1.0, 0.0, 0.0),
            na::Vector3::new(0.0, 0.0, FRAC_PI_2),
        );
        let error = pose_error(&mean, &actual);
        assert!((error[2] - FRAC_PI_2).abs() < 1e-12);
        assert!((error[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sqrt_information_whitens() {
        let mut cov = na::Matrix6::zeros();
        for i in 0..6 {
            cov[(i, i)] = 0.04;
        }
        let w = sqrt_information(&cov, 1e-4);
        for i in 0..6 {
            assert!((w[(i, i)] - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sqrt_information_floors_zero_covariance() {
        let w = sqrt_information(&na::Matrix6::zeros(), 1e-2);
        for i in 0..6 {
            assert!((w[(i, i)] - 100.0).abs() < 1e-6);
        }
    }
}
