use opencv::calib3d;
use opencv::prelude::*;

extern crate nalgebra as na;

use crate::camera::CameraInfo;
use crate::map::Map;
use crate::observation::{Observation, Observations, marker_corners, marker_corners_in};
use crate::transform::TransformWithCovariance;

/// Any rotation-vector component differing by more than this between the
/// iterative and the RANSAC solve flags a mirror solution.
const MIRROR_ROTATION_TOLERANCE: f64 = 0.5;

/// The closed-form backend: camera poses from iterative perspective-n-point,
/// no optimization pass, zero covariance on every result.
pub struct GeometricSolver;

impl GeometricSolver {
    pub fn new() -> Self {
        Self
    }

    /// Solve the transform that maps marker-frame points to camera-frame
    /// points from one observation of a marker with side `marker_length`.
    pub fn solve_t_camera_marker(
        &self,
        camera: &CameraInfo,
        observation: &Observation,
        marker_length: f64,
    ) -> TransformWithCovariance {
        let object_points = marker_corners(marker_length);
        match solve_pnp(camera, &object_points, &observation.corners) {
            Ok(t) => TransformWithCovariance::from_isometry(t),
            Err(e) => {
                log::warn!(
                    "PnP failed for marker {}: {}. Returning no solution.",
                    observation.id,
                    e
                );
                TransformWithCovariance::Invalid
            }
        }
    }

    /// Solve the camera pose in the map frame from every observation whose
    /// marker is known in the map.
    ///
    /// All known markers' corners are transformed into the map frame and a
    /// single PnP runs over the concatenated correspondences. Returns
    /// `Invalid` when no visible marker is known.
    pub fn solve_t_map_camera(
        &self,
        camera: &CameraInfo,
        observations: &Observations,
        map: &Map,
    ) -> TransformWithCovariance {
        let t_map_markers = map.find_t_map_markers(observations);
        let mut object_points = Vec::new();
        let mut image_points = Vec::new();
        for (observation, t_map_marker) in observations.iter().zip(&t_map_markers) {
            let Some(t) = t_map_marker.isometry() else {
                continue;
            };
            object_points.extend(marker_corners_in(t, map.marker_length()));
            image_points.extend(observation.corners);
        }
        if object_points.is_empty() {
            log::debug!("No observed marker is known in the map.");
            return TransformWithCovariance::Invalid;
        }

        match solve_pnp(camera, &object_points, &image_points) {
            Ok(t_camera_map) => TransformWithCovariance::from_isometry(t_camera_map.inverse()),
            Err(e) => {
                log::warn!("Map-frame PnP failed: {}. Returning no solution.", e);
                TransformWithCovariance::Invalid
            }
        }
    }
}

impl Default for GeometricSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the RANSAC solve landed on a different rotation branch than the
/// iterative solve, component-wise on the rotation vectors.
pub(crate) fn mirror_disagrees(iterative: &na::Vector3<f64>, ransac: &na::Vector3<f64>) -> bool {
    (0..3).any(|i| (iterative[i] - ransac[i]).abs() > MIRROR_ROTATION_TOLERANCE)
}

/// Solve PnP over the given 3D/2D correspondences.
///
/// The iterative solver smooths pixel noise better when it converges to the
/// right branch, but with 2 or 3 coplanar markers (between 4 and 16 corners)
/// it sometimes returns the mirrored pose. In that band a RANSAC solve is run
/// on the same correspondences and replaces the iterative result when the two
/// rotation vectors disagree.
fn solve_pnp(
    camera: &CameraInfo,
    object_points: &[na::Point3<f64>],
    image_points: &[na::Point2<f64>],
) -> Result<na::Isometry3<f64>, Box<dyn std::error::Error>> {
    debug_assert_eq!(object_points.len(), image_points.len());
    let mut object_points_data = Vec::<f64>::with_capacity(object_points.len() * 3);
    let mut image_points_data = Vec::<f64>::with_capacity(image_points.len() * 2);
    for (object_point, image_point) in object_points.iter().zip(image_points) {
        object_points_data.push(object_point.x);
        object_points_data.push(object_point.y);
        object_points_data.push(object_point.z);
        image_points_data.push(image_point.x);
        image_points_data.push(image_point.y);
    }
    let points_cnt = object_points.len() as i32;
    let object_points = Mat::new_rows_cols_with_data(points_cnt, 3, &object_points_data)?;
    let image_points = Mat::new_rows_cols_with_data(points_cnt, 2, &image_points_data)?;
    let camera_mat = camera.camera_mat()?;
    let distortion = camera.dist_coeffs()?;

    let mut rvec = Mat::default();
    let mut tvec = Mat::default();
    if !calib3d::solve_pnp(
        &object_points,
        &image_points,
        &camera_mat,
        &distortion,
        &mut rvec,
        &mut tvec,
        false,
        calib3d::SOLVEPNP_ITERATIVE,
    )? {
        return Err("solvePnP reported no solution".into());
    }
    let mut rvec = na::Vector3::new(
        *rvec.at::<f64>(0)?,
        *rvec.at::<f64>(1)?,
        *rvec.at::<f64>(2)?,
    );
    let mut tvec = na::Vector3::new(
        *tvec.at::<f64>(0)?,
        *tvec.at::<f64>(1)?,
        *tvec.at::<f64>(2)?,
    );

    if points_cnt > 4 && points_cnt < 16 {
        let mut rvec_ransac = Mat::default();
        let mut tvec_ransac = Mat::default();
        let mut inliers = Mat::default();
        let found = calib3d::solve_pnp_ransac(
            &object_points,
            &image_points,
            &camera_mat,
            &distortion,
            &mut rvec_ransac,
            &mut tvec_ransac,
            false,
            100,
            8.0,
            0.99,
            &mut inliers,
            calib3d::SOLVEPNP_ITERATIVE,
        )?;
        if found {
            let rvec_ransac = na::Vector3::new(
                *rvec_ransac.at::<f64>(0)?,
                *rvec_ransac.at::<f64>(1)?,
                *rvec_ransac.at::<f64>(2)?,
            );
            if mirror_disagrees(&rvec, &rvec_ransac) {
                log::debug!(
                    "Mirror solution suspected (iterative {:?} vs ransac {:?}); keeping ransac.",
                    rvec,
                    rvec_ransac
                );
                rvec = rvec_ransac;
                tvec = na::Vector3::new(
                    *tvec_ransac.at::<f64>(0)?,
                    *tvec_ransac.at::<f64>(1)?,
                    *tvec_ransac.at::<f64>(2)?,
                );
            }
        }
    }

    Ok(na::Isometry3::new(tvec, rvec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_disagreement_threshold() {
        let a = na::Vector3::new(0.1, -0.2, 0.3);
        assert!(!mirror_disagrees(&a, &na::Vector3::new(0.3, -0.2, 0.3)));
        assert!(!mirror_disagrees(&a, &na::Vector3::new(0.1, 0.29, 0.3)));
        assert!(mirror_disagrees(&a, &na::Vector3::new(0.1, -0.2, 0.81)));
        assert!(mirror_disagrees(&a, &na::Vector3::new(-0.9, -0.2, 0.3)));
    }
}
