use fiducial_vlam::camera::CameraInfo;
use fiducial_vlam::observation::{Observation, marker_corners_in};

extern crate nalgebra as na;

pub const MARKER_LENGTH: f64 = 0.1;

pub fn camera() -> CameraInfo {
    CameraInfo::new(600.0, 600.0, 320.0, 240.0, [0.0; 5])
}

/// A camera at `(x, y, z)` in the map frame looking straight down the map's
/// -Z axis (a half turn about X maps the camera's +Z onto the map's -Z), the
/// usual pose for observing floor- or wall-mounted markers facing +Z.
pub fn looking_down(x: f64, y: f64, z: f64) -> na::Isometry3<f64> {
    na::Isometry3::new(
        na::Vector3::new(x, y, z),
        na::Vector3::new(std::f64::consts::PI, 0.0, 0.0),
    )
}

/// Render one marker's corners through the pinhole model into a synthetic
/// observation, the same projection both solvers assume.
pub fn observe_marker(
    camera: &CameraInfo,
    t_map_camera: &na::Isometry3<f64>,
    t_map_marker: &na::Isometry3<f64>,
    id: i32,
) -> Observation {
    let t_camera_map = t_map_camera.inverse();
    let corners = marker_corners_in(t_map_marker, MARKER_LENGTH)
        .map(|p| camera.project(&t_camera_map.transform_point(&p)));
    Observation::new(id, corners)
}

pub fn assert_isometry_close(
    actual: &na::Isometry3<f64>,
    expected: &na::Isometry3<f64>,
    translation_tolerance: f64,
    rotation_tolerance: f64,
) {
    let translation_error = (actual.translation.vector - expected.translation.vector).norm();
    let rotation_error = actual.rotation.angle_to(&expected.rotation);
    assert!(
        translation_error < translation_tolerance,
        "translation off by {} (actual {:?}, expected {:?})",
        translation_error,
        actual.translation.vector,
        expected.translation.vector
    );
    assert!(
        rotation_error < rotation_tolerance,
        "rotation off by {} rad",
        rotation_error
    );
}
