use fiducial_vlam::map::{Map, MapStyle, Marker};
use fiducial_vlam::observation::Observations;
use fiducial_vlam::solver::GeometricSolver;
use fiducial_vlam::transform::TransformWithCovariance;

extern crate nalgebra as na;

mod common;
use common::{MARKER_LENGTH, assert_isometry_close, camera, looking_down, observe_marker};

#[test]
fn test_pnp_roundtrip_single_marker() {
    let camera = camera();
    let t_map_camera = looking_down(0.0, 0.0, 1.0);
    let t_map_marker = na::Isometry3::identity();
    let observation = observe_marker(&camera, &t_map_camera, &t_map_marker, 0);

    let solver = GeometricSolver::new();
    let t_camera_marker = solver.solve_t_camera_marker(&camera, &observation, MARKER_LENGTH);
    assert!(t_camera_marker.is_valid());
    // with the marker at the map origin, camera-from-marker equals
    // camera-from-map
    assert_isometry_close(
        t_camera_marker.isometry().unwrap(),
        &t_map_camera.inverse(),
        1e-4,
        1e-4,
    );
    // the geometric backend reports no uncertainty
    assert_eq!(
        *t_camera_marker.covariance().unwrap(),
        na::Matrix6::zeros()
    );
}

#[test]
fn test_pnp_roundtrip_tilted_marker() {
    let camera = camera();
    let t_map_camera = looking_down(0.3, -0.1, 1.2);
    let t_map_marker = na::Isometry3::new(
        na::Vector3::new(0.2, 0.1, 0.0),
        na::Vector3::new(0.1, -0.15, 0.3),
    );
    let observation = observe_marker(&camera, &t_map_camera, &t_map_marker, 3);

    let solver = GeometricSolver::new();
    let t_camera_marker = solver.solve_t_camera_marker(&camera, &observation, MARKER_LENGTH);
    let expected = t_map_camera.inverse() * t_map_marker;
    assert_isometry_close(t_camera_marker.isometry().unwrap(), &expected, 1e-4, 1e-4);
}

#[test]
fn test_map_localization_two_markers() {
    let camera = camera();
    let t_map_camera = looking_down(0.1, 0.0, 1.0);
    let t_marker0 = na::Isometry3::identity();
    let t_marker1 = na::Isometry3::translation(0.2, 0.0, 0.0);

    let mut map = Map::new(MapStyle::Covariance, MARKER_LENGTH);
    map.insert(Marker::new_fixed(
        0,
        TransformWithCovariance::from_isometry(t_marker0),
    ))
    .unwrap();
    map.insert(Marker::new_fixed(
        1,
        TransformWithCovariance::from_isometry(t_marker1),
    ))
    .unwrap();

    let observations = Observations(vec![
        observe_marker(&camera, &t_map_camera, &t_marker0, 0),
        observe_marker(&camera, &t_map_camera, &t_marker1, 1),
    ]);
    let solver = GeometricSolver::new();
    let solved = solver.solve_t_map_camera(&camera, &observations, &map);
    assert!(solved.is_valid());
    let mean = solved.mean().unwrap();
    assert!((mean[0] - 0.1).abs() < 1e-3);
    assert!(mean[1].abs() < 1e-3);
    assert!((mean[2] - 1.0).abs() < 1e-3);
    assert!(mean[5].abs() < 1e-3, "yaw should be ~0, got {}", mean[5]);
}

#[test]
fn test_localization_skips_unknown_markers() {
    let camera = camera();
    let t_map_camera = looking_down(0.0, 0.0, 1.0);
    let t_marker0 = na::Isometry3::identity();
    let t_marker9 = na::Isometry3::translation(0.3, 0.2, 0.0);

    let mut map = Map::new(MapStyle::Covariance, MARKER_LENGTH);
    map.insert(Marker::new_fixed(
        0,
        TransformWithCovariance::from_isometry(t_marker0),
    ))
    .unwrap();

    // marker 9 is observed but unknown; the solve must use marker 0 alone
    let observations = Observations(vec![
        observe_marker(&camera, &t_map_camera, &t_marker9, 9),
        observe_marker(&camera, &t_map_camera, &t_marker0, 0),
    ]);
    let solver = GeometricSolver::new();
    let solved = solver.solve_t_map_camera(&camera, &observations, &map);
    assert_isometry_close(solved.isometry().unwrap(), &t_map_camera, 1e-3, 1e-3);
}

#[test]
fn test_no_known_markers_returns_invalid() {
    let camera = camera();
    let t_map_camera = looking_down(0.0, 0.0, 1.0);
    let map = Map::new(MapStyle::Covariance, MARKER_LENGTH);

    let observations = Observations(vec![observe_marker(
        &camera,
        &t_map_camera,
        &na::Isometry3::identity(),
        5,
    )]);
    let solver = GeometricSolver::new();
    assert!(
        !solver
            .solve_t_map_camera(&camera, &observations, &map)
            .is_valid()
    );
}

#[test]
fn test_mirror_guard_band_agrees_on_clean_data() {
    // three markers put 12 corners into the 4 < n < 16 band where the RANSAC
    // re-solve runs; on clean correspondences both solvers must land on the
    // same branch and the result must stay accurate
    let camera = camera();
    let t_map_camera = looking_down(0.05, -0.05, 0.9);
    let marker_poses = [
        na::Isometry3::identity(),
        na::Isometry3::translation(0.25, 0.0, 0.0),
        na::Isometry3::translation(0.0, 0.22, 0.0),
    ];

    let mut map = Map::new(MapStyle::Covariance, MARKER_LENGTH);
    let mut observed = Vec::new();
    for (id, t_map_marker) in marker_poses.iter().enumerate() {
        map.insert(Marker::new_fixed(
            id as i32,
            TransformWithCovariance::from_isometry(*t_map_marker),
        ))
        .unwrap();
        observed.push(observe_marker(&camera, &t_map_camera, t_map_marker, id as i32));
    }

    let solver = GeometricSolver::new();
    let solved = solver.solve_t_map_camera(&camera, &Observations(observed), &map);
    assert_isometry_close(solved.isometry().unwrap(), &t_map_camera, 1e-3, 1e-3);
}
