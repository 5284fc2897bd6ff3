use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{Dyn, Owned};

extern crate nalgebra as na;

use crate::camera::CameraInfo;
use crate::map::{Map, MapStyle, Marker};
use crate::observation::{Observation, Observations, marker_corners, marker_corners_in};
use crate::solver::SolverConfig;
use crate::solver::geometric::GeometricSolver;
use crate::transform::TransformWithCovariance;
use crate::utils::swap_pose_covariance_order;

/// The factor types making up a pose graph
pub(crate) mod factors;

use factors::{Factor, sqrt_information};

/// Central-difference step for the numerical residual Jacobian.
const JACOBIAN_STEP: f64 = 1e-6;

/// Identifies a variable in a pose graph: the single camera pose of the
/// frame being solved, or one marker pose keyed by marker id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarKey {
    Camera,
    Marker(i32),
}

/// A nonlinear least-squares problem over a set of 6-DOF poses.
///
/// Free variables are packed into the parameter vector as
/// `(roll-pitch-yaw rotation vector, translation)` 6-blocks; fixed variables
/// are constants of the graph and never enter the Jacobian, which realizes a
/// constrained (zero-sigma) noise model exactly. All graph state is scoped to
/// a single solve; nothing survives between calls.
pub(crate) struct PoseGraph {
    camera: CameraInfo,
    keys: Vec<VarKey>,
    poses: Vec<na::Isometry3<f64>>,
    free_offsets: Vec<Option<usize>>,
    n_free: usize,
    factors: Vec<Factor>,
    params: na::DVector<f64>,
    nresid: usize,
}

impl PoseGraph {
    pub(crate) fn new(camera: CameraInfo) -> Self {
        Self {
            camera,
            keys: Vec::new(),
            poses: Vec::new(),
            free_offsets: Vec::new(),
            n_free: 0,
            factors: Vec::new(),
            params: na::DVector::zeros(0),
            nresid: 0,
        }
    }

    pub(crate) fn add_free_variable(&mut self, key: VarKey, initial: na::Isometry3<f64>) -> usize {
        self.keys.push(key);
        self.poses.push(initial);
        self.free_offsets.push(Some(self.n_free));
        self.n_free += 1;
        self.keys.len() - 1
    }

    pub(crate) fn add_fixed_variable(&mut self, key: VarKey, pose: na::Isometry3<f64>) -> usize {
        self.keys.push(key);
        self.poses.push(pose);
        self.free_offsets.push(None);
        self.keys.len() - 1
    }

    fn add_factor(&mut self, factor: Factor) {
        self.nresid += factor.dim();
        self.factors.push(factor);
    }

    pub(crate) fn add_projection_factor(
        &mut self,
        var: usize,
        point: na::Point3<f64>,
        observed: na::Point2<f64>,
        sigma: f64,
    ) {
        self.add_factor(Factor::Projection {
            var,
            point,
            observed,
            sigma,
        });
    }

    /// Prior over a variable's absolute pose. `cov` is in the internal
    /// `(r p y x y z)` ordering.
    pub(crate) fn add_prior_factor(
        &mut self,
        var: usize,
        mean: na::Isometry3<f64>,
        cov: &na::Matrix6<f64>,
        sigma_floor: f64,
    ) {
        self.add_factor(Factor::Prior {
            var,
            mean,
            sqrt_info: sqrt_information(cov, sigma_floor),
        });
    }

    /// Relative constraint `camera = marker * mean`. `cov` is in the internal
    /// `(r p y x y z)` ordering.
    pub(crate) fn add_between_factor(
        &mut self,
        marker: usize,
        camera: usize,
        mean: na::Isometry3<f64>,
        cov: &na::Matrix6<f64>,
        sigma_floor: f64,
    ) {
        self.add_factor(Factor::Between {
            marker,
            camera,
            mean,
            sqrt_info: sqrt_information(cov, sigma_floor),
        });
    }

    fn encode(&self) -> na::DVector<f64> {
        let mut x = na::DVector::zeros(self.n_free * 6);
        for (pose, offset) in self.poses.iter().zip(&self.free_offsets) {
            let Some(offset) = offset else { continue };
            let r = pose.rotation.scaled_axis();
            let t = pose.translation.vector;
            for k in 0..3 {
                x[offset * 6 + k] = r[k];
                x[offset * 6 + 3 + k] = t[k];
            }
        }
        x
    }

    fn decode_into(
        free_offsets: &[Option<usize>],
        x: &na::DVector<f64>,
        poses: &mut [na::Isometry3<f64>],
    ) {
        for (pose, offset) in poses.iter_mut().zip(free_offsets) {
            let Some(offset) = offset else { continue };
            let r = na::Vector3::new(x[offset * 6], x[offset * 6 + 1], x[offset * 6 + 2]);
            let t = na::Vector3::new(
                x[offset * 6 + 3],
                x[offset * 6 + 4],
                x[offset * 6 + 5],
            );
            *pose = na::Isometry3::new(t, r);
        }
    }

    fn residuals_for(&self, poses: &[na::Isometry3<f64>]) -> na::DVector<f64> {
        let mut residuals = na::DVector::zeros(self.nresid);
        let mut row = 0;
        for factor in &self.factors {
            let dim = factor.dim();
            factor.residual_into(
                &self.camera,
                poses,
                &mut residuals.as_mut_slice()[row..row + dim],
            );
            row += dim;
        }
        residuals
    }

    /// Run Levenberg-Marquardt to convergence and invert the Gauss-Newton
    /// Hessian at the optimum for marginal covariances. `None` when the
    /// optimizer fails or the graph is under-constrained.
    pub(crate) fn optimize(mut self) -> Option<SolvedGraph> {
        self.params = self.encode();
        let (graph, report) = LevenbergMarquardt::new().minimize(self);
        if !report.termination.was_successful() {
            log::debug!("Pose graph optimization failed: {:?}", report.termination);
            return None;
        }
        let jacobian = LeastSquaresProblem::jacobian(&graph)?;
        let hessian = jacobian.tr_mul(&jacobian);
        let Some(covariance) = hessian.try_inverse() else {
            log::debug!("Singular Hessian; marginal covariances unavailable.");
            return None;
        };
        Some(SolvedGraph { graph, covariance })
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseGraph {
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;

    fn set_params(&mut self, x: &na::DVector<f64>) {
        self.params = x.clone();
        let mut poses = std::mem::take(&mut self.poses);
        Self::decode_into(&self.free_offsets, x, &mut poses);
        self.poses = poses;
    }

    fn params(&self) -> na::DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<na::DVector<f64>> {
        Some(self.residuals_for(&self.poses))
    }

    fn jacobian(&self) -> Option<na::OMatrix<f64, Dyn, Dyn>> {
        let mut jacobian = na::OMatrix::<f64, Dyn, Dyn>::zeros(self.nresid, self.params.len());
        let mut poses = self.poses.clone();
        for col in 0..self.params.len() {
            let mut x = self.params.clone();
            x[col] += JACOBIAN_STEP;
            Self::decode_into(&self.free_offsets, &x, &mut poses);
            let ahead = self.residuals_for(&poses);
            x[col] = self.params[col] - JACOBIAN_STEP;
            Self::decode_into(&self.free_offsets, &x, &mut poses);
            let behind = self.residuals_for(&poses);
            jacobian.set_column(col, &((ahead - behind) / (2.0 * JACOBIAN_STEP)));
        }
        Some(jacobian)
    }
}

/// An optimized graph plus the inverse Hessian it produced.
pub(crate) struct SolvedGraph {
    graph: PoseGraph,
    covariance: na::DMatrix<f64>,
}

impl SolvedGraph {
    /// The optimized pose of a variable with its marginal covariance in the
    /// external `(x y z r p y)` ordering. Fixed variables come back with a
    /// zero covariance.
    pub(crate) fn pose_with_covariance(&self, key: VarKey) -> Option<TransformWithCovariance> {
        let index = self.graph.keys.iter().position(|k| *k == key)?;
        let cov = match self.graph.free_offsets[index] {
            Some(offset) => {
                let internal =
                    na::Matrix6::from_fn(|i, j| self.covariance[(offset * 6 + i, offset * 6 + j)]);
                swap_pose_covariance_order(&internal)
            }
            None => na::Matrix6::zeros(),
        };
        Some(TransformWithCovariance::from_isometry_with_covariance(
            self.graph.poses[index],
            cov,
        ))
    }
}

/// The factor-graph backend: maximum-a-posteriori camera and marker poses
/// with marginal covariances, exploiting several simultaneous observations
/// and known-marker priors.
pub struct GraphSolver {
    geometric: GeometricSolver,
    corner_sigma: f64,
    between_sigma_floor: f64,
    add_unknown_markers: bool,
}

impl GraphSolver {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            geometric: GeometricSolver::new(),
            corner_sigma: config.corner_sigma,
            between_sigma_floor: config.between_sigma_floor,
            add_unknown_markers: config.add_unknown_markers,
        }
    }

    /// Solve the camera pose in one marker's frame from that single
    /// observation, with marginal covariance.
    ///
    /// Four reprojection factors over one camera variable; the initial
    /// estimate is the inverted geometric solve.
    pub fn solve_camera_f_marker(
        &self,
        camera: &CameraInfo,
        observation: &Observation,
        marker_length: f64,
    ) -> TransformWithCovariance {
        let initial = self
            .geometric
            .solve_t_camera_marker(camera, observation, marker_length)
            .inverse();
        let Some(t_marker_camera) = initial.isometry() else {
            return TransformWithCovariance::Invalid;
        };

        let mut graph = PoseGraph::new(*camera);
        let camera_var = graph.add_free_variable(VarKey::Camera, *t_marker_camera);
        for (point, observed) in marker_corners(marker_length)
            .into_iter()
            .zip(observation.corners)
        {
            graph.add_projection_factor(camera_var, point, observed, self.corner_sigma);
        }
        match graph.optimize() {
            Some(solved) => solved
                .pose_with_covariance(VarKey::Camera)
                .unwrap_or(TransformWithCovariance::Invalid),
            None => TransformWithCovariance::Invalid,
        }
    }

    /// Localize the camera in the map frame against every known marker in the
    /// batch. The geometric backend provides the initial estimate; an invalid
    /// initial estimate short-circuits to invalid.
    pub fn solve_t_map_camera(
        &self,
        camera: &CameraInfo,
        observations: &Observations,
        map: &Map,
    ) -> TransformWithCovariance {
        let initial = self.geometric.solve_t_map_camera(camera, observations, map);
        let Some(t_map_camera) = initial.isometry() else {
            return TransformWithCovariance::Invalid;
        };

        let mut graph = PoseGraph::new(*camera);
        let camera_var = graph.add_free_variable(VarKey::Camera, *t_map_camera);
        let t_map_markers = map.find_t_map_markers(observations);
        for (observation, t_map_marker) in observations.iter().zip(&t_map_markers) {
            let Some(t) = t_map_marker.isometry() else {
                continue;
            };
            for (point, observed) in marker_corners_in(t, map.marker_length())
                .into_iter()
                .zip(observation.corners)
            {
                graph.add_projection_factor(camera_var, point, observed, self.corner_sigma);
            }
        }
        match graph.optimize() {
            Some(solved) => solved
                .pose_with_covariance(VarKey::Camera)
                .unwrap_or(TransformWithCovariance::Invalid),
            None => TransformWithCovariance::Invalid,
        }
    }

    /// Jointly refine every observed marker (and admit unknown ones) from one
    /// frame. No-op unless `t_map_camera` is valid, the batch holds at least
    /// two observations, and at least one observed marker is already known.
    ///
    /// Map writes are committed only after the optimizer returns for the
    /// whole batch.
    pub fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        camera: &CameraInfo,
        observations: &Observations,
        map: &mut Map,
    ) {
        let Some(t_map_camera) = t_map_camera.isometry() else {
            return;
        };
        if observations.len() < 2 {
            return;
        }
        if !observations.iter().any(|obs| map.find(obs.id).is_some()) {
            log::debug!("No known anchor in sight; skipping map update.");
            return;
        }

        let mut graph = PoseGraph::new(*camera);
        let camera_var = graph.add_free_variable(VarKey::Camera, *t_map_camera);
        let mut observed_ids = Vec::new();
        for observation in observations.iter() {
            let measured =
                self.solve_camera_f_marker(camera, observation, map.marker_length());
            let Some(t_marker_camera) = measured.isometry() else {
                continue;
            };
            let between_cov =
                swap_pose_covariance_order(measured.covariance().unwrap_or(&na::Matrix6::zeros()));

            let marker_var = match map.find(observation.id) {
                Some(marker) => {
                    let stored = marker.t_map_marker();
                    let Some(t_map_marker) = stored.isometry() else {
                        continue;
                    };
                    let constrained = marker.is_fixed()
                        || map.map_style() == MapStyle::Pose
                        || stored.covariance().is_none_or(|c| c[(0, 0)] == 0.0);
                    if constrained {
                        graph.add_fixed_variable(VarKey::Marker(observation.id), *t_map_marker)
                    } else {
                        let var = graph
                            .add_free_variable(VarKey::Marker(observation.id), *t_map_marker);
                        let prior_cov = swap_pose_covariance_order(stored.covariance().unwrap());
                        graph.add_prior_factor(
                            var,
                            *t_map_marker,
                            &prior_cov,
                            self.between_sigma_floor,
                        );
                        var
                    }
                }
                None => {
                    if !self.add_unknown_markers {
                        continue;
                    }
                    graph.add_free_variable(
                        VarKey::Marker(observation.id),
                        t_map_camera * t_marker_camera.inverse(),
                    )
                }
            };
            graph.add_between_factor(
                marker_var,
                camera_var,
                *t_marker_camera,
                &between_cov,
                self.between_sigma_floor,
            );
            observed_ids.push(observation.id);
        }
        if observed_ids.is_empty() {
            return;
        }

        let Some(solved) = graph.optimize() else {
            log::warn!("Map update optimization failed; map left unchanged.");
            return;
        };
        for id in observed_ids {
            let Some(t_map_marker) = solved.pose_with_covariance(VarKey::Marker(id)) else {
                continue;
            };
            match map.find_mut(id) {
                Some(marker) => marker.record_optimized(t_map_marker),
                None => {
                    if let Err(e) = map.insert(Marker::new(id, t_map_marker)) {
                        log::warn!("Cannot insert optimized marker: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal(sigma: f64) -> na::Matrix6<f64> {
        na::Matrix6::identity() * sigma * sigma
    }

    #[test]
    fn test_prior_pulls_variable_to_mean() {
        let camera = CameraInfo::new(600.0, 600.0, 320.0, 240.0, [0.0; 5]);
        let mean = na::Isometry3::new(
            na::Vector3::new(0.5, -0.2, 1.5),
            na::Vector3::new(0.1, 0.2, -0.3),
        );
        let initial = na::Isometry3::new(
            na::Vector3::new(0.4, 0.0, 1.2),
            na::Vector3::new(0.0, 0.1, -0.2),
        );
        let mut graph = PoseGraph::new(camera);
        let var = graph.add_free_variable(VarKey::Camera, initial);
        graph.add_prior_factor(var, mean, &diagonal(0.1), 1e-4);

        let solved = graph.optimize().unwrap();
        let result = solved.pose_with_covariance(VarKey::Camera).unwrap();
        let t = result.isometry().unwrap();
        assert!((t.translation.vector - mean.translation.vector).norm() < 1e-6);
        assert!(t.rotation.angle_to(&mean.rotation) < 1e-6);
        // marginal of a lone prior recovers the prior covariance, up to the
        // curvature of the rotation parametrization
        let cov = result.covariance().unwrap();
        for i in 0..6 {
            assert!((cov[(i, i)] - 0.01).abs() < 1e-3);
        }
    }

    #[test]
    fn test_between_places_camera_off_fixed_marker() {
        let camera = CameraInfo::new(600.0, 600.0, 320.0, 240.0, [0.0; 5]);
        let t_map_marker = na::Isometry3::new(
            na::Vector3::new(1.0, 0.0, 0.0),
            na::Vector3::new(0.0, 0.0, 0.5),
        );
        let t_marker_camera = na::Isometry3::new(
            na::Vector3::new(0.0, 0.3, 1.0),
            na::Vector3::new(0.2, 0.0, 0.0),
        );
        let expected = t_map_marker * t_marker_camera;

        let mut graph = PoseGraph::new(camera);
        let camera_var = graph.add_free_variable(VarKey::Camera, na::Isometry3::identity());
        let marker_var = graph.add_fixed_variable(VarKey::Marker(0), t_map_marker);
        graph.add_between_factor(
            marker_var,
            camera_var,
            t_marker_camera,
            &diagonal(0.05),
            1e-4,
        );

        let solved = graph.optimize().unwrap();
        let result = solved.pose_with_covariance(VarKey::Camera).unwrap();
        let t = result.isometry().unwrap();
        assert!((t.translation.vector - expected.translation.vector).norm() < 1e-6);
        assert!(t.rotation.angle_to(&expected.rotation) < 1e-6);
        // the fixed marker reports a zero covariance and its exact pose
        let marker = solved.pose_with_covariance(VarKey::Marker(0)).unwrap();
        assert_eq!(*marker.covariance().unwrap(), na::Matrix6::zeros());
        assert_eq!(*marker.isometry().unwrap(), t_map_marker);
    }

    #[test]
    fn test_jacobian_matches_residuals() {
        let camera = CameraInfo::new(600.0, 600.0, 320.0, 240.0, [0.0; 5]);
        let mut graph = PoseGraph::new(camera);
        let var = graph.add_free_variable(
            VarKey::Camera,
            na::Isometry3::new(
                na::Vector3::new(0.1, -0.1, 1.0),
                na::Vector3::new(0.05, 0.1, -0.2),
            ),
        );
        graph.add_prior_factor(
            var,
            na::Isometry3::new(na::Vector3::new(0.0, 0.0, 1.2), na::Vector3::zeros()),
            &diagonal(0.2),
            1e-4,
        );
        graph.params = graph.encode();

        let jacobian = LeastSquaresProblem::jacobian(&graph).unwrap();
        let r0 = graph.residuals_for(&graph.poses);
        // first-order prediction of the residual change along each parameter
        let step = 1e-5;
        for col in 0..6 {
            let mut x = graph.params.clone();
            x[col] += step;
            let mut poses = graph.poses.clone();
            PoseGraph::decode_into(&graph.free_offsets, &x, &mut poses);
            let r1 = graph.residuals_for(&poses);
            let predicted = &r0 + jacobian.column(col) * step;
            assert!((r1 - predicted).norm() < 1e-8);
        }
    }
}
