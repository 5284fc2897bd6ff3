use crate::camera::CameraInfo;
use crate::map::{Map, Marker};
use crate::observation::Observations;
use crate::transform::TransformWithCovariance;

/// The closed-form perspective-n-point backend
pub mod geometric;

/// The factor-graph backend built on nonlinear least squares
pub mod graph;

pub use geometric::GeometricSolver;
pub use graph::GraphSolver;

/// Tuning knobs shared by the solver backends.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Dispatch to the factor-graph backend instead of the geometric one.
    pub use_factor_graph: bool,
    /// Let the factor-graph map update admit markers not yet in the map.
    pub add_unknown_markers: bool,
    /// Per-corner pixel standard deviation of the detector.
    pub corner_sigma: f64,
    /// Smallest standard deviation accepted for a between-factor or prior
    /// noise model; degenerate (zero) covariances are floored here.
    pub between_sigma_floor: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            use_factor_graph: true,
            add_unknown_markers: true,
            corner_sigma: 0.5,
            between_sigma_floor: 1e-4,
        }
    }
}

/// Estimate the camera pose in the map frame from one observation batch.
pub trait Localize {
    fn localize(
        &self,
        camera: &CameraInfo,
        observations: &Observations,
        map: &Map,
    ) -> TransformWithCovariance;
}

/// Refine the map from one observation batch and a solved camera pose.
pub trait UpdateMap {
    fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        camera: &CameraInfo,
        observations: &Observations,
        map: &mut Map,
    );
}

impl Localize for GeometricSolver {
    fn localize(
        &self,
        camera: &CameraInfo,
        observations: &Observations,
        map: &Map,
    ) -> TransformWithCovariance {
        self.solve_t_map_camera(camera, observations, map)
    }
}

impl UpdateMap for GeometricSolver {
    /// Per observation, compose `t_map_marker = t_map_camera * t_camera_marker`
    /// and either fold it into the existing marker's running average or insert
    /// a new marker. A valid `t_map_camera` (at least one known marker this
    /// frame) is the anchor requirement; without it nothing is written.
    fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        camera: &CameraInfo,
        observations: &Observations,
        map: &mut Map,
    ) {
        let Some(t_map_camera) = t_map_camera.isometry() else {
            return;
        };
        for observation in observations.iter() {
            let t_camera_marker =
                self.solve_t_camera_marker(camera, observation, map.marker_length());
            let Some(t_camera_marker) = t_camera_marker.isometry() else {
                continue;
            };
            let t_map_marker =
                TransformWithCovariance::from_isometry(t_map_camera * t_camera_marker);
            match map.find_mut(observation.id) {
                Some(marker) => marker.update_simple_average(&t_map_marker),
                None => {
                    if let Err(e) = map.insert(Marker::new(observation.id, t_map_marker)) {
                        log::warn!("Cannot insert marker: {}", e);
                    }
                }
            }
        }
    }
}

impl Localize for GraphSolver {
    fn localize(
        &self,
        camera: &CameraInfo,
        observations: &Observations,
        map: &Map,
    ) -> TransformWithCovariance {
        self.solve_t_map_camera(camera, observations, map)
    }
}

impl UpdateMap for GraphSolver {
    fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        camera: &CameraInfo,
        observations: &Observations,
        map: &mut Map,
    ) {
        GraphSolver::update_map(self, t_map_camera, camera, observations, map);
    }
}

/// The core driver: owns one solver of each kind and routes each observation
/// batch through solve, update, and insert according to the configuration.
///
/// The driver borrows the map exclusively for the duration of a call; the
/// solvers themselves keep no state between calls.
pub struct VlamDriver {
    config: SolverConfig,
    geometric: GeometricSolver,
    graph: GraphSolver,
}

impl VlamDriver {
    pub fn new(config: SolverConfig) -> Self {
        let graph = GraphSolver::new(&config);
        Self {
            config,
            geometric: GeometricSolver::new(),
            graph,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Camera pose in the map frame for this batch, or `Invalid` when no
    /// observed marker is known.
    pub fn localize(
        &self,
        camera: &CameraInfo,
        observations: &Observations,
        map: &Map,
    ) -> TransformWithCovariance {
        if self.config.use_factor_graph {
            self.graph.localize(camera, observations, map)
        } else {
            self.geometric.localize(camera, observations, map)
        }
    }

    /// Fold this batch into the map. Fixed markers are never mutated, and an
    /// invalid camera pose makes the whole call a no-op.
    pub fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        camera: &CameraInfo,
        observations: &Observations,
        map: &mut Map,
    ) {
        if self.config.use_factor_graph {
            UpdateMap::update_map(&self.graph, t_map_camera, camera, observations, map);
        } else {
            UpdateMap::update_map(&self.geometric, t_map_camera, camera, observations, map);
        }
    }
}
