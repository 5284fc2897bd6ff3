/// The calibrated camera model shared by both solver backends
pub mod camera;

/// The marker map and its YAML persistence
pub mod map;

/// Boundary messages exchanged with the detector and publisher collaborators
pub mod msg;

/// Per-frame marker observations and canonical corner geometry
pub mod observation;

/// The pose-estimation and map-update engine
pub mod solver;

/// Rigid transforms with covariance and the invalid-pose sentinel
pub mod transform;

/// Small shared math helpers
pub mod utils;
