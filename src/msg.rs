use serde::{Deserialize, Serialize};

use crate::camera::CameraInfo;
use crate::map::Map;
use crate::observation::{Observation, Observations};

extern crate nalgebra as na;

/// Camera calibration as it arrives on the wire: the row-major 3x3 intrinsic
/// matrix `k` and the 5-element distortion vector `d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfoMsg {
    pub k: [f64; 9],
    pub d: [f64; 5],
}

impl CameraInfoMsg {
    pub fn to_camera_info(&self) -> CameraInfo {
        CameraInfo::from_k_d(&self.k, &self.d)
    }

    pub fn from_camera_info(camera: &CameraInfo) -> Self {
        Self {
            k: [
                camera.fx, 0.0, camera.cx, //
                0.0, camera.fy, camera.cy, //
                0.0, 0.0, 1.0,
            ],
            d: camera.distortion,
        }
    }
}

/// One detected marker: id plus the four corner pixel coordinates in
/// canonical order (top-left, top-right, bottom-right, bottom-left).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationMsg {
    pub id: i32,
    pub x: [f64; 4],
    pub y: [f64; 4],
}

impl ObservationMsg {
    pub fn to_observation(&self) -> Observation {
        Observation::from_raw(self.id, &self.x, &self.y)
    }

    pub fn from_observation(observation: &Observation) -> Self {
        Self {
            id: observation.id,
            x: observation.corners.map(|c| c.x),
            y: observation.corners.map(|c| c.y),
        }
    }
}

/// One frame's worth of detector output: a timestamp in milliseconds, the
/// camera calibration, and the observed markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationsMsg {
    pub time: u64,
    pub camera_info: CameraInfoMsg,
    pub observations: Vec<ObservationMsg>,
}

impl ObservationsMsg {
    pub fn to_observations(&self) -> Observations {
        Observations(
            self.observations
                .iter()
                .map(ObservationMsg::to_observation)
                .collect(),
        )
    }
}

/// A pose in the map frame with its row-major 36-entry covariance over
/// `(x, y, z, roll, pitch, yaw)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovarianceMsg {
    pub xyz: [f64; 3],
    pub rpy: [f64; 3],
    pub cov: Vec<f64>,
}

/// The published map: parallel arrays of marker ids, fixed flags, and poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMsg {
    pub time: u64,
    pub marker_length: f64,
    pub map_style: i32,
    pub ids: Vec<i32>,
    pub fixed: Vec<u8>,
    pub poses: Vec<PoseWithCovarianceMsg>,
}

impl MapMsg {
    pub fn from_map(time: u64, map: &Map) -> Self {
        let mut ids = Vec::with_capacity(map.len());
        let mut fixed = Vec::with_capacity(map.len());
        let mut poses = Vec::with_capacity(map.len());
        for marker in map.markers() {
            let Some(mean) = marker.t_map_marker().mean() else {
                continue;
            };
            let cov = marker
                .t_map_marker()
                .covariance()
                .copied()
                .unwrap_or_else(na::Matrix6::zeros);
            ids.push(marker.id());
            fixed.push(marker.is_fixed() as u8);
            poses.push(PoseWithCovarianceMsg {
                xyz: [mean[0], mean[1], mean[2]],
                rpy: [mean[3], mean[4], mean[5]],
                cov: (0..6)
                    .flat_map(|i| (0..6).map(move |j| cov[(i, j)]))
                    .collect(),
            });
        }
        Self {
            time,
            marker_length: map.marker_length(),
            map_style: map.map_style().to_i32(),
            ids,
            fixed,
            poses,
        }
    }
}
