extern crate nalgebra as na;

/// A square marker's four corners in its own reference frame, before scaling
/// by the marker's half side length.
///
/// The marker lies in its local XY-plane centered at the origin. The order is
/// kept consistent with the detector and OpenCV conventions: top-left,
/// top-right, bottom-right, bottom-left as seen in the image.
pub const MARKER_CORNERS: [na::Point3<f64>; 4] = [
    na::Point3::new(-1.0, 1.0, 0.0),
    na::Point3::new(1.0, 1.0, 0.0),
    na::Point3::new(1.0, -1.0, 0.0),
    na::Point3::new(-1.0, -1.0, 0.0),
];

/// The four corners of a marker with side `marker_length`, in the marker frame.
pub fn marker_corners(marker_length: f64) -> [na::Point3<f64>; 4] {
    let half = marker_length * 0.5;
    MARKER_CORNERS.map(|c| na::Point3::from(c.coords * half))
}

/// The four corners of a marker with side `marker_length`, transformed by
/// `t_frame_marker` into some other frame (typically the map frame).
pub fn marker_corners_in(
    t_frame_marker: &na::Isometry3<f64>,
    marker_length: f64,
) -> [na::Point3<f64>; 4] {
    marker_corners(marker_length).map(|c| t_frame_marker.transform_point(&c))
}

/// One detected marker in one frame: the marker id and the four image-plane
/// corner coordinates in canonical order. Pure transport; no interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: i32,
    pub corners: [na::Point2<f64>; 4],
}

impl Observation {
    pub fn new(id: i32, corners: [na::Point2<f64>; 4]) -> Self {
        Self { id, corners }
    }

    /// Construct from the raw per-corner coordinate arrays a detector emits.
    pub fn from_raw(id: i32, x: &[f64; 4], y: &[f64; 4]) -> Self {
        Self {
            id,
            corners: std::array::from_fn(|i| na::Point2::new(x[i], y[i])),
        }
    }
}

/// The ordered sequence of observations extracted from a single frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations(pub Vec<Observation>);

impl Observations {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.0.iter()
    }
}

impl From<Vec<Observation>> for Observations {
    fn from(v: Vec<Observation>) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_corners() {
        let corners = marker_corners(0.1);
        assert_eq!(corners[0], na::Point3::new(-0.05, 0.05, 0.0));
        assert_eq!(corners[1], na::Point3::new(0.05, 0.05, 0.0));
        assert_eq!(corners[2], na::Point3::new(0.05, -0.05, 0.0));
        assert_eq!(corners[3], na::Point3::new(-0.05, -0.05, 0.0));
    }

    #[test]
    fn test_corners_follow_marker_pose() {
        let t = na::Isometry3::new(na::Vector3::new(1.0, 2.0, 3.0), na::Vector3::zeros());
        let corners = marker_corners_in(&t, 0.2);
        assert_eq!(corners[2], na::Point3::new(1.1, 1.9, 3.0));
    }

    #[test]
    fn test_from_raw_order() {
        let obs = Observation::from_raw(7, &[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(obs.id, 7);
        assert_eq!(obs.corners[0], na::Point2::new(1.0, 5.0));
        assert_eq!(obs.corners[3], na::Point2::new(4.0, 8.0));
    }
}
