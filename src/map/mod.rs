use std::collections::BTreeMap;

use crate::map::error::DuplicateMarkerError;
use crate::observation::Observations;
use crate::transform::TransformWithCovariance;

/// Defines the errors related to the marker map and its persistence
pub mod error;

/// Reading and writing the persisted YAML map file
pub mod yaml;

/// Which covariance fidelity is persisted for this map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStyle {
    Pose,
    Covariance,
    Corners,
}

impl MapStyle {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Pose),
            1 => Some(Self::Covariance),
            2 => Some(Self::Corners),
            _ => None,
        }
    }

    pub fn to_i32(self) -> i32 {
        match self {
            Self::Pose => 0,
            Self::Covariance => 1,
            Self::Corners => 2,
        }
    }
}

/// How the map comes into existence at startup.
///
/// `LoadFromFile` falls through to `FixedMarker` when the file cannot be
/// read. `FirstObservation` defers construction until the first observation
/// batch arrives, then seats the lowest observed marker id at a configured
/// camera pose as a fixed marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapInitMode {
    LoadFromFile,
    FixedMarker,
    FirstObservation,
}

impl MapInitMode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::LoadFromFile),
            1 => Some(Self::FixedMarker),
            2 => Some(Self::FirstObservation),
            _ => None,
        }
    }
}

/// One fiducial marker and its estimated pose in the map frame.
///
/// A fixed marker's pose is ground truth: it anchors the map frame and is
/// never updated. Non-fixed markers are refined by the solvers, and
/// `update_count` records how many estimates have been folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    id: i32,
    t_map_marker: TransformWithCovariance,
    update_count: u32,
    is_fixed: bool,
}

impl Marker {
    /// A marker freshly inserted from a solved pose.
    pub fn new(id: i32, t_map_marker: TransformWithCovariance) -> Self {
        Self {
            id,
            t_map_marker,
            update_count: 1,
            is_fixed: false,
        }
    }

    /// A ground-truth marker, typically placed at map initialization.
    pub fn new_fixed(id: i32, t_map_marker: TransformWithCovariance) -> Self {
        Self {
            id,
            t_map_marker,
            update_count: 0,
            is_fixed: true,
        }
    }

    /// Rebuild a marker from persisted state.
    pub fn from_parts(
        id: i32,
        t_map_marker: TransformWithCovariance,
        update_count: u32,
        is_fixed: bool,
    ) -> Self {
        Self {
            id,
            t_map_marker,
            update_count,
            is_fixed,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn t_map_marker(&self) -> &TransformWithCovariance {
        &self.t_map_marker
    }

    pub fn update_count(&self) -> u32 {
        self.update_count
    }

    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    /// Fold a new pose estimate into the running average. No-op on a fixed
    /// marker.
    pub fn update_simple_average(&mut self, t_map_marker: &TransformWithCovariance) {
        if self.is_fixed {
            return;
        }
        self.t_map_marker
            .update_simple_average(t_map_marker, self.update_count);
        self.update_count += 1;
    }

    /// Replace the pose and covariance with an optimizer result. No-op on a
    /// fixed marker.
    pub fn record_optimized(&mut self, t_map_marker: TransformWithCovariance) {
        if self.is_fixed {
            return;
        }
        self.t_map_marker = t_map_marker;
        self.update_count += 1;
    }
}

/// The map of markers, indexed by id.
///
/// `marker_length` is the physical side length shared by every marker and is
/// immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    markers: BTreeMap<i32, Marker>,
    marker_length: f64,
    map_style: MapStyle,
}

impl Map {
    pub fn new(map_style: MapStyle, marker_length: f64) -> Self {
        Self {
            markers: BTreeMap::new(),
            marker_length,
            map_style,
        }
    }

    /// An empty map seeded with a single fixed marker (initialization mode 1
    /// and the deferred mode 2 both end up here).
    pub fn with_fixed_marker(
        map_style: MapStyle,
        marker_length: f64,
        id: i32,
        t_map_marker: TransformWithCovariance,
    ) -> Self {
        let mut map = Self::new(map_style, marker_length);
        map.markers.insert(id, Marker::new_fixed(id, t_map_marker));
        map
    }

    pub fn marker_length(&self) -> f64 {
        self.marker_length
    }

    pub fn map_style(&self) -> MapStyle {
        self.map_style
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn find(&self, id: i32) -> Option<&Marker> {
        self.markers.get(&id)
    }

    pub fn find_mut(&mut self, id: i32) -> Option<&mut Marker> {
        self.markers.get_mut(&id)
    }

    /// Iterate markers in ascending id order.
    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    pub fn insert(&mut self, marker: Marker) -> Result<(), DuplicateMarkerError> {
        if self.markers.contains_key(&marker.id) {
            return Err(DuplicateMarkerError::new(marker.id));
        }
        self.markers.insert(marker.id, marker);
        Ok(())
    }

    /// For each observation, the map pose of the observed marker if it is
    /// known, else `Invalid`. Preserves observation order.
    pub fn find_t_map_markers(&self, observations: &Observations) -> Vec<TransformWithCovariance> {
        observations
            .iter()
            .map(|obs| {
                self.markers
                    .get(&obs.id)
                    .map(|marker| marker.t_map_marker.clone())
                    .unwrap_or(TransformWithCovariance::Invalid)
            })
            .collect()
    }
}
