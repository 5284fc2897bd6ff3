use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::map::error::MapFileError;
use crate::map::{Map, MapStyle, Marker};
use crate::transform::TransformWithCovariance;

/// One marker entry in the persisted file. Field names are part of the file
/// format: `u` is the update count, `f` the fixed flag (0/1), `xyz`/`rpy` the
/// pose mean, and `cov` the row-major 36-entry covariance, omitted when the
/// map style persists poses only.
#[derive(Debug, Serialize, Deserialize)]
struct MarkerEntry {
    id: i32,
    u: u32,
    f: i32,
    xyz: [f64; 3],
    rpy: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cov: Option<Vec<f64>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MapFile {
    marker_length: f64,
    #[serde(default)]
    map_style: i32,
    markers: Vec<MarkerEntry>,
}

/// Serialize a map to the YAML map-file format.
pub fn to_yaml(map: &Map) -> Result<String, MapFileError> {
    let mut markers = Vec::with_capacity(map.len());
    for marker in map.markers() {
        let Some(mean) = marker.t_map_marker().mean() else {
            log::warn!("Marker {} has no pose; not persisting it.", marker.id());
            continue;
        };
        let cov = match map.map_style() {
            MapStyle::Pose => None,
            MapStyle::Covariance | MapStyle::Corners => {
                let c = marker.t_map_marker().covariance().unwrap();
                Some((0..6).flat_map(|i| (0..6).map(move |j| c[(i, j)])).collect())
            }
        };
        markers.push(MarkerEntry {
            id: marker.id(),
            u: marker.update_count(),
            f: marker.is_fixed() as i32,
            xyz: [mean[0], mean[1], mean[2]],
            rpy: [mean[3], mean[4], mean[5]],
            cov,
        });
    }
    let file = MapFile {
        marker_length: map.marker_length(),
        map_style: map.map_style().to_i32(),
        markers,
    };
    serde_yaml::to_string(&file).map_err(|e| MapFileError::new(e.to_string()))
}

/// Parse a map from the YAML map-file format. A missing `map_style` key is
/// read as `Pose`.
pub fn from_yaml(text: &str) -> Result<Map, MapFileError> {
    let file: MapFile =
        serde_yaml::from_str(text).map_err(|e| MapFileError::new(e.to_string()))?;
    if !(file.marker_length > 0.0) {
        return Err(MapFileError::new(format!(
            "marker_length must be positive, got {}",
            file.marker_length
        )));
    }
    let style = MapStyle::from_i32(file.map_style).ok_or_else(|| {
        MapFileError::new(format!("unknown map_style {}", file.map_style))
    })?;

    let mut map = Map::new(style, file.marker_length);
    for entry in file.markers {
        let mean = [
            entry.xyz[0],
            entry.xyz[1],
            entry.xyz[2],
            entry.rpy[0],
            entry.rpy[1],
            entry.rpy[2],
        ];
        let mut cov = [0.0; 36];
        if let Some(values) = &entry.cov {
            if values.len() != 36 {
                return Err(MapFileError::new(format!(
                    "marker {} has a covariance of length {}, expected 36",
                    entry.id,
                    values.len()
                )));
            }
            cov.copy_from_slice(values);
        }
        let t_map_marker = TransformWithCovariance::from_mean_and_covariance(&mean, &cov);
        map.insert(Marker::from_parts(
            entry.id,
            t_map_marker,
            entry.u,
            entry.f != 0,
        ))
        .map_err(|e| MapFileError::new(e.to_string()))?;
    }
    Ok(map)
}

pub fn save_map(map: &Map, path: &Path) -> Result<(), MapFileError> {
    let text = to_yaml(map)?;
    std::fs::write(path, text)
        .map_err(|e| MapFileError::new(format!("cannot write {}: {}", path.display(), e)))
}

pub fn load_map(path: &Path) -> Result<Map, MapFileError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| MapFileError::new(format!("cannot read {}: {}", path.display(), e)))?;
    from_yaml(&text)
}
