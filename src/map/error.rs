use std::error::Error;
use std::fmt::{Debug, Display};

/// This error occurs when a marker is inserted into a map that already has a
/// marker with the same id.
pub struct DuplicateMarkerError {
    id: i32,
}

impl DuplicateMarkerError {
    pub fn new(id: i32) -> Self {
        Self { id }
    }

    pub fn id(&self) -> i32 {
        self.id
    }
}

impl Debug for DuplicateMarkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Marker id {} already exists in the map!", self.id)
    }
}

impl Display for DuplicateMarkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for DuplicateMarkerError {}

/// This error occurs when a persisted map file cannot be read, parsed, or
/// converted into a valid map.
pub struct MapFileError {
    reason: String,
}

impl MapFileError {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Debug for MapFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid map file: {}", self.reason)
    }
}

impl Display for MapFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for MapFileError {}
