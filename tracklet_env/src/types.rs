//! Common identifiers for the tracklet environment.

use serde::{Deserialize, Serialize};

/// Identifier of one detector module (one chamber of one layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u16);

impl ModuleId {
    /// Returns the raw index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M{:03}", self.0)
    }
}

/// Index of a measurement inside the arena of the chamber that owns it.
///
/// Only meaningful together with the chamber (see `ClusterKey`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasurementId(pub u32);

impl MeasurementId {
    /// Creates an id from an arena position.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the arena position.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Globally unique handle of a cluster: module plus arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterKey {
    pub module: ModuleId,
    pub id: MeasurementId,
}

impl ClusterKey {
    pub fn new(module: ModuleId, id: MeasurementId) -> Self {
        Self { module, id }
    }
}

/// Pad address (row along z, column along y) within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PadAddress {
    pub row: u16,
    pub col: u16,
}

impl PadAddress {
    pub fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}
