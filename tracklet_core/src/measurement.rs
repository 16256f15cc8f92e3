//! Cluster measurement record.

use serde::{Deserialize, Serialize};

/// One reconstructed cluster of one time slot.
///
/// Produced upstream by clusterization and never mutated by the
/// estimator. Ownership markers (used/shared) live in the
/// `UsageArbiter`, keyed by the measurement's arena index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Radial coordinate (one value per slot, up to calibration jitter)
    pub x: f64,

    /// Transverse coordinate, center-of-gravity estimate
    pub y: f64,

    /// Longitudinal coordinate (pad-row center)
    pub z: f64,

    /// Signed charge
    pub q: f64,

    /// Pad row
    pub row: u16,

    /// Pad column of the maximum signal
    pub col: u16,

    /// Discretized radial slot (time bin)
    pub slot: u16,

    /// Cluster lies inside the drift volume
    pub in_active_volume: bool,

    /// Center of the pad with the maximum signal
    pub y_pad: f64,

    /// Digitization-time transverse variance (0 if unknown)
    pub s2y: f64,

    /// Simulation truth label
    pub label: Option<i32>,
}

impl Measurement {
    /// Creates an in-volume measurement on row 0 / column 0.
    pub fn new(slot: u16, x: f64, y: f64, z: f64, q: f64) -> Self {
        Self {
            x,
            y,
            z,
            q,
            row: 0,
            col: 0,
            slot,
            in_active_volume: true,
            y_pad: y,
            s2y: 0.0,
            label: None,
        }
    }

    /// Sets the pad address and the center of that pad.
    pub fn with_pad(mut self, row: u16, col: u16, y_pad: f64) -> Self {
        self.row = row;
        self.col = col;
        self.y_pad = y_pad;
        self
    }

    /// Sets the digitization-time variance.
    pub fn with_variance(mut self, s2y: f64) -> Self {
        self.s2y = s2y;
        self
    }

    /// Sets the simulation label.
    pub fn with_label(mut self, label: i32) -> Self {
        self.label = Some(label);
        self
    }

    /// Marks the cluster as outside the drift volume.
    pub fn outside_active_volume(mut self) -> Self {
        self.in_active_volume = false;
        self
    }
}
