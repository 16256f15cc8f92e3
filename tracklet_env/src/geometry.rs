//! Pad-plane geometry of a module.

use crate::error::EnvError;
use crate::types::{ModuleId, PadAddress};
use serde::{Deserialize, Serialize};

/// Read-only pad layout of one module.
///
/// Rows run along z (pitch `pad_length`), columns along y (pitch
/// `pad_width`). Pads are tilted by `atan(tilt_tangent)` relative to z.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PadPlane {
    /// Row pitch along z
    pub pad_length: f64,

    /// Column pitch along y
    pub pad_width: f64,

    /// Tangent of the pad tilt angle
    pub tilt_tangent: f64,

    /// Number of pad rows
    pub n_rows: u16,

    /// Number of pad columns
    pub n_cols: u16,

    /// z of the lower edge of row 0
    pub z_origin: f64,

    /// y of the lower edge of column 0
    pub y_origin: f64,
}

impl Default for PadPlane {
    fn default() -> Self {
        Self {
            pad_length: 8.0,
            pad_width: 0.7,
            tilt_tangent: 0.0,
            n_rows: 16,
            n_cols: 144,
            z_origin: -64.0,
            y_origin: -50.4,
        }
    }
}

impl PadPlane {
    /// Row containing `z`, if any.
    pub fn row_at(&self, z: f64) -> Option<u16> {
        let r = ((z - self.z_origin) / self.pad_length).floor();
        (r >= 0.0 && r < self.n_rows as f64).then_some(r as u16)
    }

    /// Column containing `y`, if any.
    pub fn col_at(&self, y: f64) -> Option<u16> {
        let c = ((y - self.y_origin) / self.pad_width).floor();
        (c >= 0.0 && c < self.n_cols as f64).then_some(c as u16)
    }

    /// z of the center of `row`.
    pub fn row_center(&self, row: u16) -> f64 {
        self.z_origin + (row as f64 + 0.5) * self.pad_length
    }

    /// y of the center of `col`.
    pub fn col_center(&self, col: u16) -> f64 {
        self.y_origin + (col as f64 + 0.5) * self.pad_width
    }

    /// Pad closest to (y, z), clamped onto the plane.
    pub fn nearest_address(&self, y: f64, z: f64) -> PadAddress {
        let row = ((z - self.z_origin) / self.pad_length).floor();
        let col = ((y - self.y_origin) / self.pad_width).floor();
        PadAddress::new(
            row.clamp(0.0, self.n_rows.saturating_sub(1) as f64) as u16,
            col.clamp(0.0, self.n_cols.saturating_sub(1) as f64) as u16,
        )
    }

    /// Pad under the point (y, z) of `module`.
    pub fn address_at(&self, module: ModuleId, y: f64, z: f64) -> Result<PadAddress, EnvError> {
        match (self.row_at(z), self.col_at(y)) {
            (Some(row), Some(col)) => Ok(PadAddress::new(row, col)),
            _ => Err(EnvError::OutsidePadPlane { module, y, z }),
        }
    }
}

/// Accessor for module pad geometry.
pub trait GeometryService {
    /// Returns the pad plane of `module`.
    fn pad_plane(&self, module: ModuleId) -> Result<PadPlane, EnvError>;
}
