//! In-memory detector description backed by lookup tables.

use crate::calibration::{CalibrationParams, CalibrationService};
use crate::error::EnvError;
use crate::geometry::{GeometryService, PadPlane};
use crate::types::{ModuleId, PadAddress};
use crate::usage::KinkFlags;
use std::collections::{HashMap, HashSet};

/// Detector description held entirely in memory.
///
/// Modules without an explicit pad plane fall back to `default_plane` if
/// one is set; calibration overrides are per module, otherwise
/// `default_calibration` applies to every pad.
#[derive(Debug, Clone, Default)]
pub struct StaticDetector {
    planes: HashMap<ModuleId, PadPlane>,
    default_plane: Option<PadPlane>,
    calibrations: HashMap<ModuleId, CalibrationParams>,
    default_calibration: CalibrationParams,
    kink_modules: HashSet<ModuleId>,
}

impl StaticDetector {
    /// Every module shares the same pad plane and calibration.
    pub fn uniform(plane: PadPlane, calibration: CalibrationParams) -> Self {
        Self {
            default_plane: Some(plane),
            default_calibration: calibration,
            ..Default::default()
        }
    }

    /// Registers a module-specific pad plane.
    pub fn with_plane(mut self, module: ModuleId, plane: PadPlane) -> Self {
        self.planes.insert(module, plane);
        self
    }

    /// Registers a module-specific calibration.
    pub fn with_calibration(mut self, module: ModuleId, params: CalibrationParams) -> Self {
        self.calibrations.insert(module, params);
        self
    }

    /// Flags every position in `module` as a kink.
    pub fn with_kink(mut self, module: ModuleId) -> Self {
        self.kink_modules.insert(module);
        self
    }
}

impl GeometryService for StaticDetector {
    fn pad_plane(&self, module: ModuleId) -> Result<PadPlane, EnvError> {
        self.planes
            .get(&module)
            .copied()
            .or(self.default_plane)
            .ok_or(EnvError::UnknownModule(module))
    }
}

impl CalibrationService for StaticDetector {
    fn calibration(&self, module: ModuleId, pad: PadAddress) -> Result<CalibrationParams, EnvError> {
        let plane = self.pad_plane(module)?;
        if pad.row >= plane.n_rows || pad.col >= plane.n_cols {
            return Err(EnvError::OutsidePadPlane {
                module,
                y: plane.col_center(pad.col),
                z: plane.row_center(pad.row),
            });
        }
        let params = self
            .calibrations
            .get(&module)
            .copied()
            .unwrap_or(self.default_calibration);
        params.validate()?;
        Ok(params)
    }
}

impl KinkFlags for StaticDetector {
    fn is_kink(&self, module: ModuleId, _y: f64, _z: f64) -> bool {
        self.kink_modules.contains(&module)
    }
}
