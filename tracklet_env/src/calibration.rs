//! Calibration constants of a pad.

use crate::error::EnvError;
use crate::types::{ModuleId, PadAddress};
use serde::{Deserialize, Serialize};

/// Calibration constants for one (module, row, column).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Drift velocity (length per unit time)
    pub drift_velocity: f64,

    /// Trigger delay t0 (time units)
    pub t0: f64,

    /// Tangent of the Lorentz angle
    pub lorentz_tangent: f64,

    /// Width (sigma) of the pad response function
    pub prf_width: f64,

    /// Longitudinal diffusion coefficient
    pub diff_l: f64,

    /// Transverse diffusion coefficient
    pub diff_t: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            drift_velocity: 1.5,
            t0: 0.0,
            lorentz_tangent: 0.0,
            prf_width: 0.04,
            diff_l: 0.02,
            diff_t: 0.02,
        }
    }
}

impl CalibrationParams {
    /// Rejects records that would poison the error model.
    pub fn validate(&self) -> Result<(), EnvError> {
        if !(self.drift_velocity.is_finite() && self.drift_velocity > 0.0) {
            return Err(EnvError::calibration(format!(
                "drift velocity must be positive, got {}",
                self.drift_velocity
            )));
        }
        if self.prf_width < 0.0 || self.diff_l < 0.0 || self.diff_t < 0.0 {
            return Err(EnvError::calibration("negative width or diffusion coefficient"));
        }
        Ok(())
    }
}

/// Accessor for per-pad calibration.
pub trait CalibrationService {
    /// Returns the calibration of `pad` in `module`.
    fn calibration(&self, module: ModuleId, pad: PadAddress) -> Result<CalibrationParams, EnvError>;
}
