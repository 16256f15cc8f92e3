//! Calibration binding of a tracklet.
//!
//! Resolved once per tracklet, at the pad the reference line points to
//! on entrance, then cached as an immutable snapshot.

use crate::error::TrackletError;
use serde::{Deserialize, Serialize};
use tracklet_env::{CalibrationParams, CalibrationService, GeometryService, ModuleId, PadAddress};

/// Calibration constants in the form the error model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    pub drift_velocity: f64,
    pub t0: f64,
    /// Variance of the pad response function
    pub s2_prf: f64,
    pub lorentz_tangent: f64,
    pub diff_l: f64,
    pub diff_t: f64,
}

impl From<CalibrationParams> for CalibrationSnapshot {
    fn from(p: CalibrationParams) -> Self {
        Self {
            drift_velocity: p.drift_velocity,
            t0: p.t0,
            s2_prf: p.prf_width * p.prf_width,
            lorentz_tangent: p.lorentz_tangent,
            diff_l: p.diff_l,
            diff_t: p.diff_t,
        }
    }
}

impl CalibrationSnapshot {
    /// Drift distance of the center of `slot`.
    pub fn drift_distance(&self, slot: u16, slot_time_width: f64) -> f64 {
        let t = (slot as f64 + 0.5) * slot_time_width - self.t0;
        (self.drift_velocity * t).max(0.0)
    }

    /// Transverse cluster variance at drift distance `d`.
    ///
    /// PRF width, transverse diffusion and the spread of a track inclined
    /// by `slope` relative to the Lorentz angle across one slot.
    pub fn cluster_variance(&self, d: f64, slope: f64, spacing: f64) -> f64 {
        let inclination = slope - self.lorentz_tangent;
        self.s2_prf + self.diff_t * self.diff_t * d + inclination * inclination * spacing * spacing / 12.0
    }

    /// Longitudinal diffusion variance at drift distance `d`.
    pub fn longitudinal_variance(&self, d: f64) -> f64 {
        self.diff_l * self.diff_l * d
    }
}

/// Pad geometry seen by the tracklet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PadSnapshot {
    pub length: f64,
    pub width: f64,
    pub tilt_tangent: f64,
}

impl PadSnapshot {
    /// Variance of a uniform position along the pad length.
    pub fn s2_length(&self) -> f64 {
        self.length * self.length / 12.0
    }

    /// Variance of a uniform position across the pad width.
    pub fn s2_width(&self) -> f64 {
        self.width * self.width / 12.0
    }
}

/// Calibration and pad geometry bound to one tracklet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBinding {
    pub calibration: CalibrationSnapshot,
    pub pad: PadSnapshot,
    /// Pad the binding was resolved at
    pub address: PadAddress,
}

impl CalibrationBinding {
    /// Looks up geometry and calibration at the pad nearest to (y, z).
    pub fn resolve<S>(services: &S, module: ModuleId, y: f64, z: f64) -> Result<Self, TrackletError>
    where
        S: GeometryService + CalibrationService + ?Sized,
    {
        let plane = services.pad_plane(module)?;
        let address = plane.nearest_address(y, z);
        let params = services.calibration(module, address)?;

        Ok(Self {
            calibration: params.into(),
            pad: PadSnapshot {
                length: plane.pad_length,
                width: plane.pad_width,
                tilt_tangent: plane.tilt_tangent,
            },
            address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tracklet_env::{PadPlane, StaticDetector};

    #[test]
    fn test_drift_distance_clamped_before_t0() {
        let snapshot = CalibrationSnapshot::from(CalibrationParams {
            t0: 0.5,
            ..Default::default()
        });
        assert_eq!(snapshot.drift_distance(0, 0.1), 0.0);
        assert_relative_eq!(snapshot.drift_distance(10, 0.1), 1.5 * 0.55, epsilon = 1e-12);
    }

    #[test]
    fn test_cluster_variance_grows_with_drift() {
        let snapshot = CalibrationSnapshot::from(CalibrationParams::default());
        let near = snapshot.cluster_variance(0.1, 0.0, 0.3);
        let far = snapshot.cluster_variance(3.0, 0.0, 0.3);
        assert!(far > near);
        assert_relative_eq!(near, 0.04 * 0.04 + 0.02 * 0.02 * 0.1, epsilon = 1e-15);
    }

    #[test]
    fn test_resolve_uses_nearest_pad() {
        let plane = PadPlane {
            tilt_tangent: 0.035,
            ..Default::default()
        };
        let detector = StaticDetector::uniform(plane, CalibrationParams::default());
        let binding = CalibrationBinding::resolve(&detector, ModuleId(2), 1000.0, 0.0).unwrap();

        assert_eq!(binding.address.col, plane.n_cols - 1);
        assert_eq!(binding.pad.tilt_tangent, 0.035);
        assert_relative_eq!(binding.calibration.s2_prf, 0.0016, epsilon = 1e-15);
    }
}
