//! Fitted segment and covariance propagation along the radial axis.

use crate::config::SystematicErrors;
use crate::fit::ZEstimate;
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

/// Rotates a diagonal (y, z) covariance into the tilted pad frame.
///
/// For `tilt_tangent == 0` the input diagonal is returned unchanged.
pub fn rotate_tilt(var_y: f64, var_z: f64, tilt_tangent: f64) -> Matrix2<f64> {
    let t = tilt_tangent;
    let t2 = t * t;
    let norm = 1.0 / (1.0 + t2);
    let cyy = (var_y + t2 * var_z) * norm;
    let cyz = t * (var_z - var_y) * norm;
    let czz = (t2 * var_y + var_z) * norm;
    Matrix2::new(cyy, cyz, cyz, czz)
}

/// Result of a successful local fit.
///
/// All parameters refer to radial offsets `u = x - x0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Entrance radial coordinate
    pub x0: f64,
    pub y0: f64,
    pub dydx: f64,
    pub z0: f64,
    pub dzdx: f64,
    /// Covariance of (y0, dy/dx), scaled by the reduced chi2
    pub param_cov: Matrix2<f64>,
    /// Radial point of minimum transverse variance
    pub x_ref: f64,
    /// Reported Var(y) at `x_ref`
    pub var_y: f64,
    /// Reported Var(z) at `x_ref`
    pub var_z: f64,
    /// Longitudinal variance before systematics and rotation
    pub s2z: f64,
    pub chi2: f64,
    pub ndf: usize,
    pub n_points: usize,
    pub z_estimate: ZEstimate,
    /// Positions were tilt-corrected before the fit
    pub tilt_corrected: bool,
    pub tilt_tangent: f64,
    pub systematics: SystematicErrors,
}

impl FitResult {
    /// Fitted transverse position at radial coordinate `x`.
    pub fn y_at(&self, x: f64) -> f64 {
        self.y0 + self.dydx * (x - self.x0)
    }

    /// Fitted longitudinal position at radial coordinate `x`.
    pub fn z_at(&self, x: f64) -> f64 {
        self.z0 + self.dzdx * (x - self.x0)
    }

    /// Raw transverse variance at offset `xr` (no systematics).
    pub fn raw_var_y(&self, xr: f64) -> f64 {
        let c = &self.param_cov;
        c[(0, 0)] + 2.0 * xr * c[(0, 1)] + xr * xr * c[(1, 1)]
    }

    /// Reported (y, z) covariance at radial offset `xr` from `x0`.
    ///
    /// Systematic floors are added before the tilt rotation; the rotation is
    /// skipped when the positions were already tilt-corrected.
    pub fn covariance_at(&self, xr: f64) -> Matrix2<f64> {
        let vy = self.raw_var_y(xr) + self.systematics.sy2;
        let vz = self.s2z + self.systematics.sz2;
        if self.tilt_corrected {
            Matrix2::new(vy, 0.0, 0.0, vz)
        } else {
            rotate_tilt(vy, vz, self.tilt_tangent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn sample_fit(tilt_corrected: bool, tilt_tangent: f64) -> FitResult {
        FitResult {
            x0: 0.0,
            y0: 1.0,
            dydx: 0.1,
            z0: 5.0,
            dzdx: 0.2,
            param_cov: Matrix2::new(4e-4, -1e-4, -1e-4, 5e-5),
            x_ref: 2.0,
            var_y: 0.0,
            var_z: 0.0,
            s2z: 64.0 / 12.0,
            chi2: 10.0,
            ndf: 10,
            n_points: 12,
            z_estimate: ZEstimate::PadGeometry,
            tilt_corrected,
            tilt_tangent,
            systematics: SystematicErrors { sy2: 1e-4, sz2: 0.0 },
        }
    }

    #[test]
    fn test_zero_tilt_is_identity() {
        let c = rotate_tilt(0.3, 5.0, 0.0);
        assert_eq!(c, Matrix2::new(0.3, 0.0, 0.0, 5.0));
    }

    #[test]
    fn test_rotation_preserves_trace() {
        let c = rotate_tilt(0.01, 5.3, 0.035);
        assert_relative_eq!(c.trace(), 5.31, epsilon = 1e-12);
        assert_relative_eq!(c[(0, 1)], c[(1, 0)]);
        assert!(c[(0, 1)] > 0.0);
    }

    #[test]
    fn test_covariance_at_adds_systematics() {
        let fit = sample_fit(true, 0.1);
        let c = fit.covariance_at(0.0);
        assert_relative_eq!(c[(0, 0)], 4e-4 + 1e-4, epsilon = 1e-15);
        assert_relative_eq!(c[(1, 1)], 64.0 / 12.0, epsilon = 1e-12);
        assert_eq!(c[(0, 1)], 0.0);
    }

    #[test]
    fn test_untilted_fit_gets_rotated() {
        let fit = sample_fit(false, 0.1);
        let c = fit.covariance_at(0.0);
        assert!(c[(0, 1)] != 0.0);
        assert!(c[(0, 0)] > 5e-4);
    }

    #[test]
    fn test_positions_along_line() {
        let fit = sample_fit(true, 0.0);
        assert_relative_eq!(fit.y_at(2.0), 1.2);
        assert_relative_eq!(fit.z_at(-1.0), 4.8);
    }

    proptest! {
        #[test]
        fn prop_rotated_covariance_is_positive(
            vy in 1e-6f64..10.0,
            vz in 1e-6f64..10.0,
            t in -0.2f64..0.2,
        ) {
            let c = rotate_tilt(vy, vz, t);
            prop_assert!(c[(0, 0)] > 0.0);
            prop_assert!(c[(1, 1)] > 0.0);
            prop_assert!(c.determinant() > -1e-12);
        }
    }
}
