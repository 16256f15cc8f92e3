//! Tunable thresholds of the estimator.
//!
//! Nothing here is process-global: a `TrackletConfig` is handed to each
//! tracklet at construction. Defaults are tuned for a 24-30 slot module
//! with 0.3 radial spacing per slot.

use serde::{Deserialize, Serialize};

/// Position/alignment variance floors added to every reported covariance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystematicErrors {
    /// Added to Var(y)
    pub sy2: f64,
    /// Added to Var(z)
    pub sz2: f64,
}

impl Default for SystematicErrors {
    fn default() -> Self {
        Self {
            sy2: 1e-4,
            sz2: 0.0,
        }
    }
}

/// Configuration for candidate search and local fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackletConfig {
    /// Road half-width in units of sqrt(12 * combined variance) (default: 3.0)
    pub road_sigmas: f64,

    /// Longitudinal road half-width in pad lengths (default: 1.5)
    pub z_road_pad_factor: f64,

    /// Extra longitudinal margin (default: 0.1)
    pub z_road_margin: f64,

    /// Upper bound on candidates returned per slot query (default: 16)
    pub max_candidates_per_slot: usize,

    /// Per-row outlier cut in robust sigmas (default: 3.0)
    pub row_outlier_sigmas: f64,

    /// Fraction of a row kept by the truncated mean (default: 0.8)
    pub truncation_keep: f64,

    /// Rows with fewer candidates skip the robust cut (default: 4)
    pub min_row_for_truncation: usize,

    /// Floor on the robust residual sigma (default: 1e-3)
    pub min_residual_sigma: f64,

    /// Minimum attached clusters as a fraction of the slot count (default: 0.4)
    pub min_attach_fraction: f64,

    /// Minimum clusters entering the line fit (default: 8)
    pub min_fit_clusters: usize,

    /// Minor/major row population ratio that qualifies as a row cross (default: 1/3)
    pub row_cross_balance: f64,

    /// Empirical offset applied to the charge-crossing radial estimate.
    /// Detector dependent; recalibrate for a new geometry (default: 0.055)
    pub row_cross_x_offset: f64,

    /// Charge-vs-x slopes below this fall back to pad geometry (default: 1e-6)
    pub charge_slope_epsilon: f64,

    /// Radial uncertainty of the crossing point (default: 0.3)
    pub row_cross_sigma_x: f64,

    /// Longitudinal floor at the crossing point (default: 0.05)
    pub row_cross_sigma_z0: f64,

    /// Drift time spanned by one slot (default: 0.1)
    pub slot_time_width: f64,

    /// Radial spacing used when neighbors cannot provide one (default: 0.3)
    pub nominal_slot_spacing: f64,

    /// Calibrated offset added to the extrapolated anchor (default: 0.0)
    pub anchor_offset: f64,

    /// Systematic variance floors
    pub systematics: SystematicErrors,
}

impl Default for TrackletConfig {
    fn default() -> Self {
        Self {
            road_sigmas: 3.0,
            z_road_pad_factor: 1.5,
            z_road_margin: 0.1,
            max_candidates_per_slot: 16,
            row_outlier_sigmas: 3.0,
            truncation_keep: 0.8,
            min_row_for_truncation: 4,
            min_residual_sigma: 1e-3,
            min_attach_fraction: 0.4,
            min_fit_clusters: 8,
            row_cross_balance: 1.0 / 3.0,
            row_cross_x_offset: 0.055,
            charge_slope_epsilon: 1e-6,
            row_cross_sigma_x: 0.3,
            row_cross_sigma_z0: 0.05,
            slot_time_width: 0.1,
            nominal_slot_spacing: 0.3,
            anchor_offset: 0.0,
            systematics: SystematicErrors::default(),
        }
    }
}

impl TrackletConfig {
    /// Parses a (possibly partial) JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Clusters required to keep a tracklet after the search.
    pub fn min_attached(&self, n_slots: usize) -> usize {
        (self.min_attach_fraction * n_slots as f64).ceil() as usize
    }
}

/// How the transverse position of a cluster is estimated before the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionEstimator {
    /// Charge-weighted center, corrected for the Lorentz displacement
    #[default]
    CenterOfGravity,
    /// Center of the pad with the largest signal
    RawDigitized,
}

/// Switches for `Tracklet::fit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FitOptions {
    /// Correct positions for pad tilt before fitting
    pub tilt_correction: bool,
    /// Include the predicted z in the cluster error model
    pub z_aware_errors: bool,
    /// Cluster position estimator
    pub estimator: PositionEstimator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_attached_rounds_up() {
        let config = TrackletConfig::default();
        assert_eq!(config.min_attached(24), 10);
        assert_eq!(config.min_attached(30), 12);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = TrackletConfig::from_json(r#"{ "road_sigmas": 4.0, "min_fit_clusters": 6 }"#)
            .unwrap();
        assert_eq!(config.road_sigmas, 4.0);
        assert_eq!(config.min_fit_clusters, 6);
        assert_eq!(config.truncation_keep, 0.8);
        assert_eq!(config.systematics, SystematicErrors::default());
    }
}
