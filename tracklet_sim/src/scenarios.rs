//! Reconstruction scenarios.

use crate::error::SimError;
use tracklet_core::{FitOptions, PositionEstimator};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// TRK-001: Straight tracks, one row, small noise
    Straight,

    /// TRK-002: Steeply inclined tracks
    Inclined,

    /// TRK-003: Tilted pads, tilt-corrected fit with z-aware errors
    Tilted,

    /// TRK-004: Tracks crossing a pad-row boundary
    RowCross,

    /// TRK-005: Large noise and background clusters
    Noisy,

    /// TRK-006: Low hit efficiency, most layers must be rejected
    Sparse,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Straight,
            ScenarioId::Inclined,
            ScenarioId::Tilted,
            ScenarioId::RowCross,
            ScenarioId::Noisy,
            ScenarioId::Sparse,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Straight => "straight",
            ScenarioId::Inclined => "inclined",
            ScenarioId::Tilted => "tilted",
            ScenarioId::RowCross => "row_cross",
            ScenarioId::Noisy => "noisy",
            ScenarioId::Sparse => "sparse",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Straight => "Single-row tracks, 0.02 noise, exact reference slope",
            ScenarioId::Inclined => "Transverse slopes up to 0.3, digitized-pad estimator",
            ScenarioId::Tilted => "2 degree pad tilt, longitudinal slopes up to 0.5",
            ScenarioId::RowCross => "Longitudinal slope 0.5 crossing a row boundary mid-module",
            ScenarioId::Noisy => "0.05 noise with 0.25 background clusters per slot",
            ScenarioId::Sparse => "20% hit efficiency, layers rejected as insufficient",
        }
    }

    /// Generator and estimator settings of the scenario.
    pub fn setup(&self) -> ScenarioSetup {
        let base = ScenarioSetup::default();
        match self {
            ScenarioId::Straight => base,
            ScenarioId::Inclined => ScenarioSetup {
                max_dydx: 0.3,
                estimator: PositionEstimator::RawDigitized,
                ..base
            },
            ScenarioId::Tilted => ScenarioSetup {
                tilt_tangent: 0.035,
                max_dzdx: 0.5,
                tilt_correction: true,
                z_aware_errors: true,
                ..base
            },
            ScenarioId::RowCross => ScenarioSetup {
                row_cross_dzdx: Some(0.5),
                ..base
            },
            ScenarioId::Noisy => ScenarioSetup {
                position_noise: 0.05,
                background_per_slot: 0.25,
                ..base
            },
            ScenarioId::Sparse => ScenarioSetup {
                hit_efficiency: 0.2,
                ..base
            },
        }
    }
}

/// Knobs a scenario turns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioSetup {
    pub position_noise: f64,
    pub hit_efficiency: f64,
    pub background_per_slot: f64,
    pub tilt_tangent: f64,
    pub max_dydx: f64,
    pub max_dzdx: f64,
    /// Generate row-crossing tracks with this longitudinal slope
    pub row_cross_dzdx: Option<f64>,
    /// Smearing of the reference y0 handed to the estimator
    pub reference_sigma: f64,
    pub tilt_correction: bool,
    pub z_aware_errors: bool,
    pub estimator: PositionEstimator,
}

impl Default for ScenarioSetup {
    fn default() -> Self {
        Self {
            position_noise: 0.02,
            hit_efficiency: 1.0,
            background_per_slot: 0.0,
            tilt_tangent: 0.0,
            max_dydx: 0.05,
            max_dzdx: 0.0,
            row_cross_dzdx: None,
            reference_sigma: 0.05,
            tilt_correction: false,
            z_aware_errors: false,
            estimator: PositionEstimator::CenterOfGravity,
        }
    }
}

impl ScenarioSetup {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            tilt_correction: self.tilt_correction,
            z_aware_errors: self.z_aware_errors,
            estimator: self.estimator,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "straight" | "trk-001" => Ok(ScenarioId::Straight),
            "inclined" | "trk-002" => Ok(ScenarioId::Inclined),
            "tilted" | "trk-003" => Ok(ScenarioId::Tilted),
            "row_cross" | "rowcross" | "trk-004" => Ok(ScenarioId::RowCross),
            "noisy" | "trk-005" => Ok(ScenarioId::Noisy),
            "sparse" | "trk-006" => Ok(ScenarioId::Sparse),
            _ => Err(SimError::UnknownScenario(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert_eq!("TRK-004".parse::<ScenarioId>().unwrap(), ScenarioId::RowCross);
        assert!("warp_drive".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_tilted_setup_corrects_tilt() {
        let options = ScenarioId::Tilted.setup().fit_options();
        assert!(options.tilt_correction);
        assert!(options.z_aware_errors);
        assert!(!ScenarioId::Straight.setup().fit_options().tilt_correction);
    }
}
