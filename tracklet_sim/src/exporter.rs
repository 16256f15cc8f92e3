//! JSON exporter for reconstructed tracklets.
//!
//! Writes the estimator configuration, scenario verdict and every
//! track's ground truth next to its detached tracklet.

use crate::error::SimError;
use crate::runner::{ScenarioMetrics, ScenarioResult, TrackRecord};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use tracklet_core::TrackletConfig;

/// Complete scenario export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Final verdict
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Estimator configuration the run used
    pub config: TrackletConfig,

    pub metrics: ScenarioMetrics,

    /// Per-track truth and reconstruction
    pub tracks: Vec<TrackRecord>,
}

impl SimExport {
    /// Captures a finished scenario run.
    pub fn from_result(result: &ScenarioResult, config: &TrackletConfig) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            config: config.clone(),
            metrics: result.metrics.clone(),
            tracks: result.records.clone(),
        }
    }

    /// Number of tracks with a reconstructed tracklet.
    pub fn fitted(&self) -> usize {
        self.tracks.iter().filter(|t| t.tracklet.is_some()).count()
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), SimError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
