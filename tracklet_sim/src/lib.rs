//! Tracklet Simulation Harness
//!
//! Generates synthetic drift-chamber events from a single 64-bit seed,
//! runs the tracklet estimator over them and checks the reconstructed
//! segments against ground truth.
//!
//! # Architecture
//!
//! ```text
//! ScenarioRunner
//!   │
//!   ├─► EventGenerator ──► Chamber (+ TrackTruth)
//!   │
//!   ├─► Tracklet::attach_clusters / fit   (StaticDetector services)
//!   │
//!   └─► DetachedTracklet ──► ScenarioMetrics ──► SimExport (JSON)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tracklet_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_tracks(50).run(ScenarioId::RowCross);
//! assert!(result.passed);
//! ```

mod error;
pub mod exporter;
pub mod generator;
mod runner;
pub mod scenarios;

pub use error::SimError;
pub use exporter::SimExport;
pub use generator::{DetectorModel, EventGenerator, TrackTruth};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, TrackRecord};

use tracklet_core::TrackletConfig;

/// Reads a (possibly partial) JSON estimator configuration.
pub fn load_config(path: &str) -> Result<TrackletConfig, SimError> {
    let text = std::fs::read_to_string(path)?;
    Ok(TrackletConfig::from_json(&text)?)
}
