//! Tracklet Core - Per-Layer Segment Estimator
//!
//! Given the clusters one drift-chamber module recorded and a coarse
//! prediction from the outer tracker, this library:
//! 1. **Searches**: opens an adaptive road per time slot and collects candidates
//! 2. **Cleans**: rejects outliers per pad row with a truncated mean
//! 3. **Classifies**: detects trajectories crossing a pad-row boundary
//! 4. **Fits**: weighted straight line with closed-form covariance, tilt-aware
//! 5. **Summarizes**: charge per unit path length for energy-loss estimation
//!
//! Measurements live in an arena owned by the `Chamber`; a `Tracklet`
//! holds indices into it and can be materialized into an owned
//! `DetachedTracklet` when it must outlive the event.

pub mod calibration;
pub mod chamber;
pub mod config;
pub mod covariance;
pub mod dqdl;
pub mod error;
pub mod fit;
pub mod layer_buffer;
pub mod linefit;
pub mod measurement;
pub mod robust;
pub mod search;
pub mod tracklet;

// Re-export key types for convenience
pub use calibration::{CalibrationBinding, CalibrationSnapshot, PadSnapshot};
pub use chamber::{Chamber, MAX_SLOTS};
pub use config::{FitOptions, PositionEstimator, SystematicErrors, TrackletConfig};
pub use covariance::{rotate_tilt, FitResult};
pub use error::{Stage, TrackletError};
pub use fit::ZEstimate;
pub use layer_buffer::LayerBuffer;
pub use measurement::Measurement;
pub use tracklet::{DetachedTracklet, ReferenceLine, Tracklet};
