//! Error taxonomy of the estimator.
//!
//! Every failure is recoverable by the caller: the layer is treated as
//! unmeasured for this trajectory and the global fit moves on.

use thiserror::Error;
use tracklet_env::EnvError;

/// Processing stage at which a cluster-count gate tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Candidate search (`attach_clusters`)
    Search,
    /// Local line fit (`fit`)
    Fit,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Search => write!(f, "search"),
            Stage::Fit => write!(f, "fit"),
        }
    }
}

/// Errors that can occur while building, attaching or fitting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackletError {
    #[error("Insufficient data at {stage}: {found} clusters, {required} required")]
    InsufficientData {
        stage: Stage,
        found: usize,
        required: usize,
    },

    #[error("Geometry unavailable: {populated} populated slots, at least 2 required")]
    GeometryUnavailable { populated: usize },

    #[error("Degenerate fit: normal matrix determinant {determinant:e}")]
    DegenerateFit { determinant: f64 },

    #[error("Collaborator lookup failed: {0}")]
    Collaborator(#[from] EnvError),

    #[error("Slot {slot} out of range for a chamber with {n_slots} slots")]
    SlotOutOfRange { slot: u16, n_slots: usize },

    #[error("Tracklet has no attached clusters")]
    NotAttached,

    #[error("Tracklet has not been fitted")]
    NotFitted,
}

impl TrackletError {
    /// True for the "treat this layer as unmeasured" outcomes.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrackletError::InsufficientData { .. }
                | TrackletError::GeometryUnavailable { .. }
                | TrackletError::DegenerateFit { .. }
        )
    }
}
