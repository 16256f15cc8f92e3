//! Error types for the collaborator services.

use crate::types::ModuleId;
use thiserror::Error;

/// Errors raised by geometry and calibration lookups.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// No pad plane or calibration is registered for the module
    #[error("Unknown module: {0}")]
    UnknownModule(ModuleId),

    /// Position does not fall on any pad of the module
    #[error("Position (y={y:.3}, z={z:.3}) is outside the pad plane of {module}")]
    OutsidePadPlane { module: ModuleId, y: f64, z: f64 },

    /// Calibration record exists but is unusable
    #[error("Calibration error: {0}")]
    Calibration(String),
}

impl EnvError {
    /// Creates a calibration error.
    pub fn calibration(msg: impl Into<String>) -> Self {
        Self::Calibration(msg.into())
    }
}
