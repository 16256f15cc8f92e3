//! Errors of the simulation harness.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
}
