//! Tracklet Environment Layer
//!
//! The per-layer segment estimator in `tracklet_core` never reaches for
//! global state. Everything it needs from the outside world is injected
//! through the traits in this crate:
//!
//! - **Geometry**: pad-plane layout of a module (`GeometryService`)
//! - **Calibration**: drift/diffusion/PRF constants per pad (`CalibrationService`)
//! - **Ownership**: used/shared arbitration of clusters (`UsageArbiter`)
//! - **Kinks**: whether the global fit flagged a module/position (`KinkFlags`)
//!
//! `StaticDetector` and `UsageLedger` are in-memory implementations used by
//! tests and by the simulation harness.
//!
//! # Example
//!
//! ```ignore
//! use tracklet_env::{CalibrationService, GeometryService, ModuleId, StaticDetector};
//!
//! let detector = StaticDetector::uniform(PadPlane::default(), CalibrationParams::default());
//! let plane = detector.pad_plane(ModuleId(12))?;
//! let calib = detector.calibration(ModuleId(12), plane.address_at(y, z)?)?;
//! ```

mod calibration;
mod error;
mod geometry;
mod static_impl;
mod types;
mod usage;

pub use calibration::{CalibrationParams, CalibrationService};
pub use error::EnvError;
pub use geometry::{GeometryService, PadPlane};
pub use static_impl::StaticDetector;
pub use types::{ClusterKey, MeasurementId, ModuleId, PadAddress};
pub use usage::{KinkFlags, UsageArbiter, UsageLedger, UsageState};
