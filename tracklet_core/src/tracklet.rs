//! The "TRACKLET" Engine - local segment of a trajectory inside one module
//!
//! Lifecycle:
//! 1. `Tracklet::new` binds a module, an entrance radial coordinate and
//!    the reference line predicted by the outer tracker
//! 2. `attach_clusters` searches the chamber (see `search`)
//! 3. `fit` fits the local segment (see `fit`)
//! 4. accessors, `covariance_at`, `dq_dl` answer the global track fit
//!
//! The tracklet borrows the chamber and stores arena indices only.
//! `materialize` deep-copies the attached measurements when the result
//! must outlive the chamber.

use crate::calibration::CalibrationBinding;
use crate::chamber::Chamber;
use crate::config::TrackletConfig;
use crate::covariance::FitResult;
use crate::dqdl::DqDlProfile;
use crate::error::TrackletError;
use crate::measurement::Measurement;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracklet_env::{
    CalibrationService, ClusterKey, GeometryService, KinkFlags, MeasurementId, ModuleId,
    UsageArbiter, UsageState,
};

// ============================================================================
// REFERENCE LINE (Input)
// ============================================================================

/// Trajectory predicted by the outer tracker, expressed at the tracklet's
/// entrance radial coordinate `x0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLine {
    pub y0: f64,
    pub dydx: f64,
    pub z0: f64,
    pub dzdx: f64,
}

impl ReferenceLine {
    pub fn new(y0: f64, dydx: f64, z0: f64, dzdx: f64) -> Self {
        Self { y0, dydx, z0, dzdx }
    }

    /// Transverse position at radial offset `u = x - x0`.
    #[inline]
    pub fn y_at(&self, u: f64) -> f64 {
        self.y0 + self.dydx * u
    }

    /// Longitudinal position at radial offset `u = x - x0`.
    #[inline]
    pub fn z_at(&self, u: f64) -> f64 {
        self.z0 + self.dzdx * u
    }
}

// ============================================================================
// TRACKLET
// ============================================================================

/// Straight-line segment estimator for one module.
///
/// Candidate entries are laid out as `[primary row; n_slots]` followed by
/// `[alternate row; n_slots]`, so a row-crossing trajectory keeps one
/// cluster per slot and row.
#[derive(Debug, Clone)]
pub struct Tracklet<'c> {
    pub(crate) module: ModuleId,
    pub(crate) x0: f64,
    pub(crate) reference: ReferenceLine,
    /// (y, z) covariance of the reference at `x0`
    pub(crate) reference_cov: Matrix2<f64>,
    pub(crate) config: TrackletConfig,

    pub(crate) chamber: Option<&'c Chamber>,
    pub(crate) clusters: Vec<Option<MeasurementId>>,
    pub(crate) n_clusters: usize,
    pub(crate) primary_row: Option<u16>,
    pub(crate) alternate_row: Option<u16>,

    pub(crate) row_cross: bool,
    pub(crate) standalone: bool,
    pub(crate) kink: bool,

    pub(crate) binding: Option<CalibrationBinding>,
    pub(crate) fit: Option<FitResult>,
}

impl<'c> Tracklet<'c> {
    /// Creates an empty tracklet for `module` at entrance coordinate `x0`.
    pub fn new(
        module: ModuleId,
        x0: f64,
        reference: ReferenceLine,
        reference_cov: Matrix2<f64>,
        config: &TrackletConfig,
    ) -> Self {
        Self {
            module,
            x0,
            reference,
            reference_cov,
            config: config.clone(),
            chamber: None,
            clusters: Vec::new(),
            n_clusters: 0,
            primary_row: None,
            alternate_row: None,
            row_cross: false,
            standalone: false,
            kink: false,
            binding: None,
            fit: None,
        }
    }

    /// Uses an already resolved calibration instead of querying services.
    pub fn with_binding(mut self, binding: CalibrationBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Resolves calibration once; later calls return the cached snapshot.
    pub fn calibrate<S>(&mut self, services: &S) -> Result<CalibrationBinding, TrackletError>
    where
        S: GeometryService + CalibrationService + ?Sized,
    {
        if let Some(binding) = self.binding {
            return Ok(binding);
        }
        let binding =
            CalibrationBinding::resolve(services, self.module, self.reference.y0, self.reference.z0)?;
        self.binding = Some(binding);
        Ok(binding)
    }

    /// Forgets candidates and fit results (calibration is kept).
    pub(crate) fn reset(&mut self) {
        self.chamber = None;
        self.clusters.clear();
        self.n_clusters = 0;
        self.primary_row = None;
        self.alternate_row = None;
        self.row_cross = false;
        self.fit = None;
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn x0(&self) -> f64 {
        self.x0
    }

    pub fn reference(&self) -> &ReferenceLine {
        &self.reference
    }

    pub fn reference_covariance(&self) -> &Matrix2<f64> {
        &self.reference_cov
    }

    pub fn config(&self) -> &TrackletConfig {
        &self.config
    }

    /// Slots of the attached chamber (0 before attachment).
    pub fn n_slots(&self) -> usize {
        self.clusters.len() / 2
    }

    /// Number of attached clusters.
    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    /// Arena id of candidate entry `index` (primary rows first).
    pub fn cluster_id(&self, index: usize) -> Option<MeasurementId> {
        self.clusters.get(index).copied().flatten()
    }

    /// Measurement of candidate entry `index`.
    pub fn cluster(&self, index: usize) -> Option<&'c Measurement> {
        let chamber = self.chamber?;
        chamber.measurement(self.cluster_id(index)?)
    }

    /// Attached clusters as (entry index, id, measurement).
    pub fn attached(&self) -> impl Iterator<Item = (usize, MeasurementId, &'c Measurement)> + '_ {
        let chamber = self.chamber;
        self.clusters.iter().enumerate().filter_map(move |(k, id)| {
            let id = (*id)?;
            chamber?.measurement(id).map(|m| (k, id, m))
        })
    }

    pub fn is_row_cross(&self) -> bool {
        self.row_cross
    }

    pub fn primary_row(&self) -> Option<u16> {
        self.primary_row
    }

    pub fn alternate_row(&self) -> Option<u16> {
        self.alternate_row
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    pub fn set_standalone(&mut self, standalone: bool) {
        self.standalone = standalone;
    }

    pub fn is_kink(&self) -> bool {
        self.kink
    }

    pub fn set_kink(&mut self, kink: bool) {
        self.kink = kink;
    }

    /// Asks the global fit whether this module/position is kink-flagged.
    pub fn flag_kink<K: KinkFlags + ?Sized>(&mut self, flags: &K) {
        self.kink = flags.is_kink(self.module, self.reference.y0, self.reference.z0);
    }

    pub fn is_calibrated(&self) -> bool {
        self.binding.is_some()
    }

    pub fn binding(&self) -> Option<&CalibrationBinding> {
        self.binding.as_ref()
    }

    pub fn fit_result(&self) -> Option<&FitResult> {
        self.fit.as_ref()
    }

    /// Radial point of minimum transverse variance (after `fit`).
    pub fn x_ref(&self) -> Option<f64> {
        self.fit.as_ref().map(|f| f.x_ref)
    }

    /// Reported (y, z) covariance at radial offset `xr` from `x0`.
    pub fn covariance_at(&self, xr: f64) -> Result<Matrix2<f64>, TrackletError> {
        self.fit
            .as_ref()
            .map(|f| f.covariance_at(xr))
            .ok_or(TrackletError::NotFitted)
    }

    // ========================================================================
    // CHARGE
    // ========================================================================

    /// Per-slot charge profile along the fitted (or reference) direction.
    pub fn dq_dl_profile(&self) -> DqDlProfile<'c> {
        let entries: Vec<Option<&'c Measurement>> =
            (0..self.clusters.len()).map(|k| self.cluster(k)).collect();
        let slope_y = self.fit.as_ref().map_or(self.reference.dydx, |f| f.dydx);
        DqDlProfile::new(
            entries,
            slope_y,
            self.reference.dzdx,
            self.config.nominal_slot_spacing,
        )
    }

    /// Charge per unit path length at `slot` (0 without an in-volume cluster).
    pub fn dq_dl(&self, slot: usize) -> f64 {
        self.dq_dl_profile().at(slot)
    }

    /// dQ/dl summed over `n_slices` equal groups of slots.
    pub fn charge_slices(&self, n_slices: usize) -> Vec<f64> {
        self.dq_dl_profile().slices(n_slices)
    }

    /// Mean of the lowest `keep` fraction of non-zero dQ/dl values.
    pub fn truncated_dq_dl(&self, keep: f64) -> Option<f64> {
        self.dq_dl_profile().truncated_mean(keep)
    }

    // ========================================================================
    // CLUSTER OWNERSHIP
    // ========================================================================

    fn key(&self, id: MeasurementId) -> ClusterKey {
        ClusterKey::new(self.module, id)
    }

    /// Claims every attached cluster.
    ///
    /// Free clusters become `Used`, already claimed ones `Shared`. A kink
    /// tracklet never claims exclusively and marks everything `Shared`.
    /// Returns the number of clusters that ended up `Shared`.
    pub fn use_clusters<A: UsageArbiter + ?Sized>(&self, arbiter: &mut A) -> usize {
        let mut shared = 0;
        for (_, id, _) in self.attached() {
            let key = self.key(id);
            let next = match (self.kink, arbiter.state(key)) {
                (false, UsageState::Free) => UsageState::Used,
                _ => UsageState::Shared,
            };
            if next == UsageState::Shared {
                shared += 1;
            }
            arbiter.set_state(key, next);
        }
        shared
    }

    /// Attached clusters the arbiter reports as `Used`.
    pub fn n_used<A: UsageArbiter + ?Sized>(&self, arbiter: &A) -> usize {
        self.count_state(arbiter, UsageState::Used)
    }

    /// Attached clusters the arbiter reports as `Shared`.
    pub fn n_shared<A: UsageArbiter + ?Sized>(&self, arbiter: &A) -> usize {
        self.count_state(arbiter, UsageState::Shared)
    }

    fn count_state<A: UsageArbiter + ?Sized>(&self, arbiter: &A, state: UsageState) -> usize {
        self.attached()
            .filter(|(_, id, _)| arbiter.state(self.key(*id)) == state)
            .count()
    }

    // ========================================================================
    // QUALITY
    // ========================================================================

    /// Majority simulation label and the fraction of clusters carrying it.
    pub fn cook_label(&self) -> Option<(i32, f64)> {
        let mut votes: HashMap<i32, usize> = HashMap::new();
        for (_, _, m) in self.attached() {
            if let Some(label) = m.label {
                *votes.entry(label).or_insert(0) += 1;
            }
        }
        let (label, count) = votes
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;
        Some((label, count as f64 / self.n_clusters.max(1) as f64))
    }

    /// Normalized (y, z) distance at `x0` between fit and reference.
    pub fn chi2_to_reference(&self) -> Result<f64, TrackletError> {
        let fit = self.fit.as_ref().ok_or(TrackletError::NotFitted)?;
        let s = fit.covariance_at(0.0) + self.reference_cov;
        let determinant = s.determinant();
        let s_inv = s
            .try_inverse()
            .ok_or(TrackletError::DegenerateFit { determinant })?;
        let d = Vector2::new(fit.y0 - self.reference.y0, fit.z0 - self.reference.z0);
        Ok(d.dot(&(s_inv * d)))
    }

    // ========================================================================
    // OWNERSHIP TRANSFER
    // ========================================================================

    /// Deep copy that no longer borrows the chamber.
    pub fn materialize(&self) -> DetachedTracklet {
        DetachedTracklet {
            module: self.module,
            x0: self.x0,
            reference: self.reference,
            clusters: (0..self.clusters.len())
                .map(|k| self.cluster(k).cloned())
                .collect(),
            row_cross: self.row_cross,
            kink: self.kink,
            standalone: self.standalone,
            fit: self.fit.clone(),
            nominal_slot_spacing: self.config.nominal_slot_spacing,
        }
    }
}

impl std::fmt::Display for Tracklet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} x0={:.3} N={} rows={:?}/{:?} cross={}",
            self.module, self.x0, self.n_clusters, self.primary_row, self.alternate_row, self.row_cross
        )?;
        match &self.fit {
            Some(fit) => write!(
                f,
                " | y={:.4} dydx={:.4} z={:.3} dzdx={:.4} xref={:.3} chi2/ndf={:.2}/{}",
                fit.y0, fit.dydx, fit.z0, fit.dzdx, fit.x_ref, fit.chi2, fit.ndf
            ),
            None => write!(f, " | unfitted"),
        }
    }
}

/// Tracklet that owns copies of its measurements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachedTracklet {
    pub module: ModuleId,
    pub x0: f64,
    pub reference: ReferenceLine,
    /// Same layout as the tracklet's candidate entries
    pub clusters: Vec<Option<Measurement>>,
    pub row_cross: bool,
    pub kink: bool,
    pub standalone: bool,
    pub fit: Option<FitResult>,
    pub nominal_slot_spacing: f64,
}

impl DetachedTracklet {
    pub fn n_slots(&self) -> usize {
        self.clusters.len() / 2
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.iter().filter(|c| c.is_some()).count()
    }

    pub fn covariance_at(&self, xr: f64) -> Result<Matrix2<f64>, TrackletError> {
        self.fit
            .as_ref()
            .map(|f| f.covariance_at(xr))
            .ok_or(TrackletError::NotFitted)
    }

    pub fn dq_dl_profile(&self) -> DqDlProfile<'_> {
        let slope_y = self.fit.as_ref().map_or(self.reference.dydx, |f| f.dydx);
        DqDlProfile::new(
            self.clusters.iter().map(Option::as_ref).collect(),
            slope_y,
            self.reference.dzdx,
            self.nominal_slot_spacing,
        )
    }

    pub fn dq_dl(&self, slot: usize) -> f64 {
        self.dq_dl_profile().at(slot)
    }
}
