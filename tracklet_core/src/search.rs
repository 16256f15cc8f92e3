//! Candidate search (`Tracklet::attach_clusters`).
//!
//! Per slot an adaptive transverse road is opened around the reference
//! line. Candidates are bucketed by pad row, cleaned with a truncated mean
//! and the surviving rows classified as single-row or row-crossing.

use crate::calibration::PadSnapshot;
use crate::chamber::Chamber;
use crate::error::{Stage, TrackletError};
use crate::robust::truncated_mean;
use crate::tracklet::Tracklet;
use std::collections::BTreeMap;
use tracing::{debug, trace};
use tracklet_env::{CalibrationService, GeometryService, MeasurementId};

/// Transverse cluster variance at search time, folded with the pad tilt.
pub fn tilted_cluster_variance(s2_cluster: f64, sy2_sys: f64, pad: &PadSnapshot) -> f64 {
    let t2 = pad.tilt_tangent * pad.tilt_tangent;
    (s2_cluster + sy2_sys + t2 * pad.s2_length()) / (1.0 + t2)
}

/// Half-width of the transverse road.
pub fn search_road(track_var: f64, cluster_var: f64, sigmas: f64) -> f64 {
    sigmas * (12.0 * (track_var + cluster_var).max(0.0)).sqrt()
}

/// Rows kept after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowClass {
    /// Most populated row
    pub primary: u16,
    /// Second row of a row-crossing trajectory
    pub alternate: Option<u16>,
}

impl RowClass {
    pub fn is_row_cross(&self) -> bool {
        self.alternate.is_some()
    }
}

/// Classifies rows from their populations `(row, count)`.
///
/// Rows holding at least `balance` times the majority population are
/// significant. Two adjacent significant rows, or three spanning two row
/// boundaries, form a row cross. The majority row is kept together with its
/// more populated significant neighbor, so the kept rows always share a
/// boundary. Anything else keeps only the majority row.
pub fn classify_rows(populations: &[(u16, usize)], balance: f64) -> Option<RowClass> {
    let mut sorted: Vec<(u16, usize)> = populations.iter().copied().filter(|p| p.1 > 0).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let &(primary, major) = sorted.first()?;

    let significant: Vec<u16> = sorted
        .iter()
        .filter(|(_, n)| *n as f64 >= balance * major as f64)
        .map(|(row, _)| *row)
        .collect();
    let span = |rows: &[u16]| {
        let lo = rows.iter().min().copied().unwrap_or(0);
        let hi = rows.iter().max().copied().unwrap_or(0);
        hi - lo
    };
    let crossing = match significant.len() {
        2 => span(&significant) == 1,
        3 => span(&significant) == 2,
        _ => false,
    };

    let alternate = crossing
        .then(|| {
            significant
                .iter()
                .copied()
                .find(|row| row.abs_diff(primary) == 1)
        })
        .flatten();

    Some(RowClass { primary, alternate })
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    slot: usize,
    id: MeasurementId,
    dy: f64,
}

#[derive(Debug)]
struct RowCandidates {
    row: u16,
    mean: f64,
    candidates: Vec<Candidate>,
}

impl<'c> Tracklet<'c> {
    /// Selects the clusters of `chamber` compatible with the reference line.
    ///
    /// The chamber must be built. Calibration is resolved through `services`
    /// unless a binding is already cached. Any previous attachment and fit
    /// are discarded.
    pub fn attach_clusters<S>(
        &mut self,
        chamber: &'c Chamber,
        services: &S,
        tilt_correction: bool,
    ) -> Result<(), TrackletError>
    where
        S: GeometryService + CalibrationService + ?Sized,
    {
        self.reset();

        if chamber.anchor_x().is_none() {
            let populated = chamber.populated_slots();
            debug!(module = %self.module, populated, "chamber has no anchor");
            return Err(TrackletError::GeometryUnavailable { populated });
        }
        let binding = self.calibrate(services)?;
        let cal = binding.calibration;
        let pad = binding.pad;
        let cfg = &self.config;
        let spacing = effective_spacing(chamber, cfg.nominal_slot_spacing);

        let track_var = self.reference_cov[(0, 0)];
        let z_half = cfg.z_road_pad_factor * pad.length + cfg.z_road_margin;
        let t = pad.tilt_tangent;

        let mut by_row: BTreeMap<u16, Vec<Candidate>> = BTreeMap::new();
        for (slot, layer) in chamber.layers().iter().enumerate() {
            let Some(x) = layer.x() else {
                continue;
            };
            let u = x - self.x0;
            let yt = self.reference.y_at(u);
            let zt = self.reference.z_at(u);

            let d = cal.drift_distance(slot as u16, cfg.slot_time_width);
            let s2_cluster = cal.cluster_variance(d, self.reference.dydx, spacing);
            let cluster_var = tilted_cluster_variance(s2_cluster, cfg.systematics.sy2, &pad);
            let road = search_road(track_var, cluster_var, cfg.road_sigmas);
            trace!(slot, yt, zt, road, "slot road");

            for id in layer.query(yt, zt, road, z_half, cfg.max_candidates_per_slot) {
                let Some(m) = chamber.measurement(id) else {
                    continue;
                };
                let mut dy = yt - m.y;
                if tilt_correction {
                    dy += t * (m.z - zt);
                }
                by_row.entry(m.row).or_default().push(Candidate { slot, id, dy });
            }
        }

        let rows: Vec<RowCandidates> = by_row
            .into_iter()
            .map(|(row, candidates)| self.clean_row(row, candidates))
            .filter(|r| !r.candidates.is_empty())
            .collect();
        let populations: Vec<(u16, usize)> =
            rows.iter().map(|r| (r.row, r.candidates.len())).collect();

        let required = self.config.min_attached(chamber.n_slots());
        let Some(class) = classify_rows(&populations, self.config.row_cross_balance) else {
            debug!(module = %self.module, "no candidates inside the road");
            return Err(TrackletError::InsufficientData {
                stage: Stage::Search,
                found: 0,
                required,
            });
        };

        let n_slots = chamber.n_slots();
        let mut clusters = vec![None; 2 * n_slots];
        let mut best = vec![f64::INFINITY; 2 * n_slots];
        for (offset, row) in [(0, Some(class.primary)), (n_slots, class.alternate)] {
            let Some(row) = row else {
                continue;
            };
            let Some(r) = rows.iter().find(|r| r.row == row) else {
                continue;
            };
            for c in &r.candidates {
                let k = offset + c.slot;
                let distance = (c.dy - r.mean).abs();
                if distance < best[k] {
                    best[k] = distance;
                    clusters[k] = Some(c.id);
                }
            }
        }

        let found = clusters.iter().filter(|c| c.is_some()).count();
        if found < required {
            debug!(module = %self.module, found, required, "too few clusters attached");
            return Err(TrackletError::InsufficientData {
                stage: Stage::Search,
                found,
                required,
            });
        }

        debug!(
            module = %self.module,
            found,
            primary = class.primary,
            alternate = ?class.alternate,
            "clusters attached"
        );
        self.chamber = Some(chamber);
        self.clusters = clusters;
        self.n_clusters = found;
        self.primary_row = Some(class.primary);
        self.alternate_row = class.alternate;
        self.row_cross = class.is_row_cross();
        Ok(())
    }

    /// Drops candidates far from the row's robust mean residual.
    fn clean_row(&self, row: u16, mut candidates: Vec<Candidate>) -> RowCandidates {
        let cfg = &self.config;
        let dys: Vec<f64> = candidates.iter().map(|c| c.dy).collect();

        if candidates.len() >= cfg.min_row_for_truncation {
            if let Some(est) = truncated_mean(&dys, cfg.truncation_keep) {
                let sigma = est.sigma.max(cfg.min_residual_sigma);
                let before = candidates.len();
                candidates.retain(|c| (c.dy - est.mean).abs() <= cfg.row_outlier_sigmas * sigma);
                trace!(row, mean = est.mean, sigma, rejected = before - candidates.len(), "row cleaned");
                return RowCandidates {
                    row,
                    mean: est.mean,
                    candidates,
                };
            }
        }

        let mean = dys.iter().sum::<f64>() / dys.len().max(1) as f64;
        RowCandidates {
            row,
            mean,
            candidates,
        }
    }
}

/// Radial spacing per slot, nominal when the chamber cannot tell.
pub(crate) fn effective_spacing(chamber: &Chamber, nominal: f64) -> f64 {
    chamber
        .slot_spacing()
        .map(f64::abs)
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(nominal)
}
