//! Ground-truth event generator.
//!
//! Produces the clusters one module would record for a set of straight
//! tracks, with:
//! - Gaussian position noise
//! - the pad-tilt and Lorentz displacements the estimator corrects for
//! - hit inefficiency and uniform background clusters

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracklet_core::{Chamber, Measurement, ReferenceLine, TrackletError};
use tracklet_env::{CalibrationParams, ModuleId, PadPlane};

/// A ground-truth straight track through one module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackTruth {
    /// Simulation label carried by the track's clusters
    pub label: i32,
    /// Entrance radial coordinate
    pub x0: f64,
    pub y0: f64,
    pub dydx: f64,
    pub z0: f64,
    pub dzdx: f64,
}

impl TrackTruth {
    pub fn y_at(&self, x: f64) -> f64 {
        self.y0 + self.dydx * (x - self.x0)
    }

    pub fn z_at(&self, x: f64) -> f64 {
        self.z0 + self.dzdx * (x - self.x0)
    }

    /// The track as an exact reference line at `x0`.
    pub fn reference(&self) -> ReferenceLine {
        ReferenceLine::new(self.y0, self.dydx, self.z0, self.dzdx)
    }
}

/// Static description of the simulated module.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorModel {
    pub plane: PadPlane,
    pub calibration: CalibrationParams,
    pub n_slots: usize,
    /// Radial distance between consecutive slots
    pub slot_spacing: f64,
    /// Radial coordinate of slot 0
    pub x_start: f64,
    /// Drift time spanned by one slot
    pub slot_time_width: f64,
}

impl Default for DetectorModel {
    fn default() -> Self {
        Self {
            plane: PadPlane::default(),
            calibration: CalibrationParams::default(),
            n_slots: 24,
            slot_spacing: 0.3,
            x_start: 0.0,
            slot_time_width: 0.1,
        }
    }
}

impl DetectorModel {
    pub fn slot_x(&self, slot: usize) -> f64 {
        self.x_start + self.slot_spacing * slot as f64
    }

    /// Radial length covered by the slots.
    pub fn depth(&self) -> f64 {
        self.slot_spacing * self.n_slots.saturating_sub(1) as f64
    }
}

/// Seeded generator of synthetic chambers.
pub struct EventGenerator {
    seed: u64,
    rng: ChaCha8Rng,
    detector: DetectorModel,

    /// Transverse position noise standard deviation
    position_noise_std: f64,

    /// Probability that a track leaves a cluster in a slot
    hit_efficiency: f64,

    /// Mean number of background clusters per slot
    background_per_slot: f64,

    /// Mean cluster charge
    mean_charge: f64,

    next_label: i32,
}

impl EventGenerator {
    pub fn new(seed: u64, detector: DetectorModel) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            detector,
            position_noise_std: 0.02,
            hit_efficiency: 1.0,
            background_per_slot: 0.0,
            mean_charge: 50.0,
            next_label: 0,
        }
    }

    pub fn with_position_noise(mut self, std_dev: f64) -> Self {
        self.position_noise_std = std_dev;
        self
    }

    pub fn with_hit_efficiency(mut self, efficiency: f64) -> Self {
        self.hit_efficiency = efficiency.clamp(0.0, 1.0);
        self
    }

    pub fn with_background(mut self, per_slot: f64) -> Self {
        self.background_per_slot = per_slot.max(0.0);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn detector(&self) -> &DetectorModel {
        &self.detector
    }

    fn take_label(&mut self) -> i32 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        Normal::new(0.0, std_dev)
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(0.0)
    }

    /// Track contained in one pad row.
    ///
    /// `|dy/dx| <= max_dydx`, `|dz/dx| <= max_dzdx`; the z excursion is
    /// centered on the row so the track never leaves it.
    pub fn random_track(&mut self, max_dydx: f64, max_dzdx: f64) -> TrackTruth {
        let plane = self.detector.plane;
        let row = self.rng.gen_range(2..plane.n_rows.saturating_sub(2).max(3));
        let dydx = self.rng.gen_range(-max_dydx..=max_dydx);
        let dzdx = self.rng.gen_range(-max_dzdx..=max_dzdx);
        let x0 = self.detector.x_start;
        let half = 0.5 * self.detector.depth();

        TrackTruth {
            label: self.take_label(),
            x0,
            y0: self.rng.gen_range(-20.0..20.0),
            dydx,
            z0: plane.row_center(row) - dzdx * half,
            dzdx,
        }
    }

    /// Track crossing a pad-row boundary in the middle third of the module.
    pub fn row_crossing_track(&mut self, dzdx: f64) -> TrackTruth {
        let plane = self.detector.plane;
        let row = self.rng.gen_range(2..plane.n_rows.saturating_sub(3).max(3));
        let boundary = plane.z_origin + (row + 1) as f64 * plane.pad_length;
        let x0 = self.detector.x_start;
        let depth = self.detector.depth();
        let x_cross = x0 + self.rng.gen_range(depth / 3.0..2.0 * depth / 3.0);
        let dydx = self.rng.gen_range(-0.1..0.1);

        TrackTruth {
            label: self.take_label(),
            x0,
            y0: self.rng.gen_range(-20.0..20.0),
            dydx,
            z0: boundary - dzdx * (x_cross - x0),
            dzdx,
        }
    }

    /// Digitizes `tracks` (plus background) into a fresh chamber.
    ///
    /// The chamber is not built.
    pub fn generate(&mut self, module: ModuleId, tracks: &[TrackTruth]) -> Result<Chamber, TrackletError> {
        let detector = self.detector.clone();
        let plane = detector.plane;
        let cal = detector.calibration;
        let mut chamber = Chamber::new(module, detector.n_slots);

        for slot in 0..detector.n_slots {
            let x = detector.slot_x(slot);
            let t = (slot as f64 + 0.5) * detector.slot_time_width - cal.t0;
            let drift = (cal.drift_velocity * t).max(0.0);

            for track in tracks {
                if !self.rng.gen_bool(self.hit_efficiency) {
                    continue;
                }
                let z_true = track.z_at(x);
                let row = plane.nearest_address(track.y_at(x), z_true).row;
                let z_pad = plane.row_center(row);
                let y = track.y_at(x)
                    + cal.lorentz_tangent * drift
                    + plane.tilt_tangent * (z_pad - z_true)
                    + self.gaussian(self.position_noise_std);
                let m = self.digitize(slot, x, y, row, track.label);
                chamber.push(m)?;
            }

            let Some(track) = tracks.first() else {
                continue;
            };
            let whole = self.background_per_slot.floor() as usize;
            let extra = usize::from(self.rng.gen_bool(self.background_per_slot.fract()));
            for _ in 0..whole + extra {
                let row = plane.nearest_address(track.y_at(x), track.z_at(x)).row;
                let y = track.y_at(x) + self.rng.gen_range(-1.0..1.0);
                let m = self.digitize(slot, x, y, row, -1);
                chamber.push(m)?;
            }
        }
        Ok(chamber)
    }

    fn digitize(&mut self, slot: usize, x: f64, y: f64, row: u16, label: i32) -> Measurement {
        let plane = self.detector.plane;
        let z = plane.row_center(row);
        let col = plane.nearest_address(y, z).col;
        let q = (self.mean_charge + self.gaussian(0.2 * self.mean_charge)).abs().max(1.0);
        Measurement::new(slot as u16, x, y, z, q)
            .with_pad(row, col, plane.col_center(col))
            .with_label(label)
    }
}
