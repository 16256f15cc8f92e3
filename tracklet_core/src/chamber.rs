//! Chamber-local cluster container.
//!
//! A `Chamber` owns every measurement of one module for one event (the
//! arena) and an ordered array of `LayerBuffer`s, one per time slot.

use crate::config::TrackletConfig;
use crate::error::TrackletError;
use crate::layer_buffer::LayerBuffer;
use crate::measurement::Measurement;
use tracing::debug;
use tracklet_env::{MeasurementId, ModuleId};

/// Slots addressable by a `u16` slot index.
pub const MAX_SLOTS: usize = u16::MAX as usize + 1;

/// All clusters of one detector module.
#[derive(Debug, Clone)]
pub struct Chamber {
    module: ModuleId,
    measurements: Vec<Measurement>,
    layers: Vec<LayerBuffer>,
    anchor_x: Option<f64>,
    slot_spacing: Option<f64>,
}

impl Chamber {
    /// Creates an empty chamber with `n_slots` time slots, capped at
    /// [`MAX_SLOTS`].
    pub fn new(module: ModuleId, n_slots: usize) -> Self {
        Self {
            module,
            measurements: Vec::new(),
            layers: empty_layers(n_slots),
            anchor_x: None,
            slot_spacing: None,
        }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn n_slots(&self) -> usize {
        self.layers.len()
    }

    /// Adds a measurement to the arena and to its slot's buffer.
    ///
    /// Invalidates a previously built anchor.
    pub fn push(&mut self, measurement: Measurement) -> Result<MeasurementId, TrackletError> {
        let slot = measurement.slot as usize;
        let n_slots = self.layers.len();
        let layer = self
            .layers
            .get_mut(slot)
            .ok_or(TrackletError::SlotOutOfRange {
                slot: measurement.slot,
                n_slots,
            })?;

        let id = MeasurementId::from_index(self.measurements.len());
        layer.insert(id, &measurement);
        self.measurements.push(measurement);
        self.anchor_x = None;
        self.slot_spacing = None;
        Ok(id)
    }

    /// Derives the anchor radial position of slot 0.
    ///
    /// Uses the two most populated slots: their mean radial positions give
    /// the spacing per slot, which is extrapolated back to slot 0 and
    /// shifted by the calibrated `anchor_offset`.
    pub fn build(&mut self, config: &TrackletConfig) -> Result<f64, TrackletError> {
        let mut populated: Vec<(usize, usize, f64)> = self
            .layers
            .iter()
            .enumerate()
            .filter_map(|(slot, layer)| layer.x().map(|x| (slot, layer.len(), x)))
            .collect();

        if populated.len() < 2 {
            debug!(module = %self.module, populated = populated.len(), "chamber build failed");
            return Err(TrackletError::GeometryUnavailable {
                populated: populated.len(),
            });
        }

        // Most populated first, lower slot on ties
        populated.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let (mut i, _, mut xi) = populated[0];
        let (mut j, _, mut xj) = populated[1];
        if i > j {
            std::mem::swap(&mut i, &mut j);
            std::mem::swap(&mut xi, &mut xj);
        }

        let spacing = (xj - xi) / (j - i) as f64;
        let anchor = xi - i as f64 * spacing + config.anchor_offset;

        self.slot_spacing = Some(spacing);
        self.anchor_x = Some(anchor);
        Ok(anchor)
    }

    /// Radial position of slot 0, once built.
    pub fn anchor_x(&self) -> Option<f64> {
        self.anchor_x
    }

    /// Signed radial spacing per slot, once built.
    pub fn slot_spacing(&self) -> Option<f64> {
        self.slot_spacing
    }

    pub fn layer(&self, slot: usize) -> Option<&LayerBuffer> {
        self.layers.get(slot)
    }

    pub fn layers(&self) -> &[LayerBuffer] {
        &self.layers
    }

    pub fn measurement(&self, id: MeasurementId) -> Option<&Measurement> {
        self.measurements.get(id.index())
    }

    /// Every measurement in arena order.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Number of slots holding at least one cluster.
    pub fn populated_slots(&self) -> usize {
        self.layers.iter().filter(|l| !l.is_empty()).count()
    }

    /// Innermost and outermost populated radial positions.
    pub fn x_range(&self) -> Option<(f64, f64)> {
        self.layers
            .iter()
            .filter_map(LayerBuffer::x)
            .fold(None, |acc, x| match acc {
                None => Some((x, x)),
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            })
    }

    /// Window query on one slot; an unknown slot yields nothing.
    pub fn query(
        &self,
        slot: usize,
        yc: f64,
        zc: f64,
        y_half: f64,
        z_half: f64,
        max_results: usize,
    ) -> Vec<MeasurementId> {
        self.layers
            .get(slot)
            .map(|layer| layer.query(yc, zc, y_half, z_half, max_results))
            .unwrap_or_default()
    }

    /// Drops all measurements so the chamber can be reused for the next event.
    pub fn clear(&mut self) {
        let n_slots = self.layers.len();
        self.measurements.clear();
        self.layers = empty_layers(n_slots);
        self.anchor_x = None;
        self.slot_spacing = None;
    }
}

fn empty_layers(n_slots: usize) -> Vec<LayerBuffer> {
    (0..=u16::MAX).take(n_slots).map(LayerBuffer::new).collect()
}
