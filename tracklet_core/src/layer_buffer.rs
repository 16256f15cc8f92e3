//! Clusters of one time slot, indexed by pad row.

use crate::measurement::Measurement;
use std::collections::BTreeMap;
use tracklet_env::MeasurementId;

/// Clusters of one pad row, sorted by y.
#[derive(Debug, Clone, Default)]
struct RowIndex {
    /// Pad-row center
    z: f64,
    /// (y, id) sorted ascending by y
    entries: Vec<(f64, MeasurementId)>,
}

/// All clusters of one discretized radial slot.
///
/// Every contained measurement carries the same `slot`; the buffer keeps
/// the running mean of their radial coordinates.
#[derive(Debug, Clone)]
pub struct LayerBuffer {
    slot: u16,
    rows: BTreeMap<u16, RowIndex>,
    x_sum: f64,
    count: usize,
}

impl LayerBuffer {
    /// Creates an empty buffer for `slot`.
    pub fn new(slot: u16) -> Self {
        Self {
            slot,
            rows: BTreeMap::new(),
            x_sum: 0.0,
            count: 0,
        }
    }

    /// Slot index of this buffer.
    pub fn slot(&self) -> u16 {
        self.slot
    }

    /// Inserts a measurement, keeping its row sorted by y.
    pub(crate) fn insert(&mut self, id: MeasurementId, m: &Measurement) {
        debug_assert_eq!(m.slot, self.slot);
        let row = self.rows.entry(m.row).or_insert_with(|| RowIndex {
            z: m.z,
            entries: Vec::new(),
        });
        let pos = row.entries.partition_point(|(y, _)| *y < m.y);
        row.entries.insert(pos, (m.y, id));

        self.x_sum += m.x;
        self.count += 1;
    }

    /// Number of clusters in the slot.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean radial coordinate, if populated.
    pub fn x(&self) -> Option<f64> {
        (self.count > 0).then(|| self.x_sum / self.count as f64)
    }

    /// Populated rows in ascending order.
    pub fn rows(&self) -> impl Iterator<Item = u16> + '_ {
        self.rows.keys().copied()
    }

    /// Number of clusters in `row`.
    pub fn row_len(&self, row: u16) -> usize {
        self.rows.get(&row).map_or(0, |r| r.entries.len())
    }

    /// The `index`-th cluster of `row` in ascending y.
    pub fn get(&self, row: u16, index: usize) -> Option<MeasurementId> {
        self.rows.get(&row)?.entries.get(index).map(|(_, id)| *id)
    }

    /// Clusters inside the window `|y - yc| <= y_half`, `|z - zc| <= z_half`.
    ///
    /// Returns at most `max_results` ids in no particular order. Only rows
    /// whose center is inside the z window are visited, and each visited
    /// row is binary-searched, so the cost is proportional to the result.
    pub fn query(
        &self,
        yc: f64,
        zc: f64,
        y_half: f64,
        z_half: f64,
        max_results: usize,
    ) -> Vec<MeasurementId> {
        let mut found = Vec::new();
        for row in self.rows.values() {
            if (row.z - zc).abs() > z_half {
                continue;
            }
            let lo = row.entries.partition_point(|(y, _)| *y < yc - y_half);
            for (y, id) in &row.entries[lo..] {
                if *y > yc + y_half || found.len() >= max_results {
                    break;
                }
                found.push(*id);
            }
            if found.len() >= max_results {
                break;
            }
        }
        found
    }
}
