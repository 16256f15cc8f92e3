//! Charge per unit path length along a tracklet.

use crate::measurement::Measurement;

/// Per-slot view of the charge deposited by one tracklet.
///
/// `entries` uses the tracklet's candidate layout: primary row in
/// `[0, n)`, alternate row in `[n, 2n)`.
#[derive(Debug, Clone)]
pub struct DqDlProfile<'a> {
    entries: Vec<Option<&'a Measurement>>,
    slope_y: f64,
    slope_z: f64,
    nominal_dx: f64,
}

impl<'a> DqDlProfile<'a> {
    pub fn new(
        entries: Vec<Option<&'a Measurement>>,
        slope_y: f64,
        slope_z: f64,
        nominal_dx: f64,
    ) -> Self {
        Self {
            entries,
            slope_y,
            slope_z,
            nominal_dx,
        }
    }

    pub fn n_slots(&self) -> usize {
        self.entries.len() / 2
    }

    fn in_volume(&self, slot: usize) -> impl Iterator<Item = &'a Measurement> + '_ {
        let n = self.n_slots();
        [slot, slot + n]
            .into_iter()
            .filter_map(move |k| self.entries.get(k).copied().flatten())
            .filter(|m| m.in_active_volume)
    }

    /// Radial position of an in-volume cluster at `slot`.
    fn slot_x(&self, slot: usize) -> Option<f64> {
        self.in_volume(slot).next().map(|m| m.x)
    }

    fn nearest_x(&self, slot: usize, downward: bool) -> Option<(usize, f64)> {
        if downward {
            (0..slot).rev().find_map(|s| self.slot_x(s).map(|x| (s, x)))
        } else {
            (slot + 1..self.n_slots()).find_map(|s| self.slot_x(s).map(|x| (s, x)))
        }
    }

    /// Radial extent of `slot` from its in-volume neighbors.
    fn slot_dx(&self, slot: usize, x: f64) -> f64 {
        let dx = match (self.nearest_x(slot, true), self.nearest_x(slot, false)) {
            (Some((lo, xl)), Some((hi, xh))) => (xh - xl) / (hi - lo) as f64,
            (Some((lo, xl)), None) => (x - xl) / (slot - lo) as f64,
            (None, Some((hi, xh))) => (xh - x) / (hi - slot) as f64,
            (None, None) => self.nominal_dx,
        };
        let dx = dx.abs();
        if dx.is_finite() && dx > 0.0 {
            dx
        } else {
            self.nominal_dx.abs()
        }
    }

    /// Charge per unit path length at `slot`; 0 without an in-volume cluster.
    pub fn at(&self, slot: usize) -> f64 {
        if slot >= self.n_slots() {
            return 0.0;
        }
        let mut q = 0.0;
        let mut x = None;
        for m in self.in_volume(slot) {
            q += m.q.abs();
            x.get_or_insert(m.x);
        }
        let Some(x) = x else {
            return 0.0;
        };
        let dl = self.slot_dx(slot, x)
            * (1.0 + self.slope_y * self.slope_y + self.slope_z * self.slope_z).sqrt();
        if dl > 0.0 && q.is_finite() {
            q / dl
        } else {
            0.0
        }
    }

    /// dQ/dl of every slot.
    pub fn values(&self) -> Vec<f64> {
        (0..self.n_slots()).map(|s| self.at(s)).collect()
    }

    /// Sums dQ/dl over `n_slices` contiguous groups of slots.
    pub fn slices(&self, n_slices: usize) -> Vec<f64> {
        let n = self.n_slots();
        if n_slices == 0 || n == 0 {
            return Vec::new();
        }
        let values = self.values();
        (0..n_slices)
            .map(|i| {
                let start = i * n / n_slices;
                let end = (i + 1) * n / n_slices;
                values[start..end].iter().sum()
            })
            .collect()
    }

    /// Mean of the lowest `keep` fraction of non-zero slot values.
    pub fn truncated_mean(&self, keep: f64) -> Option<f64> {
        let mut values: Vec<f64> = self.values().into_iter().filter(|v| *v > 0.0).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let h = ((keep.clamp(0.0, 1.0) * values.len() as f64).ceil() as usize).max(1);
        Some(values[..h].iter().sum::<f64>() / h as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn slot_measurements(n: usize, q: f64) -> Vec<Measurement> {
        (0..n)
            .map(|s| Measurement::new(s as u16, 0.3 * s as f64, 0.0, 0.0, q))
            .collect()
    }

    fn primary_only(ms: &[Measurement]) -> Vec<Option<&Measurement>> {
        let mut entries: Vec<Option<&Measurement>> = ms.iter().map(Some).collect();
        entries.extend(std::iter::repeat(None).take(ms.len()));
        entries
    }

    #[test]
    fn test_straight_track_uses_neighbor_spacing() {
        let ms = slot_measurements(5, 30.0);
        let profile = DqDlProfile::new(primary_only(&ms), 0.0, 0.0, 0.3);
        assert_relative_eq!(profile.at(2), 100.0, epsilon = 1e-9);
        assert_relative_eq!(profile.at(0), 100.0, epsilon = 1e-9);
        assert_relative_eq!(profile.at(4), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_inclination_lengthens_path() {
        let ms = slot_measurements(5, 30.0);
        let profile = DqDlProfile::new(primary_only(&ms), 1.0, 0.0, 0.3);
        assert_relative_eq!(profile.at(2), 100.0 / 2f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_out_of_volume_slot_is_zero() {
        let mut ms = slot_measurements(5, 30.0);
        ms[3] = ms[3].clone().outside_active_volume();
        let profile = DqDlProfile::new(primary_only(&ms), 0.0, 0.0, 0.3);
        assert_eq!(profile.at(3), 0.0);
        assert_eq!(profile.at(17), 0.0);
        // slot 2 bridges to slot 4
        assert_relative_eq!(profile.at(2), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_alternate_entries_are_not_slots() {
        let ms = slot_measurements(4, 30.0);
        let alt = Measurement::new(1, 0.3, 0.5, 0.0, 30.0);
        let mut entries = primary_only(&ms);
        entries[4 + 1] = Some(&alt);
        let profile = DqDlProfile::new(entries, 0.0, 0.0, 0.3);
        assert_eq!(profile.n_slots(), 4);
        // both rows at slot 1 contribute
        assert_relative_eq!(profile.at(1), 200.0, epsilon = 1e-9);
        for slot in 4..8 {
            assert_eq!(profile.at(slot), 0.0);
        }
    }

    #[test]
    fn test_isolated_slot_uses_nominal_spacing() {
        let ms = vec![Measurement::new(0, 1.0, 0.0, 0.0, 6.0)];
        let profile = DqDlProfile::new(vec![Some(&ms[0]), None], 0.0, 0.0, 0.3);
        assert_relative_eq!(profile.at(0), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_charge_counts_by_magnitude() {
        let ms = slot_measurements(3, -30.0);
        let profile = DqDlProfile::new(primary_only(&ms), 0.0, 0.0, 0.3);
        assert!(profile.at(1) > 0.0);
    }

    #[test]
    fn test_slices_and_truncation() {
        let mut ms = slot_measurements(6, 30.0);
        ms[5].q = 300.0;
        let profile = DqDlProfile::new(primary_only(&ms), 0.0, 0.0, 0.3);
        let slices = profile.slices(3);
        assert_eq!(slices.len(), 3);
        assert_relative_eq!(slices[0], 200.0, epsilon = 1e-9);
        assert_relative_eq!(profile.truncated_mean(0.8).unwrap(), 100.0, epsilon = 1e-9);
        assert!(profile.slices(0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_dq_dl_never_negative(
            charges in proptest::collection::vec(-100.0f64..100.0, 1..30),
            slope_y in -1.0f64..1.0,
            slope_z in -1.0f64..1.0,
        ) {
            let ms: Vec<Measurement> = charges
                .iter()
                .enumerate()
                .map(|(s, q)| {
                    let m = Measurement::new(s as u16, 0.3 * s as f64, 0.0, 0.0, *q);
                    if s % 4 == 3 { m.outside_active_volume() } else { m }
                })
                .collect();
            let profile = DqDlProfile::new(primary_only(&ms), slope_y, slope_z, 0.3);
            for s in 0..ms.len() {
                let v = profile.at(s);
                prop_assert!(v >= 0.0);
                if s % 4 == 3 {
                    prop_assert_eq!(v, 0.0);
                }
            }
        }
    }
}
