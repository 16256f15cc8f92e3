//! Local line fit (`Tracklet::fit`).

use crate::calibration::CalibrationBinding;
use crate::chamber::Chamber;
use crate::config::{FitOptions, PositionEstimator};
use crate::covariance::FitResult;
use crate::error::{Stage, TrackletError};
use crate::linefit::LineFitter;
use crate::search::effective_spacing;
use crate::tracklet::Tracklet;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Origin of the longitudinal estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ZEstimate {
    /// Mean pad-row z, pad-length variance
    PadGeometry,
    /// Row boundary located by the signed charge profile
    ChargeCrossingFit {
        /// Radial coordinate of the crossing
        x_cross: f64,
    },
}

impl<'c> Tracklet<'c> {
    /// Fits a straight line through the attached clusters.
    ///
    /// Replaces any previous fit. On failure the tracklet keeps its
    /// clusters but reports no fit.
    pub fn fit(&mut self, options: FitOptions) -> Result<(), TrackletError> {
        self.fit = None;
        let chamber = self.chamber.ok_or(TrackletError::NotAttached)?;
        let binding = self.binding.ok_or(TrackletError::NotAttached)?;
        let cfg = &self.config;
        let cal = binding.calibration;
        let t = binding.pad.tilt_tangent;
        let spacing = effective_spacing(chamber, cfg.nominal_slot_spacing);
        let min_var = cfg.min_residual_sigma * cfg.min_residual_sigma;

        let mut fitter = LineFitter::new();
        for (_, _, m) in self.attached() {
            let u = m.x - self.x0;
            let zt = self.reference.z_at(u);
            let d = cal.drift_distance(m.slot, cfg.slot_time_width);

            let (mut y, mut s2) = match options.estimator {
                PositionEstimator::CenterOfGravity => (
                    m.y - cal.lorentz_tangent * d,
                    cal.cluster_variance(d, self.reference.dydx, spacing),
                ),
                PositionEstimator::RawDigitized => {
                    let s2 = if m.s2y > 0.0 { m.s2y } else { binding.pad.s2_width() };
                    (m.y_pad, s2)
                }
            };
            if options.tilt_correction {
                y += t * (zt - m.z);
            }
            if options.z_aware_errors {
                let dz = m.z - zt;
                s2 += t * t * (dz * dz + cal.longitudinal_variance(d));
            }
            fitter.add(u, y, 1.0 / s2.max(min_var));
        }

        if fitter.len() < cfg.min_fit_clusters {
            debug!(module = %self.module, found = fitter.len(), "too few clusters to fit");
            return Err(TrackletError::InsufficientData {
                stage: Stage::Fit,
                found: fitter.len(),
                required: cfg.min_fit_clusters,
            });
        }

        let line = fitter.solve().map_err(|e| {
            debug!(module = %self.module, error = %e, "line fit rejected");
            e
        })?;

        let (x_lo, x_hi) = chamber.x_range().unwrap_or((self.x0, self.x0));
        let x_ref = (self.x0 + line.min_variance_abscissa()).clamp(x_lo, x_hi);
        let (z0, s2z, z_estimate) = self.estimate_z(chamber, &binding);

        let mut fit = FitResult {
            x0: self.x0,
            y0: line.intercept,
            dydx: line.slope,
            z0,
            dzdx: self.reference.dzdx,
            param_cov: line.scaled_covariance(),
            x_ref,
            var_y: 0.0,
            var_z: 0.0,
            s2z,
            chi2: line.chi2,
            ndf: line.ndf(),
            n_points: line.n,
            z_estimate,
            tilt_corrected: options.tilt_correction,
            tilt_tangent: t,
            systematics: cfg.systematics,
        };
        let at_ref = fit.covariance_at(x_ref - self.x0);
        fit.var_y = at_ref[(0, 0)];
        fit.var_z = at_ref[(1, 1)];

        debug!(
            module = %self.module,
            n = fit.n_points,
            y0 = fit.y0,
            dydx = fit.dydx,
            chi2 = fit.chi2,
            "tracklet fitted"
        );
        self.fit = Some(fit);
        Ok(())
    }

    /// Longitudinal position at `x0`, its variance and how it was obtained.
    fn estimate_z(&self, chamber: &Chamber, binding: &CalibrationBinding) -> (f64, f64, ZEstimate) {
        let n = self.n_slots();
        let mean_z = |range: std::ops::Range<usize>| {
            let (sum, count) = self
                .attached()
                .filter(|(k, _, _)| range.contains(k))
                .fold((0.0, 0usize), |(s, c), (_, _, m)| (s + m.z, c + 1));
            (count > 0).then(|| sum / count as f64)
        };

        let s2_pad = binding.pad.s2_length();
        let z_primary = mean_z(0..n).unwrap_or(self.reference.z0);
        if !self.row_cross {
            return (z_primary, s2_pad, ZEstimate::PadGeometry);
        }
        let Some(z_alternate) = mean_z(n..2 * n) else {
            return (z_primary, s2_pad, ZEstimate::PadGeometry);
        };
        let z_boundary = 0.5 * (z_primary + z_alternate);

        let cfg = &self.config;
        let mut charge = LineFitter::new();
        for (k, _, m) in self.attached() {
            let sign = if k < n { 1.0 } else { -1.0 };
            charge.add(m.x - self.x0, sign * m.q.abs(), 1.0);
        }
        match charge.solve() {
            Ok(line) if line.slope.abs() >= cfg.charge_slope_epsilon => {
                let (x_lo, x_hi) = chamber.x_range().unwrap_or((self.x0, self.x0));
                let x_cross = (self.x0 - line.intercept / line.slope + cfg.row_cross_x_offset)
                    .clamp(x_lo, x_hi);
                let dzdx = self.reference.dzdx;
                let z0 = z_boundary + dzdx * (self.x0 - x_cross);
                let s2z = (cfg.row_cross_sigma_x * dzdx).powi(2) + cfg.row_cross_sigma_z0.powi(2);
                (z0, s2z, ZEstimate::ChargeCrossingFit { x_cross })
            }
            _ => {
                debug!(module = %self.module, "flat charge profile, z from pad geometry");
                (z_boundary, s2_pad, ZEstimate::PadGeometry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackletConfig;
    use crate::measurement::Measurement;
    use crate::tracklet::ReferenceLine;
    use approx::assert_relative_eq;
    use nalgebra::Matrix2;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};
    use tracklet_env::{CalibrationParams, ModuleId, PadPlane, StaticDetector};

    const ROW: u16 = 5;

    fn quiet_calibration() -> CalibrationParams {
        CalibrationParams {
            diff_t: 0.0,
            diff_l: 0.0,
            ..Default::default()
        }
    }

    fn chamber_from(points: &[(u16, f64, f64, u16, f64)]) -> Chamber {
        let plane = PadPlane::default();
        let n_slots = points.iter().map(|p| p.0 as usize + 1).max().unwrap_or(0);
        let mut chamber = Chamber::new(ModuleId(1), n_slots);
        for &(slot, x, y, row, q) in points {
            let m = Measurement::new(slot, x, y, plane.row_center(row), q).with_pad(row, 75, y);
            chamber.push(m).unwrap();
        }
        chamber.build(&TrackletConfig::default()).unwrap();
        chamber
    }

    fn line_points(n: usize, a: f64, b: f64) -> Vec<(u16, f64, f64, u16, f64)> {
        (0..n)
            .map(|s| {
                let x = 0.3 * s as f64;
                (s as u16, x, a + b * x, ROW, 50.0)
            })
            .collect()
    }

    fn tracklet<'c>(y0: f64, dydx: f64, z0: f64, config: &TrackletConfig) -> Tracklet<'c> {
        Tracklet::new(
            ModuleId(1),
            0.0,
            ReferenceLine::new(y0, dydx, z0, 0.0),
            Matrix2::new(0.01, 0.0, 0.0, 1.0),
            config,
        )
    }

    #[test]
    fn test_zero_noise_round_trip() {
        let chamber = chamber_from(&line_points(24, 2.5, 0.01));
        let detector = StaticDetector::uniform(PadPlane::default(), quiet_calibration());
        let z = PadPlane::default().row_center(ROW);
        let mut t = tracklet(2.5, 0.01, z, &TrackletConfig::default());

        t.attach_clusters(&chamber, &detector, false).unwrap();
        t.fit(FitOptions::default()).unwrap();
        let fit = t.fit_result().unwrap();

        assert_relative_eq!(fit.y0, 2.5, epsilon = 1e-10);
        assert_relative_eq!(fit.dydx, 0.01, epsilon = 1e-10);
        assert!(fit.param_cov[(0, 0)].abs() < 1e-15);
        assert!(fit.param_cov[(0, 1)].abs() < 1e-15);
        assert!(fit.param_cov[(1, 1)].abs() < 1e-15);
        assert_eq!(fit.z_estimate, ZEstimate::PadGeometry);
        assert_relative_eq!(fit.z0, z);
        assert_relative_eq!(fit.s2z, 64.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_end_to_end_noisy_line() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let noise = Normal::new(0.0, 0.02).unwrap();
        let points: Vec<_> = line_points(24, 2.5, 0.01)
            .into_iter()
            .map(|(s, x, y, row, q)| (s, x, y + noise.sample(&mut rng), row, q))
            .collect();
        let chamber = chamber_from(&points);
        let detector = StaticDetector::uniform(PadPlane::default(), CalibrationParams::default());
        let z = PadPlane::default().row_center(ROW);
        let mut t = tracklet(2.5, 0.01, z, &TrackletConfig::default());

        t.attach_clusters(&chamber, &detector, false).unwrap();
        assert!(t.n_clusters() >= 19);
        t.fit(FitOptions::default()).unwrap();
        let fit = t.fit_result().unwrap();
        assert!((fit.dydx - 0.01).abs() < 0.01);
        assert!((fit.y0 - 2.5).abs() < 0.05);
    }

    #[test]
    fn test_x_ref_minimizes_transverse_variance() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let noise = Normal::new(0.0, 0.02).unwrap();
        let points: Vec<_> = line_points(24, 1.0, -0.05)
            .into_iter()
            .map(|(s, x, y, row, q)| (s, x, y + noise.sample(&mut rng), row, q))
            .collect();
        let chamber = chamber_from(&points);
        let detector = StaticDetector::uniform(PadPlane::default(), CalibrationParams::default());
        let mut t = tracklet(1.0, -0.05, PadPlane::default().row_center(ROW), &TrackletConfig::default());
        t.attach_clusters(&chamber, &detector, false).unwrap();
        t.fit(FitOptions::default()).unwrap();

        let x_ref = t.x_ref().unwrap();
        let at_ref = t.covariance_at(x_ref - t.x0()).unwrap()[(0, 0)];
        assert_relative_eq!(at_ref, t.fit_result().unwrap().var_y);
        let (lo, hi) = chamber.x_range().unwrap();
        for i in 0..=20 {
            let x = lo + (hi - lo) * i as f64 / 20.0;
            let v = t.covariance_at(x - t.x0()).unwrap()[(0, 0)];
            assert!(at_ref <= v + 1e-15);
        }
    }

    #[test]
    fn test_fit_requires_attachment() {
        let mut t = tracklet(0.0, 0.0, 0.0, &TrackletConfig::default());
        assert_eq!(t.fit(FitOptions::default()), Err(TrackletError::NotAttached));
        assert_eq!(t.covariance_at(0.0), Err(TrackletError::NotFitted));
    }

    #[test]
    fn test_fit_gate_reports_insufficient_data() {
        let config = TrackletConfig {
            min_fit_clusters: 12,
            ..Default::default()
        };
        let mut points = line_points(10, 2.5, 0.01);
        // stretch the chamber to 24 slots with one far-away cluster
        points.push((23, 6.9, 30.0, ROW, 50.0));
        let chamber = chamber_from(&points);
        let detector = StaticDetector::uniform(PadPlane::default(), quiet_calibration());
        let mut t = tracklet(2.5, 0.01, PadPlane::default().row_center(ROW), &config);

        t.attach_clusters(&chamber, &detector, false).unwrap();
        assert_eq!(t.n_clusters(), 10);
        let err = t.fit(FitOptions::default()).unwrap_err();
        assert_eq!(
            err,
            TrackletError::InsufficientData { stage: Stage::Fit, found: 10, required: 12 }
        );
        assert!(t.fit_result().is_none());
    }

    #[test]
    fn test_raw_digitized_uses_pad_center() {
        let plane = PadPlane::default();
        let mut chamber = Chamber::new(ModuleId(1), 20);
        for s in 0..20u16 {
            let x = 0.3 * s as f64;
            let m = Measurement::new(s, x, 2.5, plane.row_center(ROW), 50.0).with_pad(ROW, 75, 2.6);
            chamber.push(m).unwrap();
        }
        chamber.build(&TrackletConfig::default()).unwrap();
        let detector = StaticDetector::uniform(plane, quiet_calibration());
        let mut t = tracklet(2.5, 0.0, plane.row_center(ROW), &TrackletConfig::default());
        t.attach_clusters(&chamber, &detector, false).unwrap();

        let options = FitOptions {
            estimator: PositionEstimator::RawDigitized,
            ..Default::default()
        };
        t.fit(options).unwrap();
        assert_relative_eq!(t.fit_result().unwrap().y0, 2.6, epsilon = 1e-10);
    }

    #[test]
    fn test_tilt_correction_removes_z_offset() {
        let tilt = 0.1;
        let plane = PadPlane {
            tilt_tangent: tilt,
            ..PadPlane::default()
        };
        let z_pad = plane.row_center(ROW);
        let z_track = z_pad + 2.0;
        let mut chamber = Chamber::new(ModuleId(1), 20);
        for s in 0..20u16 {
            let x = 0.3 * s as f64;
            // tilted pads read the track shifted by t * (z_pad - z_track)
            let y = 2.5 + tilt * (z_pad - z_track);
            chamber.push(Measurement::new(s, x, y, z_pad, 50.0).with_pad(ROW, 75, y)).unwrap();
        }
        chamber.build(&TrackletConfig::default()).unwrap();
        let detector = StaticDetector::uniform(plane, quiet_calibration());

        let mut corrected = tracklet(2.5, 0.0, z_track, &TrackletConfig::default());
        corrected.attach_clusters(&chamber, &detector, true).unwrap();
        corrected
            .fit(FitOptions { tilt_correction: true, ..Default::default() })
            .unwrap();
        let fit = corrected.fit_result().unwrap();
        assert_relative_eq!(fit.y0, 2.5, epsilon = 1e-10);
        assert_eq!(corrected.covariance_at(0.0).unwrap()[(0, 1)], 0.0);

        let mut raw = tracklet(2.5, 0.0, z_track, &TrackletConfig::default());
        raw.attach_clusters(&chamber, &detector, false).unwrap();
        raw.fit(FitOptions::default()).unwrap();
        assert_relative_eq!(raw.fit_result().unwrap().y0, 2.3, epsilon = 1e-10);
        assert!(raw.covariance_at(0.0).unwrap()[(0, 1)] != 0.0);
    }

    #[test]
    fn test_row_cross_locates_charge_transition() {
        let plane = PadPlane::default();
        let mut points: Vec<_> = (0..11).map(|s| (s as u16, 0.3 * s as f64, 2.5, ROW, 50.0)).collect();
        points.extend((11..20).map(|s| (s as u16, 0.3 * s as f64, 2.5, ROW + 1, 50.0)));
        let chamber = chamber_from(&points);
        let detector = StaticDetector::uniform(plane, quiet_calibration());
        let boundary = 0.5 * (plane.row_center(ROW) + plane.row_center(ROW + 1));
        let mut t = tracklet(2.5, 0.0, boundary, &TrackletConfig::default());

        t.attach_clusters(&chamber, &detector, false).unwrap();
        assert!(t.is_row_cross());
        t.fit(FitOptions::default()).unwrap();
        let fit = t.fit_result().unwrap();
        match fit.z_estimate {
            ZEstimate::ChargeCrossingFit { x_cross } => {
                assert!(x_cross > 2.4 && x_cross < 3.9, "x_cross = {x_cross}");
            }
            other => panic!("expected a charge crossing fit, got {other:?}"),
        }
        assert_relative_eq!(fit.z0, boundary, epsilon = 1e-9);
        assert_relative_eq!(fit.s2z, 0.05 * 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_row_cross_dq_dl_has_no_extra_slots() {
        let mut points: Vec<_> = (0..11).map(|s| (s as u16, 0.3 * s as f64, 2.5, ROW, 50.0)).collect();
        points.extend((11..20).map(|s| (s as u16, 0.3 * s as f64, 2.5, ROW + 1, 50.0)));
        let chamber = chamber_from(&points);
        let plane = PadPlane::default();
        let detector = StaticDetector::uniform(plane, quiet_calibration());
        let boundary = 0.5 * (plane.row_center(ROW) + plane.row_center(ROW + 1));
        let mut t = tracklet(2.5, 0.0, boundary, &TrackletConfig::default());

        t.attach_clusters(&chamber, &detector, false).unwrap();
        assert!(t.is_row_cross());
        assert!(t.cluster(20 + 13).is_some());
        assert_relative_eq!(t.dq_dl(13), 50.0 / 0.3, epsilon = 1e-9);
        for slot in 20..40 {
            assert_eq!(t.dq_dl(slot), 0.0);
        }
        let detached = t.materialize();
        assert_eq!(detached.dq_dl(20 + 13), 0.0);
    }

    #[test]
    fn test_z_aware_errors_downweight_far_clusters() {
        let plane = PadPlane {
            tilt_tangent: 0.1,
            ..PadPlane::default()
        };
        let z_pad = plane.row_center(ROW);
        let mut chamber = Chamber::new(ModuleId(1), 20);
        for s in 0..20u16 {
            let x = 0.3 * s as f64;
            // the last four clusters sit 3 units off the reference in z
            let (y, z) = if s >= 16 { (2.6, z_pad + 3.0) } else { (2.5, z_pad) };
            chamber.push(Measurement::new(s, x, y, z, 50.0).with_pad(ROW, 75, y)).unwrap();
        }
        chamber.build(&TrackletConfig::default()).unwrap();
        let detector = StaticDetector::uniform(plane, quiet_calibration());
        let config = TrackletConfig {
            min_row_for_truncation: 64,
            ..Default::default()
        };

        let mut plain = tracklet(2.5, 0.0, z_pad, &config);
        plain.attach_clusters(&chamber, &detector, false).unwrap();
        assert_eq!(plain.n_clusters(), 20);
        plain.fit(FitOptions::default()).unwrap();

        let mut aware = tracklet(2.5, 0.0, z_pad, &config);
        aware.attach_clusters(&chamber, &detector, false).unwrap();
        aware
            .fit(FitOptions { z_aware_errors: true, ..Default::default() })
            .unwrap();

        let plain = plain.fit_result().unwrap();
        let aware = aware.fit_result().unwrap();
        assert!(plain.dydx > 0.01, "plain slope {}", plain.dydx);
        assert!(aware.dydx.abs() < 0.2 * plain.dydx, "aware slope {}", aware.dydx);
        assert!((aware.y0 - 2.5).abs() < (plain.y0 - 2.5).abs());
    }

    #[test]
    fn test_flat_charge_profile_falls_back_to_pad_geometry() {
        let plane = PadPlane::default();
        // alternating rows give a flat signed-charge profile
        let points: Vec<_> = (0..20)
            .map(|s| (s as u16, 0.3 * s as f64, 2.5, ROW + (s % 2) as u16, 50.0))
            .collect();
        let chamber = chamber_from(&points);
        let detector = StaticDetector::uniform(plane, quiet_calibration());
        let boundary = 0.5 * (plane.row_center(ROW) + plane.row_center(ROW + 1));
        let config = TrackletConfig {
            charge_slope_epsilon: 10.0,
            ..Default::default()
        };
        let mut t = tracklet(2.5, 0.0, boundary, &config);
        t.attach_clusters(&chamber, &detector, false).unwrap();
        assert!(t.is_row_cross());
        t.fit(FitOptions::default()).unwrap();
        let fit = t.fit_result().unwrap();
        assert_eq!(fit.z_estimate, ZEstimate::PadGeometry);
        assert_relative_eq!(fit.z0, boundary, epsilon = 1e-9);
        assert_relative_eq!(fit.s2z, 64.0 / 12.0, epsilon = 1e-12);
    }
}
