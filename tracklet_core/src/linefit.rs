//! Weighted least-squares straight line y = a + b*u.

use crate::error::TrackletError;
use nalgebra::{Matrix2, Vector2};

/// Solution of a weighted line fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub intercept: f64,
    pub slope: f64,
    /// Inverse of the normal matrix (covariance for correctly weighted data)
    pub covariance: Matrix2<f64>,
    /// Weighted sum of squared residuals
    pub chi2: f64,
    /// Number of points
    pub n: usize,
}

impl LineFit {
    /// Degrees of freedom.
    pub fn ndf(&self) -> usize {
        self.n.saturating_sub(2)
    }

    /// Covariance scaled by the reduced chi2 (zero without degrees of freedom).
    pub fn scaled_covariance(&self) -> Matrix2<f64> {
        match self.ndf() {
            0 => Matrix2::zeros(),
            ndf => self.covariance * (self.chi2 / ndf as f64),
        }
    }

    /// Abscissa at which the fitted ordinate has minimum variance.
    pub fn min_variance_abscissa(&self) -> f64 {
        -self.covariance[(0, 1)] / self.covariance[(1, 1)]
    }

    pub fn value_at(&self, u: f64) -> f64 {
        self.intercept + self.slope * u
    }
}

/// Accumulator for (u, y, weight) triples.
#[derive(Debug, Clone, Default)]
pub struct LineFitter {
    points: Vec<(f64, f64, f64)>,
}

impl LineFitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a point; non-positive or non-finite weights are skipped.
    pub fn add(&mut self, u: f64, y: f64, weight: f64) -> bool {
        if !(weight > 0.0 && weight.is_finite() && u.is_finite() && y.is_finite()) {
            return false;
        }
        self.points.push((u, y, weight));
        true
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Solves the 2x2 normal equations.
    ///
    /// Fails with `DegenerateFit` when the normal matrix is (numerically)
    /// singular, e.g. fewer than two distinct abscissae.
    pub fn solve(&self) -> Result<LineFit, TrackletError> {
        let (mut s, mut su, mut suu, mut sy, mut suy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(u, y, w) in &self.points {
            s += w;
            su += w * u;
            suu += w * u * u;
            sy += w * y;
            suy += w * u * y;
        }

        let normal = Matrix2::new(s, su, su, suu);
        let determinant = normal.determinant();
        let scale = (s * suu).abs();
        if self.points.len() < 2 || !(determinant > 1e-12 * scale) {
            return Err(TrackletError::DegenerateFit { determinant });
        }
        let covariance = normal
            .try_inverse()
            .ok_or(TrackletError::DegenerateFit { determinant })?;

        let params = covariance * Vector2::new(sy, suy);
        let (intercept, slope) = (params[0], params[1]);
        if !(intercept.is_finite() && slope.is_finite()) {
            return Err(TrackletError::DegenerateFit { determinant });
        }

        let chi2 = self
            .points
            .iter()
            .map(|&(u, y, w)| {
                let r = y - intercept - slope * u;
                w * r * r
            })
            .sum();

        Ok(LineFit {
            intercept,
            slope,
            covariance,
            chi2,
            n: self.points.len(),
        })
    }
}
