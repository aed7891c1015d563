//! Least squares fit of second degree polynomials.

use nalgebra::{DMatrix, DVector, SVD};

/// `y = a x^2 + b x + c`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Parabola {
    /// Coefficient of `x^2`.
    pub a: f64,
    /// Coefficient of `x`.
    pub b: f64,
    /// Constant term.
    pub c: f64,
}

impl Parabola {
    /// Create a new instance.
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    /// Least squares fit through the points `(x, y)`, solved via SVD.
    /// Returns `None` for fewer than three points or a singular system.
    pub fn fit(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len();
        if n < 3 || y.len() != n {
            return None;
        }
        let design = DMatrix::from_fn(n, 3, |i, j| x[i].powi(2 - j as i32));
        let rhs = DVector::from_column_slice(y);
        let svd = SVD::new(design, true, true);
        if svd.rank(1e-12 * svd.singular_values.max()) < 3 {
            return None;
        }
        let coeffs = svd.solve(&rhs, 0.).ok()?;
        let fit = Self::new(coeffs[0], coeffs[1], coeffs[2]);
        [fit.a, fit.b, fit.c]
            .iter()
            .all(|v| v.is_finite())
            .then_some(fit)
    }

    /// Value at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        (self.a * x + self.b) * x + self.c
    }

    /// Abscissa of the extremum, `-b / 2a`. `None` for a straight line.
    pub fn vertex(&self) -> Option<f64> {
        (self.a != 0.).then(|| -self.b / (2. * self.a))
    }
}
