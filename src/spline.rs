//! Interpolating cubic spline with not-a-knot end conditions.
//!
//! The slopes at the knots solve a tridiagonal system (Thomas algorithm), so construction is
//! `O(n)`. Evaluation outside the knot range extrapolates the end segments.

/// Piecewise cubic through every `(x, y)` knot.
#[derive(Clone, Debug)]
pub(crate) struct CubicSpline {
    x: Vec<f64>,
    /// `[a, b, c, d]` of `a + b t + c t^2 + d t^3` per segment.
    coeffs: Vec<[f64; 4]>,
}

impl CubicSpline {
    /// Build the spline. `x` must be strictly increasing and as long as `y`.
    /// Returns `None` for fewer than two knots or invalid abscissae.
    pub(crate) fn new(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len();
        if n < 2 || y.len() != n || x.windows(2).any(|w| !(w[1] > w[0])) {
            return None;
        }
        let dx: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let slope: Vec<f64> = y.windows(2).zip(&dx).map(|(w, h)| (w[1] - w[0]) / h).collect();

        let slopes = match n {
            2 => vec![slope[0]; 2],
            // a single parabola through three points
            3 => {
                let curvature = (slope[1] - slope[0]) / (x[2] - x[0]);
                vec![
                    slope[0] - curvature * dx[0],
                    slope[0] + curvature * dx[0],
                    slope[1] + curvature * dx[1],
                ]
            }
            _ => not_a_knot_slopes(x, &dx, &slope),
        };

        let coeffs = (0..n - 1)
            .map(|i| {
                let h = dx[i];
                let c = (3. * slope[i] - 2. * slopes[i] - slopes[i + 1]) / h;
                let d = (slopes[i] + slopes[i + 1] - 2. * slope[i]) / (h * h);
                [y[i], slopes[i], c, d]
            })
            .collect();

        Some(Self {
            x: x.to_vec(),
            coeffs,
        })
    }

    /// Spline through equally spaced samples at `0, 1, 2, ...`.
    pub(crate) fn uniform(y: &[f64]) -> Option<Self> {
        let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
        Self::new(&x, y)
    }

    /// Evaluate the spline at `x`.
    pub(crate) fn evaluate(&self, x: f64) -> f64 {
        let segment = self.find_segment(x);
        let t = x - self.x[segment];
        let [a, b, c, d] = self.coeffs[segment];
        a + t * (b + t * (c + t * d))
    }

    fn find_segment(&self, x: f64) -> usize {
        let last = self.coeffs.len() - 1;
        match self.x.partition_point(|&knot| knot <= x) {
            0 => 0,
            i => (i - 1).min(last),
        }
    }
}

/// Slopes of the not-a-knot spline: the third derivative is continuous across the second and
/// the second-to-last knot.
fn not_a_knot_slopes(x: &[f64], dx: &[f64], slope: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut sub = vec![0.; n];
    let mut diag = vec![0.; n];
    let mut sup = vec![0.; n];
    let mut rhs = vec![0.; n];

    for i in 1..n - 1 {
        sub[i] = dx[i];
        diag[i] = 2. * (dx[i - 1] + dx[i]);
        sup[i] = dx[i - 1];
        rhs[i] = 3. * (dx[i] * slope[i - 1] + dx[i - 1] * slope[i]);
    }

    let d = x[2] - x[0];
    diag[0] = dx[1];
    sup[0] = d;
    rhs[0] = ((dx[0] + 2. * d) * dx[1] * slope[0] + dx[0] * dx[0] * slope[1]) / d;

    let d = x[n - 1] - x[n - 3];
    diag[n - 1] = dx[n - 3];
    sub[n - 1] = d;
    rhs[n - 1] = (dx[n - 2] * dx[n - 2] * slope[n - 3]
        + (2. * d + dx[n - 2]) * dx[n - 3] * slope[n - 2])
        / d;

    solve_tridiagonal(&sub, &diag, &sup, &rhs)
}

/// Thomas algorithm. `sub[0]` and `sup[n - 1]` are ignored.
fn solve_tridiagonal(sub: &[f64], diag: &[f64], sup: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut c = vec![0.; n];
    let mut d = vec![0.; n];

    c[0] = sup[0] / diag[0];
    d[0] = rhs[0] / diag[0];
    for i in 1..n {
        let m = diag[i] - sub[i] * c[i - 1];
        c[i] = if i < n - 1 { sup[i] / m } else { 0. };
        d[i] = (rhs[i] - sub[i] * d[i - 1]) / m;
    }

    let mut out = vec![0.; n];
    out[n - 1] = d[n - 1];
    for i in (0..n - 1).rev() {
        out[i] = d[i] - c[i] * out[i + 1];
    }
    out
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn interpolates_knots() {
        let x = [0., 1., 2.5, 3., 4.5, 6.];
        let y = [1., -2., 0.5, 3., 2., 2.2];
        let spline = CubicSpline::new(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert_abs_diff_eq!(spline.evaluate(*xi), *yi, epsilon = 1e-12);
        }
    }

    #[test]
    fn reproduces_cubics_exactly() {
        // not-a-knot splines are exact for cubic polynomials, also when extrapolating
        let f = |x: f64| 0.5 * x.powi(3) - 2. * x * x + x - 3.;
        let x: Vec<f64> = (0..8).map(|i| i as f64 * 0.7).collect();
        let y: Vec<f64> = x.iter().map(|&x| f(x)).collect();
        let spline = CubicSpline::new(&x, &y).unwrap();
        for t in [-0.5, 0.1, 1.33, 2.9, 4.85, 5.2] {
            assert_abs_diff_eq!(spline.evaluate(t), f(t), epsilon = 1e-9);
        }
    }

    #[test]
    fn small_inputs() {
        let line = CubicSpline::uniform(&[1., 3.]).unwrap();
        assert_abs_diff_eq!(line.evaluate(0.25), 1.5);

        let parabola = CubicSpline::uniform(&[0., 1., 4.]).unwrap();
        assert_abs_diff_eq!(parabola.evaluate(1.5), 2.25, epsilon = 1e-12);

        assert!(CubicSpline::uniform(&[1.]).is_none());
        assert!(CubicSpline::new(&[0., 0.], &[1., 2.]).is_none());
    }

    #[test]
    fn smooth_function_accuracy() {
        let y: Vec<f64> = (0..40).map(|i| (i as f64 * 0.3).sin()).collect();
        let spline = CubicSpline::uniform(&y).unwrap();
        for i in 0..390 {
            let t = i as f64 * 0.1;
            assert_abs_diff_eq!(spline.evaluate(t), (t * 0.3).sin(), epsilon = 1e-3);
        }
    }
}
