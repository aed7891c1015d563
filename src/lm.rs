//! Levenberg-Marquardt least squares for small 1D profile models.
//!
//! Used by the finesse estimation, which fits Gaussian and Lorentzian line profiles to the
//! reference spectrum.

use nalgebra::{DMatrix, DVector};

/// Configuration of the optimizer.
#[derive(Debug, Clone)]
pub(crate) struct LMConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the largest parameter change.
    pub convergence_threshold: f64,
    /// Initial damping.
    pub initial_lambda: f64,
    /// Damping factor on a rejected step.
    pub lambda_up: f64,
    /// Damping factor on an accepted step.
    pub lambda_down: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_threshold: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.,
            lambda_down: 0.1,
        }
    }
}

/// Outcome of an optimization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LMResult<const N: usize> {
    pub params: [f64; N],
    /// Sum of squared residuals.
    pub chi2: f64,
    pub converged: bool,
}

/// A model `y = f(x; params)` with an analytic Jacobian.
pub(crate) trait LMModel<const N: usize> {
    fn evaluate(&self, x: f64, params: &[f64; N]) -> f64;

    /// Partial derivatives with respect to every parameter.
    fn jacobian_row(&self, x: f64, params: &[f64; N]) -> [f64; N];

    /// Keep parameters inside their valid domain after an update.
    fn constrain(&self, _params: &mut [f64; N]) {}
}

pub(crate) fn optimize<const N: usize, M: LMModel<N>>(
    model: &M,
    data_x: &[f64],
    data_y: &[f64],
    initial_params: [f64; N],
    config: &LMConfig,
) -> LMResult<N> {
    let mut params = initial_params;
    let mut lambda = config.initial_lambda;
    let mut chi2 = compute_chi2(model, data_x, data_y, &params);
    let mut converged = false;

    for _ in 0..config.max_iterations {
        let (hessian, gradient) = hessian_gradient(model, data_x, data_y, &params);
        let gradient = DVector::from_row_slice(&gradient);
        let damped = DMatrix::from_fn(N, N, |i, j| {
            if i == j {
                hessian[i][j] * (1. + lambda)
            } else {
                hessian[i][j]
            }
        });
        let Some(delta) = damped.lu().solve(&gradient) else {
            break;
        };

        let mut new_params = params;
        for (p, d) in new_params.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut new_params);
        let new_chi2 = compute_chi2(model, data_x, data_y, &new_params);

        if new_chi2.is_finite() && new_chi2 < chi2 {
            params = new_params;
            chi2 = new_chi2;
            lambda *= config.lambda_down;
            if delta.amax() < config.convergence_threshold {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                // no downhill step left, the minimum is reached up to numerical precision
                converged = chi2.is_finite();
                break;
            }
        }
    }

    LMResult {
        params,
        chi2,
        converged,
    }
}

fn compute_chi2<const N: usize, M: LMModel<N>>(
    model: &M,
    data_x: &[f64],
    data_y: &[f64],
    params: &[f64; N],
) -> f64 {
    data_x
        .iter()
        .zip(data_y)
        .map(|(&x, &y)| (y - model.evaluate(x, params)).powi(2))
        .sum()
}

/// `J^T J` and `J^T r`.
#[allow(clippy::needless_range_loop)]
fn hessian_gradient<const N: usize, M: LMModel<N>>(
    model: &M,
    data_x: &[f64],
    data_y: &[f64],
    params: &[f64; N],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.; N]; N];
    let mut gradient = [0.; N];
    for (&x, &y) in data_x.iter().zip(data_y) {
        let row = model.jacobian_row(x, params);
        let residual = y - model.evaluate(x, params);
        for i in 0..N {
            gradient[i] += row[i] * residual;
            for j in 0..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }
    (hessian, gradient)
}

/// `A exp(-(x - mu)^2 / (2 sigma^2)) + B`, parameters `[A, mu, sigma, B]`.
pub(crate) struct Gaussian;

impl LMModel<4> for Gaussian {
    fn evaluate(&self, x: f64, [a, mu, sigma, b]: &[f64; 4]) -> f64 {
        a * (-(x - mu).powi(2) / (2. * sigma * sigma)).exp() + b
    }

    fn jacobian_row(&self, x: f64, [a, mu, sigma, _]: &[f64; 4]) -> [f64; 4] {
        let dx = x - mu;
        let e = (-dx * dx / (2. * sigma * sigma)).exp();
        [
            e,
            a * e * dx / (sigma * sigma),
            a * e * dx * dx / sigma.powi(3),
            1.,
        ]
    }

    fn constrain(&self, params: &mut [f64; 4]) {
        params[2] = params[2].abs().max(1e-6);
    }
}

/// `A / (1 + ((x - mu) / gamma)^2) + B`, parameters `[A, mu, gamma, B]`.
pub(crate) struct Lorentzian;

impl LMModel<4> for Lorentzian {
    fn evaluate(&self, x: f64, [a, mu, gamma, b]: &[f64; 4]) -> f64 {
        a / (1. + ((x - mu) / gamma).powi(2)) + b
    }

    fn jacobian_row(&self, x: f64, [a, mu, gamma, _]: &[f64; 4]) -> [f64; 4] {
        let u = (x - mu) / gamma;
        let denom = 1. + u * u;
        let l = 1. / denom;
        let common = 2. * a * u / (denom * denom);
        [l, common / gamma, common * u / gamma, 1.]
    }

    fn constrain(&self, params: &mut [f64; 4]) {
        params[2] = params[2].abs().max(1e-6);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn sample<const N: usize, M: LMModel<N>>(model: &M, params: &[f64; N]) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..60).map(|i| i as f64 * 0.5).collect();
        let y = x.iter().map(|&x| model.evaluate(x, params)).collect();
        (x, y)
    }

    #[test]
    fn recovers_gaussian() {
        let truth = [3., 14.2, 2.1, 0.4];
        let (x, y) = sample(&Gaussian, &truth);
        let result = optimize(&Gaussian, &x, &y, [2.5, 13., 3., 0.], &LMConfig::default());

        assert!(result.converged);
        for (p, t) in result.params.iter().zip(&truth) {
            assert_abs_diff_eq!(*p, *t, epsilon = 1e-6);
        }
    }

    #[test]
    fn recovers_lorentzian() {
        let truth = [1.5, 16., 1.2, -0.2];
        let (x, y) = sample(&Lorentzian, &truth);
        let result = optimize(&Lorentzian, &x, &y, [1., 15., 2., 0.], &LMConfig::default());

        assert!(result.converged);
        assert_abs_diff_eq!(result.params[1], 16., epsilon = 1e-6);
        assert_abs_diff_eq!(result.params[2], 1.2, epsilon = 1e-6);
        assert!(result.chi2 < 1e-12);
    }

    #[test]
    fn jacobians_match_finite_differences() {
        let params = [2., 5., 1.5, 0.3];
        let h = 1e-6;
        for x in [3.2, 5., 7.7] {
            for (model, row) in [
                (&Gaussian as &dyn LMModel<4>, Gaussian.jacobian_row(x, &params)),
                (&Lorentzian as &dyn LMModel<4>, Lorentzian.jacobian_row(x, &params)),
            ] {
                for (i, analytic) in row.iter().enumerate() {
                    let mut up = params;
                    let mut down = params;
                    up[i] += h;
                    down[i] -= h;
                    let numeric = (model.evaluate(x, &up) - model.evaluate(x, &down)) / (2. * h);
                    assert_abs_diff_eq!(*analytic, numeric, epsilon = 1e-6);
                }
            }
        }
    }
}
