//! Dormand-Prince 5(4) adaptive Runge-Kutta solver

use nalgebra::SVector;

use super::{ExplicitSolver, Solver, SolverError, SolverStepResult};

/// Stage evaluation offsets
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

/// Butcher tableau rows; the last two rows are the 5th order weights (FSAL)
#[rustfmt::skip]
const A: [&[f64]; 7] = [
    &[1.0/5.0],
    &[3.0/40.0, 9.0/40.0],
    &[44.0/45.0, -56.0/15.0, 32.0/9.0],
    &[19372.0/6561.0, -25360.0/2187.0, 64448.0/6561.0, -212.0/729.0],
    &[9017.0/3168.0, -355.0/33.0, 46732.0/5247.0, 49.0/176.0, -5103.0/18656.0],
    &[35.0/384.0, 0.0, 500.0/1113.0, 125.0/192.0, -2187.0/6784.0, 11.0/84.0],
    &[35.0/384.0, 0.0, 500.0/1113.0, 125.0/192.0, -2187.0/6784.0, 11.0/84.0],
];

/// Difference between 5th and 4th order weights
const TR: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

/// DOPRI5 on a statically sized state
///
/// Fifth order propagation with a fourth order embedded estimate, the pair
/// behind `ode45`. One step is `stages()` calls to [`ExplicitSolver::step`]
/// after [`Solver::buffer`]; only the last call reports success and a step
/// scale. The error is a max-norm scaled by `tol_abs + tol_rel * |x|`.
///
/// Dormand & Prince, J. Comput. Appl. Math. 6(1), 1980.
#[derive(Debug, Clone)]
pub struct RKDP54<const N: usize> {
    state: SVector<f64, N>,
    buffered: Option<SVector<f64, N>>,
    slopes: [SVector<f64, N>; 7],
    stage: usize,
    tol_abs: f64,
    tol_rel: f64,
    beta: f64,
}

impl<const N: usize> RKDP54<N> {
    /// Create a new solver with default tolerances (abs 1e-6, rel 1e-3)
    pub fn new(initial: SVector<f64, N>) -> Self {
        Self::with_tolerances(initial, 1e-6, 1e-3)
    }

    /// Create a new solver with custom tolerances
    pub fn with_tolerances(initial: SVector<f64, N>, tol_abs: f64, tol_rel: f64) -> Self {
        Self {
            state: initial,
            buffered: None,
            slopes: [SVector::zeros(); 7],
            stage: 0,
            tol_abs,
            tol_rel,
            beta: 0.9, // Safety factor
        }
    }

    /// Compute error norm and timestep scale factor
    fn error_controller(&self, x0: &SVector<f64, N>, dt: f64) -> (bool, f64, f64) {
        let mut error_slope = SVector::<f64, N>::zeros();
        for (slope, &coef) in self.slopes.iter().zip(TR.iter()) {
            error_slope += coef * slope;
        }

        // Scale against the larger of the old and new magnitudes
        let scale = x0.zip_map(&self.state, |a, b| {
            self.tol_abs + self.tol_rel * a.abs().max(b.abs())
        });
        let scaled_error = (dt * error_slope).component_div(&scale).map(|e| e.abs());
        if scaled_error.iter().any(|e| e.is_nan()) {
            return (false, f64::INFINITY, 0.1);
        }
        let error_norm = scaled_error.max().max(1e-16);

        let success = error_norm <= 1.0;

        // Embedded order 4 drives the exponent
        let timestep_scale = (self.beta / error_norm.powf(1.0 / 5.0)).clamp(0.1, 10.0);

        (success, error_norm, timestep_scale)
    }
}

impl<const N: usize> Solver<N> for RKDP54<N> {
    fn state(&self) -> &SVector<f64, N> {
        &self.state
    }

    fn set_state(&mut self, state: SVector<f64, N>) {
        self.state = state;
        self.buffered = None;
        self.stage = 0;
    }

    fn buffer(&mut self) {
        self.buffered = Some(self.state);
        self.stage = 0;
    }

    fn revert(&mut self) -> Result<(), SolverError> {
        self.state = self.buffered.ok_or(SolverError::EmptyHistory)?;
        self.stage = 0;
        Ok(())
    }

    fn order(&self) -> usize {
        5
    }

    fn embedded_order(&self) -> usize {
        4
    }

    fn stages(&self) -> usize {
        7
    }
}

impl<const N: usize> ExplicitSolver<N> for RKDP54<N> {
    fn step<F>(&mut self, mut f: F, dt: f64) -> Result<SolverStepResult, SolverError>
    where
        F: FnMut(&SVector<f64, N>, f64) -> SVector<f64, N>,
    {
        let x0 = self.buffered.ok_or(SolverError::EmptyHistory)?;

        self.slopes[self.stage] = f(&self.state, C[self.stage] * dt);

        if self.stage < 6 {
            let mut slope_sum = SVector::<f64, N>::zeros();
            for (i, &coef) in A[self.stage].iter().enumerate() {
                slope_sum += coef * self.slopes[i];
            }
            self.state = x0 + dt * slope_sum;
            self.stage += 1;

            Ok(SolverStepResult::default())
        } else {
            // Stage 7 evaluates f at the 5th order solution already in `state`
            let (success, error_norm, scale) = self.error_controller(&x0, dt);
            self.stage = 0;

            Ok(SolverStepResult {
                success,
                error_norm,
                scale: Some(scale),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn full_step<const N: usize, F>(solver: &mut RKDP54<N>, mut f: F, dt: f64) -> SolverStepResult
    where
        F: FnMut(&SVector<f64, N>, f64) -> SVector<f64, N>,
    {
        solver.buffer();
        let mut result = SolverStepResult::default();
        for _ in 0..solver.stages() {
            result = solver.step(&mut f, dt).unwrap();
        }
        result
    }

    #[test]
    fn test_rkdp54_exponential_decay() {
        // dx/dt = -x, x(0) = 1
        let mut solver = RKDP54::new(SVector::<f64, 1>::new(1.0));
        let dt = 0.1;
        for _ in 0..10 {
            full_step(&mut solver, |x, _t| -x, dt);
        }
        assert_relative_eq!(solver.state()[0], (-1.0f64).exp(), epsilon = 1e-7);
    }

    #[test]
    fn test_rkdp54_adaptive_scale_range() {
        let mut solver = RKDP54::new(SVector::<f64, 1>::new(1.0));
        let result = full_step(&mut solver, |x, _t| -x, 0.1);

        let scale = result.scale.unwrap();
        assert!((0.1..=10.0).contains(&scale));
        assert!(result.success);
    }

    #[test]
    fn test_rkdp54_rejects_oversized_step() {
        let mut solver = RKDP54::with_tolerances(SVector::<f64, 1>::new(1.0), 1e-10, 1e-10);
        let result = full_step(&mut solver, |x, _t| -50.0 * x, 1.0);
        assert!(!result.success);
        assert!(result.scale.unwrap() < 1.0);

        solver.revert().unwrap();
        assert_eq!(solver.state()[0], 1.0);
    }

    #[test]
    fn test_rkdp54_harmonic_oscillator() {
        let mut solver = RKDP54::new(Vector2::new(1.0, 0.0));
        let n = 200;
        let dt = 2.0 * std::f64::consts::PI / n as f64;
        for _ in 0..n {
            full_step(&mut solver, |x, _t| Vector2::new(x[1], -x[0]), dt);
        }
        assert_relative_eq!(solver.state()[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(solver.state()[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_step_without_buffer_is_an_error() {
        let mut solver = RKDP54::new(SVector::<f64, 1>::new(1.0));
        let err = solver.step(|x, _t| -x, 0.1).unwrap_err();
        assert_eq!(err, SolverError::EmptyHistory);
    }
}
