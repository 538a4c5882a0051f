//! Fixed-horizon adaptive integration
//!
//! Drives an embedded explicit pair from `0` to `horizon`, rejecting and
//! retrying steps whose error estimate exceeds the tolerance. Only the state
//! at the horizon is returned.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use super::{ExplicitSolver, Solver, SolverError, RKDP54};

/// Tolerances and budget for one horizon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub tol_abs: f64,
    pub tol_rel: f64,
    /// Maximum number of attempted steps (accepted + rejected) per horizon
    pub max_steps: usize,
    /// Smallest step the controller may shrink to
    pub min_step: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            tol_abs: 1e-6,
            tol_rel: 1e-3,
            max_steps: 10_000,
            min_step: 1e-10,
        }
    }
}

/// Counters from one call to [`integrate`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntegrationStats {
    pub accepted: usize,
    pub rejected: usize,
    pub evaluations: usize,
}

/// Integrate `f(x, t)` from `x0` over `[0, horizon]` with DOPRI5
///
/// `f` receives the time offset from the start of the horizon.
pub fn integrate<const N: usize, F>(
    mut f: F,
    x0: SVector<f64, N>,
    horizon: f64,
    settings: &IntegratorSettings,
) -> Result<(SVector<f64, N>, IntegrationStats), SolverError>
where
    F: FnMut(&SVector<f64, N>, f64) -> SVector<f64, N>,
{
    if !horizon.is_finite() || horizon <= 0.0 {
        return Err(SolverError::InvalidHorizon(horizon));
    }

    let mut solver = RKDP54::with_tolerances(x0, settings.tol_abs, settings.tol_rel);
    let mut stats = IntegrationStats::default();
    let mut t = 0.0;
    let mut dt = horizon;

    while t < horizon {
        if stats.accepted + stats.rejected >= settings.max_steps {
            return Err(SolverError::StepBudgetExhausted {
                steps: settings.max_steps,
                t,
            });
        }

        // Land exactly on the horizon
        let h = dt.min(horizon - t);
        let t_step = t;

        solver.buffer();
        let mut result = None;
        for _ in 0..solver.stages() {
            result = Some(solver.step(|x, offset| f(x, t_step + offset), h)?);
            stats.evaluations += 1;
        }
        let Some(result) = result else {
            break;
        };

        let finite = solver.state().iter().all(|v| v.is_finite());
        if result.success && finite {
            stats.accepted += 1;
            t += h;
        } else {
            stats.rejected += 1;
            solver.revert()?;
        }

        // An overflowed trial carries no usable error estimate
        let scale = match result.scale {
            Some(scale) if finite && scale.is_finite() => scale,
            _ => 0.1,
        };
        dt = h * scale;

        if t < horizon && dt < settings.min_step {
            return Err(SolverError::TimestepTooSmall {
                dt,
                dt_min: settings.min_step,
            });
        }
    }

    let state = *solver.state();
    if state.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::NonFiniteState { t });
    }

    Ok((state, stats))
}
