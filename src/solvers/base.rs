//! Base solver traits and types

use nalgebra::SVector;
use thiserror::Error;

/// Solver-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Step budget of {steps} exhausted at t={t} before reaching the horizon")]
    StepBudgetExhausted { steps: usize, t: f64 },

    #[error("Timestep {dt} smaller than minimum {dt_min}")]
    TimestepTooSmall { dt: f64, dt_min: f64 },

    #[error("State became non-finite at t={t}")]
    NonFiniteState { t: f64 },

    #[error("History buffer is empty")]
    EmptyHistory,

    #[error("Invalid horizon {0}")]
    InvalidHorizon(f64),
}

/// Result of a solver stage
#[derive(Debug, Clone, Copy)]
pub struct SolverStepResult {
    pub success: bool,
    pub error_norm: f64,
    pub scale: Option<f64>,
}

impl Default for SolverStepResult {
    fn default() -> Self {
        Self {
            success: true,
            error_norm: 0.0,
            scale: None,
        }
    }
}

/// Core solver trait for numerical integration of an `N`-dimensional state
pub trait Solver<const N: usize>: Send + Sync {
    /// Get current state vector
    fn state(&self) -> &SVector<f64, N>;

    /// Set state vector
    fn set_state(&mut self, state: SVector<f64, N>);

    /// Buffer current state for potential reversion
    fn buffer(&mut self);

    /// Revert to buffered state
    fn revert(&mut self) -> Result<(), SolverError>;

    /// Order of the propagating method
    fn order(&self) -> usize;

    /// Order of the embedded error estimate
    fn embedded_order(&self) -> usize;

    /// Number of stages
    fn stages(&self) -> usize;
}

/// Explicit solver trait
///
/// A full step is `buffer()` followed by `stages()` calls to `step`; only the
/// last call carries the error estimate and the step-size scale.
pub trait ExplicitSolver<const N: usize>: Solver<N> {
    /// Evaluate one stage with the given right-hand side `f(x, t_offset)`
    fn step<F>(&mut self, f: F, dt: f64) -> Result<SolverStepResult, SolverError>
    where
        F: FnMut(&SVector<f64, N>, f64) -> SVector<f64, N>;
}
