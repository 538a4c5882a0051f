//! Static full-state feedback
//!
//! `u = -K x` with a constant 3x6 gain acting on the augmented state. The
//! gain is supplied from configuration; nothing here designs it.

use nalgebra::SMatrix;

use crate::error::{TwinError, TwinResult};
use crate::plant::{AugmentedState, ControlVector, AUGMENTED_LEN, TANKS};

/// Gain from augmented state to inflow commands
pub type GainMatrix = SMatrix<f64, TANKS, AUGMENTED_LEN>;

/// Gain used by the reference deployment (pole placement done offline)
#[rustfmt::skip]
pub const DEFAULT_GAIN: [[f64; AUGMENTED_LEN]; TANKS] = [
    [ 3.5036,  2.4688, 2.2157, -0.8711, -0.3877, -0.3014],
    [-1.0348,  3.2506, 2.4688,  0.4834, -0.7849, -0.3877],
    [-0.2531, -1.0348, 3.5036,  0.0863,  0.4834, -0.8711],
];

/// Build a gain matrix from rows, rejecting anything that is not 3x6 and finite
pub fn gain_from_rows(rows: &[Vec<f64>]) -> TwinResult<GainMatrix> {
    if rows.len() != TANKS || rows.iter().any(|row| row.len() != AUGMENTED_LEN) {
        let cols: Vec<usize> = rows.iter().map(Vec::len).collect();
        return Err(TwinError::Config(format!(
            "gain matrix must be {TANKS}x{AUGMENTED_LEN}, got {} rows with lengths {cols:?}",
            rows.len()
        )));
    }
    if rows.iter().flatten().any(|k| !k.is_finite()) {
        return Err(TwinError::Config(
            "gain matrix contains non-finite entries".to_string(),
        ));
    }
    Ok(GainMatrix::from_fn(|i, j| rows[i][j]))
}

/// Stateless linear state-feedback law
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateFeedback {
    gain: GainMatrix,
}

impl StateFeedback {
    pub fn new(gain: GainMatrix) -> Self {
        Self { gain }
    }

    pub fn gain(&self) -> &GainMatrix {
        &self.gain
    }

    /// `u = -K x`
    #[inline]
    pub fn control(&self, x: &AugmentedState) -> ControlVector {
        -(self.gain * x)
    }
}

impl Default for StateFeedback {
    fn default() -> Self {
        Self::new(GainMatrix::from_fn(|i, j| DEFAULT_GAIN[i][j]))
    }
}
