//! Per-plant state vectors
//!
//! All vectors are statically sized so a plant's state is `Copy` and can be
//! exchanged between tasks as a whole value.

use nalgebra::{SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Number of tanks in one cascade
pub const TANKS: usize = 3;

/// Length of the augmented state: three levels followed by three error integrators
pub const AUGMENTED_LEN: usize = 2 * TANKS;

/// Augmented state `[h1, h2, h3, e1, e2, e3]`
///
/// Levels are in meters. The error integrators accumulate `href_i - h_i` over
/// time and are never clamped.
pub type AugmentedState = SVector<f64, AUGMENTED_LEN>;

/// Inflow commands `[u1, u2, u3]`
pub type ControlVector = Vector3<f64>;

/// Level references `[href1, href2, href3]`
pub type ReferenceVector = Vector3<f64>;

/// Tank levels of an augmented state
pub fn levels(state: &AugmentedState) -> Vector3<f64> {
    state.fixed_rows::<TANKS>(0).into_owned()
}

/// Error-integrator part of an augmented state
pub fn error_integrals(state: &AugmentedState) -> Vector3<f64> {
    state.fixed_rows::<TANKS>(TANKS).into_owned()
}

/// Replace the level components, leaving the integrators untouched
pub fn with_levels(state: &AugmentedState, levels: &Vector3<f64>) -> AugmentedState {
    let mut out = *state;
    out.fixed_rows_mut::<TANKS>(0).copy_from(levels);
    out
}

/// Closed interval every reference component is kept inside
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBand {
    pub min: f64,
    pub max: f64,
}

impl ReferenceBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp a single component into the band
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Clamp every component of a reference vector
    pub fn clamp_vector(&self, reference: &ReferenceVector) -> ReferenceVector {
        reference.map(|v| self.clamp(v))
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Default for ReferenceBand {
    fn default() -> Self {
        Self { min: 0.1, max: 3.0 }
    }
}

/// Observable view of one plant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantSnapshot {
    pub state: AugmentedState,
    pub reference: ReferenceVector,
}

impl PlantSnapshot {
    pub fn zero(reference: ReferenceVector) -> Self {
        Self {
            state: AugmentedState::zeros(),
            reference,
        }
    }
}
