//! Plant model: state vectors and the tank cascade dynamics

mod dynamics;
mod state;

pub use dynamics::{cross_section_area, outflow, TankConstants, TankModel};
pub use state::{
    error_integrals, levels, with_levels, AugmentedState, ControlVector, PlantSnapshot,
    ReferenceBand, ReferenceVector, AUGMENTED_LEN, TANKS,
};
