//! Simulation task: integrates one plant and publishes its levels

use std::time::Duration;

use log::{debug, info, warn};

use super::cancel::CancellationToken;
use super::randomizer::{latest_reference, ReferenceReceiver};
use super::shared::SharedState;
use super::CycleError;
use crate::plant::{levels, AugmentedState, ReferenceVector, TankModel};
use crate::solvers::{integrate, IntegratorSettings};
use crate::tags::PlantTagAdapter;

/// Owner of one plant's authoritative augmented state
#[derive(Debug)]
pub struct SimulationTask {
    plant: usize,
    model: TankModel,
    settings: IntegratorSettings,
    horizon: f64,
    state: AugmentedState,
    reference: ReferenceVector,
    references: ReferenceReceiver,
    tags: PlantTagAdapter,
    shared: SharedState,
    time: f64,
}

impl SimulationTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plant: usize,
        model: TankModel,
        settings: IntegratorSettings,
        horizon: f64,
        reference: ReferenceVector,
        references: ReferenceReceiver,
        tags: PlantTagAdapter,
        shared: SharedState,
    ) -> Self {
        Self {
            plant,
            model,
            settings,
            horizon,
            state: AugmentedState::zeros(),
            reference,
            references,
            tags,
            shared,
            time: 0.0,
        }
    }

    pub fn state(&self) -> &AugmentedState {
        &self.state
    }

    pub fn reference(&self) -> &ReferenceVector {
        &self.reference
    }

    /// Simulated time accumulated over accepted cycles
    pub fn time(&self) -> f64 {
        self.time
    }

    /// One scan cycle
    ///
    /// Reads the actuator tags, advances the state by one horizon with the
    /// control and reference frozen, then writes the level tags. A store
    /// failure skips the cycle; an integration failure keeps the previous
    /// state.
    pub fn cycle(&mut self) -> Result<(), CycleError> {
        if let Some(reference) = latest_reference(&self.references) {
            debug!("plant {}: reference -> {:?}", self.plant, reference);
            self.reference = reference;
        }

        let u = self
            .tags
            .read_control()
            .map_err(|source| CycleError::Skipped {
                plant: self.plant,
                source,
            })?;
        let href = self.reference;
        let model = self.model;

        let (next, stats) = integrate(
            |x, _t| model.derivative(x, &u, &href),
            self.state,
            self.horizon,
            &self.settings,
        )
        .map_err(|source| CycleError::Held {
            plant: self.plant,
            source,
        })?;

        self.state = next;
        self.time += self.horizon;
        self.shared.publish(self.state, self.reference);
        debug!(
            "plant {}: t={:.1} steps={}/{} x={:?}",
            self.plant, self.time, stats.accepted, stats.rejected, self.state
        );

        self.tags
            .write_levels(&levels(&self.state))
            .map_err(|source| CycleError::Unpublished {
                plant: self.plant,
                source,
            })
    }

    /// Cycle with a fixed delay of `period` until cancelled
    pub fn run(mut self, period: Duration, token: CancellationToken) {
        info!("plant {}: simulation task running", self.plant);
        while !token.is_cancelled() {
            if let Err(e) = self.cycle() {
                warn!("{e}");
            }
            if token.sleep(period) {
                break;
            }
        }
        info!("plant {}: simulation task stopped at t={:.1}", self.plant, self.time);
    }
}
