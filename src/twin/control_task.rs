//! Control task: one plant's scan cycle of read levels, compute, write inflows

use std::time::Duration;

use log::{debug, info, warn};

use super::cancel::CancellationToken;
use super::shared::SharedState;
use super::CycleError;
use crate::control::StateFeedback;
use crate::plant::{with_levels, AugmentedState, ControlVector};
use crate::tags::PlantTagAdapter;

#[derive(Debug)]
pub struct ControlTask {
    plant: usize,
    law: StateFeedback,
    tags: PlantTagAdapter,
    shared: SharedState,
    local: AugmentedState,
}

impl ControlTask {
    pub fn new(plant: usize, law: StateFeedback, tags: PlantTagAdapter, shared: SharedState) -> Self {
        Self {
            plant,
            law,
            tags,
            shared,
            local: AugmentedState::zeros(),
        }
    }

    /// State the last command was computed from
    pub fn local_state(&self) -> &AugmentedState {
        &self.local
    }

    /// One scan cycle
    ///
    /// Levels come from the sensor tags; the error integrators are whatever
    /// the simulation task published last.
    pub fn cycle(&mut self) -> Result<ControlVector, CycleError> {
        let measured = self
            .tags
            .read_levels()
            .map_err(|source| CycleError::Skipped {
                plant: self.plant,
                source,
            })?;

        self.local = with_levels(&self.shared.state(), &measured);
        let u = self.law.control(&self.local);

        self.tags
            .write_control(&u)
            .map_err(|source| CycleError::Unpublished {
                plant: self.plant,
                source,
            })?;
        debug!("plant {}: u={:?}", self.plant, u);
        Ok(u)
    }

    /// Cycle with a fixed delay of `period` until cancelled
    pub fn run(mut self, period: Duration, token: CancellationToken) {
        info!("plant {}: control task running", self.plant);
        while !token.is_cancelled() {
            if let Err(e) = self.cycle() {
                warn!("{e}");
            }
            if token.sleep(period) {
                break;
            }
        }
        info!("plant {}: control task stopped", self.plant);
    }
}
