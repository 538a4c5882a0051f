//! Real-time twin: per-plant simulation and control tasks
//!
//! Per plant, the simulation task and the control task only meet through the
//! tag store (levels one way, inflow commands the other) plus a shared
//! snapshot of the augmented state that carries the error integrators to the
//! controller. Up to one period of staleness in either direction is normal
//! scan-cycle lag.
//!
//! Every loop uses fixed-delay scheduling: the full period is slept after
//! each iteration, so cadences drift under load.

mod cancel;
mod control_task;
mod orchestrator;
mod randomizer;
mod shared;
mod simulation;

use thiserror::Error;

use crate::solvers::SolverError;
use crate::tags::StoreError;

pub use cancel::{CancellationSource, CancellationToken};
pub use control_task::ControlTask;
pub use orchestrator::{
    Orchestrator, RunningTwin, ShutdownReport, TaskExit, TaskHandle, TaskKind, TaskState,
};
pub use randomizer::{latest_reference, ReferenceRandomizer, ReferenceReceiver};
pub use shared::SharedState;
pub use simulation::SimulationTask;

/// Why a scan cycle did not complete
///
/// None of these stop the task; the next cycle retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CycleError {
    #[error("plant {plant}: cycle skipped, tag read failed: {source}")]
    Skipped { plant: usize, source: StoreError },

    #[error("plant {plant}: integration failed, holding last good state: {source}")]
    Held { plant: usize, source: SolverError },

    #[error("plant {plant}: result computed but tag write failed: {source}")]
    Unpublished { plant: usize, source: StoreError },
}
