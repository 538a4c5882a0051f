//! tanktwin - real-time digital twin of three-tank cascade plants
//!
//! Every plant is a cascade of three conical tanks. A simulation task
//! integrates the plant dynamics with a Dormand-Prince 5(4) solver and
//! publishes tank levels to a tag store; a control task reads them back and
//! writes inflow commands computed by state feedback `u = -K x`. A reference
//! randomizer perturbs the level setpoints and an orchestrator owns the
//! lifecycle of all tasks.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tanktwin::prelude::*;
//!
//! let config = TwinConfig::default();
//! let store = Arc::new(MemoryTagStore::with_points(
//!     config.store.endpoint.clone(),
//!     config.op_timeout(),
//!     config.all_tags(),
//! ));
//!
//! let twin = Orchestrator::new(config)?.start(store)?;
//! std::thread::sleep(Duration::from_secs(2));
//! println!("{}", twin.shutdown());
//! # Ok::<(), tanktwin::TwinError>(())
//! ```

pub mod alerts;
pub mod config;
pub mod control;
pub mod error;
pub mod plant;
pub mod solvers;
pub mod tags;
pub mod telemetry;
pub mod twin;

pub use error::{TwinError, TwinResult};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::TwinConfig;
    pub use crate::control::{GainMatrix, StateFeedback};
    pub use crate::error::{TwinError, TwinResult};
    pub use crate::plant::*;
    pub use crate::tags::{MemoryTagStore, PlantTagAdapter, PlantTags, StoreError, TagStore};
    pub use crate::twin::{CancellationSource, Orchestrator, RunningTwin, ShutdownReport};
}
