//! Top-level error type

use thiserror::Error;

use crate::alerts::AlertError;
use crate::solvers::SolverError;
use crate::tags::StoreError;
use crate::telemetry::TelemetryError;

#[derive(Error, Debug)]
pub enum TwinError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tag store error: {0}")]
    Store(#[from] StoreError),

    #[error("Integration failed: {0}")]
    Solver(#[from] SolverError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Alert processing error: {0}")]
    Alert(#[from] AlertError),

    #[error("Failed to spawn task {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TwinResult<T> = Result<T, TwinError>;
