//! Numerical integration solvers
//!
//! Provides the Dormand-Prince 5(4) embedded pair with its staged-step
//! interface and a fixed-horizon adaptive driver on top of it.

mod adaptive;
mod base;
mod rkdp54;

pub use adaptive::{integrate, IntegrationStats, IntegratorSettings};
pub use base::*;
pub use rkdp54::RKDP54;
