#![deny(warnings)]

//! Simulation runtime: the zone state machine, the owned simulation engine
//! and the timer-driven scheduler.

use sim_core::SimError;
use sim_econ::EconError;
use thiserror::Error;

pub mod engine;
pub mod scheduler;
pub mod zones;

pub use engine::{RunSummary, Simulation, TickOutcome};
pub use scheduler::{RunStatus, Scheduler, StartKind};
pub use zones::{initialize, step, ModelConstants, StepOutcome};

/// Errors surfaced by the runtime.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunError {
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error(transparent)]
    Econ(#[from] EconError),
    /// Scheduler controls were used outside a tokio runtime.
    #[error("scheduler requires a running tokio runtime")]
    NoRuntime,
}
