//! Timer-driven ticking of a [`Simulation`].
//!
//! At most one ticker task is alive per scheduler. Every tick takes the
//! simulation lock, checks that its generation is still current and computes
//! exactly one step; the lock is never held across an await, so a step is
//! never interrupted and `stop` cannot land mid-step.

use crate::engine::{Simulation, TickOutcome};
use crate::RunError;
use sim_core::{Event, ParamId, SimError, SimulationConfig, SimulationState, StepResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Scheduler state as seen by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
}

/// How [`Scheduler::start`] began ticking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartKind {
    Started,
    /// A ticker was already running; it was cancelled and replaced.
    Restarted,
}

struct Shared {
    sim: Simulation,
    /// Bumped on every stop; a ticker holding an older value exits.
    generation: u64,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives one simulation from a tokio timer. `start` and `set_speed` must be
/// called from within a tokio runtime.
pub struct Scheduler {
    shared: Arc<Mutex<Shared>>,
    ticker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(sim: Simulation) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared { sim, generation: 0 })),
            ticker: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        match &self.ticker {
            Some(handle) if !handle.is_finished() => RunStatus::Running,
            _ => RunStatus::Idle,
        }
    }

    /// Begin ticking under `config`. Fails without touching any state when
    /// the config is invalid. A simulation that was never initialized is
    /// reset first; otherwise accumulated history is continued.
    pub fn start(&mut self, config: SimulationConfig) -> Result<StartKind, RunError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| RunError::NoRuntime)?;
        let kind = if self.status() == RunStatus::Running {
            warn!("start requested while running; restarting ticker");
            StartKind::Restarted
        } else {
            StartKind::Started
        };
        self.cancel_ticker();
        let period = Duration::from_millis(config.tick_interval_ms);
        let generation = {
            let mut guard = lock(&self.shared);
            guard.sim.set_config(config)?;
            if !guard.sim.is_initialized() {
                guard.sim.reset()?;
            }
            guard.generation
        };
        self.spawn_ticker(&runtime, generation, period);
        info!(?kind, interval_ms = period.as_millis() as u64, "scheduler started");
        Ok(kind)
    }

    /// Cancel the pending tick. History is kept. Idempotent.
    pub fn stop(&mut self) {
        if self.ticker.is_some() {
            self.cancel_ticker();
            info!("scheduler stopped");
        }
    }

    /// Stop, then discard history and rebuild the initial state from the
    /// current parameters. Idempotent.
    pub fn reset(&mut self) -> Result<(), RunError> {
        self.stop();
        lock(&self.shared).sim.reset()
    }

    /// Change the tick cadence. A running ticker is replaced without
    /// touching the accumulated state.
    pub fn set_speed(&mut self, interval_ms: u64) -> Result<(), RunError> {
        if interval_ms == 0 {
            return Err(SimError::InvalidConfig("tick_interval_ms must be > 0".into()).into());
        }
        let was_running = self.status() == RunStatus::Running;
        let runtime = if was_running {
            Some(Handle::try_current().map_err(|_| RunError::NoRuntime)?)
        } else {
            None
        };
        self.cancel_ticker();
        let generation = {
            let mut guard = lock(&self.shared);
            guard.sim.set_tick_interval(interval_ms);
            guard.generation
        };
        if let Some(runtime) = runtime {
            self.spawn_ticker(&runtime, generation, Duration::from_millis(interval_ms));
        }
        info!(interval_ms, was_running, "tick speed changed");
        Ok(())
    }

    /// Edit a parameter; the change is seen from the next tick.
    pub fn set_param(&self, id: ParamId, value: f64) -> Result<f64, RunError> {
        Ok(lock(&self.shared).sim.params_mut().set(id, value)?)
    }

    /// Run `f` with exclusive access to the simulation, between ticks.
    pub fn with_simulation<T>(&self, f: impl FnOnce(&mut Simulation) -> T) -> T {
        f(&mut lock(&self.shared).sim)
    }

    pub fn history(&self) -> Vec<StepResult> {
        lock(&self.shared).sim.history().to_vec()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.shared).sim.events().to_vec()
    }

    pub fn state(&self) -> Option<SimulationState> {
        lock(&self.shared).sim.state().cloned()
    }

    fn cancel_ticker(&mut self) {
        lock(&self.shared).generation += 1;
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }

    fn spawn_ticker(&mut self, runtime: &Handle, generation: u64, period: Duration) {
        let shared = Arc::clone(&self.shared);
        self.ticker = Some(runtime.spawn(run_ticker(shared, generation, period)));
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

/// First step lands one full period after spawning, so replacing a ticker
/// never computes a step by itself.
async fn run_ticker(shared: Arc<Mutex<Shared>>, generation: u64, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let outcome = {
            let mut guard = lock(&shared);
            if guard.generation != generation {
                return;
            }
            guard.sim.tick()
        };
        match outcome {
            Ok(TickOutcome::Advanced(_)) => {}
            Ok(TickOutcome::Finished(result)) => {
                info!(step = result.step_index, period = %result.label, "run completed");
                return;
            }
            Ok(TickOutcome::AlreadyComplete) => return,
            Err(err) => {
                error!(%err, "tick failed; ticker stopped");
                return;
            }
        }
    }
}
