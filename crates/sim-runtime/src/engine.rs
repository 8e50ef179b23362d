//! Owned simulation instance: parameters, state, RNG stream and bounded logs.

use crate::zones::{initial_state, step, ModelConstants};
use crate::RunError;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::{
    Event, EventKind, EventLog, ParamId, ParameterSpace, SelectionChange, SelectionPolicy,
    SeriesAccumulator, SimulationConfig, SimulationState, StepResult, ZonePopulation,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Result of one call to [`Simulation::tick`].
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// A step was computed; the horizon is not reached yet.
    Advanced(StepResult),
    /// A step was computed and it was the last one.
    Finished(StepResult),
    /// The horizon was already reached; nothing was computed.
    AlreadyComplete,
}

/// KPI digest of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub steps_run: u32,
    pub total_steps: u32,
    pub last_period: Option<String>,
    pub initial_area: f64,
    pub final_area: f64,
    pub area_change_pct: f64,
    pub final_sentiment: f64,
    pub profitable_steps: u32,
    pub zones: ZonePopulation,
    /// Events emitted over the whole run, including those evicted from the log.
    pub events_by_kind: BTreeMap<EventKind, u32>,
}

/// A single simulation. Owns everything it mutates; nothing is shared with
/// other instances.
#[derive(Clone, Debug)]
pub struct Simulation {
    params: ParameterSpace,
    config: SimulationConfig,
    constants: ModelConstants,
    state: Option<SimulationState>,
    initial_area: f64,
    history: SeriesAccumulator,
    events: EventLog,
    event_counts: BTreeMap<EventKind, u32>,
    profitable_steps: u32,
    rng: ChaCha8Rng,
}

impl Simulation {
    /// An uninitialized simulation; the first [`reset`](Self::reset) or tick
    /// builds the initial state.
    pub fn new(mut params: ParameterSpace, config: SimulationConfig) -> Self {
        params.set_selection(config.selected_parameter_ids.iter().copied());
        Self {
            history: SeriesAccumulator::new(config.history_capacity),
            events: EventLog::new(config.event_capacity),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            params,
            config,
            constants: ModelConstants::default(),
            state: None,
            initial_area: 0.0,
            event_counts: BTreeMap::new(),
            profitable_steps: 0,
        }
    }

    pub fn with_constants(mut self, constants: ModelConstants) -> Self {
        self.constants = constants;
        self
    }

    pub fn params(&self) -> &ParameterSpace {
        &self.params
    }

    /// Live parameter access; edits take effect from the next tick.
    pub fn params_mut(&mut self) -> &mut ParameterSpace {
        &mut self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Replace the run configuration. Log capacities and the RNG seed apply
    /// from the next reset. The parameter space charts the config's selection.
    pub fn set_config(&mut self, config: SimulationConfig) -> Result<(), RunError> {
        config.validate()?;
        self.params.set_selection(config.selected_parameter_ids.iter().copied());
        self.config = config;
        Ok(())
    }

    /// Toggle a charted parameter in both the space and the run config.
    pub fn toggle_selection(&mut self, id: ParamId, policy: SelectionPolicy) -> SelectionChange {
        let change = self.params.toggle_selection(id, policy);
        self.config.selected_parameter_ids = self.params.selected();
        change
    }

    pub(crate) fn set_tick_interval(&mut self, interval_ms: u64) {
        self.config.tick_interval_ms = interval_ms;
    }

    pub fn constants(&self) -> &ModelConstants {
        &self.constants
    }

    pub fn state(&self) -> Option<&SimulationState> {
        self.state.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn step_index(&self) -> u32 {
        self.state.as_ref().map_or(0, |s| s.step_index)
    }

    pub fn is_complete(&self) -> bool {
        self.step_index() >= self.config.total_steps
    }

    /// Retained step results, oldest first.
    pub fn history(&self) -> &SeriesAccumulator {
        &self.history
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Discard history and rebuild the initial state from the current
    /// parameter values. Reseeds the RNG so a replay gives the same run.
    pub fn reset(&mut self) -> Result<(), RunError> {
        self.history = SeriesAccumulator::new(self.config.history_capacity);
        self.events = EventLog::new(self.config.event_capacity);
        self.event_counts.clear();
        self.profitable_steps = 0;
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.state = None;
        let state = initial_state(&self.params, &self.constants)?;
        self.initial_area = state.total_area;
        info!(
            zones = state.zones.total(),
            area = state.total_area,
            seed = self.config.seed,
            "simulation reset"
        );
        self.state = Some(state);
        Ok(())
    }

    /// Compute one step from a parameter snapshot taken now, commit the new
    /// state and append its result and events.
    pub fn tick(&mut self) -> Result<TickOutcome, RunError> {
        if self.state.is_none() {
            self.reset()?;
        }
        let Some(state) = self.state.as_ref() else {
            return Ok(TickOutcome::AlreadyComplete);
        };
        if state.step_index >= self.config.total_steps {
            return Ok(TickOutcome::AlreadyComplete);
        }
        let snapshot = self.params.snapshot();
        let outcome = step(state, &snapshot, &self.config, &self.constants, &mut self.rng)?;
        for event in &outcome.events {
            debug!(kind = event.kind.as_str(), zones = event.zones_affected, period = %event.period, "event");
            *self.event_counts.entry(event.kind).or_insert(0) += 1;
        }
        if outcome.result.profitable {
            self.profitable_steps += 1;
        }
        self.events.extend(outcome.events);
        self.history.push(outcome.result.clone());
        let finished = outcome.state.step_index >= self.config.total_steps;
        self.state = Some(outcome.state);
        if finished {
            info!(steps = self.config.total_steps, "simulation horizon reached");
            Ok(TickOutcome::Finished(outcome.result))
        } else {
            Ok(TickOutcome::Advanced(outcome.result))
        }
    }

    /// Tick until the horizon. Returns the number of steps computed.
    pub fn run_to_completion(&mut self) -> Result<u32, RunError> {
        let mut computed = 0;
        loop {
            match self.tick()? {
                TickOutcome::Advanced(_) => computed += 1,
                TickOutcome::Finished(_) => return Ok(computed + 1),
                TickOutcome::AlreadyComplete => return Ok(computed),
            }
        }
    }

    pub fn summary(&self) -> RunSummary {
        let (final_area, final_sentiment, zones, steps_run) = match &self.state {
            Some(s) => (s.total_area, s.avg_sentiment, s.zones, s.step_index),
            None => (0.0, 0.0, ZonePopulation::default(), 0),
        };
        let area_change_pct = if self.initial_area > 0.0 {
            (final_area / self.initial_area - 1.0) * 100.0
        } else {
            0.0
        };
        RunSummary {
            steps_run,
            total_steps: self.config.total_steps,
            last_period: self.history.latest().map(|r| r.label.clone()),
            initial_area: self.initial_area,
            final_area,
            area_change_pct,
            final_sentiment,
            profitable_steps: self.profitable_steps,
            zones,
            events_by_kind: self.event_counts.clone(),
        }
    }

    /// Retained events of one kind.
    pub fn events_of(&self, kind: EventKind) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.kind == kind)
    }
}
