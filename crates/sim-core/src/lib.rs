#![deny(warnings)]

//! Core domain models and invariants for the palm oil market simulation.
//!
//! This crate defines the serializable types shared by the pricing model and
//! the runtime: the tunable parameter space, the zone population, per-step
//! state and results, transition events and the bounded logs that hold them.

use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub mod log;
pub mod params;

pub use log::{BoundedLog, EventLog, SeriesAccumulator};
pub use params::{
    normalize_origin_shares, ParamCategory, ParamId, ParamValues, Parameter, ParameterSpace,
    Preset, SelectionChange, SelectionPolicy, MIN_SELECTED,
};

/// Lower bound of average grower sentiment.
pub const SENTIMENT_MIN: f64 = 0.05;
/// Upper bound of average grower sentiment.
pub const SENTIMENT_MAX: f64 = 1.0;

/// Errors for parameter edits and run configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Value cannot be placed inside the declared domain of a parameter.
    #[error("invalid value {value} for parameter {id}")]
    InvalidParameter { id: String, value: f64 },
    /// Name does not match any declared parameter.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    /// Fewer than [`MIN_SELECTED`] parameters selected for a run.
    #[error("at least 2 parameters must be selected, got {selected}")]
    InsufficientParameters { selected: usize },
    /// Run configuration outside its domain (zero steps, zero interval, ...).
    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),
}

/// Time cadence of one scheduler tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cycle {
    #[default]
    Monthly,
    Quarterly,
    Yearly,
}

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

impl Cycle {
    /// Calendar months covered by one tick.
    pub fn months_per_tick(self) -> u32 {
        match self {
            Cycle::Monthly => 1,
            Cycle::Quarterly => 3,
            Cycle::Yearly => 12,
        }
    }

    /// Fraction of a year represented by one tick.
    pub fn period_factor(self) -> f64 {
        f64::from(self.months_per_tick()) / 12.0
    }

    /// Display label of the period computed by step `index` (0-based), e.g.
    /// `Jan 2025`, `Q3 2025` or `2025`.
    pub fn label(self, start: NaiveDate, index: u32) -> String {
        let offset = Months::new(index.saturating_mul(self.months_per_tick()));
        let Some(date) = start.checked_add_months(offset) else {
            return format!("T+{index}");
        };
        match self {
            Cycle::Monthly => format!("{} {}", MONTH_NAMES[date.month0() as usize], date.year()),
            Cycle::Quarterly => format!("Q{} {}", date.month0() / 3 + 1, date.year()),
            Cycle::Yearly => date.year().to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cycle::Monthly => "monthly",
            Cycle::Quarterly => "quarterly",
            Cycle::Yearly => "yearly",
        }
    }
}

impl FromStr for Cycle {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" | "m" => Ok(Cycle::Monthly),
            "quarterly" | "quarter" | "q" => Ok(Cycle::Quarterly),
            "yearly" | "year" | "y" => Ok(Cycle::Yearly),
            other => Err(SimError::InvalidConfig(format!("unknown cycle: {other}"))),
        }
    }
}

/// Run configuration. Validated before a run may start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Tick cadence.
    pub cycle: Cycle,
    /// Horizon in ticks (> 0).
    pub total_steps: u32,
    /// Wall-clock delay between ticks when driven by the scheduler (> 0).
    pub tick_interval_ms: u64,
    /// Parameters charted alongside the run (at least two).
    pub selected_parameter_ids: Vec<ParamId>,
    /// Seed of the ChaCha stream driving all stochastic transitions.
    pub seed: u64,
    /// Calendar date of the first simulated period.
    pub start_date: NaiveDate,
    /// Most recent step results retained.
    pub history_capacity: usize,
    /// Most recent events retained.
    pub event_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cycle: Cycle::Monthly,
            total_steps: 60,
            tick_interval_ms: 1000,
            selected_parameter_ids: vec![ParamId::CpoPrice, ParamId::SubsidyImpact],
            seed: 42,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or(NaiveDate::MIN),
            history_capacity: 100,
            event_capacity: 20,
        }
    }
}

impl SimulationConfig {
    /// Replace the charted selection.
    pub fn with_selection(mut self, ids: impl IntoIterator<Item = ParamId>) -> Self {
        self.selected_parameter_ids = ids.into_iter().collect();
        self
    }

    /// Number of distinct selected parameters.
    pub fn selected_count(&self) -> usize {
        let mut ids = self.selected_parameter_ids.clone();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    /// Check the run preconditions.
    pub fn validate(&self) -> Result<(), SimError> {
        let selected = self.selected_count();
        if selected < MIN_SELECTED {
            return Err(SimError::InsufficientParameters { selected });
        }
        if self.total_steps == 0 {
            return Err(SimError::InvalidConfig("total_steps must be > 0".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(SimError::InvalidConfig("tick_interval_ms must be > 0".into()));
        }
        if self.history_capacity == 0 || self.event_capacity == 0 {
            return Err(SimError::InvalidConfig("log capacities must be > 0".into()));
        }
        Ok(())
    }
}

/// Health state of a cultivation zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneState {
    Healthy,
    AtRisk,
    Abandoned,
    Recovering,
}

/// Count of zones in each health state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonePopulation {
    pub healthy: u32,
    pub at_risk: u32,
    pub abandoned: u32,
    pub recovering: u32,
}

impl ZonePopulation {
    /// A population of `total` zones, all healthy.
    pub fn all_healthy(total: u32) -> Self {
        Self {
            healthy: total,
            ..Self::default()
        }
    }

    pub fn total(&self) -> u32 {
        self.healthy + self.at_risk + self.abandoned + self.recovering
    }

    /// Zones weighted by productive capacity; recovering zones count half.
    pub fn productive(&self) -> f64 {
        f64::from(self.healthy) + 0.5 * f64::from(self.recovering)
    }

    pub fn count(&self, state: ZoneState) -> u32 {
        match state {
            ZoneState::Healthy => self.healthy,
            ZoneState::AtRisk => self.at_risk,
            ZoneState::Abandoned => self.abandoned,
            ZoneState::Recovering => self.recovering,
        }
    }

    fn slot(&mut self, state: ZoneState) -> &mut u32 {
        match state {
            ZoneState::Healthy => &mut self.healthy,
            ZoneState::AtRisk => &mut self.at_risk,
            ZoneState::Abandoned => &mut self.abandoned,
            ZoneState::Recovering => &mut self.recovering,
        }
    }

    /// Move up to `n` zones from one state to another, preserving the total.
    /// Returns the number actually moved.
    pub fn transfer(&mut self, from: ZoneState, to: ZoneState, n: u32) -> u32 {
        let moved = n.min(self.count(from));
        if moved == 0 || from == to {
            return 0;
        }
        *self.slot(from) -= moved;
        *self.slot(to) += moved;
        moved
    }

    /// Add freshly developed healthy zones. The only operation that grows the total.
    pub fn develop(&mut self, n: u32) {
        self.healthy = self.healthy.saturating_add(n);
    }
}

/// Minimal state carried from one step to the next.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Completed steps.
    pub step_index: u32,
    /// Cultivated area in hectares (>= 0).
    pub total_area: f64,
    /// Average grower sentiment in [`SENTIMENT_MIN`, `SENTIMENT_MAX`].
    pub avg_sentiment: f64,
    /// CPO price in effect for the last computed step.
    pub cpo_price: Decimal,
    pub zones: ZonePopulation,
    /// Multiplier applied to the parameter CPO price on the next step; below
    /// one for exactly one step after a price shock.
    pub price_shock_factor: f64,
}

/// Supply shares by origin, in percent, summing to 100.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketShares {
    pub malaysia: f64,
    pub indonesia: f64,
    pub other: f64,
}

/// Immutable snapshot of one computed step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step number (1-based) this result closes.
    pub step_index: u32,
    /// Period label, e.g. `Mar 2025`.
    pub label: String,
    pub total_area: f64,
    pub avg_sentiment: f64,
    pub cpo_price: Decimal,
    /// Producer (FFB) price derived from CPO.
    pub ffb_price: Decimal,
    /// Breakeven lowered by the subsidy.
    pub adjusted_breakeven: Decimal,
    /// Share-weighted landed cost of imported CPO.
    pub landed_cost: Decimal,
    pub retail_price: Decimal,
    pub market_shares: MarketShares,
    pub profitable: bool,
    pub zones: ZonePopulation,
}

/// Kind of a zone or market transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RiskIncrease,
    Abandonment,
    RecoveryStart,
    RecoveryComplete,
    Expansion,
    PriceShock,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RiskIncrease => "risk_increase",
            EventKind::Abandonment => "abandonment",
            EventKind::RecoveryStart => "recovery_start",
            EventKind::RecoveryComplete => "recovery_complete",
            EventKind::Expansion => "expansion",
            EventKind::PriceShock => "price_shock",
        }
    }
}

/// A recorded transition, kept for explanation and audit display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Period label of the step that produced the event.
    pub period: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub zones_affected: u32,
    /// Area lost/added in hectares, or shock depth in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    pub description: String,
}
