//! YAML scenario files.
//!
//! ```yaml
//! preset: price_crash
//! run:
//!   cycle: quarterly
//!   total_steps: 40
//!   seed: 7
//!   start_date: 2026-01-01
//!   selected_parameter_ids: [cpo_price, attrition_rate]
//! parameters:
//!   subsidy_impact: 25
//! constants:
//!   expansion_chance: 0.2
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use sim_core::{ParameterSpace, Preset, SimulationConfig};
use sim_runtime::ModelConstants;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ScenarioFile {
    pub preset: Option<Preset>,
    pub run: SimulationConfig,
    /// Overrides keyed by parameter id, applied after the preset.
    pub parameters: BTreeMap<String, f64>,
    pub constants: Option<ModelConstants>,
}

impl ScenarioFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Build the parameter space this scenario describes, charting the run's
    /// selection.
    pub fn parameter_space(&self) -> Result<ParameterSpace> {
        let mut space = ParameterSpace::new();
        if let Some(preset) = self.preset {
            space.apply_preset(preset)?;
            info!(preset = preset.as_str(), "preset applied");
        }
        for (name, &value) in &self.parameters {
            let applied = space.set_by_name(name, value)?;
            if applied != value {
                warn!(param = %name, requested = value, applied, "value clamped to bounds");
            }
        }
        space.set_selection(self.run.selected_parameter_ids.iter().copied());
        Ok(space)
    }

    pub fn constants(&self) -> Result<ModelConstants> {
        let constants = self.constants.unwrap_or_default();
        constants.validate().context("invalid model constants")?;
        Ok(constants)
    }
}
