//! Tunable parameter space: declarations, clamped edits, chart selection and
//! scenario presets.

use crate::SimError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::debug;

/// Floor of charted parameters enforced under [`SelectionPolicy::MinimumTwo`].
pub const MIN_SELECTED: usize = 2;

/// Identifier of a declared parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamId {
    CpoPrice,
    ExchangeRate,
    ImportDuty,
    MalaysiaLevy,
    IndonesiaLevy,
    MalaysiaShare,
    IndonesiaShare,
    FreightPerContainer,
    TonnesPerContainer,
    DistributionMargin,
    RetailMargin,
    Gst,
    FfbPriceShare,
    ProducerSupport,
    Breakeven,
    SubsidyImpact,
    ZoneDensity,
    BaseAreaPerZone,
    GrowthRate,
    AttritionRate,
    ContagionStrength,
    ShockProbability,
}

/// Grouping used by the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamCategory {
    Market,
    Trade,
    Retail,
    Producer,
    Policy,
    Land,
    Risk,
}

/// Declaration row: name, unit, category, min, max, step, default.
type Decl = (&'static str, &'static str, ParamCategory, f64, f64, f64, f64);

impl ParamId {
    pub const ALL: [ParamId; 22] = [
        ParamId::CpoPrice,
        ParamId::ExchangeRate,
        ParamId::ImportDuty,
        ParamId::MalaysiaLevy,
        ParamId::IndonesiaLevy,
        ParamId::MalaysiaShare,
        ParamId::IndonesiaShare,
        ParamId::FreightPerContainer,
        ParamId::TonnesPerContainer,
        ParamId::DistributionMargin,
        ParamId::RetailMargin,
        ParamId::Gst,
        ParamId::FfbPriceShare,
        ParamId::ProducerSupport,
        ParamId::Breakeven,
        ParamId::SubsidyImpact,
        ParamId::ZoneDensity,
        ParamId::BaseAreaPerZone,
        ParamId::GrowthRate,
        ParamId::AttritionRate,
        ParamId::ContagionStrength,
        ParamId::ShockProbability,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParamId::CpoPrice => "cpo_price",
            ParamId::ExchangeRate => "exchange_rate",
            ParamId::ImportDuty => "import_duty",
            ParamId::MalaysiaLevy => "malaysia_levy",
            ParamId::IndonesiaLevy => "indonesia_levy",
            ParamId::MalaysiaShare => "malaysia_share",
            ParamId::IndonesiaShare => "indonesia_share",
            ParamId::FreightPerContainer => "freight_per_container",
            ParamId::TonnesPerContainer => "tonnes_per_container",
            ParamId::DistributionMargin => "distribution_margin",
            ParamId::RetailMargin => "retail_margin",
            ParamId::Gst => "gst",
            ParamId::FfbPriceShare => "ffb_price_share",
            ParamId::ProducerSupport => "producer_support",
            ParamId::Breakeven => "breakeven",
            ParamId::SubsidyImpact => "subsidy_impact",
            ParamId::ZoneDensity => "zone_density",
            ParamId::BaseAreaPerZone => "base_area_per_zone",
            ParamId::GrowthRate => "growth_rate",
            ParamId::AttritionRate => "attrition_rate",
            ParamId::ContagionStrength => "contagion_strength",
            ParamId::ShockProbability => "shock_probability",
        }
    }

    fn declaration(self) -> Decl {
        use ParamCategory::*;
        match self {
            ParamId::CpoPrice => ("CPO price", "INR/t", Market, 20_000.0, 150_000.0, 500.0, 45_000.0),
            ParamId::ExchangeRate => ("Exchange rate", "INR/USD", Market, 60.0, 110.0, 0.5, 83.0),
            ParamId::ImportDuty => ("Import duty", "%", Trade, 0.0, 50.0, 0.5, 5.5),
            ParamId::MalaysiaLevy => ("Malaysia export levy", "%", Trade, 0.0, 20.0, 0.5, 8.0),
            ParamId::IndonesiaLevy => ("Indonesia export levy", "%", Trade, 0.0, 20.0, 0.5, 7.5),
            ParamId::MalaysiaShare => ("Malaysia supply share", "%", Trade, 0.0, 100.0, 1.0, 40.0),
            ParamId::IndonesiaShare => ("Indonesia supply share", "%", Trade, 0.0, 100.0, 1.0, 55.0),
            ParamId::FreightPerContainer => {
                ("Freight per container", "USD", Trade, 200.0, 5_000.0, 50.0, 1_200.0)
            }
            ParamId::TonnesPerContainer => ("Tonnes per container", "t", Trade, 5.0, 30.0, 1.0, 20.0),
            ParamId::DistributionMargin => ("Distribution margin", "%", Retail, 0.0, 30.0, 0.5, 6.0),
            ParamId::RetailMargin => ("Retail margin", "%", Retail, 0.0, 40.0, 0.5, 10.0),
            ParamId::Gst => ("GST", "%", Retail, 0.0, 28.0, 1.0, 5.0),
            ParamId::FfbPriceShare => ("FFB price share of CPO", "%", Producer, 10.0, 20.0, 0.01, 14.61),
            ParamId::ProducerSupport => ("Producer price support", "%", Policy, 0.0, 50.0, 1.0, 0.0),
            ParamId::Breakeven => ("FFB breakeven price", "INR/t", Producer, 2_000.0, 12_000.0, 50.0, 4_300.0),
            ParamId::SubsidyImpact => ("VGP subsidy impact", "%", Policy, 0.0, 60.0, 1.0, 15.0),
            ParamId::ZoneDensity => ("Zone count", "zones", Land, 8.0, 200.0, 1.0, 48.0),
            ParamId::BaseAreaPerZone => ("Area per zone", "ha", Land, 250.0, 10_000.0, 50.0, 2_000.0),
            ParamId::GrowthRate => ("Area growth rate", "%/yr", Land, 0.0, 40.0, 0.5, 8.0),
            ParamId::AttritionRate => ("Area attrition rate", "%/yr", Risk, 0.0, 60.0, 0.5, 12.0),
            ParamId::ContagionStrength => ("Contagion strength", "%", Risk, 0.0, 100.0, 1.0, 40.0),
            ParamId::ShockProbability => ("Price shock probability", "%/yr", Risk, 0.0, 50.0, 0.5, 10.0),
        }
    }

    /// The counterpart origin share kept in balance with this one, if any.
    pub fn share_counterpart(self) -> Option<ParamId> {
        match self {
            ParamId::MalaysiaShare => Some(ParamId::IndonesiaShare),
            ParamId::IndonesiaShare => Some(ParamId::MalaysiaShare),
            _ => None,
        }
    }
}

impl FromStr for ParamId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        ParamId::ALL
            .into_iter()
            .find(|id| id.as_str() == key)
            .ok_or_else(|| SimError::UnknownParameter(key.to_string()))
    }
}

/// A declared tunable input. `min <= current_value <= max` always holds after
/// an edit through [`ParameterSpace::set`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ParamId,
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub unit: String,
    pub category: ParamCategory,
    pub current_value: f64,
    pub default_value: f64,
}

impl Parameter {
    pub fn declare(id: ParamId) -> Self {
        let (name, unit, category, min, max, step, default) = id.declaration();
        Self {
            id,
            name: name.to_string(),
            min,
            max,
            step,
            unit: unit.to_string(),
            category,
            current_value: default,
            default_value: default,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && (self.min..=self.max).contains(&value)
    }
}

/// How [`ParameterSpace::toggle_selection`] treats removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Any id may be removed.
    Free,
    /// Removal refused when it would leave fewer than [`MIN_SELECTED`].
    MinimumTwo,
}

/// Outcome of a selection toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionChange {
    Added,
    Removed,
    Refused,
}

/// Named bundles of parameter values for scenario testing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Declared defaults.
    Baseline,
    /// Depressed CPO with frequent shocks and fast contagion.
    PriceCrash,
    /// Higher subsidy, producer support and protective duty.
    PolicySupport,
    /// Steep import duty and tax increase.
    DutyHike,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::Baseline,
        Preset::PriceCrash,
        Preset::PolicySupport,
        Preset::DutyHike,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Baseline => "baseline",
            Preset::PriceCrash => "price_crash",
            Preset::PolicySupport => "policy_support",
            Preset::DutyHike => "duty_hike",
        }
    }

    /// Overrides applied on top of the defaults.
    pub fn overrides(self) -> &'static [(ParamId, f64)] {
        match self {
            Preset::Baseline => &[],
            Preset::PriceCrash => &[
                (ParamId::CpoPrice, 22_000.0),
                (ParamId::ShockProbability, 25.0),
                (ParamId::ContagionStrength, 60.0),
            ],
            Preset::PolicySupport => &[
                (ParamId::SubsidyImpact, 35.0),
                (ParamId::ProducerSupport, 10.0),
                (ParamId::ImportDuty, 20.0),
            ],
            Preset::DutyHike => &[(ParamId::ImportDuty, 35.0), (ParamId::Gst, 12.0)],
        }
    }
}

impl FromStr for Preset {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str() == key)
            .ok_or_else(|| SimError::InvalidConfig(format!("unknown preset: {key}")))
    }
}

/// Adjust the counterpart origin share after `edited` changed so that the two
/// never sum above 100. The remainder is attributed to other origins.
pub fn normalize_origin_shares(edited: f64, counterpart: f64) -> f64 {
    if edited + counterpart > 100.0 {
        (100.0 - edited).max(0.0)
    } else {
        counterpart
    }
}

/// All declared parameters with their current values and the charted selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    params: BTreeMap<ParamId, Parameter>,
    selected: BTreeSet<ParamId>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSpace {
    pub fn new() -> Self {
        let params = ParamId::ALL
            .into_iter()
            .map(|id| (id, Parameter::declare(id)))
            .collect();
        let selected = [ParamId::CpoPrice, ParamId::SubsidyImpact].into_iter().collect();
        Self { params, selected }
    }

    pub fn parameter(&self, id: ParamId) -> Option<&Parameter> {
        self.params.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values()
    }

    pub fn by_category(&self, category: ParamCategory) -> impl Iterator<Item = &Parameter> {
        self.params.values().filter(move |p| p.category == category)
    }

    /// Current value of `id`.
    pub fn get(&self, id: ParamId) -> f64 {
        self.params
            .get(&id)
            .map(|p| p.current_value)
            .unwrap_or_else(|| id.declaration().6)
    }

    /// Set `id`, clamping into its declared bounds. Returns the stored value.
    ///
    /// Origin shares are rebalanced against their counterpart afterwards.
    /// Non-finite input is the only rejected edit.
    pub fn set(&mut self, id: ParamId, value: f64) -> Result<f64, SimError> {
        if !value.is_finite() {
            return Err(SimError::InvalidParameter {
                id: id.as_str().to_string(),
                value,
            });
        }
        let param = self
            .params
            .entry(id)
            .or_insert_with(|| Parameter::declare(id));
        let clamped = value.clamp(param.min, param.max);
        if clamped != value {
            debug!(param = id.as_str(), value, clamped, "parameter edit clamped");
        }
        param.current_value = clamped;
        if id.share_counterpart().is_some() {
            self.rebalance_origin_shares(id);
        }
        Ok(clamped)
    }

    /// Set a parameter addressed by its string id.
    pub fn set_by_name(&mut self, name: &str, value: f64) -> Result<f64, SimError> {
        let id: ParamId = name.parse()?;
        self.set(id, value)
    }

    /// Keep the pair of origin shares within 100% after `edited` changed.
    pub fn rebalance_origin_shares(&mut self, edited: ParamId) {
        let Some(other) = edited.share_counterpart() else {
            return;
        };
        let adjusted = normalize_origin_shares(self.get(edited), self.get(other));
        if let Some(p) = self.params.get_mut(&other) {
            if p.current_value != adjusted {
                debug!(param = other.as_str(), adjusted, "origin share rebalanced");
                p.current_value = adjusted;
            }
        }
    }

    /// Add or remove `id` from the charted selection.
    pub fn toggle_selection(&mut self, id: ParamId, policy: SelectionPolicy) -> SelectionChange {
        if !self.selected.contains(&id) {
            self.selected.insert(id);
            return SelectionChange::Added;
        }
        if policy == SelectionPolicy::MinimumTwo && self.selected.len() <= MIN_SELECTED {
            return SelectionChange::Refused;
        }
        self.selected.remove(&id);
        SelectionChange::Removed
    }

    /// Replace the charted selection. No minimum is enforced here; a run
    /// config carrying the same ids is what gets validated.
    pub fn set_selection(&mut self, ids: impl IntoIterator<Item = ParamId>) {
        self.selected = ids.into_iter().collect();
    }

    pub fn selected(&self) -> Vec<ParamId> {
        self.selected.iter().copied().collect()
    }

    pub fn is_selected(&self, id: ParamId) -> bool {
        self.selected.contains(&id)
    }

    /// Fail if any declared parameter is missing or outside its own bounds.
    pub fn validate(&self) -> Result<(), SimError> {
        for id in ParamId::ALL {
            let Some(p) = self.params.get(&id) else {
                return Err(SimError::UnknownParameter(id.as_str().to_string()));
            };
            if !p.contains(p.current_value) {
                return Err(SimError::InvalidParameter {
                    id: id.as_str().to_string(),
                    value: p.current_value,
                });
            }
        }
        Ok(())
    }

    /// Restore every parameter to its declared default. Selection is kept.
    pub fn reset_to_defaults(&mut self) {
        for p in self.params.values_mut() {
            p.current_value = p.default_value;
        }
    }

    /// Reset to defaults, then apply the preset's overrides.
    pub fn apply_preset(&mut self, preset: Preset) -> Result<(), SimError> {
        self.reset_to_defaults();
        for &(id, value) in preset.overrides() {
            self.set(id, value)?;
        }
        debug!(preset = preset.as_str(), "preset applied");
        Ok(())
    }

    /// Copy every current value into a flat snapshot for one step.
    pub fn snapshot(&self) -> ParamValues {
        ParamValues {
            cpo_price: self.get(ParamId::CpoPrice),
            exchange_rate: self.get(ParamId::ExchangeRate),
            import_duty_pct: self.get(ParamId::ImportDuty),
            malaysia_levy_pct: self.get(ParamId::MalaysiaLevy),
            indonesia_levy_pct: self.get(ParamId::IndonesiaLevy),
            malaysia_share_pct: self.get(ParamId::MalaysiaShare),
            indonesia_share_pct: self.get(ParamId::IndonesiaShare),
            freight_per_container: self.get(ParamId::FreightPerContainer),
            tonnes_per_container: self.get(ParamId::TonnesPerContainer),
            distribution_margin_pct: self.get(ParamId::DistributionMargin),
            retail_margin_pct: self.get(ParamId::RetailMargin),
            gst_pct: self.get(ParamId::Gst),
            ffb_price_share_pct: self.get(ParamId::FfbPriceShare),
            producer_support_pct: self.get(ParamId::ProducerSupport),
            breakeven: self.get(ParamId::Breakeven),
            subsidy_pct: self.get(ParamId::SubsidyImpact),
            zone_density: self.get(ParamId::ZoneDensity),
            base_area_per_zone: self.get(ParamId::BaseAreaPerZone),
            growth_rate_pct: self.get(ParamId::GrowthRate),
            attrition_rate_pct: self.get(ParamId::AttritionRate),
            contagion_strength_pct: self.get(ParamId::ContagionStrength),
            shock_probability_pct: self.get(ParamId::ShockProbability),
        }
    }
}

/// Parameter values frozen at the start of a step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamValues {
    pub cpo_price: f64,
    pub exchange_rate: f64,
    pub import_duty_pct: f64,
    pub malaysia_levy_pct: f64,
    pub indonesia_levy_pct: f64,
    pub malaysia_share_pct: f64,
    pub indonesia_share_pct: f64,
    pub freight_per_container: f64,
    pub tonnes_per_container: f64,
    pub distribution_margin_pct: f64,
    pub retail_margin_pct: f64,
    pub gst_pct: f64,
    pub ffb_price_share_pct: f64,
    pub producer_support_pct: f64,
    pub breakeven: f64,
    pub subsidy_pct: f64,
    pub zone_density: f64,
    pub base_area_per_zone: f64,
    pub growth_rate_pct: f64,
    pub attrition_rate_pct: f64,
    pub contagion_strength_pct: f64,
    pub shock_probability_pct: f64,
}

impl Default for ParamValues {
    fn default() -> Self {
        ParameterSpace::new().snapshot()
    }
}

impl ParamValues {
    /// Configured zone count.
    pub fn zone_count(&self) -> u32 {
        self.zone_density.round().max(0.0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults_are_within_bounds() {
        let space = ParameterSpace::new();
        assert!(space.validate().is_ok());
        assert_eq!(space.iter().count(), ParamId::ALL.len());
        assert_eq!(space.get(ParamId::FfbPriceShare), 14.61);
    }

    #[test]
    fn set_clamps_out_of_range() {
        let mut space = ParameterSpace::new();
        assert_eq!(space.set(ParamId::SubsidyImpact, 500.0).unwrap(), 60.0);
        assert_eq!(space.set(ParamId::SubsidyImpact, -5.0).unwrap(), 0.0);
        assert_eq!(space.get(ParamId::SubsidyImpact), 0.0);
    }

    #[test]
    fn set_rejects_nan() {
        let mut space = ParameterSpace::new();
        let err = space.set(ParamId::CpoPrice, f64::NAN).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameter { .. }));
        assert_eq!(space.get(ParamId::CpoPrice), 45_000.0);
    }

    #[test]
    fn set_by_name_resolves_ids() {
        let mut space = ParameterSpace::new();
        assert_eq!(space.set_by_name("zone_density", 64.0).unwrap(), 64.0);
        assert_eq!(
            space.set_by_name("zoneDensity", 1.0),
            Err(SimError::UnknownParameter("zoneDensity".into()))
        );
    }

    #[test]
    fn origin_shares_rebalance() {
        let mut space = ParameterSpace::new();
        space.set(ParamId::MalaysiaShare, 70.0).unwrap();
        assert_eq!(space.get(ParamId::IndonesiaShare), 30.0);
        space.set(ParamId::IndonesiaShare, 20.0).unwrap();
        // Lowering leaves room for other origins; the counterpart is untouched.
        assert_eq!(space.get(ParamId::MalaysiaShare), 70.0);
    }

    #[test]
    fn selection_floor_is_policy() {
        let mut space = ParameterSpace::new();
        assert_eq!(space.selected().len(), 2);
        assert_eq!(
            space.toggle_selection(ParamId::CpoPrice, SelectionPolicy::MinimumTwo),
            SelectionChange::Refused
        );
        assert_eq!(
            space.toggle_selection(ParamId::CpoPrice, SelectionPolicy::Free),
            SelectionChange::Removed
        );
        assert_eq!(space.selected(), vec![ParamId::SubsidyImpact]);
        assert_eq!(
            space.toggle_selection(ParamId::Gst, SelectionPolicy::MinimumTwo),
            SelectionChange::Added
        );
    }

    #[test]
    fn validate_catches_corrupted_values() {
        let mut space = ParameterSpace::new();
        if let Some(p) = space.params.get_mut(&ParamId::Gst) {
            p.current_value = 99.0;
        }
        assert!(matches!(
            space.validate(),
            Err(SimError::InvalidParameter { .. })
        ));
        space.reset_to_defaults();
        assert!(space.validate().is_ok());
    }

    #[test]
    fn presets_apply_over_defaults() {
        let mut space = ParameterSpace::new();
        space.set(ParamId::Gst, 20.0).unwrap();
        space.apply_preset(Preset::PolicySupport).unwrap();
        assert_eq!(space.get(ParamId::Gst), 5.0);
        assert_eq!(space.get(ParamId::SubsidyImpact), 35.0);
        assert_eq!("duty_hike".parse::<Preset>().unwrap(), Preset::DutyHike);
    }

    #[test]
    fn ids_roundtrip_through_strings() {
        for id in ParamId::ALL {
            assert_eq!(id.as_str().parse::<ParamId>().unwrap(), id);
        }
    }

    proptest! {
        #[test]
        fn edits_stay_in_bounds(idx in 0usize..22, value in -1.0e7f64..1.0e7) {
            let mut space = ParameterSpace::new();
            let id = ParamId::ALL[idx];
            let stored = space.set(id, value).unwrap();
            let p = space.parameter(id).unwrap();
            prop_assert!(p.min <= stored && stored <= p.max);
            prop_assert!(space.validate().is_ok());
        }

        #[test]
        fn share_pair_never_exceeds_hundred(a in 0.0f64..150.0, b in 0.0f64..150.0) {
            let mut space = ParameterSpace::new();
            space.set(ParamId::MalaysiaShare, a).unwrap();
            space.set(ParamId::IndonesiaShare, b).unwrap();
            let sum = space.get(ParamId::MalaysiaShare) + space.get(ParamId::IndonesiaShare);
            prop_assert!(sum <= 100.0 + 1e-9);
        }
    }
}
