#![deny(warnings)]

//! Price dynamics for the palm oil chain.
//!
//! This module provides validated, pure conversions from a base CPO price to:
//! - Landed cost of imports (freight, export levy, import duty, FX)
//! - Share-weighted landed cost across origins
//! - Retail price after margin-on-margin and tax
//! - Producer (FFB) price and the subsidy-adjusted breakeven

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{MarketShares, ParamValues};
use thiserror::Error;
use tracing::trace;

/// Errors produced by price helpers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EconError {
    /// Input would divide by zero or leave the model's domain.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Numeric conversion between f64 and Decimal failed.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Convert a floating-point parameter into a Decimal.
pub fn to_decimal(value: f64) -> Result<Decimal, EconError> {
    if !value.is_finite() {
        return Err(EconError::NonFinite);
    }
    Decimal::from_f64(value).ok_or(EconError::NonFinite)
}

/// Convert a Decimal back to f64 for threshold arithmetic.
pub fn to_f64(value: Decimal) -> Result<f64, EconError> {
    value.to_f64().ok_or(EconError::NonFinite)
}

fn pct_factor(pct: Decimal) -> Decimal {
    Decimal::ONE + pct / Decimal::ONE_HUNDRED
}

/// Freight terms for one shipping container.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FreightTerms {
    /// Freight cost per container in the reference currency (USD).
    pub cost_per_container: Decimal,
    /// Tonnes carried per container (> 0).
    pub units_per_container: Decimal,
    /// Multiplier on container cost (insurance, handling).
    pub container_factor: Decimal,
}

impl FreightTerms {
    /// Freight per tonne in the reference currency.
    pub fn per_unit(&self) -> Result<Decimal, EconError> {
        if self.units_per_container <= Decimal::ZERO {
            return Err(EconError::InvalidInput("units per container must be > 0"));
        }
        Ok(self.cost_per_container * self.container_factor / self.units_per_container)
    }
}

/// One supplying origin for the weighted landed-cost blend.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OriginQuote {
    /// Export levy charged by the origin, percent.
    pub levy_pct: Decimal,
    /// Share of supply, percent. Shares need not sum to 100.
    pub share_pct: Decimal,
}

/// Landed cost in local currency of one tonne of CPO from a single origin.
///
/// base (local) -> reference currency -> + freight -> x (1 + levy) = CIF
/// -> x (1 + duty) -> back to local currency.
///
/// Example:
/// let fx = Decimal::new(80, 0);
/// let cost = landed_cost(Decimal::new(80_000, 0), Decimal::ZERO, Decimal::ZERO, &free, fx)?;
/// assert_eq!(cost, Decimal::new(80_000, 0));
pub fn landed_cost(
    base_price: Decimal,
    levy_pct: Decimal,
    duty_pct: Decimal,
    freight: &FreightTerms,
    exchange_rate: Decimal,
) -> Result<Decimal, EconError> {
    if exchange_rate <= Decimal::ZERO {
        return Err(EconError::InvalidInput("exchange rate must be > 0"));
    }
    if base_price < Decimal::ZERO {
        return Err(EconError::InvalidInput("base price must be >= 0"));
    }
    let reference = base_price / exchange_rate;
    let cif = (reference + freight.per_unit()?) * pct_factor(levy_pct);
    let duty_paid = cif * pct_factor(duty_pct);
    Ok(duty_paid * exchange_rate)
}

/// Market-share-weighted landed cost across origins, normalized by the sum
/// of the shares used.
pub fn blended_landed_cost(
    base_price: Decimal,
    origins: &[OriginQuote],
    duty_pct: Decimal,
    freight: &FreightTerms,
    exchange_rate: Decimal,
) -> Result<Decimal, EconError> {
    let mut weighted = Decimal::ZERO;
    let mut total_share = Decimal::ZERO;
    for origin in origins {
        if origin.share_pct < Decimal::ZERO {
            return Err(EconError::InvalidInput("origin share must be >= 0"));
        }
        let cost = landed_cost(base_price, origin.levy_pct, duty_pct, freight, exchange_rate)?;
        weighted += cost * origin.share_pct;
        total_share += origin.share_pct;
    }
    if total_share <= Decimal::ZERO {
        return Err(EconError::InvalidInput("origin shares sum to zero"));
    }
    Ok(weighted / total_share)
}

/// Retail price: distribution margin, then retail margin, then tax, each
/// applied on the previous result.
///
/// Example:
/// let p = retail_price(Decimal::new(100, 0), Decimal::new(10, 0), Decimal::new(10, 0), Decimal::ZERO)?;
/// assert_eq!(p, Decimal::new(121, 0));
pub fn retail_price(
    landed: Decimal,
    distribution_margin_pct: Decimal,
    retail_margin_pct: Decimal,
    tax_pct: Decimal,
) -> Result<Decimal, EconError> {
    if landed < Decimal::ZERO {
        return Err(EconError::InvalidInput("landed cost must be >= 0"));
    }
    let distributed = landed * pct_factor(distribution_margin_pct);
    let shelf = distributed * pct_factor(retail_margin_pct);
    Ok(shelf * pct_factor(tax_pct))
}

/// Producer (FFB) price as a fixed share of the CPO price, inflated by a
/// policy support percentage.
pub fn producer_price(
    base_price: Decimal,
    producer_share_pct: Decimal,
    support_pct: Decimal,
) -> Result<Decimal, EconError> {
    if base_price < Decimal::ZERO || producer_share_pct < Decimal::ZERO {
        return Err(EconError::InvalidInput("price and share must be >= 0"));
    }
    Ok(base_price * producer_share_pct / Decimal::ONE_HUNDRED * pct_factor(support_pct))
}

/// Breakeven lowered by a subsidy percentage, floored at zero.
pub fn adjusted_breakeven(breakeven: Decimal, subsidy_pct: Decimal) -> Decimal {
    let factor = Decimal::ONE - subsidy_pct / Decimal::ONE_HUNDRED;
    (breakeven * factor).max(Decimal::ZERO)
}

/// Apply a multiplicative price drop; `drop_frac` in [0, 1].
pub fn apply_price_shock(price: Decimal, drop_frac: f64) -> Result<Decimal, EconError> {
    if !(0.0..=1.0).contains(&drop_frac) {
        return Err(EconError::InvalidInput("shock drop must be within [0,1]"));
    }
    Ok(price * to_decimal(1.0 - drop_frac)?)
}

/// Normalize two origin shares into a full split. A pair summing above 100
/// is scaled down; any shortfall goes to other origins.
pub fn market_shares(malaysia_pct: f64, indonesia_pct: f64) -> MarketShares {
    let my = malaysia_pct.max(0.0);
    let id = indonesia_pct.max(0.0);
    let sum = my + id;
    if sum > 100.0 {
        MarketShares {
            malaysia: my / sum * 100.0,
            indonesia: id / sum * 100.0,
            other: 0.0,
        }
    } else {
        MarketShares {
            malaysia: my,
            indonesia: id,
            other: 100.0 - sum,
        }
    }
}

/// All prices derived for one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub cpo_price: Decimal,
    pub ffb_price: Decimal,
    pub adjusted_breakeven: Decimal,
    pub landed_cost: Decimal,
    pub retail_price: Decimal,
    pub market_shares: MarketShares,
    /// Producer price at or above the adjusted breakeven.
    pub profitable: bool,
}

impl PriceQuote {
    /// Ratio of producer price to adjusted breakeven (infinite when the
    /// breakeven is fully subsidised away).
    pub fn margin_ratio(&self) -> f64 {
        match (to_f64(self.ffb_price), to_f64(self.adjusted_breakeven)) {
            (Ok(ffb), Ok(be)) if be > 0.0 => ffb / be,
            _ => f64::INFINITY,
        }
    }
}

/// Price model constants that are not user-facing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceModel {
    /// Multiplier on container freight cost.
    pub container_factor: Decimal,
    /// Decimal places kept on reported prices.
    pub money_dp: u32,
}

impl Default for PriceModel {
    fn default() -> Self {
        Self {
            container_factor: Decimal::ONE,
            money_dp: 2,
        }
    }
}

impl PriceModel {
    /// Compute every price of one step from a CPO price and a parameter snapshot.
    pub fn quote(&self, cpo_price: Decimal, p: &ParamValues) -> Result<PriceQuote, EconError> {
        let fx = to_decimal(p.exchange_rate)?;
        let freight = FreightTerms {
            cost_per_container: to_decimal(p.freight_per_container)?,
            units_per_container: to_decimal(p.tonnes_per_container)?,
            container_factor: self.container_factor,
        };
        let shares = market_shares(p.malaysia_share_pct, p.indonesia_share_pct);
        // Other origins carry no export levy.
        let origins = [
            OriginQuote {
                levy_pct: to_decimal(p.malaysia_levy_pct)?,
                share_pct: to_decimal(shares.malaysia)?,
            },
            OriginQuote {
                levy_pct: to_decimal(p.indonesia_levy_pct)?,
                share_pct: to_decimal(shares.indonesia)?,
            },
            OriginQuote {
                levy_pct: Decimal::ZERO,
                share_pct: to_decimal(shares.other)?,
            },
        ];
        let landed = blended_landed_cost(
            cpo_price,
            &origins,
            to_decimal(p.import_duty_pct)?,
            &freight,
            fx,
        )?;
        let retail = retail_price(
            landed,
            to_decimal(p.distribution_margin_pct)?,
            to_decimal(p.retail_margin_pct)?,
            to_decimal(p.gst_pct)?,
        )?;
        let ffb = producer_price(
            cpo_price,
            to_decimal(p.ffb_price_share_pct)?,
            to_decimal(p.producer_support_pct)?,
        )?;
        let threshold = adjusted_breakeven(to_decimal(p.breakeven)?, to_decimal(p.subsidy_pct)?);
        let profitable = ffb >= threshold;
        trace!(%cpo_price, %ffb, %threshold, profitable, "price quote");
        Ok(PriceQuote {
            cpo_price,
            ffb_price: ffb.round_dp(self.money_dp),
            adjusted_breakeven: threshold.round_dp(self.money_dp),
            landed_cost: landed.round_dp(self.money_dp),
            retail_price: retail.round_dp(self.money_dp),
            market_shares: shares,
            profitable,
        })
    }
}
