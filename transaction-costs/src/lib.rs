//! Transaction cost engine
//!
//! Per-execution cost breakdown combining explicit per-contract fees,
//! tick-based spread cost with volatility regime widening, and
//! square-root market impact bucketed by ADV.
//!
//! Usage: create one engine per run, feed `update_market_data` daily so
//! ADV and volatility tracking stay current, and call `calculate` for each
//! execution.

pub mod asset_config;
pub mod impact;
pub mod spread;

pub use asset_config::{AssetCostConfig, AssetCostRegistry};
pub use impact::{impact_k_bps, ImpactConfig, ImpactModel};
pub use spread::{SpreadModel, SpreadVolConfig};

use serde::{Deserialize, Serialize};

/// Detailed breakdown of one execution's costs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Explicit fees in dollars: `|qty| * fee_per_contract`
    pub commission: f64,
    /// Half-spread cost per contract, price units
    pub spread_price: f64,
    /// Market impact per contract, price units
    pub impact_price: f64,
    /// Spread + impact per contract, price units
    pub implicit_price: f64,
    /// Implicit cost in dollars: `implicit_price * |qty| * point_value`
    pub slippage_dollars: f64,
    /// Commission + slippage, dollars
    pub total_dollars: f64,
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEngineConfig {
    /// Explicit fee per contract per side: brokerage + exchange +
    /// clearing + regulatory
    pub explicit_fee_per_contract: f64,
    pub spread: SpreadVolConfig,
    pub impact: ImpactConfig,
}

impl Default for CostEngineConfig {
    fn default() -> Self {
        Self {
            explicit_fee_per_contract: 1.75,
            spread: SpreadVolConfig::default(),
            impact: ImpactConfig::default(),
        }
    }
}

/// Central orchestrator for transaction cost calculation
#[derive(Debug, Clone)]
pub struct TransactionCostEngine {
    config: CostEngineConfig,
    assets: AssetCostRegistry,
    spread_model: SpreadModel,
    impact_model: ImpactModel,
}

impl Default for TransactionCostEngine {
    fn default() -> Self {
        Self::new(CostEngineConfig::default())
    }
}

impl TransactionCostEngine {
    /// ADV assumed when a symbol has no tracked volume yet
    const DEFAULT_ADV: f64 = 100_000.0;

    #[must_use]
    pub fn new(config: CostEngineConfig) -> Self {
        Self {
            config,
            assets: AssetCostRegistry::new(),
            spread_model: SpreadModel::new(config.spread),
            impact_model: ImpactModel::new(config.impact),
        }
    }

    /// Cost breakdown using internally tracked ADV and volatility
    #[must_use]
    pub fn calculate(&self, symbol: &str, quantity: f64, reference_price: f64) -> CostBreakdown {
        let mut adv = self.impact_model.adv(symbol);
        if adv <= 0.0 {
            adv = Self::DEFAULT_ADV;
        }
        let vol_mult = self.spread_model.volatility_multiplier(symbol);
        self.calculate_with(symbol, quantity, reference_price, adv, vol_mult)
    }

    /// Cost breakdown with externally supplied ADV and volatility
    #[must_use]
    pub fn calculate_with(
        &self,
        symbol: &str,
        quantity: f64,
        reference_price: f64,
        adv: f64,
        vol_multiplier: f64,
    ) -> CostBreakdown {
        let abs_qty = quantity.abs();
        let asset = self.assets.get(symbol);

        let commission = abs_qty * self.config.explicit_fee_per_contract;
        let spread_price = self.spread_model.spread_price_impact(&asset, vol_multiplier);
        let impact_price =
            self.impact_model.market_impact(abs_qty, reference_price, adv, &asset);

        let implicit_price = spread_price + impact_price;
        let slippage_dollars = implicit_price * abs_qty * asset.point_value;

        CostBreakdown {
            commission,
            spread_price,
            impact_price,
            implicit_price,
            slippage_dollars,
            total_dollars: commission + slippage_dollars,
        }
    }

    /// Daily market data update: rolling ADV and log-return volatility
    pub fn update_market_data(
        &mut self,
        symbol: &str,
        volume: f64,
        close_price: f64,
        prev_close_price: f64,
    ) {
        self.impact_model.update_volume(symbol, volume);
        if close_price > 0.0 && prev_close_price > 0.0 {
            self.spread_model
                .update_log_return(symbol, (close_price / prev_close_price).ln());
        }
    }

    /// Current rolling ADV for a symbol
    #[must_use]
    pub fn adv(&self, symbol: &str) -> f64 {
        self.impact_model.adv(symbol)
    }

    /// Current volatility multiplier for a symbol
    #[must_use]
    pub fn volatility_multiplier(&self, symbol: &str) -> f64 {
        self.spread_model.volatility_multiplier(symbol)
    }

    /// Asset configuration used for a symbol
    #[must_use]
    pub fn asset_config(&self, symbol: &str) -> AssetCostConfig {
        self.assets.get(symbol)
    }

    /// Register a custom asset configuration
    pub fn register_asset_config(&mut self, config: AssetCostConfig) {
        self.assets.register(config);
    }

    /// Explicit fee per contract
    #[must_use]
    pub fn explicit_fee_per_contract(&self) -> f64 {
        self.config.explicit_fee_per_contract
    }

    /// Drop all tracked market data (for a fresh run)
    pub fn clear(&mut self) {
        self.spread_model.clear();
        self.impact_model.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn es_reference_scenario() {
        // ES: k = 10 bucket, tick 0.25, point value 50; 100 contracts at
        // 4000 reference, ADV 2M, neutral volatility.
        let engine = TransactionCostEngine::default();
        let costs = engine.calculate_with("ES", 100.0, 4000.0, 2_000_000.0, 1.0);

        assert_relative_eq!(costs.spread_price, 0.125);
        assert_relative_eq!(costs.impact_price, 0.0283, epsilon = 2e-4);
        assert_relative_eq!(costs.implicit_price, 0.1533, epsilon = 2e-4);
        assert_relative_eq!(costs.slippage_dollars, 766.5, epsilon = 1.0);
        assert_relative_eq!(costs.commission, 175.0);
        assert_relative_eq!(costs.total_dollars, 941.5, epsilon = 1.0);
    }

    #[test]
    fn untracked_symbol_uses_default_adv_and_neutral_vol() {
        let engine = TransactionCostEngine::default();
        let implicit = engine.calculate("ES", 10.0, 4000.0);
        let explicit = engine.calculate_with("ES", 10.0, 4000.0, 100_000.0, 1.0);
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn tracked_market_data_feeds_the_models() {
        let mut engine = TransactionCostEngine::default();
        let mut price = 4000.0;
        for day in 0..20 {
            let prev = price;
            price *= if day % 2 == 0 { 1.001 } else { 0.999 };
            engine.update_market_data("ES", 1_500_000.0, price, prev);
        }
        assert_relative_eq!(engine.adv("ES"), 1_500_000.0);
        assert!(engine.volatility_multiplier("ES") >= 0.8);
        assert!(engine.volatility_multiplier("ES") <= 1.5);
    }

    #[test]
    fn sign_of_quantity_is_irrelevant() {
        let engine = TransactionCostEngine::default();
        let buy = engine.calculate_with("CL", 25.0, 70.0, 500_000.0, 1.0);
        let sell = engine.calculate_with("CL", -25.0, 70.0, 500_000.0, 1.0);
        assert_eq!(buy, sell);
    }

    proptest! {
        // Total cost is monotonic non-decreasing in |qty| for fixed
        // market state.
        #[test]
        fn cost_monotonic_in_quantity(q1 in 1.0f64..5_000.0, q2 in 1.0f64..5_000.0) {
            let engine = TransactionCostEngine::default();
            let (lo, hi) = if q1 <= q2 { (q1, q2) } else { (q2, q1) };
            let c_lo = engine.calculate_with("ES", lo, 4000.0, 1_000_000.0, 1.0);
            let c_hi = engine.calculate_with("ES", hi, 4000.0, 1_000_000.0, 1.0);
            prop_assert!(c_hi.total_dollars >= c_lo.total_dollars - 1e-9);
        }
    }
}
