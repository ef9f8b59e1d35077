//! Tick-based spread model with volatility regime widening
//!
//! Spread is anchored to microstructure (ticks), not daily range; the
//! volatility widening is mild (0.8x to 1.5x) and represents timing
//! slippage in stressed regimes.

use crate::asset_config::AssetCostConfig;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Volatility regime configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpreadVolConfig {
    /// Sensitivity to the volatility z-score
    pub lambda: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub lookback_days: usize,
}

impl Default for SpreadVolConfig {
    fn default() -> Self {
        Self {
            lambda: 0.15,
            min_multiplier: 0.8,
            max_multiplier: 1.5,
            lookback_days: 20,
        }
    }
}

/// Spread model over rolling per-symbol log returns
#[derive(Debug, Clone)]
pub struct SpreadModel {
    config: SpreadVolConfig,
    log_returns: FxHashMap<String, VecDeque<f64>>,
}

impl SpreadModel {
    // Baseline daily volatility and its dispersion used to normalize the
    // volatility z-score
    const BASELINE_SIGMA: f64 = 0.01;
    const SIGMA_OF_SIGMA: f64 = 0.005;

    #[must_use]
    pub fn new(config: SpreadVolConfig) -> Self {
        Self {
            config,
            log_returns: FxHashMap::default(),
        }
    }

    /// Spread cost per contract in price units
    ///
    /// `0.5 * clamp(baseline_ticks * vol_mult, min, max) * tick_size`
    #[must_use]
    pub fn spread_price_impact(&self, config: &AssetCostConfig, vol_multiplier: f64) -> f64 {
        let spread_ticks = (config.baseline_spread_ticks * vol_multiplier)
            .clamp(config.min_spread_ticks, config.max_spread_ticks);
        0.5 * spread_ticks * config.tick_size
    }

    /// Volatility multiplier from a slice of log returns
    ///
    /// `clamp(1 + lambda * clamp((sigma - sigma0) / sigma_sigma, -2, 2),
    /// min_mult, max_mult)`; 1.0 with insufficient data.
    #[must_use]
    pub fn volatility_multiplier_from(&self, log_returns: &[f64]) -> f64 {
        if log_returns.len() < 2 {
            return 1.0;
        }
        let n = log_returns.len() as f64;
        let mean = log_returns.iter().sum::<f64>() / n;
        let var = log_returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / (n - 1.0);
        let sigma = var.sqrt();

        let z = ((sigma - Self::BASELINE_SIGMA) / Self::SIGMA_OF_SIGMA).clamp(-2.0, 2.0);
        (1.0 + self.config.lambda * z).clamp(self.config.min_multiplier, self.config.max_multiplier)
    }

    /// Append today's log return to the symbol's rolling window
    pub fn update_log_return(&mut self, symbol: &str, log_return: f64) {
        let returns = self.log_returns.entry(symbol.to_string()).or_default();
        returns.push_back(log_return);
        while returns.len() > self.config.lookback_days {
            returns.pop_front();
        }
    }

    /// Volatility multiplier from the stored returns for a symbol
    #[must_use]
    pub fn volatility_multiplier(&self, symbol: &str) -> f64 {
        match self.log_returns.get(symbol) {
            Some(returns) if returns.len() >= 2 => {
                let contiguous: Vec<f64> = returns.iter().copied().collect();
                self.volatility_multiplier_from(&contiguous)
            }
            _ => 1.0,
        }
    }

    /// Drop all stored returns
    pub fn clear(&mut self) {
        self.log_returns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn neutral_multiplier_without_data() {
        let model = SpreadModel::new(SpreadVolConfig::default());
        assert_relative_eq!(model.volatility_multiplier("ES"), 1.0);
    }

    #[test]
    fn spread_half_tick_at_neutral_vol() {
        let model = SpreadModel::new(SpreadVolConfig::default());
        let es = crate::asset_config::AssetCostRegistry::new().get("ES");
        // 0.5 * 1 tick * 0.25
        assert_relative_eq!(model.spread_price_impact(&es, 1.0), 0.125);
    }

    #[test]
    fn multiplier_clamped_in_calm_regime() {
        let model = SpreadModel::new(SpreadVolConfig::default());
        // Flat returns: sigma = 0, z = -2, mult = 1 - 0.3 = 0.7 -> floored at 0.8
        let mult = model.volatility_multiplier_from(&[0.0; 20]);
        assert_relative_eq!(mult, 0.8);
    }

    #[test]
    fn multiplier_widens_in_stressed_regime() {
        let model = SpreadModel::new(SpreadVolConfig::default());
        // Alternating +/-5% daily returns: sigma >> baseline, z capped at 2
        let returns: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.05 } else { -0.05 }).collect();
        let mult = model.volatility_multiplier_from(&returns);
        assert_relative_eq!(mult, 1.3);
    }

    #[test]
    fn spread_respects_max_ticks() {
        let model = SpreadModel::new(SpreadVolConfig::default());
        let mut cfg = crate::asset_config::AssetCostConfig::conservative("XX");
        cfg.baseline_spread_ticks = 20.0;
        // clamped to max 10 ticks at 0.01 tick size
        assert_relative_eq!(model.spread_price_impact(&cfg, 1.5), 0.5 * 10.0 * 0.01);
    }

    #[test]
    fn rolling_window_is_bounded() {
        let mut model = SpreadModel::new(SpreadVolConfig::default());
        for i in 0..100 {
            model.update_log_return("ES", i as f64 * 1e-4);
        }
        assert_eq!(model.log_returns.get("ES").unwrap().len(), 20);
    }
}
