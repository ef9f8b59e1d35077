//! Per-asset transaction cost configuration
//!
//! Microstructure parameters for cost calculation: tick-based spread
//! bounds, impact caps and instrument metadata. Unknown symbols fall back
//! to conservative defaults.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Cost parameters for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetCostConfig {
    pub symbol: String,
    /// Typical quoted spread, in ticks
    pub baseline_spread_ticks: f64,
    pub min_spread_ticks: f64,
    pub max_spread_ticks: f64,
    /// Cap for market impact, in basis points
    pub max_impact_bps: f64,
    pub tick_size: f64,
    /// Dollar value per point (contract multiplier)
    pub point_value: f64,
    pub max_total_implicit_bps: f64,
}

impl AssetCostConfig {
    /// Conservative defaults for unknown instruments
    #[must_use]
    pub fn conservative(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            baseline_spread_ticks: 2.0,
            min_spread_ticks: 1.0,
            max_spread_ticks: 10.0,
            max_impact_bps: 100.0,
            tick_size: 0.01,
            point_value: 100.0,
            max_total_implicit_bps: 200.0,
        }
    }

    fn liquid(symbol: &str, tick_size: f64, point_value: f64, max_impact_bps: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            baseline_spread_ticks: 1.0,
            min_spread_ticks: 1.0,
            max_spread_ticks: 5.0,
            max_impact_bps,
            tick_size,
            point_value,
            max_total_implicit_bps: 200.0,
        }
    }
}

/// Registry of per-symbol cost configurations
#[derive(Debug, Clone)]
pub struct AssetCostRegistry {
    configs: FxHashMap<String, AssetCostConfig>,
}

impl Default for AssetCostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetCostRegistry {
    /// Registry preloaded with the standard futures universe
    #[must_use]
    pub fn new() -> Self {
        let mut configs = FxHashMap::default();
        let defaults = [
            AssetCostConfig::liquid("ES", 0.25, 50.0, 50.0),
            AssetCostConfig::liquid("NQ", 0.25, 20.0, 50.0),
            AssetCostConfig::liquid("CL", 0.01, 1000.0, 50.0),
            AssetCostConfig::liquid("GC", 0.10, 100.0, 50.0),
            AssetCostConfig::liquid("SI", 0.005, 5000.0, 60.0),
            AssetCostConfig::liquid("RTY", 0.10, 50.0, 60.0),
            AssetCostConfig::liquid("6E", 0.00005, 125000.0, 40.0),
            AssetCostConfig::liquid("ZC", 0.25, 50.0, 60.0),
            AssetCostConfig::liquid("ZS", 0.25, 50.0, 60.0),
            AssetCostConfig::liquid("ZW", 0.25, 50.0, 60.0),
        ];
        for config in defaults {
            configs.insert(config.symbol.clone(), config);
        }

        // Treasuries run tighter spread caps
        for (symbol, tick) in [("ZN", 0.015625), ("ZB", 0.03125)] {
            let mut config = AssetCostConfig::liquid(symbol, tick, 1000.0, 30.0);
            config.max_spread_ticks = 3.0;
            configs.insert(symbol.to_string(), config);
        }

        // Natural gas trades wider
        let mut ng = AssetCostConfig::liquid("NG", 0.001, 10000.0, 80.0);
        ng.baseline_spread_ticks = 2.0;
        ng.max_spread_ticks = 10.0;
        configs.insert("NG".to_string(), ng);

        Self { configs }
    }

    /// Configuration for a symbol, falling back to conservative defaults
    #[must_use]
    pub fn get(&self, symbol: &str) -> AssetCostConfig {
        self.configs
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| AssetCostConfig::conservative(symbol))
    }

    /// Register or replace a configuration
    pub fn register(&mut self, config: AssetCostConfig) {
        self.configs.insert(config.symbol.clone(), config);
    }

    /// True when a symbol has explicit configuration
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.configs.contains_key(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbol_uses_registered_config() {
        let registry = AssetCostRegistry::new();
        let es = registry.get("ES");
        assert_eq!(es.tick_size, 0.25);
        assert_eq!(es.point_value, 50.0);
        assert_eq!(es.baseline_spread_ticks, 1.0);
    }

    #[test]
    fn unknown_symbol_gets_conservative_defaults() {
        let registry = AssetCostRegistry::new();
        let cfg = registry.get("MYSTERY");
        assert_eq!(cfg.baseline_spread_ticks, 2.0);
        assert_eq!(cfg.max_spread_ticks, 10.0);
        assert_eq!(cfg.max_impact_bps, 100.0);
        assert_eq!(cfg.point_value, 100.0);
    }

    #[test]
    fn register_overrides() {
        let mut registry = AssetCostRegistry::new();
        let mut custom = registry.get("ES");
        custom.baseline_spread_ticks = 3.0;
        registry.register(custom);
        assert_eq!(registry.get("ES").baseline_spread_ticks, 3.0);
    }
}
