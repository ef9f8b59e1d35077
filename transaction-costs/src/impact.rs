//! Square-root market impact model
//!
//! `impact_bps = k_bps(ADV) * sqrt(participation)` with
//! `participation = |qty| / ADV`, ADV tracked as a rolling mean of daily
//! volume, and the coefficient selected by liquidity bucket.

use crate::asset_config::AssetCostConfig;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Impact model configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactConfig {
    /// Days in the rolling ADV window
    pub adv_lookback_days: usize,
    /// Floor for ADV to prevent division blowups
    pub min_adv: f64,
    pub min_participation: f64,
    /// Cap for the participation rate
    pub max_participation: f64,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            adv_lookback_days: 20,
            min_adv: 100.0,
            min_participation: 0.0,
            max_participation: 0.1,
        }
    }
}

/// Impact coefficient by ADV liquidity bucket, in basis points
#[must_use]
pub fn impact_k_bps(adv: f64) -> f64 {
    if adv > 1_000_000.0 {
        10.0
    } else if adv > 200_000.0 {
        20.0
    } else if adv > 50_000.0 {
        40.0
    } else if adv > 20_000.0 {
        60.0
    } else {
        80.0
    }
}

/// Market impact model with rolling per-symbol ADV tracking
#[derive(Debug, Clone)]
pub struct ImpactModel {
    config: ImpactConfig,
    volumes: FxHashMap<String, VecDeque<f64>>,
}

impl ImpactModel {
    #[must_use]
    pub fn new(config: ImpactConfig) -> Self {
        Self {
            config,
            volumes: FxHashMap::default(),
        }
    }

    /// Market impact per contract in price units, capped by the asset config
    #[must_use]
    pub fn market_impact(
        &self,
        quantity: f64,
        reference_price: f64,
        adv: f64,
        asset_config: &AssetCostConfig,
    ) -> f64 {
        let quantity = quantity.abs();
        let adv = adv.max(self.config.min_adv);

        let participation = (quantity / adv)
            .clamp(self.config.min_participation, self.config.max_participation);

        let impact_bps =
            (impact_k_bps(adv) * participation.sqrt()).min(asset_config.max_impact_bps);

        (impact_bps / 10_000.0) * reference_price
    }

    /// Append today's volume to the symbol's rolling window
    pub fn update_volume(&mut self, symbol: &str, volume: f64) {
        let volumes = self.volumes.entry(symbol.to_string()).or_default();
        volumes.push_back(volume);
        while volumes.len() > self.config.adv_lookback_days {
            volumes.pop_front();
        }
    }

    /// Rolling ADV, or 0 with no data
    #[must_use]
    pub fn adv(&self, symbol: &str) -> f64 {
        match self.volumes.get(symbol) {
            Some(volumes) if !volumes.is_empty() => {
                volumes.iter().sum::<f64>() / volumes.len() as f64
            }
            _ => 0.0,
        }
    }

    /// True when at least `min_days` of volume have been observed
    #[must_use]
    pub fn has_sufficient_data(&self, symbol: &str, min_days: usize) -> bool {
        self.volumes.get(symbol).is_some_and(|v| v.len() >= min_days)
    }

    /// Drop all stored volumes
    pub fn clear(&mut self) {
        self.volumes.clear();
    }
}
