//! Configuration types
//!
//! All configuration is typed, serde-serializable and validated at
//! construction; JSON round-trip is a tested law. Configuration enters
//! from the edge (the caller) rather than from process-global state.

use crate::error::{EngineError, Result};
use crate::types::{AssetClass, DataFrequency};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Per-strategy risk limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum absolute position per symbol, in contracts
    pub max_position_size: f64,
    /// Maximum absolute notional across the strategy
    pub max_notional_value: f64,
    /// Maximum drawdown fraction from the equity peak
    pub max_drawdown: f64,
    /// Maximum leverage
    pub max_leverage: f64,
    /// Parametric VaR limit as a fraction of capital
    pub var_limit: f64,
    /// Maximum pairwise correlation before a diagnostic fires
    pub max_correlation: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: 1000.0,
            max_notional_value: 10_000_000.0,
            max_drawdown: 0.5,
            max_leverage: 4.0,
            var_limit: 0.15,
            max_correlation: 0.7,
        }
    }
}

impl RiskLimits {
    /// True when `self` is at least as tight as `other` on every limit
    #[must_use]
    pub fn tightens_or_equals(&self, other: &Self) -> bool {
        self.max_position_size <= other.max_position_size
            && self.max_notional_value <= other.max_notional_value
            && self.max_drawdown <= other.max_drawdown
            && self.max_leverage <= other.max_leverage
            && self.var_limit <= other.var_limit
            && self.max_correlation <= other.max_correlation
    }
}

/// Base configuration shared by all strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub capital_allocation: f64,
    pub max_leverage: f64,
    pub asset_classes: Vec<AssetClass>,
    pub frequencies: Vec<DataFrequency>,
    /// Contract multiplier per symbol; also defines the tradeable universe
    pub trading_params: FxHashMap<String, f64>,
    /// Absolute position limit per symbol, in contracts
    pub position_limits: FxHashMap<String, f64>,
    pub save_signals: bool,
    pub save_positions: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            capital_allocation: 1_000_000.0,
            max_leverage: 4.0,
            asset_classes: vec![AssetClass::Futures],
            frequencies: vec![DataFrequency::Daily],
            trading_params: FxHashMap::default(),
            position_limits: FxHashMap::default(),
            save_signals: true,
            save_positions: true,
        }
    }
}

impl StrategyConfig {
    /// Validate at construction; failures are fatal
    pub fn validate(&self) -> Result<()> {
        if self.capital_allocation <= 0.0 {
            return Err(EngineError::invalid_argument(
                "strategy_config",
                "capital_allocation must be positive",
            ));
        }
        if self.max_leverage < 1.0 {
            return Err(EngineError::invalid_argument(
                "strategy_config",
                "max_leverage must be at least 1.0",
            ));
        }
        if self.trading_params.is_empty() {
            return Err(EngineError::invalid_argument(
                "strategy_config",
                "trading_params must name at least one symbol",
            ));
        }
        for (symbol, multiplier) in &self.trading_params {
            if *multiplier <= 0.0 {
                return Err(EngineError::invalid_argument(
                    "strategy_config",
                    format!("{symbol}: multiplier must be positive"),
                ));
            }
        }
        Ok(())
    }

    /// Contract multiplier for a symbol, if traded by this strategy
    #[must_use]
    pub fn multiplier(&self, symbol: &str) -> Option<f64> {
        self.trading_params.get(symbol).copied()
    }

    /// Per-symbol position limit, defaulting to unlimited
    #[must_use]
    pub fn position_limit(&self, symbol: &str) -> f64 {
        self.position_limits.get(symbol).copied().unwrap_or(f64::INFINITY)
    }
}

/// Dynamic optimizer configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Annualized risk target
    pub tau: f64,
    pub capital: f64,
    /// Asymmetric risk buffer gamma: cap is `(1 + gamma) * tau * capital / ||w||`
    pub asymmetric_risk_buffer: f64,
    /// Cost penalty scalar kappa
    pub cost_penalty_scalar: f64,
    pub max_iterations: usize,
    pub convergence_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            tau: 1.0,
            capital: 1_000_000.0,
            asymmetric_risk_buffer: 0.1,
            cost_penalty_scalar: 10.0,
            max_iterations: 100,
            convergence_threshold: 1e-6,
        }
    }
}

/// Portfolio risk engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub capital: f64,
    /// Maximum absolute position per symbol, in contracts
    pub max_position_size: f64,
    pub max_gross_leverage: f64,
    pub max_net_leverage: f64,
    /// Maximum drawdown fraction before the cycle fails and flattens
    pub max_drawdown: f64,
    pub max_correlation: f64,
    pub var_limit: f64,
    pub confidence_level: f64,
    pub lookback_period: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            capital: 1_000_000.0,
            max_position_size: 1000.0,
            max_gross_leverage: 4.0,
            max_net_leverage: 2.0,
            max_drawdown: 0.25,
            max_correlation: 0.7,
            var_limit: 0.15,
            confidence_level: 0.99,
            lookback_period: 252,
        }
    }
}

/// Portfolio manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub total_capital: f64,
    pub reserve_capital: f64,
    pub min_strategy_allocation: f64,
    pub max_strategy_allocation: f64,
    pub use_optimization: bool,
    pub use_risk_management: bool,
    pub opt_config: OptimizerConfig,
    pub risk_config: RiskConfig,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            total_capital: 1_000_000.0,
            reserve_capital: 100_000.0,
            min_strategy_allocation: 0.1,
            max_strategy_allocation: 0.4,
            use_optimization: false,
            use_risk_management: false,
            opt_config: OptimizerConfig::default(),
            risk_config: RiskConfig::default(),
        }
    }
}

impl PortfolioConfig {
    /// Fraction of capital held back from strategy allocation
    #[must_use]
    pub fn reserve_fraction(&self) -> f64 {
        if self.total_capital <= 0.0 {
            0.0
        } else {
            self.reserve_capital / self.total_capital
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_capital <= 0.0 {
            return Err(EngineError::invalid_argument(
                "portfolio_config",
                "total_capital must be positive",
            ));
        }
        if self.reserve_capital < 0.0 || self.reserve_capital >= self.total_capital {
            return Err(EngineError::invalid_argument(
                "portfolio_config",
                "reserve_capital must be in [0, total_capital)",
            ));
        }
        if self.min_strategy_allocation < 0.0
            || self.max_strategy_allocation > 1.0
            || self.min_strategy_allocation > self.max_strategy_allocation
        {
            return Err(EngineError::invalid_argument(
                "portfolio_config",
                "strategy allocation bounds must satisfy 0 <= min <= max <= 1",
            ));
        }
        Ok(())
    }
}

/// How backtest fills are priced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPricing {
    /// Fill at the close of the bar that produced the signal
    PrevClose,
    /// Fill at the open of the following bar
    NextOpen,
}

/// Backtest run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub symbols: Vec<String>,
    pub asset_class: AssetClass,
    pub data_freq: DataFrequency,
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub fill_pricing: FillPricing,
    pub use_risk_management: bool,
    pub use_optimization: bool,
    /// Persist positions/executions/signals per bar group
    pub store_trade_details: bool,
    /// With `store_trade_details`, persistence failures fail the run at the end
    pub strict_persistence: bool,
    pub results_db_schema: String,
    /// Benchmark symbol for beta, when available in the bar set
    pub benchmark_symbol: Option<String>,
    pub risk_config: RiskConfig,
    pub opt_config: OptimizerConfig,
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.end_date <= self.start_date {
            return Err(EngineError::invalid_argument(
                "backtest_config",
                "end_date must be after start_date",
            ));
        }
        if self.initial_capital <= 0.0 {
            return Err(EngineError::invalid_argument(
                "backtest_config",
                "initial_capital must be positive",
            ));
        }
        if self.symbols.is_empty() {
            return Err(EngineError::invalid_argument(
                "backtest_config",
                "symbols must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn strategy_config() -> StrategyConfig {
        let mut config = StrategyConfig::default();
        config.trading_params.insert("ES".to_string(), 50.0);
        config.position_limits.insert("ES".to_string(), 100.0);
        config
    }

    #[test]
    fn strategy_config_json_roundtrip() {
        let config = strategy_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: StrategyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn portfolio_config_json_roundtrip() {
        let config = PortfolioConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PortfolioConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn backtest_config_json_roundtrip() {
        let config = BacktestConfig {
            start_date: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            symbols: vec!["ES".to_string(), "NQ".to_string()],
            asset_class: AssetClass::Futures,
            data_freq: DataFrequency::Daily,
            initial_capital: 1_000_000.0,
            commission_rate: 1.75,
            fill_pricing: FillPricing::PrevClose,
            use_risk_management: true,
            use_optimization: true,
            store_trade_details: false,
            strict_persistence: false,
            results_db_schema: "backtest_results".to_string(),
            benchmark_symbol: Some("ES".to_string()),
            risk_config: RiskConfig::default(),
            opt_config: OptimizerConfig::default(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BacktestConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn zero_capital_rejected() {
        let mut config = strategy_config();
        config.capital_allocation = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_universe_rejected() {
        let config = StrategyConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn risk_limits_tightening() {
        let base = RiskLimits::default();
        let mut tighter = base;
        tighter.max_leverage = 2.0;
        assert!(tighter.tightens_or_equals(&base));
        assert!(!base.tightens_or_equals(&tighter));
    }

    #[test]
    fn reserve_fraction() {
        let config = PortfolioConfig::default();
        assert!((config.reserve_fraction() - 0.1).abs() < 1e-12);
    }
}
