//! Trading strategies
//!
//! The `Strategy` trait carries the lifecycle state machine and the state
//! every strategy owns exclusively (positions, signals, risk limits);
//! concrete strategies embed a [`StrategyCore`] and implement `on_data`.
//!
//! Strategies are deliberately not `Clone`: the portfolio manager owns
//! the only handle, and per-strategy state is only mutated from within
//! `on_data` / `on_execution` (single-threaded cooperative scheduling).

pub mod core;
pub mod mean_reversion;
pub mod regime_fx;
pub mod trend;

pub use crate::core::{StrategyCore, StrategyMetrics, StrategyState};
pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
pub use regime_fx::{MarketRegime, RegimeFxConfig, RegimeFxStrategy};
pub use trend::{TrendFollowingConfig, TrendFollowingStrategy};

use common::{Bar, ExecutionReport, Position, Result, RiskLimits, StrategyConfig};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Read-only view of one instrument's internals, for reporting
///
/// This is the capability surface that replaces down-casting to concrete
/// strategy types: anything a report needs is published here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentView {
    pub forecast: f64,
    pub volatility: f64,
    pub ema_values: Vec<f64>,
}

/// Common interface implemented by every strategy
pub trait Strategy: Send {
    /// Strategy identifier
    fn id(&self) -> &str;

    /// Shared lifecycle and position state
    fn core(&self) -> &StrategyCore;

    /// Mutable access to the shared state
    fn core_mut(&mut self) -> &mut StrategyCore;

    /// Process a batch of bars; only legal while Running
    fn on_data(&mut self, bars: &[Bar]) -> Result<()>;

    /// Strategy-specific configuration validation, run during `initialize`
    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    /// Per-instrument internals for reporting
    fn introspect(&self) -> FxHashMap<String, InstrumentView> {
        FxHashMap::default()
    }

    // ---- Lifecycle (provided; delegates to the core state machine) ----

    fn initialize(&mut self) -> Result<()> {
        self.core().config().validate()?;
        self.validate_config()?;
        self.core_mut().transition(StrategyState::Initialized)
    }

    fn start(&mut self) -> Result<()> {
        self.core_mut().transition(StrategyState::Running)
    }

    fn pause(&mut self) -> Result<()> {
        self.core_mut().transition(StrategyState::Paused)
    }

    fn resume(&mut self) -> Result<()> {
        self.core_mut().transition(StrategyState::Running)
    }

    fn stop(&mut self) -> Result<()> {
        self.core_mut().transition(StrategyState::Stopped)
    }

    fn state(&self) -> StrategyState {
        self.core().state()
    }

    // ---- Shared state accessors ----

    fn config(&self) -> &StrategyConfig {
        self.core().config()
    }

    fn metrics(&self) -> &StrategyMetrics {
        self.core().metrics()
    }

    /// Positions for symbols that have seen at least one bar or fill
    fn positions(&self) -> &FxHashMap<String, Position> {
        self.core().positions()
    }

    /// Last emitted signal per symbol, in [-1, 1]
    fn signals(&self) -> &FxHashMap<String, f64> {
        self.core().signals()
    }

    /// Symbols this strategy trades
    fn known_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> =
            self.core().config().trading_params.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Apply an execution report to the owned positions
    fn on_execution(&mut self, report: &ExecutionReport) -> Result<()> {
        self.core_mut().apply_execution(report)
    }

    /// Replace risk limits; may only tighten while positions are open
    fn update_risk_limits(&mut self, limits: RiskLimits) -> Result<()> {
        self.core_mut().update_risk_limits(limits)
    }
}
