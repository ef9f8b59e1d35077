//! Shared strategy state: lifecycle machine, positions, signals, limits
//!
//! State machine:
//!
//! ```text
//!   Created --init--> Initialized --start--> Running <-> Paused
//!                          |                    |          |
//!                          +------stop-------> Stopped <---+
//!   any state --fatal--> Error
//! ```

use common::{
    Bar, EngineError, ExecutionReport, PnlAccounting, Position, Px, Result, RiskLimits,
    StrategyConfig,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Strategy lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyState {
    Created,
    Initialized,
    Running,
    Paused,
    Stopped,
    Error,
}

impl StrategyState {
    /// Legal state machine edges
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use StrategyState::*;
        matches!(
            (self, to),
            (Created, Initialized)
                | (Initialized, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Initialized, Stopped)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (_, Error)
        )
    }
}

/// Aggregate metrics maintained per strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub total_pnl: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub volatility: f64,
    pub win_rate: f64,
    pub closed_trades: u64,
    pub winning_trades: u64,
}

/// State shared by every strategy
///
/// Owned exclusively by the strategy; external readers go through
/// snapshots taken by the portfolio manager.
#[derive(Debug)]
pub struct StrategyCore {
    id: String,
    config: StrategyConfig,
    state: StrategyState,
    accounting: PnlAccounting,
    positions: FxHashMap<String, Position>,
    last_signals: FxHashMap<String, f64>,
    risk_limits: RiskLimits,
    metrics: StrategyMetrics,
}

impl StrategyCore {
    pub fn new(id: impl Into<String>, config: StrategyConfig, accounting: PnlAccounting) -> Self {
        Self {
            id: id.into(),
            config,
            state: StrategyState::Created,
            accounting,
            positions: FxHashMap::default(),
            last_signals: FxHashMap::default(),
            risk_limits: RiskLimits::default(),
            metrics: StrategyMetrics::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> StrategyState {
        self.state
    }

    #[must_use]
    pub fn accounting(&self) -> PnlAccounting {
        self.accounting
    }

    #[must_use]
    pub fn positions(&self) -> &FxHashMap<String, Position> {
        &self.positions
    }

    #[must_use]
    pub fn signals(&self) -> &FxHashMap<String, f64> {
        &self.last_signals
    }

    #[must_use]
    pub fn metrics(&self) -> &StrategyMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn risk_limits(&self) -> &RiskLimits {
        &self.risk_limits
    }

    /// Attempt a state transition; illegal edges fail and leave the state
    /// unchanged
    pub fn transition(&mut self, to: StrategyState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(EngineError::invalid_transition(
                &self.id,
                format!("illegal transition {:?} -> {to:?}", self.state),
            ));
        }
        debug!(strategy = %self.id, from = ?self.state, to = ?to, "state transition");
        self.state = to;
        Ok(())
    }

    /// Move to the Error state (always legal)
    pub fn fail(&mut self, reason: &str) {
        warn!(strategy = %self.id, %reason, "strategy entering Error state");
        self.state = StrategyState::Error;
    }

    /// Guard for `on_data`
    pub fn require_running(&self) -> Result<()> {
        if self.state != StrategyState::Running {
            return Err(EngineError::not_running(
                &self.id,
                format!("on_data while {:?}", self.state),
            ));
        }
        Ok(())
    }

    /// Validate a whole batch before any mutation happens
    pub fn validate_bars(&self, bars: &[Bar]) -> Result<()> {
        for bar in bars {
            bar.validate()?;
        }
        Ok(())
    }

    /// Sort bars into processing order: timestamp, then symbol
    #[must_use]
    pub fn ordered<'a>(&self, bars: &'a [Bar]) -> Vec<&'a Bar> {
        let mut ordered: Vec<&Bar> = bars.iter().collect();
        ordered.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ordered
    }

    /// Record a strategy-produced target position and its signal
    pub fn set_target(&mut self, symbol: &str, target: Position, signal: f64) {
        self.positions.insert(symbol.to_string(), target);
        self.last_signals.insert(symbol.to_string(), signal);
        self.refresh_metrics();
    }

    /// Current target quantity for a symbol, in contracts
    #[must_use]
    pub fn target_contracts(&self, symbol: &str) -> f64 {
        self.positions
            .get(symbol)
            .map(|p| p.quantity.as_f64())
            .unwrap_or(0.0)
    }

    /// Apply an execution report to the owned position for its symbol
    pub fn apply_execution(&mut self, report: &ExecutionReport) -> Result<()> {
        if report.filled_qty.raw() <= 0 || !report.fill_price.is_positive() {
            return Err(EngineError::invalid_data(
                &self.id,
                format!("{}: degenerate execution report", report.symbol),
            ));
        }
        let multiplier = self.config.multiplier(&report.symbol).ok_or_else(|| {
            EngineError::unknown_instrument(&self.id, &report.symbol)
        })?;

        let position = self
            .positions
            .entry(report.symbol.clone())
            .or_insert_with(|| Position::flat(&report.symbol));

        let was_open = position.is_open();
        let realized_before = position.realized_pnl;
        position.apply_fill(
            report.side,
            report.filled_qty,
            report.fill_price,
            multiplier,
            report.commission,
            report.fill_time,
        )?;

        if was_open && !position.is_open() {
            self.metrics.closed_trades += 1;
            if position.realized_pnl > realized_before {
                self.metrics.winning_trades += 1;
            }
        }
        self.refresh_metrics();
        Ok(())
    }

    /// Mark all open positions to a price map
    pub fn mark_positions(&mut self, prices: &FxHashMap<String, Px>, ts: common::Ts) {
        for (symbol, position) in &mut self.positions {
            if let (Some(price), Some(multiplier)) =
                (prices.get(symbol), self.config.multiplier(symbol))
            {
                position.mark(*price, multiplier, ts);
            }
        }
        self.refresh_metrics();
    }

    /// Replace risk limits
    ///
    /// With open positions only tighten-or-same is allowed, and the new
    /// limits must not already be violated by what is held.
    pub fn update_risk_limits(&mut self, limits: RiskLimits) -> Result<()> {
        let has_open = self.positions.values().any(Position::is_open);
        if has_open {
            if !limits.tightens_or_equals(&self.risk_limits) {
                return Err(EngineError::invalid_argument(
                    &self.id,
                    "risk limits may only tighten while positions are open",
                ));
            }
            self.check_positions_against(&limits)?;
        }
        self.risk_limits = limits;
        Ok(())
    }

    /// Verify current positions against a set of limits
    pub fn check_positions_against(&self, limits: &RiskLimits) -> Result<()> {
        let mut total_notional = 0.0;
        for (symbol, position) in &self.positions {
            let qty = position.quantity.as_f64().abs();
            if qty > limits.max_position_size {
                return Err(EngineError::risk_limit(
                    &self.id,
                    format!(
                        "{symbol}: position {qty} exceeds max_position_size {}",
                        limits.max_position_size
                    ),
                ));
            }
            let multiplier = self.config.multiplier(symbol).unwrap_or(1.0);
            total_notional += qty * position.average_price.as_f64() * multiplier;
        }
        if total_notional > limits.max_notional_value {
            return Err(EngineError::risk_limit(
                &self.id,
                format!(
                    "total notional {total_notional:.2} exceeds max_notional_value {}",
                    limits.max_notional_value
                ),
            ));
        }
        Ok(())
    }

    fn refresh_metrics(&mut self) {
        let realized: f64 = self.positions.values().map(|p| p.realized_pnl).sum();
        let unrealized: f64 = self.positions.values().map(|p| p.unrealized_pnl).sum();
        self.metrics.realized_pnl = realized;
        self.metrics.unrealized_pnl = unrealized;
        self.metrics.total_pnl = match self.accounting {
            PnlAccounting::RealizedOnly => realized,
            PnlAccounting::MarkToMarket => realized + unrealized,
        };
        self.metrics.win_rate = if self.metrics.closed_trades > 0 {
            self.metrics.winning_trades as f64 / self.metrics.closed_trades as f64
        } else {
            0.0
        };
    }

    /// Build a target position record for a symbol
    #[must_use]
    pub fn target_position(&self, symbol: &str, contracts: f64, close: Px, ts: common::Ts) -> Position {
        let mut position = self
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol));
        position.quantity = common::Qty::new(contracts);
        position.average_price = close;
        position.last_update = ts;
        position
    }
}
