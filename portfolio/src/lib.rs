//! Portfolio manager
//!
//! Composes an ordered set of strategies under capital-allocation
//! constraints, aggregates their target positions, optionally runs the
//! dynamic optimizer and the risk engine, and emits the executable delta
//! against the held portfolio as market orders.
//!
//! The manager owns the aggregated portfolio positions; strategies own
//! theirs. The manager's view of a strategy is a snapshot read between
//! `on_data` calls, never an aliased mutable reference.

pub mod covariance;
pub mod optimizer;

pub use covariance::CovarianceEstimator;
pub use optimizer::{DynamicOptimizer, OptimizationInput, OptimizationResult};

use common::{
    Bar, EngineError, ErrorKind, InstrumentRegistry, Order, OrderType, PortfolioConfig, Position,
    Px, Qty, Result, Side, TimeInForce, Ts,
};
use nalgebra::DVector;
use risk::{RiskEngine, RiskOutcome, SymbolExposure};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use strategies::Strategy;
use tracing::{debug, info, warn};
use transaction_costs::{CostBreakdown, TransactionCostEngine};
use uuid::Uuid;

/// One registered strategy with its allocation and toggles
struct StrategyEntry {
    strategy: Box<dyn Strategy>,
    weight: f64,
    use_optimization: bool,
    use_risk: bool,
}

/// Proposal produced by one bar-batch cycle
#[derive(Debug, Clone, Default)]
pub struct CycleProposal {
    /// Market orders realizing the target delta
    pub orders: Vec<Order>,
    /// Post-aggregation targets per symbol, in contracts
    pub targets: FxHashMap<String, f64>,
    /// Risk engine outcome, when risk management ran
    pub risk: Option<RiskOutcome>,
    /// Optimizer telemetry, when optimization ran
    pub optimizer_converged: Option<bool>,
}

/// Portfolio manager
pub struct PortfolioManager {
    id: String,
    config: PortfolioConfig,
    registry: Arc<InstrumentRegistry>,
    entries: Vec<StrategyEntry>,
    cost_engine: TransactionCostEngine,
    optimizer: DynamicOptimizer,
    risk_engine: RiskEngine,
    covariance: CovarianceEstimator,
    positions: FxHashMap<String, Position>,
    last_prices: FxHashMap<String, Px>,
    order_seq: u64,
}

impl PortfolioManager {
    pub fn new(
        id: impl Into<String>,
        config: PortfolioConfig,
        registry: Arc<InstrumentRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: id.into(),
            optimizer: DynamicOptimizer::new(config.opt_config),
            risk_engine: RiskEngine::new(config.risk_config),
            config,
            registry,
            entries: Vec::new(),
            cost_engine: TransactionCostEngine::default(),
            covariance: CovarianceEstimator::default_daily(),
            positions: FxHashMap::default(),
            last_prices: FxHashMap::default(),
            order_seq: 0,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn config(&self) -> &PortfolioConfig {
        &self.config
    }

    /// Held portfolio positions
    #[must_use]
    pub fn positions(&self) -> &FxHashMap<String, Position> {
        &self.positions
    }

    /// Current strategy allocations, in declaration order
    #[must_use]
    pub fn allocations(&self) -> Vec<(String, f64)> {
        self.entries
            .iter()
            .map(|e| (e.strategy.id().to_string(), e.weight))
            .collect()
    }

    /// Equity: initial capital plus realized and unrealized PnL at mark
    #[must_use]
    pub fn equity(&self) -> f64 {
        let realized: f64 = self.positions.values().map(|p| p.realized_pnl).sum();
        let unrealized: f64 = self.positions.values().map(|p| p.unrealized_pnl).sum();
        self.config.total_capital + realized + unrealized
    }

    /// Last signals per strategy, for persistence
    #[must_use]
    pub fn strategy_signals(&self) -> Vec<(String, FxHashMap<String, f64>)> {
        self.entries
            .iter()
            .map(|e| (e.strategy.id().to_string(), e.strategy.signals().clone()))
            .collect()
    }

    /// Per-strategy introspection views, for reporting
    #[must_use]
    pub fn introspect(&self) -> Vec<(String, FxHashMap<String, strategies::InstrumentView>)> {
        self.entries
            .iter()
            .map(|e| (e.strategy.id().to_string(), e.strategy.introspect()))
            .collect()
    }

    /// Register a strategy with an allocation weight
    ///
    /// Fails (never clips) when the weight is outside the configured
    /// bounds or the total allocation would exceed `1 - reserve`.
    pub fn add_strategy(
        &mut self,
        strategy: Box<dyn Strategy>,
        weight: f64,
        use_optimization: bool,
        use_risk: bool,
    ) -> Result<()> {
        self.check_weight(weight)?;
        let total: f64 = self.entries.iter().map(|e| e.weight).sum();
        self.check_total(total + weight)?;

        info!(
            portfolio = %self.id,
            strategy = strategy.id(),
            weight,
            "strategy registered"
        );
        self.entries.push(StrategyEntry {
            strategy,
            weight,
            use_optimization,
            use_risk,
        });
        Ok(())
    }

    /// Replace allocation weights by strategy id
    pub fn update_allocations(&mut self, weights: &FxHashMap<String, f64>) -> Result<()> {
        let mut new_weights = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let weight = weights
                .get(entry.strategy.id())
                .copied()
                .unwrap_or(entry.weight);
            self.check_weight(weight)?;
            new_weights.push(weight);
        }
        self.check_total(new_weights.iter().sum())?;

        for (entry, weight) in self.entries.iter_mut().zip(new_weights) {
            entry.weight = weight;
        }
        Ok(())
    }

    fn check_weight(&self, weight: f64) -> Result<()> {
        if weight < self.config.min_strategy_allocation
            || weight > self.config.max_strategy_allocation
        {
            return Err(EngineError::invalid_argument(
                &self.id,
                format!(
                    "allocation {weight} outside [{}, {}]",
                    self.config.min_strategy_allocation, self.config.max_strategy_allocation
                ),
            ));
        }
        Ok(())
    }

    fn check_total(&self, total: f64) -> Result<()> {
        let available = 1.0 - self.config.reserve_fraction();
        if total > available + 1e-12 {
            return Err(EngineError::invalid_argument(
                &self.id,
                format!("total allocation {total:.4} exceeds available {available:.4}"),
            ));
        }
        Ok(())
    }

    /// Process one bar batch: strategies, aggregation, optimization,
    /// risk clamp, delta emission
    pub fn process_bars(&mut self, bars: &[Bar]) -> Result<CycleProposal> {
        let mut proposal = CycleProposal::default();
        if bars.is_empty() {
            return Ok(proposal);
        }

        let batch_ts = bars.iter().map(|b| b.timestamp).max().unwrap_or_default();
        self.observe_market(bars);

        // Strategies run sequentially in declaration order
        for entry in &mut self.entries {
            let universe = entry.strategy.known_symbols();
            let filtered: Vec<Bar> = bars
                .iter()
                .filter(|b| universe.binary_search(&b.symbol).is_ok())
                .cloned()
                .collect();
            if filtered.is_empty() {
                continue;
            }
            match entry.strategy.on_data(&filtered) {
                Ok(()) => {}
                Err(err) if err.kind == ErrorKind::StrategyNotRunning => {
                    warn!(
                        portfolio = %self.id,
                        strategy = entry.strategy.id(),
                        "skipping strategy that is not running"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        // Weighted aggregation of per-strategy targets
        let mut optimized_pool: FxHashMap<String, f64> = FxHashMap::default();
        let mut passthrough: FxHashMap<String, f64> = FxHashMap::default();
        let mut use_risk_any = false;
        for entry in &self.entries {
            let sink = if self.config.use_optimization && entry.use_optimization {
                &mut optimized_pool
            } else {
                &mut passthrough
            };
            for (symbol, position) in entry.strategy.positions() {
                *sink.entry(symbol.clone()).or_insert(0.0) +=
                    entry.weight * position.quantity.as_f64();
            }
            use_risk_any |= entry.use_risk;
        }

        if self.config.use_optimization && !optimized_pool.is_empty() {
            let (optimized, converged) = self.run_optimizer(&optimized_pool);
            proposal.optimizer_converged = Some(converged);
            for (symbol, qty) in optimized {
                *passthrough.entry(symbol).or_insert(0.0) += qty;
            }
        } else {
            for (symbol, qty) in optimized_pool {
                *passthrough.entry(symbol).or_insert(0.0) += qty;
            }
        }
        let mut targets = passthrough;

        if self.config.use_risk_management && use_risk_any {
            let equity = self.equity();
            let exposures = self.exposures(targets.keys());
            let outcome = self.risk_engine.clamp(&targets, &exposures, equity)?;
            targets = outcome.positions.clone();
            proposal.risk = Some(outcome);
        }

        proposal.orders = self.delta_orders(&targets, batch_ts);
        proposal.targets = targets;
        Ok(proposal)
    }

    /// Apply a fill: cost the execution and update the held position
    pub fn fill_order(
        &mut self,
        order: &Order,
        fill_price: Px,
        fill_time: Ts,
    ) -> Result<(common::ExecutionReport, CostBreakdown)> {
        let instrument = self.registry.lookup(&order.symbol)?;
        let qty = order.quantity.as_f64();
        let costs = self.cost_engine.calculate(&order.symbol, qty, fill_price.as_f64());

        let report = common::ExecutionReport {
            order_id: order.order_id.clone(),
            exec_id: format!("EXEC_{}", Uuid::new_v4()),
            symbol: order.symbol.clone(),
            side: order.side,
            filled_qty: order.quantity,
            fill_price,
            fill_time,
            commission: costs.commission,
            is_partial: false,
        };

        let position = self
            .positions
            .entry(order.symbol.clone())
            .or_insert_with(|| Position::flat(&order.symbol));
        // Implicit costs hit PnL along with the explicit fee
        position.apply_fill(
            report.side,
            report.filled_qty,
            report.fill_price,
            instrument.multiplier,
            costs.total_dollars,
            fill_time,
        )?;

        debug!(
            portfolio = %self.id,
            symbol = %order.symbol,
            side = ?order.side,
            qty = %order.quantity,
            price = %fill_price,
            cost = costs.total_dollars,
            "fill applied"
        );
        Ok((report, costs))
    }

    /// Mark all held positions to the latest prices and record equity
    pub fn mark_positions(&mut self, ts: Ts) -> Result<f64> {
        for (symbol, position) in &mut self.positions {
            if let Some(price) = self.last_prices.get(symbol) {
                let instrument = self.registry.lookup(symbol)?;
                position.mark(*price, instrument.multiplier, ts);
            }
        }
        let equity = self.equity();
        self.risk_engine.observe_equity(equity);
        Ok(equity)
    }

    /// Latest close seen for a symbol
    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<Px> {
        self.last_prices.get(symbol).copied()
    }

    fn observe_market(&mut self, bars: &[Bar]) {
        for bar in bars {
            let close = bar.close.as_f64();
            if let Some(prev) = self.last_prices.get(&bar.symbol) {
                let prev = prev.as_f64();
                if prev > 0.0 {
                    let ret = close / prev - 1.0;
                    self.covariance.add_return(&bar.symbol, ret);
                    self.risk_engine.observe_return(&bar.symbol, ret);
                }
                self.cost_engine
                    .update_market_data(&bar.symbol, bar.volume, close, prev);
            } else {
                self.cost_engine
                    .update_market_data(&bar.symbol, bar.volume, close, close);
            }
            self.last_prices.insert(bar.symbol.clone(), bar.close);
        }
    }

    fn exposures(
        &self,
        symbols: impl Iterator<Item = impl AsRef<str>>,
    ) -> FxHashMap<String, SymbolExposure> {
        let mut map = FxHashMap::default();
        for symbol in symbols {
            let symbol = symbol.as_ref();
            let Some(price) = self.last_prices.get(symbol) else {
                continue;
            };
            let Ok(instrument) = self.registry.lookup(symbol) else {
                continue;
            };
            map.insert(
                symbol.to_string(),
                SymbolExposure {
                    price: price.as_f64(),
                    multiplier: instrument.multiplier,
                },
            );
        }
        map
    }

    fn run_optimizer(&self, pool: &FxHashMap<String, f64>) -> (FxHashMap<String, f64>, bool) {
        // Deterministic ordering: tie-breaks resolve to the lowest index
        let mut symbols: Vec<String> = pool.keys().cloned().collect();
        symbols.sort();
        let n = symbols.len();

        let ideal = DVector::from_iterator(n, symbols.iter().map(|s| pool[s]));
        let held = DVector::from_iterator(
            n,
            symbols.iter().map(|s| {
                self.positions
                    .get(s)
                    .map(|p| p.quantity.as_f64())
                    .unwrap_or(0.0)
            }),
        );
        let cost = DVector::from_iterator(
            n,
            symbols.iter().map(|s| {
                let price = self
                    .last_prices
                    .get(s)
                    .map(|p| p.as_f64())
                    .unwrap_or(0.0);
                self.cost_engine.calculate(s, 1.0, price).total_dollars
            }),
        );
        let weight = DVector::from_iterator(
            n,
            symbols.iter().map(|s| {
                let price = self
                    .last_prices
                    .get(s)
                    .map(|p| p.as_f64())
                    .unwrap_or(0.0);
                let multiplier = self
                    .registry
                    .lookup(s)
                    .map(|i| i.multiplier)
                    .unwrap_or(1.0);
                price * multiplier / self.config.opt_config.capital.max(1.0)
            }),
        );
        let covariance = self.covariance.covariance(&symbols);

        let input = OptimizationInput {
            ideal,
            held,
            cost_per_contract: cost,
            weight_per_contract: weight,
            covariance,
        };
        let result = self.optimizer.optimize(&input);
        let positions = symbols
            .into_iter()
            .zip(result.positions.iter())
            .map(|(s, q)| (s, *q))
            .collect();
        (positions, result.converged)
    }

    /// Orders realizing the difference between targets and held positions
    fn delta_orders(&mut self, targets: &FxHashMap<String, f64>, ts: Ts) -> Vec<Order> {
        let mut symbols: Vec<&String> = targets.keys().collect();
        // Include held symbols that dropped out of the target set
        let held: Vec<&String> = self
            .positions
            .iter()
            .filter(|(s, p)| p.is_open() && !targets.contains_key(*s))
            .map(|(s, _)| s)
            .collect();
        symbols.extend(held);
        symbols.sort();
        symbols.dedup();

        let mut orders = Vec::new();
        for symbol in symbols {
            let target = targets.get(symbol).copied().unwrap_or(0.0);
            let current = self
                .positions
                .get(symbol)
                .map(|p| p.quantity.as_f64())
                .unwrap_or(0.0);
            let delta = target - current;
            if delta.abs() < 1e-6 {
                continue;
            }

            self.order_seq += 1;
            let price = self.last_prices.get(symbol).copied().unwrap_or(Px::ZERO);
            orders.push(Order {
                order_id: format!("{}_{}", self.id, self.order_seq),
                symbol: symbol.clone(),
                side: if delta > 0.0 { Side::Buy } else { Side::Sell },
                order_type: OrderType::Market,
                quantity: Qty::new(delta.abs()),
                price,
                time_in_force: TimeInForce::Day,
                strategy_id: self.id.clone(),
                timestamp: ts,
            });
        }
        orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{PnlAccounting, StrategyConfig};
    use strategies::StrategyCore;

    /// Fixed-target strategy for portfolio tests
    struct FixedStrategy {
        core: StrategyCore,
        target: f64,
        symbol: String,
    }

    impl FixedStrategy {
        fn new(id: &str, symbol: &str, target: f64) -> Self {
            let mut config = StrategyConfig::default();
            config.trading_params.insert(symbol.to_string(), 50.0);
            Self {
                core: StrategyCore::new(id, config, PnlAccounting::MarkToMarket),
                target,
                symbol: symbol.to_string(),
            }
        }

        fn started(id: &str, symbol: &str, target: f64) -> Box<Self> {
            let mut strategy = Self::new(id, symbol, target);
            strategy.initialize().unwrap();
            strategy.start().unwrap();
            Box::new(strategy)
        }
    }

    impl Strategy for FixedStrategy {
        fn id(&self) -> &str {
            self.core.id()
        }
        fn core(&self) -> &StrategyCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut StrategyCore {
            &mut self.core
        }
        fn on_data(&mut self, bars: &[Bar]) -> Result<()> {
            self.core.require_running()?;
            self.core.validate_bars(bars)?;
            for bar in bars {
                if bar.symbol == self.symbol {
                    let position =
                        self.core
                            .target_position(&self.symbol, self.target, bar.close, bar.timestamp);
                    self.core.set_target(&self.symbol, position, self.target.signum());
                }
            }
            Ok(())
        }
    }

    fn bar(symbol: &str, day: u64, close: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: Ts::from_millis(1_600_000_000_000 + day * 86_400_000),
            open: Px::new(close),
            high: Px::new(close * 1.01),
            low: Px::new(close * 0.99),
            close: Px::new(close),
            volume: 1_000_000.0,
        }
    }

    fn manager() -> PortfolioManager {
        let registry = Arc::new(InstrumentRegistry::with_default_futures());
        PortfolioManager::new("PM_TEST", PortfolioConfig::default(), registry).unwrap()
    }

    #[test]
    fn add_strategy_rejects_out_of_bounds_weight() {
        let mut manager = manager();
        let strategy = FixedStrategy::started("S1", "ES", 10.0);
        let err = manager.add_strategy(strategy, 0.5, false, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn total_allocation_respects_reserve() {
        let mut manager = manager();
        // Reserve is 10%, so three 40% sleeves exceed the available 90%
        manager
            .add_strategy(FixedStrategy::started("S1", "ES", 1.0), 0.4, false, false)
            .unwrap();
        manager
            .add_strategy(FixedStrategy::started("S2", "NQ", 1.0), 0.4, false, false)
            .unwrap();
        let err = manager
            .add_strategy(FixedStrategy::started("S3", "CL", 1.0), 0.4, false, false)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn update_allocations_validates() {
        let mut manager = manager();
        manager
            .add_strategy(FixedStrategy::started("S1", "ES", 1.0), 0.4, false, false)
            .unwrap();
        let mut weights = FxHashMap::default();
        weights.insert("S1".to_string(), 0.05);
        assert!(manager.update_allocations(&weights).is_err());

        weights.insert("S1".to_string(), 0.2);
        assert!(manager.update_allocations(&weights).is_ok());
        assert_eq!(manager.allocations()[0].1, 0.2);
    }

    #[test]
    fn delta_orders_from_weighted_targets() {
        let mut manager = manager();
        manager
            .add_strategy(FixedStrategy::started("S1", "ES", 10.0), 0.4, false, false)
            .unwrap();

        let proposal = manager.process_bars(&[bar("ES", 1, 4000.0)]).unwrap();
        assert_eq!(proposal.orders.len(), 1);
        let order = &proposal.orders[0];
        assert_eq!(order.symbol, "ES");
        assert_eq!(order.side, Side::Buy);
        // 10 contracts at 40% weight
        assert_eq!(order.quantity, Qty::new(4.0));
    }

    #[test]
    fn fills_update_positions_and_reduce_next_delta() {
        let mut manager = manager();
        manager
            .add_strategy(FixedStrategy::started("S1", "ES", 10.0), 0.4, false, false)
            .unwrap();

        let proposal = manager.process_bars(&[bar("ES", 1, 4000.0)]).unwrap();
        for order in &proposal.orders {
            manager.fill_order(order, order.price, order.timestamp).unwrap();
        }
        assert_eq!(manager.positions()["ES"].quantity, Qty::new(4.0));

        // Same target: no further orders
        let proposal = manager.process_bars(&[bar("ES", 2, 4000.0)]).unwrap();
        assert!(proposal.orders.is_empty());
    }

    #[test]
    fn dropped_symbol_is_flattened() {
        let mut manager = manager();
        manager
            .add_strategy(FixedStrategy::started("S1", "ES", 10.0), 0.4, false, false)
            .unwrap();
        let proposal = manager.process_bars(&[bar("ES", 1, 4000.0)]).unwrap();
        for order in &proposal.orders {
            manager.fill_order(order, order.price, order.timestamp).unwrap();
        }

        // Replace the book with a strategy that never targets ES
        manager.entries.clear();
        manager
            .add_strategy(FixedStrategy::started("S2", "NQ", 2.0), 0.4, false, false)
            .unwrap();
        let proposal = manager
            .process_bars(&[bar("ES", 2, 4000.0), bar("NQ", 2, 15000.0)])
            .unwrap();
        let es_order = proposal.orders.iter().find(|o| o.symbol == "ES").unwrap();
        assert_eq!(es_order.side, Side::Sell);
        assert_eq!(es_order.quantity, Qty::new(4.0));
    }

    #[test]
    fn equity_reflects_marked_pnl() {
        let mut manager = manager();
        manager
            .add_strategy(FixedStrategy::started("S1", "ES", 10.0), 0.4, false, false)
            .unwrap();
        let proposal = manager.process_bars(&[bar("ES", 1, 4000.0)]).unwrap();
        let mut total_cost = 0.0;
        for order in &proposal.orders {
            let (_, costs) = manager.fill_order(order, order.price, order.timestamp).unwrap();
            total_cost += costs.total_dollars;
        }

        // Mark 10 points higher: 4 contracts * 10 * 50 = 2000 unrealized
        manager.process_bars(&[bar("ES", 2, 4010.0)]).unwrap();
        let equity = manager.mark_positions(Ts::from_millis(2)).unwrap();
        let expected = 1_000_000.0 + 2000.0 - total_cost;
        assert!((equity - expected).abs() < 1e-6);
    }

    #[test]
    fn risk_clamp_runs_when_enabled() {
        let registry = Arc::new(InstrumentRegistry::with_default_futures());
        let mut config = PortfolioConfig::default();
        config.use_risk_management = true;
        config.risk_config.max_gross_leverage = 1.0;
        let mut manager = PortfolioManager::new("PM_RISK", config, registry).unwrap();
        manager
            .add_strategy(FixedStrategy::started("S1", "ES", 40.0), 0.4, false, true)
            .unwrap();

        // 16 contracts * 4000 * 50 = 3.2M on 1M capital
        let proposal = manager.process_bars(&[bar("ES", 1, 4000.0)]).unwrap();
        let outcome = proposal.risk.expect("risk outcome");
        assert!(outcome.gross_scale < 1.0);
        assert!(proposal.targets["ES"] < 16.0);
    }

    #[test]
    fn optimization_path_produces_integer_targets() {
        let registry = Arc::new(InstrumentRegistry::with_default_futures());
        let mut config = PortfolioConfig::default();
        config.use_optimization = true;
        config.opt_config.cost_penalty_scalar = 0.0;
        let mut manager = PortfolioManager::new("PM_OPT", config, registry).unwrap();
        manager
            .add_strategy(FixedStrategy::started("S1", "ES", 10.0), 0.4, true, false)
            .unwrap();

        let mut proposal = CycleProposal::default();
        for day in 1..30 {
            let close = 4000.0 * (1.0 + 0.001 * (day as f64).sin());
            proposal = manager.process_bars(&[bar("ES", day, close)]).unwrap();
        }
        assert!(proposal.optimizer_converged.unwrap_or(false));
        let target = proposal.targets["ES"];
        assert!((target - target.round()).abs() < 1e-9, "target {target} not integer");
    }
}
