//! Backtest engine
//!
//! Deterministic replay: bars for the requested window are grouped by
//! timestamp and driven through the portfolio manager in time order.
//! After each group, positions are marked to the group close, an equity
//! point is appended, and trade details are persisted batched by run id.
//! Persistence failures are logged and non-fatal unless the run is
//! configured strict.

pub mod performance;

pub use performance::{beta, conditional_var, max_drawdown, summarize, PerformanceSummary};

use common::{
    Bar, BacktestConfig, EngineError, EquityPoint, ExecutionReport, FillPricing, Order, Position,
    Px, Result, Ts,
};
use portfolio::PortfolioManager;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use storage::{generate_run_id, Database};
use tracing::{info, warn};

/// Outcome of one backtest run
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub run_id: String,
    pub summary: PerformanceSummary,
    pub equity_curve: Vec<EquityPoint>,
    pub final_positions: Vec<Position>,
    pub executions: Vec<ExecutionReport>,
}

/// Deterministic bar-replay engine
pub struct BacktestEngine {
    config: BacktestConfig,
    database: Arc<dyn Database>,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig, database: Arc<dyn Database>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, database })
    }

    #[must_use]
    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Load the configured window from the database and run
    pub async fn run_from_database(
        &self,
        manager: &mut PortfolioManager,
    ) -> Result<BacktestResult> {
        let frame = self
            .database
            .get_market_data(
                &self.config.symbols,
                Ts::from_datetime(self.config.start_date),
                Ts::from_datetime(self.config.end_date),
                self.config.asset_class,
                self.config.data_freq,
            )
            .await?;
        let bars = frame.to_bars()?;
        self.run(manager, bars).await
    }

    /// Replay a bar set through the portfolio manager
    pub async fn run(
        &self,
        manager: &mut PortfolioManager,
        bars: Vec<Bar>,
    ) -> Result<BacktestResult> {
        let run_id = generate_run_id(manager.id(), Ts::now());
        info!(run_id = %run_id, bars = bars.len(), "backtest starting");

        let start = Ts::from_datetime(self.config.start_date);
        let end = Ts::from_datetime(self.config.end_date);

        // Group by timestamp; BTreeMap gives strict time order
        let mut groups: BTreeMap<Ts, Vec<Bar>> = BTreeMap::new();
        for bar in bars {
            if bar.timestamp < start || bar.timestamp > end {
                continue;
            }
            groups.entry(bar.timestamp).or_default().push(bar);
        }

        let mut persistence_errors: Vec<EngineError> = Vec::new();
        let metadata = serde_json::to_value(&self.config)
            .unwrap_or_else(|_| serde_json::Value::Null);
        if let Err(err) = self
            .database
            .store_backtest_metadata(
                &run_id,
                manager.id(),
                "bar-replay backtest",
                start,
                end,
                &metadata,
                &format!("{}.backtest_metadata", self.config.results_db_schema),
            )
            .await
        {
            warn!(error = %err, "failed to store backtest metadata");
            persistence_errors.push(err);
        }

        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(groups.len());
        let mut executions: Vec<ExecutionReport> = Vec::new();
        let mut benchmark_returns: Vec<f64> = Vec::new();
        let mut last_benchmark_close: Option<f64> = None;
        let mut pending_orders: Vec<Order> = Vec::new();

        for (ts, mut group) in groups {
            group.sort_by(|a, b| a.symbol.cmp(&b.symbol));

            // Next-open fills for orders carried from the previous group
            if self.config.fill_pricing == FillPricing::NextOpen && !pending_orders.is_empty() {
                let opens: FxHashMap<&str, Px> =
                    group.iter().map(|b| (b.symbol.as_str(), b.open)).collect();
                for order in std::mem::take(&mut pending_orders) {
                    let fill_price =
                        opens.get(order.symbol.as_str()).copied().unwrap_or(order.price);
                    let (report, _costs) = manager.fill_order(&order, fill_price, ts)?;
                    executions.push(report);
                }
            }

            let proposal = manager.process_bars(&group)?;

            match self.config.fill_pricing {
                FillPricing::PrevClose => {
                    for order in &proposal.orders {
                        let (report, _costs) = manager.fill_order(order, order.price, ts)?;
                        executions.push(report);
                    }
                }
                FillPricing::NextOpen => {
                    pending_orders = proposal.orders.clone();
                }
            }

            let equity = manager.mark_positions(ts)?;
            if let Some(last) = equity_curve.last() {
                debug_assert!(ts > last.timestamp, "equity timestamps must increase");
            }
            equity_curve.push(EquityPoint { timestamp: ts, equity });

            if let Some(benchmark) = &self.config.benchmark_symbol {
                if let Some(bar) = group.iter().find(|b| &b.symbol == benchmark) {
                    let close = bar.close.as_f64();
                    if let Some(prev) = last_benchmark_close {
                        if prev > 0.0 {
                            benchmark_returns.push(close / prev - 1.0);
                        }
                    }
                    last_benchmark_close = Some(close);
                }
            }

            if self.config.store_trade_details {
                self.persist_group(manager, &run_id, ts, &executions, &mut persistence_errors)
                    .await;
            }
        }

        let benchmark = if benchmark_returns.is_empty() {
            None
        } else {
            Some(benchmark_returns.as_slice())
        };
        let summary = summarize(&equity_curve, benchmark);

        let schema = &self.config.results_db_schema;
        if let Err(err) = self
            .database
            .store_backtest_equity_curve_batch(
                &run_id,
                &equity_curve,
                &format!("{schema}.backtest_equity"),
            )
            .await
        {
            warn!(error = %err, "failed to store equity curve");
            persistence_errors.push(err);
        }
        if let Err(err) = self
            .database
            .store_backtest_summary(
                &run_id,
                start,
                end,
                &summary.to_metrics_map(),
                &format!("{schema}.backtest_summary"),
            )
            .await
        {
            warn!(error = %err, "failed to store summary");
            persistence_errors.push(err);
        }

        let final_positions: Vec<Position> = manager.positions().values().cloned().collect();
        if let Err(err) = self
            .database
            .store_backtest_positions(
                &final_positions,
                &run_id,
                &format!("{schema}.backtest_positions"),
            )
            .await
        {
            warn!(error = %err, "failed to store final positions");
            persistence_errors.push(err);
        }

        if self.config.store_trade_details
            && self.config.strict_persistence
            && !persistence_errors.is_empty()
        {
            let first = persistence_errors.remove(0);
            return Err(EngineError::database(
                "backtest",
                format!(
                    "strict run failed: {} persistence errors, first: {first}",
                    persistence_errors.len() + 1
                ),
            ));
        }

        info!(
            run_id = %run_id,
            total_return = summary.total_return,
            sharpe = summary.sharpe_ratio,
            max_drawdown = summary.max_drawdown,
            "backtest complete"
        );
        Ok(BacktestResult {
            run_id,
            summary,
            equity_curve,
            final_positions,
            executions,
        })
    }

    async fn persist_group(
        &self,
        manager: &PortfolioManager,
        run_id: &str,
        ts: Ts,
        executions: &[ExecutionReport],
        persistence_errors: &mut Vec<EngineError>,
    ) {
        let schema = &self.config.results_db_schema;

        let positions: Vec<Position> = manager.positions().values().cloned().collect();
        if let Err(err) = self
            .database
            .store_backtest_positions(&positions, run_id, &format!("{schema}.backtest_positions"))
            .await
        {
            warn!(error = %err, "failed to store group positions");
            persistence_errors.push(err);
        }

        // Only this group's fills are new
        let new_executions: Vec<ExecutionReport> = executions
            .iter()
            .filter(|e| e.fill_time == ts)
            .cloned()
            .collect();
        if !new_executions.is_empty() {
            if let Err(err) = self
                .database
                .store_executions(&new_executions, &format!("{schema}.backtest_executions"))
                .await
            {
                warn!(error = %err, "failed to store executions");
                persistence_errors.push(err);
            }
        }

        for (strategy_id, signals) in manager.strategy_signals() {
            if signals.is_empty() {
                continue;
            }
            if let Err(err) = self
                .database
                .store_signals(&signals, &strategy_id, ts, &format!("{schema}.backtest_signals"))
                .await
            {
                warn!(error = %err, "failed to store signals");
                persistence_errors.push(err);
            }
        }
    }
}
