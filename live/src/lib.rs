//! Live trading engine
//!
//! Same control flow as the backtest, with a live bar feed as the source
//! and a broker as the order sink. Broker calls are retried with
//! exponential backoff (100 ms doubling to a 5 s cap, three attempts)
//! before surfacing as `Network` errors. Wire adapters themselves live
//! outside this workspace; only the traits are defined here.

use async_trait::async_trait;
use common::{
    Bar, EngineError, ErrorKind, ExecutionReport, Order, Position, Result, Ts,
};
use portfolio::PortfolioManager;
use std::sync::Arc;
use std::time::Duration;
use storage::Database;
use tracing::{error, info, warn};

/// Initial retry backoff
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Backoff ceiling
const MAX_BACKOFF: Duration = Duration::from_secs(5);
/// Attempts per broker call
const MAX_ATTEMPTS: u32 = 3;

/// Order sink and account surface of a live broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the session; other calls fail `NotConnected` before this
    async fn connect(&mut self) -> Result<()>;

    /// Submit an order and wait for its (first) execution report
    async fn submit_order(&mut self, order: &Order) -> Result<ExecutionReport>;

    /// Cancel a resting order
    async fn cancel(&mut self, order_id: &str) -> Result<()>;

    /// Subscribe to market data for a symbol set
    async fn subscribe_market_data(&mut self, symbols: &[String]) -> Result<()>;

    /// Current broker-side positions, for reconciliation
    async fn get_positions(&self) -> Result<Vec<Position>>;
}

/// Ordered source of live bars
#[async_trait]
pub trait BarFeed: Send {
    /// Next batch of bars; `None` ends the session
    async fn next_batch(&mut self) -> Result<Option<Vec<Bar>>>;
}

/// Live engine configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Persist positions and signals after each batch
    pub persist_state: bool,
    pub positions_table: String,
    pub signals_table: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            persist_state: true,
            positions_table: "live.positions".to_string(),
            signals_table: "live.signals".to_string(),
        }
    }
}

/// Live trading loop
pub struct LiveEngine<F: BarFeed, B: Broker> {
    feed: F,
    broker: B,
    manager: PortfolioManager,
    database: Option<Arc<dyn Database>>,
    config: LiveConfig,
}

impl<F: BarFeed, B: Broker> LiveEngine<F, B> {
    pub fn new(
        feed: F,
        broker: B,
        manager: PortfolioManager,
        database: Option<Arc<dyn Database>>,
        config: LiveConfig,
    ) -> Self {
        Self {
            feed,
            broker,
            manager,
            database,
            config,
        }
    }

    /// The composed portfolio manager
    #[must_use]
    pub fn manager(&self) -> &PortfolioManager {
        &self.manager
    }

    /// Connect, subscribe and drive the feed until it ends
    pub async fn run(&mut self, symbols: &[String]) -> Result<()> {
        self.broker.connect().await?;
        self.broker.subscribe_market_data(symbols).await?;
        info!(symbols = symbols.len(), "live session started");

        while let Some(batch) = self.feed.next_batch().await? {
            if batch.is_empty() {
                continue;
            }
            let batch_ts = batch.iter().map(|b| b.timestamp).max().unwrap_or_else(Ts::now);
            self.process_batch(&batch, batch_ts).await?;
        }

        info!("live session feed ended");
        Ok(())
    }

    async fn process_batch(&mut self, batch: &[Bar], ts: Ts) -> Result<()> {
        let proposal = self.manager.process_bars(batch)?;

        for order in &proposal.orders {
            match self.submit_with_retry(order).await {
                Ok(report) => {
                    // Apply the broker's fill, not our reference price
                    self.manager
                        .fill_order(order, report.fill_price, report.fill_time)?;
                }
                Err(err) => {
                    error!(order_id = %order.order_id, error = %err, "order failed after retries");
                    return Err(err);
                }
            }
        }

        let equity = self.manager.mark_positions(ts)?;
        info!(equity, orders = proposal.orders.len(), "batch processed");

        if self.config.persist_state {
            self.persist_state(ts).await;
        }
        Ok(())
    }

    /// Broker submit with exponential backoff on transport failures
    async fn submit_with_retry(&mut self, order: &Order) -> Result<ExecutionReport> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_error =
            EngineError::network("live", format!("{}: no attempt made", order.order_id));

        for attempt in 1..=MAX_ATTEMPTS {
            match self.broker.submit_order(order).await {
                Ok(report) => return Ok(report),
                Err(err) if err.kind == ErrorKind::Network && attempt < MAX_ATTEMPTS => {
                    warn!(
                        order_id = %order.order_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "broker transport failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }

    /// Best-effort persistence; failures are logged, never fatal mid-session
    async fn persist_state(&self, ts: Ts) {
        let Some(database) = &self.database else {
            return;
        };
        let positions: Vec<Position> = self.manager.positions().values().cloned().collect();
        if let Err(err) = database
            .store_positions(&positions, self.manager.id(), &self.config.positions_table)
            .await
        {
            warn!(error = %err, "failed to persist live positions");
        }
        for (strategy_id, signals) in self.manager.strategy_signals() {
            if signals.is_empty() {
                continue;
            }
            if let Err(err) = database
                .store_signals(&signals, &strategy_id, ts, &self.config.signals_table)
                .await
            {
                warn!(error = %err, "failed to persist live signals");
            }
        }
    }
}
