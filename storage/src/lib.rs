//! Persistence interfaces
//!
//! The engine consumes an abstract async [`Database`] handle; the
//! concrete relational implementation lives outside this workspace. An
//! in-memory implementation backs tests and backtests, and a fixed-size
//! permit pool bounds concurrent handle use with RAII release on every
//! exit path.

pub mod frame;
pub mod memory;
pub mod pool;
pub mod run_id;

pub use frame::{ColumnData, MarketFrame};
pub use memory::MemoryDatabase;
pub use pool::{HandlePool, PooledHandle};
pub use run_id::generate_run_id;

use async_trait::async_trait;
use common::{AssetClass, DataFrequency, EquityPoint, ExecutionReport, Position, Result, Ts};
use rustc_hash::FxHashMap;

/// Abstract persistence handle
///
/// Every operation returns a typed `Result`; implementations never panic
/// across this boundary.
#[async_trait]
pub trait Database: Send + Sync {
    /// Persist live strategy positions
    async fn store_positions(
        &self,
        positions: &[Position],
        strategy_id: &str,
        table: &str,
    ) -> Result<()>;

    /// Persist execution reports
    async fn store_executions(&self, executions: &[ExecutionReport], table: &str) -> Result<()>;

    /// Persist per-symbol signals for a strategy at a timestamp
    async fn store_signals(
        &self,
        signals: &FxHashMap<String, f64>,
        strategy_id: &str,
        timestamp: Ts,
        table: &str,
    ) -> Result<()>;

    /// Persist a backtest summary row
    async fn store_backtest_summary(
        &self,
        run_id: &str,
        start: Ts,
        end: Ts,
        metrics: &FxHashMap<String, f64>,
        table: &str,
    ) -> Result<()>;

    /// Persist a batch of equity curve points for a run
    async fn store_backtest_equity_curve_batch(
        &self,
        run_id: &str,
        points: &[EquityPoint],
        table: &str,
    ) -> Result<()>;

    /// Persist end-of-group backtest positions
    async fn store_backtest_positions(
        &self,
        positions: &[Position],
        run_id: &str,
        table: &str,
    ) -> Result<()>;

    /// Persist run metadata (name, window, hyperparameters)
    async fn store_backtest_metadata(
        &self,
        run_id: &str,
        name: &str,
        description: &str,
        start: Ts,
        end: Ts,
        hyperparams: &serde_json::Value,
        table: &str,
    ) -> Result<()>;

    /// Load market data as a columnar frame
    async fn get_market_data(
        &self,
        symbols: &[String],
        start: Ts,
        end: Ts,
        asset_class: AssetClass,
        freq: DataFrequency,
    ) -> Result<MarketFrame>;

    /// Symbols available for an asset class and frequency
    async fn get_symbols(&self, asset_class: AssetClass, freq: DataFrequency)
    -> Result<Vec<String>>;

    /// Diagnostic read-only query
    async fn execute_query(&self, sql: &str) -> Result<MarketFrame>;
}
