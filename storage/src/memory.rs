//! In-memory database
//!
//! Backs tests and the backtest engine's default persistence sink.
//! Mirrors the relational schema closely enough that round-trip laws can
//! be exercised without a server.

use crate::frame::{ColumnData, MarketFrame};
use crate::Database;
use async_trait::async_trait;
use common::{
    AssetClass, Bar, DataFrequency, EngineError, EquityPoint, ExecutionReport, Position, Result,
    Ts,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::debug;

type SymbolBars = FxHashMap<String, BTreeMap<Ts, Bar>>;

#[derive(Default)]
struct Tables {
    positions: Vec<(String, String, Position)>,
    executions: Vec<(String, ExecutionReport)>,
    signals: Vec<(String, Ts, FxHashMap<String, f64>)>,
    summaries: FxHashMap<String, FxHashMap<String, f64>>,
    equity_curves: FxHashMap<String, Vec<EquityPoint>>,
    backtest_positions: FxHashMap<String, Vec<Position>>,
    metadata: FxHashMap<String, serde_json::Value>,
}

/// In-memory database with a connect gate
pub struct MemoryDatabase {
    connected: RwLock<bool>,
    market_data: RwLock<FxHashMap<(AssetClass, DataFrequency), SymbolBars>>,
    tables: RwLock<Tables>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: RwLock::new(false),
            market_data: RwLock::new(FxHashMap::default()),
            tables: RwLock::new(Tables::default()),
        }
    }

    /// A database that is already connected
    #[must_use]
    pub fn connected() -> Self {
        let database = Self::new();
        database.connect();
        database
    }

    pub fn connect(&self) {
        *self.connected.write() = true;
    }

    pub fn disconnect(&self) {
        *self.connected.write() = false;
    }

    fn require_connected(&self) -> Result<()> {
        if !*self.connected.read() {
            return Err(EngineError::not_connected(
                "memory_db",
                "operation before connect",
            ));
        }
        Ok(())
    }

    /// Seed market data for later reads
    pub fn load_bars(&self, asset_class: AssetClass, freq: DataFrequency, bars: &[Bar]) {
        let mut data = self.market_data.write();
        let per_symbol = data.entry((asset_class, freq)).or_default();
        for bar in bars {
            per_symbol
                .entry(bar.symbol.clone())
                .or_default()
                .insert(bar.timestamp, bar.clone());
        }
    }

    /// Stored equity curve for a run, in insertion order
    #[must_use]
    pub fn equity_curve(&self, run_id: &str) -> Vec<EquityPoint> {
        self.tables
            .read()
            .equity_curves
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored summary metrics for a run
    #[must_use]
    pub fn summary(&self, run_id: &str) -> Option<FxHashMap<String, f64>> {
        self.tables.read().summaries.get(run_id).cloned()
    }

    /// Stored metadata for a run
    #[must_use]
    pub fn metadata(&self, run_id: &str) -> Option<serde_json::Value> {
        self.tables.read().metadata.get(run_id).cloned()
    }

    /// Number of stored execution rows
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.tables.read().executions.len()
    }

    /// Number of stored signal rows
    #[must_use]
    pub fn signal_count(&self) -> usize {
        self.tables.read().signals.len()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn store_positions(
        &self,
        positions: &[Position],
        strategy_id: &str,
        table: &str,
    ) -> Result<()> {
        self.require_connected()?;
        let mut tables = self.tables.write();
        for position in positions {
            tables
                .positions
                .push((table.to_string(), strategy_id.to_string(), position.clone()));
        }
        Ok(())
    }

    async fn store_executions(&self, executions: &[ExecutionReport], table: &str) -> Result<()> {
        self.require_connected()?;
        let mut tables = self.tables.write();
        for execution in executions {
            tables.executions.push((table.to_string(), execution.clone()));
        }
        Ok(())
    }

    async fn store_signals(
        &self,
        signals: &FxHashMap<String, f64>,
        strategy_id: &str,
        timestamp: Ts,
        _table: &str,
    ) -> Result<()> {
        self.require_connected()?;
        self.tables
            .write()
            .signals
            .push((strategy_id.to_string(), timestamp, signals.clone()));
        Ok(())
    }

    async fn store_backtest_summary(
        &self,
        run_id: &str,
        _start: Ts,
        _end: Ts,
        metrics: &FxHashMap<String, f64>,
        _table: &str,
    ) -> Result<()> {
        self.require_connected()?;
        self.tables
            .write()
            .summaries
            .insert(run_id.to_string(), metrics.clone());
        Ok(())
    }

    async fn store_backtest_equity_curve_batch(
        &self,
        run_id: &str,
        points: &[EquityPoint],
        _table: &str,
    ) -> Result<()> {
        self.require_connected()?;
        self.tables
            .write()
            .equity_curves
            .entry(run_id.to_string())
            .or_default()
            .extend_from_slice(points);
        Ok(())
    }

    async fn store_backtest_positions(
        &self,
        positions: &[Position],
        run_id: &str,
        _table: &str,
    ) -> Result<()> {
        self.require_connected()?;
        self.tables
            .write()
            .backtest_positions
            .entry(run_id.to_string())
            .or_default()
            .extend_from_slice(positions);
        Ok(())
    }

    async fn store_backtest_metadata(
        &self,
        run_id: &str,
        name: &str,
        description: &str,
        start: Ts,
        end: Ts,
        hyperparams: &serde_json::Value,
        _table: &str,
    ) -> Result<()> {
        self.require_connected()?;
        let record = serde_json::json!({
            "name": name,
            "description": description,
            "start": start.as_nanos(),
            "end": end.as_nanos(),
            "hyperparams": hyperparams,
        });
        self.tables.write().metadata.insert(run_id.to_string(), record);
        Ok(())
    }

    async fn get_market_data(
        &self,
        symbols: &[String],
        start: Ts,
        end: Ts,
        asset_class: AssetClass,
        freq: DataFrequency,
    ) -> Result<MarketFrame> {
        self.require_connected()?;
        let data = self.market_data.read();
        let Some(per_symbol) = data.get(&(asset_class, freq)) else {
            return Ok(MarketFrame::new());
        };

        let mut bars: Vec<Bar> = Vec::new();
        for symbol in symbols {
            if let Some(series) = per_symbol.get(symbol) {
                bars.extend(series.range(start..=end).map(|(_, bar)| bar.clone()));
            }
        }
        bars.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        debug!(rows = bars.len(), "market data read");
        Ok(MarketFrame::from_bars(&bars))
    }

    async fn get_symbols(
        &self,
        asset_class: AssetClass,
        freq: DataFrequency,
    ) -> Result<Vec<String>> {
        self.require_connected()?;
        let data = self.market_data.read();
        let mut symbols: Vec<String> = data
            .get(&(asset_class, freq))
            .map(|per_symbol| per_symbol.keys().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        Ok(symbols)
    }

    async fn execute_query(&self, sql: &str) -> Result<MarketFrame> {
        self.require_connected()?;
        // Diagnostic surface only; the in-memory backend has no SQL engine
        let mut frame = MarketFrame::new();
        frame.add_column("query", ColumnData::Str(vec![sql.to_string()]))?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Px;

    fn bar(symbol: &str, millis: u64, close: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: Ts::from_millis(millis),
            open: Px::new(close),
            high: Px::new(close + 1.0),
            low: Px::new(close - 1.0),
            close: Px::new(close),
            volume: 500.0,
        }
    }

    #[tokio::test]
    async fn not_connected_is_fatal() {
        let database = MemoryDatabase::new();
        let err = database
            .get_symbols(AssetClass::Futures, DataFrequency::Daily)
            .await
            .unwrap_err();
        assert_eq!(err.kind, common::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn market_data_window_read() {
        let database = MemoryDatabase::connected();
        database.load_bars(
            AssetClass::Futures,
            DataFrequency::Daily,
            &[bar("ES", 1, 4000.0), bar("ES", 2, 4001.0), bar("ES", 3, 4002.0)],
        );
        let frame = database
            .get_market_data(
                &["ES".to_string()],
                Ts::from_millis(2),
                Ts::from_millis(3),
                AssetClass::Futures,
                DataFrequency::Daily,
            )
            .await
            .unwrap();
        assert_eq!(frame.rows(), 2);
    }

    #[tokio::test]
    async fn equity_curve_roundtrip() {
        let database = MemoryDatabase::connected();
        let points: Vec<EquityPoint> = (1..=5)
            .map(|i| EquityPoint {
                timestamp: Ts::from_millis(i),
                equity: 1_000_000.0 + i as f64,
            })
            .collect();
        database
            .store_backtest_equity_curve_batch("run_1", &points[..3], "equity")
            .await
            .unwrap();
        database
            .store_backtest_equity_curve_batch("run_1", &points[3..], "equity")
            .await
            .unwrap();
        assert_eq!(database.equity_curve("run_1"), points);
    }

    #[tokio::test]
    async fn symbols_are_sorted() {
        let database = MemoryDatabase::connected();
        database.load_bars(
            AssetClass::Futures,
            DataFrequency::Daily,
            &[bar("NQ", 1, 15000.0), bar("ES", 1, 4000.0)],
        );
        let symbols = database
            .get_symbols(AssetClass::Futures, DataFrequency::Daily)
            .await
            .unwrap();
        assert_eq!(symbols, vec!["ES".to_string(), "NQ".to_string()]);
    }
}
