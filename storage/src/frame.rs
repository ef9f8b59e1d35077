//! Columnar result table
//!
//! Minimal column-oriented frame returned by market data reads and
//! diagnostic queries.

use common::{Bar, EngineError, Px, Result, Ts};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Str(Vec<String>),
    F64(Vec<f64>),
    Ts(Vec<Ts>),
}

impl ColumnData {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Str(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Ts(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Column-oriented table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketFrame {
    columns: FxHashMap<String, ColumnData>,
    rows: usize,
}

impl MarketFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column names, sorted
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Add a column; all columns must have equal length
    pub fn add_column(&mut self, name: &str, data: ColumnData) -> Result<()> {
        if !self.columns.is_empty() && data.len() != self.rows {
            return Err(EngineError::invalid_data(
                "market_frame",
                format!(
                    "column '{name}' has {} rows, frame has {}",
                    data.len(),
                    self.rows
                ),
            ));
        }
        self.rows = data.len();
        self.columns.insert(name.to_string(), data);
        Ok(())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.get(name)
    }

    /// Build the standard OHLCV frame from bars
    #[must_use]
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut frame = Self::new();
        let _ = frame.add_column(
            "symbol",
            ColumnData::Str(bars.iter().map(|b| b.symbol.clone()).collect()),
        );
        let _ = frame.add_column(
            "timestamp",
            ColumnData::Ts(bars.iter().map(|b| b.timestamp).collect()),
        );
        for (name, get) in [
            ("open", (|b: &Bar| b.open.as_f64()) as fn(&Bar) -> f64),
            ("high", |b: &Bar| b.high.as_f64()),
            ("low", |b: &Bar| b.low.as_f64()),
            ("close", |b: &Bar| b.close.as_f64()),
            ("volume", |b: &Bar| b.volume),
        ] {
            let _ = frame.add_column(name, ColumnData::F64(bars.iter().map(get).collect()));
        }
        frame
    }

    /// Reconstruct bars from a standard OHLCV frame
    pub fn to_bars(&self) -> Result<Vec<Bar>> {
        let missing =
            |name: &str| EngineError::invalid_data("market_frame", format!("missing column {name}"));
        let Some(ColumnData::Str(symbols)) = self.column("symbol") else {
            return Err(missing("symbol"));
        };
        let Some(ColumnData::Ts(timestamps)) = self.column("timestamp") else {
            return Err(missing("timestamp"));
        };
        let f64_col = |name: &str| -> Result<&Vec<f64>> {
            match self.column(name) {
                Some(ColumnData::F64(v)) => Ok(v),
                _ => Err(missing(name)),
            }
        };
        let open = f64_col("open")?;
        let high = f64_col("high")?;
        let low = f64_col("low")?;
        let close = f64_col("close")?;
        let volume = f64_col("volume")?;

        Ok((0..self.rows)
            .map(|i| Bar {
                symbol: symbols[i].clone(),
                timestamp: timestamps[i],
                open: Px::new(open[i]),
                high: Px::new(high[i]),
                low: Px::new(low[i]),
                close: Px::new(close[i]),
                volume: volume[i],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(symbol: &str, millis: u64, close: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: Ts::from_millis(millis),
            open: Px::new(close),
            high: Px::new(close + 1.0),
            low: Px::new(close - 1.0),
            close: Px::new(close),
            volume: 1000.0,
        }
    }

    #[test]
    fn bars_roundtrip() {
        let bars = vec![bar("ES", 1, 4000.0), bar("NQ", 2, 15000.0)];
        let frame = MarketFrame::from_bars(&bars);
        assert_eq!(frame.rows(), 2);
        assert_eq!(frame.to_bars().unwrap(), bars);
    }

    #[test]
    fn mismatched_column_length_rejected() {
        let mut frame = MarketFrame::new();
        frame.add_column("a", ColumnData::F64(vec![1.0, 2.0])).unwrap();
        let err = frame.add_column("b", ColumnData::F64(vec![1.0])).unwrap_err();
        assert_eq!(err.kind, common::ErrorKind::InvalidData);
    }
}
