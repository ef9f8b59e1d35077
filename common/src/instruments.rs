//! Instrument metadata registry
//!
//! Read-mostly map from root symbol to contract metadata, loaded once at
//! startup and threaded through constructors as an owned handle. A lookup
//! miss at execution time is fatal: a misconfigured instrument must never
//! trade with an implied multiplier of 1.

use crate::error::{EngineError, Result};
use crate::types::{AssetClass, Ts};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Contract metadata for a tradeable instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub multiplier: f64,
    pub tick_size: f64,
    pub point_value: f64,
    pub expiry: Option<Ts>,
}

impl Instrument {
    /// Futures contract without expiry metadata
    #[must_use]
    pub fn futures(symbol: &str, multiplier: f64, tick_size: f64, point_value: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            asset_class: AssetClass::Futures,
            multiplier,
            tick_size,
            point_value,
            expiry: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(EngineError::invalid_argument("registry", "empty symbol"));
        }
        if self.multiplier <= 0.0 || self.tick_size <= 0.0 || self.point_value <= 0.0 {
            return Err(EngineError::invalid_argument(
                "registry",
                format!("{}: multiplier, tick size and point value must be positive", self.symbol),
            ));
        }
        Ok(())
    }
}

/// Strip a contract version suffix, e.g. `ES.v.0` -> `ES`
#[must_use]
pub fn root_symbol(symbol: &str) -> &str {
    symbol.split('.').next().unwrap_or(symbol)
}

/// Process-wide instrument registry
///
/// Writes only happen during load; lookups are lock-free reads.
#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    instruments: DashMap<String, Instrument>,
}

impl InstrumentRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the default futures universe
    #[must_use]
    pub fn with_default_futures() -> Self {
        let registry = Self::new();
        for inst in default_futures_universe() {
            // Defaults are statically valid
            let _ = registry.register(inst);
        }
        registry
    }

    /// Register or replace an instrument
    pub fn register(&self, instrument: Instrument) -> Result<()> {
        instrument.validate()?;
        self.instruments.insert(instrument.symbol.clone(), instrument);
        Ok(())
    }

    /// Bulk load
    pub fn load(&self, instruments: impl IntoIterator<Item = Instrument>) -> Result<()> {
        for inst in instruments {
            self.register(inst)?;
        }
        Ok(())
    }

    /// Look up by symbol, stripping any version suffix
    pub fn lookup(&self, symbol: &str) -> Result<Instrument> {
        let root = root_symbol(symbol);
        self.instruments
            .get(root)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::unknown_instrument("registry", symbol))
    }

    /// True when the (root) symbol is registered
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.instruments.contains_key(root_symbol(symbol))
    }

    /// Number of registered instruments
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// True when no instruments are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

/// Default futures universe: index, energy, metals, rates, grains, FX
fn default_futures_universe() -> Vec<Instrument> {
    vec![
        Instrument::futures("ES", 50.0, 0.25, 50.0),
        Instrument::futures("NQ", 20.0, 0.25, 20.0),
        Instrument::futures("RTY", 50.0, 0.10, 50.0),
        Instrument::futures("YM", 5.0, 1.0, 5.0),
        Instrument::futures("CL", 1000.0, 0.01, 1000.0),
        Instrument::futures("NG", 10000.0, 0.001, 10000.0),
        Instrument::futures("GC", 100.0, 0.10, 100.0),
        Instrument::futures("SI", 5000.0, 0.005, 5000.0),
        Instrument::futures("ZN", 1000.0, 0.015625, 1000.0),
        Instrument::futures("ZB", 1000.0, 0.03125, 1000.0),
        Instrument::futures("ZC", 50.0, 0.25, 50.0),
        Instrument::futures("ZS", 50.0, 0.25, 50.0),
        Instrument::futures("ZW", 50.0, 0.25, 50.0),
        Instrument::futures("6E", 125000.0, 0.00005, 125000.0),
        Instrument::futures("6B", 62500.0, 0.0001, 62500.0),
        Instrument::futures("6J", 12500000.0, 0.0000005, 12500000.0),
        Instrument::futures("6A", 100000.0, 0.0001, 100000.0),
        Instrument::futures("6C", 100000.0, 0.0001, 100000.0),
        Instrument::futures("6M", 500000.0, 0.00001, 500000.0),
        Instrument::futures("6N", 100000.0, 0.0001, 100000.0),
    ]
}
