//! Shared foundation for the trading engine workspace
//!
//! - Core market types (`Bar`, `Order`, `ExecutionReport`, `Position`)
//! - Fixed-point price/quantity types (`Px`, `Qty`) and nanosecond `Ts`
//! - The typed error taxonomy used at every fallible boundary
//! - Instrument metadata registry
//! - Configuration types for strategies, portfolio, risk and backtests

pub mod config;
pub mod error;
pub mod instruments;
pub mod types;

pub use config::{
    BacktestConfig, FillPricing, OptimizerConfig, PortfolioConfig, RiskConfig, RiskLimits,
    StrategyConfig,
};
pub use error::{EngineError, ErrorKind, Result};
pub use instruments::{Instrument, InstrumentRegistry};
pub use types::{
    AssetClass, Bar, DataFrequency, EquityPoint, ExecutionReport, Order, OrderType, PnlAccounting,
    Position, Px, Qty, Side, TimeInForce, Ts,
};
