//! Core market types for the trading engine
//!
//! Prices and quantities are fixed-point (`i64` with 8 fractional digits)
//! so PnL arithmetic is deterministic; statistics that feed signals are
//! computed in `f64` after a single boundary conversion.

use crate::error::{EngineError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point scale: 8 fractional digits
pub const SCALE_8: i64 = 100_000_000;

/// Price type (stored as i64 with 8 decimal places)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Px(i64);

impl Px {
    /// Zero price
    pub const ZERO: Self = Self(0);

    /// Create from f64 at the system boundary
    #[must_use]
    pub fn new(value: f64) -> Self {
        let scaled = (value * SCALE_8 as f64).round();
        if scaled >= i64::MAX as f64 {
            Self(i64::MAX)
        } else if scaled <= i64::MIN as f64 {
            Self(i64::MIN)
        } else {
            Self(scaled as i64)
        }
    }

    /// Create from raw fixed-point units
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw fixed-point units
    #[must_use]
    pub const fn raw(&self) -> i64 {
        self.0
    }

    /// Convert to f64 for statistics and external APIs
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / SCALE_8 as f64
    }

    /// True when the price is strictly positive
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / SCALE_8;
        let frac = (self.0 % SCALE_8).abs();
        write!(f, "{whole}.{frac:08}")
    }
}

impl std::ops::Add for Px {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl std::ops::Sub for Px {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

/// Quantity type for orders and positions (i64 with 8 decimal places)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Qty(i64);

impl Qty {
    /// Zero quantity
    pub const ZERO: Self = Self(0);

    /// Create from f64 at the system boundary
    #[must_use]
    pub fn new(value: f64) -> Self {
        let scaled = (value * SCALE_8 as f64).round();
        if scaled >= i64::MAX as f64 {
            Self(i64::MAX)
        } else if scaled <= i64::MIN as f64 {
            Self(i64::MIN)
        } else {
            Self(scaled as i64)
        }
    }

    /// Create from whole contracts
    #[must_use]
    pub const fn from_contracts(contracts: i64) -> Self {
        Self(contracts * SCALE_8)
    }

    /// Create from raw fixed-point units
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw fixed-point units
    #[must_use]
    pub const fn raw(&self) -> i64 {
        self.0
    }

    /// Convert to f64 for statistics and external APIs
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / SCALE_8 as f64
    }

    /// Check if quantity is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Absolute value
    #[must_use]
    pub const fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Sign as -1, 0 or +1
    #[must_use]
    pub const fn signum(&self) -> i64 {
        self.0.signum()
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / SCALE_8;
        let frac = (self.0 % SCALE_8).abs();
        write!(f, "{whole}.{frac:08}")
    }
}

impl std::ops::Add for Qty {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl std::ops::Sub for Qty {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

impl std::ops::Neg for Qty {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

/// Timestamp in nanoseconds since UNIX epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ts(pub u64);

impl Ts {
    /// Current wall-clock timestamp
    #[must_use]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        let nanos = duration.as_secs() * 1_000_000_000 + u64::from(duration.subsec_nanos());
        Self(nanos)
    }

    /// Create timestamp from nanoseconds
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create timestamp from milliseconds
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Get timestamp as nanoseconds
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Get timestamp as milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// True for the default (unset) timestamp
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Convert to a chrono UTC datetime
    #[must_use]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = (self.0 / 1_000_000_000) as i64;
        let nanos = (self.0 % 1_000_000_000) as u32;
        Utc.timestamp_opt(secs, nanos)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
    }

    /// Convert from a chrono UTC datetime
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let nanos = dt.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        Self(nanos)
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Trading side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
    /// Undefined / flat
    None,
}

impl Side {
    /// Side implied by a signed quantity
    #[must_use]
    pub fn from_qty(qty: Qty) -> Self {
        match qty.signum() {
            1 => Self::Buy,
            -1 => Self::Sell,
            _ => Self::None,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

/// Asset class of an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    Futures,
    Equities,
    FixedIncome,
    Currencies,
    Commodities,
    Crypto,
}

impl AssetClass {
    /// Database schema name for this asset class
    #[must_use]
    pub const fn schema_name(&self) -> &'static str {
        match self {
            Self::Futures => "futures_data",
            Self::Equities => "equities_data",
            Self::FixedIncome => "fixed_income_data",
            Self::Currencies => "currencies_data",
            Self::Commodities => "commodities_data",
            Self::Crypto => "crypto_data",
        }
    }
}

/// Bar frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFrequency {
    Daily,
    Hourly,
    Minute15,
    Minute5,
    Minute1,
}

impl DataFrequency {
    /// Table suffix used by the market data schema
    #[must_use]
    pub const fn table_suffix(&self) -> &'static str {
        match self {
            Self::Daily => "1d",
            Self::Hourly => "1h",
            Self::Minute15 => "15m",
            Self::Minute5 => "5m",
            Self::Minute1 => "1m",
        }
    }
}

/// Full market data table name, e.g. `futures_data.ohlcv_1d`
#[must_use]
pub fn table_name(asset_class: AssetClass, data_type: &str, freq: DataFrequency) -> String {
    format!(
        "{}.{}_{}",
        asset_class.schema_name(),
        data_type,
        freq.table_suffix()
    )
}

/// OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: Ts,
    pub open: Px,
    pub high: Px,
    pub low: Px,
    pub close: Px,
    pub volume: f64,
}

impl Bar {
    /// Validate OHLCV consistency
    ///
    /// Enforced before any strategy state mutation: non-empty symbol,
    /// non-zero timestamp, positive prices, `high >= max(open, close)`,
    /// `low <= min(open, close)`, non-negative volume.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::invalid_data("bar", msg));

        if self.symbol.is_empty() {
            return fail("empty symbol".to_string());
        }
        if self.timestamp.is_zero() {
            return fail(format!("{}: zero timestamp", self.symbol));
        }
        if !self.open.is_positive()
            || !self.high.is_positive()
            || !self.low.is_positive()
            || !self.close.is_positive()
        {
            return fail(format!("{}: non-positive price field", self.symbol));
        }
        if self.high < self.open || self.high < self.close {
            return fail(format!("{}: high below open/close", self.symbol));
        }
        if self.low > self.open || self.low > self.close {
            return fail(format!("{}: low above open/close", self.symbol));
        }
        if self.volume < 0.0 {
            return fail(format!("{}: negative volume", self.symbol));
        }
        Ok(())
    }
}

/// Trading order, immutable after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Qty,
    pub price: Px,
    pub time_in_force: TimeInForce,
    pub strategy_id: String,
    pub timestamp: Ts,
}

/// Fill or partial fill of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: String,
    pub exec_id: String,
    pub symbol: String,
    pub side: Side,
    pub filled_qty: Qty,
    pub fill_price: Px,
    pub fill_time: Ts,
    pub commission: f64,
    pub is_partial: bool,
}

/// PnL accounting method
///
/// Cash equities realize PnL only on closes; futures are marked to market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PnlAccounting {
    RealizedOnly,
    MarkToMarket,
}

/// Position in a single instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Qty,
    pub average_price: Px,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub last_update: Ts,
}

impl Position {
    /// New flat position
    #[must_use]
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Qty::ZERO,
            average_price: Px::ZERO,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            last_update: Ts::default(),
        }
    }

    /// True when quantity is non-zero
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.quantity.is_zero()
    }

    /// Side of the open position
    #[must_use]
    pub fn side(&self) -> Side {
        Side::from_qty(self.quantity)
    }

    /// Apply a fill to the position
    ///
    /// Realized PnL is recognized on the closed portion:
    /// `(fill - avg) * closed_qty * multiplier - commission`. A direction
    /// flip resets `average_price` to the fill price for the remainder; a
    /// full close zeroes unrealized PnL and freezes realized PnL.
    pub fn apply_fill(
        &mut self,
        side: Side,
        qty: Qty,
        price: Px,
        multiplier: f64,
        commission: f64,
        ts: Ts,
    ) -> Result<()> {
        if qty.raw() <= 0 {
            return Err(EngineError::invalid_data(
                "position",
                format!("{}: non-positive fill quantity {qty}", self.symbol),
            ));
        }
        if !price.is_positive() {
            return Err(EngineError::invalid_data(
                "position",
                format!("{}: non-positive fill price {price}", self.symbol),
            ));
        }

        let delta = match side {
            Side::Buy => qty.raw(),
            Side::Sell => -qty.raw(),
            Side::None => {
                return Err(EngineError::invalid_data(
                    "position",
                    format!("{}: fill with side None", self.symbol),
                ));
            }
        };

        let old_qty = self.quantity.raw();
        let new_qty = old_qty + delta;

        if old_qty == 0 || old_qty.signum() == delta.signum() {
            // Opening or adding: volume-weighted average entry price
            let old_abs = old_qty.unsigned_abs() as i128;
            let add_abs = delta.unsigned_abs() as i128;
            let total = old_abs + add_abs;
            let blended = (self.average_price.raw() as i128 * old_abs
                + price.raw() as i128 * add_abs)
                / total;
            self.average_price = Px::from_raw(blended as i64);
        } else {
            // Closing some or all of the position, possibly flipping
            let closed_raw = old_qty.abs().min(delta.abs());
            let closed = closed_raw as f64 / SCALE_8 as f64;
            let px_diff = (price.raw() - self.average_price.raw()) as f64 / SCALE_8 as f64;
            let direction = old_qty.signum() as f64;
            self.realized_pnl += px_diff * closed * multiplier * direction;

            if new_qty == 0 {
                self.average_price = Px::ZERO;
                self.unrealized_pnl = 0.0;
            } else if new_qty.signum() != old_qty.signum() {
                // Flip: remaining quantity carries the fill price
                self.average_price = price;
            }
        }

        self.realized_pnl -= commission;
        self.quantity = Qty::from_raw(new_qty);
        self.last_update = ts;
        Ok(())
    }

    /// Mark the position to a price, refreshing unrealized PnL
    pub fn mark(&mut self, price: Px, multiplier: f64, ts: Ts) {
        if self.quantity.is_zero() {
            self.unrealized_pnl = 0.0;
        } else {
            let px_diff = (price.raw() - self.average_price.raw()) as f64 / SCALE_8 as f64;
            self.unrealized_pnl = px_diff * self.quantity.as_f64() * multiplier;
        }
        self.last_update = ts;
    }
}

/// One point of an equity curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: Ts,
    pub equity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bar(symbol: &str) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: Ts::from_millis(1_700_000_000_000),
            open: Px::new(100.0),
            high: Px::new(101.0),
            low: Px::new(99.0),
            close: Px::new(100.5),
            volume: 1000.0,
        }
    }

    #[test]
    fn px_roundtrip() {
        let px = Px::new(4123.25);
        assert_relative_eq!(px.as_f64(), 4123.25);
        assert_eq!(px, Px::from_raw(px.raw()));
    }

    #[test]
    fn px_qty_serde_json() {
        let px = Px::new(0.015625);
        let encoded = serde_json::to_string(&px).unwrap();
        let decoded: Px = serde_json::from_str(&encoded).unwrap();
        assert_eq!(px, decoded);

        let qty = Qty::from_contracts(-7);
        let encoded = serde_json::to_string(&qty).unwrap();
        let decoded: Qty = serde_json::from_str(&encoded).unwrap();
        assert_eq!(qty, decoded);
    }

    #[test]
    fn ts_datetime_roundtrip() {
        let ts = Ts::from_millis(1_700_000_123_456);
        assert_eq!(Ts::from_datetime(ts.to_datetime()), ts);
    }

    #[test]
    fn valid_bar_passes() {
        assert!(bar("ES").validate().is_ok());
    }

    #[test]
    fn bar_high_below_close_fails() {
        let mut b = bar("ES");
        b.high = Px::new(100.2);
        b.close = Px::new(100.5);
        assert!(b.validate().is_err());
    }

    #[test]
    fn bar_low_above_open_fails() {
        let mut b = bar("ES");
        b.low = Px::new(100.3);
        assert!(b.validate().is_err());
    }

    #[test]
    fn bar_zero_timestamp_fails() {
        let mut b = bar("ES");
        b.timestamp = Ts::default();
        assert!(b.validate().is_err());
    }

    #[test]
    fn bar_negative_volume_fails() {
        let mut b = bar("ES");
        b.volume = -1.0;
        assert!(b.validate().is_err());
    }

    #[test]
    fn bar_empty_symbol_fails() {
        assert!(bar("").validate().is_err());
    }

    #[test]
    fn position_open_and_close_realizes_pnl() {
        let mut pos = Position::flat("ES");
        pos.apply_fill(Side::Buy, Qty::from_contracts(2), Px::new(4000.0), 50.0, 3.5, Ts::now())
            .unwrap();
        assert_eq!(pos.quantity, Qty::from_contracts(2));
        assert_relative_eq!(pos.average_price.as_f64(), 4000.0);
        assert_relative_eq!(pos.realized_pnl, -3.5);

        pos.apply_fill(Side::Sell, Qty::from_contracts(2), Px::new(4010.0), 50.0, 3.5, Ts::now())
            .unwrap();
        assert!(!pos.is_open());
        // 10 points * 2 contracts * 50 point value, minus both commissions
        assert_relative_eq!(pos.realized_pnl, 10.0 * 2.0 * 50.0 - 7.0);
        assert_relative_eq!(pos.unrealized_pnl, 0.0);
    }

    #[test]
    fn position_flip_resets_average_price() {
        let mut pos = Position::flat("CL");
        pos.apply_fill(Side::Buy, Qty::from_contracts(1), Px::new(70.0), 1000.0, 0.0, Ts::now())
            .unwrap();
        pos.apply_fill(Side::Sell, Qty::from_contracts(3), Px::new(72.0), 1000.0, 0.0, Ts::now())
            .unwrap();
        assert_eq!(pos.quantity, Qty::from_contracts(-2));
        assert_relative_eq!(pos.average_price.as_f64(), 72.0);
        assert_relative_eq!(pos.realized_pnl, 2.0 * 1.0 * 1000.0);
    }

    #[test]
    fn position_add_blends_average_price() {
        let mut pos = Position::flat("GC");
        pos.apply_fill(Side::Buy, Qty::from_contracts(1), Px::new(2000.0), 100.0, 0.0, Ts::now())
            .unwrap();
        pos.apply_fill(Side::Buy, Qty::from_contracts(1), Px::new(2010.0), 100.0, 0.0, Ts::now())
            .unwrap();
        assert_relative_eq!(pos.average_price.as_f64(), 2005.0);
    }

    #[test]
    fn mark_updates_unrealized() {
        let mut pos = Position::flat("ES");
        pos.apply_fill(Side::Sell, Qty::from_contracts(2), Px::new(4000.0), 50.0, 0.0, Ts::now())
            .unwrap();
        pos.mark(Px::new(3990.0), 50.0, Ts::now());
        // Short 2 contracts, price down 10 points
        assert_relative_eq!(pos.unrealized_pnl, 10.0 * 2.0 * 50.0);
    }
}
