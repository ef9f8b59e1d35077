//! Volatility and forecast primitives
//!
//! Incremental building blocks shared by the strategies: exponential
//! moving averages, EMA crossovers, blended rolling volatility and the
//! forecast scaling pipeline. Everything here is plain `f64`; fixed-point
//! values are converted once at the strategy boundary.

pub mod ema;
pub mod forecast;
pub mod volatility;

pub use ema::{Ema, Emac};
pub use forecast::{combine_forecasts, raw_forecast, ForecastScaler, FORECAST_CAP};
pub use volatility::{rolling_stdev, BlendedVol};
