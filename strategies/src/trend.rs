//! Trend following strategy
//!
//! Multi-span EMAC ensemble combined into a single forecast, sized to an
//! annualized risk target against blended volatility, with a no-trade
//! buffer band around the ideal position to suppress churn.

use crate::core::StrategyCore;
use crate::{InstrumentView, Strategy};
use common::{Bar, EngineError, PnlAccounting, Result, StrategyConfig};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use signals::{combine_forecasts, raw_forecast, BlendedVol, Emac, ForecastScaler};
use tracing::debug;

/// Trend following configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendFollowingConfig {
    /// (short_span, long_span) EMAC pairs
    pub ema_windows: Vec<(usize, usize)>,
    pub vol_lookback_short: usize,
    pub vol_lookback_long: usize,
    /// Annualized volatility target
    pub risk_target: f64,
    /// Instrument diversification multiplier
    pub idm: f64,
    /// Fraction of capital assigned to each instrument
    pub weight: f64,
    /// Forecast diversification multiplier by active pair count
    pub fdm: FxHashMap<usize, f64>,
    pub buffer_fraction: f64,
    /// Currency conversion
    pub fx: f64,
    pub use_position_buffering: bool,
}

impl Default for TrendFollowingConfig {
    fn default() -> Self {
        Self {
            ema_windows: vec![(2, 8), (4, 16), (8, 32), (16, 64), (32, 128), (64, 256)],
            vol_lookback_short: 32,
            vol_lookback_long: 252,
            risk_target: 0.20,
            idm: 2.5,
            weight: 1.0,
            fdm: [(1, 1.0), (2, 1.03), (3, 1.08), (4, 1.13), (5, 1.19), (6, 1.26)]
                .into_iter()
                .collect(),
            buffer_fraction: 0.10,
            fx: 1.0,
            use_position_buffering: true,
        }
    }
}

impl TrendFollowingConfig {
    fn validate(&self) -> Result<()> {
        let component = "trend_following";
        if self.ema_windows.is_empty() {
            return Err(EngineError::invalid_argument(component, "no EMA window pairs"));
        }
        for (short, long) in &self.ema_windows {
            if short >= long || *short == 0 {
                return Err(EngineError::invalid_argument(
                    component,
                    format!("invalid EMA pair ({short}, {long})"),
                ));
            }
        }
        if self.risk_target <= 0.0 || self.risk_target > 1.0 {
            return Err(EngineError::invalid_argument(
                component,
                "risk_target must be in (0, 1]",
            ));
        }
        if self.idm <= 0.0 || self.weight <= 0.0 || self.fx <= 0.0 {
            return Err(EngineError::invalid_argument(
                component,
                "idm, weight and fx must be positive",
            ));
        }
        if self.buffer_fraction < 0.0 {
            return Err(EngineError::invalid_argument(
                component,
                "buffer_fraction must be non-negative",
            ));
        }
        if self.vol_lookback_short < 2 || self.vol_lookback_long < self.vol_lookback_short {
            return Err(EngineError::invalid_argument(
                component,
                "volatility lookbacks must satisfy 2 <= short <= long",
            ));
        }
        Ok(())
    }

    fn longest_span(&self) -> usize {
        self.ema_windows.iter().map(|(_, long)| *long).max().unwrap_or(0)
    }
}

/// Per-instrument trend state
struct TrendInstrument {
    emacs: Vec<Emac>,
    scalers: Vec<ForecastScaler>,
    vol: BlendedVol,
    bars_seen: usize,
    forecast: f64,
    position: f64,
}

impl TrendInstrument {
    fn new(config: &TrendFollowingConfig) -> Self {
        Self {
            emacs: config
                .ema_windows
                .iter()
                .map(|(s, l)| Emac::new(*s, *l))
                .collect(),
            scalers: config.ema_windows.iter().map(|_| ForecastScaler::new()).collect(),
            vol: BlendedVol::new(config.vol_lookback_short, config.vol_lookback_long),
            bars_seen: 0,
            forecast: 0.0,
            position: 0.0,
        }
    }
}

/// Annualization carrier of the 16-day convention
const CARRIER: f64 = 16.0;

/// EMAC ensemble trend follower with buffered vol-targeted sizing
pub struct TrendFollowingStrategy {
    core: StrategyCore,
    trend_config: TrendFollowingConfig,
    instruments: FxHashMap<String, TrendInstrument>,
    warmup: usize,
}

impl TrendFollowingStrategy {
    pub fn new(
        id: impl Into<String>,
        config: StrategyConfig,
        trend_config: TrendFollowingConfig,
    ) -> Self {
        let warmup = trend_config.longest_span().max(trend_config.vol_lookback_long);
        Self {
            core: StrategyCore::new(id, config, PnlAccounting::MarkToMarket),
            trend_config,
            instruments: FxHashMap::default(),
            warmup,
        }
    }

    /// Combined forecast for a symbol, if warm
    #[must_use]
    pub fn forecast(&self, symbol: &str) -> Option<f64> {
        self.instruments.get(symbol).map(|i| i.forecast)
    }

    /// Current buffered position for a symbol, in contracts
    #[must_use]
    pub fn position(&self, symbol: &str) -> f64 {
        self.instruments.get(symbol).map(|i| i.position).unwrap_or(0.0)
    }

    fn process_bar(&mut self, bar: &Bar) -> Result<()> {
        let symbol = bar.symbol.as_str();
        let Some(multiplier) = self.core.config().multiplier(symbol) else {
            // Not in this strategy's universe; portfolio filtering should
            // prevent this, but an unknown bar must not mutate state.
            debug!(strategy = self.core.id(), symbol, "ignoring bar outside universe");
            return Ok(());
        };

        let close = bar.close.as_f64();
        let config = &self.trend_config;
        let instrument = self
            .instruments
            .entry(symbol.to_string())
            .or_insert_with(|| TrendInstrument::new(config));

        instrument.bars_seen += 1;
        let sigma = instrument.vol.update(close);

        let mut scaled = Vec::with_capacity(instrument.emacs.len());
        for (emac, scaler) in instrument.emacs.iter_mut().zip(instrument.scalers.iter_mut()) {
            let crossover = emac.update(close);
            if let Some(raw) = raw_forecast(crossover, close, sigma) {
                scaled.push(scaler.scale(raw));
            }
        }

        if instrument.bars_seen < self.warmup {
            return Ok(());
        }
        if scaled.len() < instrument.emacs.len() {
            // Degenerate volatility; hold the current position
            return Ok(());
        }
        let Some(forecast) = combine_forecasts(&scaled, &config.fdm) else {
            return Ok(());
        };
        instrument.forecast = forecast;

        // Annualized return volatility from the price-scale blended
        // stdev via the 16-day carrier; the carrier appears exactly once
        // in the sizing path.
        let capital = self.core.config().capital_allocation;
        let annual_vol = CARRIER * sigma / close;
        let scale = capital * config.idm * config.weight * config.risk_target
            / (multiplier * config.fx * close * annual_vol);

        let ideal = (forecast / 10.0) * scale;

        let new_position = if config.use_position_buffering {
            let buffer = config.buffer_fraction * scale;
            let lo = (ideal - buffer).round();
            let hi = (ideal + buffer).round();
            let current = instrument.position;
            if current < lo {
                lo
            } else if current > hi {
                hi
            } else {
                current
            }
        } else {
            ideal.round()
        };

        let limit = self.core.config().position_limit(symbol);
        let bounded = new_position.clamp(-limit, limit);
        instrument.position = bounded;

        let target = self.core.target_position(symbol, bounded, bar.close, bar.timestamp);
        self.core.set_target(symbol, target, forecast / 20.0);
        Ok(())
    }
}

impl Strategy for TrendFollowingStrategy {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn core(&self) -> &StrategyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StrategyCore {
        &mut self.core
    }

    fn validate_config(&self) -> Result<()> {
        self.trend_config.validate()
    }

    fn on_data(&mut self, bars: &[Bar]) -> Result<()> {
        self.core.require_running()?;
        if bars.is_empty() {
            return Ok(());
        }
        self.core.validate_bars(bars)?;

        let ordered: Vec<Bar> = self.core.ordered(bars).into_iter().cloned().collect();
        for bar in &ordered {
            self.process_bar(bar)?;
        }
        Ok(())
    }

    fn introspect(&self) -> FxHashMap<String, InstrumentView> {
        self.instruments
            .iter()
            .map(|(symbol, instrument)| {
                let ema_values = instrument
                    .emacs
                    .iter()
                    .filter_map(Emac::components)
                    .flat_map(|(s, l)| [s, l])
                    .collect();
                (
                    symbol.clone(),
                    InstrumentView {
                        forecast: instrument.forecast,
                        volatility: instrument.vol.value(),
                        ema_values,
                    },
                )
            })
            .collect()
    }
}
