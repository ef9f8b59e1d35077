//! Mean reversion strategy
//!
//! Z-score of price against a rolling moving average: enter short when
//! the price is stretched high, long when stretched low, exit as the
//! z-score reverts, with an optional stop-loss. Sized by a volatility
//! scalar and floored to whole shares. Realized-only PnL accounting
//! (cash equities).

use crate::core::StrategyCore;
use crate::{InstrumentView, Strategy};
use common::{Bar, EngineError, PnlAccounting, Result, StrategyConfig, Ts};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use signals::rolling_stdev;
use std::collections::VecDeque;
use tracing::debug;

/// Mean reversion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    /// Lookback for the moving average and z-score
    pub lookback_period: usize,
    /// Z-score threshold for entry
    pub entry_threshold: f64,
    /// Z-score threshold for exit
    pub exit_threshold: f64,
    /// Target annualized risk level
    pub risk_target: f64,
    /// Maximum position value as a fraction of capital
    pub position_size: f64,
    /// Lookback for realized volatility
    pub vol_lookback: usize,
    pub use_stop_loss: bool,
    pub stop_loss_pct: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            lookback_period: 20,
            entry_threshold: 2.0,
            exit_threshold: 0.5,
            risk_target: 0.15,
            position_size: 0.1,
            vol_lookback: 20,
            use_stop_loss: true,
            stop_loss_pct: 0.05,
        }
    }
}

impl MeanReversionConfig {
    fn validate(&self) -> Result<()> {
        let component = "mean_reversion";
        if self.lookback_period < 2 {
            return Err(EngineError::invalid_argument(
                component,
                "lookback_period must be at least 2",
            ));
        }
        if self.entry_threshold <= 0.0 {
            return Err(EngineError::invalid_argument(
                component,
                "entry_threshold must be positive",
            ));
        }
        if self.exit_threshold < 0.0 || self.exit_threshold >= self.entry_threshold {
            return Err(EngineError::invalid_argument(
                component,
                "exit_threshold must be in [0, entry_threshold)",
            ));
        }
        if self.risk_target <= 0.0 || self.risk_target > 1.0 {
            return Err(EngineError::invalid_argument(
                component,
                "risk_target must be in (0, 1]",
            ));
        }
        if self.position_size <= 0.0 || self.position_size > 1.0 {
            return Err(EngineError::invalid_argument(
                component,
                "position_size must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Per-instrument mean reversion state
#[derive(Debug, Default)]
struct MrInstrument {
    prices: VecDeque<f64>,
    current_price: f64,
    moving_average: f64,
    std_deviation: f64,
    z_score: f64,
    volatility: f64,
    target_position: f64,
    entry_price: f64,
    last_update: Ts,
}

/// Z-score mean reverter
pub struct MeanReversionStrategy {
    core: StrategyCore,
    mr_config: MeanReversionConfig,
    instruments: FxHashMap<String, MrInstrument>,
}

impl MeanReversionStrategy {
    pub fn new(
        id: impl Into<String>,
        config: StrategyConfig,
        mr_config: MeanReversionConfig,
    ) -> Self {
        Self {
            core: StrategyCore::new(id, config, PnlAccounting::RealizedOnly),
            mr_config,
            instruments: FxHashMap::default(),
        }
    }

    /// Current z-score for a symbol
    #[must_use]
    pub fn z_score(&self, symbol: &str) -> f64 {
        self.instruments.get(symbol).map(|i| i.z_score).unwrap_or(0.0)
    }

    /// Current target position for a symbol
    #[must_use]
    pub fn position(&self, symbol: &str) -> f64 {
        self.instruments
            .get(symbol)
            .map(|i| i.target_position)
            .unwrap_or(0.0)
    }

    /// Annualized volatility from log returns over the lookback
    fn annualized_vol(prices: &[f64], lookback: usize) -> f64 {
        if prices.len() < 2 {
            return 0.01;
        }
        let start = prices.len().saturating_sub(lookback + 1);
        let window = &prices[start..];
        let returns: Vec<f64> = window
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect();
        if returns.is_empty() {
            return 0.01;
        }
        rolling_stdev(&returns) * 252.0_f64.sqrt()
    }

    /// Whole-share position size from the volatility scalar
    fn position_size(&self, price: f64, volatility: f64) -> f64 {
        if price <= f64::EPSILON {
            return 0.0;
        }
        let capital = self.core.config().capital_allocation;
        let target_value = capital * self.mr_config.position_size;
        let vol_scalar =
            (self.mr_config.risk_target / volatility.max(0.01)).clamp(0.25, 2.0);
        (target_value * vol_scalar / price).floor()
    }

    /// Signal from the z-score and the currently held direction
    fn signal(&self, symbol: &str, data: &MrInstrument) -> f64 {
        let current = self.core.target_contracts(symbol);
        let config = &self.mr_config;

        if current.abs() < 1e-6 {
            // Flat: enter against the stretch
            if data.z_score > config.entry_threshold {
                return -1.0;
            }
            if data.z_score < -config.entry_threshold {
                return 1.0;
            }
            return 0.0;
        }

        if current > 0.0 {
            if data.z_score > -config.exit_threshold {
                return 0.0;
            }
            if config.use_stop_loss && data.entry_price > 0.0 {
                let pnl_pct = (data.current_price - data.entry_price) / data.entry_price;
                if pnl_pct < -config.stop_loss_pct {
                    return 0.0;
                }
            }
            return 1.0;
        }

        // Short
        if data.z_score < config.exit_threshold {
            return 0.0;
        }
        if config.use_stop_loss && data.entry_price > 0.0 {
            let pnl_pct = (data.entry_price - data.current_price) / data.entry_price;
            if pnl_pct < -config.stop_loss_pct {
                return 0.0;
            }
        }
        -1.0
    }

    fn process_bar(&mut self, bar: &Bar) -> Result<()> {
        let symbol = bar.symbol.as_str();
        if self.core.config().multiplier(symbol).is_none() {
            debug!(strategy = self.core.id(), symbol, "ignoring bar outside universe");
            return Ok(());
        }

        let lookback = self.mr_config.lookback_period;
        let vol_lookback = self.mr_config.vol_lookback;
        let close = bar.close.as_f64();

        {
            let data = self.instruments.entry(symbol.to_string()).or_default();
            data.prices.push_back(close);
            let bound = lookback.max(vol_lookback) * 3;
            while data.prices.len() > bound {
                data.prices.pop_front();
            }
            data.current_price = close;
            data.last_update = bar.timestamp;

            if data.prices.len() < lookback {
                return Ok(());
            }

            let prices: Vec<f64> = data.prices.iter().copied().collect();
            let window = &prices[prices.len() - lookback..];
            data.moving_average = window.iter().sum::<f64>() / lookback as f64;
            data.std_deviation = rolling_stdev(window);
            data.z_score = if data.std_deviation < 1e-8 {
                0.0
            } else {
                (close - data.moving_average) / data.std_deviation
            };
            data.volatility = Self::annualized_vol(&prices, vol_lookback);
        }

        let data = &self.instruments[symbol];
        let signal = self.signal(symbol, data);

        let was_flat = self.core.target_contracts(symbol).abs() < 1e-6;
        let target = if signal.abs() > 0.01 {
            signal * self.position_size(close, data.volatility)
        } else {
            0.0
        };

        let limit = self.core.config().position_limit(symbol);
        let bounded = target.clamp(-limit, limit);

        if was_flat && bounded != 0.0 {
            // Track the entry for the stop
            if let Some(data) = self.instruments.get_mut(symbol) {
                data.entry_price = close;
            }
        }
        if let Some(data) = self.instruments.get_mut(symbol) {
            data.target_position = bounded;
        }

        let position = self.core.target_position(symbol, bounded, bar.close, bar.timestamp);
        self.core.set_target(symbol, position, signal);
        Ok(())
    }
}

impl Strategy for MeanReversionStrategy {
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
        self.mr_config.validate()
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
            .map(|(symbol, data)| {
                (
                    symbol.clone(),
                    InstrumentView {
                        forecast: data.z_score,
                        volatility: data.volatility,
                        ema_values: vec![data.moving_average],
                    },
                )
            })
            .collect()
    }
}
