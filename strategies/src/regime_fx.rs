//! Regime-switching FX strategy
//!
//! Cross-sectional volatility dispersion decides the regime: when
//! dispersion is unusually low the book trades momentum, when unusually
//! high it trades mean reversion, otherwise it stays flat. Within a
//! regime, symbols are ranked by recent performance and the top/bottom K
//! are taken long/short with equal capital.

use crate::core::StrategyCore;
use crate::{InstrumentView, Strategy};
use common::{Bar, EngineError, PnlAccounting, Result, StrategyConfig};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use signals::rolling_stdev;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Detected market regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    Momentum,
    MeanReversion,
    Undefined,
}

/// Regime-switching FX configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeFxConfig {
    /// Rolling window for per-symbol daily volatility
    pub volatility_window: usize,
    /// Lookback for the performance ranking, in days
    pub performance_lookback: usize,
    /// Dispersion z-score below which the regime is Momentum
    pub low_dispersion_threshold: f64,
    /// Dispersion z-score above which the regime is MeanReversion
    pub high_dispersion_threshold: f64,
    /// Rolling window for the dispersion z-score
    pub zscore_lookback: usize,
    pub num_long_positions: usize,
    pub num_short_positions: usize,
    pub use_volatility_scaling: bool,
    /// Daily volatility target for the scaling overlay
    pub daily_vol_target: f64,
    pub stop_loss_pct: f64,
}

impl Default for RegimeFxConfig {
    fn default() -> Self {
        Self {
            volatility_window: 30,
            performance_lookback: 5,
            low_dispersion_threshold: -0.5,
            high_dispersion_threshold: 0.5,
            zscore_lookback: 252,
            num_long_positions: 2,
            num_short_positions: 2,
            use_volatility_scaling: true,
            daily_vol_target: 0.01,
            stop_loss_pct: 0.05,
        }
    }
}

impl RegimeFxConfig {
    fn validate(&self) -> Result<()> {
        let component = "regime_fx";
        if self.volatility_window < 2 {
            return Err(EngineError::invalid_argument(
                component,
                "volatility_window must be at least 2",
            ));
        }
        if self.zscore_lookback < 60 {
            return Err(EngineError::invalid_argument(
                component,
                "zscore_lookback must be at least 60 days",
            ));
        }
        if self.low_dispersion_threshold >= self.high_dispersion_threshold {
            return Err(EngineError::invalid_argument(
                component,
                "dispersion thresholds must satisfy low < high",
            ));
        }
        if self.num_long_positions == 0 && self.num_short_positions == 0 {
            return Err(EngineError::invalid_argument(
                component,
                "at least one long or short slot required",
            ));
        }
        Ok(())
    }
}

/// Regime from a dispersion z-score
#[must_use]
pub fn determine_regime(z: f64, low: f64, high: f64) -> MarketRegime {
    if z < low {
        MarketRegime::Momentum
    } else if z > high {
        MarketRegime::MeanReversion
    } else {
        MarketRegime::Undefined
    }
}

/// Directional signals from a performance ranking
///
/// `ranked` is sorted best-first. Momentum goes long the top and short
/// the bottom; mean reversion inverts that; Undefined leaves everything
/// flat.
#[must_use]
pub fn rank_signals(
    ranked: &[(String, f64)],
    regime: MarketRegime,
    num_long: usize,
    num_short: usize,
) -> FxHashMap<String, f64> {
    let mut signals: FxHashMap<String, f64> =
        ranked.iter().map(|(symbol, _)| (symbol.clone(), 0.0)).collect();
    if regime == MarketRegime::Undefined || ranked.len() < num_long + num_short {
        return signals;
    }

    let (top_signal, bottom_signal) = match regime {
        MarketRegime::Momentum => (1.0, -1.0),
        MarketRegime::MeanReversion => (-1.0, 1.0),
        MarketRegime::Undefined => unreachable!(),
    };

    for (symbol, _) in ranked.iter().take(num_long) {
        signals.insert(symbol.clone(), top_signal);
    }
    for (symbol, _) in ranked.iter().rev().take(num_short) {
        signals.insert(symbol.clone(), bottom_signal);
    }
    signals
}

/// Per-instrument FX state
#[derive(Debug, Default)]
struct FxInstrument {
    prices: VecDeque<f64>,
    returns: VecDeque<f64>,
    realized_vol: f64,
    recent_return: f64,
    target_position: f64,
    entry_price: f64,
}

/// Dispersion-regime FX book
pub struct RegimeFxStrategy {
    core: StrategyCore,
    fx_config: RegimeFxConfig,
    instruments: FxHashMap<String, FxInstrument>,
    dispersion_history: VecDeque<f64>,
    dispersion_zscore: f64,
    regime: MarketRegime,
}

impl RegimeFxStrategy {
    pub fn new(id: impl Into<String>, config: StrategyConfig, fx_config: RegimeFxConfig) -> Self {
        Self {
            core: StrategyCore::new(id, config, PnlAccounting::MarkToMarket),
            fx_config,
            instruments: FxHashMap::default(),
            dispersion_history: VecDeque::new(),
            dispersion_zscore: 0.0,
            regime: MarketRegime::Undefined,
        }
    }

    /// Current regime
    #[must_use]
    pub fn regime(&self) -> MarketRegime {
        self.regime
    }

    /// Current dispersion z-score
    #[must_use]
    pub fn dispersion_zscore(&self) -> f64 {
        self.dispersion_zscore
    }

    /// Current target position for a symbol
    #[must_use]
    pub fn position(&self, symbol: &str) -> f64 {
        self.instruments
            .get(symbol)
            .map(|i| i.target_position)
            .unwrap_or(0.0)
    }

    fn update_instrument(&mut self, bar: &Bar) {
        let config = &self.fx_config;
        let data = self.instruments.entry(bar.symbol.clone()).or_default();
        let close = bar.close.as_f64();

        if let Some(&prev) = data.prices.back() {
            if prev > 0.0 {
                data.returns.push_back((close / prev).ln());
                while data.returns.len() > config.volatility_window {
                    data.returns.pop_front();
                }
            }
        }
        data.prices.push_back(close);
        let bound = config.volatility_window.max(config.performance_lookback) + 1;
        while data.prices.len() > bound {
            data.prices.pop_front();
        }

        // Daily sigma of log returns, not annualized
        if data.returns.len() >= 2 {
            let returns: Vec<f64> = data.returns.iter().copied().collect();
            data.realized_vol = rolling_stdev(&returns);
        }

        if data.prices.len() > config.performance_lookback {
            let first = data.prices[data.prices.len() - 1 - config.performance_lookback];
            if first > 0.0 {
                data.recent_return = (close / first).ln();
            }
        }
    }

    /// Cross-sectional dispersion of per-symbol daily vols
    fn current_dispersion(&self) -> Option<f64> {
        let vols: Vec<f64> = self
            .instruments
            .values()
            .filter(|d| d.returns.len() >= self.fx_config.volatility_window)
            .map(|d| d.realized_vol)
            .collect();
        if vols.len() < 2 {
            return None;
        }
        // Sample stdev across symbols
        let n = vols.len() as f64;
        let mean = vols.iter().sum::<f64>() / n;
        let var = vols.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt())
    }

    fn update_regime(&mut self) {
        let Some(dispersion) = self.current_dispersion() else {
            return;
        };
        self.dispersion_history.push_back(dispersion);
        let bound = self.fx_config.zscore_lookback * 3;
        while self.dispersion_history.len() > bound {
            self.dispersion_history.pop_front();
        }

        if self.dispersion_history.len() >= self.fx_config.zscore_lookback {
            let recent: Vec<f64> = self
                .dispersion_history
                .iter()
                .rev()
                .take(self.fx_config.zscore_lookback)
                .copied()
                .collect();
            let n = recent.len() as f64;
            let mean = recent.iter().sum::<f64>() / n;
            let var =
                recent.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
            let std = var.sqrt();
            self.dispersion_zscore = if std > 1e-12 { (dispersion - mean) / std } else { 0.0 };
        } else {
            self.dispersion_zscore = 0.0;
            debug!(
                strategy = self.core.id(),
                have = self.dispersion_history.len(),
                need = self.fx_config.zscore_lookback,
                "insufficient dispersion history for z-score"
            );
        }

        let previous = self.regime;
        self.regime = determine_regime(
            self.dispersion_zscore,
            self.fx_config.low_dispersion_threshold,
            self.fx_config.high_dispersion_threshold,
        );
        if previous != self.regime {
            info!(
                strategy = self.core.id(),
                from = ?previous,
                to = ?self.regime,
                zscore = self.dispersion_zscore,
                "regime change"
            );
        }
    }

    /// Symbols ranked best-first by recent performance
    fn ranked(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .instruments
            .iter()
            .map(|(symbol, data)| (symbol.clone(), data.recent_return))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Contracts for a signal under equal-capital allocation
    fn sized_position(&self, symbol: &str, signal: f64) -> f64 {
        if signal == 0.0 {
            return 0.0;
        }
        let data = &self.instruments[symbol];
        let Some(&price) = data.prices.back() else {
            return 0.0;
        };
        let Some(multiplier) = self.core.config().multiplier(symbol) else {
            return 0.0;
        };
        let slots = (self.fx_config.num_long_positions + self.fx_config.num_short_positions)
            .max(1) as f64;
        let allocation = self.core.config().capital_allocation / slots;
        let mut contracts = allocation / (price * multiplier);

        if self.fx_config.use_volatility_scaling && data.realized_vol > 1e-12 {
            contracts *= (self.fx_config.daily_vol_target / data.realized_vol).clamp(0.5, 2.0);
        }

        let limit = self.core.config().position_limit(symbol);
        (signal * contracts.round()).clamp(-limit, limit)
    }

    /// Stop-loss overlay: flatten a position whose entry has gone bad
    fn stopped_out(&self, data: &FxInstrument) -> bool {
        if data.target_position == 0.0 || data.entry_price <= 0.0 {
            return false;
        }
        let Some(&price) = data.prices.back() else {
            return false;
        };
        let pnl_pct = if data.target_position > 0.0 {
            (price - data.entry_price) / data.entry_price
        } else {
            (data.entry_price - price) / data.entry_price
        };
        pnl_pct < -self.fx_config.stop_loss_pct
    }

    fn apply_signals(&mut self, latest: &FxHashMap<String, Bar>) {
        let ranked = self.ranked();
        let signals = rank_signals(
            &ranked,
            self.regime,
            self.fx_config.num_long_positions,
            self.fx_config.num_short_positions,
        );

        for (symbol, signal) in signals {
            let Some(bar) = latest.get(&symbol) else {
                continue;
            };
            let mut target = self.sized_position(&symbol, signal);
            if self.stopped_out(&self.instruments[&symbol]) {
                target = 0.0;
            }

            let was_flat = self.core.target_contracts(&symbol).abs() < 1e-6;
            let close = bar.close;
            if let Some(data) = self.instruments.get_mut(&symbol) {
                if was_flat && target != 0.0 {
                    data.entry_price = close.as_f64();
                }
                data.target_position = target;
            }
            let position = self.core.target_position(&symbol, target, close, bar.timestamp);
            self.core.set_target(&symbol, position, signal);
        }
    }
}

impl Strategy for RegimeFxStrategy {
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
        self.fx_config.validate()
    }

    fn on_data(&mut self, bars: &[Bar]) -> Result<()> {
        self.core.require_running()?;
        if bars.is_empty() {
            return Ok(());
        }
        self.core.validate_bars(bars)?;

        let ordered: Vec<Bar> = self.core.ordered(bars).into_iter().cloned().collect();
        let mut latest: FxHashMap<String, Bar> = FxHashMap::default();
        for bar in &ordered {
            if self.core.config().multiplier(&bar.symbol).is_none() {
                debug!(strategy = self.core.id(), symbol = %bar.symbol, "ignoring bar outside universe");
                continue;
            }
            self.update_instrument(bar);
            latest.insert(bar.symbol.clone(), bar.clone());
        }
        if latest.is_empty() {
            return Ok(());
        }

        self.update_regime();
        self.apply_signals(&latest);
        Ok(())
    }

    fn introspect(&self) -> FxHashMap<String, InstrumentView> {
        self.instruments
            .iter()
            .map(|(symbol, data)| {
                (
                    symbol.clone(),
                    InstrumentView {
                        forecast: data.recent_return,
                        volatility: data.realized_vol,
                        ema_values: Vec::new(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn regime_thresholds() {
        assert_eq!(determine_regime(-1.0, -0.5, 0.5), MarketRegime::Momentum);
        assert_eq!(determine_regime(1.0, -0.5, 0.5), MarketRegime::MeanReversion);
        assert_eq!(determine_regime(0.0, -0.5, 0.5), MarketRegime::Undefined);
        assert_eq!(determine_regime(-0.5, -0.5, 0.5), MarketRegime::Undefined);
    }

    #[test]
    fn momentum_ranks_long_top_short_bottom() {
        let ranked = vec![
            ("A".to_string(), 0.03),
            ("B".to_string(), 0.02),
            ("C".to_string(), 0.0),
            ("D".to_string(), -0.01),
            ("E".to_string(), -0.03),
        ];
        let signals = rank_signals(&ranked, MarketRegime::Momentum, 2, 2);
        assert_relative_eq!(signals["A"], 1.0);
        assert_relative_eq!(signals["B"], 1.0);
        assert_relative_eq!(signals["C"], 0.0);
        assert_relative_eq!(signals["D"], -1.0);
        assert_relative_eq!(signals["E"], -1.0);
    }

    #[test]
    fn mean_reversion_inverts_ranking() {
        let ranked = vec![
            ("A".to_string(), 0.03),
            ("B".to_string(), 0.02),
            ("C".to_string(), 0.0),
            ("D".to_string(), -0.01),
            ("E".to_string(), -0.03),
        ];
        let signals = rank_signals(&ranked, MarketRegime::MeanReversion, 2, 2);
        assert_relative_eq!(signals["A"], -1.0);
        assert_relative_eq!(signals["B"], -1.0);
        assert_relative_eq!(signals["C"], 0.0);
        assert_relative_eq!(signals["D"], 1.0);
        assert_relative_eq!(signals["E"], 1.0);
    }

    #[test]
    fn undefined_regime_is_flat() {
        let ranked = vec![("A".to_string(), 0.03), ("B".to_string(), -0.01)];
        let signals = rank_signals(&ranked, MarketRegime::Undefined, 1, 1);
        assert!(signals.values().all(|s| *s == 0.0));
    }

    #[test]
    fn too_few_symbols_stay_flat() {
        let ranked = vec![("A".to_string(), 0.03), ("B".to_string(), -0.01)];
        let signals = rank_signals(&ranked, MarketRegime::Momentum, 2, 2);
        assert!(signals.values().all(|s| *s == 0.0));
    }

    #[test]
    fn config_validation() {
        let mut config = RegimeFxConfig::default();
        config.zscore_lookback = 30;
        assert!(config.validate().is_err());

        let mut config = RegimeFxConfig::default();
        config.low_dispersion_threshold = 1.0;
        assert!(config.validate().is_err());
    }
}
