//! Portfolio risk engine
//!
//! Clamps a proposed portfolio against hard limits and raises
//! diagnostics for soft ones:
//!
//! - per-symbol quantity caps (hard, applied after pro-rata scaling)
//! - gross and net leverage (hard, pro-rata scaling)
//! - drawdown from the equity peak (hard: the cycle fails and the book
//!   is flattened)
//! - pairwise correlation and parametric VaR (diagnostics only)
//!
//! Nothing is clamped silently: every adjustment is reported in the
//! outcome and logged.

use common::{Result, RiskConfig};
use rustc_hash::FxHashMap;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::VecDeque;
use tracing::{error, warn};

/// Market snapshot used to value a proposed portfolio
#[derive(Debug, Clone, Copy)]
pub struct SymbolExposure {
    pub price: f64,
    pub multiplier: f64,
}

/// What the clamp did to the proposal
#[derive(Debug, Clone, Default)]
pub struct RiskOutcome {
    /// Clamped positions, in contracts
    pub positions: FxHashMap<String, f64>,
    /// Scaling applied for gross leverage (1.0 = untouched)
    pub gross_scale: f64,
    /// Scaling applied for net leverage (1.0 = untouched)
    pub net_scale: f64,
    /// Symbols whose per-symbol cap was hit
    pub capped_symbols: Vec<String>,
    /// Drawdown breach: the proposal was discarded and the book flattened
    pub flattened: bool,
    /// Soft-limit diagnostics (correlation, VaR)
    pub warnings: Vec<String>,
}

impl RiskOutcome {
    /// True when the proposal survived untouched
    #[must_use]
    pub fn clean(&self) -> bool {
        !self.flattened
            && self.capped_symbols.is_empty()
            && (self.gross_scale - 1.0).abs() < f64::EPSILON
            && (self.net_scale - 1.0).abs() < f64::EPSILON
    }
}

/// Risk engine with rolling state for the diagnostics
#[derive(Debug)]
pub struct RiskEngine {
    config: RiskConfig,
    equity_peak: f64,
    equity_history: VecDeque<f64>,
    returns: FxHashMap<String, VecDeque<f64>>,
}

impl RiskEngine {
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            equity_peak: 0.0,
            equity_history: VecDeque::new(),
            returns: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Record the marked equity for drawdown and VaR tracking
    pub fn observe_equity(&mut self, equity: f64) {
        if equity > self.equity_peak {
            self.equity_peak = equity;
        }
        self.equity_history.push_back(equity);
        while self.equity_history.len() > self.config.lookback_period + 1 {
            self.equity_history.pop_front();
        }
    }

    /// Record a per-symbol return for the correlation diagnostic
    pub fn observe_return(&mut self, symbol: &str, ret: f64) {
        let series = self.returns.entry(symbol.to_string()).or_default();
        series.push_back(ret);
        while series.len() > self.config.lookback_period {
            series.pop_front();
        }
    }

    /// Current drawdown from the equity peak
    #[must_use]
    pub fn drawdown(&self, equity: f64) -> f64 {
        if self.equity_peak <= 0.0 {
            return 0.0;
        }
        ((self.equity_peak - equity) / self.equity_peak).max(0.0)
    }

    /// Clamp a proposed portfolio
    ///
    /// `proposed` maps symbol to contracts; `exposures` provides the mark
    /// price and multiplier used to value each line.
    pub fn clamp(
        &mut self,
        proposed: &FxHashMap<String, f64>,
        exposures: &FxHashMap<String, SymbolExposure>,
        equity: f64,
    ) -> Result<RiskOutcome> {
        let mut outcome = RiskOutcome {
            gross_scale: 1.0,
            net_scale: 1.0,
            ..RiskOutcome::default()
        };

        // Drawdown is checked first: a breach discards the proposal
        let drawdown = self.drawdown(equity);
        if drawdown > self.config.max_drawdown {
            error!(
                drawdown,
                limit = self.config.max_drawdown,
                "max drawdown breached, flattening all positions"
            );
            outcome.flattened = true;
            outcome.positions = proposed.keys().map(|s| (s.clone(), 0.0)).collect();
            return Ok(outcome);
        }

        let capital = self.config.capital;
        let notional = |symbol: &str, qty: f64| -> f64 {
            exposures
                .get(symbol)
                .map(|e| qty * e.price * e.multiplier)
                .unwrap_or(0.0)
        };

        let gross: f64 = proposed.iter().map(|(s, q)| notional(s, *q).abs()).sum();
        let net: f64 = proposed.iter().map(|(s, q)| notional(s, *q)).sum();

        let mut scale = 1.0_f64;
        if capital > 0.0 {
            let gross_leverage = gross / capital;
            if gross_leverage > self.config.max_gross_leverage {
                outcome.gross_scale = self.config.max_gross_leverage / gross_leverage;
                scale *= outcome.gross_scale;
                warn!(
                    gross_leverage,
                    limit = self.config.max_gross_leverage,
                    scale = outcome.gross_scale,
                    "gross leverage exceeded, scaling pro-rata"
                );
            }
            let net_leverage = (net * scale).abs() / capital;
            if net_leverage > self.config.max_net_leverage {
                outcome.net_scale = self.config.max_net_leverage / net_leverage;
                scale *= outcome.net_scale;
                warn!(
                    net_leverage,
                    limit = self.config.max_net_leverage,
                    scale = outcome.net_scale,
                    "net leverage exceeded, scaling pro-rata"
                );
            }
        }

        // Pro-rata scaling first, per-symbol caps second
        for (symbol, qty) in proposed {
            let mut clamped = qty * scale;
            if clamped.abs() > self.config.max_position_size {
                clamped = clamped.signum() * self.config.max_position_size;
                outcome.capped_symbols.push(symbol.clone());
            }
            outcome.positions.insert(symbol.clone(), clamped);
        }
        outcome.capped_symbols.sort();

        self.correlation_diagnostic(&mut outcome);
        self.var_diagnostic(&mut outcome);
        Ok(outcome)
    }

    /// Warn when any pair of tracked symbols is too correlated
    fn correlation_diagnostic(&self, outcome: &mut RiskOutcome) {
        let symbols: Vec<&String> = self
            .returns
            .keys()
            .filter(|s| self.returns[*s].len() >= 20)
            .collect();
        for i in 0..symbols.len() {
            for j in (i + 1)..symbols.len() {
                let a: Vec<f64> = self.returns[symbols[i]].iter().copied().collect();
                let b: Vec<f64> = self.returns[symbols[j]].iter().copied().collect();
                let corr = correlation(&a, &b);
                if corr.abs() > self.config.max_correlation {
                    let message = format!(
                        "correlation {corr:.3} between {} and {} exceeds {}",
                        symbols[i], symbols[j], self.config.max_correlation
                    );
                    warn!("{message}");
                    outcome.warnings.push(message);
                }
            }
        }
    }

    /// Parametric VaR of the equity return series vs the configured limit
    fn var_diagnostic(&self, outcome: &mut RiskOutcome) {
        if self.equity_history.len() < 20 {
            return;
        }
        let returns: Vec<f64> = self
            .equity_history
            .iter()
            .zip(self.equity_history.iter().skip(1))
            .filter(|(prev, _)| **prev > 0.0)
            .map(|(prev, next)| next / prev - 1.0)
            .collect();
        if returns.len() < 2 {
            return;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / (n - 1.0);
        let sigma = var.sqrt();

        let z = Normal::new(0.0, 1.0)
            .map(|normal| normal.inverse_cdf(self.config.confidence_level))
            .unwrap_or(2.326);
        let value_at_risk = z * sigma;
        if value_at_risk > self.config.var_limit {
            let message = format!(
                "parametric VaR {value_at_risk:.4} exceeds limit {}",
                self.config.var_limit
            );
            warn!("{message}");
            outcome.warnings.push(message);
        }
    }
}

/// Pearson correlation of two equal-length series
#[must_use]
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}
