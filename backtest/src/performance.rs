//! Backtest performance summary
//!
//! Metrics computed from the equity curve (and a benchmark series when
//! configured). Daily frequency is assumed for annualization; undefined
//! ratios report as 0 rather than NaN.

use common::EquityPoint;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Trading days per year used for annualization
const TRADING_DAYS: f64 = 252.0;

/// Summary metrics for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub cvar_95: f64,
    pub beta: Option<f64>,
}

impl PerformanceSummary {
    /// Flatten into a metrics map for persistence
    #[must_use]
    pub fn to_metrics_map(&self) -> FxHashMap<String, f64> {
        let mut map = FxHashMap::default();
        map.insert("total_return".to_string(), self.total_return);
        map.insert("annualized_return".to_string(), self.annualized_return);
        map.insert("volatility".to_string(), self.volatility);
        map.insert("sharpe_ratio".to_string(), self.sharpe_ratio);
        map.insert("sortino_ratio".to_string(), self.sortino_ratio);
        map.insert("max_drawdown".to_string(), self.max_drawdown);
        map.insert("calmar_ratio".to_string(), self.calmar_ratio);
        map.insert("win_rate".to_string(), self.win_rate);
        map.insert("profit_factor".to_string(), self.profit_factor);
        map.insert("average_win".to_string(), self.average_win);
        map.insert("average_loss".to_string(), self.average_loss);
        map.insert("cvar_95".to_string(), self.cvar_95);
        if let Some(beta) = self.beta {
            map.insert("beta".to_string(), beta);
        }
        map
    }
}

/// Compute the summary from an equity curve
///
/// `benchmark_returns`, when present, must be aligned with the equity
/// curve's return series (one observation per equity step).
#[must_use]
pub fn summarize(
    equity_curve: &[EquityPoint],
    benchmark_returns: Option<&[f64]>,
) -> PerformanceSummary {
    if equity_curve.len() < 2 {
        return PerformanceSummary::default();
    }

    let equities: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
    let returns: Vec<f64> = equities
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect();
    let pnl: Vec<f64> = equities.windows(2).map(|w| w[1] - w[0]).collect();

    let initial = equities[0];
    let final_equity = *equities.last().unwrap_or(&initial);
    let total_return = if initial != 0.0 {
        final_equity / initial - 1.0
    } else {
        0.0
    };

    let mean_return = (&returns[..]).mean();
    let return_std = (&returns[..]).std_dev();
    let annualized_return = mean_return * TRADING_DAYS;
    let volatility = return_std * TRADING_DAYS.sqrt();

    let sharpe_ratio = if return_std > 1e-12 {
        mean_return / return_std * TRADING_DAYS.sqrt()
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).collect();
    let sortino_ratio = if downside.is_empty() {
        0.0
    } else {
        let downside_dev = ((&downside[..]).mean()).sqrt();
        if downside_dev > 1e-12 {
            mean_return / downside_dev * TRADING_DAYS.sqrt()
        } else {
            0.0
        }
    };

    let max_drawdown = max_drawdown(&equities);
    let calmar_ratio = if max_drawdown > 1e-12 {
        annualized_return / max_drawdown
    } else {
        0.0
    };

    let wins: Vec<f64> = pnl.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnl.iter().copied().filter(|p| *p < 0.0).collect();
    let active = wins.len() + losses.len();
    let win_rate = if active > 0 {
        wins.len() as f64 / active as f64
    } else {
        0.0
    };
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();
    let profit_factor = if gross_loss > 1e-12 {
        gross_profit / gross_loss
    } else {
        0.0
    };
    let average_win = if wins.is_empty() { 0.0 } else { gross_profit / wins.len() as f64 };
    let average_loss = if losses.is_empty() {
        0.0
    } else {
        -gross_loss / losses.len() as f64
    };

    let cvar_95 = conditional_var(&returns, 0.05);

    let beta = benchmark_returns.and_then(|bench| beta(&returns, bench));

    PerformanceSummary {
        total_return,
        annualized_return,
        volatility,
        sharpe_ratio,
        sortino_ratio,
        max_drawdown,
        calmar_ratio,
        win_rate,
        profit_factor,
        average_win,
        average_loss,
        cvar_95,
        beta,
    }
}

/// Maximum peak-to-trough drawdown of an equity series
#[must_use]
pub fn max_drawdown(equities: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &equity in equities {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            worst = worst.max((peak - equity) / peak);
        }
    }
    worst
}

/// Mean of the returns at or below the `alpha` quantile
#[must_use]
pub fn conditional_var(returns: &[f64], alpha: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let cutoff = ((sorted.len() as f64 * alpha).ceil() as usize).clamp(1, sorted.len());
    let tail = &sorted[..cutoff];
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Regression beta of the portfolio returns against a benchmark
#[must_use]
pub fn beta(returns: &[f64], benchmark: &[f64]) -> Option<f64> {
    let n = returns.len().min(benchmark.len());
    if n < 2 {
        return None;
    }
    let r = &returns[returns.len() - n..];
    let b = &benchmark[benchmark.len() - n..];
    let mean_r = r.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        cov += (r[i] - mean_r) * (b[i] - mean_b);
        var_b += (b[i] - mean_b) * (b[i] - mean_b);
    }
    if var_b <= 1e-18 {
        return None;
    }
    Some(cov / var_b)
}
