//! Exponentially weighted covariance estimation
//!
//! Feeds the dynamic optimizer's quadratic form. Per-symbol return
//! histories are kept in bounded windows; the covariance for an ordered
//! symbol list is computed with exponentially decaying weights over the
//! aligned recent history. Symbols without enough history fall back to a
//! diagonal of sample variances.

use nalgebra::DMatrix;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Exponentially weighted covariance estimator
#[derive(Debug)]
pub struct CovarianceEstimator {
    /// Decay factor per observation
    lambda: f64,
    /// Observations required for the full estimate
    min_history: usize,
    /// Window bound per symbol
    max_history: usize,
    returns: FxHashMap<String, VecDeque<f64>>,
}

impl CovarianceEstimator {
    #[must_use]
    pub fn new(lambda: f64, min_history: usize, max_history: usize) -> Self {
        Self {
            lambda,
            min_history,
            max_history,
            returns: FxHashMap::default(),
        }
    }

    /// Default estimator: lambda 0.97, 20 observations minimum, 252 kept
    #[must_use]
    pub fn default_daily() -> Self {
        Self::new(0.97, 20, 252)
    }

    /// Record a return observation for a symbol
    pub fn add_return(&mut self, symbol: &str, ret: f64) {
        let series = self.returns.entry(symbol.to_string()).or_default();
        series.push_back(ret);
        while series.len() > self.max_history {
            series.pop_front();
        }
    }

    /// Observations stored for a symbol
    #[must_use]
    pub fn history_len(&self, symbol: &str) -> usize {
        self.returns.get(symbol).map_or(0, VecDeque::len)
    }

    /// True when every symbol has the minimum aligned history
    #[must_use]
    pub fn has_full_history(&self, symbols: &[String]) -> bool {
        symbols.iter().all(|s| self.history_len(s) >= self.min_history)
    }

    /// Covariance matrix for an ordered symbol list
    ///
    /// Exponentially weighted sample covariance over the aligned tail of
    /// the histories; diagonal of sample variances when any symbol lacks
    /// the minimum history.
    #[must_use]
    pub fn covariance(&self, symbols: &[String]) -> DMatrix<f64> {
        let n = symbols.len();
        if n == 0 {
            return DMatrix::zeros(0, 0);
        }
        if !self.has_full_history(symbols) {
            return self.diagonal_fallback(symbols);
        }

        let aligned = symbols
            .iter()
            .map(|s| self.history_len(s))
            .min()
            .unwrap_or(0);

        // Column per symbol, aligned on the most recent `aligned` returns
        let series: Vec<Vec<f64>> = symbols
            .iter()
            .map(|s| {
                let history = &self.returns[s];
                history.iter().skip(history.len() - aligned).copied().collect()
            })
            .collect();

        // Exponential weights, newest observation heaviest
        let mut weights = Vec::with_capacity(aligned);
        let mut w = 1.0;
        for _ in 0..aligned {
            weights.push(w);
            w *= self.lambda;
        }
        weights.reverse();
        let weight_sum: f64 = weights.iter().sum();

        let means: Vec<f64> = series
            .iter()
            .map(|s| {
                s.iter().zip(&weights).map(|(r, w)| r * w).sum::<f64>() / weight_sum
            })
            .collect();

        let mut cov = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let mut sum = 0.0;
                for k in 0..aligned {
                    sum += weights[k] * (series[i][k] - means[i]) * (series[j][k] - means[j]);
                }
                let value = sum / weight_sum;
                cov[(i, j)] = value;
                cov[(j, i)] = value;
            }
        }
        cov
    }

    fn diagonal_fallback(&self, symbols: &[String]) -> DMatrix<f64> {
        let n = symbols.len();
        let mut cov = DMatrix::zeros(n, n);
        for (i, symbol) in symbols.iter().enumerate() {
            cov[(i, i)] = self.sample_variance(symbol);
        }
        cov
    }

    fn sample_variance(&self, symbol: &str) -> f64 {
        let Some(series) = self.returns.get(symbol) else {
            return 0.0;
        };
        if series.len() < 2 {
            return 0.0;
        }
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        series.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / (n - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn insufficient_history_falls_back_to_diagonal() {
        let mut estimator = CovarianceEstimator::default_daily();
        for i in 0..5 {
            estimator.add_return("ES", 0.01 * (i as f64 - 2.0));
            estimator.add_return("NQ", -0.01 * (i as f64 - 2.0));
        }
        let symbols = vec!["ES".to_string(), "NQ".to_string()];
        let cov = estimator.covariance(&symbols);
        assert_relative_eq!(cov[(0, 1)], 0.0);
        assert!(cov[(0, 0)] > 0.0);
    }

    #[test]
    fn perfectly_correlated_series() {
        let mut estimator = CovarianceEstimator::default_daily();
        for i in 0..60 {
            let r = ((i as f64) * 0.9).sin() * 0.01;
            estimator.add_return("ES", r);
            estimator.add_return("NQ", r);
        }
        let symbols = vec!["ES".to_string(), "NQ".to_string()];
        let cov = estimator.covariance(&symbols);
        assert_relative_eq!(cov[(0, 0)], cov[(0, 1)], epsilon = 1e-12);
        assert_relative_eq!(cov[(0, 0)], cov[(1, 1)], epsilon = 1e-12);
    }

    #[test]
    fn matrix_is_symmetric() {
        let mut estimator = CovarianceEstimator::default_daily();
        for i in 0..40 {
            estimator.add_return("ES", ((i * 7) % 5) as f64 * 0.004 - 0.008);
            estimator.add_return("NQ", ((i * 3) % 7) as f64 * 0.003 - 0.009);
            estimator.add_return("CL", ((i * 5) % 3) as f64 * 0.006 - 0.006);
        }
        let symbols = vec!["ES".to_string(), "NQ".to_string(), "CL".to_string()];
        let cov = estimator.covariance(&symbols);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(cov[(i, j)], cov[(j, i)]);
            }
        }
    }

    #[test]
    fn window_is_bounded() {
        let mut estimator = CovarianceEstimator::new(0.97, 20, 50);
        for _ in 0..500 {
            estimator.add_return("ES", 0.01);
        }
        assert_eq!(estimator.history_len("ES"), 50);
    }
}
