//! Blended rolling volatility
//!
//! `vol_t = 0.7 * stdev(p, W_s) + 0.3 * stdev(p, min(W_l, t))` — the long
//! window grows with the sample until it reaches `W_l`, then stays fixed.
//! The result is a price-scale standard deviation.

use std::collections::VecDeque;

/// Population standard deviation of a slice
#[must_use]
pub fn rolling_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.sqrt()
}

/// Short/long blended volatility over a bounded price window
#[derive(Debug, Clone)]
pub struct BlendedVol {
    short_window: usize,
    long_window: usize,
    prices: VecDeque<f64>,
}

impl BlendedVol {
    const SHORT_WEIGHT: f64 = 0.7;
    const LONG_WEIGHT: f64 = 0.3;

    #[must_use]
    pub fn new(short_window: usize, long_window: usize) -> Self {
        Self {
            short_window,
            long_window,
            prices: VecDeque::with_capacity(long_window + 1),
        }
    }

    /// Feed the next price and return the blended volatility
    pub fn update(&mut self, price: f64) -> f64 {
        self.prices.push_back(price);
        while self.prices.len() > self.long_window {
            self.prices.pop_front();
        }
        self.value()
    }

    /// Blended price-scale stdev over the current window
    #[must_use]
    pub fn value(&self) -> f64 {
        let n = self.prices.len();
        if n < 2 {
            return 0.0;
        }
        let all: Vec<f64> = self.prices.iter().copied().collect();

        let short_start = n.saturating_sub(self.short_window);
        let short_vol = rolling_stdev(&all[short_start..]);

        // The long leg uses everything collected so far, capped at W_l by
        // the deque bound above.
        let long_vol = rolling_stdev(&all);

        Self::SHORT_WEIGHT * short_vol + Self::LONG_WEIGHT * long_vol
    }

    /// Observations currently in the window
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
