//! Exponential moving averages with pandas-equivalent initialization
//!
//! `alpha = 2 / (span + 1)`, seeded with the first observation; the
//! recurrence is `ema_t = alpha * p_t + (1 - alpha) * ema_{t-1}`.

/// Incremental EMA over a single series
#[derive(Debug, Clone)]
pub struct Ema {
    span: usize,
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    #[must_use]
    pub fn new(span: usize) -> Self {
        Self {
            span,
            alpha: 2.0 / (span as f64 + 1.0),
            value: None,
        }
    }

    /// Span this EMA was built with
    #[must_use]
    pub fn span(&self) -> usize {
        self.span
    }

    /// Feed the next observation and return the updated EMA
    pub fn update(&mut self, price: f64) -> f64 {
        let next = match self.value {
            None => price,
            Some(prev) => self.alpha * price + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }

    /// Current EMA value, if any observation has been seen
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Forget all state
    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// EMA crossover: the elementwise difference of a short and a long EMA
/// over the same price series
#[derive(Debug, Clone)]
pub struct Emac {
    short: Ema,
    long: Ema,
}

impl Emac {
    #[must_use]
    pub fn new(short_span: usize, long_span: usize) -> Self {
        Self {
            short: Ema::new(short_span),
            long: Ema::new(long_span),
        }
    }

    #[must_use]
    pub fn short_span(&self) -> usize {
        self.short.span()
    }

    #[must_use]
    pub fn long_span(&self) -> usize {
        self.long.span()
    }

    /// Feed the next price and return `ema_short - ema_long`
    pub fn update(&mut self, price: f64) -> f64 {
        let s = self.short.update(price);
        let l = self.long.update(price);
        s - l
    }

    /// Current crossover value
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match (self.short.value(), self.long.value()) {
            (Some(s), Some(l)) => Some(s - l),
            _ => None,
        }
    }

    /// Current short and long EMA values
    #[must_use]
    pub fn components(&self) -> Option<(f64, f64)> {
        match (self.short.value(), self.long.value()) {
            (Some(s), Some(l)) => Some((s, l)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn seeds_with_first_price() {
        let mut ema = Ema::new(8);
        assert_eq!(ema.value(), None);
        assert_relative_eq!(ema.update(100.0), 100.0);
    }

    #[test]
    fn matches_recurrence() {
        let mut ema = Ema::new(4);
        let alpha = 2.0 / 5.0;
        ema.update(10.0);
        let v = ema.update(12.0);
        assert_relative_eq!(v, alpha * 12.0 + (1.0 - alpha) * 10.0);
    }

    #[test]
    fn constant_series_has_zero_crossover() {
        let mut emac = Emac::new(2, 8);
        for _ in 0..50 {
            emac.update(4000.0);
        }
        assert_relative_eq!(emac.value().unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn rising_series_has_positive_crossover() {
        let mut emac = Emac::new(2, 8);
        let mut price = 100.0;
        for _ in 0..50 {
            price *= 1.01;
            emac.update(price);
        }
        assert!(emac.value().unwrap() > 0.0);
    }
}
