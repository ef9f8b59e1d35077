//! Forecast scaling and combination
//!
//! Raw EMAC forecasts are normalized so their in-sample mean absolute
//! value equals 10, clipped to +/-20, averaged across span pairs and
//! scaled by the forecast diversification multiplier.

use rustc_hash::FxHashMap;

/// Forecasts are clipped to this absolute value after scaling
pub const FORECAST_CAP: f64 = 20.0;

/// Target mean absolute forecast after normalization
const TARGET_ABS_FORECAST: f64 = 10.0;

/// Raw forecast for one span pair: `emac / (price * vol / 16)`
///
/// The 16 is the annualization carrier of the 16-day convention. Returns
/// `None` when the denominator is degenerate (flat or insufficient
/// history).
#[must_use]
pub fn raw_forecast(emac: f64, price: f64, vol: f64) -> Option<f64> {
    if price <= 0.0 || vol <= 0.0 {
        return None;
    }
    Some(emac / (price * vol / 16.0))
}

/// Running normalizer for one span pair's raw forecast series
///
/// Tracks the in-sample mean absolute raw forecast and rescales so it
/// equals 10, then clips to the cap.
#[derive(Debug, Clone, Default)]
pub struct ForecastScaler {
    count: u64,
    abs_sum: f64,
}

impl ForecastScaler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw forecast and return the normalized, clipped value
    pub fn scale(&mut self, raw: f64) -> f64 {
        self.count += 1;
        self.abs_sum += raw.abs();

        let mean_abs = self.abs_sum / self.count as f64;
        if mean_abs <= f64::EPSILON {
            return 0.0;
        }
        let scaled = raw * (TARGET_ABS_FORECAST / mean_abs);
        scaled.clamp(-FORECAST_CAP, FORECAST_CAP)
    }

    /// Observations seen so far
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Combine normalized forecasts across span pairs
///
/// Simple mean scaled by the FDM for the active pair count, re-clipped.
/// Returns `None` for an empty input.
#[must_use]
pub fn combine_forecasts(forecasts: &[f64], fdm: &FxHashMap<usize, f64>) -> Option<f64> {
    if forecasts.is_empty() {
        return None;
    }
    let mean = forecasts.iter().sum::<f64>() / forecasts.len() as f64;
    let multiplier = fdm.get(&forecasts.len()).copied().unwrap_or(1.0);
    Some((mean * multiplier).clamp(-FORECAST_CAP, FORECAST_CAP))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn default_fdm() -> FxHashMap<usize, f64> {
        [(1, 1.0), (2, 1.03), (3, 1.08), (4, 1.13), (5, 1.19), (6, 1.26)]
            .into_iter()
            .collect()
    }

    #[test]
    fn raw_forecast_rejects_flat_vol() {
        assert!(raw_forecast(1.0, 4000.0, 0.0).is_none());
        assert!(raw_forecast(1.0, 0.0, 0.01).is_none());
    }

    #[test]
    fn raw_forecast_carries_sixteen() {
        let f = raw_forecast(2.0, 100.0, 1.6).unwrap();
        assert_relative_eq!(f, 2.0 / (100.0 * 0.1));
    }

    #[test]
    fn scaler_targets_mean_abs_ten() {
        let mut scaler = ForecastScaler::new();
        // Constant |raw| = 4 -> every scaled value should be exactly 10
        for _ in 0..100 {
            let scaled = scaler.scale(4.0);
            assert_relative_eq!(scaled, 10.0);
        }
    }

    #[test]
    fn scaler_clips_outliers() {
        let mut scaler = ForecastScaler::new();
        for _ in 0..50 {
            scaler.scale(1.0);
        }
        let scaled = scaler.scale(100.0);
        assert_relative_eq!(scaled, FORECAST_CAP);
    }

    #[test]
    fn combine_applies_fdm_and_clips() {
        let fdm = default_fdm();
        let combined = combine_forecasts(&[10.0; 6], &fdm).unwrap();
        assert_relative_eq!(combined, 12.6);

        let saturated = combine_forecasts(&[20.0; 6], &fdm).unwrap();
        assert_relative_eq!(saturated, FORECAST_CAP);
    }

    #[test]
    fn combine_empty_is_none() {
        assert!(combine_forecasts(&[], &default_fdm()).is_none());
    }
}
