//! Backtest run identifiers
//!
//! `<strategy_id>_YYYYMMDD_HHMMSS_mmm` in UTC; unique within a schema
//! for any realistic launch cadence.

use common::Ts;

/// Format a run id for a strategy at a timestamp
#[must_use]
pub fn generate_run_id(strategy_id: &str, ts: Ts) -> String {
    let datetime = ts.to_datetime();
    format!("{}_{}", strategy_id, datetime.format("%Y%m%d_%H%M%S_%3f"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_utc_with_millis() {
        let dt = chrono::Utc
            .with_ymd_and_hms(2024, 3, 5, 14, 30, 45)
            .unwrap()
            + chrono::Duration::milliseconds(123);
        let run_id = generate_run_id("TREND_ES", Ts::from_datetime(dt));
        assert_eq!(run_id, "TREND_ES_20240305_143045_123");
    }

    #[test]
    fn distinct_timestamps_are_distinct_ids() {
        let a = generate_run_id("S", Ts::from_millis(1_700_000_000_000));
        let b = generate_run_id("S", Ts::from_millis(1_700_000_000_001));
        assert_ne!(a, b);
    }
}
