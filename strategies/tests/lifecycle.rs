//! Cross-strategy lifecycle tests
//!
//! Every strategy behaves identically through the state machine and the
//! on_data guards, regardless of its signal logic.

use common::{Bar, ErrorKind, Px, StrategyConfig, Ts};
use strategies::{
    MeanReversionConfig, MeanReversionStrategy, RegimeFxConfig, RegimeFxStrategy, Strategy,
    StrategyState, TrendFollowingConfig, TrendFollowingStrategy,
};

fn config_for(symbols: &[&str]) -> StrategyConfig {
    let mut config = StrategyConfig::default();
    for symbol in symbols {
        config.trading_params.insert((*symbol).to_string(), 1.0);
        config.position_limits.insert((*symbol).to_string(), 10_000.0);
    }
    config
}

fn all_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(TrendFollowingStrategy::new(
            "LIFE_TREND",
            config_for(&["ES"]),
            TrendFollowingConfig::default(),
        )),
        Box::new(MeanReversionStrategy::new(
            "LIFE_MR",
            config_for(&["AAPL"]),
            MeanReversionConfig::default(),
        )),
        Box::new(RegimeFxStrategy::new(
            "LIFE_FX",
            config_for(&["6E", "6B", "6J", "6A", "6C"]),
            RegimeFxConfig::default(),
        )),
    ]
}

fn bar(symbol: &str, day: u64, close: f64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        timestamp: Ts::from_millis(1_600_000_000_000 + day * 86_400_000),
        open: Px::new(close),
        high: Px::new(close * 1.01),
        low: Px::new(close * 0.99),
        close: Px::new(close),
        volume: 10_000.0,
    }
}

#[test]
fn lifecycle_edges_are_uniform() {
    for mut strategy in all_strategies() {
        assert_eq!(strategy.state(), StrategyState::Created);

        // Start before initialize is illegal
        let err = strategy.start().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidStateTransition);
        assert_eq!(strategy.state(), StrategyState::Created);

        strategy.initialize().unwrap();
        assert_eq!(strategy.state(), StrategyState::Initialized);

        strategy.start().unwrap();
        strategy.pause().unwrap();
        assert_eq!(strategy.state(), StrategyState::Paused);

        // Bars while paused are rejected
        let err = strategy.on_data(&[bar("ES", 1, 100.0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StrategyNotRunning);

        strategy.resume().unwrap();
        strategy.stop().unwrap();
        assert_eq!(strategy.state(), StrategyState::Stopped);

        // Stopped strategies reject new bars
        let err = strategy.on_data(&[bar("ES", 2, 100.0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StrategyNotRunning);
    }
}

#[test]
fn empty_batch_never_mutates() {
    for mut strategy in all_strategies() {
        strategy.initialize().unwrap();
        strategy.start().unwrap();
        strategy.on_data(&[]).unwrap();
        assert!(strategy.positions().is_empty());
        assert!(strategy.signals().is_empty());
    }
}

#[test]
fn positions_only_for_observed_symbols() {
    let mut strategy = MeanReversionStrategy::new(
        "OBS_MR",
        config_for(&["AAPL", "MSFT"]),
        MeanReversionConfig::default(),
    );
    strategy.initialize().unwrap();
    strategy.start().unwrap();

    for day in 0..30 {
        strategy.on_data(&[bar("AAPL", day, 100.0)]).unwrap();
    }

    // MSFT is in the universe but has seen no bars
    assert!(strategy.positions().contains_key("AAPL"));
    assert!(!strategy.positions().contains_key("MSFT"));
}

#[test]
fn strategy_configs_roundtrip_as_json() {
    let trend = TrendFollowingConfig::default();
    let json = serde_json::to_string(&trend).unwrap();
    assert_eq!(trend, serde_json::from_str(&json).unwrap());

    let mr = MeanReversionConfig::default();
    let json = serde_json::to_string(&mr).unwrap();
    assert_eq!(mr, serde_json::from_str(&json).unwrap());

    let fx = RegimeFxConfig::default();
    let json = serde_json::to_string(&fx).unwrap();
    assert_eq!(fx, serde_json::from_str(&json).unwrap());
}

#[test]
fn dispersion_shock_flips_fx_regime() {
    let symbols = ["6E", "6B", "6J", "6A", "6C"];
    let mut strategy = RegimeFxStrategy::new(
        "SHOCK_FX",
        config_for(&symbols),
        RegimeFxConfig {
            zscore_lookback: 60,
            ..RegimeFxConfig::default()
        },
    );
    strategy.initialize().unwrap();
    strategy.start().unwrap();

    // Quiet phase: every symbol oscillates with its own fixed amplitude,
    // so cross-sectional dispersion is constant and the regime undefined
    let mut day = 0;
    for _ in 0..120 {
        let batch: Vec<Bar> = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| {
                let amplitude = 0.001 * (i as f64 + 1.0);
                let close = 1.0 * (1.0 + amplitude * if day % 2 == 0 { 1.0 } else { -1.0 });
                bar(symbol, day, close)
            })
            .collect();
        strategy.on_data(&batch).unwrap();
        day += 1;
    }
    assert_eq!(strategy.regime(), strategies::MarketRegime::Undefined);

    // Volatility shock on the leaders: dispersion explodes upward and
    // the book flips to mean reversion
    for _ in 0..40 {
        let batch: Vec<Bar> = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| {
                let amplitude = if i < 2 { 0.05 } else { 0.001 * (i as f64 + 1.0) };
                let close = 1.0 * (1.0 + amplitude * if day % 2 == 0 { 1.0 } else { -1.0 });
                bar(symbol, day, close)
            })
            .collect();
        strategy.on_data(&batch).unwrap();
        day += 1;
    }
    assert_eq!(strategy.regime(), strategies::MarketRegime::MeanReversion);
    assert!(strategy.dispersion_zscore() > 0.5);
}
