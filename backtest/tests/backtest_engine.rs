//! End-to-end backtest tests: replay determinism, equity accounting,
//! persistence and the flat-market scenario.

use backtest::BacktestEngine;
use common::{
    AssetClass, Bar, BacktestConfig, DataFrequency, FillPricing, InstrumentRegistry,
    PortfolioConfig, Px, StrategyConfig, Ts,
};
use portfolio::PortfolioManager;
use std::sync::Arc;
use storage::{Database, MemoryDatabase};
use strategies::{Strategy, TrendFollowingConfig, TrendFollowingStrategy};

fn bar(symbol: &str, day: u64, close: f64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        timestamp: Ts::from_millis(1_577_836_800_000 + day * 86_400_000),
        open: Px::new(close),
        high: Px::new(close * 1.001),
        low: Px::new(close * 0.999),
        close: Px::new(close),
        volume: 2_000_000.0,
    }
}

fn flat_series(days: u64) -> Vec<Bar> {
    (0..days).map(|day| bar("ES", day, 4000.0)).collect()
}

fn config(days: u64, store: bool, strict: bool) -> BacktestConfig {
    BacktestConfig {
        start_date: Ts::from_millis(1_577_836_800_000).to_datetime(),
        end_date: Ts::from_millis(1_577_836_800_000 + days * 86_400_000).to_datetime(),
        symbols: vec!["ES".to_string()],
        asset_class: AssetClass::Futures,
        data_freq: DataFrequency::Daily,
        initial_capital: 1_000_000.0,
        commission_rate: 1.75,
        fill_pricing: FillPricing::PrevClose,
        use_risk_management: false,
        use_optimization: false,
        store_trade_details: store,
        strict_persistence: strict,
        results_db_schema: "backtest_results".to_string(),
        benchmark_symbol: None,
        risk_config: Default::default(),
        opt_config: Default::default(),
    }
}

fn trend_manager() -> PortfolioManager {
    let mut strategy_config = StrategyConfig::default();
    strategy_config.trading_params.insert("ES".to_string(), 50.0);
    strategy_config.position_limits.insert("ES".to_string(), 100.0);

    let mut strategy = TrendFollowingStrategy::new(
        "TREND_BT",
        strategy_config,
        TrendFollowingConfig {
            ema_windows: vec![(2, 8), (4, 16)],
            vol_lookback_short: 8,
            vol_lookback_long: 32,
            ..TrendFollowingConfig::default()
        },
    );
    strategy.initialize().unwrap();
    strategy.start().unwrap();

    let registry = Arc::new(InstrumentRegistry::with_default_futures());
    let mut manager =
        PortfolioManager::new("BT_PM", PortfolioConfig::default(), registry).unwrap();
    manager.add_strategy(Box::new(strategy), 0.4, false, false).unwrap();
    manager
}

#[tokio::test]
async fn flat_market_is_a_wash() {
    let database = Arc::new(MemoryDatabase::connected());
    let engine = BacktestEngine::new(config(252, false, false), database).unwrap();
    let mut manager = trend_manager();

    let result = engine.run(&mut manager, flat_series(252)).await.unwrap();

    // No trend, no volatility: nothing to trade and nothing to lose
    assert!(result.summary.total_return.abs() < 1e-6);
    assert_eq!(result.summary.sharpe_ratio, 0.0);
    assert!(result.summary.max_drawdown < 1e-9);
    assert!(result.executions.is_empty());
}

#[tokio::test]
async fn equity_curve_timestamps_strictly_increase() {
    let database = Arc::new(MemoryDatabase::connected());
    let engine = BacktestEngine::new(config(300, false, false), database).unwrap();
    let mut manager = trend_manager();

    let mut bars = Vec::new();
    let mut price = 4000.0;
    for day in 0..300 {
        price *= if day % 2 == 0 { 1.004 } else { 0.998 };
        bars.push(bar("ES", day, price));
    }
    let result = engine.run(&mut manager, bars).await.unwrap();

    assert_eq!(result.equity_curve.len(), 300);
    for window in result.equity_curve.windows(2) {
        assert!(window[0].timestamp < window[1].timestamp);
    }
}

#[tokio::test]
async fn equity_matches_capital_plus_pnl() {
    let database = Arc::new(MemoryDatabase::connected());
    let engine = BacktestEngine::new(config(300, false, false), database).unwrap();
    let mut manager = trend_manager();

    let mut bars = Vec::new();
    let mut price = 4000.0;
    for day in 0..300 {
        price *= 1.003;
        bars.push(bar("ES", day, price));
    }
    let result = engine.run(&mut manager, bars).await.unwrap();

    let realized: f64 = manager.positions().values().map(|p| p.realized_pnl).sum();
    let unrealized: f64 = manager.positions().values().map(|p| p.unrealized_pnl).sum();
    let last = result.equity_curve.last().unwrap().equity;
    assert!((last - (1_000_000.0 + realized + unrealized)).abs() < 1e-6);
}

#[tokio::test]
async fn stored_equity_curve_round_trips() {
    let database = Arc::new(MemoryDatabase::connected());
    let engine = BacktestEngine::new(config(120, false, false), Arc::clone(&database) as Arc<dyn Database>).unwrap();
    let mut manager = trend_manager();

    let result = engine.run(&mut manager, flat_series(120)).await.unwrap();
    let stored = database.equity_curve(&result.run_id);
    assert_eq!(stored, result.equity_curve);

    let summary = database.summary(&result.run_id).expect("summary stored");
    assert!(summary.contains_key("sharpe_ratio"));
    assert!(database.metadata(&result.run_id).is_some());
}

#[tokio::test]
async fn strict_persistence_fails_at_end_of_run() {
    // Disconnected sink: every store fails
    let database = Arc::new(MemoryDatabase::new());
    let engine = BacktestEngine::new(config(60, true, true), database).unwrap();
    let mut manager = trend_manager();

    let err = engine.run(&mut manager, flat_series(60)).await.unwrap_err();
    assert_eq!(err.kind, common::ErrorKind::DatabaseError);
}

#[tokio::test]
async fn non_strict_run_tolerates_persistence_failures() {
    let database = Arc::new(MemoryDatabase::new());
    let engine = BacktestEngine::new(config(60, true, false), database).unwrap();
    let mut manager = trend_manager();

    assert!(engine.run(&mut manager, flat_series(60)).await.is_ok());
}

#[tokio::test]
async fn run_from_database_uses_the_configured_window() {
    let database = Arc::new(MemoryDatabase::connected());
    database.load_bars(AssetClass::Futures, DataFrequency::Daily, &flat_series(400));

    let engine =
        BacktestEngine::new(config(252, false, false), Arc::clone(&database) as Arc<dyn Database>).unwrap();
    let mut manager = trend_manager();
    let result = engine.run_from_database(&mut manager).await.unwrap();

    // Only bars inside [start, end] replay
    assert_eq!(result.equity_curve.len(), 253);
}

#[tokio::test]
async fn trade_details_are_persisted_when_requested() {
    let database = Arc::new(MemoryDatabase::connected());
    let engine = BacktestEngine::new(config(300, true, false), Arc::clone(&database) as Arc<dyn Database>).unwrap();
    let mut manager = trend_manager();

    let mut bars = Vec::new();
    let mut price = 4000.0;
    for day in 0..300 {
        price *= 1.003;
        bars.push(bar("ES", day, price));
    }
    let result = engine.run(&mut manager, bars).await.unwrap();

    assert!(!result.executions.is_empty());
    assert!(database.execution_count() > 0);
    assert!(database.signal_count() > 0);
}
