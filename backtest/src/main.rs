//! Demo backtest runner
//!
//! Drives the trend following strategy over a synthetic ES random walk
//! and prints the performance summary.

use anyhow::Result;
use backtest::BacktestEngine;
use common::{
    AssetClass, Bar, BacktestConfig, DataFrequency, FillPricing, InstrumentRegistry,
    PortfolioConfig, Px, StrategyConfig, Ts,
};
use portfolio::PortfolioManager;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use storage::MemoryDatabase;
use strategies::{Strategy, TrendFollowingConfig, TrendFollowingStrategy};
use tracing::info;

fn synthetic_series(symbol: &str, days: u64, start_price: f64, seed: u64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = start_price;
    let mut bars = Vec::with_capacity(days as usize);
    for day in 0..days {
        let drift = 0.0002;
        let shock: f64 = rng.gen_range(-0.01..0.01);
        price *= 1.0 + drift + shock;

        let open = price * (1.0 + rng.gen_range(-0.002..0.002));
        let close = price;
        let high = open.max(close) * 1.003;
        let low = open.min(close) * 0.997;
        bars.push(Bar {
            symbol: symbol.to_string(),
            timestamp: Ts::from_millis(1_577_836_800_000 + day * 86_400_000),
            open: Px::new(open),
            high: Px::new(high),
            low: Px::new(low),
            close: Px::new(close),
            volume: 1_500_000.0 + rng.gen_range(0.0..500_000.0),
        });
    }
    bars
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let bars = synthetic_series("ES", 500, 4000.0, 42);
    let start_date = bars.first().unwrap().timestamp.to_datetime();
    let end_date = bars.last().unwrap().timestamp.to_datetime();

    let mut strategy_config = StrategyConfig::default();
    strategy_config.trading_params.insert("ES".to_string(), 50.0);
    strategy_config.position_limits.insert("ES".to_string(), 200.0);

    let mut strategy = TrendFollowingStrategy::new(
        "TREND_DEMO",
        strategy_config,
        TrendFollowingConfig::default(),
    );
    strategy.initialize()?;
    strategy.start()?;

    let registry = Arc::new(InstrumentRegistry::with_default_futures());
    let mut manager = PortfolioManager::new("DEMO_PM", PortfolioConfig::default(), registry)?;
    manager.add_strategy(Box::new(strategy), 0.4, false, false)?;

    let config = BacktestConfig {
        start_date,
        end_date,
        symbols: vec!["ES".to_string()],
        asset_class: AssetClass::Futures,
        data_freq: DataFrequency::Daily,
        initial_capital: 1_000_000.0,
        commission_rate: 1.75,
        fill_pricing: FillPricing::PrevClose,
        use_risk_management: false,
        use_optimization: false,
        store_trade_details: false,
        strict_persistence: false,
        results_db_schema: "backtest_results".to_string(),
        benchmark_symbol: Some("ES".to_string()),
        risk_config: Default::default(),
        opt_config: Default::default(),
    };

    let database = Arc::new(MemoryDatabase::connected());
    let engine = BacktestEngine::new(config, database)?;
    let result = engine.run(&mut manager, bars).await?;

    info!(run_id = %result.run_id, "run finished");
    println!("run:            {}", result.run_id);
    println!("total return:   {:+.2}%", result.summary.total_return * 100.0);
    println!("annualized vol: {:.2}%", result.summary.volatility * 100.0);
    println!("sharpe:         {:.2}", result.summary.sharpe_ratio);
    println!("max drawdown:   {:.2}%", result.summary.max_drawdown * 100.0);
    println!("executions:     {}", result.executions.len());
    Ok(())
}
