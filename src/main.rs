//! Pairs Trading Bot - Main Entry Point
//!
//! Paper-trading keeper over in-memory market mocks, with SQLite-backed
//! state so runs survive restarts.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pairs_trading_bot::bot::{
    BorrowAgainstCollateral, HealthAction, HealthGuard, PairsTradingBot, PositionStatus,
};
use pairs_trading_bot::config::Config;
use pairs_trading_bot::error::ServiceError;
use pairs_trading_bot::lending::LendingAdapter;
use pairs_trading_bot::market::{
    Address, MockLendingMarket, MockPriceOracle, MockSwapVenue, PriceOracle,
};
use pairs_trading_bot::persistence::{PersistedState, PersistenceManager};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Pairs Trading Bot CLI
#[derive(Parser)]
#[command(name = "pairs-trading-bot")]
#[command(version, about = "Market-neutral pairs trading over lending + swap venues")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the paper-trading keeper loop
    Run {
        /// Seconds between keeper cycles
        #[arg(short, long, default_value = "10")]
        interval: u64,

        /// Capital for the pair opened on a fresh start
        #[arg(short, long, default_value = "1000")]
        capital: f64,
    },

    /// Run the scripted end-to-end demo scenario once
    Demo,

    /// Show persisted ledger state
    Status {
        /// Path to SQLite database (default: data/bot_state.db)
        #[arg(short, long)]
        db: Option<String>,

        /// Emit the state as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Demo) => run_demo(&config).await,
        Some(Commands::Status { db, json }) => {
            let path = db.unwrap_or_else(|| config.persistence.db_path.clone());
            show_status(&path, json)
        }
        Some(Commands::Run { interval, capital }) => {
            let capital = Decimal::from_f64_retain(capital).unwrap_or(dec!(1000));
            run_keeper(&config, interval, capital).await
        }
        None => run_keeper(&config, 10, dec!(1000)).await,
    }
}

/// Wired set of services over the in-memory mocks.
struct PaperStack {
    market: Arc<MockLendingMarket>,
    venue: Arc<MockSwapVenue>,
    oracle: Arc<MockPriceOracle>,
    adapter: Arc<LendingAdapter>,
    bot: PairsTradingBot,
}

/// Build the paper-trading stack: mocks seeded with demo assets and a
/// funded bot account.
async fn build_paper_stack(config: &Config) -> Result<PaperStack> {
    let market = Arc::new(MockLendingMarket::new());
    let venue = Arc::new(MockSwapVenue::new());
    let oracle = Arc::new(MockPriceOracle::new());

    let denom = config.bot.denomination_asset.clone();
    let bot_account = Address::new("bot");

    market.set_balance(&bot_account, &denom, dec!(1000000)).await;
    market.approve(&bot_account, &denom, dec!(1000000)).await;
    market
        .set_reserve(&denom, Address::new(format!("a{denom}")))
        .await;

    for (asset, price) in [
        (denom.clone(), dec!(1)),
        (Address::new("SNX"), dec!(2)),
        (Address::new("LINK"), dec!(1)),
    ] {
        venue.set_price(&asset, price).await;
        oracle.set_price(&asset, price).await;
    }

    let adapter = Arc::new(LendingAdapter::connect(market.clone(), &config.lending).await?);
    let short_leg = Arc::new(BorrowAgainstCollateral::new(venue.clone(), denom));

    let bot = PairsTradingBot::new(
        config.bot.clone(),
        config.execution.clone(),
        bot_account,
        adapter.clone(),
        venue.clone(),
        oracle.clone(),
        short_leg,
    );

    Ok(PaperStack {
        market,
        venue,
        oracle,
        adapter,
        bot,
    })
}

/// Keeper loop: watch drift and collateral health, rebalance or close as
/// needed, snapshot state every cycle.
async fn run_keeper(config: &Config, interval_secs: u64, capital: Decimal) -> Result<()> {
    info!("📝 PAPER TRADING MODE - in-memory market mocks");

    let stack = build_paper_stack(config).await?;
    let health_guard = HealthGuard::default();

    std::fs::create_dir_all(
        std::path::Path::new(&config.persistence.db_path)
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    )?;
    let persistence = PersistenceManager::new(&config.persistence.db_path)?;

    if let Some(state) = persistence.load_state()? {
        info!(
            "📂 Restoring state: {} deposits, {} positions",
            state.deposits.len(),
            state.positions.len()
        );
        stack.adapter.restore(state.deposits).await;
        stack.bot.restore(state.positions, state.next_position_id).await;
    }

    let (snx, link) = (Address::new("SNX"), Address::new("LINK"));

    if stack.bot.live_ids().await.is_empty() {
        info!("🆕 No live positions - opening SNX/LINK pair with {capital}");
        match stack.bot.open_pair(&snx, &link, capital).await {
            Ok(id) => info!("✅ Opened position {id}"),
            Err(e) => error!("Failed to open initial pair: {e}"),
        }
    }

    let mut cycle: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
        }

        cycle += 1;

        // Paper price feed: walk the short asset back and forth so drift
        // actually accumulates and the rebalance path gets exercised.
        let step = Decimal::from(cycle % 7) * dec!(0.005);
        let link_price = dec!(1) + step;
        stack.oracle.set_price(&link, link_price).await;
        stack.venue.set_price(&link, link_price).await;

        for id in stack.bot.live_ids().await {
            let position = match stack.bot.position(id).await {
                Some(p) => p,
                None => continue,
            };
            if position.status == PositionStatus::Rebalancing {
                // A previous close attempt stalled part-way: retry it.
                warn!(id, "Retrying stalled close");
                if let Err(e) = stack.bot.close_pair(id).await {
                    error!(id, "Close retry failed: {e}");
                }
                continue;
            }

            let short_price = match stack.oracle.price(&position.short_asset).await {
                Ok(quote) => quote.value,
                Err(e) => {
                    error!(id, "No price for short asset: {e}");
                    continue;
                }
            };

            match health_guard.evaluate(&position, short_price) {
                HealthAction::Close { id } => {
                    if let Err(e) = stack.bot.close_pair(id).await {
                        error!(id, "Health-driven close failed: {e}");
                    }
                }
                HealthAction::Rebalance { .. } | HealthAction::None => {
                    match stack.bot.rebalance(id).await {
                        Ok(()) => {}
                        Err(ServiceError::StaleOracle { .. }) => {
                            warn!(id, "Skipping rebalance on stale prices");
                        }
                        Err(e) => error!(id, "Rebalance failed: {e}"),
                    }
                }
            }
        }

        let (positions, next_position_id) = stack.bot.snapshot().await;
        let state = PersistedState {
            deposits: stack.adapter.snapshot().await,
            positions,
            next_position_id,
            last_saved: Utc::now(),
        };
        if let Err(e) = persistence.save_state(&state) {
            error!("Failed to persist state: {e}");
        }
    }

    info!("👋 Pairs trading bot shutdown complete");
    Ok(())
}

/// Scripted end-to-end scenario: deposit, open, drift, rebalance, close.
async fn run_demo(config: &Config) -> Result<()> {
    info!("🎬 Running end-to-end demo scenario");

    let stack = build_paper_stack(config).await?;
    let (dai, snx, link) = (
        config.bot.denomination_asset.clone(),
        Address::new("SNX"),
        Address::new("LINK"),
    );

    // 1. Deposit 100 DAI for an independent account.
    let alice = Address::new("alice");
    stack.market.set_balance(&alice, &dai, dec!(100)).await;
    stack.market.approve(&alice, &dai, dec!(100)).await;
    stack.adapter.deposit(&dai, dec!(100), &alice, 0).await?;
    info!(
        "💰 Deposited 100 {dai} for alice, recorded balance = {}",
        stack.adapter.deposited_balance(&alice).await
    );

    // 2. Open a pair: long SNX at 2, short LINK at 1, capital 100.
    let id = stack.bot.open_pair(&snx, &link, dec!(100)).await?;
    let p = stack
        .bot
        .position(id)
        .await
        .context("position missing after open")?;
    info!(
        "📈 Opened pair {id}: long {} {snx}, short {} {link}",
        p.long_notional, p.short_notional
    );

    // 3. LINK rallies past tolerance; rebalance restores neutrality.
    stack.oracle.set_price(&link, dec!(1.5)).await;
    stack.venue.set_price(&link, dec!(1.5)).await;
    stack.bot.rebalance(id).await?;
    let p = stack
        .bot
        .position(id)
        .await
        .context("position missing after rebalance")?;
    info!(
        "⚖️  Rebalanced pair {id}: long {} ({}), short {} ({})",
        p.long_notional,
        p.long_notional * dec!(2),
        p.short_notional,
        p.short_notional * dec!(1.5),
    );

    // 4. Close and show proceeds; a second close must be rejected.
    let (long_proceeds, short_proceeds) = stack.bot.close_pair(id).await?;
    info!("🏁 Closed pair {id}: proceeds long={long_proceeds} short={short_proceeds}");
    match stack.bot.close_pair(id).await {
        Err(ServiceError::UnknownPosition(_)) => {
            info!("✅ Second close correctly rejected (position is terminal)")
        }
        other => warn!("Unexpected result of double close: {other:?}"),
    }

    Ok(())
}

/// Print persisted ledger state.
fn show_status(db_path: &str, json: bool) -> Result<()> {
    let persistence = PersistenceManager::new(db_path)?;
    let Some(state) = persistence.load_state()? else {
        println!("No persisted state at {db_path}");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("Last saved: {}", state.last_saved);
    println!("\nDeposits:");
    for (account, record) in &state.deposits {
        println!(
            "  {account}: principal={} receipt={}",
            record.principal, record.receipt
        );
    }

    println!("\nPositions:");
    for p in &state.positions {
        println!(
            "  #{} [{}] long {} {} / short {} {} (collateral {}, reserve {})",
            p.id,
            p.status.as_str(),
            p.long_notional,
            p.long_asset,
            p.short_notional,
            p.short_asset,
            p.collateral,
            p.denom_reserve,
        );
    }

    Ok(())
}

/// Initialize logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "pairs-bot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pairs_trading_bot=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    Ok(())
}
