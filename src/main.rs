//! Symbol Rotator - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use symbol_rotator::candidates::{CandidateSource, FeedCandidateSource};
use symbol_rotator::config::Config;
use symbol_rotator::exchange::{self, Symbol};
use symbol_rotator::persistence::{DashboardStore, Journal, DASHBOARD_FILE};
use symbol_rotator::rotation::{RotationController, RotationSettings};
use symbol_rotator::strategy::StrategyKind;
use symbol_rotator::worker::{TradingWorkerFactory, WorkerContext, WorkerSettings};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Symbol Rotator CLI
#[derive(Parser)]
#[command(name = "symbol-rotator")]
#[command(version, about = "Multi-symbol hedge trading with symbol rotation on Bybit")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rotation controller and its workers (default)
    Run(RunArgs),

    /// Show the dashboard snapshot and journal summary
    Status {
        /// Config file (extension optional)
        #[arg(short, long, default_value = "config")]
        config: String,

        /// Number of rotation events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config")]
    config: String,

    /// Exchange name as configured under `exchanges`
    #[arg(short, long, default_value = "bybit")]
    exchange: String,

    /// Strategy: hedge, long or short
    #[arg(short, long, default_value = "hedge")]
    strategy: StrategyKind,

    /// Account name as configured under `exchanges`
    #[arg(short, long, default_value = "account_1")]
    account_name: String,

    /// Paper trade against live market data
    #[arg(long)]
    paper: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            config: "config".to_string(),
            exchange: "bybit".to_string(),
            strategy: StrategyKind::Hedge,
            account_name: "account_1".to_string(),
            paper: false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { config, limit }) => show_status(&config, limit),
        Some(Commands::Run(args)) => run(args).await,
        None => run(RunArgs::default()).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            Symbol Rotator v{} - {} strategy             ║",
        env!("CARGO_PKG_VERSION"),
        args.strategy
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load_from(&args.config)?;
    config.validate()?;
    let account = config.account(&args.exchange, &args.account_name)?;
    log_config(&config, args.strategy, account.symbols_allowed);

    let paper_balance = if args.paper {
        info!("📝 PAPER TRADING MODE - orders are simulated");
        Some(config.paper.initial_balance)
    } else {
        warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
        None
    };

    let gateway = exchange::connect(account, paper_balance)?;
    let candidates: Arc<dyn CandidateSource> = Arc::new(FeedCandidateSource::new(&config.api)?);

    let journal = match Journal::open(&config.paper.journal_path) {
        Ok(journal) => Some(Arc::new(journal)),
        Err(e) => {
            warn!("⚠️  [JOURNAL] Disabled: {:#}", e);
            None
        }
    };

    let dashboard = if config.bot.dashboard_enabled {
        let store = DashboardStore::new(&config.bot.shared_data_path)?;
        info!("📊 [DASHBOARD] Writing {}", store.path().display());
        Some(Arc::new(store))
    } else {
        None
    };

    let (rotator_tx, rotator_rx) = watch::channel(Arc::new(HashSet::<Symbol>::new()));

    let factory = TradingWorkerFactory::new(WorkerContext {
        gateway: Arc::clone(&gateway),
        candidates: Arc::clone(&candidates),
        rotator_set: rotator_rx,
        settings: WorkerSettings::from_config(&config, account.symbols_allowed, args.strategy),
        dashboard,
        journal: journal.clone(),
    });

    let settings = RotationSettings::from_config(&config, account.symbols_allowed, args.strategy);
    let mut controller = RotationController::new(settings, gateway, candidates, Arc::new(factory), rotator_tx);
    if let Some(journal) = journal {
        controller = controller.with_journal(journal);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    info!("🚀 Starting rotation loop...");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let controller_task = tokio::spawn(controller.run(shutdown_rx));
    if let Err(e) = controller_task.await {
        error!("❌ Rotation controller ended abnormally: {}", e);
    }

    info!("👋 Symbol rotator stopped");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "symbol-rotator.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("symbol_rotator=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config, strategy: StrategyKind, capacity: usize) {
    info!("📋 Configuration:");
    info!("   Strategy: {} (bias {})", strategy, strategy.bias());
    info!("   Symbols Allowed: {}", capacity);
    info!(
        "   Wallet Exposure: {:.2}%",
        config.bot.wallet_exposure * dec!(100)
    );
    info!("   Max Min-Order Value: ${}", config.bot.max_usd_value);
    info!(
        "   Min Volume: {} | Min Distance: {}%",
        config.bot.min_volume, config.bot.min_distance
    );
    info!(
        "   Long Mode: {} | Short Mode: {}",
        config.bot.long_mode, config.bot.short_mode
    );
    if !config.bot.whitelist.is_empty() {
        info!("   Whitelist: {:?}", config.bot.whitelist);
    }
    if !config.bot.blacklist.is_empty() {
        info!("   Blacklist: {:?}", config.bot.blacklist);
    }
    info!(
        "   Tick: {}s | Refresh: {}s | Rotate after: {}s | Grace: {}s",
        config.rotation.tick_interval_secs,
        config.rotation.refresh_interval_secs,
        config.rotation.rotation_threshold_secs,
        config.rotation.retire_grace_secs
    );
    info!("   Worker Interval: {}s", config.worker.interval_secs);
}

/// Print the dashboard snapshot and journal summary.
fn show_status(config_path: &str, limit: usize) -> Result<()> {
    let config = Config::load_from(config_path)?;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                  SYMBOL ROTATOR STATUS                     ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let dashboard_path = Path::new(&config.bot.shared_data_path).join(DASHBOARD_FILE);
    match DashboardStore::load(&dashboard_path) {
        Ok(rows) if !rows.is_empty() => {
            println!("\n📊 Symbols");
            for row in rows.values() {
                let upnl = row.long_upnl + row.short_upnl;
                println!(
                    "   ┌─ {}{}",
                    row.symbol,
                    if row.manage_only { " (manage only)" } else { "" }
                );
                println!("   ├─ Price:    {} | Trend: {}", row.current_price, row.trend);
                println!("   ├─ Volume:   {} | Spread: {}%", row.volume, row.spread);
                println!(
                    "   ├─ Long:     {} @ {}",
                    row.long_pos_qty,
                    format_price(row.long_pos_price)
                );
                println!(
                    "   ├─ Short:    {} @ {}",
                    row.short_pos_qty,
                    format_price(row.short_pos_price)
                );
                println!("   ├─ uPnL:     ${:.4}", upnl);
                println!("   └─ Updated:  {}", row.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        Ok(_) => println!("\n📊 Dashboard is empty"),
        Err(e) => println!("\n❌ No dashboard at {}: {:#}", dashboard_path.display(), e),
    }

    if !Path::new(&config.paper.journal_path).exists() {
        println!("\n❌ Journal not found: {}", config.paper.journal_path);
        return Ok(());
    }

    let journal = Journal::open(&config.paper.journal_path)
        .with_context(|| format!("Failed to open journal {}", config.paper.journal_path))?;

    let rotations = journal.recent_rotations(limit)?;
    if !rotations.is_empty() {
        println!("\n🔄 Recent Rotation Events");
        for record in &rotations {
            println!(
                "   ├─ {} {:<12} {:<8} {}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.symbol,
                record.event,
                record.detail
            );
        }
    }

    let stats = journal.order_stats()?;
    if !stats.is_empty() {
        println!("\n📈 Orders by Symbol");
        for stat in &stats {
            println!(
                "   ├─ {:<12} placed {:>5} | cancelled {:>5}",
                stat.symbol, stat.placed, stat.cancelled
            );
        }
    }

    Ok(())
}

fn format_price(price: Option<Decimal>) -> String {
    price.map_or_else(|| "-".to_string(), |p| p.to_string())
}
