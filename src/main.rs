//! pulsebot - prediction-market wallet intelligence backend.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulsebot_backend::api::{self, AppState};
use pulsebot_backend::copytrade::{
    ConsensusMode, CopyTradeConfig, CopyTradeEngine, DryRunAdapter, ExecutionAdapter, LiveAdapter,
    MonitorConfig, PriceMonitor, WalletExitRegistry,
};
use pulsebot_backend::ingress;
use pulsebot_backend::leaderboard;
use pulsebot_backend::marketdata::MarketDataClient;
use pulsebot_backend::models::Config;
use pulsebot_backend::olap::EventStore;
use pulsebot_backend::pnl::{compute_wallet_pnl, PnlOptions};
use pulsebot_backend::stores::{AlertStore, LogStore, PositionStore};

#[derive(Parser)]
#[command(name = "pulsebot", about = "Prediction-market wallet intelligence backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server with the copy-trade core (default).
    Serve,
    /// Compute a single wallet's PnL report and print it as JSON.
    Pnl {
        #[arg(long)]
        wallet: String,
        /// Mark overrides as `condition:price`, repeatable.
        #[arg(long)]
        mark: Vec<String>,
    },
    /// Rebuild and publish the leaderboard, then print the refresh report.
    RefreshLeaderboard,
    /// Load a JSON dataset (events, token map, resolutions, facts) into the
    /// event store.
    Ingest {
        #[arg(long)]
        file: std::path::PathBuf,
    },
}

#[derive(serde::Deserialize)]
struct TokenMappingRow {
    token_id: String,
    condition_id: String,
    outcome_index: u32,
}

#[derive(serde::Deserialize)]
struct ResolutionRow {
    condition_id: String,
    payout_numerators: Vec<f64>,
    resolved_at: chrono::DateTime<chrono::Utc>,
}

#[derive(serde::Deserialize)]
struct FactRow {
    wallet: String,
    condition_id: String,
    entry_time: chrono::DateTime<chrono::Utc>,
    resolved_at: Option<chrono::DateTime<chrono::Utc>>,
    is_closed: bool,
    cost_usd: f64,
    pnl_usd: f64,
}

#[derive(serde::Deserialize)]
struct Dataset {
    #[serde(default)]
    events: Vec<pulsebot_backend::models::TradeEvent>,
    #[serde(default)]
    token_map: Vec<TokenMappingRow>,
    #[serde(default)]
    resolutions: Vec<ResolutionRow>,
    #[serde(default)]
    facts: Vec<FactRow>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load configuration")?;
    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Pnl { wallet, mark } => print_wallet_pnl(&config, &wallet, &mark).await,
        Command::RefreshLeaderboard => print_leaderboard_refresh(&config).await,
        Command::Ingest { file } => ingest_dataset(&config, &file),
    }
}

fn ingest_dataset(config: &Config, path: &std::path::Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read dataset {}", path.display()))?;
    let dataset: Dataset = serde_json::from_str(&raw).context("parse dataset")?;

    let store = EventStore::open(&config.database_path)?;
    let inserted = store.insert_events(&dataset.events)?;
    for row in &dataset.token_map {
        store.upsert_token_mapping(&row.token_id, &row.condition_id, row.outcome_index)?;
    }
    for row in &dataset.resolutions {
        store.upsert_resolution(&row.condition_id, &row.payout_numerators, row.resolved_at)?;
    }
    for row in &dataset.facts {
        store.insert_fact(
            &row.wallet,
            &row.condition_id,
            row.entry_time,
            row.resolved_at,
            row.is_closed,
            row.cost_usd,
            row.pnl_usd,
        )?;
    }

    info!(
        "ingested {} new event(s), {} token mapping(s), {} resolution(s), {} fact(s)",
        inserted,
        dataset.token_map.len(),
        dataset.resolutions.len(),
        dataset.facts.len()
    );
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    info!("pulsebot starting");

    let store = EventStore::open(&config.database_path)?;
    let log = Arc::new(LogStore::new());
    let alerts = Arc::new(AlertStore::new());
    let positions = Arc::new(PositionStore::new());
    let exits = Arc::new(WalletExitRegistry::new());

    let market_data = Arc::new(MarketDataClient::new(&config.market_data_url)?);
    let monitor = Arc::new(PriceMonitor::new(
        MonitorConfig {
            poll_interval_ms: config.price_poll_interval_ms,
            ..Default::default()
        },
        Arc::clone(&positions),
        Arc::clone(&alerts),
        market_data,
        Arc::clone(&exits),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Engine construction faults are fatal to the copy-trade engine only;
    // the PnL and leaderboard surfaces keep serving.
    match build_engine(&config, &log, &alerts, &positions, &exits, &monitor) {
        Ok(engine) => {
            info!(
                "copy-trade engine watching {} wallet(s), consensus requires {}",
                engine.watched_wallets().len(),
                engine.required_count()
            );
            tokio::spawn(ingress::run(
                store.clone(),
                engine,
                config.ingress_poll_interval_ms,
                shutdown_rx.clone(),
            ));
        }
        Err(e) => {
            warn!("copy-trade engine disabled: {:#}", e);
        }
    }

    let state = AppState {
        store,
        log,
        alerts,
        positions,
        monitor: Arc::clone(&monitor),
        cron_secret: config.cron_secret.clone(),
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!("listening on {}", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await;
    if let Err(e) = result {
        error!("server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    monitor.stop();
    Ok(())
}

fn build_engine(
    config: &Config,
    log: &Arc<LogStore>,
    alerts: &Arc<AlertStore>,
    positions: &Arc<PositionStore>,
    exits: &Arc<WalletExitRegistry>,
    monitor: &Arc<PriceMonitor>,
) -> Result<Arc<CopyTradeEngine>> {
    let Some(consensus_mode) = ConsensusMode::parse(&config.consensus_mode) else {
        bail!("unknown consensus mode '{}'", config.consensus_mode);
    };
    let engine_config = CopyTradeConfig {
        consensus_mode,
        n_required: config.n_required,
        min_source_notional_usd: config.min_source_notional_usd,
        max_copy_per_trade_usd: config.max_copy_per_trade_usd,
        dry_run: config.dry_run,
        enable_logging: config.enable_logging,
        ..Default::default()
    };
    let adapter: Arc<dyn ExecutionAdapter> = if config.dry_run {
        Arc::new(DryRunAdapter)
    } else {
        Arc::new(LiveAdapter)
    };
    let allowlist: Option<HashSet<String>> = config
        .condition_allowlist
        .as_ref()
        .map(|list| list.iter().cloned().collect());

    let engine = CopyTradeEngine::new(
        engine_config,
        &config.copy_wallets,
        allowlist,
        adapter,
        Arc::clone(log),
        Arc::clone(alerts),
        Arc::clone(positions),
        Arc::clone(exits),
        Arc::clone(monitor),
    )?;
    Ok(Arc::new(engine))
}

async fn print_wallet_pnl(config: &Config, wallet: &str, marks: &[String]) -> Result<()> {
    let store = EventStore::open(&config.database_path)?;
    let mut options = PnlOptions::default();
    for mark in marks {
        let Some((condition, price)) = mark.split_once(':') else {
            bail!("bad mark override '{}', expected condition:price", mark);
        };
        let price: f64 = price
            .parse()
            .with_context(|| format!("bad mark price '{}'", price))?;
        options
            .price_overrides
            .insert(condition.to_lowercase(), price);
    }

    let wallet = wallet.to_string();
    let report =
        tokio::task::spawn_blocking(move || compute_wallet_pnl(&store, &wallet, &options))
            .await??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn print_leaderboard_refresh(config: &Config) -> Result<()> {
    let store = EventStore::open(&config.database_path)?;
    let report =
        tokio::task::spawn_blocking(move || leaderboard::refresh_leaderboard(&store, chrono::Utc::now()))
            .await??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
