use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};

use polymirror::api::router::create_router;
use polymirror::config::{AppConfig, ExecutionMode};
use polymirror::db::{self, MemoryRepository, PgRepository, Repository};
use polymirror::engine::replay::{self, load_outcomes_file, load_signals_file, parse_latencies};
use polymirror::engine::Engine;
use polymirror::models::{OutcomeSide, Venue};
use polymirror::services::resolution::run_resolution_poller;
use polymirror::venues::{KalshiAdapter, PolymarketAdapter, RecordedVenue, VenueAdapter};
use polymirror::AppState;

const REPLAY_SIGNAL_LIMIT: i64 = 100_000;

#[derive(Parser)]
#[command(name = "polymirror", version, about = "Copy-trade mirror and latency replay harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine (SIM, SHADOW or LIVE) with the ops HTTP server.
    Run {
        #[arg(long, env = "EXECUTION_MODE")]
        mode: Option<ExecutionMode>,
        /// Signals or raw trades to process in SIM mode (JSON array).
        #[arg(long)]
        input: Option<PathBuf>,
        /// Market outcomes to settle after a SIM run.
        #[arg(long)]
        outcomes: Option<PathBuf>,
    },
    /// Replay stored signals at several latencies and write a CSV.
    Replay {
        /// Replay signals stored in the last N days.
        #[arg(long, conflicts_with = "input", required_unless_present = "input")]
        days: Option<i64>,
        /// Replay signals (or raw trades) from a JSON file.
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value = "2000,5000,10000")]
        latencies: String,
        /// Recorded target-venue markets and orderbooks.
        #[arg(long)]
        market_data: Option<PathBuf>,
        #[arg(long)]
        outcomes: Option<PathBuf>,
        #[arg(long, default_value = "replay.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;

    match cli.command {
        Command::Run { mode, input, outcomes } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            run(config, input, outcomes).await
        }
        Command::Replay {
            days,
            input,
            latencies,
            market_data,
            outcomes,
            output,
        } => {
            let latencies = parse_latencies(&latencies)?;
            run_replay(config, days, input, latencies, market_data, outcomes, output).await
        }
    }
}

async fn open_repository(config: &AppConfig) -> anyhow::Result<Arc<dyn Repository>> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            tracing::info!("Database connected");
            Ok(Arc::new(PgRepository::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory repository");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

fn load_outcomes(path: Option<&PathBuf>) -> anyhow::Result<HashMap<String, OutcomeSide>> {
    path.map(|p| load_outcomes_file(p)).transpose().map(Option::unwrap_or_default)
}

async fn run(config: AppConfig, input: Option<PathBuf>, outcomes: Option<PathBuf>) -> anyhow::Result<()> {
    let metrics_handle = polymirror::metrics::init_metrics();
    let repository = open_repository(&config).await?;

    let (source, target): (Arc<dyn VenueAdapter>, Arc<dyn VenueAdapter>) = match config.mode {
        ExecutionMode::Sim => {
            let path = config
                .recorded_market_data
                .as_deref()
                .context("SIM mode needs RECORDED_MARKET_DATA")?;
            (
                Arc::new(RecordedVenue::empty(Venue::Polymarket)),
                Arc::new(RecordedVenue::from_file(path)?),
            )
        }
        ExecutionMode::Shadow | ExecutionMode::Live => {
            let http = reqwest::Client::new();
            (
                Arc::new(PolymarketAdapter::new(http.clone(), &config)),
                Arc::new(KalshiAdapter::new(http, &config)?),
            )
        }
    };

    let engine = Arc::new(Engine::new(config.clone(), repository, source.clone(), target).await?);

    let state = AppState {
        engine: engine.clone(),
        config: config.clone(),
        metrics_handle,
    };
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    let router = create_router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server exited");
        }
    });

    let signal_engine = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_engine.stop();
        }
    });

    match config.mode {
        ExecutionMode::Sim => {
            let path = input.context("SIM mode needs --input")?;
            let signals = load_signals_file(&path, &config.tracked_wallet)?;
            engine.run_sim(signals).await?;

            let mut resolved: Vec<_> = load_outcomes(outcomes.as_ref())?.into_iter().collect();
            resolved.sort();
            for (market_id, outcome) in resolved {
                engine.settle_market(&market_id, outcome).await?;
            }
            let status = engine.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        ExecutionMode::Shadow | ExecutionMode::Live => {
            let resolver = engine.clone();
            let interval = config.resolution_interval_secs;
            tokio::spawn(async move {
                run_resolution_poller(resolver, source, interval).await;
            });
            engine.run_shadow().await?;
        }
    }

    engine.shutdown().await?;
    Ok(())
}

async fn run_replay(
    config: AppConfig,
    days: Option<i64>,
    input: Option<PathBuf>,
    latencies: Vec<u64>,
    market_data: Option<PathBuf>,
    outcomes: Option<PathBuf>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let signals = match (input, days) {
        (Some(path), _) => load_signals_file(&path, &config.tracked_wallet)?,
        (None, Some(days)) => {
            let url = config
                .database_url
                .as_deref()
                .context("--days needs DATABASE_URL")?;
            let repository = PgRepository::new(db::init_pool(url).await?);
            repository
                .get_signals_since(Utc::now() - Duration::days(days), REPLAY_SIGNAL_LIMIT)
                .await?
        }
        (None, None) => anyhow::bail!("replay needs --days or --input"),
    };

    let market_data = market_data.or_else(|| config.recorded_market_data.clone().map(PathBuf::from));
    let target: Arc<dyn VenueAdapter> = match market_data {
        Some(path) => Arc::new(RecordedVenue::from_file(path)?),
        None => {
            tracing::warn!("No recorded market data, every realistic order will miss");
            Arc::new(RecordedVenue::empty(Venue::Kalshi))
        }
    };
    let outcomes = load_outcomes(outcomes.as_ref())?;

    tracing::info!(signals = signals.len(), latencies = ?latencies, "Starting replay");
    let report = replay::run_replay(&config, &signals, &latencies, target, &outcomes).await;
    report.write_csv(&output)?;

    println!("{}", report.render_table());
    tracing::info!(path = %output.display(), rows = report.rows.len(), "Replay CSV written");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
