use anyhow::{Context, Result};
use clap::Parser;
use crash_api::{start_server, AppState};
use crash_hub::Hub;
use crash_types::EngineConfig;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about = "crash round-engine server", long_about = None)]
struct Args {
    #[arg(long, env = "LUMINA_CRASH_LISTEN_PORT", default_value_t = 3000)]
    listen_port: u16,

    /// Accepted for forward compatibility with a persistent document store; unused.
    #[arg(long, env = "LUMINA_CRASH_STORE_URI")]
    store_uri: Option<String>,

    #[arg(
        long,
        env = "LUMINA_CRASH_UPSTREAM_URL",
        default_value = "https://api.coingecko.com/api/v3/simple/price"
    )]
    upstream_url: String,

    #[arg(long, env = "LUMINA_CRASH_CACHE_TTL_MS", default_value_t = 10_000)]
    cache_ttl_ms: u64,

    #[arg(long, env = "LUMINA_CRASH_ROUND_PERIOD_MS", default_value_t = 10_000)]
    round_period_ms: u64,

    #[arg(long, env = "LUMINA_CRASH_MAX_CRASH", default_value = "120.00")]
    max_crash: Decimal,

    #[arg(long, env = "LUMINA_CRASH_BETTING_WINDOW_MS", default_value_t = 3_000)]
    betting_window_ms: u64,

    #[arg(long, env = "LUMINA_CRASH_TICK_MS", default_value_t = 100)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let args = Args::parse();
    info!("starting crash-node");

    if let Some(store_uri) = &args.store_uri {
        info!(%store_uri, "persistence connection string accepted but unused by the in-process store");
    }

    let config = EngineConfig {
        cache_ttl_ms: args.cache_ttl_ms,
        round_period_ms: args.round_period_ms,
        betting_window_ms: args.betting_window_ms,
        tick_ms: args.tick_ms,
        max_crash: args.max_crash,
        upstream_url: args.upstream_url.clone(),
        ..EngineConfig::default()
    };

    let ledger = Arc::new(crash_ledger::Ledger::new());
    let oracle = Arc::new(crash_oracle::PriceOracle::new(
        config.upstream_url.clone(),
        config.cache_ttl_ms,
        config.upstream_timeout_ms,
    ));

    let (event_tx, event_rx) = mpsc::channel(1024);
    let (engine, engine_handle) = crash_engine::Engine::new(config, ledger.clone(), event_tx);

    if let Err(err) = engine.reconcile_on_startup() {
        error!(%err, "startup reconciliation failed");
    }

    let engine_task = tokio::spawn(engine.run());

    let (hub, hub_handle) = Hub::new(engine_handle.clone(), event_rx);
    let hub_task = tokio::spawn(hub.run());

    let state = AppState {
        engine: engine_handle.clone(),
        ledger,
        oracle,
        hub: hub_handle,
    };
    let listen_port = args.listen_port;
    let api_task = tokio::spawn(start_server(state, listen_port));

    info!("crash-node running. Press Ctrl+C to stop.");
    signal::ctrl_c().await.context("waiting on ctrl-c")?;
    info!("shutdown signal received, crashing the live round and closing observer connections");

    // Crashes a live round (revealing its seed, settling losers) before the
    // engine's loop exits. The hub's event channel then closes on its own,
    // which drains every attached observer's outbound queue and ends its
    // connection task without leaving a round's outcome ambiguous.
    engine_handle.shutdown().await;
    let _ = hub_task.await;
    api_task.abort();
    let _ = engine_task.await;

    Ok(())
}
