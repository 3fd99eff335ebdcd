use anyhow::Result;
use clap::Parser;
use crash_types::{Asset, EngineConfig};
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "crash round-engine load simulation")]
struct Args {
    /// Number of simulated players created for the run.
    #[arg(long, default_value_t = 200)]
    players: usize,
    /// Total wager-then-resolve actions attempted across all players.
    #[arg(long, default_value_t = 20_000)]
    actions: usize,
    /// Starting balance airdropped to each player, in the wagered asset.
    #[arg(long, default_value_t = 50_000)]
    seed_balance: u64,
}

fn player_id(index: usize) -> String {
    format!("sim-player-{index}")
}

fn build_players(ledger: &crash_ledger::Ledger, count: usize, seed_balance: u64) -> Vec<String> {
    let amount = Decimal::from_u64(seed_balance).unwrap_or(Decimal::ZERO);
    (0..count)
        .map(|i| {
            let id = player_id(i);
            let mut initial = HashMap::new();
            initial.insert(Asset::Btc, amount);
            ledger
                .create_player(id.clone(), format!("sim-{i}"), initial)
                .expect("simulated player ids are unique");
            id
        })
        .collect()
}

#[derive(Default)]
struct Tally {
    wagers_placed: AtomicU64,
    wagers_rejected: AtomicU64,
    cashouts: AtomicU64,
    crashed_out: AtomicU64,
    staked_micros: AtomicU64,
    paid_micros: AtomicU64,
}

impl Tally {
    fn record_stake(&self, amount: Decimal) {
        self.staked_micros.fetch_add(to_micros(amount), Ordering::Relaxed);
    }

    fn record_payout(&self, amount: Decimal) {
        self.paid_micros.fetch_add(to_micros(amount), Ordering::Relaxed);
    }
}

fn to_micros(amount: Decimal) -> u64 {
    (amount * Decimal::new(1_000_000, 0)).to_f64().unwrap_or(0.0).max(0.0) as u64
}

fn from_micros(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

/// One player's lifetime: place a stake, sometimes cash out early, then wait
/// for the round to turn over before trying again. Mirrors the shape of a
/// real client driving the facade's `/wagers` and `/cashout` endpoints, just
/// talking to the engine handle directly instead of over HTTP.
async fn run_player(
    engine: crash_engine::EngineHandle,
    oracle: Arc<crash_oracle::PriceOracle>,
    player_id: String,
    attempts: usize,
    tally: Arc<Tally>,
) {
    for _ in 0..attempts {
        let stake = Decimal::new(rand::thread_rng().gen_range(1..=5), 0);
        let price = oracle.price(Asset::Btc).await;
        match engine.place_wager(player_id.clone(), stake, Asset::Btc, price).await {
            Err(_) => {
                tally.wagers_rejected.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                tally.wagers_placed.fetch_add(1, Ordering::Relaxed);
                tally.record_stake(stake);

                if rand::thread_rng().gen_bool(0.7) {
                    let hold_ms = rand::thread_rng().gen_range(0..40);
                    tokio::time::sleep(std::time::Duration::from_millis(hold_ms)).await;
                    match engine.cash_out(player_id.clone()).await {
                        Ok(receipt) => {
                            tally.cashouts.fetch_add(1, Ordering::Relaxed);
                            tally.record_payout(receipt.payout_fiat);
                        }
                        Err(_) => {
                            tally.crashed_out.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                } else {
                    tally.crashed_out.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let started_round = match engine.snapshot_state().await {
            Ok(snapshot) => snapshot.round_id,
            Err(_) => break,
        };
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            match engine.snapshot_state().await {
                Ok(snapshot) if snapshot.round_id != started_round => break,
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    }
}

async fn run_simulation(args: &Args) -> Result<()> {
    let ledger = Arc::new(crash_ledger::Ledger::new());
    let players = build_players(&ledger, args.players, args.seed_balance);

    let config = EngineConfig {
        betting_window_ms: 30,
        tick_ms: 5,
        round_period_ms: 60,
        ..EngineConfig::default()
    };
    let oracle = Arc::new(crash_oracle::PriceOracle::new(
        "http://127.0.0.1:1/unreachable".to_string(),
        config.cache_ttl_ms,
        50,
    ));
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(1024);
    tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

    let (engine, engine_handle) = crash_engine::Engine::new(config, ledger.clone(), event_tx);
    let engine_task = tokio::spawn(engine.run());

    let tally = Arc::new(Tally::default());
    let attempts_per_player = (args.actions / players.len().max(1)).max(1);

    let start = Instant::now();
    let mut handles = Vec::with_capacity(players.len());
    for id in players.iter().cloned() {
        handles.push(tokio::spawn(run_player(
            engine_handle.clone(),
            oracle.clone(),
            id,
            attempts_per_player,
            tally.clone(),
        )));
    }
    for handle in handles {
        let _ = handle.await;
    }
    let elapsed = start.elapsed();

    engine_handle.shutdown().await;
    let _ = engine_task.await;

    let placed = tally.wagers_placed.load(Ordering::Relaxed);
    let rejected = tally.wagers_rejected.load(Ordering::Relaxed);
    let cashouts = tally.cashouts.load(Ordering::Relaxed);
    let crashed = tally.crashed_out.load(Ordering::Relaxed);
    let staked = from_micros(tally.staked_micros.load(Ordering::Relaxed));
    let paid = from_micros(tally.paid_micros.load(Ordering::Relaxed));
    let attempted = placed + rejected;
    let throughput = if elapsed.as_secs_f64() > 0.0 {
        attempted as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    println!("=== crash round-engine load simulation ===");
    println!("Players: {}", players.len());
    println!("Seed balance per player: {} BTC", args.seed_balance);
    println!("Actions attempted: {attempted}");
    println!("Wagers placed: {placed}");
    println!("Wagers rejected (closed window / busy): {rejected}");
    println!("Cash-outs honored: {cashouts}");
    println!("Lost to a crash or rejected cash-out: {crashed}");
    println!("Elapsed: {:.2?}", elapsed);
    println!("Actions/sec: {:.2}", throughput);
    println!("Total staked (fiat): {staked:.2}");
    println!("Total paid out (fiat): {paid:.2}");
    println!("House margin (fiat): {:.2}", staked - paid);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    run_simulation(&args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_bootstraps_players_and_balances() {
        let ledger = crash_ledger::Ledger::new();
        let players = build_players(&ledger, 10, 1_000);

        assert_eq!(players.len(), 10);
        let balances = ledger.balances(&players[0]).unwrap();
        assert_eq!(balances.get(&Asset::Btc).copied().unwrap_or_default(), Decimal::new(1_000, 0));
    }

    #[test]
    fn micros_round_trip_through_decimal_conversion() {
        let amount = Decimal::new(425, 2);
        assert_eq!(from_micros(to_micros(amount)), 4.25);
    }
}
