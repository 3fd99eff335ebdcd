pub mod snapshot;

pub use snapshot::{StateSnapshot, VerifyResult};

use crash_types::{now_millis, Asset, CoreError, EngineConfig, Round, RoundState, Transaction, TransactionKind};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Events published outward to the Broadcast Hub. The engine never holds a
/// reference to the hub; it only owns this channel's sending half.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RoundStarted {
        round_id: String,
        hash: [u8; 32],
        start_time: u64,
    },
    MultiplierTick {
        round_id: String,
        multiplier: Decimal,
        now: u64,
    },
    RoundCrashed {
        round_id: String,
        crash_point: Decimal,
        seed: [u8; 32],
        now: u64,
    },
    WagerPlaced {
        round_id: String,
        player_id: String,
        stake_fiat: Decimal,
        stake_asset: Decimal,
        asset: Asset,
    },
    CashoutAccepted {
        round_id: String,
        player_id: String,
        multiplier: Decimal,
        payout_fiat: Decimal,
        asset: Asset,
    },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CashOutReceipt {
    pub round_id: String,
    pub multiplier: Decimal,
    pub payout_fiat: Decimal,
    pub payout_asset: Decimal,
}

#[derive(Debug, Clone)]
pub struct WagerAck {
    pub wager_id: uuid::Uuid,
    pub stake_asset: Decimal,
}

enum EngineCommand {
    PlaceWager {
        player_id: String,
        stake_fiat: Decimal,
        asset: Asset,
        price: Decimal,
        reply: oneshot::Sender<Result<WagerAck, CoreError>>,
    },
    CashOut {
        player_id: String,
        reply: oneshot::Sender<Result<CashOutReceipt, CoreError>>,
    },
    SnapshotState {
        reply: oneshot::Sender<StateSnapshot>,
    },
    VerifyRound {
        round_id: String,
        reply: oneshot::Sender<Option<VerifyResult>>,
    },
    RoundDetails {
        round_id: String,
        reply: oneshot::Sender<Option<Round>>,
    },
    RoundHistory {
        page: crash_ledger::PageParams,
        reply: oneshot::Sender<crash_ledger::Page<Round>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle held by the Broadcast Hub and the Facade. Cloning shares the same
/// underlying engine actor; every call is a round-trip over `mpsc`/`oneshot`
/// so the engine's internal state is only ever touched by its own task.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Places a wager at the given resolved `price`. Returns its id and the
    /// resolved `stake_asset` amount debited. Callers resolve `price` (via
    /// the price oracle) before calling this: the engine's actor loop never
    /// awaits an upstream network call, so a slow quote never delays ticks
    /// or other players' commands.
    pub async fn place_wager(
        &self,
        player_id: String,
        stake_fiat: Decimal,
        asset: Asset,
        price: Decimal,
    ) -> Result<WagerAck, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::PlaceWager {
                player_id,
                stake_fiat,
                asset,
                price,
                reply,
            })
            .await
            .map_err(|_| CoreError::infrastructure("round engine is not running"))?;
        rx.await.map_err(|_| CoreError::infrastructure("round engine dropped the reply"))?
    }

    pub async fn cash_out(&self, player_id: String) -> Result<CashOutReceipt, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::CashOut { player_id, reply })
            .await
            .map_err(|_| CoreError::infrastructure("round engine is not running"))?;
        rx.await.map_err(|_| CoreError::infrastructure("round engine dropped the reply"))?
    }

    pub async fn snapshot_state(&self) -> Result<StateSnapshot, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::SnapshotState { reply })
            .await
            .map_err(|_| CoreError::infrastructure("round engine is not running"))?;
        rx.await.map_err(|_| CoreError::infrastructure("round engine dropped the reply"))
    }

    pub async fn verify_round(&self, round_id: String) -> Result<Option<VerifyResult>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::VerifyRound { round_id, reply })
            .await
            .map_err(|_| CoreError::infrastructure("round engine is not running"))?;
        rx.await.map_err(|_| CoreError::infrastructure("round engine dropped the reply"))
    }

    pub async fn round_details(&self, round_id: String) -> Result<Option<Round>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::RoundDetails { round_id, reply })
            .await
            .map_err(|_| CoreError::infrastructure("round engine is not running"))?;
        rx.await.map_err(|_| CoreError::infrastructure("round engine dropped the reply"))
    }

    pub async fn round_history(
        &self,
        page: crash_ledger::PageParams,
    ) -> Result<crash_ledger::Page<Round>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::RoundHistory { page, reply })
            .await
            .map_err(|_| CoreError::infrastructure("round engine is not running"))?;
        rx.await.map_err(|_| CoreError::infrastructure("round engine dropped the reply"))
    }

    /// Asks the engine to stop. A live round is crashed immediately (its
    /// seed revealed, losers settled) before the actor's loop exits, so a
    /// shutdown never leaves a round's outcome ambiguous. Idempotent: if the
    /// engine has already exited, the send fails and this resolves at once.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command_tx.send(EngineCommand::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

fn ledger_err_to_core(err: crash_ledger::LedgerError) -> CoreError {
    match &err {
        crash_ledger::LedgerError::UnknownPlayer(id) => CoreError::validation(format!("unknown player: {id}")),
        crash_ledger::LedgerError::InsufficientBalance { .. } => CoreError::funds(err.to_string()),
        _ => CoreError::state(err.to_string()),
    }
}

/// Owns the live round and drives it through `betting -> live -> crashed ->
/// settled -> betting`. Built as a `tokio::select!` actor over an inbound
/// command channel and its own tick interval, in the shape of this
/// workspace's peer-to-peer network actor, with the hub standing in for the
/// libp2p swarm as the thing this task never reaches into directly.
pub struct Engine {
    config: EngineConfig,
    ledger: Arc<crash_ledger::Ledger>,
    command_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
    round: Round,
    round_number: u64,
    live_start: u64,
    next_round_at: u64,
    history: VecDeque<Round>,
}

const HISTORY_CAP: usize = 200;

impl Engine {
    pub fn new(
        config: EngineConfig,
        ledger: Arc<crash_ledger::Ledger>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let now = now_millis();
        let round_number = 0;
        let round = new_round(round_number, &config, now);

        let engine = Self {
            config,
            ledger,
            command_rx,
            event_tx,
            round,
            round_number,
            live_start: 0,
            next_round_at: now,
            history: VecDeque::with_capacity(HISTORY_CAP),
        };
        (engine, EngineHandle { command_tx })
    }

    /// Reconciles the Ledger against any rounds restored from a prior
    /// process (none, for the default in-process store, but the hook
    /// matters for a persistent backing store) before the tick loop starts.
    pub fn reconcile_on_startup(&self) -> Result<u32, CoreError> {
        self.ledger
            .reconcile_rounds(&[], now_millis())
            .map_err(ledger_err_to_core)
    }

    pub async fn run(mut self) {
        let _ = self
            .event_tx
            .send(EngineEvent::RoundStarted {
                round_id: self.round.id.clone(),
                hash: self.round.hash,
                start_time: self.round.start_time,
            })
            .await;

        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.config.tick_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(now_millis()).await;
                }
                command = self.command_rx.recv() => match command {
                    Some(EngineCommand::Shutdown { reply }) => {
                        if self.round.state == RoundState::Live {
                            self.crash_round(now_millis()).await;
                        }
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                }
            }
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::PlaceWager { player_id, stake_fiat, asset, price, reply } => {
                let result = self.place_wager(player_id, stake_fiat, asset, price).await;
                let _ = reply.send(result);
            }
            EngineCommand::CashOut { player_id, reply } => {
                let result = self.cash_out(player_id).await;
                let _ = reply.send(result);
            }
            EngineCommand::SnapshotState { reply } => {
                let _ = reply.send(self.snapshot(now_millis()));
            }
            EngineCommand::VerifyRound { round_id, reply } => {
                let _ = reply.send(self.verify_round(&round_id));
            }
            EngineCommand::RoundDetails { round_id, reply } => {
                let _ = reply.send(self.round_details(&round_id));
            }
            EngineCommand::RoundHistory { page, reply } => {
                let _ = reply.send(self.round_history(page));
            }
            EngineCommand::Shutdown { reply } => {
                // `run`'s select loop intercepts `Shutdown` before it reaches
                // here; this arm only exists for match exhaustiveness.
                let _ = reply.send(());
            }
        }
    }

    async fn tick(&mut self, now: u64) {
        match self.round.state {
            RoundState::Betting => {
                if now.saturating_sub(self.round.start_time) >= self.config.betting_window_ms {
                    self.round.state = RoundState::Live;
                    self.live_start = now;
                }
            }
            RoundState::Live => {
                let multiplier = self.multiplier_at(now);
                if multiplier >= self.round.crash_point {
                    self.crash_round(now).await;
                } else {
                    self.round.peak_multiplier = multiplier;
                    if self
                        .event_tx
                        .send(EngineEvent::MultiplierTick {
                            round_id: self.round.id.clone(),
                            multiplier,
                            now,
                        })
                        .await
                        .is_err()
                    {
                        tracing::warn!("broadcast hub channel closed; continuing tick loop");
                    }
                }
            }
            RoundState::Crashed => {
                // Transitional only: `crash_round` moves directly to `Settled`.
                self.round.state = RoundState::Settled;
            }
            RoundState::Settled => {
                if now >= self.next_round_at {
                    self.start_new_round(now).await;
                }
            }
        }
    }

    fn multiplier_at(&self, now: u64) -> Decimal {
        let elapsed_s = now.saturating_sub(self.live_start) as f64 / 1000.0;
        let crash_f = self.round.crash_point.to_f64().unwrap_or(1.0);
        let target_time = (crash_f.ln() * 2.0).max(0.001);
        let growth = (crash_f - 1.0) / target_time;
        let raw = 1.0 + elapsed_s * growth;
        let clamped = raw.min(crash_f).max(1.0);
        Decimal::from_f64(clamped).unwrap_or(Decimal::ONE).round_dp(2)
    }

    async fn crash_round(&mut self, now: u64) {
        let seed = self.round.seed;
        let crash_point = self.round.crash_point;
        let round_id = self.round.id.clone();

        let _ = self
            .event_tx
            .send(EngineEvent::RoundCrashed {
                round_id: round_id.clone(),
                crash_point,
                seed,
                now,
            })
            .await;

        for wager in &self.round.wagers {
            if wager.cashed_out {
                continue;
            }
            if let Err(err) = self.ledger.record_loss(&wager.player_id) {
                tracing::warn!(player_id = %wager.player_id, error = %err, "could not record loss counter");
            }
        }

        self.round.end_time = Some(now);
        self.round.state = RoundState::Settled;
        self.next_round_at = self.round.start_time + self.config.round_period_ms;

        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(self.round.clone());
    }

    async fn start_new_round(&mut self, now: u64) {
        self.round_number += 1;
        self.round = new_round(self.round_number, &self.config, now);
        self.next_round_at = now + self.config.round_period_ms;

        let _ = self
            .event_tx
            .send(EngineEvent::RoundStarted {
                round_id: self.round.id.clone(),
                hash: self.round.hash,
                start_time: self.round.start_time,
            })
            .await;
    }

    async fn place_wager(
        &mut self,
        player_id: String,
        stake_fiat: Decimal,
        asset: Asset,
        price: Decimal,
    ) -> Result<WagerAck, CoreError> {
        if self.round.state != RoundState::Betting {
            return Err(CoreError::state("betting window is closed for the current round"));
        }
        if stake_fiat < self.config.min_stake_fiat || stake_fiat > self.config.max_stake_fiat {
            return Err(CoreError::validation(format!(
                "stake must be between {} and {}",
                self.config.min_stake_fiat, self.config.max_stake_fiat
            )));
        }
        if self.round.has_open_wager(&player_id) {
            return Err(CoreError::state("player already has an open wager this round"));
        }

        let stake_asset = stake_fiat / price;

        self.ledger
            .debit(&player_id, asset, stake_asset)
            .map_err(ledger_err_to_core)?;

        let now = now_millis();
        let wager = crash_types::Wager::new(player_id.clone(), stake_fiat, stake_asset, asset, price, now);
        let wager_id = wager.id;
        self.round.wagers.push(wager);

        if let Err(err) = self.ledger.record_wager_placed(&player_id) {
            tracing::warn!(player_id = %player_id, error = %err, "could not record wager-placed counter");
        }

        self.ledger.record_transaction(Transaction::new(
            player_id.clone(),
            self.round.id.clone(),
            Some(wager_id),
            TransactionKind::Wager,
            stake_fiat,
            stake_asset,
            asset,
            price,
            None,
            now,
        ));

        let _ = self
            .event_tx
            .send(EngineEvent::WagerPlaced {
                round_id: self.round.id.clone(),
                player_id,
                stake_fiat,
                stake_asset,
                asset,
            })
            .await;

        Ok(WagerAck { wager_id, stake_asset })
    }

    async fn cash_out(&mut self, player_id: String) -> Result<CashOutReceipt, CoreError> {
        if self.round.state != RoundState::Live {
            return Err(CoreError::state("round is not currently live"));
        }
        let multiplier = self.multiplier_at(now_millis());
        if multiplier >= self.round.crash_point {
            return Err(CoreError::state("round crashed before the cash-out was recorded"));
        }

        let round_id = self.round.id.clone();
        let Some(wager) = self.round.open_wager_mut(&player_id) else {
            return Err(CoreError::state("no open wager for this player in the current round"));
        };

        let payout_asset = wager.stake_asset * multiplier;
        let payout_fiat = wager.stake_fiat * multiplier;
        let asset = wager.asset;
        let wager_id = wager.id;
        let price_at_placement = wager.price_at_placement;
        wager.mark_cashed_out(multiplier, payout_asset);

        if let Err(err) = self.ledger.credit(&player_id, asset, payout_asset) {
            tracing::error!(
                player_id = %player_id,
                wager_id = %wager_id,
                error = %err,
                "ledger credit failed after wager was marked cashed out; startup reconciliation will recover it"
            );
        }
        if let Err(err) = self.ledger.record_win(&player_id) {
            tracing::warn!(player_id = %player_id, error = %err, "could not record win counter");
        }

        self.ledger.record_transaction(Transaction::new(
            player_id.clone(),
            round_id.clone(),
            Some(wager_id),
            TransactionKind::Cashout,
            payout_fiat,
            payout_asset,
            asset,
            price_at_placement,
            Some(multiplier),
            now_millis(),
        ));

        let _ = self
            .event_tx
            .send(EngineEvent::CashoutAccepted {
                round_id: round_id.clone(),
                player_id,
                multiplier,
                payout_fiat,
                asset,
            })
            .await;

        Ok(CashOutReceipt {
            round_id,
            multiplier,
            payout_fiat,
            payout_asset,
        })
    }

    fn snapshot(&self, now: u64) -> StateSnapshot {
        let multiplier = match self.round.state {
            RoundState::Live => self.multiplier_at(now),
            RoundState::Crashed | RoundState::Settled => self.round.crash_point,
            RoundState::Betting => Decimal::ONE,
        };
        StateSnapshot {
            round_id: self.round.id.clone(),
            state: self.round.state,
            multiplier,
            is_live: self.round.state == RoundState::Live,
            start_time: self.round.start_time,
            wager_count: self.round.wagers.len(),
            hash: hex::encode(self.round.hash),
        }
    }

    fn verify_round(&self, round_id: &str) -> Option<VerifyResult> {
        let round = self
            .history
            .iter()
            .find(|r| r.id == round_id)
            .or_else(|| if self.round.id == round_id { Some(&self.round) } else { None })?;

        if round.state != RoundState::Settled {
            return None;
        }

        let recomputed_hash = crash_fairness::hash(&round.seed, round.number);
        let commitment_valid = recomputed_hash == round.hash;
        let crash_point_valid =
            crash_fairness::verify(&round.seed, round.number, round.crash_point, self.config.max_crash);

        Some(VerifyResult {
            round_id: round.id.clone(),
            round_number: round.number,
            seed: hex::encode(round.seed),
            hash: hex::encode(round.hash),
            crash_point: round.crash_point,
            commitment_valid,
            crash_point_valid,
        })
    }

    /// Looks up a completed round by id. The live round is only visible
    /// here once it has actually settled — the seed on an in-progress
    /// round must never leak to a caller ahead of `round_crashed`.
    fn round_details(&self, round_id: &str) -> Option<Round> {
        self.history
            .iter()
            .find(|r| r.id == round_id)
            .cloned()
            .or_else(|| {
                if self.round.id == round_id && self.round.state == RoundState::Settled {
                    Some(self.round.clone())
                } else {
                    None
                }
            })
    }

    fn round_history(&self, page: crash_ledger::PageParams) -> crash_ledger::Page<Round> {
        let total = self.history.len();
        let items = self
            .history
            .iter()
            .rev()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        crash_ledger::Page { items, total }
    }
}

fn new_round(round_number: u64, config: &EngineConfig, now: u64) -> Round {
    let seed = crash_fairness::new_seed();
    let hash = crash_fairness::hash(&seed, round_number);
    let crash_point = crash_fairness::crash_point(&seed, round_number, config.max_crash);
    Round::new(round_number, seed, hash, crash_point, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> EngineConfig {
        EngineConfig {
            betting_window_ms: 10,
            tick_ms: 5,
            round_period_ms: 200,
            ..EngineConfig::default()
        }
    }

    async fn spawn_engine() -> (EngineHandle, mpsc::Receiver<EngineEvent>) {
        let ledger = Arc::new(crash_ledger::Ledger::new());
        ledger
            .create_player("alice".to_string(), "alice-n".to_string(), HashMap::new())
            .unwrap();
        ledger.credit("alice", Asset::Btc, Decimal::new(10, 0)).unwrap();

        let (event_tx, event_rx) = mpsc::channel(256);
        let (engine, handle) = Engine::new(test_config(), ledger, event_tx);
        tokio::spawn(engine.run());
        (handle, event_rx)
    }

    fn test_price() -> Decimal {
        Decimal::new(50_000, 0)
    }

    #[tokio::test]
    async fn rejects_wager_outside_stake_bounds() {
        let (handle, _events) = spawn_engine().await;
        let err = handle
            .place_wager("alice".to_string(), Decimal::new(0, 0), Asset::Btc, test_price())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn rejects_second_open_wager_in_same_round() {
        let (handle, _events) = spawn_engine().await;
        handle
            .place_wager("alice".to_string(), Decimal::new(1, 0), Asset::Btc, test_price())
            .await
            .unwrap();
        let err = handle
            .place_wager("alice".to_string(), Decimal::new(1, 0), Asset::Btc, test_price())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[tokio::test]
    async fn cash_out_without_a_wager_is_rejected() {
        let (handle, _events) = spawn_engine().await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let err = handle.cash_out("alice".to_string()).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[tokio::test]
    async fn snapshot_reports_betting_state_at_startup() {
        let (handle, _events) = spawn_engine().await;
        let snap = handle.snapshot_state().await.unwrap();
        assert_eq!(snap.state, RoundState::Betting);
        assert_eq!(snap.multiplier, Decimal::ONE);
    }

    #[tokio::test]
    async fn place_wager_ack_carries_a_wager_id_and_debited_asset_amount() {
        let (handle, _events) = spawn_engine().await;
        let ack = handle
            .place_wager("alice".to_string(), Decimal::new(1, 0), Asset::Btc, test_price())
            .await
            .unwrap();
        assert!(ack.stake_asset > Decimal::ZERO);
        assert_ne!(ack.wager_id, uuid::Uuid::nil());
    }

    #[tokio::test]
    async fn round_history_is_empty_before_any_round_has_settled() {
        let (handle, _events) = spawn_engine().await;
        let page = handle
            .round_history(crash_ledger::PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn round_details_is_none_for_an_unknown_id() {
        let (handle, _events) = spawn_engine().await;
        let details = handle.round_details("no-such-round".to_string()).await.unwrap();
        assert!(details.is_none());
    }

    #[tokio::test]
    async fn shutdown_crashes_a_live_round_before_the_engine_stops() {
        let (handle, mut events) = spawn_engine().await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        handle.shutdown().await;

        let mut saw_crash = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::RoundCrashed { .. }) {
                saw_crash = true;
            }
        }
        assert!(saw_crash);
        assert!(handle.snapshot_state().await.is_err());
    }
}
