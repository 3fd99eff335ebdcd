pub mod protocol;

pub use protocol::{InboundMessage, OutboundMessage};

use crash_engine::{EngineEvent, EngineHandle};
use crash_types::now_millis;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

const OUTBOUND_QUEUE_DEPTH: usize = 256;
const LIVENESS_SWEEP_MS: u64 = 30_000;
const LIVENESS_TIMEOUT_MS: u64 = 120_000;

/// A newly attached websocket connection's handle back into the hub: an
/// id to tag inbound traffic with, and the receiving half of this
/// observer's outbound queue.
pub struct Attachment {
    pub observer_id: u64,
    pub outbound_rx: mpsc::Receiver<OutboundMessage>,
}

enum HubCommand {
    Attach {
        reply: oneshot::Sender<Attachment>,
    },
    Inbound {
        observer_id: u64,
        message: InboundMessage,
    },
    Detach {
        observer_id: u64,
    },
}

/// Handle shared by every websocket connection task. Cloning it shares the
/// same hub actor; it never exposes the observer registry directly so the
/// actor remains the only thing that mutates it.
#[derive(Clone)]
pub struct HubHandle {
    command_tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn attach(&self) -> Option<Attachment> {
        let (reply, rx) = oneshot::channel();
        self.command_tx.send(HubCommand::Attach { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn send_inbound(&self, observer_id: u64, message: InboundMessage) {
        let _ = self
            .command_tx
            .send(HubCommand::Inbound { observer_id, message })
            .await;
    }

    pub async fn detach(&self, observer_id: u64) {
        let _ = self.command_tx.send(HubCommand::Detach { observer_id }).await;
    }
}

struct Observer {
    player_id: Option<String>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    last_seen: u64,
}

/// Fans engine events out to every attached observer and routes each
/// observer's inbound traffic back into the engine. Built the same way
/// this workspace's networking layer structures its swarm loop: an actor
/// owning its mutable state, driven from a `tokio::select!` over an
/// inbound command channel and the engine's event channel, publishing
/// outward over per-observer bounded `mpsc` channels rather than holding
/// any direct reference to an observer's transport.
pub struct Hub {
    engine: EngineHandle,
    engine_events: mpsc::Receiver<EngineEvent>,
    command_rx: mpsc::Receiver<HubCommand>,
    observers: HashMap<u64, Observer>,
    next_observer_id: u64,
}

impl Hub {
    pub fn new(engine: EngineHandle, engine_events: mpsc::Receiver<EngineEvent>) -> (Self, HubHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let hub = Self {
            engine,
            engine_events,
            command_rx,
            observers: HashMap::new(),
            next_observer_id: 0,
        };
        (hub, HubHandle { command_tx })
    }

    pub async fn run(mut self) {
        let mut sweep = interval(Duration::from_millis(LIVENESS_SWEEP_MS));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.engine_events.recv() => match event {
                    Some(event) => self.broadcast(event),
                    None => break,
                },
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = sweep.tick() => self.reap_silent_observers(),
            }
        }
    }

    fn broadcast(&mut self, event: EngineEvent) {
        let message: OutboundMessage = event.into();
        let mut dead = Vec::new();
        for (&id, observer) in self.observers.iter() {
            if observer.outbound_tx.try_send(message.clone()).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            warn!(observer_id = id, "observer outbound queue full, dropping");
            self.observers.remove(&id);
        }
    }

    async fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Attach { reply } => {
                let id = self.next_observer_id;
                self.next_observer_id += 1;
                let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
                self.observers.insert(
                    id,
                    Observer {
                        player_id: None,
                        outbound_tx,
                        last_seen: now_millis(),
                    },
                );
                let _ = reply.send(Attachment { observer_id: id, outbound_rx });
            }
            HubCommand::Detach { observer_id } => {
                self.observers.remove(&observer_id);
            }
            HubCommand::Inbound { observer_id, message } => {
                self.handle_inbound(observer_id, message).await;
            }
        }
    }

    async fn handle_inbound(&mut self, observer_id: u64, message: InboundMessage) {
        let Some(observer) = self.observers.get_mut(&observer_id) else {
            return;
        };
        observer.last_seen = now_millis();
        let bound_player = observer.player_id.clone();
        let outbound_tx = observer.outbound_tx.clone();

        let reply = match message {
            InboundMessage::Register { player_id } => match bound_player {
                Some(existing) if existing == player_id => OutboundMessage::Registered { player_id },
                Some(_) => OutboundMessage::RegisterError {
                    message: "observer already bound to a different player".to_string(),
                },
                None => {
                    if let Some(observer) = self.observers.get_mut(&observer_id) {
                        observer.player_id = Some(player_id.clone());
                    }
                    OutboundMessage::Registered { player_id }
                }
            },
            InboundMessage::CashOut { player_id } => match player_id.or(bound_player) {
                None => OutboundMessage::CashoutErr {
                    message: "observer is not registered to a player".to_string(),
                },
                Some(player_id) => match self.engine.cash_out(player_id).await {
                    Ok(receipt) => OutboundMessage::CashoutOk {
                        round_id: receipt.round_id,
                        multiplier: receipt.multiplier,
                        payout_fiat: receipt.payout_fiat,
                        payout_asset: receipt.payout_asset,
                    },
                    Err(err) => OutboundMessage::CashoutErr { message: err.message() },
                },
            },
            InboundMessage::GetState => match self.engine.snapshot_state().await {
                Ok(snapshot) => OutboundMessage::State(snapshot),
                Err(err) => OutboundMessage::Error { message: err.message() },
            },
            InboundMessage::Ping => OutboundMessage::Pong,
        };

        let _ = outbound_tx.try_send(reply);
    }

    fn reap_silent_observers(&mut self) {
        let now = now_millis();
        let stale: Vec<u64> = self
            .observers
            .iter()
            .filter(|(_, observer)| now.saturating_sub(observer.last_seen) > LIVENESS_TIMEOUT_MS)
            .map(|(&id, _)| id)
            .collect();
        for id in &stale {
            self.observers.remove(id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "reaped silent observers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crash_types::{Asset, EngineConfig};
    use rust_decimal::Decimal;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    async fn spawn_hub() -> (HubHandle, EngineHandle) {
        let ledger = Arc::new(crash_ledger::Ledger::new());
        let mut initial = StdHashMap::new();
        initial.insert(Asset::Btc, Decimal::new(1, 0));
        ledger
            .create_player("alice".to_string(), "alice-n".to_string(), initial)
            .unwrap();
        let config = EngineConfig::default();
        let (event_tx, event_rx) = mpsc::channel(64);
        let (engine, engine_handle) = crash_engine::Engine::new(config, ledger, event_tx);
        tokio::spawn(engine.run());
        let (hub, hub_handle) = Hub::new(engine_handle.clone(), event_rx);
        tokio::spawn(hub.run());
        (hub_handle, engine_handle)
    }

    #[tokio::test]
    async fn attach_yields_a_distinct_observer_id_each_time() {
        let (hub, _engine) = spawn_hub().await;
        let a = hub.attach().await.unwrap();
        let b = hub.attach().await.unwrap();
        assert_ne!(a.observer_id, b.observer_id);
    }

    #[tokio::test]
    async fn round_started_event_is_broadcast_to_attached_observers() {
        let (hub, _engine) = spawn_hub().await;
        let mut attachment = hub.attach().await.unwrap();
        let first = attachment.outbound_rx.recv().await.unwrap();
        assert!(matches!(first, OutboundMessage::RoundStarted { .. }));
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (hub, _engine) = spawn_hub().await;
        let mut attachment = hub.attach().await.unwrap();
        let _ = attachment.outbound_rx.recv().await;
        hub.send_inbound(attachment.observer_id, InboundMessage::Ping).await;
        let reply = attachment.outbound_rx.recv().await.unwrap();
        assert!(matches!(reply, OutboundMessage::Pong));
    }

    #[tokio::test]
    async fn cash_out_without_registration_is_rejected() {
        let (hub, _engine) = spawn_hub().await;
        let mut attachment = hub.attach().await.unwrap();
        let _ = attachment.outbound_rx.recv().await;
        hub.send_inbound(attachment.observer_id, InboundMessage::CashOut { player_id: None })
            .await;
        let reply = attachment.outbound_rx.recv().await.unwrap();
        assert!(matches!(reply, OutboundMessage::CashoutErr { .. }));
    }

    #[tokio::test]
    async fn detach_removes_the_observer_from_future_broadcasts() {
        let (hub, _engine) = spawn_hub().await;
        let attachment = hub.attach().await.unwrap();
        hub.detach(attachment.observer_id).await;
        hub.send_inbound(attachment.observer_id, InboundMessage::Ping).await;
    }
}
