//! Realtime broadcaster for cache job events.
//!
//! The broadcaster actor owns the set of live WebSocket connections. Each
//! connection is represented by a bounded outbound channel drained by that
//! socket's writer task, so a slow or dead client never blocks the others:
//! a failed or full send prunes the connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actors::CacheQueue;
use cache_core::CacheEvent;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use tokio::sync::{OnceCell, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::frames::{ClientFrame, ServerFrame};

pub type ConnectionId = u64;

/// Close code sent to clients on shutdown ("going away").
pub const CLOSE_GOING_AWAY: u16 = 1001;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// What a connection's writer task should put on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Ping,
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Interval of the liveness sweep.
    pub heartbeat: Duration,
    /// Per-connection outbound buffer.
    pub outbound_buffer: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            outbound_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    pub connected_clients: usize,
    pub started: bool,
}

#[derive(Debug)]
pub enum BroadcasterMessage {
    /// Register a connection. Replies `None` once shut down.
    Connect {
        tx: mpsc::Sender<Outbound>,
        reply: RpcReplyPort<Option<ConnectionId>>,
    },
    Disconnect { id: ConnectionId },
    /// A text frame from a client.
    ClientText { id: ConnectionId, text: String },
    /// A transport-level pong from a client.
    Pong { id: ConnectionId },
    /// A queue event to fan out.
    Event(Box<CacheEvent>),
    /// Liveness sweep.
    Sweep,
    GetStats { reply: RpcReplyPort<RealtimeStats> },
    Shutdown { reply: RpcReplyPort<()> },
}

struct Connection {
    tx: mpsc::Sender<Outbound>,
    /// Cleared by each sweep, set again by a pong.
    alive: bool,
}

pub struct BroadcasterArgs {
    pub queue: CacheQueue,
    pub heartbeat: Duration,
}

pub struct BroadcasterState {
    queue: CacheQueue,
    connections: HashMap<ConnectionId, Connection>,
    next_id: ConnectionId,
    tasks: Vec<JoinHandle<()>>,
    accepting: bool,
}

impl BroadcasterState {
    /// Queue a message for one connection, pruning it if that fails.
    fn deliver(&mut self, id: ConnectionId, message: Outbound) {
        let failed = match self.connections.get(&id) {
            Some(conn) => conn.tx.try_send(message).is_err(),
            None => return,
        };
        if failed {
            tracing::warn!(connection = id, "Pruning unresponsive realtime client");
            self.connections.remove(&id);
        }
    }

    fn broadcast(&mut self, frame: &ServerFrame) {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to encode realtime frame: {}", e);
                return;
            }
        };

        let failed: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.tx.try_send(Outbound::Frame(text.clone())).is_err())
            .map(|(id, _)| *id)
            .collect();

        for id in failed {
            tracing::warn!(connection = id, "Pruning realtime client after failed send");
            self.connections.remove(&id);
        }
    }

    fn sweep(&mut self) {
        let before = self.connections.len();
        // Dropping the sender ends the writer task, which closes the socket.
        self.connections.retain(|_, conn| conn.alive);
        let terminated = before - self.connections.len();

        let mut unreachable = Vec::new();
        for (id, conn) in self.connections.iter_mut() {
            conn.alive = false;
            if conn.tx.try_send(Outbound::Ping).is_err() {
                unreachable.push(*id);
            }
        }
        for id in &unreachable {
            self.connections.remove(id);
        }

        if terminated > 0 || !unreachable.is_empty() {
            tracing::info!(
                terminated,
                unreachable = unreachable.len(),
                remaining = self.connections.len(),
                "Liveness sweep pruned realtime clients"
            );
        }
    }

    fn stats(&self) -> RealtimeStats {
        RealtimeStats {
            connected_clients: self.connections.len(),
            started: self.accepting,
        }
    }
}

pub struct BroadcasterActor;

impl Actor for BroadcasterActor {
    type Msg = BroadcasterMessage;
    type State = BroadcasterState;
    type Arguments = BroadcasterArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting realtime broadcaster");

        // Forward queue events into the mailbox
        let mut events = args.queue.subscribe();
        let forward_to = myself.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if forward_to
                            .send_message(BroadcasterMessage::Event(Box::new(event)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Realtime broadcaster lagged behind queue events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Start the liveness sweep
        let heartbeat = args.heartbeat;
        let sweep_to = myself.clone();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat);
            interval.tick().await;
            loop {
                interval.tick().await;
                if sweep_to.send_message(BroadcasterMessage::Sweep).is_err() {
                    break;
                }
            }
        });

        Ok(BroadcasterState {
            queue: args.queue,
            connections: HashMap::new(),
            next_id: 1,
            tasks: vec![forwarder, sweeper],
            accepting: true,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for task in state.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BroadcasterMessage::Connect { tx, reply } => {
                if !state.accepting {
                    let _ = reply.send(None);
                    return Ok(());
                }

                let id = state.next_id;
                state.next_id += 1;
                state.connections.insert(id, Connection { tx, alive: true });
                let _ = reply.send(Some(id));
                tracing::debug!(connection = id, clients = state.connections.len(), "Realtime client connected");

                // Snapshot so the client is not blind until the next event
                match state.queue.get_queue_stats().await {
                    Ok(stats) => {
                        if let Ok(text) = ServerFrame::snapshot(stats).to_json() {
                            state.deliver(id, Outbound::Frame(text));
                        }
                    }
                    Err(e) => tracing::warn!("Failed to read queue stats for snapshot: {}", e),
                }
            }

            BroadcasterMessage::Disconnect { id } => {
                if state.connections.remove(&id).is_some() {
                    tracing::debug!(connection = id, "Realtime client disconnected");
                }
            }

            BroadcasterMessage::ClientText { id, text } => match ClientFrame::parse(&text) {
                Ok(ClientFrame::Ping) => {
                    if let Ok(pong) = ServerFrame::Pong.to_json() {
                        state.deliver(id, Outbound::Frame(pong));
                    }
                }
                Err(e) => {
                    tracing::debug!(connection = id, "Ignoring malformed client frame: {}", e);
                }
            },

            BroadcasterMessage::Pong { id } => {
                if let Some(conn) = state.connections.get_mut(&id) {
                    conn.alive = true;
                }
            }

            BroadcasterMessage::Event(event) => {
                state.broadcast(&ServerFrame::from(event.as_ref()));
            }

            BroadcasterMessage::Sweep => state.sweep(),

            BroadcasterMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }

            BroadcasterMessage::Shutdown { reply } => {
                tracing::info!(
                    clients = state.connections.len(),
                    "Shutting down realtime broadcaster"
                );
                state.accepting = false;
                for (_, conn) in state.connections.drain() {
                    let _ = conn.tx.try_send(Outbound::Close {
                        code: CLOSE_GOING_AWAY,
                        reason: "server shutting down".into(),
                    });
                }
                for task in state.tasks.drain(..) {
                    task.abort();
                }
                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Handle to the broadcaster. Nothing runs until `start`.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    queue: CacheQueue,
    config: BroadcasterConfig,
    actor: OnceCell<ActorRef<BroadcasterMessage>>,
}

impl Broadcaster {
    pub fn new(queue: CacheQueue, config: BroadcasterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                config,
                actor: OnceCell::new(),
            }),
        }
    }

    pub fn outbound_buffer(&self) -> usize {
        self.inner.config.outbound_buffer.max(1)
    }

    /// Spawn the broadcaster actor. Calling it again is a no-op.
    pub async fn start(&self) -> Result<(), ractor::SpawnErr> {
        self.inner
            .actor
            .get_or_try_init(|| async {
                let args = BroadcasterArgs {
                    queue: self.inner.queue.clone(),
                    heartbeat: self.inner.config.heartbeat,
                };
                let (actor, _handle) = Actor::spawn(None, BroadcasterActor, args).await?;
                Ok::<_, ractor::SpawnErr>(actor)
            })
            .await?;
        Ok(())
    }

    /// Register a connection. `None` when not started or shut down.
    pub async fn connect(&self, tx: mpsc::Sender<Outbound>) -> Option<ConnectionId> {
        let actor = self.inner.actor.get()?;
        match ractor::rpc::call(
            actor,
            |reply| BroadcasterMessage::Connect { tx, reply },
            Some(CALL_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(id)) => id,
            _ => None,
        }
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.cast(BroadcasterMessage::Disconnect { id });
    }

    pub fn client_text(&self, id: ConnectionId, text: String) {
        self.cast(BroadcasterMessage::ClientText { id, text });
    }

    pub fn pong(&self, id: ConnectionId) {
        self.cast(BroadcasterMessage::Pong { id });
    }

    pub async fn get_stats(&self) -> RealtimeStats {
        let Some(actor) = self.inner.actor.get() else {
            return RealtimeStats::default();
        };
        match ractor::rpc::call(
            actor,
            |reply| BroadcasterMessage::GetStats { reply },
            Some(CALL_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(stats)) => stats,
            _ => RealtimeStats::default(),
        }
    }

    /// Close every connection and stop. Safe to call before `start` and more
    /// than once.
    pub async fn shutdown(&self) {
        let Some(actor) = self.inner.actor.get() else {
            return;
        };
        let _ = ractor::rpc::call(
            actor,
            |reply| BroadcasterMessage::Shutdown { reply },
            Some(CALL_TIMEOUT),
        )
        .await;
    }

    /// Run a liveness sweep now instead of waiting for the timer.
    #[cfg(test)]
    pub(crate) fn sweep_now(&self) {
        self.cast(BroadcasterMessage::Sweep);
    }

    fn cast(&self, message: BroadcasterMessage) {
        if let Some(actor) = self.inner.actor.get() {
            let _ = actor.send_message(message);
        }
    }
}
