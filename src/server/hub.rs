use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::HubConfig;
use crate::error::{DeliveryError, HubError, Result};
use crate::protocol::{ChatEvent, ConnectionId, Frame};
use crate::registry::{ConnectionRegistry, Member, Outbox};
use crate::store::HistoryLog;

const COMMAND_BUF: usize = 256;

enum HubCommand {
    Join {
        id: ConnectionId,
        name: String,
        outbox: Outbox,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        id: ConnectionId,
        body: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub history_len: usize,
    pub history_capacity: Option<NonZeroUsize>,
    pub history_dropped: u64,
}

/// Hub is a cheap, cloneable handle to the broadcast actor.
///
/// Every mutation is funneled through one task, so appending to history,
/// snapshotting the members and queueing the line happen as a single step
/// relative to every other join, send and leave.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Start the actor. It runs until `shutdown` is called or every handle is dropped.
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUF);
        let state = HubState::new(config);
        let task = tokio::spawn(run_hub(rx, state));
        (Self { tx }, task)
    }

    /// Register a connection, replay history into its outbox and announce it.
    pub async fn join(
        &self,
        id: ConnectionId,
        name: impl Into<String>,
        outbox: Outbox,
    ) -> Result<()> {
        let name = name.into();
        self.request(|reply| HubCommand::Join {
            id,
            name,
            outbox,
            reply,
        })
        .await?
    }

    /// Broadcast `body` on behalf of a joined connection.
    pub async fn send(&self, id: ConnectionId, body: impl Into<String>) -> Result<()> {
        let body = body.into();
        self.request(|reply| HubCommand::Send { id, body, reply })
            .await?
    }

    /// Deregister a connection and announce its departure.
    /// Returns `false` when it was already gone; nothing is broadcast then.
    pub async fn leave(&self, id: ConnectionId) -> Result<bool> {
        self.request(|reply| HubCommand::Leave { id, reply }).await
    }

    pub async fn stats(&self) -> Result<HubStats> {
        self.request(|reply| HubCommand::Stats { reply }).await
    }

    /// Drop every connection and stop the actor. Later calls fail with `Closed`.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| HubCommand::Shutdown { reply }).await;
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

async fn run_hub(mut rx: mpsc::Receiver<HubCommand>, mut state: HubState) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Join {
                id,
                name,
                outbox,
                reply,
            } => {
                let _ = reply.send(state.join(id, name, outbox));
            }
            HubCommand::Send { id, body, reply } => {
                let _ = reply.send(state.send(id, body));
            }
            HubCommand::Leave { id, reply } => {
                let _ = reply.send(state.leave(id));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(state.stats());
            }
            HubCommand::Shutdown { reply } => {
                let dropped = state.registry.clear();
                tracing::info!(connections = dropped, "hub shutting down");
                let _ = reply.send(());
                break;
            }
        }
    }
    tracing::debug!("hub stopped");
}

struct HubState {
    registry: ConnectionRegistry,
    history: HistoryLog,
}

impl HubState {
    fn new(config: HubConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            history: HistoryLog::new(config.history_capacity),
        }
    }

    fn join(&mut self, id: ConnectionId, name: String, outbox: Outbox) -> Result<()> {
        let replay = self.history.snapshot();
        self.registry.add(id, Member::new(name.clone(), outbox))?;

        tracing::info!(
            conn = %id,
            name = %name,
            replay = replay.len(),
            total = self.registry.len(),
            "client joined"
        );

        let replayed = match self.registry.get(id) {
            Some(member) => member.deliver(Frame::Replay(replay)),
            None => Ok(()),
        };
        self.broadcast(ChatEvent::Entered { name });
        if let Err(err) = replayed {
            if let Some(left) = self.evict(id, err) {
                self.broadcast(left);
            }
        }
        Ok(())
    }

    fn send(&mut self, id: ConnectionId, body: String) -> Result<()> {
        let name = match self.registry.get(id) {
            Some(member) => member.name.clone(),
            None => return Err(HubError::NotJoined(id)),
        };
        self.broadcast(ChatEvent::Said { name, body });
        Ok(())
    }

    fn leave(&mut self, id: ConnectionId) -> bool {
        let Some(member) = self.registry.remove(id) else {
            tracing::debug!(conn = %id, "leave for unknown connection ignored");
            return false;
        };
        tracing::info!(
            conn = %id,
            name = %member.name,
            secs = (Utc::now() - member.joined_at).num_seconds(),
            total = self.registry.len(),
            "client left"
        );
        self.broadcast(ChatEvent::Left { name: member.name });
        true
    }

    /// Append each event to history and queue it for every member. Members
    /// whose outbox rejects the line are evicted once the fan-out is done,
    /// and their departure notices are broadcast in turn.
    fn broadcast(&mut self, event: ChatEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let line: Arc<str> = Arc::from(event.render(Utc::now()));
            self.history.push(line.clone());

            let failed: Vec<(ConnectionId, DeliveryError)> = self
                .registry
                .snapshot()
                .filter_map(|(id, member)| {
                    member
                        .deliver(Frame::Line(line.clone()))
                        .err()
                        .map(|err| (id, err))
                })
                .collect();

            for (id, err) in failed {
                pending.extend(self.evict(id, err));
            }
        }
    }

    fn evict(&mut self, id: ConnectionId, err: DeliveryError) -> Option<ChatEvent> {
        let member = self.registry.remove(id)?;
        tracing::warn!(
            conn = %id,
            name = %member.name,
            error = %err,
            total = self.registry.len(),
            "dropped client"
        );
        Some(ChatEvent::Left { name: member.name })
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            history_len: self.history.len(),
            history_capacity: self.history.capacity(),
            history_dropped: self.history.dropped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::error::RegistryError;
    use crate::protocol::split_timestamp;

    use super::*;

    fn spawn() -> Hub {
        Hub::spawn(HubConfig::default()).0
    }

    async fn join_with(hub: &Hub, name: &str, cap: usize) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::channel(cap);
        hub.join(id, name, tx).await.unwrap();
        (id, rx)
    }

    async fn join(hub: &Hub, name: &str) -> (ConnectionId, mpsc::Receiver<Frame>) {
        join_with(hub, name, 64).await
    }

    fn body(line: &str) -> String {
        split_timestamp(line).1.to_string()
    }

    fn bodies(lines: &[Arc<str>]) -> Vec<String> {
        lines.iter().map(|l| body(l)).collect()
    }

    /// Everything queued so far, replay first, timestamps stripped.
    fn drain(rx: &mut mpsc::Receiver<Frame>) -> (Option<Vec<String>>, Vec<String>) {
        let mut replay = None;
        let mut live = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            match frame {
                Frame::Replay(lines) => {
                    assert!(replay.is_none(), "replay delivered twice");
                    assert!(live.is_empty(), "replay after live lines");
                    replay = Some(bodies(&lines));
                }
                Frame::Line(line) => live.push(body(&line)),
            }
        }
        (replay, live)
    }

    fn live(rx: &mut mpsc::Receiver<Frame>) -> Vec<String> {
        drain(rx).1
    }

    #[tokio::test]
    async fn walkthrough_join_send_leave() {
        let hub = spawn();

        let (alice, mut alice_rx) = join(&hub, "alice").await;
        assert_eq!(
            drain(&mut alice_rx),
            (Some(vec![]), vec!["alice enters the chat".to_string()])
        );

        let (_bob, mut bob_rx) = join(&hub, "bob").await;
        assert_eq!(
            drain(&mut bob_rx),
            (
                Some(vec!["alice enters the chat".to_string()]),
                vec!["bob enters the chat".to_string()]
            )
        );
        assert_eq!(live(&mut alice_rx), vec!["bob enters the chat"]);

        hub.send(alice, "hi").await.unwrap();
        assert_eq!(live(&mut alice_rx), vec!["alice: hi"]);
        assert_eq!(live(&mut bob_rx), vec!["alice: hi"]);

        assert!(hub.leave(alice).await.unwrap());
        assert_eq!(live(&mut bob_rx), vec!["alice left the chat"]);

        let (_carol, mut carol_rx) = join(&hub, "carol").await;
        let (replay, _) = drain(&mut carol_rx);
        assert_eq!(
            replay.unwrap(),
            vec![
                "alice enters the chat",
                "bob enters the chat",
                "alice: hi",
                "alice left the chat",
            ]
        );
    }

    #[tokio::test]
    async fn double_leave_broadcasts_once() {
        let hub = spawn();
        let (alice, _alice_rx) = join(&hub, "alice").await;
        let (_bob, mut bob_rx) = join(&hub, "bob").await;
        drain(&mut bob_rx);

        assert!(hub.leave(alice).await.unwrap());
        assert!(!hub.leave(alice).await.unwrap());

        assert_eq!(live(&mut bob_rx), vec!["alice left the chat"]);
        assert_eq!(hub.stats().await.unwrap().history_len, 3);
    }

    #[tokio::test]
    async fn duplicate_join_is_rejected_without_side_effects() {
        let hub = spawn();
        let (alice, mut alice_rx) = join(&hub, "alice").await;
        drain(&mut alice_rx);

        let (tx, _rx) = mpsc::channel(8);
        let err = hub.join(alice, "alice", tx).await.unwrap_err();

        assert_eq!(
            err,
            HubError::RegistrationFailed(RegistryError::DuplicateConnection(alice))
        );
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.history_len, 1);
        assert!(live(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn send_from_unknown_connection_fails() {
        let hub = spawn();
        let stranger = ConnectionId::next();
        assert_eq!(
            hub.send(stranger, "boo").await,
            Err(HubError::NotJoined(stranger))
        );
        assert_eq!(hub.stats().await.unwrap().history_len, 0);
    }

    #[tokio::test]
    async fn rejoin_after_leave_is_allowed() {
        let hub = spawn();
        let (alice, _rx) = join(&hub, "alice").await;
        hub.leave(alice).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        hub.join(alice, "alice", tx).await.unwrap();
        let (replay, live) = drain(&mut rx);
        assert_eq!(
            replay.unwrap(),
            vec!["alice enters the chat", "alice left the chat"]
        );
        assert_eq!(live, vec!["alice enters the chat"]);
    }

    #[tokio::test]
    async fn broken_connection_does_not_affect_others() {
        let hub = spawn();
        let (alice, mut alice_rx) = join(&hub, "alice").await;
        let (_bob, mut bob_rx) = join(&hub, "bob").await;
        let (_carol, carol_rx) = join(&hub, "carol").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drop(carol_rx);

        hub.send(alice, "hi").await.unwrap();

        assert_eq!(live(&mut bob_rx), vec!["alice: hi", "carol left the chat"]);
        assert_eq!(live(&mut alice_rx), vec!["alice: hi", "carol left the chat"]);
        assert_eq!(hub.stats().await.unwrap().connections, 2);
    }

    #[tokio::test]
    async fn slow_client_is_evicted() {
        let hub = spawn();
        let (alice, mut alice_rx) = join(&hub, "alice").await;
        // room for the replay and its own join notice, nothing more
        let (slow, mut slow_rx) = join_with(&hub, "slow", 2).await;
        drain(&mut alice_rx);

        hub.send(alice, "one").await.unwrap();
        hub.send(alice, "two").await.unwrap();

        assert_eq!(
            live(&mut alice_rx),
            vec!["alice: one", "slow left the chat", "alice: two"]
        );
        assert_eq!(hub.send(slow, "late").await, Err(HubError::NotJoined(slow)));
        assert!(!hub.leave(slow).await.unwrap());

        let (replay, live) = drain(&mut slow_rx);
        assert_eq!(replay, Some(vec!["alice enters the chat".to_string()]));
        assert_eq!(live, vec!["slow enters the chat"]);
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn joiner_with_closed_outbox_is_announced_and_removed() {
        let hub = spawn();
        let (_alice, mut alice_rx) = join(&hub, "alice").await;
        drain(&mut alice_rx);

        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        hub.join(ConnectionId::next(), "ghost", tx).await.unwrap();

        assert_eq!(
            live(&mut alice_rx),
            vec!["ghost enters the chat", "ghost left the chat"]
        );
        assert_eq!(hub.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn bounded_history_replays_latest_lines() {
        let (hub, _task) = Hub::spawn(HubConfig {
            history_capacity: NonZeroUsize::new(2),
        });
        let (alice, _alice_rx) = join(&hub, "alice").await;
        hub.send(alice, "one").await.unwrap();
        hub.send(alice, "two").await.unwrap();

        let (_bob, mut bob_rx) = join(&hub, "bob").await;
        let (replay, _) = drain(&mut bob_rx);
        assert_eq!(replay.unwrap(), vec!["alice: one", "alice: two"]);

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.history_len, 2);
        assert_eq!(stats.history_capacity, NonZeroUsize::new(2));
        assert_eq!(stats.history_dropped, 2);
    }

    #[tokio::test]
    async fn concurrent_join_sees_every_message_exactly_once() {
        const N: usize = 200;
        let hub = spawn();
        let (alice, mut alice_rx) = join_with(&hub, "alice", 1024).await;

        // bob's join lands after the first quarter is in history and before
        // the last quarter is sent; the middle half races with it
        let (halfway_tx, halfway_rx) = oneshot::channel();
        let (joined_tx, joined_rx) = oneshot::channel::<()>();
        let sender = {
            let hub = hub.clone();
            tokio::spawn(async move {
                let mut halfway_tx = Some(halfway_tx);
                let mut joined_rx = Some(joined_rx);
                for i in 0..N {
                    if i == N / 4 {
                        if let Some(tx) = halfway_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    if i == 3 * N / 4 {
                        if let Some(rx) = joined_rx.take() {
                            rx.await.unwrap();
                        }
                    }
                    hub.send(alice, i.to_string()).await.unwrap();
                    if i % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };
        halfway_rx.await.unwrap();
        let (_bob, mut bob_rx) = join_with(&hub, "bob", 1024).await;
        joined_tx.send(()).unwrap();
        sender.await.unwrap();

        let alice_lines = |lines: Vec<String>| -> Vec<String> {
            lines
                .into_iter()
                .filter_map(|l| l.strip_prefix("alice: ").map(str::to_string))
                .collect()
        };
        let (replay, live) = drain(&mut bob_rx);
        let replayed = alice_lines(replay.unwrap());
        let streamed = alice_lines(live);
        assert!(replayed.len() >= N / 4, "join landed before the stream started");
        assert!(streamed.len() >= N / 4, "join landed after the stream ended");

        let seen: Vec<String> = replayed.into_iter().chain(streamed).collect();
        let expected: Vec<String> = (0..N).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);

        let alice_seen = alice_lines(drain(&mut alice_rx).1);
        assert_eq!(alice_seen, expected);
    }

    #[tokio::test]
    async fn shutdown_closes_outboxes_and_rejects_calls() {
        let (hub, task) = Hub::spawn(HubConfig::default());
        let (alice, mut alice_rx) = join(&hub, "alice").await;
        drain(&mut alice_rx);

        hub.shutdown().await;
        task.await.unwrap();

        assert!(alice_rx.recv().await.is_none());
        assert_eq!(hub.send(alice, "hi").await, Err(HubError::Closed));
        assert_eq!(hub.leave(alice).await, Err(HubError::Closed));
        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(
            hub.join(ConnectionId::next(), "bob", tx).await,
            Err(HubError::Closed)
        );
    }
}
