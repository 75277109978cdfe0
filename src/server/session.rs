//! Per-connection lifecycle: join on accept, forward every text payload to the
//! hub, leave on disconnect.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::hub::Hub;
use crate::config::{SessionConfig, MIN_OUTBOX_CAPACITY};
use crate::error::{HubError, Result};
use crate::protocol::{ConnectionId, Frame, Incoming};
use crate::registry::Outbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Left,
}

/// Session is one client's membership in the hub. `Left` is terminal; a new
/// connection gets a new session.
pub struct Session {
    id: ConnectionId,
    name: String,
    hub: Hub,
    state: SessionState,
}

impl Session {
    pub fn new(hub: Hub, name: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::next(),
            name: name.into(),
            hub,
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn join(&mut self, outbox: Outbox) -> Result<()> {
        if self.state == SessionState::Left {
            return Err(HubError::NotJoined(self.id));
        }
        self.hub.join(self.id, self.name.clone(), outbox).await?;
        self.state = SessionState::Joined;
        Ok(())
    }

    pub async fn send(&mut self, body: impl Into<String>) -> Result<()> {
        if self.state != SessionState::Joined {
            return Err(HubError::NotJoined(self.id));
        }
        let result = self.hub.send(self.id, body).await;
        if let Err(HubError::NotJoined(_)) = result {
            // evicted by the hub
            self.state = SessionState::Left;
        }
        result
    }

    /// Returns whether a departure notice went out. A session that never
    /// joined has nothing to leave.
    pub async fn leave(&mut self) -> Result<bool> {
        match self.state {
            SessionState::Connecting => Err(HubError::NotJoined(self.id)),
            SessionState::Left => Ok(false),
            SessionState::Joined => {
                self.state = SessionState::Left;
                self.hub.leave(self.id).await
            }
        }
    }

    /// Drive the connection until the client goes away, the hub drops it, or
    /// the write side fails. Leaves the hub on the way out.
    pub async fn run<R, W>(mut self, mut reader: R, writer: W, config: &SessionConfig) -> Result<()>
    where
        R: Stream<Item = Incoming> + Unpin,
        W: Sink<Arc<str>> + Unpin + Send + 'static,
        W::Error: fmt::Display,
    {
        let (outbox, frames) = mpsc::channel(config.outbox_capacity.max(MIN_OUTBOX_CAPACITY));
        let mut pump = tokio::spawn(write_pump(self.id, frames, writer, config.write_timeout));

        if let Err(e) = self.join(outbox).await {
            pump.abort();
            return Err(e);
        }

        let result = loop {
            tokio::select! {
                incoming = reader.next() => match incoming.unwrap_or(Incoming::Closed) {
                    Incoming::Message(text) => match self.send(text).await {
                        Ok(()) => {}
                        Err(HubError::NotJoined(_)) => {
                            tracing::debug!(conn = %self.id, "session dropped by hub");
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    },
                    Incoming::Closed => {
                        tracing::debug!(conn = %self.id, "client closed connection");
                        break Ok(());
                    }
                    Incoming::Error(reason) => {
                        tracing::warn!(conn = %self.id, %reason, "read failed");
                        break Ok(());
                    }
                },
                _ = &mut pump => {
                    tracing::debug!(conn = %self.id, "write pump ended");
                    break Ok(());
                }
            }
        };

        let left = self.leave().await;
        result?;
        left.map(|_| ())
    }
}

/// Drain the outbox into the socket. Ends when the hub drops the outbox, a
/// write fails, or a write takes longer than `write_timeout`.
async fn write_pump<W>(
    id: ConnectionId,
    mut frames: mpsc::Receiver<Frame>,
    mut writer: W,
    write_timeout: Duration,
) where
    W: Sink<Arc<str>> + Unpin,
    W::Error: fmt::Display,
{
    while let Some(frame) = frames.recv().await {
        match timeout(write_timeout, write_frame(&mut writer, &frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(conn = %id, error = %e, "write failed");
                return;
            }
            Err(_) => {
                tracing::warn!(
                    conn = %id,
                    timeout_ms = write_timeout.as_millis() as u64,
                    "write timed out"
                );
                return;
            }
        }
    }
    let _ = writer.close().await;
}

async fn write_frame<W>(writer: &mut W, frame: &Frame) -> std::result::Result<(), W::Error>
where
    W: Sink<Arc<str>> + Unpin,
{
    for line in frame.lines() {
        writer.feed(line.clone()).await?;
    }
    writer.flush().await
}
