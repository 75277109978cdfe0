use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{DeliveryError, RegistryError};
use crate::protocol::{ConnectionId, Frame};

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Frame>;

/// Member is the hub's record of one joined connection.
#[derive(Debug)]
pub struct Member {
    pub name: String,
    pub joined_at: DateTime<Utc>,
    outbox: Outbox,
}

impl Member {
    pub fn new(name: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            name: name.into(),
            joined_at: Utc::now(),
            outbox,
        }
    }

    /// Queue a frame without waiting on the peer.
    pub fn deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.outbox.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backlogged,
            TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

/// Set of live connections, keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: HashMap<ConnectionId, Member>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ConnectionId, member: Member) -> Result<(), RegistryError> {
        match self.members.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                slot.insert(member);
                Ok(())
            }
        }
    }

    /// Remove a connection. `None` means it was already gone, which is not an error.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Member> {
        self.members.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn snapshot(&self) -> impl Iterator<Item = (ConnectionId, &Member)> + '_ {
        self.members.iter().map(|(id, member)| (*id, member))
    }

    /// Drop every member, closing their outboxes. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.members.len();
        self.members.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
