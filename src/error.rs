use thiserror::Error;

use crate::protocol::ConnectionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("registration failed: {0}")]
    RegistrationFailed(#[from] RegistryError),

    #[error("connection {0} has not joined")]
    NotJoined(ConnectionId),

    #[error("hub is shut down")]
    Closed,
}

/// Why a frame could not be queued for one connection. Never leaves the hub.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbox full, client too slow")]
    Backlogged,

    #[error("client disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, HubError>;
