//! Runtime settings for the hub and for per-connection sessions.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Frames a connection may have queued before it counts as too slow.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// A join queues the history replay and the joiner's own arrival notice in
/// one hub step, so an outbox must hold at least two frames.
pub const MIN_OUTBOX_CAPACITY: usize = 2;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Maximum history lines kept for replay (`None` = unbounded)
    pub history_capacity: Option<NonZeroUsize>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bounded outbox size per connection
    pub outbox_capacity: usize,

    /// A single socket write taking longer than this ends the connection
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Address shown to browsers on the landing page: `host` or `host:port`.
pub fn display_location(host: &str, port: Option<&str>) -> String {
    match port.filter(|p| !p.is_empty()) {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
