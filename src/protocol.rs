use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Prefix stamped on every broadcast line. Fixed width, so lines sort lexically.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const TIMESTAMP_LEN: usize = "YYYY-MM-DD HH:MM:SS.mmm".len();

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(0);

/// ConnectionId identifies one accepted connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// ChatEvent is everything the hub can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Entered { name: String },
    Said { name: String, body: String },
    Left { name: String },
}

impl ChatEvent {
    /// Render the event as the text line every client receives.
    pub fn render(&self, at: DateTime<Utc>) -> String {
        let ts = at.format(TIMESTAMP_FORMAT);
        match self {
            ChatEvent::Entered { name } => format!("{ts} {name} enters the chat"),
            ChatEvent::Said { name, body } => format!("{ts} {name}: {body}"),
            ChatEvent::Left { name } => format!("{ts} {name} left the chat"),
        }
    }
}

/// Frame is one unit queued on a connection's outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// History snapshot, delivered once right after join, oldest first.
    Replay(Vec<Arc<str>>),
    Line(Arc<str>),
}

impl Frame {
    pub fn lines(&self) -> &[Arc<str>] {
        match self {
            Frame::Replay(lines) => lines,
            Frame::Line(line) => std::slice::from_ref(line),
        }
    }
}

/// Incoming is the outcome of one read from a client's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message(String),
    Closed,
    Error(String),
}

/// Split a broadcast line into its timestamp and the rest.
/// Lines without a leading timestamp come back untouched.
pub fn split_timestamp(line: &str) -> (Option<NaiveDateTime>, &str) {
    let stamped = line
        .get(..TIMESTAMP_LEN)
        .and_then(|prefix| NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT).ok());
    match stamped {
        Some(at) => {
            let rest = &line[TIMESTAMP_LEN..];
            (Some(at), rest.strip_prefix(' ').unwrap_or(rest))
        }
        None => (None, line),
    }
}
