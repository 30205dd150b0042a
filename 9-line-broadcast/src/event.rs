use std::{fmt, net::SocketAddr};

use tokio::sync::broadcast;
use tracing::debug;

// Subscribers that fall further behind than this see `RecvError::Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Things that happen on the server and are only shown locally; none of these
/// are sent to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Accepted { number: u64, peer: SocketAddr },
    Joined { username: String },
    Removed { username: String },
    HandshakeFailed { peer: Option<SocketAddr> },
    ShuttingDown,
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { number, peer } => write!(f, "Connection number {number}: {peer}"),
            Self::Joined { username } => write!(f, "{username} connected."),
            Self::Removed { username } => write!(f, "Connection to {username} removed"),
            Self::HandshakeFailed { peer: Some(peer) } => {
                write!(f, "Connection from {peer} dropped before handshake")
            }
            Self::HandshakeFailed { peer: None } => write!(f, "Connection dropped before handshake"),
            Self::ShuttingDown => write!(f, "Server shutting down"),
        }
    }
}

/// Fan-out of [`ServerEvent`]s to whoever displays them.
#[derive(Debug, Clone)]
pub struct EventLog {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn post(&self, event: ServerEvent) {
        // No subscribers is the normal headless case.
        if let Err(error) = self.tx.send(event) {
            debug!(event = %error.0, "no event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
