use std::{fmt, net::SocketAddr};

use futures::{Stream, stream};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::ConnectionError,
    wire::{LineReader, line_reader, read_line, write_line},
};

pub type ConnectionId = u64;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Server-side handle for one registered client: its username and the write
/// side of its socket.
///
/// Shared between the registry (for broadcast) and the client's receive loop
/// (for lifecycle). Once closed it never comes back to life.
pub struct Connection {
    id: ConnectionId,
    username: String,
    peer: Option<SocketAddr>,
    writer: Mutex<BoxedWriter>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new<W>(id: ConnectionId, username: String, peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            username,
            peer,
            writer: Mutex::new(Box::new(writer)),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Writes one line and flushes it before returning.
    ///
    /// A failed write marks the connection dead, so every later `send` fails
    /// fast without touching the socket.
    pub async fn send(&self, line: &str) -> Result<(), ConnectionError> {
        if !self.is_alive() {
            return Err(ConnectionError::closed());
        }

        let mut writer = self.writer.lock().await;
        if let Err(err) = write_line(&mut *writer, line).await {
            self.closed.cancel();
            return Err(err.into());
        }
        Ok(())
    }

    /// Marks the connection dead and shuts down the write side.
    pub async fn close(&self) {
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            debug!(id = self.id, username = %self.username, ?err, "failed to shut down writer");
        }
    }

    /// Resolves once the connection has been closed or a write has failed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("peer", &self.peer)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Read side of a client socket, owned by the client's receive loop.
pub struct ConnectionReader {
    lines: LineReader<BoxedReader>,
}

impl ConnectionReader {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            lines: line_reader(Box::new(reader) as BoxedReader),
        }
    }

    /// Next inbound line, or `Ok(None)` once the peer has hung up.
    pub async fn receive(&mut self) -> Result<Option<String>, ConnectionError> {
        Ok(read_line(&mut self.lines).await?)
    }

    /// Turns the reader into a stream of inbound lines.
    ///
    /// The stream ends at end-of-stream or right after yielding the first
    /// error; the reader is consumed, so it cannot be restarted.
    pub fn into_lines(self) -> impl Stream<Item = Result<String, ConnectionError>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.receive().await {
                Ok(Some(line)) => Some((Ok(line), Some(reader))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}
