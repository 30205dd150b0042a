//! Accept loop, username handshake and the per-connection receive loop.
//!
//! Each accepted socket moves through `Connecting -> Handshaking -> Active ->
//! Disconnected`; the last state is terminal and a connection task never
//! restarts.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionId, ConnectionReader},
    error::ConnectionError,
    event::{EventLog, ServerEvent},
    queue::QueueSender,
    registry::Registry,
};

/// Everything a connection task needs from the server.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub registry: Arc<Registry>,
    pub queue: QueueSender,
    pub events: EventLog,
    pub shutdown: CancellationToken,
    /// How long a new client may take to send its username. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

pub struct Listener {
    listener: TcpListener,
    context: ConnectionContext,
    tracker: TaskTracker,
    accepted: u64,
}

impl Listener {
    pub fn new(listener: TcpListener, context: ConnectionContext, tracker: TaskTracker) -> Self {
        Self {
            listener,
            context,
            tracker,
            accepted: 0,
        }
    }

    /// Accepts connections until the shutdown token fires.
    ///
    /// Connection tasks are spawned on the tracker; this returns as soon as
    /// accepting stops, without waiting for them.
    pub async fn run(self) {
        let Listener {
            listener,
            context,
            tracker,
            mut accepted,
        } = self;

        loop {
            select! {
                biased;
                _ = context.shutdown.cancelled() => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &context, &tracker, &mut accepted);
                }
            }
        }
        info!(accepted, "listener stopped accepting connections");
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    context: &ConnectionContext,
    tracker: &TaskTracker,
    accepted: &mut u64,
) {
    match result {
        Ok((stream, peer)) => {
            *accepted += 1;
            spawn_connection(*accepted, stream, peer, context, tracker);
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    context: &ConnectionContext,
    tracker: &TaskTracker,
) {
    context.events.post(ServerEvent::Accepted { number: id, peer });

    let context = context.clone();
    let (reader, writer) = stream.into_split();
    tracker.spawn(async move {
        if let Err(err) = serve_connection(id, Some(peer), reader, writer, context).await {
            warn!(peer = %peer, error = %err, "connection attempt dropped");
        }
    });
}

/// Drives one client from handshake to disconnect.
///
/// Fails only if the handshake fails; once the client is registered every
/// read error ends in a disconnect notice instead.
pub async fn serve_connection<R, W>(
    id: ConnectionId,
    peer: Option<SocketAddr>,
    reader: R,
    writer: W,
    context: ConnectionContext,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut reader = ConnectionReader::new(reader);

    let handshake_result = select! {
        biased;
        _ = context.shutdown.cancelled() => return Ok(()),
        result = perform_handshake(&mut reader, context.handshake_timeout) => result,
    };
    let username = match handshake_result {
        Ok(username) => username,
        Err(err) => {
            context.events.post(ServerEvent::HandshakeFailed { peer });
            return Err(err);
        }
    };

    let connection = Arc::new(Connection::new(id, username, peer, writer));
    if let Some(displaced) = context.registry.add(Arc::clone(&connection)).await {
        warn!(
            username = connection.username(),
            displaced_id = displaced.id(),
            "username already registered; newest connection wins"
        );
    }

    info!(id, ?peer, username = connection.username(), "client joined");
    context.events.post(ServerEvent::Joined {
        username: connection.username().to_string(),
    });

    run_receive_loop(&connection, reader, &context).await;
    Ok(())
}

/// The first line after accept is the username, taken verbatim.
async fn perform_handshake(
    reader: &mut ConnectionReader,
    limit: Option<Duration>,
) -> Result<String, ConnectionError> {
    let first_line = match limit {
        Some(limit) => timeout(limit, reader.receive())
            .await
            .map_err(|_| ConnectionError::Protocol("no username before handshake timeout"))??,
        None => reader.receive().await?,
    };

    first_line.ok_or(ConnectionError::Protocol(
        "connection closed before sending a username",
    ))
}

async fn run_receive_loop(
    connection: &Arc<Connection>,
    reader: ConnectionReader,
    context: &ConnectionContext,
) {
    let lines = reader.into_lines();
    tokio::pin!(lines);

    loop {
        select! {
            biased;
            _ = context.shutdown.cancelled() => {
                // Shutdown is not a disconnect; the dispatcher closes us after draining.
                debug!(username = connection.username(), "receive loop stopped for shutdown");
                return;
            }
            _ = connection.closed() => {
                debug!(username = connection.username(), "connection closed after failed write");
                break;
            }
            next = lines.next() => match next {
                Some(Ok(line)) => context.queue.enqueue(line),
                Some(Err(err)) => {
                    debug!(username = connection.username(), error = %err, "read failed");
                    break;
                }
                None => break,
            }
        }
    }

    handle_disconnect(connection, context).await;
}

async fn handle_disconnect(connection: &Arc<Connection>, context: &ConnectionContext) {
    let username = connection.username();

    // Out of the registry first, so the departing client never gets its own notice.
    context.registry.remove_connection(connection).await;
    connection.close().await;
    context
        .queue
        .enqueue(format!("{username} disconnected from chat."));

    info!(id = connection.id(), peer = ?connection.peer(), username, "client disconnected");
    context.events.post(ServerEvent::Removed {
        username: username.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncWriteExt, DuplexStream},
        sync::broadcast,
        task::JoinHandle,
    };

    use super::*;
    use crate::{
        queue::{QueueReceiver, broadcast_queue},
        wire::write_line,
    };

    struct Harness {
        context: ConnectionContext,
        queue: QueueReceiver,
        events: broadcast::Receiver<ServerEvent>,
    }

    impl Harness {
        fn new(handshake_timeout: Option<Duration>) -> Self {
            let (queue_tx, queue) = broadcast_queue();
            let events = EventLog::new();
            let subscription = events.subscribe();
            Self {
                context: ConnectionContext {
                    registry: Arc::new(Registry::new()),
                    queue: queue_tx,
                    events,
                    shutdown: CancellationToken::new(),
                    handshake_timeout,
                },
                queue,
                events: subscription,
            }
        }

        /// Starts a connection task; returns the client's end of the socket.
        fn connect(&self, id: u64) -> (DuplexStream, JoinHandle<Result<(), ConnectionError>>) {
            let (client_side, server_side) = tokio::io::duplex(1024);
            let (reader, writer) = tokio::io::split(server_side);
            let task = tokio::spawn(serve_connection(
                id,
                None,
                reader,
                writer,
                self.context.clone(),
            ));
            (client_side, task)
        }

        async fn next_line(&mut self) -> String {
            tokio::time::timeout(Duration::from_secs(1), self.queue.dequeue())
                .await
                .expect("timed out waiting for queued line")
                .expect("queue closed")
        }

        async fn next_event(&mut self) -> ServerEvent {
            tokio::time::timeout(Duration::from_secs(1), self.events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel")
        }
    }

    async fn finish(task: JoinHandle<Result<(), ConnectionError>>) -> Result<(), ConnectionError> {
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection task should finish")
            .expect("connection task panicked")
    }

    #[tokio::test]
    async fn lines_are_queued_then_a_single_disconnect_notice() {
        let mut harness = Harness::new(None);
        let (mut client, task) = harness.connect(1);

        write_line(&mut client, "alice").await.expect("username");
        assert_eq!(
            harness.next_event().await,
            ServerEvent::Joined { username: "alice".into() }
        );
        assert!(harness.context.registry.contains("alice").await);

        write_line(&mut client, "alice: hi").await.expect("line");
        write_line(&mut client, "").await.expect("empty line");
        assert_eq!(harness.next_line().await, "alice: hi");
        assert_eq!(harness.next_line().await, "");

        drop(client);
        finish(task).await.expect("clean disconnect");

        assert_eq!(harness.next_line().await, "alice disconnected from chat.");
        assert_eq!(
            harness.next_event().await,
            ServerEvent::Removed { username: "alice".into() }
        );
        assert!(harness.context.registry.is_empty().await);
        assert!(harness.queue.is_empty());
    }

    #[tokio::test]
    async fn hanging_up_before_the_username_is_a_protocol_error() {
        let mut harness = Harness::new(None);
        let (mut client, task) = harness.connect(1);

        client.shutdown().await.expect("half close");
        let err = finish(task).await.expect_err("handshake should fail");

        assert!(err.is_protocol());
        assert_eq!(
            harness.next_event().await,
            ServerEvent::HandshakeFailed { peer: None }
        );
        assert!(harness.context.registry.is_empty().await);
        assert!(harness.queue.is_empty());
    }

    #[tokio::test]
    async fn silent_client_hits_the_handshake_timeout() {
        let harness = Harness::new(Some(Duration::from_millis(50)));
        let (_client, task) = harness.connect(1);

        let err = finish(task).await.expect_err("handshake should time out");
        assert!(err.is_protocol());
        assert!(harness.context.registry.is_empty().await);
    }

    #[tokio::test]
    async fn closing_the_connection_ends_the_receive_loop() {
        let mut harness = Harness::new(None);
        let (mut client, task) = harness.connect(4);

        write_line(&mut client, "bob").await.expect("username");
        harness.next_event().await;

        let bob = harness.context.registry.snapshot_all().await.remove(0);
        bob.close().await;
        finish(task).await.expect("clean disconnect");

        assert_eq!(harness.next_line().await, "bob disconnected from chat.");
        assert!(harness.queue.is_empty());
        assert!(harness.context.registry.is_empty().await);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_without_a_notice() {
        let mut harness = Harness::new(None);
        let (mut client, task) = harness.connect(1);

        write_line(&mut client, "carol").await.expect("username");
        harness.next_event().await;

        harness.context.shutdown.cancel();
        finish(task).await.expect("shutdown is not an error");

        assert!(harness.queue.is_empty());
        // Left for the dispatcher to close once the queue is drained.
        assert!(harness.context.registry.contains("carol").await);
    }
}
