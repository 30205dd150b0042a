use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{connection::Connection, error::ConnectionError, queue::QueueReceiver, registry::Registry};

/// Sole consumer of the broadcast queue.
///
/// Writes every dequeued line to each registered connection, one line at a
/// time, so all clients observe the same order. A connection whose write
/// fails or stalls past `write_timeout` is evicted; the rest still get the
/// line.
pub struct Dispatcher {
    queue: QueueReceiver,
    registry: Arc<Registry>,
    write_timeout: Duration,
}

impl Dispatcher {
    pub fn new(queue: QueueReceiver, registry: Arc<Registry>, write_timeout: Duration) -> Self {
        Self {
            queue,
            registry,
            write_timeout,
        }
    }

    /// Runs until the queue is closed and drained, then closes every
    /// connection still registered.
    pub async fn run(mut self) {
        while let Some(line) = self.queue.dequeue().await {
            let delivered = self.fan_out(&line).await;
            debug!(delivered, "line broadcast");
        }

        let remaining = self.registry.drain().await;
        info!(connections = remaining.len(), "dispatcher drained; closing connections");
        for connection in remaining {
            connection.close().await;
        }
    }

    /// Delivers `line` to a snapshot of the registry. Returns how many
    /// connections accepted it.
    pub async fn fan_out(&self, line: &str) -> usize {
        let mut delivered = 0;
        for connection in self.registry.snapshot_all().await {
            let result = match timeout(self.write_timeout, connection.send(line)).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::timed_out()),
            };

            match result {
                Ok(()) => delivered += 1,
                Err(err) => self.evict(&connection, err).await,
            }
        }
        delivered
    }

    async fn evict(&self, connection: &Connection, err: ConnectionError) {
        warn!(
            id = connection.id(),
            username = connection.username(),
            error = %err,
            "write failed; dropping connection from broadcast"
        );
        self.registry.remove_connection(connection).await;
        // Wakes the receive loop, which announces the disconnect exactly once.
        connection.close().await;
    }
}
