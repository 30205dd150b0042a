use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::{
    dispatcher::Dispatcher,
    event::{EventLog, ServerEvent},
    listener::{ConnectionContext, Listener},
    queue::broadcast_queue,
    registry::Registry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Upper bound on a single write to one client before it is dropped.
    pub write_timeout: Duration,
    /// How long a new client may take to send its username. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            handshake_timeout: None,
        }
    }
}

/// A single-room line broadcast server bound to a TCP listener.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<Registry>,
    events: EventLog,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            config,
            registry: Arc::new(Registry::new()),
            events: EventLog::new(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Live view of the connected clients, usable while the server runs.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Subscribes to the local event transcript. Subscribe before calling
    /// `run_until` to see every event.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Serves clients until `shutdown` resolves, then shuts down in order:
    /// stop accepting, stop every connection task, deliver whatever is still
    /// queued, close all sockets.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            registry,
            events,
        } = self;

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (queue_tx, queue_rx) = broadcast_queue();

        let dispatcher = tokio::spawn(
            Dispatcher::new(queue_rx, Arc::clone(&registry), config.write_timeout).run(),
        );

        // The listener owns the last producer handle outside the connection
        // tasks, so the queue closes once both are gone.
        let context = ConnectionContext {
            registry,
            queue: queue_tx,
            events: events.clone(),
            shutdown: token.clone(),
            handshake_timeout: config.handshake_timeout,
        };
        let accept_loop = tokio::spawn(Listener::new(listener, context, tracker.clone()).run());

        shutdown.await;
        info!("server shutting down");
        events.post(ServerEvent::ShuttingDown);
        token.cancel();

        accept_loop.await.context("accept loop panicked")?;
        tracker.close();
        tracker.wait().await;
        dispatcher.await.context("dispatcher panicked")?;

        info!("server stopped");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}
