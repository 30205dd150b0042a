//! The broadcast queue: an unbounded FIFO of lines awaiting fan-out.
//!
//! Every receive loop holds a [`QueueSender`]; the dispatcher holds the only
//! [`QueueReceiver`]. Having a single consumer is what gives all clients the
//! same global message order.
//!
//! The queue is unbounded, so a fast producer facing a slow fan-out grows it
//! without limit. There is no backpressure.

use tokio::sync::mpsc;
use tracing::warn;

pub fn broadcast_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<String>,
}

impl QueueSender {
    /// Appends a line. Never blocks.
    pub fn enqueue(&self, line: impl Into<String>) {
        if let Err(error) = self.tx.send(line.into()) {
            warn!(line = %error.0, "broadcast queue closed; dropping line");
        }
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

impl QueueReceiver {
    /// Waits for the next line in FIFO order.
    ///
    /// Returns `None` once every sender is gone and nothing is left to drain.
    pub async fn dequeue(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
