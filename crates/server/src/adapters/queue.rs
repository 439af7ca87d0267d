use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use utils::msg_queue::MessageQueue;
use utils::msg_queue::QueueMessage;
use utils::IpcError;

use super::AdapterContext;
use super::TransportKind;

/// Move records received from a System V message queue.
pub struct QueueAdapter {
    queue: Arc<MessageQueue>,
    stop: CancellationToken,
}

impl QueueAdapter {
    pub fn new(queue: Arc<MessageQueue>) -> Self {
        Self {
            queue,
            stop: CancellationToken::new(),
        }
    }

    pub fn spawn(self: Arc<Self>, ctx: AdapterContext) -> JoinHandle<()> {
        tokio::spawn(async move {
            let adapter = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || adapter.listen(&ctx)).await {
                error!(error = %e, "Queue listener panicked");
            }
            debug!(key = self.queue.key(), "Queue adapter stopped");
        })
    }

    /// Sends the wake message that unblocks a pending receive.
    pub fn stop(&self) {
        self.stop.cancel();
        if let Err(e) = self.queue.send(&QueueMessage::Wake) {
            warn!(key = self.queue.key(), error = %e, "Failed to wake queue listener");
        }
    }

    fn listen(&self, ctx: &AdapterContext) {
        info!(key = self.queue.key(), "Waiting for queued moves");
        while !self.stop.is_cancelled() {
            match self.queue.receive() {
                Ok(QueueMessage::Wake) => continue,
                Ok(QueueMessage::Move(request)) => {
                    ctx.dispatch_blocking(TransportKind::Queue, request);
                }
                Err(IpcError::Wire(e)) => {
                    warn!(key = self.queue.key(), error = %e, "Malformed queue message");
                }
                Err(e) => {
                    error!(key = self.queue.key(), error = %e, "Queue receive failed");
                    break;
                }
            }
        }
    }
}
