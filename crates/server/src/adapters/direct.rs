use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::MoveRequest;
use api_types::PlayerId;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::AdapterContext;
use super::Dispatch;
use super::TransportKind;
use crate::arbiter::MoveOutcome;
use crate::arbiter::Registration;

#[derive(Debug, thiserror::Error)]
pub enum DirectError {
    #[error("direct adapter is not running")]
    Closed,
    #[error("unexpected reply {0:?}")]
    UnexpectedReply(Dispatch),
}

struct Submission {
    request: MoveRequest,
    reply: oneshot::Sender<Dispatch>,
}

/// In-process transport for trusted callers.
pub struct DirectAdapter {
    receiver: Mutex<Option<mpsc::Receiver<Submission>>>,
    stop: CancellationToken,
}

/// Cloneable handle that submits requests to a [`DirectAdapter`].
#[derive(Clone)]
pub struct DirectWriter {
    sender: mpsc::Sender<Submission>,
}

impl DirectAdapter {
    pub fn new(capacity: usize) -> (Self, DirectWriter) {
        let (sender, receiver) = mpsc::channel(capacity);
        let adapter = Self {
            receiver: Mutex::new(Some(receiver)),
            stop: CancellationToken::new(),
        };
        (adapter, DirectWriter { sender })
    }

    /// The loop can only be spawned once; later calls return a finished task.
    pub fn spawn(self: Arc<Self>, ctx: AdapterContext) -> JoinHandle<()> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tokio::spawn(async move {
            let Some(mut receiver) = receiver else {
                warn!("Direct adapter already started");
                return;
            };
            loop {
                let submission = tokio::select! {
                    _ = self.stop.cancelled() => break,
                    submission = receiver.recv() => submission,
                };
                let Some(Submission { request, reply }) = submission else {
                    break;
                };
                let dispatch = ctx.dispatch_paced(TransportKind::Direct, request).await;
                // The caller may have stopped waiting.
                let _ = reply.send(dispatch);
            }
            debug!("Direct adapter stopped");
        })
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl DirectWriter {
    async fn send(&self, request: MoveRequest) -> Result<Dispatch, DirectError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Submission { request, reply })
            .await
            .map_err(|_| DirectError::Closed)?;
        response.await.map_err(|_| DirectError::Closed)
    }

    pub async fn submit(&self, player_id: PlayerId, amount: u32) -> Result<MoveOutcome, DirectError> {
        match self.send(MoveRequest::new(player_id, amount)).await? {
            Dispatch::Moved(outcome) => Ok(outcome),
            other => Err(DirectError::UnexpectedReply(other)),
        }
    }

    pub async fn register(&self, player_id: PlayerId) -> Result<Registration, DirectError> {
        match self.send(MoveRequest::register(player_id, None)).await? {
            Dispatch::Registered(registration) => Ok(registration),
            other => Err(DirectError::UnexpectedReply(other)),
        }
    }
}
