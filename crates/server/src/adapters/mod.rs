//! Transports that deliver moves into the arbiter.
//!
//! Every adapter decodes its own wire format and then hands the request to
//! [`AdapterContext::dispatch`], which is the only path into the arbiter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use api_types::MoveRequest;
use clap::ValueEnum;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::arbiter::MoveOutcome;
use crate::arbiter::Registration;
use crate::arbiter::TurnArbiter;
use crate::registry::PlayerEntry;
use crate::registry::PlayerRegistry;

pub mod direct;
pub mod pipe;
pub mod queue;
pub mod semaphore;

pub use direct::DirectAdapter;
pub use direct::DirectWriter;
pub use pipe::PipeAdapter;
pub use queue::QueueAdapter;
pub use semaphore::SemaphoreAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum TransportKind {
    Pipe,
    Semaphore,
    Queue,
    /// In-process writer; not selectable from the command line.
    #[value(skip)]
    Direct,
}

impl TransportKind {
    /// Whether a zero-amount request registers the sender.
    pub fn supports_registration(self) -> bool {
        !matches!(self, TransportKind::Semaphore)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Pipe => "pipe",
            TransportKind::Semaphore => "semaphore",
            TransportKind::Queue => "queue",
            TransportKind::Direct => "direct",
        };
        f.write_str(name)
    }
}

/// Result of handing one request to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Registered(Registration),
    Moved(MoveOutcome),
}

/// What every listening loop shares.
#[derive(Clone)]
pub struct AdapterContext {
    pub arbiter: Arc<TurnArbiter>,
    pub registry: Arc<PlayerRegistry>,
    /// Delay per counted unit after an applied move.
    pub pace: Duration,
}

impl AdapterContext {
    pub fn new(arbiter: Arc<TurnArbiter>, registry: Arc<PlayerRegistry>, pace: Duration) -> Self {
        Self {
            arbiter,
            registry,
            pace,
        }
    }

    pub fn dispatch(&self, transport: TransportKind, request: MoveRequest) -> Dispatch {
        let player_id = request.player_id;

        if request.is_registration() && transport.supports_registration() {
            let registration = self.arbiter.register(player_id);
            match registration {
                Registration::Registered { first_turn } => {
                    info!(player_id, %transport, first_turn, "Player registered");
                }
                Registration::AlreadyRegistered => {
                    debug!(player_id, %transport, "Player already registered");
                }
                Registration::Rejected => {
                    warn!(player_id, %transport, "Registration rejected");
                    return Dispatch::Registered(registration);
                }
            }
            self.registry.insert(PlayerEntry {
                player_id,
                transport,
                reply_channel: request.reply_channel,
            });
            return Dispatch::Registered(registration);
        }

        let amount = request.amount;
        let outcome = self.arbiter.apply_move(player_id, amount);
        match outcome {
            MoveOutcome::Applied {
                new_count,
                applied,
                ended,
            } => {
                for called in (new_count + 1 - applied)..=new_count {
                    info!(player_id, called, "Called number");
                }
                if ended {
                    info!(loser = player_id, final_count = new_count, "Game over");
                }
            }
            MoveOutcome::RejectedWrongTurn => {
                debug!(player_id, amount, %transport, "Move rejected: not this player's turn");
            }
            MoveOutcome::RejectedInvalidAmount => {
                warn!(player_id, amount, %transport, "Move rejected: invalid amount");
            }
            MoveOutcome::RejectedGameOver => {
                debug!(player_id, amount, %transport, "Move rejected: game already over");
            }
        }
        Dispatch::Moved(outcome)
    }

    /// How long to wait after `dispatch` returned, with the lock released.
    pub fn pacing(&self, dispatch: &Dispatch) -> Option<Duration> {
        match dispatch {
            Dispatch::Moved(MoveOutcome::Applied { applied, .. }) if !self.pace.is_zero() => {
                Some(self.pace * *applied)
            }
            _ => None,
        }
    }

    /// [`dispatch`](Self::dispatch) followed by the pacing sleep, for loops
    /// running on a blocking thread.
    pub fn dispatch_blocking(&self, transport: TransportKind, request: MoveRequest) -> Dispatch {
        let dispatch = self.dispatch(transport, request);
        if let Some(delay) = self.pacing(&dispatch) {
            std::thread::sleep(delay);
        }
        dispatch
    }

    pub async fn dispatch_paced(&self, transport: TransportKind, request: MoveRequest) -> Dispatch {
        let dispatch = self.dispatch(transport, request);
        if let Some(delay) = self.pacing(&dispatch) {
            tokio::time::sleep(delay).await;
        }
        dispatch
    }
}

/// A configured transport.
#[derive(Clone)]
pub enum ChannelAdapter {
    Pipe(Arc<PipeAdapter>),
    Semaphore(Arc<SemaphoreAdapter>),
    Queue(Arc<QueueAdapter>),
    Direct(Arc<DirectAdapter>),
}

impl ChannelAdapter {
    pub fn kind(&self) -> TransportKind {
        match self {
            ChannelAdapter::Pipe(_) => TransportKind::Pipe,
            ChannelAdapter::Semaphore(_) => TransportKind::Semaphore,
            ChannelAdapter::Queue(_) => TransportKind::Queue,
            ChannelAdapter::Direct(_) => TransportKind::Direct,
        }
    }

    /// Starts the listening loop.
    pub fn spawn(&self, ctx: AdapterContext) -> JoinHandle<()> {
        match self {
            ChannelAdapter::Pipe(adapter) => Arc::clone(adapter).spawn(ctx),
            ChannelAdapter::Semaphore(adapter) => Arc::clone(adapter).spawn(ctx),
            ChannelAdapter::Queue(adapter) => Arc::clone(adapter).spawn(ctx),
            ChannelAdapter::Direct(adapter) => Arc::clone(adapter).spawn(ctx),
        }
    }

    /// Makes the loop return soon, even when it is blocked in a receive.
    /// Safe to call more than once and while the loop is running.
    pub fn stop(&self) {
        match self {
            ChannelAdapter::Pipe(adapter) => adapter.stop(),
            ChannelAdapter::Semaphore(adapter) => adapter.stop(),
            ChannelAdapter::Queue(adapter) => adapter.stop(),
            ChannelAdapter::Direct(adapter) => adapter.stop(),
        }
    }
}
