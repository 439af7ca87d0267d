//! Owns every task of a run and decides when the run is over.

use std::future::Future;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;
use api_types::PlayerId;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use utils::shared_memory::SharedBoardHandle;

use crate::adapters::AdapterContext;
use crate::adapters::ChannelAdapter;
use crate::adapters::TransportKind;
use crate::arbiter::GameRules;
use crate::arbiter::Registration;
use crate::arbiter::TurnArbiter;
use crate::config::CoordinatorConfig;
use crate::endpoints::Endpoints;
use crate::publisher::Publisher;
use crate::publisher::PublisherConfig;
use crate::registry::PlayerEntry;
use crate::registry::PlayerRegistry;
use crate::state_store::StateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished { loser: PlayerId, final_count: u32 },
    Aborted { count: u32 },
}

/// Assembles a [`Coordinator`]. Players registered here are in the rotation
/// before any adapter starts.
pub struct CoordinatorBuilder {
    arbiter: Arc<TurnArbiter>,
    registry: Arc<PlayerRegistry>,
    config: CoordinatorConfig,
    adapters: Vec<ChannelAdapter>,
    board: Option<Arc<SharedBoardHandle>>,
    endpoints: Endpoints,
}

impl CoordinatorBuilder {
    pub fn new(rules: GameRules, config: CoordinatorConfig) -> Self {
        let store = Arc::new(StateStore::new());
        Self {
            arbiter: Arc::new(TurnArbiter::new(store, rules)),
            registry: Arc::new(PlayerRegistry::new()),
            config,
            adapters: Vec::new(),
            board: None,
            endpoints: Endpoints::new(),
        }
    }

    pub fn arbiter(&self) -> &Arc<TurnArbiter> {
        &self.arbiter
    }

    pub fn endpoints(&mut self) -> &mut Endpoints {
        &mut self.endpoints
    }

    /// Puts a player in the rotation. Players arriving over a slot transport
    /// are also recorded in the registry under that transport.
    pub fn register_player(
        &mut self,
        player_id: PlayerId,
        transport: Option<TransportKind>,
    ) -> Result<()> {
        if self.arbiter.register(player_id) == Registration::Rejected {
            bail!("player id {player_id} is out of range");
        }
        if let Some(transport) = transport {
            self.registry.insert(PlayerEntry {
                player_id,
                transport,
                reply_channel: None,
            });
        }
        info!(player_id, "Pre-registered player");
        Ok(())
    }

    pub fn add_adapter(&mut self, adapter: ChannelAdapter) {
        self.adapters.push(adapter);
    }

    pub fn set_board(&mut self, board: Arc<SharedBoardHandle>) {
        self.board = Some(board);
    }

    pub fn build(self) -> Coordinator {
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&self.arbiter),
            Arc::clone(&self.registry),
            self.board,
            PublisherConfig {
                interval: self.config.publish_interval,
                format: self.config.status_format,
                disconnect_after: self.config.disconnect_after,
            },
        ));
        Coordinator {
            arbiter: self.arbiter,
            registry: self.registry,
            pace: self.config.pace,
            adapters: self.adapters,
            publisher,
            endpoints: self.endpoints,
            tasks: Vec::new(),
        }
    }
}

pub struct Coordinator {
    arbiter: Arc<TurnArbiter>,
    registry: Arc<PlayerRegistry>,
    pace: std::time::Duration,
    adapters: Vec<ChannelAdapter>,
    publisher: Arc<Publisher>,
    endpoints: Endpoints,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Coordinator {
    pub fn store(&self) -> &Arc<StateStore> {
        self.arbiter.store()
    }

    pub fn arbiter(&self) -> &Arc<TurnArbiter> {
        &self.arbiter
    }

    pub fn registry(&self) -> &Arc<PlayerRegistry> {
        &self.registry
    }

    /// Spawns every adapter loop and the publisher. Calling it again while
    /// tasks are running does nothing.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        let ctx = AdapterContext::new(
            Arc::clone(&self.arbiter),
            Arc::clone(&self.registry),
            self.pace,
        );
        for adapter in &self.adapters {
            info!(transport = %adapter.kind(), "Starting adapter");
            self.tasks
                .push((adapter.kind().to_string(), adapter.spawn(ctx.clone())));
        }
        self.tasks
            .push(("publisher".to_string(), Arc::clone(&self.publisher).spawn()));
        info!(tasks = self.tasks.len(), "All tasks started");
    }

    /// Waits until the game ends or `shutdown` resolves, then stops and joins
    /// every task. A shutdown aborts an unfinished game.
    pub async fn run_until_terminal<F>(&mut self, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        self.start();

        let mut changes = self.store().subscribe();
        tokio::select! {
            _ = changes.wait_for(|state| state.is_finished()) => {}
            _ = shutdown => {
                info!("Shutdown requested, aborting game");
                self.arbiter.abort();
            }
        }

        self.stop_tasks().await;

        let state = self.store().snapshot();
        let outcome = match (state.game_over, state.last_caller) {
            (true, Some(loser)) => RunOutcome::Finished {
                loser,
                final_count: state.current_count,
            },
            _ => RunOutcome::Aborted {
                count: state.current_count,
            },
        };
        info!(?outcome, "Run completed");
        outcome
    }

    async fn stop_tasks(&mut self) {
        for adapter in &self.adapters {
            adapter.stop();
        }
        self.publisher.stop();

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.drain(..).unzip();
        let results = futures::future::join_all(handles).await;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(()) => info!(task = %name, "Task completed"),
                Err(e) => error!(task = %name, error = %e, "Task failed"),
            }
        }
    }

    /// Releases every endpoint, most recently acquired first.
    pub async fn shutdown(mut self) {
        info!("Shutting down coordinator");
        if !self.tasks.is_empty() {
            self.stop_tasks().await;
        }
        let Coordinator {
            adapters,
            publisher,
            mut endpoints,
            ..
        } = self;
        // Adapters and the publisher hold endpoint handles.
        drop(adapters);
        drop(publisher);
        let removed = endpoints.release();
        info!(removed, "Coordinator shutdown completed");
    }
}
