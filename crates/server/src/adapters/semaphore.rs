use std::sync::Arc;

use api_types::MoveRequest;
use api_types::PlayerId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use utils::semaphore::NamedSemaphore;
use utils::shared_memory::SharedBoardHandle;

use super::AdapterContext;
use super::Dispatch;
use super::TransportKind;
use crate::arbiter::MoveOutcome;

/// Moves written into the shared board's slot, announced by posting the
/// server semaphore.
///
/// Players block on their own semaphore until it is their turn. The hand-off
/// loop refreshes the board mirror and then posts the semaphore of whoever
/// holds the turn, so a woken player always reads a current board.
pub struct SemaphoreAdapter {
    server: Arc<NamedSemaphore>,
    players: Vec<(PlayerId, Arc<NamedSemaphore>)>,
    board: Arc<SharedBoardHandle>,
    stop: CancellationToken,
}

impl SemaphoreAdapter {
    pub fn new(
        server: Arc<NamedSemaphore>,
        players: Vec<(PlayerId, Arc<NamedSemaphore>)>,
        board: Arc<SharedBoardHandle>,
    ) -> Self {
        Self {
            server,
            players,
            board,
            stop: CancellationToken::new(),
        }
    }

    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.iter().map(|(id, _)| *id)
    }

    pub fn spawn(self: Arc<Self>, ctx: AdapterContext) -> JoinHandle<()> {
        tokio::spawn(async move {
            let listener = {
                let adapter = Arc::clone(&self);
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || adapter.listen(&ctx))
            };
            self.hand_off(&ctx).await;
            if let Err(e) = listener.await {
                error!(error = %e, "Semaphore listener panicked");
            }
            debug!(semaphore = %self.server.name(), "Semaphore adapter stopped");
        })
    }

    pub fn stop(&self) {
        self.stop.cancel();
        if let Err(e) = self.server.post() {
            warn!(error = %e, "Failed to wake semaphore listener");
        }
    }

    fn listen(&self, ctx: &AdapterContext) {
        info!(semaphore = %self.server.name(), "Waiting for slot moves");
        loop {
            if let Err(e) = self.server.wait() {
                error!(error = %e, "Server semaphore wait failed");
                break;
            }
            if self.stop.is_cancelled() {
                break;
            }
            let Some((player_id, amount)) = self.board.board().take_move() else {
                debug!("Server semaphore posted without a pending move");
                continue;
            };
            let dispatch =
                ctx.dispatch_blocking(TransportKind::Semaphore, MoveRequest::new(player_id, amount));
            // The turn did not move, so the hand-off will not wake the
            // holder again on its own.
            if dispatch == Dispatch::Moved(MoveOutcome::RejectedInvalidAmount) {
                self.post_player(player_id);
            }
        }
    }

    async fn hand_off(&self, ctx: &AdapterContext) {
        let mut changes = ctx.arbiter.store().subscribe();
        let mut signaled = None;
        loop {
            let state = changes.borrow_and_update().clone();
            self.board.board().publish(&state.to_board());
            if state.is_finished() {
                break;
            }

            // A changed count with the same holder means the turn came back
            // around while we were not looking.
            let grant = (state.current_turn, state.current_count);
            if signaled != Some(grant) {
                signaled = Some(grant);
                self.post_player(state.current_turn);
            }

            tokio::select! {
                _ = self.stop.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.board
            .board()
            .publish(&ctx.arbiter.store().snapshot().to_board());
        for (player_id, _) in &self.players {
            self.post_player(*player_id);
        }
    }

    fn post_player(&self, player_id: PlayerId) {
        let Some((_, sem)) = self.players.iter().find(|(id, _)| *id == player_id) else {
            return;
        };
        match sem.post() {
            Ok(()) => debug!(player_id, "Handed turn over"),
            Err(e) => warn!(player_id, error = %e, "Failed to post player semaphore"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process;
    use std::time::Duration;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::arbiter::GameRules;
    use crate::arbiter::TurnArbiter;
    use crate::registry::PlayerRegistry;
    use crate::state_store::StateStore;

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn ping_pong_between_two_slot_players() {
        let tag = format!("br31_sem_unit_{}", process::id());
        let server = Arc::new(NamedSemaphore::create(&format!("/{tag}_server")).unwrap());
        let board = Arc::new(SharedBoardHandle::create(&format!("{tag}_board")).unwrap());
        let players: Vec<_> = [1, 2]
            .into_iter()
            .map(|id| {
                let sem = NamedSemaphore::create(&format!("/{tag}_p{id}")).unwrap();
                (id, Arc::new(sem))
            })
            .collect();

        let store = Arc::new(StateStore::new());
        let arbiter = Arc::new(TurnArbiter::new(
            Arc::clone(&store),
            GameRules {
                limit: 10,
                ..Default::default()
            },
        ));
        arbiter.register(1);
        arbiter.register(2);
        let ctx = AdapterContext::new(arbiter, Arc::new(PlayerRegistry::new()), Duration::ZERO);

        let adapter = Arc::new(SemaphoreAdapter::new(
            Arc::clone(&server),
            players.clone(),
            Arc::clone(&board),
        ));
        let task = Arc::clone(&adapter).spawn(ctx);

        // Each player waits for its grant, then plays 2 until the board ends.
        let clients: Vec<_> = players
            .into_iter()
            .map(|(id, sem)| {
                let server = Arc::clone(&server);
                let board = Arc::clone(&board);
                std::thread::spawn(move || loop {
                    assert!(sem.wait_timeout(Duration::from_secs(5)).unwrap());
                    let snapshot = board.board().read();
                    if snapshot.game_over || snapshot.aborted {
                        return;
                    }
                    assert_eq!(snapshot.current_turn, id);
                    board.board().submit_move(id, 2);
                    server.post().unwrap();
                })
            })
            .collect();
        for client in clients {
            tokio::task::spawn_blocking(move || client.join().unwrap())
                .await
                .unwrap();
        }

        adapter.stop();
        task.await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.current_count, 10);
        assert_eq!(state.last_caller, Some(1));
        let mirror = board.board().read();
        assert!(mirror.game_over);
        assert_eq!(mirror.last_caller, Some(1));
    }
}
