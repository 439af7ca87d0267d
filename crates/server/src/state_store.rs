//! The single authoritative game state.

use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::PlayerId;
use api_types::StatusRecord;
use api_types::UNASSIGNED;
use tokio::sync::watch;
use utils::shared_memory::BoardSnapshot;

/// Game progress. Only [`StateStore::mutate`] hands out a mutable reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameState {
    pub current_count: u32,
    /// `UNASSIGNED` until the first player registers.
    pub current_turn: PlayerId,
    pub last_move_size: u32,
    /// Set once, to the player whose move reached the limit.
    pub last_caller: Option<PlayerId>,
    pub game_over: bool,
    /// The run was stopped from outside before anyone lost.
    pub aborted: bool,
    /// Insertion-ordered, duplicate free.
    pub registered_players: Vec<PlayerId>,
    /// Bumped by every mutation that changed something.
    pub version: u64,
}

impl GameState {
    /// Whether no further moves will ever be applied.
    pub fn is_finished(&self) -> bool {
        self.game_over || self.aborted
    }

    pub fn is_registered(&self, player_id: PlayerId) -> bool {
        self.registered_players.contains(&player_id)
    }

    pub fn status(&self) -> StatusRecord {
        match (self.game_over, self.last_caller) {
            (true, Some(loser)) => StatusRecord::Finished {
                loser,
                final_count: self.current_count,
            },
            _ if self.aborted => StatusRecord::Aborted {
                final_count: self.current_count,
            },
            _ => StatusRecord::InProgress {
                current_count: self.current_count,
                current_turn: self.current_turn,
                players: self.registered_players.clone(),
            },
        }
    }

    pub fn to_board(&self) -> BoardSnapshot {
        BoardSnapshot {
            current_count: self.current_count,
            current_turn: self.current_turn,
            last_move_size: self.last_move_size,
            last_caller: self.last_caller.filter(|&p| p != UNASSIGNED),
            game_over: self.game_over,
            aborted: self.aborted,
            version: self.version,
        }
    }
}

/// Guards the game state behind one lock and broadcasts every change.
///
/// Critical sections only touch memory: no I/O and no sleeping while the
/// lock is held.
pub struct StateStore {
    state: Mutex<GameState>,
    changes: watch::Sender<GameState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(GameState::default());
        Self {
            state: Mutex::new(GameState::default()),
            changes,
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> GameState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs `f` with exclusive access. Mutations never interleave; when `f`
    /// changed the state the version is bumped and subscribers are notified
    /// before the lock is released, so they observe changes in order.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut GameState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.clone();
        let result = f(&mut state);
        if *state != before {
            state.version = before.version + 1;
            self.changes.send_replace(state.clone());
        }
        result
    }

    /// Receiver that sees the state after every change.
    pub fn subscribe(&self) -> watch::Receiver<GameState> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn unchanged_mutation_keeps_version() {
        let store = StateStore::new();
        store.mutate(|_| ());
        assert_eq!(store.snapshot().version, 0);

        store.mutate(|s| s.current_count = 2);
        store.mutate(|s| s.current_count = 2);
        assert_eq!(store.snapshot().version, 1);
    }

    #[test]
    fn mutations_do_not_interleave() {
        let store = Arc::new(StateStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.mutate(|s| {
                            let seen = s.current_count;
                            s.current_count = seen + 1;
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let state = store.snapshot();
        assert_eq!(state.current_count, 800);
        assert_eq!(state.version, 800);
    }

    #[tokio::test]
    async fn subscribers_see_latest_state() {
        let store = StateStore::new();
        let mut changes = store.subscribe();
        store.mutate(|s| s.registered_players.push(1));
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow().registered_players, vec![1]);
    }

    #[test]
    fn status_reflects_run_phase() {
        let mut state = GameState {
            current_count: 10,
            current_turn: 2,
            registered_players: vec![1, 2],
            ..Default::default()
        };
        assert_eq!(
            state.status(),
            StatusRecord::InProgress {
                current_count: 10,
                current_turn: 2,
                players: vec![1, 2],
            }
        );

        state.aborted = true;
        assert_eq!(state.status(), StatusRecord::Aborted { final_count: 10 });

        let finished = GameState {
            current_count: 31,
            game_over: true,
            last_caller: Some(1),
            ..Default::default()
        };
        assert_eq!(
            finished.status(),
            StatusRecord::Finished {
                loser: 1,
                final_count: 31,
            }
        );
    }
}
