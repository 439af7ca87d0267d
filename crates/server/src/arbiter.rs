//! Game rules applied to the shared state.

use std::sync::Arc;

use api_types::PlayerId;
use api_types::MAX_PLAYERS;
use api_types::UNASSIGNED;
use clap::ValueEnum;

use crate::state_store::GameState;
use crate::state_store::StateStore;

/// What happens to a move that would carry the count past the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OvershootPolicy {
    /// Apply it as is; the count may end above the limit.
    #[default]
    Allow,
    /// Shorten the move so the count lands exactly on the limit.
    Clamp,
    /// Reject it as an invalid amount.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    pub limit: u32,
    pub max_step: u32,
    pub overshoot: OvershootPolicy,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            limit: 31,
            max_step: 3,
            overshoot: OvershootPolicy::Allow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Applied {
        new_count: u32,
        /// Units actually added; differs from the request only under
        /// [`OvershootPolicy::Clamp`].
        applied: u32,
        ended: bool,
    },
    RejectedWrongTurn,
    RejectedInvalidAmount,
    RejectedGameOver,
}

impl MoveOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MoveOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered { first_turn: bool },
    AlreadyRegistered,
    Rejected,
}

/// Validates and applies moves. Every check and its mutation run inside a
/// single [`StateStore::mutate`], so a move is judged against the state it
/// is applied to.
pub struct TurnArbiter {
    store: Arc<StateStore>,
    rules: GameRules,
}

impl TurnArbiter {
    pub fn new(store: Arc<StateStore>, rules: GameRules) -> Self {
        Self { store, rules }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn apply_move(&self, player_id: PlayerId, amount: u32) -> MoveOutcome {
        let rules = self.rules;
        self.store.mutate(|state| {
            if state.is_finished() {
                return MoveOutcome::RejectedGameOver;
            }
            // Nobody holds the turn while the rotation is empty.
            if state.current_turn == UNASSIGNED
                || player_id != state.current_turn
                || !state.is_registered(player_id)
            {
                return MoveOutcome::RejectedWrongTurn;
            }
            if amount < 1 || amount > rules.max_step {
                return MoveOutcome::RejectedInvalidAmount;
            }

            let remaining = rules.limit.saturating_sub(state.current_count);
            let applied = match rules.overshoot {
                OvershootPolicy::Allow => amount,
                OvershootPolicy::Clamp => amount.min(remaining),
                OvershootPolicy::Reject if amount > remaining => {
                    return MoveOutcome::RejectedInvalidAmount;
                }
                OvershootPolicy::Reject => amount,
            };

            state.current_count += applied;
            state.last_move_size = applied;

            if state.current_count >= rules.limit {
                state.game_over = true;
                state.last_caller = Some(player_id);
                return MoveOutcome::Applied {
                    new_count: state.current_count,
                    applied,
                    ended: true,
                };
            }

            state.current_turn = next_player(state, player_id);
            MoveOutcome::Applied {
                new_count: state.current_count,
                applied,
                ended: false,
            }
        })
    }

    /// Adds a player to the rotation. The first registrant gets the turn.
    pub fn register(&self, player_id: PlayerId) -> Registration {
        if player_id == UNASSIGNED || player_id > MAX_PLAYERS {
            return Registration::Rejected;
        }
        self.store.mutate(|state| {
            if state.is_finished() {
                return Registration::Rejected;
            }
            if state.is_registered(player_id) {
                return Registration::AlreadyRegistered;
            }
            state.registered_players.push(player_id);
            let first_turn = state.current_turn == UNASSIGNED;
            if first_turn {
                state.current_turn = player_id;
            }
            Registration::Registered { first_turn }
        })
    }

    /// Removes a player. A turn it held passes to the next player in order.
    /// Returns whether the player was registered.
    pub fn unregister(&self, player_id: PlayerId) -> bool {
        self.store.mutate(|state| {
            if state.is_finished() {
                return false;
            }
            let Some(index) = state
                .registered_players
                .iter()
                .position(|&p| p == player_id)
            else {
                return false;
            };

            if state.current_turn == player_id {
                state.current_turn = next_player(state, player_id);
                if state.current_turn == player_id {
                    state.current_turn = UNASSIGNED;
                }
            }
            state.registered_players.remove(index);
            true
        })
    }

    /// Ends an unfinished run without a loser.
    pub fn abort(&self) -> bool {
        self.store.mutate(|state| {
            if state.is_finished() {
                return false;
            }
            state.aborted = true;
            true
        })
    }
}

/// The player after `player_id` in registration order, wrapping around.
fn next_player(state: &GameState, player_id: PlayerId) -> PlayerId {
    let players = &state.registered_players;
    match players.iter().position(|&p| p == player_id) {
        Some(index) => players[(index + 1) % players.len()],
        None => players.first().copied().unwrap_or(UNASSIGNED),
    }
}
