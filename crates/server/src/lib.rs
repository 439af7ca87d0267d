//! Turn arbitration server for the count-to-31 game.
//!
//! Players on different IPC transports race to submit moves; the
//! [`arbiter::TurnArbiter`] applies at most one of them per turn to the single
//! [`state_store::StateStore`], and the [`coordinator::Coordinator`] runs
//! every transport until the game ends.

pub mod adapters;
pub mod app_builder;
pub mod arbiter;
pub mod config;
pub mod coordinator;
pub mod endpoints;
pub mod publisher;
pub mod registry;
pub mod state_store;
