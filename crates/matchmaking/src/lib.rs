//! Matchmaking and session coordination.
//!
//! The [`Coordinator`] owns every in-memory index of the matchmaking flow:
//! the per-user status machine ([`index::UserStateIndex`]), the pool of
//! searching users ([`pool::SearchPool`]), the tick-driven pairing algorithm
//! ([`matcher`]), and the two-party accept/reject ballots
//! ([`ballot::PendingMatchTable`]). Clock, repositories, and the event sink
//! are injected, so tests construct one coordinator per scenario and drive
//! time by hand.

pub mod ballot;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod matcher;
pub mod pool;
pub mod status;

pub use {
    ballot::{Ballot, PendingMatchTable, VoteKind, VoteOutcome},
    coordinator::{Coordinator, CoordinatorConfig},
    error::{Error, Result},
    index::{StatusChange, UserStateIndex},
    pool::{SearchEntry, SearchPool, normalize_interests},
    status::UserStatus,
};
