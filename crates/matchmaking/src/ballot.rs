//! Two-party accept/reject ballots with a hard deadline.
//!
//! Decision rule: any reject is immediately terminal; acceptance requires
//! unanimity; an undecided ballot expires at its deadline. Votes are
//! idempotent, and a decided ballot is removed from the table exactly once —
//! the caller receives the removed ballot alongside the outcome and runs the
//! follow-up (session creation, notifications, status rollbacks).

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use mingle_protocol::ChatPreference;

/// One pending match between two users.
#[derive(Debug, Clone)]
pub struct Ballot {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub kind: ChatPreference,
    pub accepts: HashSet<String>,
    pub rejects: HashSet<String>,
    pub created_at: u64,
    pub deadline: u64,
}

impl Ballot {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user_a: impl Into<String>,
        user_b: impl Into<String>,
        kind: ChatPreference,
        created_at: u64,
        deadline: u64,
    ) -> Self {
        Self {
            id: id.into(),
            user_a: user_a.into(),
            user_b: user_b.into(),
            kind,
            accepts: HashSet::new(),
            rejects: HashSet::new(),
            created_at,
            deadline,
        }
    }

    #[must_use]
    pub fn participants(&self) -> [&str; 2] {
        [self.user_a.as_str(), self.user_b.as_str()]
    }

    #[must_use]
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    Accept,
    Reject,
}

/// What a vote did to the ballot.
#[derive(Debug)]
pub enum VoteOutcome {
    /// Vote recorded; the ballot is still open.
    Pending,
    /// Unanimous accept. The ballot has been removed.
    Accepted(Ballot),
    /// A reject was recorded. The ballot has been removed.
    Rejected(Ballot),
    /// The deadline had already passed. The ballot has been removed.
    Expired(Ballot),
    /// No such open ballot (already decided, expired, or never existed).
    NotFound,
    /// The voter is not one of the two participants.
    NotAParticipant,
}

/// All open ballots. Votes on one ballot are serialised; ballots are
/// independent of each other.
#[derive(Default)]
pub struct PendingMatchTable {
    inner: Mutex<HashMap<String, Ballot>>,
}

impl PendingMatchTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ballot: Ballot) {
        self.lock().insert(ballot.id.clone(), ballot);
    }

    #[must_use]
    pub fn get(&self, match_id: &str) -> Option<Ballot> {
        self.lock().get(match_id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The open ballot a user currently appears in, if any.
    #[must_use]
    pub fn ballot_for_user(&self, user_id: &str) -> Option<String> {
        self.lock()
            .values()
            .find(|b| b.has_participant(user_id))
            .map(|b| b.id.clone())
    }

    /// Record a vote at monotonic instant `now`.
    pub fn vote(&self, match_id: &str, user_id: &str, kind: VoteKind, now: u64) -> VoteOutcome {
        let mut ballots = self.lock();

        let Some(ballot) = ballots.get_mut(match_id) else {
            return VoteOutcome::NotFound;
        };
        if !ballot.has_participant(user_id) {
            return VoteOutcome::NotAParticipant;
        }
        if now > ballot.deadline {
            let ballot = ballots.remove(match_id).unwrap_or_else(|| unreachable!());
            return VoteOutcome::Expired(ballot);
        }

        match kind {
            VoteKind::Reject => {
                ballot.accepts.remove(user_id);
                ballot.rejects.insert(user_id.to_string());
                let ballot = ballots.remove(match_id).unwrap_or_else(|| unreachable!());
                VoteOutcome::Rejected(ballot)
            },
            VoteKind::Accept => {
                if ballot.rejects.contains(user_id) {
                    // A recorded reject would already have closed the ballot.
                    return VoteOutcome::Pending;
                }
                ballot.accepts.insert(user_id.to_string());
                if ballot.accepts.len() == 2 {
                    let ballot = ballots.remove(match_id).unwrap_or_else(|| unreachable!());
                    VoteOutcome::Accepted(ballot)
                } else {
                    VoteOutcome::Pending
                }
            },
        }
    }

    /// Remove and return every ballot whose deadline has been reached.
    #[must_use]
    pub fn take_expired(&self, now: u64) -> Vec<Ballot> {
        let mut ballots = self.lock();
        let expired: Vec<String> = ballots
            .values()
            .filter(|b| b.deadline <= now)
            .map(|b| b.id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| ballots.remove(&id))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Ballot>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
