//! Authoritative in-memory user status.
//!
//! All operations take the single internal lock, which serialises writers per
//! user (and across the two users of a ballot, which is what makes the
//! "one open ballot per user" invariant cheap to guarantee). Nothing suspends
//! while the lock is held. Every applied transition is emitted on a broadcast
//! channel for observers.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use {tokio::sync::broadcast, tracing::debug};

use mingle_protocol::PublicProfile;

use crate::{
    error::{Error, Result},
    status::UserStatus,
};

/// An applied status transition.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub user_id: String,
    pub from: UserStatus,
    pub to: UserStatus,
}

#[derive(Debug, Clone)]
struct UserEntry {
    profile: PublicProfile,
    status: UserStatus,
    session_id: Option<String>,
    pending_match_id: Option<String>,
}

/// Where the two users of a decided ballot end up.
#[derive(Debug, Clone)]
pub enum BallotResolution {
    /// Unanimous accept: into the given session.
    InChat(String),
    /// Reject or expiry.
    Online,
    /// Compensation for a failed session-creation write.
    Searching,
}

pub struct UserStateIndex {
    inner: Mutex<HashMap<String, UserEntry>>,
    events: broadcast::Sender<StatusChange>,
}

impl Default for UserStateIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStateIndex {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Observe applied transitions. Slow observers miss events rather than
    /// blocking writers.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }

    /// Register (or refresh) a user and move them `Offline → Online` if they
    /// were not already connected. Idempotent for additional connections.
    pub fn connect(&self, profile: PublicProfile) {
        let mut inner = self.lock();
        let user_id = profile.id.clone();
        let entry = inner.entry(user_id.clone()).or_insert_with(|| UserEntry {
            profile: profile.clone(),
            status: UserStatus::Offline,
            session_id: None,
            pending_match_id: None,
        });
        entry.profile = profile;
        if entry.status == UserStatus::Offline {
            entry.status = UserStatus::Online;
            drop(inner);
            self.emit(&user_id, UserStatus::Offline, UserStatus::Online);
        }
    }

    #[must_use]
    pub fn status_of(&self, user_id: &str) -> UserStatus {
        self.lock()
            .get(user_id)
            .map_or(UserStatus::Offline, |e| e.status)
    }

    #[must_use]
    pub fn profile_of(&self, user_id: &str) -> Option<PublicProfile> {
        self.lock().get(user_id).map(|e| e.profile.clone())
    }

    #[must_use]
    pub fn session_of(&self, user_id: &str) -> Option<String> {
        self.lock().get(user_id).and_then(|e| e.session_id.clone())
    }

    #[must_use]
    pub fn pending_match_of(&self, user_id: &str) -> Option<String> {
        self.lock()
            .get(user_id)
            .and_then(|e| e.pending_match_id.clone())
    }

    /// Apply `from → to` for one user. Fails with the observed state if the
    /// user is elsewhere in the machine or the edge is illegal.
    pub fn transition(&self, user_id: &str, from: UserStatus, to: UserStatus) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner
            .get_mut(user_id)
            .ok_or_else(|| Error::AuthRequired(user_id.to_string()))?;
        if entry.status != from || !from.can_transition_to(to) {
            return Err(Error::InvalidState {
                user_id: user_id.to_string(),
                expected: from,
                actual: entry.status,
            });
        }
        entry.status = to;
        drop(inner);
        self.emit(user_id, from, to);
        Ok(())
    }

    /// Atomically move both users `Searching → Pending` and bind them to the
    /// ballot. Either both move or neither does.
    pub fn begin_ballot(&self, user_a: &str, user_b: &str, match_id: &str) -> Result<()> {
        let mut inner = self.lock();

        for user_id in [user_a, user_b] {
            let entry = inner
                .get(user_id)
                .ok_or_else(|| Error::AuthRequired(user_id.to_string()))?;
            if entry.status != UserStatus::Searching || entry.pending_match_id.is_some() {
                return Err(Error::InvalidState {
                    user_id: user_id.to_string(),
                    expected: UserStatus::Searching,
                    actual: entry.status,
                });
            }
        }

        for user_id in [user_a, user_b] {
            if let Some(entry) = inner.get_mut(user_id) {
                entry.status = UserStatus::Pending;
                entry.pending_match_id = Some(match_id.to_string());
            }
        }
        drop(inner);
        self.emit(user_a, UserStatus::Searching, UserStatus::Pending);
        self.emit(user_b, UserStatus::Searching, UserStatus::Pending);
        Ok(())
    }

    /// Move the users of a decided ballot to their next state. Users that are
    /// no longer `Pending` on this ballot (e.g. they disconnected) are left
    /// untouched. Returns the ids that actually moved.
    pub fn resolve_ballot(
        &self,
        users: [&str; 2],
        match_id: &str,
        resolution: &BallotResolution,
    ) -> Vec<String> {
        let to = match resolution {
            BallotResolution::InChat(_) => UserStatus::InChat,
            BallotResolution::Online => UserStatus::Online,
            BallotResolution::Searching => UserStatus::Searching,
        };

        let mut inner = self.lock();
        let mut moved = Vec::new();
        for user_id in users {
            let Some(entry) = inner.get_mut(user_id) else {
                continue;
            };
            if entry.status != UserStatus::Pending
                || entry.pending_match_id.as_deref() != Some(match_id)
            {
                continue;
            }
            entry.pending_match_id = None;
            entry.status = to;
            if let BallotResolution::InChat(session_id) = resolution {
                entry.session_id = Some(session_id.clone());
            }
            moved.push(user_id.to_string());
        }
        drop(inner);
        for user_id in &moved {
            self.emit(user_id, UserStatus::Pending, to);
        }
        moved
    }

    /// Leave a chat: `InChat → Online` and clear the session binding, but
    /// only if the user is actually in `session_id`. Returns whether the
    /// transition was applied.
    pub fn end_chat(&self, user_id: &str, session_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.get_mut(user_id) else {
            return false;
        };
        if entry.status != UserStatus::InChat || entry.session_id.as_deref() != Some(session_id) {
            return false;
        }
        entry.status = UserStatus::Online;
        entry.session_id = None;
        drop(inner);
        self.emit(user_id, UserStatus::InChat, UserStatus::Online);
        true
    }

    /// Drop a user entirely (final `Offline` cleanup on disconnect).
    pub fn remove(&self, user_id: &str) {
        self.lock().remove(user_id);
    }

    fn emit(&self, user_id: &str, from: UserStatus, to: UserStatus) {
        debug!(user_id, %from, %to, "status transition");
        let _ = self.events.send(StatusChange {
            user_id: user_id.to_string(),
            from,
            to,
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserEntry>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use mingle_protocol::ChatPreference;

    use super::*;

    fn profile(id: &str) -> PublicProfile {
        PublicProfile {
            id: id.into(),
            display_name: id.to_uppercase(),
            interests: vec!["music".into()],
            chat_preference: ChatPreference::Friendship,
        }
    }

    fn index_with(users: &[&str]) -> UserStateIndex {
        let index = UserStateIndex::new();
        for u in users {
            index.connect(profile(u));
        }
        index
    }

    #[test]
    fn connect_brings_users_online_once() {
        let index = index_with(&["u1"]);
        assert_eq!(index.status_of("u1"), UserStatus::Online);

        // A second connection does not re-transition.
        let mut events = index.subscribe();
        index.connect(profile("u1"));
        assert_eq!(index.status_of("u1"), UserStatus::Online);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn stale_transitions_are_rejected() {
        let index = index_with(&["u1"]);
        let err = index
            .transition("u1", UserStatus::Searching, UserStatus::Online)
            .unwrap_err();
        match err {
            Error::InvalidState { actual, .. } => assert_eq!(actual, UserStatus::Online),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn illegal_edges_are_rejected_even_when_current() {
        let index = index_with(&["u1"]);
        assert!(
            index
                .transition("u1", UserStatus::Online, UserStatus::InChat)
                .is_err()
        );
    }

    #[test]
    fn begin_ballot_is_all_or_nothing() {
        let index = index_with(&["u1", "u2"]);
        index
            .transition("u1", UserStatus::Online, UserStatus::Searching)
            .unwrap();

        // u2 is still Online, so the ballot must not start — and u1 must stay
        // Searching.
        assert!(index.begin_ballot("u1", "u2", "m1").is_err());
        assert_eq!(index.status_of("u1"), UserStatus::Searching);
        assert!(index.pending_match_of("u1").is_none());
    }

    #[test]
    fn one_open_ballot_per_user() {
        let index = index_with(&["u1", "u2", "u3"]);
        for u in ["u1", "u2", "u3"] {
            index
                .transition(u, UserStatus::Online, UserStatus::Searching)
                .unwrap();
        }

        assert!(index.begin_ballot("u1", "u2", "m1").is_ok());
        // u2 is already bound to m1.
        assert!(index.begin_ballot("u3", "u2", "m2").is_err());
        assert_eq!(index.status_of("u3"), UserStatus::Searching);
    }

    #[test]
    fn resolve_ballot_moves_only_bound_users() {
        let index = index_with(&["u1", "u2"]);
        for u in ["u1", "u2"] {
            index
                .transition(u, UserStatus::Online, UserStatus::Searching)
                .unwrap();
        }
        assert!(index.begin_ballot("u1", "u2", "m1").is_ok());

        let moved = index.resolve_ballot(
            ["u1", "u2"],
            "m1",
            &BallotResolution::InChat("s1".into()),
        );
        assert_eq!(moved.len(), 2);
        assert_eq!(index.status_of("u1"), UserStatus::InChat);
        assert_eq!(index.session_of("u2").as_deref(), Some("s1"));

        // Resolving again is a no-op.
        let moved = index.resolve_ballot(["u1", "u2"], "m1", &BallotResolution::Online);
        assert!(moved.is_empty());
    }

    #[test]
    fn end_chat_requires_the_matching_session() {
        let index = index_with(&["u1", "u2"]);
        for u in ["u1", "u2"] {
            index
                .transition(u, UserStatus::Online, UserStatus::Searching)
                .unwrap();
        }
        assert!(index.begin_ballot("u1", "u2", "m1").is_ok());
        index.resolve_ballot(["u1", "u2"], "m1", &BallotResolution::InChat("s1".into()));

        assert!(!index.end_chat("u1", "someone-elses-session"));
        assert!(index.end_chat("u1", "s1"));
        assert_eq!(index.status_of("u1"), UserStatus::Online);
        assert!(index.session_of("u1").is_none());
    }

    #[test]
    fn transitions_are_observable() {
        let index = UserStateIndex::new();
        let mut events = index.subscribe();
        index.connect(profile("u1"));
        index
            .transition("u1", UserStatus::Online, UserStatus::Searching)
            .unwrap();

        let first = events.try_recv().ok();
        let second = events.try_recv().ok();
        assert!(matches!(
            first,
            Some(StatusChange {
                from: UserStatus::Offline,
                to: UserStatus::Online,
                ..
            })
        ));
        assert!(matches!(
            second,
            Some(StatusChange {
                from: UserStatus::Online,
                to: UserStatus::Searching,
                ..
            })
        ));
    }
}
