//! The coordinator: one object owning every matchmaking index.
//!
//! Handlers (WebSocket and HTTP) call into the coordinator; it drives the
//! status machine, the search pool, the matcher tick, and the ballots, and
//! pushes the resulting events through the injected sink. `start` spawns the
//! background tick and sweep tasks; dropping the coordinator (or calling
//! `stop`) cancels them.

use std::{
    sync::{Arc, Mutex as StdMutex, MutexGuard},
    time::Duration,
};

use {
    tokio::sync::{Mutex as AsyncMutex, Notify},
    tracing::{debug, info, warn},
};

use {
    mingle_common::{Clock, TimerHandle, unix_ms},
    mingle_protocol::{EventSink, PublicProfile, ServerFrame},
    mingle_sessions::SessionManager,
    mingle_storage::{SessionRecord, UserRepository},
};

use crate::{
    ballot::{Ballot, PendingMatchTable, VoteKind, VoteOutcome},
    error::{Error, Result},
    index::{BallotResolution, UserStateIndex},
    matcher,
    pool::{SearchEntry, SearchPool, normalize_interests},
    status::UserStatus,
};

/// Matchmaking cadence, from `match.*` config.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub tick_interval: Duration,
    pub ballot_ttl_ms: u64,
    /// How often due ballots are swept.
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(mingle_protocol::DEFAULT_TICK_INTERVAL_MS),
            ballot_ttl_ms: mingle_protocol::DEFAULT_BALLOT_TTL_MS,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    users: Arc<dyn UserRepository>,
    sessions: Arc<SessionManager>,
    sink: Arc<dyn EventSink>,
    index: UserStateIndex,
    pool: StdMutex<SearchPool>,
    ballots: PendingMatchTable,
    /// Wakes the tick loop early after `start-search`.
    kick: Notify,
    /// Ticks never overlap.
    tick_gate: AsyncMutex<()>,
    tasks: StdMutex<Vec<TimerHandle>>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
        users: Arc<dyn UserRepository>,
        sessions: Arc<SessionManager>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            users,
            sessions,
            sink,
            index: UserStateIndex::new(),
            pool: StdMutex::new(SearchPool::new()),
            ballots: PendingMatchTable::new(),
            kick: Notify::new(),
            tick_gate: AsyncMutex::new(()),
            tasks: StdMutex::new(Vec::new()),
        })
    }

    /// Spawn the matcher loop and the ballot sweeper. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            return;
        }

        let coord = Arc::clone(self);
        tasks.push(TimerHandle::spawn(async move {
            let mut interval = tokio::time::interval(coord.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {},
                    _ = coord.kick.notified() => {},
                }
                coord.tick().await;
            }
        }));

        let coord = Arc::clone(self);
        tasks.push(TimerHandle::recurring(
            self.config.sweep_interval,
            move || {
                let coord = Arc::clone(&coord);
                async move {
                    coord.expire_due_ballots().await;
                }
            },
        ));
        info!("coordinator started");
    }

    /// Cancel the background tasks.
    pub fn stop(&self) {
        lock(&self.tasks).clear();
        info!("coordinator stopped");
    }

    pub fn index(&self) -> &UserStateIndex {
        &self.index
    }

    #[must_use]
    pub fn status_of(&self, user_id: &str) -> UserStatus {
        self.index.status_of(user_id)
    }

    #[must_use]
    pub fn pool_contains(&self, user_id: &str) -> bool {
        lock(&self.pool).contains(user_id)
    }

    #[must_use]
    pub fn open_ballots(&self) -> usize {
        self.ballots.len()
    }

    // ── Connection-driven operations ─────────────────────────────────────

    /// Bring an externally-authenticated user online.
    pub async fn authenticate(&self, user_id: &str) -> Result<PublicProfile> {
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?;
        let profile = user.public_profile();

        self.index.connect(profile.clone());
        let status = self.index.status_of(user_id);
        self.users
            .update_presence(user_id, true, status.as_str(), unix_ms())
            .await?;
        info!(user_id, "user online");
        Ok(profile)
    }

    /// Enter the search pool and trigger an immediate matcher tick.
    pub async fn start_search(&self, user_id: &str) -> Result<()> {
        match self.index.status_of(user_id) {
            UserStatus::Searching => return Ok(()),
            UserStatus::Offline => return Err(Error::AuthRequired(user_id.to_string())),
            UserStatus::InChat => return Err(Error::AlreadyInSession(user_id.to_string())),
            UserStatus::Pending => {
                return Err(Error::InvalidState {
                    user_id: user_id.to_string(),
                    expected: UserStatus::Online,
                    actual: UserStatus::Pending,
                });
            },
            UserStatus::Online => {},
        }

        let profile = self
            .index
            .profile_of(user_id)
            .ok_or_else(|| Error::AuthRequired(user_id.to_string()))?;
        let blocked = self.users.blocked_ids_for(user_id).await?;

        self.index
            .transition(user_id, UserStatus::Online, UserStatus::Searching)?;
        let entry = SearchEntry {
            user_id: user_id.to_string(),
            interests: normalize_interests(&profile.interests),
            preference: profile.chat_preference,
            blocked,
            enqueued_at: self.clock.now_ms(),
        };
        if self.index.status_of(user_id) == UserStatus::Searching {
            lock(&self.pool).add(entry);
        }
        self.kick.notify_one();
        info!(user_id, "search started");
        Ok(())
    }

    /// Leave the search pool. Idempotent for users already back online.
    pub fn end_search(&self, user_id: &str) -> Result<()> {
        match self.index.status_of(user_id) {
            UserStatus::Online => Ok(()),
            UserStatus::Offline => Err(Error::AuthRequired(user_id.to_string())),
            UserStatus::Searching => {
                self.index
                    .transition(user_id, UserStatus::Searching, UserStatus::Online)?;
                lock(&self.pool).remove(user_id);
                info!(user_id, "search ended");
                Ok(())
            },
            actual => Err(Error::InvalidState {
                user_id: user_id.to_string(),
                expected: UserStatus::Searching,
                actual,
            }),
        }
    }

    pub async fn accept_match(&self, user_id: &str, match_id: &str) -> Result<()> {
        self.vote(user_id, match_id, VoteKind::Accept).await
    }

    pub async fn reject_match(&self, user_id: &str, match_id: &str) -> Result<()> {
        self.vote(user_id, match_id, VoteKind::Reject).await
    }

    /// Rejoin a session's subscriber set (after a reconnect).
    pub async fn join_session(&self, session_id: &str, user_id: &str) -> Result<()> {
        self.sessions.subscribe(session_id, user_id).await?;
        Ok(())
    }

    /// End an active chat: durable record, subscribers, and both statuses.
    pub async fn end_chat(&self, session_id: &str, actor_id: &str) -> Result<SessionRecord> {
        let record = self.sessions.end(session_id, actor_id).await?;
        for user_id in record.participants() {
            self.index.end_chat(user_id, session_id);
        }
        Ok(record)
    }

    /// Open a direct session outside the matchmaking flow (HTTP surface).
    pub async fn create_session(&self, actor_id: &str, target_id: &str) -> Result<SessionRecord> {
        let target = self
            .users
            .get_by_id(target_id)
            .await?
            .ok_or_else(|| Error::UnknownUser(target_id.to_string()))?;
        if self.users.blocked_between(actor_id, target_id).await? {
            return Err(Error::Session(mingle_sessions::Error::Blocked));
        }
        let session = self
            .sessions
            .open(actor_id, target_id, target.chat_preference)
            .await?;
        Ok(session)
    }

    /// Tear down a departing connection's state: searching users leave the
    /// pool, a pending user implicitly rejects, an in-chat user ends the
    /// session, and the final edge is `Online → Offline`.
    pub async fn disconnect(&self, user_id: &str) {
        match self.index.status_of(user_id) {
            UserStatus::Searching => {
                lock(&self.pool).remove(user_id);
                let _ = self
                    .index
                    .transition(user_id, UserStatus::Searching, UserStatus::Online);
            },
            UserStatus::Pending => {
                if let Some(match_id) = self.index.pending_match_of(user_id) {
                    debug!(user_id, match_id, "disconnect while pending, implicit reject");
                    match self.ballots.vote(
                        &match_id,
                        user_id,
                        VoteKind::Reject,
                        self.clock.now_ms(),
                    ) {
                        VoteOutcome::Rejected(ballot) => self.finalize_closed(ballot, false),
                        VoteOutcome::Expired(ballot) => self.finalize_closed(ballot, true),
                        _ => {},
                    }
                }
                // The ballot may have been decided concurrently; force the
                // exit from Pending either way.
                if self.index.status_of(user_id) == UserStatus::Pending {
                    let _ = self
                        .index
                        .transition(user_id, UserStatus::Pending, UserStatus::Online);
                }
            },
            UserStatus::InChat => {
                if let Some(session_id) = self.index.session_of(user_id)
                    && let Err(e) = self.end_chat(&session_id, user_id).await
                {
                    warn!(user_id, error = %e, "failed to end session on disconnect");
                }
            },
            UserStatus::Online | UserStatus::Offline => {},
        }

        if self.index.status_of(user_id) == UserStatus::Online {
            let _ = self
                .index
                .transition(user_id, UserStatus::Online, UserStatus::Offline);
        }
        self.index.remove(user_id);

        if let Err(e) = self
            .users
            .update_presence(user_id, false, UserStatus::Offline.as_str(), unix_ms())
            .await
        {
            warn!(user_id, error = %e, "failed to persist offline presence");
        }
        info!(user_id, "user offline");
    }

    // ── Matcher tick ─────────────────────────────────────────────────────

    /// One pass over the search pool. Ticks are serialised; errors affect at
    /// most the pair that raised them.
    pub async fn tick(&self) {
        let _gate = self.tick_gate.lock().await;

        let planned = {
            let pool = lock(&self.pool);
            matcher::plan(&pool)
        };
        if planned.is_empty() {
            return;
        }
        debug!(pairs = planned.len(), "matcher tick");

        for pm in planned {
            let match_id = mingle_common::new_id();
            if let Err(e) = self.index.begin_ballot(&pm.first, &pm.second, &match_id) {
                debug!(error = %e, first = %pm.first, second = %pm.second, "match handoff failed");
                // Drop pool entries whose users are no longer searching, so a
                // stale entry cannot shadow the pool forever.
                let stale: Vec<&String> = [&pm.first, &pm.second]
                    .into_iter()
                    .filter(|u| self.index.status_of(u) != UserStatus::Searching)
                    .collect();
                let mut pool = lock(&self.pool);
                for user_id in stale {
                    pool.remove(user_id);
                }
                continue;
            }

            {
                let mut pool = lock(&self.pool);
                pool.remove(&pm.first);
                pool.remove(&pm.second);
            }

            let now = self.clock.now_ms();
            self.ballots.insert(Ballot::new(
                &match_id,
                &pm.first,
                &pm.second,
                pm.kind,
                now,
                now + self.config.ballot_ttl_ms,
            ));
            info!(
                match_id,
                first = %pm.first,
                second = %pm.second,
                shared = pm.shared_interests,
                "match proposed"
            );

            for (me, peer) in [(&pm.first, &pm.second), (&pm.second, &pm.first)] {
                if let Some(partner) = self.index.profile_of(peer) {
                    self.sink.send(
                        me,
                        ServerFrame::MatchFound {
                            match_id: match_id.clone(),
                            partner,
                            prompt_user: true,
                        },
                    );
                }
            }
        }
    }

    /// Expire every ballot whose deadline has been reached.
    pub async fn expire_due_ballots(&self) {
        for ballot in self.ballots.take_expired(self.clock.now_ms()) {
            info!(match_id = %ballot.id, "ballot expired");
            self.finalize_closed(ballot, true);
        }
    }

    // ── Ballot resolution ────────────────────────────────────────────────

    async fn vote(&self, user_id: &str, match_id: &str, kind: VoteKind) -> Result<()> {
        match self
            .ballots
            .vote(match_id, user_id, kind, self.clock.now_ms())
        {
            VoteOutcome::Pending => Ok(()),
            VoteOutcome::NotFound => Err(Error::MatchExpired(match_id.to_string())),
            VoteOutcome::NotAParticipant => Err(Error::NotAParticipant {
                user_id: user_id.to_string(),
                match_id: match_id.to_string(),
            }),
            VoteOutcome::Accepted(ballot) => self.finalize_accepted(ballot).await,
            VoteOutcome::Rejected(ballot) => {
                self.finalize_closed(ballot, false);
                Ok(())
            },
            VoteOutcome::Expired(ballot) => {
                self.finalize_closed(ballot, true);
                Err(Error::MatchExpired(match_id.to_string()))
            },
        }
    }

    async fn finalize_accepted(&self, ballot: Ballot) -> Result<()> {
        match self
            .sessions
            .open(&ballot.user_a, &ballot.user_b, ballot.kind)
            .await
        {
            Ok(session) => {
                let moved = self.index.resolve_ballot(
                    [&ballot.user_a, &ballot.user_b],
                    &ballot.id,
                    &BallotResolution::InChat(session.id.clone()),
                );
                if moved.len() == 2 {
                    info!(match_id = %ballot.id, session_id = %session.id, "match confirmed");
                    for (me, peer) in [
                        (&ballot.user_a, &ballot.user_b),
                        (&ballot.user_b, &ballot.user_a),
                    ] {
                        if let Some(partner) = self.index.profile_of(peer) {
                            self.sink.send(
                                me,
                                ServerFrame::MatchConfirmed {
                                    session_id: session.id.clone(),
                                    partner,
                                },
                            );
                        }
                    }
                    return Ok(());
                }

                // A participant vanished between the decision and the status
                // handoff; undo the half-opened chat.
                warn!(match_id = %ballot.id, session_id = %session.id, "participant lost before chat opened");
                for user_id in &moved {
                    self.index.end_chat(user_id, &session.id);
                }
                let vanished = ballot
                    .participants()
                    .into_iter()
                    .find(|u| !moved.iter().any(|m| m.as_str() == *u))
                    .map(str::to_string);
                if let Some(actor) = vanished {
                    let _ = self.sessions.end(&session.id, &actor).await;
                }
                Ok(())
            },
            Err(e) => {
                warn!(match_id = %ballot.id, error = %e, "session creation failed, requeueing both users");
                let moved = self.index.resolve_ballot(
                    [&ballot.user_a, &ballot.user_b],
                    &ballot.id,
                    &BallotResolution::Searching,
                );
                for user_id in moved {
                    self.requeue(&user_id).await;
                }
                self.kick.notify_one();
                Err(e.into())
            },
        }
    }

    /// Rejected or expired: both users return to `Online` (those already
    /// offline are untouched) and each still-connected user hears about it.
    fn finalize_closed(&self, ballot: Ballot, expired: bool) {
        self.index.resolve_ballot(
            [&ballot.user_a, &ballot.user_b],
            &ballot.id,
            &BallotResolution::Online,
        );
        for user_id in ballot.participants() {
            let frame = if expired {
                ServerFrame::MatchExpired {
                    match_id: ballot.id.clone(),
                }
            } else {
                ServerFrame::MatchRejected {
                    match_id: ballot.id.clone(),
                }
            };
            self.sink.send(user_id, frame);
        }
    }

    /// Put a rolled-back user back into the pool with a fresh enqueue instant.
    async fn requeue(&self, user_id: &str) {
        let Some(profile) = self.index.profile_of(user_id) else {
            return;
        };
        let blocked = self
            .users
            .blocked_ids_for(user_id)
            .await
            .unwrap_or_default();
        let entry = SearchEntry {
            user_id: user_id.to_string(),
            interests: normalize_interests(&profile.interests),
            preference: profile.chat_preference,
            blocked,
            enqueued_at: self.clock.now_ms(),
        };
        if self.index.status_of(user_id) == UserStatus::Searching {
            lock(&self.pool).add(entry);
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
