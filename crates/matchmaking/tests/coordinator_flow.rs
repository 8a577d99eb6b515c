//! End-to-end coordinator scenarios with a hand-driven clock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use sqlx::SqlitePool;

use {
    mingle_common::{Clock, ManualClock},
    mingle_matchmaking::{Coordinator, CoordinatorConfig, UserStatus},
    mingle_protocol::{ChatPreference, EventSink, ServerFrame},
    mingle_sessions::{MessageLimits, SessionManager},
    mingle_storage::{SessionRepository, SqliteStore, UserRecord, UserRepository},
};

#[derive(Default)]
struct CollectingSink {
    frames: Mutex<Vec<(String, ServerFrame)>>,
}

impl CollectingSink {
    fn frames_for(&self, user_id: &str) -> Vec<ServerFrame> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, f)| f.clone())
            .collect()
    }

    fn match_id_for(&self, user_id: &str) -> Option<String> {
        self.frames_for(user_id).into_iter().find_map(|f| match f {
            ServerFrame::MatchFound { match_id, .. } => Some(match_id),
            _ => None,
        })
    }
}

impl EventSink for CollectingSink {
    fn send(&self, user_id: &str, frame: ServerFrame) {
        self.frames
            .lock()
            .unwrap()
            .push((user_id.to_string(), frame));
    }

    fn send_all(&self, user_id: &str, frame: ServerFrame) {
        self.send(user_id, frame);
    }
}

struct Harness {
    coordinator: Arc<Coordinator>,
    manager: Arc<SessionManager>,
    sink: Arc<CollectingSink>,
    clock: Arc<ManualClock>,
    store: Arc<SqliteStore>,
}

async fn harness() -> Harness {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    SqliteStore::init(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    let sink = Arc::new(CollectingSink::default());
    let clock = Arc::new(ManualClock::new());

    let manager = Arc::new(SessionManager::new(
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&sink) as _,
        MessageLimits::default(),
    ));
    let coordinator = Coordinator::new(
        CoordinatorConfig {
            tick_interval: Duration::from_secs(3),
            ballot_ttl_ms: 120_000,
            sweep_interval: Duration::from_secs(1),
        },
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&store) as _,
        Arc::clone(&manager),
        Arc::clone(&sink) as _,
    );

    Harness {
        coordinator,
        manager,
        sink,
        clock,
        store,
    }
}

async fn add_user(store: &SqliteStore, id: &str, interests: &[&str], pref: ChatPreference) {
    store
        .create_user(&UserRecord {
            id: id.into(),
            username: id.into(),
            display_name: id.to_uppercase(),
            password_hash: "x".into(),
            interests: interests.iter().map(|s| s.to_string()).collect(),
            chat_preference: pref,
            online: false,
            status: "offline".into(),
            last_active: 0,
            created_at: 0,
        })
        .await
        .unwrap();
}

/// Authenticate and start searching at the current manual-clock instant.
async fn search(h: &Harness, user_id: &str) {
    h.coordinator.authenticate(user_id).await.unwrap();
    h.coordinator.start_search(user_id).await.unwrap();
}

async fn matched_pair(h: &Harness) -> String {
    add_user(&h.store, "u1", &["music", "art"], ChatPreference::Friendship).await;
    add_user(&h.store, "u2", &["art", "sports"], ChatPreference::Friendship).await;
    search(h, "u1").await;
    h.clock.advance(1_000);
    search(h, "u2").await;
    h.clock.set(3_000);
    h.coordinator.tick().await;
    h.sink.match_id_for("u1").expect("match proposed")
}

#[tokio::test]
async fn happy_path_confirms_a_friendship_session() {
    let h = harness().await;
    let match_id = matched_pair(&h).await;

    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Pending);
    assert_eq!(h.coordinator.status_of("u2"), UserStatus::Pending);
    assert_eq!(h.sink.match_id_for("u2").as_deref(), Some(match_id.as_str()));

    h.clock.set(4_000);
    h.coordinator.accept_match("u1", &match_id).await.unwrap();
    h.clock.set(5_000);
    h.coordinator.accept_match("u2", &match_id).await.unwrap();

    assert_eq!(h.coordinator.status_of("u1"), UserStatus::InChat);
    assert_eq!(h.coordinator.status_of("u2"), UserStatus::InChat);

    let session = h
        .store
        .find_active_between("u1", "u2")
        .await
        .unwrap()
        .expect("session exists");
    assert_eq!(session.kind, ChatPreference::Friendship);

    for user in ["u1", "u2"] {
        let confirmed = h.sink.frames_for(user).into_iter().find_map(|f| match f {
            ServerFrame::MatchConfirmed {
                session_id,
                partner,
            } => Some((session_id, partner.id)),
            _ => None,
        });
        let (session_id, partner) = confirmed.expect("match-confirmed delivered");
        assert_eq!(session_id, session.id);
        assert_ne!(partner, user);
    }
}

#[tokio::test]
async fn preference_mismatch_never_matches() {
    let h = harness().await;
    add_user(&h.store, "u1", &["music", "art"], ChatPreference::Friendship).await;
    add_user(&h.store, "u3", &["music"], ChatPreference::Dating).await;
    search(&h, "u1").await;
    search(&h, "u3").await;

    for t in [3_000, 6_000, 9_000] {
        h.clock.set(t);
        h.coordinator.tick().await;
    }

    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Searching);
    assert_eq!(h.coordinator.status_of("u3"), UserStatus::Searching);
    assert_eq!(h.coordinator.open_ballots(), 0);
    assert!(h.sink.match_id_for("u1").is_none());
}

#[tokio::test]
async fn disjoint_interests_never_match() {
    let h = harness().await;
    add_user(&h.store, "u1", &["music"], ChatPreference::Friendship).await;
    add_user(&h.store, "u4", &["cooking"], ChatPreference::Friendship).await;
    search(&h, "u1").await;
    search(&h, "u4").await;

    h.clock.set(3_000);
    h.coordinator.tick().await;

    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Searching);
    assert_eq!(h.coordinator.status_of("u4"), UserStatus::Searching);
    assert_eq!(h.coordinator.open_ballots(), 0);
}

#[tokio::test]
async fn one_reject_closes_the_ballot_for_both() {
    let h = harness().await;
    let match_id = matched_pair(&h).await;

    h.clock.set(4_000);
    h.coordinator.reject_match("u1", &match_id).await.unwrap();

    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Online);
    assert_eq!(h.coordinator.status_of("u2"), UserStatus::Online);
    assert_eq!(h.coordinator.open_ballots(), 0);
    assert!(
        h.sink
            .frames_for("u2")
            .iter()
            .any(|f| matches!(f, ServerFrame::MatchRejected { .. }))
    );

    // A late accept from the other user sees an expired match.
    let err = h
        .coordinator
        .accept_match("u2", &match_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MATCH_EXPIRED");
}

#[tokio::test]
async fn undecided_ballots_expire_at_the_deadline() {
    let h = harness().await;
    let _match_id = matched_pair(&h).await;

    // One instant before the deadline nothing happens.
    h.clock.set(3_000 + 119_999);
    h.coordinator.expire_due_ballots().await;
    assert_eq!(h.coordinator.open_ballots(), 1);

    h.clock.set(3_000 + 120_000);
    h.coordinator.expire_due_ballots().await;

    assert_eq!(h.coordinator.open_ballots(), 0);
    for user in ["u1", "u2"] {
        assert_eq!(h.coordinator.status_of(user), UserStatus::Online);
        assert!(
            h.sink
                .frames_for(user)
                .iter()
                .any(|f| matches!(f, ServerFrame::MatchExpired { .. })),
            "{user} should hear about the expiry"
        );
    }
}

#[tokio::test]
async fn message_fan_out_preserves_order_for_both() {
    let h = harness().await;
    let match_id = matched_pair(&h).await;
    h.coordinator.accept_match("u1", &match_id).await.unwrap();
    h.coordinator.accept_match("u2", &match_id).await.unwrap();
    let session = h
        .store
        .find_active_between("u1", "u2")
        .await
        .unwrap()
        .unwrap();

    for content in ["m1", "m2", "m3"] {
        h.manager
            .send_message(&session.id, "u1", content)
            .await
            .unwrap();
    }

    for user in ["u1", "u2"] {
        let delivered: Vec<String> = h
            .sink
            .frames_for(user)
            .into_iter()
            .filter_map(|f| match f {
                ServerFrame::NewMessage { message, .. } => Some(message.content),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, vec!["m1", "m2", "m3"], "order for {user}");
    }

    // Persisted order matches as well.
    let page = h
        .manager
        .messages_page(&session.id, "u1", 1, 10)
        .await
        .unwrap();
    let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m1", "m2", "m3"]);
    assert!(page.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
async fn repeated_votes_are_idempotent() {
    let h = harness().await;
    let match_id = matched_pair(&h).await;

    h.coordinator.accept_match("u1", &match_id).await.unwrap();
    h.coordinator.accept_match("u1", &match_id).await.unwrap();
    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Pending);

    h.coordinator.accept_match("u2", &match_id).await.unwrap();
    assert_eq!(h.coordinator.status_of("u1"), UserStatus::InChat);
}

#[tokio::test]
async fn disconnect_while_pending_is_an_implicit_reject() {
    let h = harness().await;
    let _match_id = matched_pair(&h).await;

    h.coordinator.disconnect("u1").await;

    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Offline);
    assert_eq!(h.coordinator.status_of("u2"), UserStatus::Online);
    assert_eq!(h.coordinator.open_ballots(), 0);
    assert!(
        h.sink
            .frames_for("u2")
            .iter()
            .any(|f| matches!(f, ServerFrame::MatchRejected { .. }))
    );

    let record = h.store.get_by_id("u1").await.unwrap().unwrap();
    assert!(!record.online);
    assert_eq!(record.status, "offline");
}

#[tokio::test]
async fn disconnect_while_in_chat_ends_the_session() {
    let h = harness().await;
    let match_id = matched_pair(&h).await;
    h.coordinator.accept_match("u1", &match_id).await.unwrap();
    h.coordinator.accept_match("u2", &match_id).await.unwrap();
    let session = h
        .store
        .find_active_between("u1", "u2")
        .await
        .unwrap()
        .unwrap();

    h.coordinator.disconnect("u2").await;

    assert_eq!(h.coordinator.status_of("u2"), UserStatus::Offline);
    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Online);
    let record = h.store.get_session(&session.id).await.unwrap().unwrap();
    assert!(!record.active);
    assert!(
        h.sink
            .frames_for("u1")
            .iter()
            .any(|f| matches!(f, ServerFrame::SessionEnded { by, .. } if by == "u2"))
    );
}

#[tokio::test]
async fn searching_status_tracks_pool_membership() {
    let h = harness().await;
    add_user(&h.store, "u1", &["music"], ChatPreference::Friendship).await;
    h.coordinator.authenticate("u1").await.unwrap();
    assert!(!h.coordinator.pool_contains("u1"));

    h.coordinator.start_search("u1").await.unwrap();
    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Searching);
    assert!(h.coordinator.pool_contains("u1"));

    // start-search again is a no-op, not a duplicate entry.
    h.coordinator.start_search("u1").await.unwrap();
    assert!(h.coordinator.pool_contains("u1"));

    h.coordinator.end_search("u1").unwrap();
    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Online);
    assert!(!h.coordinator.pool_contains("u1"));
}

#[tokio::test]
async fn pending_users_leave_the_pool_and_cannot_search_again() {
    let h = harness().await;
    let _match_id = matched_pair(&h).await;

    assert!(!h.coordinator.pool_contains("u1"));
    assert!(!h.coordinator.pool_contains("u2"));

    let err = h.coordinator.start_search("u1").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
}

#[tokio::test]
async fn in_chat_users_must_end_before_searching() {
    let h = harness().await;
    let match_id = matched_pair(&h).await;
    h.coordinator.accept_match("u1", &match_id).await.unwrap();
    h.coordinator.accept_match("u2", &match_id).await.unwrap();

    let err = h.coordinator.start_search("u1").await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_IN_SESSION");

    let session = h
        .store
        .find_active_between("u1", "u2")
        .await
        .unwrap()
        .unwrap();
    h.coordinator.end_chat(&session.id, "u1").await.unwrap();
    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Online);
    assert_eq!(h.coordinator.status_of("u2"), UserStatus::Online);
    h.coordinator.start_search("u1").await.unwrap();
}

#[tokio::test]
async fn blocked_users_are_never_proposed() {
    let h = harness().await;
    add_user(&h.store, "u1", &["music"], ChatPreference::Friendship).await;
    add_user(&h.store, "u2", &["music"], ChatPreference::Friendship).await;
    h.store.block("u1", "u2", 0).await.unwrap();

    search(&h, "u1").await;
    search(&h, "u2").await;
    h.clock.set(3_000);
    h.coordinator.tick().await;

    assert_eq!(h.coordinator.open_ballots(), 0);
    assert_eq!(h.coordinator.status_of("u1"), UserStatus::Searching);
}

#[tokio::test]
async fn storage_failure_on_accept_requeues_both_users() {
    let h = harness().await;
    let match_id = matched_pair(&h).await;

    // Break the sessions table so session creation fails.
    sqlx::query("DROP TABLE sessions")
        .execute(h.store.pool())
        .await
        .unwrap();

    h.coordinator.accept_match("u1", &match_id).await.unwrap();
    let err = h
        .coordinator
        .accept_match("u2", &match_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORAGE_FAILURE");

    for user in ["u1", "u2"] {
        assert_eq!(h.coordinator.status_of(user), UserStatus::Searching);
        assert!(h.coordinator.pool_contains(user));
    }
    assert_eq!(h.coordinator.open_ballots(), 0);
}

#[tokio::test]
async fn background_loop_pairs_without_manual_ticks() {
    let h = harness().await;
    add_user(&h.store, "u1", &["music"], ChatPreference::Friendship).await;
    add_user(&h.store, "u2", &["music"], ChatPreference::Friendship).await;
    search(&h, "u1").await;
    search(&h, "u2").await;

    h.coordinator.start();
    // start-search kicks the loop, so a short real-time wait is enough even
    // though the interval is 3s.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if h.coordinator.open_ballots() == 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "matcher loop never proposed the pair"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    h.coordinator.stop();
}
