//! Full-stack WebSocket flow against a real listener.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::net::{TcpListener, TcpStream},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

use {
    mingle_config::MingleConfig,
    mingle_gateway::{GatewayState, build_state, router},
    mingle_protocol::ChatPreference,
    mingle_storage::{UserRecord, UserRepository},
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_gateway() -> (SocketAddr, Arc<GatewayState>) {
    let mut config = MingleConfig::default();
    config.database.path = ":memory:".into();
    config.matchmaking.tick_interval_ms = 50;

    let state = build_state(config).await.unwrap();
    state.coordinator.start();

    let app = router(Arc::clone(&state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn add_user(state: &GatewayState, id: &str, interests: &[&str]) {
    state
        .store
        .create_user(&UserRecord {
            id: id.into(),
            username: id.into(),
            display_name: id.to_uppercase(),
            password_hash: "x".into(),
            interests: interests.iter().map(|s| s.to_string()).collect(),
            chat_preference: ChatPreference::Friendship,
            online: false,
            status: "offline".into(),
            last_active: 0,
            created_at: 0,
        })
        .await
        .unwrap();
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Read frames until one with the given `type`, skipping everything else.
async fn wait_for(ws: &mut Client, frame_type: &str) -> Value {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let msg = ws.next().await.expect("socket open").expect("read ok");
            let Message::Text(text) = msg else { continue };
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == frame_type {
                return value;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for '{frame_type}'"))
}

async fn connect_as(addr: SocketAddr, user_id: &str) -> Client {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    send(&mut ws, json!({ "type": "authenticate", "userId": user_id })).await;
    let hello = wait_for(&mut ws, "auth-ok").await;
    assert_eq!(hello["user"]["id"], user_id);
    ws
}

#[tokio::test]
async fn unknown_users_get_auth_error() {
    let (addr, _state) = spawn_gateway().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    send(&mut ws, json!({ "type": "authenticate", "userId": "ghost" })).await;
    let err = wait_for(&mut ws, "auth-error").await;
    assert!(err["reason"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn search_match_chat_and_hangup() {
    let (addr, state) = spawn_gateway().await;
    add_user(&state, "u1", &["music", "art"]).await;
    add_user(&state, "u2", &["art", "sports"]).await;

    let mut ws1 = connect_as(addr, "u1").await;
    let mut ws2 = connect_as(addr, "u2").await;

    send(&mut ws1, json!({ "type": "start-search" })).await;
    send(&mut ws2, json!({ "type": "start-search" })).await;

    let found1 = wait_for(&mut ws1, "match-found").await;
    let found2 = wait_for(&mut ws2, "match-found").await;
    assert_eq!(found1["matchId"], found2["matchId"]);
    assert_eq!(found1["partner"]["id"], "u2");
    assert_eq!(found2["partner"]["id"], "u1");
    let match_id = found1["matchId"].as_str().unwrap().to_string();

    send(&mut ws1, json!({ "type": "accept-match", "matchId": match_id })).await;
    send(&mut ws2, json!({ "type": "accept-match", "matchId": match_id })).await;

    let confirmed1 = wait_for(&mut ws1, "match-confirmed").await;
    let confirmed2 = wait_for(&mut ws2, "match-confirmed").await;
    assert_eq!(confirmed1["sessionId"], confirmed2["sessionId"]);
    let session_id = confirmed1["sessionId"].as_str().unwrap().to_string();

    // Typing indicator reaches only the peer.
    send(&mut ws2, json!({ "type": "typing", "sessionId": session_id })).await;
    let typing = wait_for(&mut ws1, "typing").await;
    assert_eq!(typing["userId"], "u2");

    // Messages fan out to both, in order.
    for content in ["hello", "how are you"] {
        send(
            &mut ws1,
            json!({ "type": "send-message", "sessionId": session_id, "content": content }),
        )
        .await;
    }
    for ws in [&mut ws1, &mut ws2] {
        let first = wait_for(ws, "new-message").await;
        assert_eq!(first["message"]["content"], "hello");
        let second = wait_for(ws, "new-message").await;
        assert_eq!(second["message"]["content"], "how are you");
    }

    // Read receipts go to the sender's side.
    send(&mut ws2, json!({ "type": "read-all", "sessionId": session_id })).await;
    let read = wait_for(&mut ws1, "read-all").await;
    assert_eq!(read["readerId"], "u2");

    // Hanging up ends the session for the peer.
    ws2.close(None).await.unwrap();
    let ended = wait_for(&mut ws1, "session-ended").await;
    assert_eq!(ended["sessionId"], session_id.as_str());
    assert_eq!(ended["by"], "u2");
}

#[tokio::test]
async fn rejection_is_delivered_to_the_peer() {
    let (addr, state) = spawn_gateway().await;
    add_user(&state, "u1", &["music"]).await;
    add_user(&state, "u2", &["music"]).await;

    let mut ws1 = connect_as(addr, "u1").await;
    let mut ws2 = connect_as(addr, "u2").await;
    send(&mut ws1, json!({ "type": "start-search" })).await;
    send(&mut ws2, json!({ "type": "start-search" })).await;

    let found = wait_for(&mut ws1, "match-found").await;
    let match_id = found["matchId"].as_str().unwrap().to_string();

    send(&mut ws1, json!({ "type": "reject-match", "matchId": match_id })).await;
    let rejected = wait_for(&mut ws2, "match-rejected").await;
    assert_eq!(rejected["matchId"], match_id.as_str());
}

#[tokio::test]
async fn errors_carry_stable_codes() {
    let (addr, state) = spawn_gateway().await;
    add_user(&state, "u1", &["music"]).await;
    let mut ws1 = connect_as(addr, "u1").await;

    // Messaging into a nonexistent session surfaces SESSION_NOT_FOUND.
    send(
        &mut ws1,
        json!({ "type": "send-message", "sessionId": "nope", "content": "hi" }),
    )
    .await;
    let err = wait_for(&mut ws1, "error").await;
    assert_eq!(err["code"], "SESSION_NOT_FOUND");

    // Accepting a ballot that never existed is an expired match.
    send(&mut ws1, json!({ "type": "accept-match", "matchId": "m-x" })).await;
    let err = wait_for(&mut ws1, "error").await;
    assert_eq!(err["code"], "MATCH_EXPIRED");
}
