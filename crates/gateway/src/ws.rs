use std::{sync::Arc, time::Duration};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{
        SinkExt,
        stream::{SplitStream, StreamExt},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use mingle_protocol::{
    ClientFrame, ErrorShape, HANDSHAKE_TIMEOUT_MS, MAX_PAYLOAD_BYTES, ServerFrame, error_codes,
};

use crate::{
    state::GatewayState,
    throttle::{ThrottleDecision, ThrottleScope},
};

/// Handle a single WebSocket connection through its full lifecycle:
/// handshake (`authenticate` frame) → message loop → cleanup.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let conn = state.registry.attach();
    let conn_id = conn.conn_id.clone();
    info!(conn_id = %conn_id, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let cancel = CancellationToken::new();

    // Write loop: drains the bounded queue towards the socket, enforcing the
    // per-event delivery deadline. Exits (and cancels the reader) once the
    // queue closes or a send stalls.
    let write_cancel = cancel.clone();
    let write_queue = Arc::clone(&conn.queue);
    let send_timeout = Duration::from_millis(state.config.conn.send_timeout_ms);
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = write_queue.pop().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!(conn_id = %write_conn_id, error = %e, "ws: frame serialization failed");
                    continue;
                },
            };
            match tokio::time::timeout(send_timeout, ws_tx.send(Message::Text(json.into()))).await
            {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    debug!(conn_id = %write_conn_id, error = %e, "ws: write loop closed");
                    break;
                },
                Err(_) => {
                    warn!(conn_id = %write_conn_id, "ws: send timeout, closing connection");
                    break;
                },
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        write_cancel.cancel();
    });

    // ── Handshake phase ──────────────────────────────────────────────────

    let user_id = match tokio::time::timeout(
        Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        wait_for_authenticate(&mut ws_rx),
    )
    .await
    {
        Ok(Ok(user_id)) => user_id,
        Ok(Err(e)) => {
            warn!(conn_id = %conn_id, error = %e, "ws: handshake failed");
            conn.queue.push(ServerFrame::AuthError {
                reason: e.to_string(),
            });
            finish(&state, &conn_id, &cancel, write_handle).await;
            return;
        },
        Err(_) => {
            warn!(conn_id = %conn_id, "ws: handshake timeout");
            conn.queue.push(ServerFrame::AuthError {
                reason: "authentication timeout".into(),
            });
            finish(&state, &conn_id, &cancel, write_handle).await;
            return;
        },
    };

    match state.coordinator.authenticate(&user_id).await {
        Ok(profile) => {
            state.registry.authenticate(&conn_id, &user_id);
            conn.queue.push(ServerFrame::AuthOk { user: profile });
            info!(conn_id = %conn_id, user_id = %user_id, "ws: handshake complete");
        },
        Err(e) => {
            warn!(conn_id = %conn_id, user_id = %user_id, error = %e, "ws: auth failed");
            conn.queue.push(ServerFrame::AuthError {
                reason: e.to_string(),
            });
            finish(&state, &conn_id, &cancel, write_handle).await;
            return;
        },
    }

    // ── Message loop ─────────────────────────────────────────────────────

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let Some(msg) = msg else { break };

        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: payload too large");
            conn.queue.push(ServerFrame::error(
                error_codes::INVALID_CONTENT,
                "payload too large",
            ));
            continue;
        }

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                conn.queue
                    .push(ServerFrame::error(error_codes::INVALID_CONTENT, "invalid frame"));
                continue;
            },
        };

        if let Err(shape) = dispatch(&state, &user_id, frame).await {
            conn.queue
                .push(ServerFrame::error(shape.code, shape.message));
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    finish(&state, &conn_id, &cancel, write_handle).await;
    info!(conn_id = %conn_id, user_id = %user_id, "ws: connection closed");
}

/// Route one client frame to the right service.
async fn dispatch(
    state: &Arc<GatewayState>,
    user_id: &str,
    frame: ClientFrame,
) -> Result<(), ErrorShape> {
    match frame {
        // Already authenticated; a repeated frame is a no-op.
        ClientFrame::Authenticate { .. } => Ok(()),
        ClientFrame::StartSearch => {
            throttle_gate(state, user_id, ThrottleScope::Search)?;
            state
                .coordinator
                .start_search(user_id)
                .await
                .map_err(coordinator_shape)
        },
        ClientFrame::EndSearch => state.coordinator.end_search(user_id).map_err(coordinator_shape),
        ClientFrame::AcceptMatch { match_id } => state
            .coordinator
            .accept_match(user_id, &match_id)
            .await
            .map_err(coordinator_shape),
        ClientFrame::RejectMatch { match_id } => state
            .coordinator
            .reject_match(user_id, &match_id)
            .await
            .map_err(coordinator_shape),
        ClientFrame::SendMessage {
            session_id,
            content,
        } => {
            throttle_gate(state, user_id, ThrottleScope::Message)?;
            state
                .sessions
                .send_message(&session_id, user_id, &content)
                .await
                .map(drop)
                .map_err(session_shape)
        },
        ClientFrame::Typing { session_id } => state
            .sessions
            .typing(&session_id, user_id, false)
            .await
            .map_err(session_shape),
        ClientFrame::StopTyping { session_id } => state
            .sessions
            .typing(&session_id, user_id, true)
            .await
            .map_err(session_shape),
        ClientFrame::ReadAll { session_id } => state
            .sessions
            .read_all(&session_id, user_id)
            .await
            .map_err(session_shape),
        ClientFrame::JoinSession { session_id } => state
            .coordinator
            .join_session(&session_id, user_id)
            .await
            .map_err(coordinator_shape),
    }
}

fn throttle_gate(
    state: &Arc<GatewayState>,
    user_id: &str,
    scope: ThrottleScope,
) -> Result<(), ErrorShape> {
    match state.throttle.check(user_id, scope) {
        ThrottleDecision::Allowed => Ok(()),
        ThrottleDecision::Denied { retry_after } => Err(ErrorShape::new(
            error_codes::RATE_LIMITED,
            format!("rate limited, retry in {}s", retry_after.as_secs().max(1)),
        )),
    }
}

fn coordinator_shape(e: mingle_matchmaking::Error) -> ErrorShape {
    ErrorShape::new(e.code(), e.to_string())
}

fn session_shape(e: mingle_sessions::Error) -> ErrorShape {
    ErrorShape::new(e.code(), e.to_string())
}

/// Close the queue, detach from the registry, and drive the user offline if
/// this was their last connection.
async fn finish(
    state: &Arc<GatewayState>,
    conn_id: &str,
    cancel: &CancellationToken,
    write_handle: tokio::task::JoinHandle<()>,
) {
    if let Some((user_id, remaining)) = state.registry.detach(conn_id) {
        if remaining == 0 {
            state.coordinator.disconnect(&user_id).await;
        }
    }
    // Let the write loop flush anything still queued, then stop the reader.
    let _ = write_handle.await;
    cancel.cancel();
}

/// Wait for the first `authenticate` frame.
async fn wait_for_authenticate(rx: &mut SplitStream<WebSocket>) -> anyhow::Result<String> {
    while let Some(msg) = rx.next().await {
        let text = match msg? {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => anyhow::bail!("connection closed before authentication"),
            _ => continue,
        };

        let frame: ClientFrame = serde_json::from_str(&text)?;
        match frame {
            ClientFrame::Authenticate { user_id } => return Ok(user_id),
            _ => anyhow::bail!("first frame must be 'authenticate'"),
        }
    }
    anyhow::bail!("connection closed before authentication")
}
