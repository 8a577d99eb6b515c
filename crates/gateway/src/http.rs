//! REST surface: account management, chat history, blocking, and the thin
//! mirrors of the matchmaking operations.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::{FromRequestParts, Path, Query, State},
        http::{StatusCode, request::Parts},
        response::{IntoResponse, Response},
        routing::{get, post, put},
    },
    serde::Deserialize,
    serde_json::json,
};

use {
    mingle_matchmaking::normalize_interests,
    mingle_protocol::{ChatPreference, ErrorShape, error_codes},
    mingle_storage::{SessionFilter, UserRecord, UserRepository},
};

use crate::{auth::AuthError, state::GatewayState};

// ── Error mapping ────────────────────────────────────────────────────────────

/// An error as it leaves the HTTP surface: stable code, readable message,
/// matching status.
pub struct ApiError {
    status: StatusCode,
    shape: ErrorShape,
}

impl ApiError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: status_for(code),
            shape: ErrorShape::new(code, message),
        }
    }

    fn auth(message: impl Into<String>) -> Self {
        Self::new(error_codes::AUTH_REQUIRED, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(error_codes::SESSION_NOT_FOUND, message)
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        error_codes::AUTH_REQUIRED => StatusCode::UNAUTHORIZED,
        error_codes::NOT_A_PARTICIPANT => StatusCode::FORBIDDEN,
        error_codes::SESSION_NOT_FOUND => StatusCode::NOT_FOUND,
        error_codes::INVALID_CONTENT => StatusCode::BAD_REQUEST,
        error_codes::RATE_LIMITED => StatusCode::TOO_MANY_REQUESTS,
        error_codes::SESSION_NOT_ACTIVE
        | error_codes::ALREADY_IN_SESSION
        | error_codes::INVALID_STATE
        | error_codes::MATCH_EXPIRED => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.shape }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<mingle_matchmaking::Error> for ApiError {
    fn from(e: mingle_matchmaking::Error) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<mingle_sessions::Error> for ApiError {
    fn from(e: mingle_sessions::Error) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<mingle_storage::Error> for ApiError {
    fn from(e: mingle_storage::Error) -> Self {
        Self::new(error_codes::STORAGE_FAILURE, e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Bearer auth extractor ────────────────────────────────────────────────────

/// The user id behind the request's bearer token.
pub struct AuthedUser(pub String);

impl FromRequestParts<Arc<GatewayState>> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::auth("missing bearer token"))?;
        let user_id = state.auth.verify_token(token).await?;
        Ok(Self(user_id))
    }
}

// ── Routes ───────────────────────────────────────────────────────────────────

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/profile", put(update_profile))
        .route("/auth/chat-preference", put(update_chat_preference))
        .route("/chat", get(list_sessions))
        .route("/chat/start-search", post(start_search))
        .route("/chat/create-session", post(create_session))
        .route("/chat/block/{user_id}", post(block_user))
        .route("/chat/unblock/{user_id}", post(unblock_user))
        .route("/chat/{id}", get(get_session))
        .route("/chat/{id}/end", put(end_session))
        .route("/chat/{id}/archive", put(archive_session))
        .route("/chat/{id}/unarchive", put(unarchive_session))
        .route("/chat/{id}/messages", get(list_messages).post(post_message))
        .route("/chat/{id}/messages/search", get(search_messages))
        .route("/messages/{id}", put(edit_message).delete(delete_message))
        .route("/messages/{id}/reactions", post(add_reaction))
}

fn user_json(user: &UserRecord) -> serde_json::Value {
    json!({
        "id": user.id,
        "username": user.username,
        "displayName": user.display_name,
        "interests": user.interests,
        "chatPreference": user.chat_preference,
        "online": user.online,
        "status": user.status,
    })
}

// ── Auth handlers ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    username: String,
    password: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    interests: Vec<String>,
    chat_preference: ChatPreference,
}

async fn register(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Response> {
    let interests: Vec<String> = normalize_interests(&body.interests).into_iter().collect();
    let authed = state
        .auth
        .register(
            &body.username,
            &body.password,
            &body.display_name,
            interests,
            body.chat_preference,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "token": authed.token, "user": user_json(&authed.user) })),
    )
        .into_response())
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn login(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<LoginBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let authed = state.auth.login(&body.username, &body.password).await?;
    Ok(Json(
        json!({ "token": authed.token, "user": user_json(&authed.user) }),
    ))
}

async fn me(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
) -> ApiResult<Json<serde_json::Value>> {
    let user = state
        .store
        .get_by_id(&user_id)
        .await?
        .ok_or_else(|| ApiError::auth("account no longer exists"))?;
    Ok(Json(user_json(&user)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileBody {
    display_name: String,
    #[serde(default)]
    interests: Vec<String>,
}

async fn update_profile(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Json(body): Json<ProfileBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let interests: Vec<String> = normalize_interests(&body.interests).into_iter().collect();
    if interests.is_empty() {
        return Err(ApiError::new(
            error_codes::INVALID_CONTENT,
            "at least one interest is required",
        ));
    }
    state
        .store
        .update_profile(&user_id, body.display_name.trim(), &interests)
        .await?;
    let user = state
        .store
        .get_by_id(&user_id)
        .await?
        .ok_or_else(|| ApiError::auth("account no longer exists"))?;
    Ok(Json(user_json(&user)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreferenceBody {
    chat_preference: ChatPreference,
}

async fn update_chat_preference(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Json(body): Json<PreferenceBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .update_chat_preference(&user_id, body.chat_preference)
        .await?;
    Ok(Json(json!({ "chatPreference": body.chat_preference })))
}

// ── Chat handlers ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListQuery {
    archived: Option<bool>,
    active: Option<bool>,
}

async fn list_sessions(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let sessions = state
        .sessions
        .list_for_user(
            &user_id,
            SessionFilter {
                active: query.active,
                archived: query.archived,
            },
        )
        .await?;
    Ok(Json(json!({ "sessions": sessions })))
}

async fn get_session(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.get(&id, &user_id).await?;
    Ok(Json(json!({ "session": session })))
}

async fn end_session(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = state.coordinator.end_chat(&id, &user_id).await?;
    Ok(Json(json!({ "session": record.view() })))
}

async fn archive_session(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.set_archived(&id, &user_id, true).await?;
    Ok(Json(json!({ "session": session })))
}

async fn unarchive_session(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.set_archived(&id, &user_id, false).await?;
    Ok(Json(json!({ "session": session })))
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list_messages(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let messages = state
        .sessions
        .messages_page(
            &id,
            &user_id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(50),
        )
        .await?;
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Deserialize)]
struct MessageBody {
    content: String,
}

async fn post_message(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> ApiResult<Response> {
    let message = state
        .sessions
        .send_message(&id, &user_id, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))).into_response())
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

async fn search_messages(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let messages = state
        .sessions
        .search_messages(&id, &user_id, &query.q)
        .await?;
    Ok(Json(json!({ "messages": messages })))
}

async fn edit_message(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let message = state
        .sessions
        .edit_message(&id, &user_id, &body.content)
        .await?;
    Ok(Json(json!({ "message": message })))
}

async fn delete_message(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.sessions.delete_message(&id, &user_id).await?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionBody {
    session_id: String,
    emoji: String,
}

async fn add_reaction(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
    Json(body): Json<ReactionBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .sessions
        .add_reaction(&body.session_id, &id, &user_id, &body.emoji)
        .await?;
    Ok(Json(json!({ "reacted": true })))
}

// ── Matchmaking mirrors ──────────────────────────────────────────────────────

async fn start_search(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
) -> ApiResult<Json<serde_json::Value>> {
    state.coordinator.start_search(&user_id).await?;
    Ok(Json(json!({ "status": "searching" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    user_id: String,
}

async fn create_session(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<Response> {
    if body.user_id == user_id {
        return Err(ApiError::new(
            error_codes::INVALID_CONTENT,
            "cannot open a session with yourself",
        ));
    }
    let record = state.coordinator.create_session(&user_id, &body.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "session": record.view() })),
    )
        .into_response())
}

// ── Blocking ─────────────────────────────────────────────────────────────────

async fn block_user(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(target_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.get_by_id(&target_id).await?.is_none() {
        return Err(ApiError::not_found("no such user"));
    }
    state
        .store
        .block(&user_id, &target_id, mingle_common::unix_ms())
        .await?;
    Ok(Json(json!({ "blocked": target_id })))
}

async fn unblock_user(
    State(state): State<Arc<GatewayState>>,
    AuthedUser(user_id): AuthedUser,
    Path(target_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.unblock(&user_id, &target_id).await?;
    Ok(Json(json!({ "unblocked": target_id })))
}
