use std::sync::Arc;

use {
    mingle_config::MingleConfig,
    mingle_matchmaking::Coordinator,
    mingle_sessions::SessionManager,
    mingle_storage::SqliteStore,
};

use crate::{auth::AuthService, registry::ConnectionRegistry, throttle::UserThrottle};

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    pub config: MingleConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub coordinator: Arc<Coordinator>,
    pub sessions: Arc<SessionManager>,
    pub store: Arc<SqliteStore>,
    pub auth: AuthService,
    pub throttle: UserThrottle,
}
