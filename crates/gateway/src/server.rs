//! Server assembly and startup.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{State, WebSocketUpgrade},
        response::Response,
        routing::get,
    },
    sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    tower_http::{cors::CorsLayer, trace::TraceLayer},
    tracing::info,
};

use {
    mingle_common::SystemClock,
    mingle_config::MingleConfig,
    mingle_matchmaking::{Coordinator, CoordinatorConfig},
    mingle_protocol::EventSink,
    mingle_sessions::{MessageLimits, SessionManager},
    mingle_storage::SqliteStore,
};

use crate::{
    auth::AuthService,
    http,
    registry::{ConnectionRegistry, RegistrySink},
    state::GatewayState,
    throttle::UserThrottle,
    ws,
};

/// Wire the full service stack over a fresh database pool.
pub async fn build_state(config: MingleConfig) -> anyhow::Result<Arc<GatewayState>> {
    let pool = if config.database.path == ":memory:" {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?
    } else {
        let options = SqliteConnectOptions::new()
            .filename(&config.database.path)
            .create_if_missing(true);
        SqlitePoolOptions::new().connect_with(options).await?
    };
    SqliteStore::init(&pool).await?;
    AuthService::init(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));

    let registry = Arc::new(ConnectionRegistry::new(config.conn.send_queue));
    let sink: Arc<dyn EventSink> = Arc::new(RegistrySink::new(Arc::clone(&registry)));

    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&sink),
        MessageLimits {
            max_content_bytes: config.msg.max_content_bytes,
            page_size_max: config.msg.page_size_max,
        },
    ));

    let coordinator = Coordinator::new(
        CoordinatorConfig {
            tick_interval: Duration::from_millis(config.matchmaking.tick_interval_ms),
            ballot_ttl_ms: config.matchmaking.ballot_ttl_ms,
            sweep_interval: Duration::from_secs(1),
        },
        Arc::new(SystemClock::new()),
        Arc::clone(&store) as _,
        Arc::clone(&sessions),
        Arc::clone(&sink),
    );

    let auth = AuthService::new(Arc::clone(&store) as _, pool);

    Ok(Arc::new(GatewayState {
        config,
        registry,
        coordinator,
        sessions,
        store,
        auth,
        throttle: UserThrottle::new(),
    }))
}

/// The full gateway router: `/ws` plus the REST surface.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .merge(http::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| ws::handle_connection(socket, state))
}

/// Start the gateway and serve until ctrl-c.
pub async fn run(config: MingleConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let state = build_state(config).await?;
    state.coordinator.start();

    let app = router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.coordinator.stop();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
