//! HTTP/WebSocket gateway.
//!
//! Wires the coordinator, session manager, and storage behind an axum server:
//! `/ws` carries the realtime protocol from `mingle-protocol`, the REST
//! routes in [`http`] cover account management and chat history, and
//! [`registry`] owns the per-connection bounded send queues that back the
//! event sink.

pub mod auth;
pub mod http;
pub mod registry;
pub mod server;
pub mod state;
pub mod throttle;
pub mod ws;

pub use {
    registry::{ConnectionRegistry, RegistrySink},
    server::{build_state, router, run},
    state::GatewayState,
};
