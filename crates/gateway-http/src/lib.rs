//! The Operator-facing HTTP + WebSocket API (§4.F–§4.H): session management,
//! the streaming state WebSocket, and the mutating command/turtles
//! endpoints, all backed by a [`gateway_core::Pool`] of one shared
//! Controller Connection.

pub mod error;
pub mod routes;
pub mod session;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use gateway_core::Pool;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use session::SessionManager;

/// Shared state every Operator-facing handler closes over. Cheap to clone:
/// both fields are already `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
	pub pool: Arc<Pool>,
	pub sessions: Arc<SessionManager>,
}

/// Builds the `/api/v1/...` router (§6), with request tracing layered on top
/// the way every teacher binary does (`tower_http::trace::TraceLayer`).
pub fn router(state: AppState) -> Router {
	Router::new()
		.nest("/api/v1", routes::router())
		.with_state(state)
		.layer(TraceLayer::new_for_http())
}
