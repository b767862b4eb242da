//! The state WebSocket (§4.G): the one thing an authenticated Operator
//! actually streams. Couples the session gate, the Controller Connection's
//! subscription, the diff engine, and WebSocket liveness (ping/pong,
//! read/write deadlines) into a single handler.
//!
//! Permessage-deflate negotiation (best compression, per §4.G) is handled
//! transport-side by the underlying `tokio-tungstenite` implementation axum's
//! `ws` feature pulls in: it negotiates the extension automatically whenever
//! the Operator's client offers it, with no per-connection knob exposed by
//! [`WebSocketUpgrade`] to configure further.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use gateway_common::patch::diff;
use serde::Serialize;
use tokio::time::{interval, sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::session::SessionError;
use crate::AppState;

/// §4.G step 1: read deadline for the first frame (the session key).
const INITIAL_KEY_TIMEOUT: Duration = Duration::from_secs(5);
/// §4.G step 5: cadence of the gateway's liveness ping.
const PING_INTERVAL: Duration = Duration::from_secs(5);
/// §5: write deadline per send.
const WRITE_TIMEOUT: Duration = Duration::from_secs(3);
/// §5: read deadline, rearmed by every pong.
const READ_TIMEOUT: Duration = Duration::from_secs(3);
/// The rolling read deadline after the first ping: `ping + write + read`.
const ROLLING_READ_TIMEOUT: Duration =
	Duration::from_secs(PING_INTERVAL.as_secs() + WRITE_TIMEOUT.as_secs() + READ_TIMEOUT.as_secs());

const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INVALID_FRAME_PAYLOAD_DATA: u16 = 1007;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub async fn state_websocket(
	ws: WebSocketUpgrade,
	State(state): State<AppState>,
) -> impl IntoResponse {
	ws.on_upgrade(move |socket| run(socket, state))
}

async fn run(mut socket: WebSocket, state: AppState) {
	let key = match timeout(INITIAL_KEY_TIMEOUT, socket.recv()).await {
		Ok(Some(Ok(Message::Text(key)))) => key,
		_ => {
			close(socket, CLOSE_POLICY_VIOLATION, "authenticate-first").await;
			return;
		}
	};

	match state.sessions.enter_ws(&key) {
		Ok(()) => {}
		Err(SessionError::NoSession) => {
			close(socket, CLOSE_POLICY_VIOLATION, "authenticate-first").await;
			return;
		}
		Err(SessionError::KeyMismatch) => {
			close(socket, CLOSE_INVALID_FRAME_PAYLOAD_DATA, "invalid-session-key").await;
			return;
		}
		Err(SessionError::ActiveWebsocket) => {
			close(socket, CLOSE_POLICY_VIOLATION, "active-websocket").await;
			return;
		}
		Err(other) => {
			warn!(error = %other, "unexpected session error entering state websocket");
			close(socket, CLOSE_INTERNAL_ERROR, "internal-server-error").await;
			return;
		}
	}

	let result = serve(&mut socket, &state).await;
	state.sessions.leave_ws(&key);

	match result {
		Outcome::Clean => {
			let _ = socket.close().await;
		}
		Outcome::Close(code, reason) => close(socket, code, reason).await,
		Outcome::Abandon => {
			// The peer is already gone or broke protocol; nothing more to send.
		}
	}
}

enum Outcome {
	/// The Operator closed the connection; nothing more to send.
	Clean,
	/// Close with a semantic code and reason (§4.G), one of
	/// policy-violation, invalid-frame-payload-data or internal-server-error.
	Close(u16, &'static str),
	/// Abnormal closure (WS code 1006): by protocol, 1006 is never sent on
	/// the wire, so this drops the socket without a close frame — covers a
	/// failed write (ping or diff) and an elapsed read deadline alike.
	Abandon,
}

async fn serve(socket: &mut WebSocket, state: &AppState) -> Outcome {
	let conn = match state.pool.conn().await {
		Ok(conn) => conn,
		Err(err) => {
			warn!(error = %err, "no controller connection available for state websocket");
			return Outcome::Close(CLOSE_INTERNAL_ERROR, "internal-server-error");
		}
	};

	let (mut changes, _subscription) = conn.subscribe_state_changes();
	let mut last_sent = conn.state();
	if send_json(socket, &last_sent).await.is_err() {
		return Outcome::Abandon;
	}

	let mut closed = conn.closed();
	let mut errors = conn.errors();
	let mut ping_tick = interval(PING_INTERVAL);
	ping_tick.tick().await; // the first tick fires immediately; discard it.
	let mut read_deadline = Box::pin(sleep(ROLLING_READ_TIMEOUT));

	loop {
		tokio::select! {
			_ = closed.changed() => {
				debug!("controller connection closed while streaming state");
				return Outcome::Close(CLOSE_INTERNAL_ERROR, "internal-server-error");
			}

			err = recv_error(&mut errors) => {
				warn!(error = %err, "controller connection reported an error while streaming state");
				conn.close().await;
				return Outcome::Close(CLOSE_INTERNAL_ERROR, "internal-server-error");
			}

			incoming = socket.recv() => {
				match incoming {
					Some(Ok(Message::Pong(_))) => {
						read_deadline.as_mut().reset(Instant::now() + ROLLING_READ_TIMEOUT);
					}
					Some(Ok(Message::Close(_))) | None => {
						return Outcome::Clean;
					}
					Some(Ok(_)) | Some(Err(_)) => {
						return Outcome::Abandon;
					}
				}
			}

			_ = &mut read_deadline => {
				return Outcome::Abandon;
			}

			_ = changes.recv() => {
				let new_state = conn.state();
				if let Some(patch) = diff(Some(&last_sent), &new_state) {
					if timeout(WRITE_TIMEOUT, send_json(socket, &patch)).await.is_err() {
						return Outcome::Abandon;
					}
					last_sent = new_state;
				}
			}

			_ = ping_tick.tick() => {
				if timeout(WRITE_TIMEOUT, socket.send(Message::Ping(Vec::new()))).await.is_err() {
					return Outcome::Abandon;
				}
			}
		}
	}
}

/// Awaits the next error on `errors`, or never resolves if the receiver was
/// already taken by another reader (there is at most one Operator session at
/// a time, so this should not happen in practice).
async fn recv_error(
	errors: &mut Option<tokio::sync::mpsc::UnboundedReceiver<gateway_core::ConnectionError>>,
) -> gateway_core::ConnectionError {
	match errors {
		Some(rx) => rx.recv().await.unwrap_or(gateway_core::ConnectionError::Closed),
		None => std::future::pending().await,
	}
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
	let text = serde_json::to_string(value).map_err(axum::Error::new)?;
	socket.send(Message::Text(text)).await
}

async fn close(mut socket: WebSocket, code: u16, reason: &'static str) {
	let _ = socket
		.send(Message::Close(Some(CloseFrame {
			code,
			reason: reason.into(),
		})))
		.await;
}
