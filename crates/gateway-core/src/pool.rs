//! The single-slot, lazily-reconnecting Connection Pool (§4.E).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::conn::ControllerConnection;
use crate::error::ConnectionError;

/// Fixed reconnect-retry interval used by [`spawn_reconnect_supervisor`].
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub type ConnectFuture =
	Pin<Box<dyn Future<Output = Result<ControllerConnection, ConnectionError>> + Send>>;

/// A single-slot cache of a [`ControllerConnection`], built by a
/// caller-supplied factory. There is exactly one Controller, so there is no
/// benefit to pooling more than one live connection at a time.
pub struct Pool {
	connect: Box<dyn Fn() -> ConnectFuture + Send + Sync>,
	slot: Mutex<Option<ControllerConnection>>,
}

impl Pool {
	pub fn new(connect: impl Fn() -> ConnectFuture + Send + Sync + 'static) -> Self {
		Self {
			connect: Box::new(connect),
			slot: Mutex::new(None),
		}
	}

	/// Returns the existing connection if it hasn't closed, otherwise builds
	/// and stores a fresh one. A failed build leaves the slot empty; it is
	/// never populated with anything but a live connection.
	pub async fn conn(&self) -> Result<ControllerConnection, ConnectionError> {
		let mut slot = self.slot.lock().await;
		if let Some(conn) = slot.as_ref() {
			if !conn.is_closed() {
				return Ok(conn.clone());
			}
			debug!("dropping a closed controller connection from the pool");
			*slot = None;
		}

		let conn = (self.connect)().await?;
		*slot = Some(conn.clone());
		Ok(conn)
	}

	/// Closes the held connection, if any, and clears the slot.
	pub async fn close(&self) {
		if let Some(conn) = self.slot.lock().await.take() {
			conn.close().await;
		}
	}
}

/// Spawns a background task that repeatedly acquires a connection on a fixed
/// retry interval and waits for it to close before looping, logging failed
/// acquisitions as they happen. Mirrors the reconnect-supervisor loop in the
/// original gateway binary's `main`.
///
/// This only watches [`ControllerConnection::closed`], a freely-cloneable
/// `watch::Receiver`; it deliberately does not touch
/// [`ControllerConnection::errors`], whose single-consumer receiver is
/// reserved for whichever Operator-facing handler is streaming state off the
/// same connection (`conn.rs` already logs each error via `tracing::warn!`
/// before it's sent, so nothing is lost by not draining it here too).
pub fn spawn_reconnect_supervisor(pool: Arc<Pool>) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut last_attempt: Option<Instant> = None;
		loop {
			if let Some(last) = last_attempt {
				let elapsed = last.elapsed();
				if elapsed < RETRY_INTERVAL {
					tokio::time::sleep(RETRY_INTERVAL - elapsed).await;
				}
			}
			last_attempt = Some(Instant::now());

			match pool.conn().await {
				Ok(conn) => {
					let mut closed = conn.closed();
					let _ = closed.changed().await;
				}
				Err(e) => {
					warn!(error = %e, "failed to retrieve controller connection from pool");
				}
			}
		}
	})
}

#[cfg(test)]
mod test {
	use super::*;
	use gateway_common::envelope::{Envelope, HandshakeRequest, IdGenerator, MessageType};
	use gateway_common::codec::EnvelopeCodec;
	use futures::{SinkExt, StreamExt};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::io::duplex;
	use tokio_util::codec::Framed;

	async fn spawn_handshaking_controller() -> tokio::io::DuplexStream {
		let (gateway_side, controller_side) = duplex(64 * 1024);
		tokio::spawn(async move {
			let mut controller = Framed::new(controller_side, EnvelopeCodec::new());
			let ids = IdGenerator::new();
			let payload = Envelope::encode_payload(&HandshakeRequest {
				version: semver::Version::new(1, 0, 0),
				token: "t".to_string(),
			})
			.unwrap();
			controller
				.send(Envelope::request(&ids, MessageType::Handshake, Some(payload)))
				.await
				.unwrap();
			// Keep the controller side alive for the test's duration.
			let _ = controller.next().await;
			std::future::pending::<()>().await;
		});
		gateway_side
	}

	#[tokio::test]
	async fn conn_builds_once_and_reuses_the_connection() {
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_clone = calls.clone();

		let pool = Pool::new(move || {
			let calls = calls_clone.clone();
			Box::pin(async move {
				calls.fetch_add(1, Ordering::SeqCst);
				let transport = spawn_handshaking_controller().await;
				ControllerConnection::connect(transport, semver::Version::new(1, 0, 0)).await
			}) as ConnectFuture
		});

		let first = pool.conn().await.unwrap();
		let second = pool.conn().await.unwrap();
		assert!(!first.is_closed());
		assert_eq!(first.token(), second.token());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn conn_rebuilds_after_the_connection_closes() {
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_clone = calls.clone();

		let pool = Pool::new(move || {
			let calls = calls_clone.clone();
			Box::pin(async move {
				calls.fetch_add(1, Ordering::SeqCst);
				let transport = spawn_handshaking_controller().await;
				ControllerConnection::connect(transport, semver::Version::new(1, 0, 0)).await
			}) as ConnectFuture
		});

		let first = pool.conn().await.unwrap();
		first.close().await;

		let second = pool.conn().await.unwrap();
		assert!(!second.is_closed());
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
