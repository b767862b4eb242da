//! The Controller Connection (§4.D): handshake, multiplexed request/reply,
//! merge-on-receive cache and coalesced fan-out subscriptions over a single
//! full-duplex byte stream.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::{Sink, SinkExt, Stream, StreamExt};
use gateway_common::codec::{CodecError, EnvelopeCodec};
use gateway_common::envelope::{
	Envelope, HandshakeReply, HandshakeRequest, IdGenerator, MessageId, MessageType,
};
use gateway_common::patch::{self, StatePatch};
use gateway_common::state::{Command, State, TurtleState};
use gateway_common::validate::Validate;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::error::ConnectionError;

type BoxedSink = Pin<Box<dyn Sink<Envelope, Error = CodecError> + Send>>;

/// Lifecycle state of a connection, per the §4.D state machine. `Closing` is
/// transient: [`close_connection`] moves straight through it to `Closed`
/// while holding the write lock, so external observers only ever see
/// `Handshaking` / `Open` / `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Open,
	Closed,
}

struct Inner {
	writer: tokio::sync::Mutex<BoxedSink>,
	cache: RwLock<State>,
	subs: Mutex<std::collections::HashMap<u64, mpsc::Sender<()>>>,
	next_sub_id: AtomicU64,
	pending: Mutex<std::collections::HashMap<MessageId, oneshot::Sender<Envelope>>>,
	ids: IdGenerator,
	token: String,
	negotiated_version: semver::Version,
	phase: RwLock<Phase>,
	closed_tx: watch::Sender<bool>,
	closed_rx: watch::Receiver<bool>,
	errors_tx: mpsc::UnboundedSender<ConnectionError>,
	errors_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionError>>>,
}

/// A handle to an established Controller Connection. Cheap to clone; every
/// clone shares the same cache, subscriptions and pending-request table.
#[derive(Clone)]
pub struct ControllerConnection {
	inner: Arc<Inner>,
}

/// Closes a subscription on drop, per §4.D's "closeFn is idempotent and
/// drains the channel" contract — dropping the receiver and this guard
/// together is equivalent to draining it.
pub struct Subscription {
	inner: Arc<Inner>,
	id: u64,
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.inner.subs.lock().unwrap().remove(&self.id);
	}
}

/// Deregisters a pending request on drop, so that a cancelled `send_request`
/// (the caller's future dropped before completion) doesn't leak an entry in
/// `pending`. Harmless to run after the entry was already removed by the
/// receive loop on normal completion.
struct PendingGuard<'a> {
	inner: &'a Inner,
	id: MessageId,
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		self.inner.pending.lock().unwrap().remove(&self.id);
	}
}

impl ControllerConnection {
	/// Performs the §4.D handshake on `transport` and spawns the receive
	/// task. The Controller is expected to speak first: `connect` blocks
	/// until it has read and replied to the initial `handshake` request.
	pub async fn connect<T>(
		transport: T,
		self_version: semver::Version,
	) -> Result<Self, ConnectionError>
	where
		T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let framed = Framed::new(transport, EnvelopeCodec::new());
		let (sink, mut stream) = framed.split();

		let req = stream.next().await.ok_or_else(|| {
			ConnectionError::Handshake("peer closed before sending a handshake".to_string())
		})??;
		if req.typ != MessageType::Handshake {
			return Err(ConnectionError::Handshake(format!(
				"expected a handshake message first, got {}",
				req.typ
			)));
		}
		let hs: HandshakeRequest = req.decode_payload()?;
		if hs.version.major != self_version.major {
			return Err(ConnectionError::VersionMismatch {
				controller: hs.version,
				gateway: self_version,
			});
		}
		let negotiated_version =
			semver::Version::new(hs.version.major, hs.version.minor.min(self_version.minor), 0);

		let ids = IdGenerator::new();
		let reply_payload = Envelope::encode_payload(&HandshakeReply {
			negotiated_version: negotiated_version.clone(),
		})?;
		let reply = Envelope::reply(&ids, &req, Some(reply_payload));

		let mut sink: BoxedSink = Box::pin(sink);
		sink.send(reply).await?;

		let (closed_tx, closed_rx) = watch::channel(false);
		let (errors_tx, errors_rx) = mpsc::unbounded_channel();

		let inner = Arc::new(Inner {
			writer: tokio::sync::Mutex::new(sink),
			cache: RwLock::new(State::initial()),
			subs: Mutex::new(std::collections::HashMap::new()),
			next_sub_id: AtomicU64::new(0),
			pending: Mutex::new(std::collections::HashMap::new()),
			ids,
			token: hs.token,
			negotiated_version,
			phase: RwLock::new(Phase::Open),
			closed_tx,
			closed_rx,
			errors_tx,
			errors_rx: Mutex::new(Some(errors_rx)),
		});

		debug!(version = %inner.negotiated_version, "controller handshake complete");
		tokio::spawn(receive_loop(inner.clone(), stream));

		Ok(Self { inner })
	}

	/// A deep copy of the current cached fleet state.
	pub fn state(&self) -> State {
		self.inner.cache.read().unwrap().clone()
	}

	/// Opens a coalesced (buffer 1) subscription to cache changes. Dropping
	/// either half unsubscribes.
	pub fn subscribe_state_changes(&self) -> (mpsc::Receiver<()>, Subscription) {
		let (tx, rx) = mpsc::channel(1);
		let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
		self.inner.subs.lock().unwrap().insert(id, tx);
		(
			rx,
			Subscription {
				inner: self.inner.clone(),
				id,
			},
		)
	}

	/// The token presented by the Controller during the handshake. May be
	/// empty in a permissive build.
	pub fn token(&self) -> &str {
		&self.inner.token
	}

	/// The version negotiated during the handshake.
	pub fn negotiated_version(&self) -> &semver::Version {
		&self.inner.negotiated_version
	}

	/// A receiver that observes `true` once this connection has closed.
	pub fn closed(&self) -> watch::Receiver<bool> {
		self.inner.closed_rx.clone()
	}

	pub fn is_closed(&self) -> bool {
		*self.inner.phase.read().unwrap() == Phase::Closed
	}

	/// Takes ownership of the error stream. Returns `None` if already taken;
	/// there should be exactly one reader at a time, matching the original
	/// single-consumer contract.
	pub fn errors(&self) -> Option<mpsc::UnboundedReceiver<ConnectionError>> {
		self.inner.errors_rx.lock().unwrap().take()
	}

	/// Request/reply ping.
	pub async fn ping(&self) -> Result<(), ConnectionError> {
		self.send_request(MessageType::Ping, None).await?;
		Ok(())
	}

	/// Sends a full desired state. Only attributes present in `state` are
	/// asserted; everything else is left with no opinion (see
	/// [`StatePatch::from_state`]).
	pub async fn set_state(&self, state: &State) -> Result<(), ConnectionError> {
		state.validate()?;
		let patch = StatePatch::from_state(state);
		let payload = Envelope::encode_payload(&patch)?;
		self.send_request(MessageType::State, Some(payload)).await?;
		Ok(())
	}

	pub async fn set_command(&self, cmd: Command) -> Result<(), ConnectionError> {
		let patch = StatePatch::set_command(cmd);
		let payload = Envelope::encode_payload(&patch)?;
		self.send_request(MessageType::State, Some(payload)).await?;
		Ok(())
	}

	pub async fn set_turtle_state(
		&self,
		turtles: BTreeMap<String, TurtleState>,
	) -> Result<(), ConnectionError> {
		for ts in turtles.values() {
			ts.validate()?;
		}
		let patch = StatePatch::set_turtles(turtles);
		let payload = Envelope::encode_payload(&patch)?;
		self.send_request(MessageType::State, Some(payload)).await?;
		Ok(())
	}

	/// Idempotent. Drains subscribers and closes the error stream.
	pub async fn close(&self) {
		close_connection(&self.inner, None).await;
	}

	async fn send_request(
		&self,
		typ: MessageType,
		payload: Option<Box<serde_json::value::RawValue>>,
	) -> Result<Envelope, ConnectionError> {
		if self.is_closed() {
			return Err(ConnectionError::Closed);
		}

		let env = Envelope::request(&self.inner.ids, typ, payload);
		let id = env.message_id;
		let (tx, rx) = oneshot::channel();
		self.inner.pending.lock().unwrap().insert(id, tx);
		let _guard = PendingGuard {
			inner: &self.inner,
			id,
		};

		write_envelope(&self.inner, env).await?;

		rx.await.map_err(|_| ConnectionError::Closed)
	}
}

async fn write_envelope(inner: &Inner, env: Envelope) -> Result<(), ConnectionError> {
	let mut writer = inner.writer.lock().await;
	writer.send(env).await.map_err(ConnectionError::from)
}

fn notify_subscribers(inner: &Inner) {
	let subs = inner.subs.lock().unwrap();
	for tx in subs.values() {
		// Buffer-1, non-blocking: a full buffer means a notification is
		// already pending, so dropping this one is harmless (§8 property 4).
		let _ = tx.try_send(());
	}
}

async fn dispatch(inner: &Inner, env: Envelope) -> Result<(), ConnectionError> {
	match env.typ {
		MessageType::Ping => {
			if env.parent_id.is_none() {
				let reply = Envelope::reply(&inner.ids, &env, None);
				write_envelope(inner, reply).await?;
			}
		}
		MessageType::State => {
			let patch: StatePatch = env.decode_payload()?;
			{
				let mut cache = inner.cache.write().unwrap();
				*cache = patch::overlay(&cache, &patch);
			}
			notify_subscribers(inner);
		}
		MessageType::Handshake => {
			return Err(ConnectionError::UnexpectedType(
				"unexpected handshake after connection is open".to_string(),
			));
		}
	}

	if let Some(parent_id) = env.parent_id {
		if let Some(tx) = inner.pending.lock().unwrap().remove(&parent_id) {
			// Receiver may have been dropped by a cancelled caller; that's fine.
			let _ = tx.send(env);
		}
	}

	Ok(())
}

async fn receive_loop(
	inner: Arc<Inner>,
	mut stream: impl Stream<Item = Result<Envelope, CodecError>> + Unpin,
) {
	loop {
		match stream.next().await {
			None => {
				trace!("controller closed the connection");
				close_connection(&inner, None).await;
				return;
			}
			Some(Err(e)) => {
				warn!(error = %e, "controller connection decode error");
				close_connection(&inner, Some(ConnectionError::Codec(e))).await;
				return;
			}
			Some(Ok(env)) => {
				if let Err(e) = dispatch(&inner, env).await {
					warn!(error = %e, "controller connection protocol error");
					close_connection(&inner, Some(e)).await;
					return;
				}
			}
		}
	}
}

async fn close_connection(inner: &Inner, err: Option<ConnectionError>) {
	{
		let mut phase = inner.phase.write().unwrap();
		if *phase == Phase::Closed {
			return;
		}
		*phase = Phase::Closed;
	}
	if let Some(e) = err {
		let _ = inner.errors_tx.send(e);
	}
	inner.subs.lock().unwrap().clear();
	inner.pending.lock().unwrap().clear();
	let _ = inner.closed_tx.send(true);
}
