//! A symmetric mock Controller peer (§4.I): the counterpart of
//! `gateway_core::ControllerConnection` used by tests and by the
//! `mock-controller` binary for local development.
//!
//! Grounded in `pkg/trcapi/trctest` (the handler-map connection shape) and
//! `cmd/trcd/main.go` (the listener loop and the auto-push task). Unlike the
//! original's `trctest.Conn`, this does not reproduce the buggy
//! `select { case <-closeCh: ... }` receive shape the spec's §9 REDESIGN
//! FLAG calls out — a decode error and a peer-initiated close are both true
//! alternatives in a single `tokio::select!` here, same as in
//! `gateway-core`'s own receive loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use gateway_common::codec::{CodecError, EnvelopeCodec};
use gateway_common::envelope::{Envelope, HandshakeRequest, IdGenerator, MessageType};
use gateway_common::mock::{self, Handler};
use gateway_common::patch::StatePatch;
use gateway_common::state::{
	BallFound, CapacitorState, Command, Cpb, HomeGoal, KinectState, LocalizationStatus, Role,
	State, TeamColor, TurtleState,
};
use rand::Rng;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MockError {
	#[error("codec error: {0}")]
	Codec(#[from] CodecError),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

/// Per-message-type request handlers a caller can override; unset slots fall
/// back to [`gateway_common::mock`]'s defaults, mirroring
/// `trctest.WithHandler` layered over `trctest.Connect`'s option list.
pub struct Handlers {
	pub ping: Handler,
	pub state: Handler,
}

impl Default for Handlers {
	fn default() -> Self {
		Self {
			ping: mock::default_ping_handler,
			state: mock::default_state_handler,
		}
	}
}

/// Cadence knobs for the automatic push task (§4.I), recovered from
/// `cmd/trcd/main.go`: a fixed-tick heartbeat ping, raced against a state
/// push sent after a random `0..jitter_max` delay.
#[derive(Debug, Clone, Copy)]
pub struct AutoPush {
	pub heartbeat: Duration,
	pub jitter_max: Duration,
}

impl Default for AutoPush {
	fn default() -> Self {
		Self {
			heartbeat: Duration::from_secs(3),
			jitter_max: Duration::from_secs(5),
		}
	}
}

pub struct Options {
	pub version: semver::Version,
	pub token: String,
	pub handlers: Handlers,
	/// `None` is the `--silent` mode: no unsolicited traffic, only replies.
	pub auto_push: Option<AutoPush>,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			version: semver::Version::new(1, 0, 0),
			token: String::new(),
			handlers: Handlers::default(),
			auto_push: Some(AutoPush::default()),
		}
	}
}

type Sink<T> = Arc<Mutex<SplitSink<Framed<T, EnvelopeCodec>, Envelope>>>;

/// Runs the mock Controller protocol over one accepted transport until the
/// peer disconnects or a decode error occurs. Per §4.D step 1, the Controller
/// speaks first: this sends the `handshake` request before doing anything
/// else.
pub async fn serve<T>(transport: T, opts: Options) -> Result<(), MockError>
where
	T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let framed = Framed::new(transport, EnvelopeCodec::new());
	let (sink, mut stream) = framed.split();
	let sink: Sink<T> = Arc::new(Mutex::new(sink));
	let ids = Arc::new(IdGenerator::new());

	let hs_payload = Envelope::encode_payload(&HandshakeRequest {
		version: opts.version.clone(),
		token: opts.token.clone(),
	})?;
	write(&sink, Envelope::request(&ids, MessageType::Handshake, Some(hs_payload))).await?;
	debug!("sent handshake, the gateway will reply once it has processed it");

	let auto_push: Pin<Box<dyn Future<Output = ()> + Send>> = match opts.auto_push {
		Some(cadence) => Box::pin(auto_push_loop(sink.clone(), ids.clone(), cadence)),
		None => Box::pin(std::future::pending()),
	};
	tokio::pin!(auto_push);

	loop {
		tokio::select! {
			biased;

			incoming = stream.next() => {
				match incoming {
					None => {
						debug!("gateway closed the connection");
						return Ok(());
					}
					Some(Err(e)) => return Err(e.into()),
					Some(Ok(env)) => {
						// A reply to our own handshake/ping/state push carries
						// a parent_id and needs no further action from us.
						if env.parent_id.is_some() {
							continue;
						}
						let reply = dispatch(&opts.handlers, ids.as_ref(), &env)?;
						write(&sink, reply).await?;
					}
				}
			}

			_ = &mut auto_push => {
				unreachable!("auto_push_loop never returns");
			}
		}
	}
}

async fn write<T>(sink: &Sink<T>, env: Envelope) -> Result<(), MockError>
where
	T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	sink.lock().await.send(env).await.map_err(MockError::from)
}

fn dispatch(handlers: &Handlers, ids: &IdGenerator, env: &Envelope) -> Result<Envelope, MockError> {
	let handler: Handler = match env.typ {
		MessageType::Ping => handlers.ping,
		MessageType::State => handlers.state,
		MessageType::Handshake => {
			warn!("ignoring unexpected unsolicited handshake message from the gateway");
			return Ok(Envelope::reply(ids, env, None));
		}
	};
	Ok(handler(ids, env)?)
}

async fn auto_push_loop<T>(sink: Sink<T>, ids: Arc<IdGenerator>, cadence: AutoPush)
where
	T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let mut heartbeat = tokio::time::interval(cadence.heartbeat);
	heartbeat.tick().await; // first tick fires immediately; discard it.

	loop {
		let jitter = if cadence.jitter_max.is_zero() {
			Duration::ZERO
		} else {
			Duration::from_millis(rand::thread_rng().gen_range(0..cadence.jitter_max.as_millis() as u64))
		};

		tokio::select! {
			_ = tokio::time::sleep(jitter) => {
				match encode_random_state_push(&ids) {
					Ok(env) => {
						if write(&sink, env).await.is_err() {
							return;
						}
						debug!("sent a random state push");
					}
					Err(e) => warn!(error = %e, "failed to encode random state push"),
				}
			}
			_ = heartbeat.tick() => {
				let env = Envelope::request(&ids, MessageType::Ping, None);
				if write(&sink, env).await.is_err() {
					return;
				}
				debug!("sent heartbeat ping");
			}
		}
	}
}

fn encode_random_state_push(ids: &IdGenerator) -> Result<Envelope, serde_json::Error> {
	let state = random_state();
	let payload = Envelope::encode_payload(&StatePatch::from_state(&state))?;
	Ok(Envelope::request(ids, MessageType::State, Some(payload)))
}

/// Generates a fully-populated random [`State`], grounded in
/// `pkg/api/apitest.RandomState`/`RandomTurtleState`: every command and
/// every field of every one of the six turtles gets a random value from its
/// closed set or range.
pub fn random_state() -> State {
	let mut rng = rand::thread_rng();
	let mut state = State {
		command: Some(random_command(&mut rng)),
		turtles: Default::default(),
	};
	for id in gateway_common::state::INITIAL_TURTLE_IDS {
		state.turtles.insert(id.to_string(), random_turtle_state(&mut rng));
	}
	state
}

fn random_command(rng: &mut impl Rng) -> Command {
	const COMMANDS: &[Command] = &[
		Command::DroppedBall,
		Command::Start,
		Command::Stop,
		Command::GoIn,
		Command::GoOut,
		Command::KickOffMagenta,
		Command::KickOffCyan,
		Command::FreeKickMagenta,
		Command::FreeKickCyan,
		Command::GoalKickMagenta,
		Command::GoalKickCyan,
		Command::ThrowInMagenta,
		Command::ThrowInCyan,
		Command::CornerMagenta,
		Command::CornerCyan,
		Command::PenaltyMagenta,
		Command::PenaltyCyan,
		Command::RoleAssignerOn,
		Command::RoleAssignerOff,
		Command::PassDemo,
		Command::PenaltyDemo,
		Command::BallHandlingDemo,
	];
	COMMANDS[rng.gen_range(0..COMMANDS.len())]
}

fn pick<T: Copy>(rng: &mut impl Rng, options: &[T]) -> T {
	options[rng.gen_range(0..options.len())]
}

fn random_turtle_state(rng: &mut impl Rng) -> TurtleState {
	TurtleState {
		vision: Some(rng.gen()),
		motion: Some(rng.gen()),
		worldmodel: Some(rng.gen()),
		appman: Some(rng.gen()),
		robot_in_field: Some(rng.gen()),
		emergency_button: Some(rng.gen()),
		restart_count_motion: Some(rng.gen_range(0..=99)),
		restart_count_vision: Some(rng.gen_range(0..=99)),
		restart_count_worldmodel: Some(rng.gen_range(0..=99)),
		ball_found: Some(pick(rng, &[BallFound::Yes, BallFound::Communicated, BallFound::No])),
		localization_status: Some(pick(
			rng,
			&[
				LocalizationStatus::Localization,
				LocalizationStatus::NoLocalization,
				LocalizationStatus::CompassError,
			],
		)),
		cpb: Some(pick(rng, &[Cpb::Yes, Cpb::Team, Cpb::No])),
		battery_voltage: Some(rng.gen_range(0..=99)),
		emergency_status: Some(rng.gen_range(0..=100)),
		role: Some(random_role(rng)),
		refbox_role: Some(random_role(rng)),
		home_goal: Some(pick(rng, &[HomeGoal::Yellow, HomeGoal::Blue])),
		team_color: Some(pick(rng, &[TeamColor::Magenta, TeamColor::Cyan])),
		active_dev_pc: Some(rng.gen_range(0..=90)),
		kinect1_state: Some(random_kinect_state(rng)),
		kinect2_state: Some(random_kinect_state(rng)),
		comm_status: Some(rng.gen()),
		software_svn_rev: Some(rng.gen_range(0..=9999)),
		lib_svn_rev: Some(rng.gen_range(0..=9999)),
		cpu0_load: Some(rng.gen_range(0..=99)),
		cpu1_load: Some(rng.gen_range(0..=99)),
		temperature_m1: Some(rng.gen_range(0..=99)),
		temperature_m2: Some(rng.gen_range(0..=99)),
		temperature_m3: Some(rng.gen_range(0..=99)),
		is_active: Some(rng.gen()),
		cam_status: Some(rng.gen_range(0..=10)),
		capacitor_state: Some(pick(
			rng,
			&[CapacitorState::NoState, CapacitorState::Empty, CapacitorState::Full],
		)),
	}
}

fn random_role(rng: &mut impl Rng) -> Role {
	pick(
		rng,
		&[
			Role::None,
			Role::Inactive,
			Role::Goalkeeper,
			Role::AttackerMain,
			Role::AttackerAssist,
			Role::DefenderMain,
			Role::DefenderAssist,
			Role::DefenderAssist2,
		],
	)
}

fn random_kinect_state(rng: &mut impl Rng) -> KinectState {
	pick(rng, &[KinectState::Ball, KinectState::NoBall, KinectState::NoState])
}

#[cfg(test)]
mod test {
	use super::*;
	use gateway_common::envelope::MessageType;
	use gateway_common::validate::Validate;
	use tokio::io::duplex;
	use tokio_util::codec::Framed as TokioFramed;

	#[test]
	fn random_state_is_always_valid() {
		for _ in 0..50 {
			random_state().validate().unwrap();
		}
	}

	#[tokio::test]
	async fn serve_sends_handshake_first_and_replies_to_ping() {
		let (mock_side, gateway_side) = duplex(64 * 1024);
		let mut gateway = TokioFramed::new(gateway_side, EnvelopeCodec::new());

		let opts = Options {
			token: "t".to_string(),
			auto_push: None,
			..Options::default()
		};
		let serve_task = tokio::spawn(serve(mock_side, opts));

		let hs = gateway.next().await.unwrap().unwrap();
		assert_eq!(hs.typ, MessageType::Handshake);
		assert_eq!(hs.parent_id, None);

		let ids = IdGenerator::new();
		let ping = Envelope::request(&ids, MessageType::Ping, None);
		let ping_id = ping.message_id;
		gateway.send(ping).await.unwrap();

		let reply = gateway.next().await.unwrap().unwrap();
		assert_eq!(reply.typ, MessageType::Ping);
		assert_eq!(reply.parent_id, Some(ping_id));

		drop(gateway);
		serve_task.await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn serve_acks_a_state_push_with_an_empty_patch() {
		let (mock_side, gateway_side) = duplex(64 * 1024);
		let mut gateway = TokioFramed::new(gateway_side, EnvelopeCodec::new());

		let opts = Options {
			auto_push: None,
			..Options::default()
		};
		let serve_task = tokio::spawn(serve(mock_side, opts));
		let _hs = gateway.next().await.unwrap().unwrap();

		let ids = IdGenerator::new();
		let payload =
			Envelope::encode_payload(&StatePatch::set_command(Command::Stop)).unwrap();
		let req = Envelope::request(&ids, MessageType::State, Some(payload));
		let req_id = req.message_id;
		gateway.send(req).await.unwrap();

		let reply = gateway.next().await.unwrap().unwrap();
		assert_eq!(reply.parent_id, Some(req_id));
		let patch: StatePatch = reply.decode_payload().unwrap();
		assert_eq!(patch, StatePatch::default());

		drop(gateway);
		serve_task.await.unwrap().unwrap();
	}
}
