//! `gateway`: the relay binary sitting between one Controller byte-stream
//! peer and one interactive Operator (spec.md §1, §6; replaces the original
//! `cmd/srrs`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Context as _, Result};
use gateway_core::{ConnectionError, Pool};
use gateway_http::{AppState, SessionManager};
use tokio::net::{TcpStream, UnixStream};
use tower_http::services::ServeDir;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(clap::Parser, Debug)]
struct Cli {
	/// HTTP service address for the Operator-facing API.
	#[clap(long, env, default_value = "0.0.0.0:4242")]
	http: SocketAddr,
	/// Path to the Controller's Unix socket. Ignored when `--tcp-socket` is set.
	/// Defaults to `trc.sock` under the platform temp directory.
	#[clap(long, env)]
	unix_socket: Option<PathBuf>,
	/// Service address of the Controller's TCP socket. TCP is dialed instead
	/// of the Unix socket when this is set.
	#[clap(long, env)]
	tcp_socket: Option<SocketAddr>,
	/// Path to static assets (e.g. the Operator front end) served at `/`.
	#[clap(long, env)]
	r#static: Option<PathBuf>,
	/// Debug mode: raises the default log level.
	#[clap(long)]
	debug: bool,
}

fn default_unix_socket() -> PathBuf {
	std::env::temp_dir().join("trc.sock")
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	let cli = Cli::parse();

	let default_level = if cli.debug { "debug" } else { "info" };
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
		.with(tracing_subscriber::fmt::layer())
		.init();

	let unix_socket = cli.unix_socket.clone().unwrap_or_else(default_unix_socket);
	let tcp_socket = cli.tcp_socket;
	let pool = Arc::new(Pool::new(move || {
		let unix_socket = unix_socket.clone();
		Box::pin(dial_controller(unix_socket, tcp_socket))
	}));

	gateway_core::pool::spawn_reconnect_supervisor(pool.clone());

	let state = AppState {
		pool,
		sessions: Arc::new(SessionManager::new()),
	};

	let mut router = gateway_http::router(state);
	if let Some(dir) = &cli.r#static {
		router = router.fallback_service(ServeDir::new(dir));
	}

	let listener = tokio::net::TcpListener::bind(cli.http)
		.await
		.wrap_err_with(|| format!("failed to listen on {}", cli.http))?;
	info!(addr = %listener.local_addr().unwrap_or(cli.http), "starting the web server");
	axum::serve(listener, router)
		.await
		.wrap_err("http server failed")?;
	Ok(())
}

/// Dials the Controller, either over its Unix socket or, if configured, over
/// TCP, and completes the §4.D handshake on the resulting stream. Mirrors
/// `cmd/srrs/main.go`'s pool factory (dial-first, `*tcpSock == ""` branch).
async fn dial_controller(
	unix_socket: PathBuf,
	tcp_socket: Option<SocketAddr>,
) -> Result<gateway_core::ControllerConnection, ConnectionError> {
	let version = gateway_core::protocol_version();
	match tcp_socket {
		Some(addr) => {
			debug!(%addr, "dialing controller over tcp");
			let stream = TcpStream::connect(addr).await?;
			gateway_core::ControllerConnection::connect(stream, version).await
		}
		None => {
			debug!(path = %unix_socket.display(), "dialing controller over unix socket");
			let stream = UnixStream::connect(&unix_socket).await?;
			gateway_core::ControllerConnection::connect(stream, version).await
		}
	}
}
