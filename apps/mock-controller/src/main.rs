//! `mock-controller`: a standalone dev/test peer that speaks the Controller
//! side of the protocol (spec.md §4.I, §6; replaces the original
//! `cmd/trcd`). Listens for a single inbound connection at a time, performs
//! the handshake as the initiator, and (unless `--silent`) pushes random
//! state and heartbeat pings on its own schedule.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Context as _, Result};
use gateway_core::protocol_version;
use mock_controller::{serve, AutoPush, Options};
use tokio::net::{TcpListener, UnixListener};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(clap::Parser, Debug)]
struct Cli {
	/// Path to the Unix socket to listen on. Ignored when `--tcp-socket` is set.
	#[clap(long, env)]
	unix_socket: Option<PathBuf>,
	/// Service address to listen on over TCP instead of a Unix socket.
	#[clap(long, env)]
	tcp_socket: Option<SocketAddr>,
	/// Disables automatic sending of random state updates and heartbeat pings.
	#[clap(long)]
	silent: bool,
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

	let opts = move || Options {
		version: protocol_version(),
		token: String::new(),
		auto_push: if cli.silent { None } else { Some(AutoPush::default()) },
		..Options::default()
	};

	match cli.tcp_socket {
		Some(addr) => {
			info!(%addr, "listening on tcp socket");
			let listener = TcpListener::bind(addr)
				.await
				.wrap_err_with(|| format!("failed to listen on {addr}"))?;
			loop {
				let (stream, peer) = listener.accept().await.wrap_err("accept failed")?;
				info!(%peer, "accepted a connection");
				let opts = opts();
				tokio::spawn(async move {
					if let Err(e) = serve(stream, opts).await {
						error!(error = %e, "mock controller connection ended with an error");
					}
				});
			}
		}
		None => {
			let path = cli.unix_socket.clone().unwrap_or_else(default_unix_socket);
			// A stale socket file from a previous run makes bind fail; the
			// original's `net.Listen("unix", ...)` has the same pitfall and
			// leaves cleanup to the operator, so we do the same here rather
			// than silently unlinking a path we didn't create.
			info!(path = %path.display(), "listening on unix socket");
			let listener = UnixListener::bind(&path)
				.wrap_err_with(|| format!("failed to listen on {}", path.display()))?;
			loop {
				let (stream, _addr) = listener.accept().await.wrap_err("accept failed")?;
				info!("accepted a connection");
				let opts = opts();
				tokio::spawn(async move {
					if let Err(e) = serve(stream, opts).await {
						error!(error = %e, "mock controller connection ended with an error");
					}
				});
			}
		}
	}
}
