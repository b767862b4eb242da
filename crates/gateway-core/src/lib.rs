//! The Controller Connection (§4.D) and its single-slot reconnecting pool
//! (§4.E): the hardest subsystem in the gateway, and the one every
//! Operator-facing handler ultimately calls through.

pub mod conn;
pub mod error;
pub mod pool;

pub use conn::{ControllerConnection, Subscription};
pub use error::ConnectionError;
pub use pool::Pool;

/// The protocol version this gateway speaks, matching `trcapi.DefaultVersion`
/// in the original implementation.
pub fn protocol_version() -> semver::Version {
	semver::Version::new(1, 0, 0)
}
