use gateway_common::codec::CodecError;
use gateway_common::validate::ValidationError;
use thiserror::Error;

/// Everything that can go wrong on a [`crate::conn::ControllerConnection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("connection is closed")]
	Closed,
	#[error("handshake failed: {0}")]
	Handshake(String),
	#[error("major version mismatch: controller speaks {controller}, gateway speaks {gateway}")]
	VersionMismatch {
		controller: semver::Version,
		gateway: semver::Version,
	},
	#[error("payload is invalid: {0}")]
	Validation(#[from] ValidationError),
	#[error("malformed envelope: {0}")]
	Codec(#[from] CodecError),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("unexpected message type on the wire: {0}")]
	UnexpectedType(String),
}
