//! The Session Manager (§4.F): enforces at-most-one active Operator.
//!
//! A session is a random 128-hex-char key plus an "in use" flag. The
//! authentication endpoint (`GET /auth`) issues the key; the state
//! WebSocket and the mutating HTTP endpoints gate on it.

use std::sync::RwLock;

use rand::RngCore;

/// Random bytes backing a session key, hex-encoded to 128 characters.
const SESSION_KEY_BYTES: usize = 64;

#[derive(Debug, Clone)]
struct Session {
	key: String,
	in_use: bool,
}

/// Holds at most one active Operator session.
#[derive(Debug, Default)]
pub struct SessionManager {
	current: RwLock<Option<Session>>,
}

/// Everything that can go wrong while authenticating or using a session.
/// [`crate::error::ApiError`] maps each variant to its HTTP status; [`crate::ws`]
/// maps the [`Self::NoSession`], [`Self::KeyMismatch`] and
/// [`Self::ActiveWebsocket`] variants reached via [`SessionManager::enter_ws`]
/// to their WebSocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
	#[error("missing Basic auth credentials")]
	MissingCredentials,
	#[error("token did not match the controller's")]
	TokenMismatch,
	#[error("a websocket session is already active")]
	ActiveWebsocket,
	#[error("no session has been authenticated yet")]
	NoSession,
	#[error("session key did not match")]
	KeyMismatch,
}

impl SessionManager {
	pub fn new() -> Self {
		Self::default()
	}

	/// `GET /auth` (§4.F). `presented` is the password field of the Basic
	/// auth header, if any; `controller_token` is the Controller's negotiated
	/// handshake token (possibly empty, for a permissive build).
	pub fn authenticate(
		&self,
		presented: Option<&str>,
		controller_token: &str,
	) -> Result<String, SessionError> {
		if !controller_token.is_empty() {
			let presented = presented.ok_or(SessionError::MissingCredentials)?;
			if presented != controller_token {
				return Err(SessionError::TokenMismatch);
			}
		}

		let mut current = self.current.write().unwrap();
		if let Some(session) = current.as_ref() {
			if session.in_use {
				return Err(SessionError::ActiveWebsocket);
			}
		}

		let key = generate_key();
		*current = Some(Session {
			key: key.clone(),
			in_use: false,
		});
		Ok(key)
	}

	/// Checks a presented session key against the current session, for the
	/// mutating HTTP endpoints. Does not touch `in_use`.
	pub fn verify_key(&self, presented: Option<&str>) -> Result<(), SessionError> {
		let current = self.current.read().unwrap();
		let session = current.as_ref().ok_or(SessionError::NoSession)?;
		if presented == Some(session.key.as_str()) {
			Ok(())
		} else {
			Err(SessionError::KeyMismatch)
		}
	}

	/// Gates entry into the state WebSocket (§4.G step 2): validates the
	/// presented key and, on success, flips `in_use` so a concurrent `/auth`
	/// or WebSocket attempt is rejected until [`Self::leave_ws`] runs.
	pub fn enter_ws(&self, presented: &str) -> Result<(), SessionError> {
		let mut current = self.current.write().unwrap();
		let session = current.as_mut().ok_or(SessionError::NoSession)?;
		if session.key != presented {
			return Err(SessionError::KeyMismatch);
		}
		if session.in_use {
			return Err(SessionError::ActiveWebsocket);
		}
		session.in_use = true;
		Ok(())
	}

	/// Clears `in_use` on the way out of the state WebSocket. A no-op if the
	/// session has since been replaced (e.g. by a later `/auth` call that
	/// only succeeds once `in_use` was already false, so this never
	/// resurrects a stale session).
	pub fn leave_ws(&self, key: &str) {
		let mut current = self.current.write().unwrap();
		if let Some(session) = current.as_mut() {
			if session.key == key {
				session.in_use = false;
			}
		}
	}
}

fn generate_key() -> String {
	let mut bytes = [0u8; SESSION_KEY_BYTES];
	rand::thread_rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn generated_key_is_128_hex_chars() {
		let key = generate_key();
		assert_eq!(key.len(), 128);
		assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn permissive_build_accepts_missing_credentials() {
		let sessions = SessionManager::new();
		assert!(sessions.authenticate(None, "").is_ok());
	}

	#[test]
	fn missing_header_is_rejected_when_token_is_non_empty() {
		let sessions = SessionManager::new();
		assert_eq!(
			sessions.authenticate(None, "secret").unwrap_err(),
			SessionError::MissingCredentials
		);
	}

	#[test]
	fn wrong_token_is_rejected() {
		let sessions = SessionManager::new();
		assert_eq!(
			sessions.authenticate(Some("nope"), "secret").unwrap_err(),
			SessionError::TokenMismatch
		);
	}

	#[test]
	fn second_auth_while_in_use_returns_active_websocket() {
		let sessions = SessionManager::new();
		let key = sessions.authenticate(Some("t"), "t").unwrap();
		sessions.enter_ws(&key).unwrap();

		assert_eq!(
			sessions.authenticate(Some("t"), "t").unwrap_err(),
			SessionError::ActiveWebsocket
		);
		// the previous key remains valid throughout
		assert!(sessions.verify_key(Some(&key)).is_ok());
	}

	#[test]
	fn second_auth_while_not_in_use_invalidates_the_previous_key() {
		let sessions = SessionManager::new();
		let first = sessions.authenticate(Some("t"), "t").unwrap();
		let second = sessions.authenticate(Some("t"), "t").unwrap();

		assert_ne!(first, second);
		assert_eq!(
			sessions.verify_key(Some(&first)).unwrap_err(),
			SessionError::KeyMismatch
		);
		assert!(sessions.verify_key(Some(&second)).is_ok());
	}

	#[test]
	fn enter_ws_rejects_wrong_key_and_leave_clears_in_use() {
		let sessions = SessionManager::new();
		let key = sessions.authenticate(Some("t"), "t").unwrap();
		assert_eq!(
			sessions.enter_ws("wrong").unwrap_err(),
			SessionError::KeyMismatch
		);
		sessions.enter_ws(&key).unwrap();
		sessions.leave_ws(&key);
		// re-entering after leave succeeds
		assert!(sessions.enter_ws(&key).is_ok());
	}
}
