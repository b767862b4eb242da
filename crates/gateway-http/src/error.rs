//! HTTP-facing error mapping (§7 "Session errors are user-visible").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gateway_common::validate::ValidationError;
use gateway_core::ConnectionError;

use crate::session::SessionError;

/// Everything a session-gated HTTP handler can fail with, collapsed to a
/// single response type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error(transparent)]
	Session(#[from] SessionError),
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error("invalid command: {0:?}")]
	InvalidCommand(String),
	#[error("malformed request body: {0}")]
	Decode(#[from] serde_json::Error),
	#[error("failed to reach the controller: {0}")]
	Controller(#[from] ConnectionError),
}

impl SessionError {
	fn status_code(self) -> StatusCode {
		match self {
			Self::MissingCredentials => StatusCode::BAD_REQUEST,
			Self::TokenMismatch | Self::KeyMismatch => StatusCode::UNAUTHORIZED,
			Self::ActiveWebsocket => StatusCode::IM_A_TEAPOT,
			Self::NoSession => StatusCode::METHOD_NOT_ALLOWED,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = match &self {
			Self::Session(e) => e.status_code(),
			Self::Validation(_) | Self::InvalidCommand(_) | Self::Decode(_) => {
				StatusCode::BAD_REQUEST
			}
			Self::Controller(_) => StatusCode::INTERNAL_SERVER_ERROR,
		};
		(status, self.to_string()).into_response()
	}
}
