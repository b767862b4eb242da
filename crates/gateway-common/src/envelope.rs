//! The envelope used on the Controller byte stream.
//!
//! Framing itself (newline-delimited) lives in [`crate::codec`]; this module
//! only deals with the shape of a single message once it has been split out
//! of the stream.

use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use ulid::Ulid;

/// One of the three message kinds the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
	Handshake,
	Ping,
	State,
}

impl fmt::Display for MessageType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Handshake => "handshake",
			Self::Ping => "ping",
			Self::State => "state",
		};
		f.write_str(s)
	}
}

/// A lexicographically sortable, time-ordered 128-bit message identifier.
///
/// Wraps [`ulid::Ulid`] so that the wire representation (26-char Crockford
/// base32) is an implementation detail of this module rather than leaking
/// `ulid`'s own `Serialize` impl directly into the rest of the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(Ulid);

impl MessageId {
	pub fn as_ulid(&self) -> Ulid {
		self.0
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

impl Serialize for MessageId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.0.to_string())
	}
}

impl<'de> Deserialize<'de> for MessageId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ulid::from_string(&s)
			.map(MessageId)
			.map_err(|e| D::Error::custom(format!("invalid message id: {e}")))
	}
}

/// Generates fresh [`MessageId`]s.
///
/// Safe for concurrent use: each call draws from `rand`'s thread-local CSPRNG,
/// so no shared mutable entropy state needs guarding across tasks.
#[derive(Debug, Default)]
pub struct IdGenerator {
	_private: (),
}

impl IdGenerator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Generates a new id using the current wall-clock time as the ULID
	/// timestamp component and fresh randomness for the rest.
	pub fn generate(&self) -> MessageId {
		MessageId(Ulid::new())
	}
}

/// The payload of a `handshake` request: the version the sender speaks and
/// the shared secret it's authenticating with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandshakeRequest {
	pub version: semver::Version,
	#[serde(default)]
	pub token: String,
}

/// The payload of the matching `handshake` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandshakeReply {
	pub negotiated_version: semver::Version,
}

/// The envelope itself. `payload` is left as a [`RawValue`] so that decoding
/// into a concrete payload type (or skipping it entirely for pings) is a
/// decision made by the caller once `type` is known.
///
/// Unknown top-level fields are rejected (`deny_unknown_fields`), matching
/// the protocol's strict-mode requirement.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
	#[serde(rename = "type")]
	pub typ: MessageType,
	pub message_id: MessageId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parent_id: Option<MessageId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<Box<RawValue>>,
}

impl Envelope {
	/// Builds a fresh, unsolicited (non-reply) envelope.
	pub fn request(
		ids: &IdGenerator,
		typ: MessageType,
		payload: Option<Box<RawValue>>,
	) -> Self {
		Self {
			typ,
			message_id: ids.generate(),
			parent_id: None,
			payload,
		}
	}

	/// Builds an envelope that replies to `parent`, reusing its type.
	pub fn reply(
		ids: &IdGenerator,
		parent: &Envelope,
		payload: Option<Box<RawValue>>,
	) -> Self {
		Self {
			typ: parent.typ,
			message_id: ids.generate(),
			parent_id: Some(parent.message_id),
			payload,
		}
	}

	/// Decodes `payload` as `T`. Strict: unknown fields in `T` are rejected
	/// by `T`'s own `Deserialize` impl (callers should derive their payload
	/// types with `#[serde(deny_unknown_fields)]`).
	pub fn decode_payload<T: serde::de::DeserializeOwned>(
		&self,
	) -> Result<T, serde_json::Error> {
		let raw = self
			.payload
			.as_deref()
			.map(RawValue::get)
			.unwrap_or("null");
		serde_json::from_str(raw)
	}

	pub fn encode_payload<T: Serialize>(
		value: &T,
	) -> Result<Box<RawValue>, serde_json::Error> {
		RawValue::from_string(serde_json::to_string(value)?)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn message_id_round_trips_through_json() {
		let ids = IdGenerator::new();
		let id = ids.generate();
		let json = serde_json::to_string(&id).unwrap();
		let decoded: MessageId = serde_json::from_str(&json).unwrap();
		assert_eq!(id, decoded);
		assert_eq!(json.len(), 28, "26 crockford chars plus surrounding quotes");
	}

	#[test]
	fn ids_are_unique_and_sortable_across_time() {
		let ids = IdGenerator::new();
		let first = ids.generate();
		std::thread::sleep(std::time::Duration::from_millis(2));
		let second = ids.generate();
		assert_ne!(first, second);
		assert!(second > first, "later id must sort after earlier one");
	}

	#[test]
	fn envelope_rejects_unknown_fields() {
		let json = r#"{"type":"ping","message_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","bogus":1}"#;
		let err = serde_json::from_str::<Envelope>(json).unwrap_err();
		assert!(err.to_string().contains("bogus") || err.is_data());
	}

	#[test]
	fn ping_payload_decodes_as_unit() {
		let json = r#"{"type":"ping","message_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV"}"#;
		let env: Envelope = serde_json::from_str(json).unwrap();
		let (): () = env.decode_payload().unwrap();
	}
}
