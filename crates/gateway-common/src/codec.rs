//! Byte-stream framing for the Controller protocol.
//!
//! The wire format is newline-terminated, strict JSON: one [`Envelope`] per
//! line, unknown fields rejected. `tokio_util`'s [`LinesCodec`] already
//! handles the line-splitting and `\r`-trimming; this module only adds the
//! JSON encode/decode step on top, playing the role our teacher's
//! length-delimited framed transport plays for its own (binary) wire format.

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::envelope::Envelope;

/// Anything that can go wrong turning bytes into an [`Envelope`] or back.
#[derive(Debug, Error)]
pub enum CodecError {
	#[error("line framing: {0}")]
	Lines(#[from] LinesCodecError),
	#[error("malformed envelope: {0}")]
	Json(#[from] serde_json::Error),
}

/// A `tokio_util` [`Decoder`]/[`Encoder`] pair for [`Envelope`]s over a
/// newline-delimited byte stream. No maximum line length is imposed beyond
/// `LinesCodec`'s default, which is generous enough for any payload this
/// protocol carries.
#[derive(Debug, Default)]
pub struct EnvelopeCodec {
	lines: LinesCodec,
}

impl EnvelopeCodec {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Decoder for EnvelopeCodec {
	type Item = Envelope;
	type Error = CodecError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.lines.decode(src)? {
			Some(line) => Ok(Some(serde_json::from_str(&line)?)),
			None => Ok(None),
		}
	}
}

impl Encoder<Envelope> for EnvelopeCodec {
	type Error = CodecError;

	fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
		let line = serde_json::to_string(&item)?;
		self.lines.encode(line, dst).map_err(CodecError::from)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::envelope::{IdGenerator, MessageType};

	#[test]
	fn round_trips_a_ping_through_the_codec() {
		let ids = IdGenerator::new();
		let mut codec = EnvelopeCodec::new();
		let mut buf = BytesMut::new();

		let env = Envelope::request(&ids, MessageType::Ping, None);
		let id = env.message_id;
		codec.encode(env, &mut buf).unwrap();

		assert!(buf.ends_with(b"\n"), "each envelope is newline-terminated");

		let decoded = codec.decode(&mut buf).unwrap().expect("one complete line");
		assert_eq!(decoded.message_id, id);
		assert_eq!(decoded.parent_id, None);
	}

	#[test]
	fn decode_returns_none_on_a_partial_line() {
		let mut codec = EnvelopeCodec::new();
		let mut buf = BytesMut::from(&b"{\"type\":\"ping\""[..]);
		assert!(codec.decode(&mut buf).unwrap().is_none());
	}

	#[test]
	fn rejects_malformed_json() {
		let mut codec = EnvelopeCodec::new();
		let mut buf = BytesMut::from(&b"not json at all\n"[..]);
		assert!(matches!(codec.decode(&mut buf), Err(CodecError::Json(_))));
	}

	#[test]
	fn two_envelopes_in_one_buffer_decode_independently() {
		let ids = IdGenerator::new();
		let mut codec = EnvelopeCodec::new();
		let mut buf = BytesMut::new();
		codec
			.encode(Envelope::request(&ids, MessageType::Ping, None), &mut buf)
			.unwrap();
		codec
			.encode(Envelope::request(&ids, MessageType::Ping, None), &mut buf)
			.unwrap();

		let first = codec.decode(&mut buf).unwrap().expect("first line");
		let second = codec.decode(&mut buf).unwrap().expect("second line");
		assert_ne!(first.message_id, second.message_id);
		assert!(codec.decode(&mut buf).unwrap().is_none());
	}
}
