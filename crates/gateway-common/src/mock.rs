//! Default request handlers for a mock Controller peer (§4.I).
//!
//! These mirror `pkg/trcapi/trctest`'s `DefaultStateHandler` /
//! `DefaultPingHandler`: the bare-minimum well-typed reply to each request
//! type, so a test or the `mock-controller` binary can run with no handler
//! customization at all and still speak a protocol-conformant peer.

use crate::envelope::{Envelope, IdGenerator};
use crate::patch::StatePatch;

/// A handler that turns an incoming request envelope into its reply.
pub type Handler = fn(&IdGenerator, &Envelope) -> Result<Envelope, serde_json::Error>;

/// Replies to a `ping` request with an empty-payload `ping` reply.
pub fn default_ping_handler(
	ids: &IdGenerator,
	req: &Envelope,
) -> Result<Envelope, serde_json::Error> {
	Ok(Envelope::reply(ids, req, None))
}

/// Replies to a `state` push with an empty [`StatePatch`], acknowledging
/// receipt without claiming to track any fleet state of its own. The gateway
/// only sends `state` requests as patches (never a full [`crate::state::State`]),
/// so the reply is decoded and typed the same way.
pub fn default_state_handler(
	ids: &IdGenerator,
	req: &Envelope,
) -> Result<Envelope, serde_json::Error> {
	let _incoming: StatePatch = req.decode_payload()?;
	let payload = Envelope::encode_payload(&StatePatch::default())?;
	Ok(Envelope::reply(ids, req, Some(payload)))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::envelope::MessageType;

	#[test]
	fn default_ping_handler_echoes_parent_id() {
		let ids = IdGenerator::new();
		let req = Envelope::request(&ids, MessageType::Ping, None);
		let reply = default_ping_handler(&ids, &req).unwrap();
		assert_eq!(reply.parent_id, Some(req.message_id));
		assert_eq!(reply.typ, MessageType::Ping);
	}

	#[test]
	fn default_state_handler_acks_with_empty_patch() {
		let ids = IdGenerator::new();
		let payload = Envelope::encode_payload(&StatePatch::set_command(crate::state::Command::Stop)).unwrap();
		let req = Envelope::request(&ids, MessageType::State, Some(payload));
		let reply = default_state_handler(&ids, &req).unwrap();
		let patch: StatePatch = reply.decode_payload().unwrap();
		assert_eq!(patch, StatePatch::default());
	}
}
