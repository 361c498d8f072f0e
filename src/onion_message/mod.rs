// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The onion message transport seam.
//!
//! This crate does not construct onion packets itself. It hands the transport a cleartext hop
//! list with the message payload on the final hop plus a blinded reply path, and registers for
//! inbound messages that arrived over such a reply path. See [`Transport`] and
//! [`OffersFlow::handle_onion_message`].
//!
//! [`OffersFlow::handle_onion_message`]: crate::offers::flow::OffersFlow::handle_onion_message

use bitcoin::secp256k1::XOnlyPublicKey;
use core::fmt;

use crate::blinded_path::ReplyPath;
use crate::routing::gossip::NodeId;

/// A message payload carried on the final hop of an onion message.
#[derive(Clone, Debug, PartialEq)]
pub enum OnionPayload {
	/// A serialized `invoice_request`.
	InvoiceRequest(Vec<u8>),
}

/// One hop of an outbound onion message route.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageHop {
	/// The node to relay through.
	pub node_id: NodeId,
	/// The payload for this hop; set only on the final hop.
	pub payload: Option<OnionPayload>,
}

/// An inbound onion message delivered over one of our blinded reply paths.
#[derive(Clone, Debug)]
pub struct OnionMessageReply {
	/// The blinding point the message arrived under, if any. Absent for messages that did not
	/// come over a blinded path; those cannot be replies to us.
	pub blinding_in: Option<XOnlyPublicKey>,
	/// A serialized `invoice`, if the message contained one.
	pub invoice: Option<Vec<u8>>,
	/// A serialized `invoice_error`, if the message contained one.
	pub invoice_error: Option<Vec<u8>>,
}

/// Error sending an onion message. The transport is trusted infrastructure, so these abort the
/// initiating operation rather than being retried.
#[derive(Debug, PartialEq)]
pub enum TransportError {
	/// The transport could not take the message.
	SendFailed(String),
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			TransportError::SendFailed(reason) => write!(f, "Failed sending onion message: {}", reason),
		}
	}
}

/// The onion message transport consumed by the exchange engine.
///
/// `send_onion_message` must not block on the remote peer; delivery is fire-and-forget and any
/// reply arrives asynchronously through the inbound hook.
pub trait Transport {
	/// Sends an onion message along `hops`, advertising `reply_path` for the recipient's answer.
	fn send_onion_message(
		&self, hops: &[MessageHop], reply_path: &ReplyPath,
	) -> Result<(), TransportError>;
}
