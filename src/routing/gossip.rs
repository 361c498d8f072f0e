// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The gossip oracle seam: a read-only view of the network graph sufficient for onion message
//! pathfinding.

use bitcoin::secp256k1::{self, PublicKey, XOnlyPublicKey};
use core::fmt;

/// Represents the compressed public key of a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 33]);

impl NodeId {
	/// Create a new NodeId from a public key.
	pub fn from_pubkey(pubkey: &PublicKey) -> Self {
		NodeId(pubkey.serialize())
	}

	/// Get the public key from this NodeId.
	pub fn as_pubkey(&self) -> Result<PublicKey, secp256k1::Error> {
		PublicKey::from_slice(&self.0)
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "NodeId({})", self)
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for byte in self.0.iter() {
			write!(f, "{:02x}", byte)?;
		}
		Ok(())
	}
}

/// One direction-aware channel adjacency as seen from a given node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectedChannel {
	/// The node on the far end.
	pub counterparty: NodeId,
	/// Whether the channel is enabled in the direction towards the counterparty.
	pub enabled: bool,
	/// Whether the channel is enabled in the direction from the counterparty back to us.
	pub counterparty_enabled: bool,
	/// The channel's capacity, used to break ties between equally short paths.
	pub capacity_msat: u64,
}

/// A read-only, internally consistent view of the gossiped network graph.
///
/// [`refresh`] is called once before each pathfinding run; all reads until the next refresh must
/// come from one consistent snapshot so Dijkstra never observes a torn graph.
///
/// [`refresh`]: Self::refresh
pub trait NetworkView {
	/// Brings the view up to date with gossip, establishing a new snapshot.
	fn refresh(&self);

	/// Whether the node is present in the graph.
	fn contains_node(&self, node_id: &NodeId) -> bool;

	/// Resolves an x-only pubkey (as carried in offers, which drop the parity byte) to a full
	/// node id known to the graph, or `None` if no such node exists.
	fn resolve_node(&self, node_id: &XOnlyPublicKey) -> Option<NodeId>;

	/// The channels adjacent to the given node.
	fn channels(&self, node_id: &NodeId) -> Vec<DirectedChannel>;

	/// Whether the node advertises the onion message feature, making it usable as a relay hop or
	/// destination.
	fn supports_onion_messages(&self, node_id: &NodeId) -> bool;
}
