// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! [Onion message] pathfinding lives here.
//!
//! Finding paths for onion messages is necessary for retrieving invoices from offers. It differs
//! from payment pathfinding in that channel liquidity and fees do not factor into path selection
//! -- onion messages require a peer connection and nothing more. Shorter paths win; among
//! equally short paths the one with the larger bottleneck capacity is preferred, since such
//! channels tend to sit between better-connected, longer-lived peers.
//!
//! [Onion message]: https://github.com/lightning/bolts/pull/759

use core::cmp;
use core::fmt;
use std::collections::{hash_map, BinaryHeap, HashMap};

use crate::routing::gossip::{NetworkView, NodeId};
use crate::util::logger::Logger;

/// Finds a route from `our_node_id` to the given `destination` node over channels usable for
/// onion messages: enabled in both directions with the far endpoint advertising the onion
/// message feature.
///
/// The caller is expected to have refreshed `network` to a consistent snapshot.
pub fn find_path<N: NetworkView + ?Sized, L: Logger + ?Sized>(
	network: &N, our_node_id: &NodeId, destination: &NodeId, logger: &L,
) -> Result<Vec<NodeId>, Error> {
	log_trace!(
		logger,
		"Searching for an onion message path from origin {} to destination {}",
		our_node_id,
		destination
	);

	if our_node_id == destination {
		return Err(Error::InvalidDestination);
	}

	let mut frontier = BinaryHeap::new();
	frontier.push(PathBuildingHop {
		hops: 0,
		capacity_msat: u64::MAX,
		node_id: *our_node_id,
		parent_node_id: *our_node_id,
	});

	let mut visited = HashMap::new();
	while let Some(PathBuildingHop { hops, capacity_msat, node_id, parent_node_id }) =
		frontier.pop()
	{
		match visited.entry(node_id) {
			hash_map::Entry::Occupied(_) => continue,
			hash_map::Entry::Vacant(e) => e.insert(parent_node_id),
		};
		if node_id == *destination {
			let path = reverse_path(visited, our_node_id, destination)?;
			log_info!(logger, "Got route to {}: {:?}", destination, path);
			return Ok(path);
		}
		for channel in network.channels(&node_id) {
			if !channel.enabled || !channel.counterparty_enabled {
				continue;
			}
			if !network.supports_onion_messages(&channel.counterparty) {
				continue;
			}
			// We may push a given successor multiple times, but the heap sorts its best entry
			// to the top. We do this because there is no way to adjust the priority of an
			// existing entry in `BinaryHeap`.
			frontier.push(PathBuildingHop {
				hops: hops + 1,
				capacity_msat: cmp::min(capacity_msat, channel.capacity_msat),
				node_id: channel.counterparty,
				parent_node_id: node_id,
			});
		}
	}

	Err(Error::PathNotFound)
}

/// Errors that might occur running [`find_path`].
#[derive(Debug, PartialEq)]
pub enum Error {
	/// We failed to find a path to the destination.
	PathNotFound,
	/// We attempted to generate a path to ourselves, which is not allowed.
	InvalidDestination,
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::PathNotFound => write!(f, "Failed to find a path to the destination"),
			Error::InvalidDestination => write!(f, "Cannot generate a route to ourselves"),
		}
	}
}

impl std::error::Error for Error {}

#[derive(Eq, PartialEq)]
struct PathBuildingHop {
	hops: u64,
	capacity_msat: u64,
	node_id: NodeId,
	parent_node_id: NodeId,
}

impl PartialOrd for PathBuildingHop {
	fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for PathBuildingHop {
	fn cmp(&self, other: &Self) -> cmp::Ordering {
		// We need a min-heap on hop count, whereas `BinaryHeap`s are a max-heap, so compare the
		// costs in reverse. Capacity breaks ties, larger first.
		other
			.hops
			.cmp(&self.hops)
			.then_with(|| self.capacity_msat.cmp(&other.capacity_msat))
	}
}

fn reverse_path(
	parents: HashMap<NodeId, NodeId>, our_node_id: &NodeId, destination: &NodeId,
) -> Result<Vec<NodeId>, Error> {
	let mut path = Vec::new();
	let mut curr = *destination;
	loop {
		path.push(curr);
		match parents.get(&curr) {
			None => return Err(Error::PathNotFound),
			Some(parent) => {
				if parent == our_node_id {
					break;
				}
				curr = *parent;
			},
		}
	}

	path.reverse();
	Ok(path)
}

#[cfg(test)]
mod tests {
	use super::{find_path, Error};
	use crate::routing::gossip::NodeId;
	use crate::util::test_utils::{TestLogger, TestNetworkView};

	use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

	fn pubkey(byte: u8) -> PublicKey {
		let secp_ctx = Secp256k1::new();
		PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[byte; 32]).unwrap())
	}

	fn node_id(byte: u8) -> NodeId {
		NodeId::from_pubkey(&pubkey(byte))
	}

	fn logger() -> TestLogger {
		TestLogger::new()
	}

	#[test]
	fn finds_shortest_path() {
		// 1 -- 2 -- 4
		//  \         \
		//   3 ------- 5
		let network = TestNetworkView::new();
		for byte in 1..=5 {
			network.add_node(&pubkey(byte), true);
		}
		network.add_channel(&pubkey(1), &pubkey(2), 100);
		network.add_channel(&pubkey(2), &pubkey(4), 100);
		network.add_channel(&pubkey(4), &pubkey(5), 100);
		network.add_channel(&pubkey(1), &pubkey(3), 100);
		network.add_channel(&pubkey(3), &pubkey(5), 100);

		let path = find_path(&network, &node_id(1), &node_id(5), &logger()).unwrap();
		assert_eq!(path, vec![node_id(3), node_id(5)]);
	}

	#[test]
	fn breaks_ties_by_capacity() {
		// Two 2-hop paths to 4; the one through 3 has more capacity.
		let network = TestNetworkView::new();
		for byte in 1..=4 {
			network.add_node(&pubkey(byte), true);
		}
		network.add_channel(&pubkey(1), &pubkey(2), 100);
		network.add_channel(&pubkey(2), &pubkey(4), 100);
		network.add_channel(&pubkey(1), &pubkey(3), 1000);
		network.add_channel(&pubkey(3), &pubkey(4), 1000);

		let path = find_path(&network, &node_id(1), &node_id(4), &logger()).unwrap();
		assert_eq!(path, vec![node_id(3), node_id(4)]);
	}

	#[test]
	fn skips_nodes_without_onion_message_support() {
		let network = TestNetworkView::new();
		network.add_node(&pubkey(1), true);
		network.add_node(&pubkey(2), false);
		network.add_node(&pubkey(3), true);
		network.add_node(&pubkey(4), true);
		network.add_channel(&pubkey(1), &pubkey(2), 100);
		network.add_channel(&pubkey(2), &pubkey(4), 100);

		// The only route runs through a node not supporting onion messages.
		assert_eq!(find_path(&network, &node_id(1), &node_id(4), &logger()), Err(Error::PathNotFound));

		// Adding a longer but capable route makes it routable.
		network.add_channel(&pubkey(1), &pubkey(3), 100);
		network.add_channel(&pubkey(3), &pubkey(4), 100);
		let path = find_path(&network, &node_id(1), &node_id(4), &logger()).unwrap();
		assert_eq!(path, vec![node_id(3), node_id(4)]);
	}

	#[test]
	fn skips_disabled_channels() {
		let network = TestNetworkView::new();
		for byte in 1..=3 {
			network.add_node(&pubkey(byte), true);
		}
		network.add_channel_with_directions(&pubkey(1), &pubkey(2), 100, true, false);
		network.add_channel(&pubkey(2), &pubkey(3), 100);

		// A channel disabled in either direction cannot carry onion messages.
		assert_eq!(find_path(&network, &node_id(1), &node_id(3), &logger()), Err(Error::PathNotFound));
	}

	#[test]
	fn rejects_route_to_self() {
		let network = TestNetworkView::new();
		network.add_node(&pubkey(1), true);
		assert_eq!(
			find_path(&network, &node_id(1), &node_id(1), &logger()),
			Err(Error::InvalidDestination)
		);
	}

	#[test]
	fn fails_when_destination_unreachable() {
		let network = TestNetworkView::new();
		network.add_node(&pubkey(1), true);
		network.add_node(&pubkey(2), true);
		assert_eq!(find_path(&network, &node_id(1), &node_id(2), &logger()), Err(Error::PathNotFound));
	}
}
