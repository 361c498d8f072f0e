// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! In-memory fakes for the engine's collaborator traits.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{KeyPair, PublicKey, Scalar, Secp256k1, XOnlyPublicKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::blinded_path::ReplyPath;
use crate::offers::flow::{OfferRecord, OfferStatus, PaymentRecord, Wallet};
use crate::offers::merkle::message_digest;
use crate::offers::offer::OfferId;
use crate::onion_message::{MessageHop, Transport, TransportError};
use crate::routing::gossip::{DirectedChannel, NetworkView, NodeId};
use crate::sign::{Bolt12Signer, EntropySource, SignerError};
use crate::util::logger::{Logger, Record};

/// A logger recording formatted lines for assertions.
pub struct TestLogger {
	lines: Mutex<Vec<String>>,
}

impl TestLogger {
	pub fn new() -> Self {
		TestLogger { lines: Mutex::new(Vec::new()) }
	}

	pub fn lines_containing(&self, needle: &str) -> usize {
		self.lines.lock().unwrap().iter().filter(|line| line.contains(needle)).count()
	}
}

impl Logger for TestLogger {
	fn log(&self, record: &Record) {
		self.lines
			.lock()
			.unwrap()
			.push(format!("{} {} {}", record.level, record.module_path, record.args));
	}
}

/// A deterministic entropy source: each call yields the next counter value repeated.
pub struct TestEntropy {
	counter: AtomicU8,
}

impl TestEntropy {
	pub fn new() -> Self {
		TestEntropy { counter: AtomicU8::new(0) }
	}
}

impl EntropySource for TestEntropy {
	fn get_secure_random_bytes(&self) -> [u8; 32] {
		let value = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
		[value; 32]
	}
}

/// An in-process stand-in for the external signing process, holding the node identity key and
/// the payer base key.
pub struct TestSigner {
	secp_ctx: Secp256k1<bitcoin::secp256k1::All>,
	node: KeyPair,
	payer_base: KeyPair,
	corrupt_signatures: AtomicBool,
	unavailable: AtomicBool,
}

impl TestSigner {
	pub fn new(node: KeyPair, payer_base: KeyPair) -> Self {
		TestSigner {
			secp_ctx: Secp256k1::new(),
			node,
			payer_base,
			corrupt_signatures: AtomicBool::new(false),
			unavailable: AtomicBool::new(false),
		}
	}

	pub fn node_pubkey(&self) -> XOnlyPublicKey {
		self.node.x_only_public_key().0
	}

	pub fn payer_base_pubkey(&self) -> XOnlyPublicKey {
		self.payer_base.x_only_public_key().0
	}

	/// Makes every subsequent signature invalid, simulating a buggy signer.
	pub fn corrupt_signatures(&self) {
		self.corrupt_signatures.store(true, Ordering::SeqCst);
	}

	/// Makes every subsequent request fail, simulating a dead signer.
	pub fn go_away(&self) {
		self.unavailable.store(true, Ordering::SeqCst);
	}
}

impl Bolt12Signer for TestSigner {
	fn sign_bolt12(
		&self, message_name: &str, field_name: &str, merkle_root: &sha256::Hash,
		payer_info: Option<&[u8]>,
	) -> Result<Signature, SignerError> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(SignerError::Unavailable);
		}

		let keys = match payer_info {
			None => self.node,
			Some(payer_info) => {
				let tweak = {
					let mut engine = sha256::Hash::engine();
					engine.input(&self.payer_base.x_only_public_key().0.serialize());
					engine.input(payer_info);
					sha256::Hash::from_engine(engine)
				};
				self.payer_base
					.add_xonly_tweak(
						&self.secp_ctx,
						&Scalar::from_be_bytes(tweak.into_inner()).map_err(|_| SignerError::Unavailable)?,
					)
					.map_err(|_| SignerError::Unavailable)?
			},
		};

		let digest = message_digest(message_name, field_name, *merkle_root);
		let signature = self.secp_ctx.sign_schnorr_no_aux_rand(&digest, &keys);

		if self.corrupt_signatures.load(Ordering::SeqCst) {
			let mut bytes = [0u8; 64];
			bytes.copy_from_slice(signature.as_ref());
			bytes[0] ^= 1;
			return Ok(Signature::from_slice(&bytes).expect("still 64 bytes"));
		}

		Ok(signature)
	}
}

/// A transport capturing every send for inspection.
pub struct TestTransport {
	sent: Mutex<Vec<(Vec<MessageHop>, ReplyPath)>>,
	fail_sends: AtomicBool,
}

impl TestTransport {
	pub fn new() -> Self {
		TestTransport { sent: Mutex::new(Vec::new()), fail_sends: AtomicBool::new(false) }
	}

	pub fn sent_count(&self) -> usize {
		self.sent.lock().unwrap().len()
	}

	pub fn last_sent(&self) -> (Vec<MessageHop>, ReplyPath) {
		self.sent.lock().unwrap().last().cloned().expect("nothing was sent")
	}

	pub fn fail_sends(&self) {
		self.fail_sends.store(true, Ordering::SeqCst);
	}
}

impl Transport for TestTransport {
	fn send_onion_message(
		&self, hops: &[MessageHop], reply_path: &ReplyPath,
	) -> Result<(), TransportError> {
		if self.fail_sends.load(Ordering::SeqCst) {
			return Err(TransportError::SendFailed("transport gone".to_string()));
		}
		self.sent.lock().unwrap().push((hops.to_vec(), reply_path.clone()));
		Ok(())
	}
}

/// An in-memory network graph.
pub struct TestNetworkView {
	nodes: Mutex<HashMap<NodeId, bool>>,
	channels: Mutex<Vec<(NodeId, NodeId, bool, bool, u64)>>,
}

impl TestNetworkView {
	pub fn new() -> Self {
		TestNetworkView { nodes: Mutex::new(HashMap::new()), channels: Mutex::new(Vec::new()) }
	}

	pub fn add_node(&self, pubkey: &PublicKey, supports_onion_messages: bool) {
		self.nodes.lock().unwrap().insert(NodeId::from_pubkey(pubkey), supports_onion_messages);
	}

	/// Adds a channel enabled in both directions.
	pub fn add_channel(&self, a: &PublicKey, b: &PublicKey, capacity_msat: u64) {
		self.add_channel_with_directions(a, b, capacity_msat, true, true);
	}

	pub fn add_channel_with_directions(
		&self, a: &PublicKey, b: &PublicKey, capacity_msat: u64, enabled_ab: bool,
		enabled_ba: bool,
	) {
		self.channels.lock().unwrap().push((
			NodeId::from_pubkey(a),
			NodeId::from_pubkey(b),
			enabled_ab,
			enabled_ba,
			capacity_msat,
		));
	}
}

impl NetworkView for TestNetworkView {
	fn refresh(&self) {}

	fn contains_node(&self, node_id: &NodeId) -> bool {
		self.nodes.lock().unwrap().contains_key(node_id)
	}

	fn resolve_node(&self, node_id: &XOnlyPublicKey) -> Option<NodeId> {
		let serialized = node_id.serialize();
		for parity in [0x02u8, 0x03] {
			let mut bytes = [0u8; 33];
			bytes[0] = parity;
			bytes[1..].copy_from_slice(&serialized);
			if let Ok(pubkey) = PublicKey::from_slice(&bytes) {
				let candidate = NodeId::from_pubkey(&pubkey);
				if self.contains_node(&candidate) {
					return Some(candidate);
				}
			}
		}
		None
	}

	fn channels(&self, node_id: &NodeId) -> Vec<DirectedChannel> {
		let mut channels = Vec::new();
		for (a, b, enabled_ab, enabled_ba, capacity_msat) in
			self.channels.lock().unwrap().iter()
		{
			if a == node_id {
				channels.push(DirectedChannel {
					counterparty: *b,
					enabled: *enabled_ab,
					counterparty_enabled: *enabled_ba,
					capacity_msat: *capacity_msat,
				});
			} else if b == node_id {
				channels.push(DirectedChannel {
					counterparty: *a,
					enabled: *enabled_ba,
					counterparty_enabled: *enabled_ab,
					capacity_msat: *capacity_msat,
				});
			}
		}
		channels
	}

	fn supports_onion_messages(&self, node_id: &NodeId) -> bool {
		self.nodes.lock().unwrap().get(node_id).copied().unwrap_or(false)
	}
}

/// An in-memory wallet store.
pub struct TestWallet {
	offers: Mutex<HashMap<OfferId, OfferRecord>>,
	payments: Mutex<Vec<PaymentRecord>>,
}

impl TestWallet {
	pub fn new() -> Self {
		TestWallet { offers: Mutex::new(HashMap::new()), payments: Mutex::new(Vec::new()) }
	}

	pub fn add_payment(&self, payment: PaymentRecord) {
		self.payments.lock().unwrap().push(payment);
	}

	pub fn offer_status(&self, offer_id: &OfferId) -> Option<OfferStatus> {
		self.offers.lock().unwrap().get(offer_id).map(|record| record.status)
	}
}

impl Wallet for TestWallet {
	fn create_offer(&self, offer_id: &OfferId, record: OfferRecord) -> bool {
		let mut offers = self.offers.lock().unwrap();
		if offers.contains_key(offer_id) {
			return false;
		}
		offers.insert(*offer_id, record);
		true
	}

	fn find_offer(&self, offer_id: &OfferId) -> Option<OfferRecord> {
		self.offers.lock().unwrap().get(offer_id).cloned()
	}

	fn list_offer_ids(&self) -> Vec<OfferId> {
		let mut ids: Vec<OfferId> = self.offers.lock().unwrap().keys().copied().collect();
		ids.sort();
		ids
	}

	fn set_offer_status(&self, offer_id: &OfferId, status: OfferStatus) {
		if let Some(record) = self.offers.lock().unwrap().get_mut(offer_id) {
			record.status = status;
		}
	}

	fn payments_by_label(&self, label: &str) -> Vec<PaymentRecord> {
		self.payments
			.lock()
			.unwrap()
			.iter()
			.filter(|payment| payment.label.as_deref() == Some(label))
			.cloned()
			.collect()
	}
}
