// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Creating blinded paths and related utilities live here.

pub(crate) mod utils;

use bitcoin::secp256k1::PublicKey;
use std::io::{self, Read};

use crate::ln::msgs::DecodeError;
use crate::util::ser::{Readable, Writeable, Writer};

/// Onion messages and payments can be sent and received to blinded paths, which serve to hide
/// the identity of the recipient.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BlindedPath {
	/// To send to a blinded path, the sender first finds a route to the unblinded
	/// `introduction_node_id`, which can unblind its [`encrypted_payload`] to find out the onion
	/// message or payment's next hop and forward it along.
	///
	/// [`encrypted_payload`]: BlindedHop::encrypted_payload
	pub introduction_node_id: PublicKey,
	/// Used by the introduction node to decrypt its [`encrypted_payload`] to forward the onion
	/// message or payment.
	///
	/// [`encrypted_payload`]: BlindedHop::encrypted_payload
	pub blinding_point: PublicKey,
	/// The hops composing the blinded path.
	pub blinded_hops: Vec<BlindedHop>,
}

/// Used to construct the blinded hops portion of a blinded path. These hops cannot be identified
/// by outside observers and thus can be used to hide the identity of the recipient.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BlindedHop {
	/// The blinded node id of this hop in a blinded path.
	pub blinded_node_id: PublicKey,
	/// The encrypted payload intended for this hop in a blinded path.
	// The node sending to this blinded path will later encode this payload into the onion packet
	// for this hop.
	pub encrypted_payload: Vec<u8>,
}

/// A blinded return route handed to the receiver of an onion message so it can reply without
/// learning who asked.
///
/// The party building the path remembers the blinding point its own (final) hop will observe;
/// that [`reply_blinding`] doubles as the correlation token for matching the eventual reply to
/// the outstanding request.
///
/// [`reply_blinding`]: crate::blinded_path::utils::construct_reply_path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyPath {
	/// The blinding point for the first hop of the path.
	pub blinding: PublicKey,
	/// The hops to relay the reply along, ending at the path's creator.
	pub hops: Vec<BlindedHop>,
}

impl Writeable for BlindedHop {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.blinded_node_id.write(w)?;
		self.encrypted_payload.write(w)
	}
}

impl Readable for BlindedHop {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let blinded_node_id = Readable::read(r)?;
		let encrypted_payload = Readable::read(r)?;
		Ok(BlindedHop { blinded_node_id, encrypted_payload })
	}
}

impl Writeable for BlindedPath {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.introduction_node_id.write(w)?;
		self.blinding_point.write(w)?;
		(self.blinded_hops.len() as u8).write(w)?;
		for hop in &self.blinded_hops {
			hop.write(w)?;
		}
		Ok(())
	}
}

impl Readable for BlindedPath {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let introduction_node_id = Readable::read(r)?;
		let blinding_point = Readable::read(r)?;
		let num_hops: u8 = Readable::read(r)?;
		if num_hops == 0 {
			return Err(DecodeError::InvalidValue);
		}
		let mut blinded_hops: Vec<BlindedHop> = Vec::with_capacity(num_hops.into());
		for _ in 0..num_hops {
			blinded_hops.push(Readable::read(r)?);
		}
		Ok(BlindedPath { introduction_node_id, blinding_point, blinded_hops })
	}
}
