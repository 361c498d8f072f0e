// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Feature flag definitions for the Lightning protocol according to [BOLT #9].
//!
//! Flags are kept in the big-endian wire order: bit `n` lives in byte `len - 1 - n / 8`. Even
//! bits are required features ("it's ok to be odd"); an offer or invoice_request carrying an
//! unknown even bit must not be acted upon.
//!
//! [BOLT #9]: https://github.com/lightning/bolts/blob/master/09-features.md

use std::io::{self, Read};

use crate::ln::msgs::DecodeError;
use crate::util::ser::{Readable, WithoutLength, Writeable, Writer};

/// The feature bit advertising support for relaying and receiving onion messages. Nodes along an
/// onion message route must set it for the route to be usable.
pub const ONION_MESSAGES_REQUIRED: usize = 38;
/// The optional counterpart of [`ONION_MESSAGES_REQUIRED`].
pub const ONION_MESSAGES_OPTIONAL: usize = 39;

/// A feature bit vector as exchanged in offers, invoice_requests, and invoices.
///
/// This crate interprets no BOLT 12 feature bits itself, so the only semantic operation is
/// [`Features::requires_unknown_bits`]; the vector is otherwise carried opaquely.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Features {
	/// Note that, for convenience, flags is LITTLE endian with respect to the byte order on the
	/// wire; [`Features::le_flags`] reverses it back when serializing.
	flags: Vec<u8>,
}

impl Features {
	/// Creates a blank feature vector.
	pub fn empty() -> Self {
		Self { flags: Vec::new() }
	}

	/// Creates a feature vector from wire bytes (big-endian bit order).
	pub fn from_be_bytes(mut bytes: Vec<u8>) -> Self {
		bytes.reverse();
		Self { flags: bytes }
	}

	/// The wire serialization of the feature vector.
	pub fn le_flags(&self) -> Vec<u8> {
		let mut bytes = self.flags.clone();
		bytes.reverse();
		bytes
	}

	/// Whether the vector has no bits set.
	pub fn is_empty(&self) -> bool {
		self.flags.iter().all(|&b| b == 0)
	}

	/// Sets the given feature bit.
	pub fn set_bit(&mut self, bit: usize) {
		let byte = bit / 8;
		if byte >= self.flags.len() {
			self.flags.resize(byte + 1, 0);
		}
		self.flags[byte] |= 1 << (bit % 8);
	}

	/// Whether the given feature bit is set.
	pub fn supports_bit(&self, bit: usize) -> bool {
		let byte = bit / 8;
		byte < self.flags.len() && self.flags[byte] & (1 << (bit % 8)) != 0
	}

	/// Whether the vector requires features this crate does not know, i.e. carries any even bit.
	/// BOLT 12 messages with such bits set must not be responded to.
	pub fn requires_unknown_bits(&self) -> bool {
		// Even (required) bits are the low bit of each pair.
		const REQUIRED_BITS_MASK: u8 = 0b01_01_01_01;
		self.flags.iter().any(|&byte| byte & REQUIRED_BITS_MASK != 0)
	}
}

impl Writeable for Features {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		WithoutLength(&self.le_flags()).write(w)
	}
}

impl Readable for Features {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let bytes: WithoutLength<Vec<u8>> = Readable::read(r)?;
		Ok(Features::from_be_bytes(bytes.0))
	}
}

#[cfg(test)]
mod tests {
	use super::{Features, ONION_MESSAGES_OPTIONAL};
	use crate::util::ser::Writeable;

	#[test]
	fn set_and_query_bits() {
		let mut features = Features::empty();
		assert!(features.is_empty());
		assert!(!features.requires_unknown_bits());

		features.set_bit(ONION_MESSAGES_OPTIONAL);
		assert!(features.supports_bit(ONION_MESSAGES_OPTIONAL));
		assert!(!features.supports_bit(ONION_MESSAGES_OPTIONAL - 1));
		assert!(!features.requires_unknown_bits());

		features.set_bit(12);
		assert!(features.requires_unknown_bits());
	}

	#[test]
	fn wire_order_round_trips() {
		let mut features = Features::empty();
		features.set_bit(9);
		let bytes = features.encode();
		assert_eq!(bytes, vec![0b10, 0]);
		assert_eq!(Features::from_be_bytes(bytes), features);
	}
}
