// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Tagged hashes for use in signature calculation and verification.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{self, Message, Secp256k1, XOnlyPublicKey};
use std::io::Cursor;

use crate::util::ser::{BigSize, Readable};

/// Valid type range for signature TLV records. Records in this range are excluded from the
/// merkle root so that signatures may cover it.
pub(super) const SIGNATURE_TYPES: core::ops::RangeInclusive<u64> = 240..=1000;

/// Error when signing a BOLT 12 message.
#[derive(Debug, PartialEq)]
pub enum SignError<E> {
	/// User-defined error when signing the message.
	Signing(E),
	/// Error when verifying the produced signature using the intended pubkey.
	Verification(secp256k1::Error),
}

/// Signs a message digest computed over `tlv_bytes`, checking the signature against `pubkey`
/// before returning it. Signature records within `tlv_bytes` are excluded from the digest, so
/// appending the result keeps it valid.
pub(super) fn sign_message<F, E>(
	sign: F, message_name: &str, field_name: &str, tlv_bytes: &[u8], pubkey: XOnlyPublicKey,
) -> Result<Signature, SignError<E>>
where
	F: FnOnce(&Message) -> Result<Signature, E>,
{
	let digest = message_digest(message_name, field_name, root_hash(tlv_bytes));
	let signature = sign(&digest).map_err(|e| SignError::Signing(e))?;

	let secp_ctx = Secp256k1::verification_only();
	secp_ctx.verify_schnorr(&signature, &digest, &pubkey).map_err(|e| SignError::Verification(e))?;

	Ok(signature)
}

/// Verifies the signature with a pubkey over the given message digest.
pub fn verify_signature<T: secp256k1::Verification>(
	signature: &Signature, message_name: &str, field_name: &str, tlv_bytes: &[u8],
	pubkey: XOnlyPublicKey, secp_ctx: &Secp256k1<T>,
) -> Result<(), secp256k1::Error> {
	let digest = message_digest(message_name, field_name, root_hash(tlv_bytes));
	secp_ctx.verify_schnorr(signature, &digest, &pubkey)
}

/// Computes the BIP 340 signature digest for a merkle root: a tagged hash with tag
/// `"lightning" || 0x00 || message_name || 0x00 || field_name`.
pub fn message_digest(message_name: &str, field_name: &str, root: sha256::Hash) -> Message {
	let tag = sha256::Hash::from_engine({
		let mut engine = sha256::Hash::engine();
		engine.input("lightning".as_bytes());
		engine.input(&[0]);
		engine.input(message_name.as_bytes());
		engine.input(&[0]);
		engine.input(field_name.as_bytes());
		engine
	});

	Message::from_slice(tagged_hash(tag, root).as_ref()).expect("digest is 32 bytes")
}

/// Computes a merkle root hash for the given data, which must be a well-formed TLV stream
/// containing at least one TLV record.
pub(super) fn root_hash(data: &[u8]) -> sha256::Hash {
	let mut tlv_stream = TlvStream::new(data).peekable();
	let nonce_tag = tagged_hash_engine(sha256::Hash::from_engine({
		let first_tlv_record = tlv_stream.peek().expect("at least one TLV record");
		let mut engine = sha256::Hash::engine();
		engine.input("LnNonce".as_bytes());
		engine.input(first_tlv_record.as_ref());
		engine
	}));
	let leaf_tag = tagged_hash_engine(sha256::Hash::hash("LnLeaf".as_bytes()));
	let branch_tag = tagged_hash_engine(sha256::Hash::hash("LnBranch".as_bytes()));

	let mut leaves = Vec::new();
	for record in tlv_stream {
		if !SIGNATURE_TYPES.contains(&record.r#type) {
			leaves.push(tagged_hash_from_engine(leaf_tag.clone(), &record));
			leaves.push(tagged_hash_from_engine(nonce_tag.clone(), &record.type_bytes));
		}
	}

	// Calculate the merkle root hash in place. Each pass combines adjacent pairs, leaving any
	// odd element in place to be paired at a higher level.
	let num_leaves = leaves.len();
	for level in 0.. {
		let step = 2 << level;
		let offset = step / 2;
		if offset >= num_leaves {
			break;
		}

		let left_branches = (0..num_leaves).step_by(step);
		let right_branches = (offset..num_leaves).step_by(step);
		for (i, j) in left_branches.zip(right_branches) {
			leaves[i] = tagged_branch_hash_from_engine(branch_tag.clone(), leaves[i], leaves[j]);
		}
	}

	*leaves.first().expect("at least one non-signature TLV record")
}

fn tagged_hash<T: AsRef<[u8]>>(tag: sha256::Hash, msg: T) -> sha256::Hash {
	let engine = tagged_hash_engine(tag);
	tagged_hash_from_engine(engine, msg)
}

fn tagged_hash_engine(tag: sha256::Hash) -> sha256::HashEngine {
	let mut engine = sha256::Hash::engine();
	engine.input(tag.as_ref());
	engine.input(tag.as_ref());
	engine
}

fn tagged_hash_from_engine<T: AsRef<[u8]>>(mut engine: sha256::HashEngine, msg: T) -> sha256::Hash {
	engine.input(msg.as_ref());
	sha256::Hash::from_engine(engine)
}

fn tagged_branch_hash_from_engine(
	mut engine: sha256::HashEngine, leaf1: sha256::Hash, leaf2: sha256::Hash,
) -> sha256::Hash {
	if leaf1 < leaf2 {
		engine.input(leaf1.as_ref());
		engine.input(leaf2.as_ref());
	} else {
		engine.input(leaf2.as_ref());
		engine.input(leaf1.as_ref());
	};
	sha256::Hash::from_engine(engine)
}

/// [`Iterator`] over a sequence of bytes yielding [`TlvRecord`]s. The input is assumed to be a
/// well-formed TLV stream.
pub(super) struct TlvStream<'a> {
	data: Cursor<&'a [u8]>,
}

impl<'a> TlvStream<'a> {
	pub fn new(data: &'a [u8]) -> Self {
		Self { data: Cursor::new(data) }
	}
}

/// A slice into a [`TlvStream`] for a record.
pub(super) struct TlvRecord<'a> {
	pub(super) r#type: u64,
	type_bytes: &'a [u8],
	/// The entire TLV record.
	data: &'a [u8],
}

impl AsRef<[u8]> for TlvRecord<'_> {
	fn as_ref(&self) -> &[u8] {
		&self.data
	}
}

impl<'a> Iterator for TlvStream<'a> {
	type Item = TlvRecord<'a>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.data.position() < self.data.get_ref().len() as u64 {
			let start = self.data.position();

			let r#type: BigSize = Readable::read(&mut self.data).expect("well-formed stream");
			let offset = self.data.position();
			let type_bytes = &self.data.get_ref()[start as usize..offset as usize];

			let length: BigSize = Readable::read(&mut self.data).expect("well-formed stream");
			let offset = self.data.position();
			let end = offset + length.0;

			let data = &self.data.get_ref()[start as usize..end as usize];

			self.data.set_position(end);

			Some(TlvRecord { r#type: r#type.0, type_bytes, data })
		} else {
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{root_hash, sign_message, verify_signature, SignError, TlvStream};

	use bitcoin::secp256k1::schnorr::Signature;
	use bitcoin::secp256k1::{KeyPair, Message, Secp256k1, SecretKey};
	use core::convert::Infallible;

	use crate::util::ser::{write_tlv_record, BigSize, HighZeroBytesDroppedBigSize, Writeable};

	fn tlv_bytes(records: &[(u64, &[u8])]) -> Vec<u8> {
		let mut bytes = Vec::new();
		for (r#type, value) in records {
			BigSize(*r#type).write(&mut bytes).unwrap();
			BigSize(value.len() as u64).write(&mut bytes).unwrap();
			bytes.extend_from_slice(value);
		}
		bytes
	}

	#[test]
	fn iterates_tlv_stream() {
		let bytes = tlv_bytes(&[(2, &[0xAB]), (7, &[]), (240, &[1, 2, 3])]);
		let types: Vec<u64> = TlvStream::new(&bytes).map(|record| record.r#type).collect();
		assert_eq!(types, vec![2, 7, 240]);
	}

	#[test]
	fn root_hash_excludes_signature_records() {
		let unsigned = tlv_bytes(&[(2, &[0xAB]), (10, b"foo")]);
		let mut signed = unsigned.clone();
		write_tlv_record(&mut signed, 240, &[0x55u8; 64]).unwrap();

		assert_eq!(root_hash(&unsigned), root_hash(&signed));
	}

	#[test]
	fn root_hash_covers_unknown_odd_records() {
		let bytes = tlv_bytes(&[(2, &[0xAB]), (10, b"foo")]);
		let with_odd = tlv_bytes(&[(2, &[0xAB]), (9, &[0x01]), (10, b"foo")]);

		assert_ne!(root_hash(&bytes), root_hash(&with_odd));
	}

	#[test]
	fn root_hash_changes_with_any_field() {
		let bytes = tlv_bytes(&[(2, &[0xAB]), (10, b"foo")]);
		let mutated = tlv_bytes(&[(2, &[0xAC]), (10, b"foo")]);

		assert_ne!(root_hash(&bytes), root_hash(&mutated));
	}

	#[test]
	fn signs_and_verifies_digest() {
		let secp_ctx = Secp256k1::new();
		let keys = KeyPair::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[42; 32]).unwrap());
		let pubkey = keys.x_only_public_key().0;
		let bytes = tlv_bytes(&[(2, &[0xAB]), (10, b"foo")]);

		let signature = sign_message::<_, Infallible>(
			|digest| Ok(secp_ctx.sign_schnorr_no_aux_rand(digest, &keys)),
			"offer",
			"signature",
			&bytes,
			pubkey,
		)
		.unwrap();
		assert!(
			verify_signature(&signature, "offer", "signature", &bytes, pubkey, &secp_ctx).is_ok()
		);

		// Domain separation: the same root under a different message or field name must not
		// verify.
		assert!(
			verify_signature(&signature, "invoice", "signature", &bytes, pubkey, &secp_ctx)
				.is_err()
		);
		assert!(verify_signature(
			&signature,
			"offer",
			"recurrence_signature",
			&bytes,
			pubkey,
			&secp_ctx
		)
		.is_err());

		// Mutating the message invalidates the signature.
		let mutated = tlv_bytes(&[(2, &[0xAB]), (10, b"bar")]);
		assert!(
			verify_signature(&signature, "offer", "signature", &mutated, pubkey, &secp_ctx)
				.is_err()
		);
	}

	#[test]
	fn sign_message_rejects_wrong_key() {
		let secp_ctx = Secp256k1::new();
		let keys = KeyPair::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[42; 32]).unwrap());
		let other_keys =
			KeyPair::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[43; 32]).unwrap());
		let bytes = tlv_bytes(&[(2, &[0xAB])]);

		match sign_message::<_, Infallible>(
			|digest| Ok(secp_ctx.sign_schnorr_no_aux_rand(digest, &other_keys)),
			"offer",
			"signature",
			&bytes,
			keys.x_only_public_key().0,
		) {
			Err(SignError::Verification(_)) => {},
			result => panic!("expected verification error, got {:?}", result),
		}
	}

	#[test]
	fn signature_type_encodes_as_tu64_boundary() {
		// Signature records use two-byte bigsize types; make sure the iterator handles them.
		let mut bytes = tlv_bytes(&[(2, &[0xAB])]);
		write_tlv_record(&mut bytes, 242, &HighZeroBytesDroppedBigSize(7u64)).unwrap();
		let types: Vec<u64> = TlvStream::new(&bytes).map(|record| record.r#type).collect();
		assert_eq!(types, vec![2, 242]);
	}

	#[test]
	fn signature_serialization_is_64_bytes() {
		let secp_ctx = Secp256k1::new();
		let keys = KeyPair::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[42; 32]).unwrap());
		let digest = Message::from_slice(&[44; 32]).unwrap();
		let signature = secp_ctx.sign_schnorr_no_aux_rand(&digest, &keys);
		let encoded = signature.encode();
		assert_eq!(encoded.len(), 64);
		let decoded: Signature =
			crate::util::ser::Readable::read(&mut &encoded[..]).unwrap();
		assert_eq!(decoded, signature);
	}
}
