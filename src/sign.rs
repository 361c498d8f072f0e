// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Capability traits for entropy and for the external signing process.
//!
//! The node identity key and the payer base secret never enter this crate. Signing happens in a
//! separate, trusted process reached through [`Bolt12Signer`]; the crate holds only public keys
//! and tweak inputs.

use bitcoin::hashes::sha256;
use bitcoin::secp256k1::schnorr::Signature;
use core::fmt;

/// A source of cryptographically secure randomness.
pub trait EntropySource {
	/// Gets a unique, cryptographically-secure random 32-byte value.
	fn get_secure_random_bytes(&self) -> [u8; 32];
}

/// Error from the signing process. The signer is trusted infrastructure, so these are treated
/// as fatal by callers; there is no graceful recovery from a dead signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignerError {
	/// The signer process could not be reached or returned an unreadable reply.
	Unavailable,
	/// The signer returned a signature which does not verify against the expected key.
	InvalidSignature,
}

impl fmt::Display for SignerError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			SignerError::Unavailable => write!(f, "Signer unavailable"),
			SignerError::InvalidSignature => write!(f, "Signer returned an invalid signature"),
		}
	}
}

/// The external signer owning the node identity key and the payer base key.
///
/// Requests are serialized by the caller; implementations may assume at most one outstanding
/// request at a time.
pub trait Bolt12Signer {
	/// Produces a BIP 340 signature over the [BOLT 12 signature digest] for `merkle_root`,
	/// domain-separated by `message_name` and `field_name`.
	///
	/// With `payer_info` unset, signs with the node identity key. With `payer_info` set, signs
	/// with the payer base key tweaked by `SHA256(payer_base_pubkey || payer_info)`, matching
	/// [`derive_payer_key`].
	///
	/// [BOLT 12 signature digest]: crate::offers::merkle::message_digest
	/// [`derive_payer_key`]: crate::offers::payer::derive_payer_key
	fn sign_bolt12(
		&self, message_name: &str, field_name: &str, merkle_root: &sha256::Hash,
		payer_info: Option<&[u8]>,
	) -> Result<Signature, SignerError>;
}
