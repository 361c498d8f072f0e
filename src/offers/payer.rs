// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Derivation of per-request payer keys.
//!
//! Re-using one key across invoice_requests would let merchants correlate a payer's purchases.
//! Instead the node keeps a stable base key and tweaks it per request with
//! `SHA256(base_pubkey || payer_info)`, where `payer_info` is 16 random bytes carried in the
//! request. The signer performs the matching scalar-side tweak, so requests remain signable
//! while the tweak input alone reveals nothing about the base key.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{self, Scalar, Secp256k1, XOnlyPublicKey};

/// Number of random bytes to mint for [`payer_info`].
///
/// [`payer_info`]: crate::offers::invoice_request::InvoiceRequest::payer_info
pub const PAYER_INFO_LENGTH: usize = 16;

/// Error when a tweak does not produce a usable key. Occurs with negligible probability for
/// random `payer_info`, so fresh requests simply retry with new bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidTweak;

/// Computes the tweak scalar input `SHA256(base_pubkey || payer_info)`.
fn payer_key_tweak(base: &XOnlyPublicKey, payer_info: &[u8]) -> sha256::Hash {
	let mut engine = sha256::Hash::engine();
	engine.input(&base.serialize());
	engine.input(payer_info);
	sha256::Hash::from_engine(engine)
}

/// Derives the x-only payer pubkey for a request from the node's base pubkey and the request's
/// `payer_info` bytes.
pub fn derive_payer_key<T: secp256k1::Verification>(
	secp_ctx: &Secp256k1<T>, base: &XOnlyPublicKey, payer_info: &[u8],
) -> Result<XOnlyPublicKey, InvalidTweak> {
	let tweak = payer_key_tweak(base, payer_info);
	let scalar = Scalar::from_be_bytes(tweak.into_inner()).map_err(|_| InvalidTweak)?;
	let (payer_key, _parity) = base.add_tweak(secp_ctx, &scalar).map_err(|_| InvalidTweak)?;
	Ok(payer_key)
}

#[cfg(test)]
mod tests {
	use super::{derive_payer_key, payer_key_tweak};
	use bitcoin::hashes::Hash;
	use bitcoin::secp256k1::{KeyPair, Scalar, Secp256k1, SecretKey};

	#[test]
	fn derivation_is_deterministic_and_tweak_sensitive() {
		let secp_ctx = Secp256k1::new();
		let base =
			KeyPair::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[41; 32]).unwrap())
				.x_only_public_key()
				.0;

		let payer_info = [0xAB; 16];
		let key = derive_payer_key(&secp_ctx, &base, &payer_info).unwrap();
		assert_eq!(key, derive_payer_key(&secp_ctx, &base, &payer_info).unwrap());
		assert_ne!(key, base);

		let other_info = [0xAC; 16];
		assert_ne!(key, derive_payer_key(&secp_ctx, &base, &other_info).unwrap());
	}

	#[test]
	fn derived_key_matches_scalar_side_tweak() {
		// The signer tweaks its secret key; the resulting public key must be what we derived.
		let secp_ctx = Secp256k1::new();
		let base_keys =
			KeyPair::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[41; 32]).unwrap());
		let base = base_keys.x_only_public_key().0;

		let payer_info = [7; 16];
		let derived = derive_payer_key(&secp_ctx, &base, &payer_info).unwrap();

		let tweak = payer_key_tweak(&base, &payer_info);
		let scalar = Scalar::from_be_bytes(tweak.into_inner()).unwrap();
		let tweaked_keys = base_keys.add_xonly_tweak(&secp_ctx, &scalar).unwrap();
		assert_eq!(derived, tweaked_keys.x_only_public_key().0);
	}
}
