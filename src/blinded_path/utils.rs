// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Onion message blinding utilities live here.

use bitcoin::hashes::hmac::{Hmac, HmacEngine};
use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::secp256k1::ecdh::SharedSecret;
use bitcoin::secp256k1::{self, PublicKey, Scalar, Secp256k1, SecretKey, XOnlyPublicKey};
use std::io;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::blinded_path::{BlindedHop, ReplyPath};
use crate::util::ser::{write_tlv_record, Writeable, Writer};

const ENCTLV_NEXT_NODE_ID_TYPE: u64 = 4;

/// Derives the symmetric key for a hop's encrypted payload from its ECDH shared secret.
pub(crate) fn gen_rho_from_shared_secret(shared_secret: &[u8; 32]) -> [u8; 32] {
	let mut hmac = HmacEngine::<Sha256>::new(b"rho");
	hmac.input(shared_secret);
	Hmac::from_engine(hmac).into_inner()
}

/// Derives the tweak blinding a hop's real node id on the path.
pub(crate) fn blinded_node_id_tweak(shared_secret: &[u8; 32]) -> [u8; 32] {
	let mut hmac = HmacEngine::<Sha256>::new(b"blinded_node_id");
	hmac.input(shared_secret);
	Hmac::from_engine(hmac).into_inner()
}

/// Derives the factor evolving the blinding point from one hop to the next:
/// `SHA256(E_i || ss_i)`.
pub(crate) fn next_blinding_factor(blinding_point: &PublicKey, shared_secret: &[u8; 32]) -> [u8; 32] {
	let mut sha = Sha256::engine();
	sha.input(&blinding_point.serialize());
	sha.input(shared_secret);
	Sha256::from_engine(sha).into_inner()
}

/// The TLV payload telling an intermediate hop where to relay next.
struct ForwardTlvs {
	next_node_id: PublicKey,
}

impl Writeable for ForwardTlvs {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		write_tlv_record(writer, ENCTLV_NEXT_NODE_ID_TYPE, &self.next_node_id)
	}
}

/// The TLV payload for the final hop: nothing to relay, receipt is the signal.
struct ReceiveTlvs {}

impl Writeable for ReceiveTlvs {
	fn write<W: Writer>(&self, _writer: &mut W) -> Result<(), io::Error> {
		Ok(())
	}
}

/// Constructs a blinded reply path over `node_pks`, which must end with the constructing node's
/// own id so the reply comes all the way back.
///
/// Returns the path to hand to the far end along with the blinding point the final (our) hop
/// will observe on the inbound reply. The latter is the correlation token: no other party ever
/// learns it, and it is unique per `session_priv`.
pub(crate) fn construct_reply_path<T: secp256k1::Signing + secp256k1::Verification>(
	secp_ctx: &Secp256k1<T>, node_pks: &[PublicKey], session_priv: &SecretKey,
) -> Result<(ReplyPath, XOnlyPublicKey), secp256k1::Error> {
	debug_assert!(!node_pks.is_empty());

	let mut blinding_priv = session_priv.clone();
	let mut blinding_point = PublicKey::from_secret_key(secp_ctx, &blinding_priv);
	let first_blinding = blinding_point;

	let mut hops = Vec::with_capacity(node_pks.len());
	for (i, pk) in node_pks.iter().enumerate() {
		let shared_secret = SharedSecret::new(pk, &blinding_priv).secret_bytes();

		let blinded_node_id = pk.mul_tweak(
			secp_ctx,
			&Scalar::from_be_bytes(blinded_node_id_tweak(&shared_secret))
				.map_err(|_| secp256k1::Error::InvalidTweak)?,
		)?;

		let rho = gen_rho_from_shared_secret(&shared_secret);
		let encrypted_payload = if i + 1 < node_pks.len() {
			encrypt_payload(&ForwardTlvs { next_node_id: node_pks[i + 1] }, rho)
		} else {
			encrypt_payload(&ReceiveTlvs {}, rho)
		};
		hops.push(BlindedHop { blinded_node_id, encrypted_payload });

		if i + 1 < node_pks.len() {
			let factor = next_blinding_factor(&blinding_point, &shared_secret);
			blinding_priv = blinding_priv
				.mul_tweak(&Scalar::from_be_bytes(factor).map_err(|_| secp256k1::Error::InvalidTweak)?)?;
			blinding_point = PublicKey::from_secret_key(secp_ctx, &blinding_priv);
		}
	}

	let reply_blinding = blinding_point.x_only_public_key().0;
	Ok((ReplyPath { blinding: first_blinding, hops }, reply_blinding))
}

/// Encrypts a TLV payload to be used as a [`BlindedHop::encrypted_payload`].
fn encrypt_payload<P: Writeable>(payload: &P, rho: [u8; 32]) -> Vec<u8> {
	let plaintext = payload.encode();
	let cipher = ChaCha20Poly1305::new(Key::from_slice(&rho));
	cipher
		.encrypt(Nonce::from_slice(&[0u8; 12]), plaintext.as_slice())
		.expect("in-memory encryption cannot fail")
}

#[cfg(test)]
mod tests {
	use super::{
		construct_reply_path, gen_rho_from_shared_secret, next_blinding_factor,
		blinded_node_id_tweak,
	};

	use bitcoin::secp256k1::ecdh::SharedSecret;
	use bitcoin::secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};

	use chacha20poly1305::aead::{Aead, KeyInit};
	use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

	fn privkey(byte: u8) -> SecretKey {
		SecretKey::from_slice(&[byte; 32]).unwrap()
	}

	fn pubkey(byte: u8) -> PublicKey {
		PublicKey::from_secret_key(&Secp256k1::new(), &privkey(byte))
	}

	#[test]
	fn builds_one_blinded_hop_per_node() {
		let secp_ctx = Secp256k1::new();
		let node_pks = [pubkey(43), pubkey(44), pubkey(45)];

		let (reply_path, reply_blinding) =
			construct_reply_path(&secp_ctx, &node_pks, &privkey(3)).unwrap();

		assert_eq!(reply_path.hops.len(), 3);
		assert_eq!(reply_path.blinding, PublicKey::from_secret_key(&secp_ctx, &privkey(3)));
		// No hop is identifiable by its real node id.
		for (hop, pk) in reply_path.hops.iter().zip(node_pks.iter()) {
			assert_ne!(hop.blinded_node_id, *pk);
		}
		// The correlation token is not any on-path value an observer sees directly.
		assert_ne!(reply_blinding, reply_path.blinding.x_only_public_key().0);
	}

	#[test]
	fn construction_is_deterministic_per_session_key() {
		let secp_ctx = Secp256k1::new();
		let node_pks = [pubkey(43), pubkey(44)];

		let (path_a, blinding_a) = construct_reply_path(&secp_ctx, &node_pks, &privkey(3)).unwrap();
		let (path_b, blinding_b) = construct_reply_path(&secp_ctx, &node_pks, &privkey(3)).unwrap();
		assert_eq!(path_a, path_b);
		assert_eq!(blinding_a, blinding_b);

		let (_, blinding_c) = construct_reply_path(&secp_ctx, &node_pks, &privkey(4)).unwrap();
		assert_ne!(blinding_a, blinding_c);
	}

	#[test]
	fn hops_can_process_the_path() {
		// Walk the path as each hop would: unblind the payload, read the next node id, and
		// evolve the blinding point. The blinding observed by the final hop must equal the
		// returned correlation token.
		let secp_ctx = Secp256k1::new();
		let hop_privkeys = [privkey(43), privkey(44), privkey(45)];
		let node_pks: Vec<PublicKey> =
			hop_privkeys.iter().map(|sk| PublicKey::from_secret_key(&secp_ctx, sk)).collect();

		let (reply_path, reply_blinding) =
			construct_reply_path(&secp_ctx, &node_pks, &privkey(3)).unwrap();

		let mut blinding_point = reply_path.blinding;
		for (i, hop_privkey) in hop_privkeys.iter().enumerate() {
			let shared_secret = SharedSecret::new(&blinding_point, hop_privkey).secret_bytes();

			// The hop can confirm the packet is addressed to it.
			let blinded_id = node_pks[i]
				.mul_tweak(&secp_ctx, &Scalar::from_be_bytes(blinded_node_id_tweak(&shared_secret)).unwrap())
				.unwrap();
			assert_eq!(blinded_id, reply_path.hops[i].blinded_node_id);

			// And decrypt its payload.
			let rho = gen_rho_from_shared_secret(&shared_secret);
			let cipher = ChaCha20Poly1305::new(Key::from_slice(&rho));
			let plaintext = cipher
				.decrypt(
					Nonce::from_slice(&[0u8; 12]),
					reply_path.hops[i].encrypted_payload.as_slice(),
				)
				.unwrap();

			if i + 1 < hop_privkeys.len() {
				// TLV record 4 carrying the next node id.
				assert_eq!(plaintext.len(), 2 + 33);
				assert_eq!(plaintext[0], 4);
				assert_eq!(plaintext[1], 33);
				assert_eq!(PublicKey::from_slice(&plaintext[2..]).unwrap(), node_pks[i + 1]);

				let factor = next_blinding_factor(&blinding_point, &shared_secret);
				blinding_point = blinding_point
					.mul_tweak(&secp_ctx, &Scalar::from_be_bytes(factor).unwrap())
					.unwrap();
			} else {
				assert!(plaintext.is_empty());
			}
		}

		assert_eq!(blinding_point.x_only_public_key().0, reply_blinding);
	}
}
