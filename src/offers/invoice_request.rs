// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Data structures and encoding for `invoice_request` messages.
//!
//! An [`InvoiceRequest`] can be built from a parsed [`Offer`] as an "offer to be paid". It is
//! typically constructed by a customer and sent to the merchant who had published the
//! corresponding offer. The recipient of the request responds with an [`Invoice`].
//!
//! [`Offer`]: crate::offers::offer::Offer
//! [`Invoice`]: crate::offers::invoice::Invoice

use bitcoin::blockdata::constants::ChainHash;
use bitcoin::hashes::sha256;
use bitcoin::network::constants::Network;
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{self, Message, Secp256k1, XOnlyPublicKey};
use core::fmt;
use core::str::FromStr;
use std::io::{self, Read, Seek};

use crate::ln::features::Features;
use crate::ln::msgs::DecodeError;
use crate::offers::merkle::{self, root_hash, SignError};
use crate::offers::offer::{Offer, OfferId};
use crate::offers::parse::{Bech32Encode, ParseError, ParsedMessage, SemanticError};
use crate::util::ser::{
	read_tlv_stream, write_tlv_record, HighZeroBytesDroppedBigSize, Readable, SeekReadable,
	Writeable, WithoutLength, Writer,
};
use crate::util::string::PrintableString;

const INVREQ_CHAINS_TYPE: u64 = 2;
const INVREQ_OFFER_ID_TYPE: u64 = 4;
const INVREQ_AMOUNT_TYPE: u64 = 8;
const INVREQ_FEATURES_TYPE: u64 = 12;
const INVREQ_QUANTITY_TYPE: u64 = 32;
const INVREQ_RECURRENCE_COUNTER_TYPE: u64 = 36;
const INVREQ_PAYER_KEY_TYPE: u64 = 38;
const INVREQ_PAYER_NOTE_TYPE: u64 = 39;
const INVREQ_PAYER_INFO_TYPE: u64 = 50;
const INVREQ_RECURRENCE_START_TYPE: u64 = 68;
const RECURRENCE_SIGNATURE_TYPE: u64 = 242;

/// Builds an [`InvoiceRequest`] from an [`Offer`] for the "offer to be paid" flow.
///
/// Obtained through [`Offer::request_invoice`].
pub struct InvoiceRequestBuilder<'a> {
	offer: &'a Offer,
	invreq: InvoiceRequestContents,
}

impl<'a> InvoiceRequestBuilder<'a> {
	pub(super) fn new(offer: &'a Offer) -> Self {
		Self {
			offer,
			invreq: InvoiceRequestContents {
				chains: None,
				offer_id: offer.id(),
				amount_msats: None,
				features: Features::empty(),
				quantity: None,
				recurrence_counter: None,
				payer_key: None,
				payer_note: None,
				payer_info: None,
				recurrence_start: None,
			},
		}
	}

	/// Sets the chain for paying the eventual invoice. If not called, [`Network::Bitcoin`] is
	/// assumed. Errors if the chain is not supported by the offer.
	///
	/// Successive calls to this method will override the previous setting.
	pub fn chain(self, network: Network) -> Result<Self, SemanticError> {
		self.chain_hash(ChainHash::using_genesis_block(network))
	}

	pub(super) fn chain_hash(mut self, chain: ChainHash) -> Result<Self, SemanticError> {
		if !self.offer.supports_chain(chain) {
			return Err(SemanticError::UnsupportedChain);
		}

		self.invreq.chains = Some(vec![chain]);
		Ok(self)
	}

	/// Sets the amount for the eventual invoice in millisatoshi. Errors if the offer already
	/// states an amount; the field is only for offers which leave it open.
	///
	/// Successive calls to this method will override the previous setting.
	pub fn amount_msats(mut self, amount_msats: u64) -> Result<Self, SemanticError> {
		if self.offer.amount().is_some() {
			return Err(SemanticError::UnexpectedAmount);
		}

		self.invreq.amount_msats = Some(amount_msats);
		Ok(self)
	}

	/// Sets the quantity of items requested. Errors unless the offer expects a quantity and the
	/// given one is within its bounds.
	///
	/// Successive calls to this method will override the previous setting.
	pub fn quantity(mut self, quantity: u64) -> Result<Self, SemanticError> {
		self.offer.contents.check_quantity(Some(quantity))?;
		self.invreq.quantity = Some(quantity);
		Ok(self)
	}

	/// Sets which recurrence period is being requested, starting at 0. Errors if the offer has
	/// no recurrence.
	///
	/// Successive calls to this method will override the previous setting.
	pub fn recurrence_counter(mut self, counter: u32) -> Result<Self, SemanticError> {
		if self.offer.recurrence().is_none() {
			return Err(SemanticError::UnexpectedRecurrenceCounter);
		}

		self.invreq.recurrence_counter = Some(counter);
		Ok(self)
	}

	/// Sets the period offset at which the recurrence was entered. Errors unless the offer's
	/// recurrence base allows starting at any period.
	///
	/// Successive calls to this method will override the previous setting.
	pub fn recurrence_start(mut self, start: u32) -> Result<Self, SemanticError> {
		match self.offer.recurrence_base() {
			Some(base) if base.start_any_period != 0 => {},
			_ => return Err(SemanticError::UnexpectedRecurrenceStart),
		}

		self.invreq.recurrence_start = Some(start);
		Ok(self)
	}

	/// Sets the [`InvoiceRequest::payer_note`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn payer_note(mut self, payer_note: String) -> Self {
		self.invreq.payer_note = Some(payer_note);
		self
	}

	/// Sets the features to advertise in the request, typically the node's BOLT 11 feature bits.
	///
	/// Successive calls to this method will override the previous setting.
	pub fn features(mut self, features: Features) -> Self {
		self.invreq.features = features;
		self
	}

	/// Sets the [`InvoiceRequest::payer_info`] tweak bytes from which
	/// [`InvoiceRequest::payer_key`] was derived.
	pub fn payer_info(mut self, payer_info: Vec<u8>) -> Self {
		self.invreq.payer_info = Some(payer_info);
		self
	}

	/// Sets the per-request [`InvoiceRequest::payer_key`].
	pub fn payer_key(mut self, payer_key: XOnlyPublicKey) -> Self {
		self.invreq.payer_key = Some(payer_key);
		self
	}

	/// Builds an [`UnsignedInvoiceRequest`] after checking for valid semantics: the conditional
	/// presence rules for amount, quantity, and the recurrence fields all derive from the offer.
	pub fn build(mut self) -> Result<UnsignedInvoiceRequest, SemanticError> {
		if self.offer.is_expired() {
			return Err(SemanticError::AlreadyExpired);
		}

		let chain = self
			.invreq
			.chains
			.as_ref()
			.and_then(|chains| chains.first().copied())
			.unwrap_or_else(|| self.offer.implied_chain());
		if !self.offer.supports_chain(chain) {
			return Err(SemanticError::UnsupportedChain);
		}

		if chain == self.offer.implied_chain() {
			self.invreq.chains = None;
		}

		match (self.offer.amount(), self.invreq.amount_msats) {
			(None, None) => return Err(SemanticError::MissingAmount),
			(Some(_), Some(_)) => return Err(SemanticError::UnexpectedAmount),
			_ => {},
		}

		self.offer.contents.check_quantity(self.invreq.quantity)?;

		match self.offer.recurrence() {
			Some(_) => {
				if self.invreq.recurrence_counter.is_none() {
					return Err(SemanticError::MissingRecurrenceCounter);
				}
				let start_any_period = self
					.offer
					.recurrence_base()
					.map_or(false, |base| base.start_any_period != 0);
				if start_any_period && self.invreq.recurrence_start.is_none() {
					return Err(SemanticError::MissingRecurrenceStart);
				}
				if !start_any_period && self.invreq.recurrence_start.is_some() {
					return Err(SemanticError::UnexpectedRecurrenceStart);
				}
			},
			None => {
				if self.invreq.recurrence_counter.is_some() {
					return Err(SemanticError::UnexpectedRecurrenceCounter);
				}
				if self.invreq.recurrence_start.is_some() {
					return Err(SemanticError::UnexpectedRecurrenceStart);
				}
			},
		}

		if self.invreq.payer_info.is_none() {
			return Err(SemanticError::MissingPayerInfo);
		}
		if self.invreq.payer_key.is_none() {
			return Err(SemanticError::MissingPayerKey);
		}

		Ok(UnsignedInvoiceRequest::from_contents(self.invreq))
	}
}

/// A semantically valid [`InvoiceRequest`] that hasn't had its recurrence signature attached,
/// if one is required.
pub struct UnsignedInvoiceRequest {
	pub(super) invreq: InvoiceRequestContents,
	bytes: Vec<u8>,
}

impl UnsignedInvoiceRequest {
	pub(super) fn from_contents(invreq: InvoiceRequestContents) -> Self {
		let mut bytes = Vec::new();
		invreq.write(&mut bytes).expect("in-memory writes cannot fail");
		Self { invreq, bytes }
	}

	/// The merkle root of the request's TLV records, as covered by the recurrence signature.
	pub fn merkle_root(&self) -> sha256::Hash {
		root_hash(&self.bytes)
	}

	/// Whether a recurrence signature is required before the request can be sent.
	pub fn needs_recurrence_signature(&self) -> bool {
		self.invreq.recurrence_counter.is_some()
	}

	/// Signs the request's recurrence fields using the given function, which must produce a
	/// BIP 340 signature by the request's payer key over [`UnsignedInvoiceRequest::merkle_root`].
	pub fn sign_recurrence<F, E>(self, sign: F) -> Result<InvoiceRequest, SignError<E>>
	where
		F: FnOnce(&Message) -> Result<Signature, E>,
	{
		let payer_key = self.invreq.payer_key.expect("enforced by the builder");
		let signature = merkle::sign_message(
			sign,
			"invoice_request",
			"recurrence_signature",
			&self.bytes,
			payer_key,
		)?;
		Ok(self.append_recurrence_signature(signature))
	}

	/// Attaches an externally produced recurrence signature after checking it verifies against
	/// the request's payer key.
	pub(super) fn with_recurrence_signature<T: secp256k1::Verification>(
		self, signature: Signature, secp_ctx: &Secp256k1<T>,
	) -> Result<InvoiceRequest, secp256k1::Error> {
		let payer_key = self.invreq.payer_key.expect("enforced by the builder");
		merkle::verify_signature(
			&signature,
			"invoice_request",
			"recurrence_signature",
			&self.bytes,
			payer_key,
			secp_ctx,
		)?;
		Ok(self.append_recurrence_signature(signature))
	}

	fn append_recurrence_signature(mut self, signature: Signature) -> InvoiceRequest {
		write_tlv_record(&mut self.bytes, RECURRENCE_SIGNATURE_TYPE, &signature)
			.expect("in-memory writes cannot fail");
		InvoiceRequest {
			bytes: self.bytes,
			contents: self.invreq,
			recurrence_signature: Some(signature),
		}
	}

	/// Finishes the request without a recurrence signature. Errors if one is required.
	pub fn build(self) -> Result<InvoiceRequest, SemanticError> {
		if self.needs_recurrence_signature() {
			return Err(SemanticError::MissingSignature);
		}

		Ok(InvoiceRequest { bytes: self.bytes, contents: self.invreq, recurrence_signature: None })
	}
}

/// An `InvoiceRequest` is a request for an [`Invoice`] formulated from an [`Offer`].
///
/// An offer may provide choices such as quantity, amount, chain, recurrence period, etc. An
/// invoice request specifies these such that its recipient can send an invoice for payment.
///
/// [`Invoice`]: crate::offers::invoice::Invoice
/// [`Offer`]: crate::offers::offer::Offer
#[derive(Clone, Debug, PartialEq)]
pub struct InvoiceRequest {
	pub(super) bytes: Vec<u8>,
	pub(super) contents: InvoiceRequestContents,
	recurrence_signature: Option<Signature>,
}

/// The contents of an [`InvoiceRequest`], which must be reflected in the corresponding
/// [`Invoice`].
///
/// [`Invoice`]: crate::offers::invoice::Invoice
#[derive(Clone, Debug, PartialEq)]
pub(super) struct InvoiceRequestContents {
	pub(super) chains: Option<Vec<ChainHash>>,
	pub(super) offer_id: OfferId,
	pub(super) amount_msats: Option<u64>,
	pub(super) features: Features,
	pub(super) quantity: Option<u64>,
	pub(super) recurrence_counter: Option<u32>,
	pub(super) payer_key: Option<XOnlyPublicKey>,
	pub(super) payer_note: Option<String>,
	pub(super) payer_info: Option<Vec<u8>>,
	pub(super) recurrence_start: Option<u32>,
}

impl InvoiceRequest {
	/// The chains the eventual invoice must be payable on, if restricted beyond the offer's
	/// implied chain.
	pub fn chains(&self) -> Option<&Vec<ChainHash>> {
		self.contents.chains.as_ref()
	}

	/// The merkle root of the offer this request is for.
	pub fn offer_id(&self) -> OfferId {
		self.contents.offer_id
	}

	/// The amount to pay in millisatoshi; present exactly when the offer left the amount open.
	pub fn amount_msats(&self) -> Option<u64> {
		self.contents.amount_msats
	}

	/// Features pertaining to requesting an invoice.
	pub fn features(&self) -> &Features {
		&self.contents.features
	}

	/// The quantity of the offer's items requested, if the offer expects one.
	pub fn quantity(&self) -> Option<u64> {
		self.contents.quantity
	}

	/// Which recurrence period is being requested, starting at 0 for the initial request.
	pub fn recurrence_counter(&self) -> Option<u32> {
		self.contents.recurrence_counter
	}

	/// The period offset at which the recurrence was entered, if the offer allows it.
	pub fn recurrence_start(&self) -> Option<u32> {
		self.contents.recurrence_start
	}

	/// A possibly transient x-only pubkey identifying the payer for this request only.
	pub fn payer_key(&self) -> Option<XOnlyPublicKey> {
		self.contents.payer_key
	}

	/// The tweak input from which [`InvoiceRequest::payer_key`] was derived. Opaque to the
	/// merchant; reflected back in the invoice.
	pub fn payer_info(&self) -> Option<&Vec<u8>> {
		self.contents.payer_info.as_ref()
	}

	/// A payer-provided note which will be seen by the recipient and reflected back in the
	/// invoice response.
	pub fn payer_note(&self) -> Option<PrintableString> {
		self.contents.payer_note.as_ref().map(|note| PrintableString(note.as_str()))
	}

	/// Signature over the request's merkle root by [`InvoiceRequest::payer_key`], present
	/// exactly when the request is for a recurrence period.
	pub fn recurrence_signature(&self) -> Option<Signature> {
		self.recurrence_signature
	}
}

impl AsRef<[u8]> for InvoiceRequest {
	fn as_ref(&self) -> &[u8] {
		&self.bytes
	}
}

impl Writeable for InvoiceRequest {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		WithoutLength(&self.bytes).write(writer)
	}
}

impl Writeable for InvoiceRequestContents {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		if let Some(ref chains) = self.chains {
			write_tlv_record(writer, INVREQ_CHAINS_TYPE, &WithoutLength(chains))?;
		}
		write_tlv_record(writer, INVREQ_OFFER_ID_TYPE, &self.offer_id)?;
		if let Some(amount_msats) = self.amount_msats {
			write_tlv_record(
				writer,
				INVREQ_AMOUNT_TYPE,
				&HighZeroBytesDroppedBigSize(amount_msats),
			)?;
		}
		if !self.features.is_empty() {
			write_tlv_record(writer, INVREQ_FEATURES_TYPE, &self.features)?;
		}
		if let Some(quantity) = self.quantity {
			write_tlv_record(writer, INVREQ_QUANTITY_TYPE, &HighZeroBytesDroppedBigSize(quantity))?;
		}
		if let Some(counter) = self.recurrence_counter {
			write_tlv_record(
				writer,
				INVREQ_RECURRENCE_COUNTER_TYPE,
				&HighZeroBytesDroppedBigSize(counter),
			)?;
		}
		if let Some(ref payer_key) = self.payer_key {
			write_tlv_record(writer, INVREQ_PAYER_KEY_TYPE, payer_key)?;
		}
		if let Some(ref payer_note) = self.payer_note {
			write_tlv_record(writer, INVREQ_PAYER_NOTE_TYPE, &WithoutLength(payer_note))?;
		}
		if let Some(ref payer_info) = self.payer_info {
			write_tlv_record(writer, INVREQ_PAYER_INFO_TYPE, &WithoutLength(payer_info))?;
		}
		if let Some(start) = self.recurrence_start {
			write_tlv_record(
				writer,
				INVREQ_RECURRENCE_START_TYPE,
				&HighZeroBytesDroppedBigSize(start),
			)?;
		}
		Ok(())
	}
}

#[derive(Default)]
struct InvoiceRequestTlvStream {
	chains: Option<Vec<ChainHash>>,
	offer_id: Option<OfferId>,
	amount: Option<u64>,
	features: Option<Features>,
	quantity: Option<u64>,
	recurrence_counter: Option<u32>,
	payer_key: Option<XOnlyPublicKey>,
	payer_note: Option<String>,
	payer_info: Option<Vec<u8>>,
	recurrence_start: Option<u32>,
	recurrence_signature: Option<Signature>,
}

impl SeekReadable for InvoiceRequestTlvStream {
	fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut stream = InvoiceRequestTlvStream::default();
		read_tlv_stream(reader, |r#type, mut value| {
			match r#type {
				INVREQ_CHAINS_TYPE => {
					let chains: WithoutLength<Vec<ChainHash>> = Readable::read(&mut value)?;
					stream.chains = Some(chains.0);
				},
				INVREQ_OFFER_ID_TYPE => stream.offer_id = Some(Readable::read(&mut value)?),
				INVREQ_AMOUNT_TYPE => {
					let amount: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					stream.amount = Some(amount.0);
				},
				INVREQ_FEATURES_TYPE => stream.features = Some(Readable::read(&mut value)?),
				INVREQ_QUANTITY_TYPE => {
					let quantity: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					stream.quantity = Some(quantity.0);
				},
				INVREQ_RECURRENCE_COUNTER_TYPE => {
					let counter: HighZeroBytesDroppedBigSize<u32> = Readable::read(&mut value)?;
					stream.recurrence_counter = Some(counter.0);
				},
				INVREQ_PAYER_KEY_TYPE => stream.payer_key = Some(Readable::read(&mut value)?),
				INVREQ_PAYER_NOTE_TYPE => {
					let note: WithoutLength<String> = Readable::read(&mut value)?;
					stream.payer_note = Some(note.0);
				},
				INVREQ_PAYER_INFO_TYPE => {
					let info: WithoutLength<Vec<u8>> = Readable::read(&mut value)?;
					stream.payer_info = Some(info.0);
				},
				INVREQ_RECURRENCE_START_TYPE => {
					let start: HighZeroBytesDroppedBigSize<u32> = Readable::read(&mut value)?;
					stream.recurrence_start = Some(start.0);
				},
				RECURRENCE_SIGNATURE_TYPE => {
					stream.recurrence_signature = Some(Readable::read(&mut value)?);
				},
				_ => return Ok(false),
			}
			Ok(true)
		})?;
		Ok(stream)
	}
}

impl TryFrom<InvoiceRequestTlvStream> for InvoiceRequestContents {
	type Error = SemanticError;

	fn try_from(tlv_stream: InvoiceRequestTlvStream) -> Result<Self, Self::Error> {
		let InvoiceRequestTlvStream {
			chains,
			offer_id,
			amount,
			features,
			quantity,
			recurrence_counter,
			payer_key,
			payer_note,
			payer_info,
			recurrence_start,
			recurrence_signature: _,
		} = tlv_stream;

		let offer_id = match offer_id {
			None => return Err(SemanticError::MissingOfferId),
			Some(offer_id) => offer_id,
		};

		let features = features.unwrap_or_else(Features::empty);

		Ok(InvoiceRequestContents {
			chains,
			offer_id,
			amount_msats: amount,
			features,
			quantity,
			recurrence_counter,
			payer_key,
			payer_note,
			payer_info,
			recurrence_start,
		})
	}
}

impl Bech32Encode for InvoiceRequest {
	const BECH32_HRP: &'static str = "lnr";
}

impl FromStr for InvoiceRequest {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, <Self as FromStr>::Err> {
		Self::from_bech32_str(s)
	}
}

impl TryFrom<Vec<u8>> for InvoiceRequest {
	type Error = ParseError;

	fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
		let invreq = ParsedMessage::<InvoiceRequestTlvStream>::try_from(bytes)?;
		let ParsedMessage { bytes, tlv_stream } = invreq;
		let recurrence_signature = tlv_stream.recurrence_signature;
		let contents = InvoiceRequestContents::try_from(tlv_stream)?;

		if let (Some(signature), Some(payer_key)) = (recurrence_signature, contents.payer_key) {
			merkle::verify_signature(
				&signature,
				"invoice_request",
				"recurrence_signature",
				&bytes,
				payer_key,
				&Secp256k1::verification_only(),
			)?;
		}

		Ok(InvoiceRequest { bytes, contents, recurrence_signature })
	}
}

impl fmt::Display for InvoiceRequest {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		self.fmt_bech32_str(f)
	}
}

#[cfg(test)]
mod tests {
	use super::{InvoiceRequest, UnsignedInvoiceRequest};

	use bitcoin::blockdata::constants::ChainHash;
	use bitcoin::network::constants::Network;
	use bitcoin::secp256k1::{KeyPair, Scalar, Secp256k1, SecretKey, XOnlyPublicKey};
	use core::convert::Infallible;

	use crate::offers::merkle::SignError;
	use crate::offers::offer::{Offer, OfferBuilder};
	use crate::offers::parse::{ParseError, SemanticError};
	use crate::offers::payer::derive_payer_key;
	use crate::offers::recurrence::{Recurrence, RecurrenceBase, TimeUnit};
	use crate::util::ser::Writeable;

	fn keys(byte: u8) -> KeyPair {
		let secp_ctx = Secp256k1::new();
		KeyPair::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[byte; 32]).unwrap())
	}

	fn pubkey(byte: u8) -> XOnlyPublicKey {
		keys(byte).x_only_public_key().0
	}

	fn basic_offer() -> Offer {
		OfferBuilder::new("foo".into(), pubkey(42)).amount_msats(1000).build().unwrap()
	}

	fn payer_fields(builder: super::InvoiceRequestBuilder) -> super::InvoiceRequestBuilder {
		builder.payer_info(vec![1; 16]).payer_key(pubkey(43))
	}

	#[test]
	fn builds_request_for_fixed_amount_offer() {
		let offer = basic_offer();
		let request = payer_fields(offer.request_invoice().unwrap())
			.build()
			.unwrap()
			.build()
			.unwrap();

		assert_eq!(request.offer_id(), offer.id());
		assert_eq!(request.amount_msats(), None);
		assert_eq!(request.quantity(), None);
		assert_eq!(request.payer_key(), Some(pubkey(43)));
		assert_eq!(request.payer_info(), Some(&vec![1; 16]));
		assert_eq!(request.recurrence_signature(), None);

		let parsed = InvoiceRequest::try_from(request.bytes.clone()).unwrap();
		assert_eq!(parsed, request);
	}

	#[test]
	fn enforces_amount_presence_rules() {
		// The offer states an amount, so the request must not.
		let offer = basic_offer();
		match offer.request_invoice().unwrap().amount_msats(500) {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::UnexpectedAmount),
		}

		// The offer leaves the amount open, so the request must specify one.
		let offer = OfferBuilder::new("foo".into(), pubkey(42)).build().unwrap();
		match payer_fields(offer.request_invoice().unwrap()).build() {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::MissingAmount),
		}

		let request = payer_fields(offer.request_invoice().unwrap())
			.amount_msats(500)
			.unwrap()
			.build()
			.unwrap()
			.build()
			.unwrap();
		assert_eq!(request.amount_msats(), Some(500));
	}

	#[test]
	fn enforces_quantity_rules() {
		let offer = OfferBuilder::new("foo".into(), pubkey(42))
			.amount_msats(1000)
			.quantity_min(2)
			.quantity_max(5)
			.build()
			.unwrap();

		match offer.request_invoice().unwrap().quantity(1) {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::InvalidQuantity),
		}
		match payer_fields(offer.request_invoice().unwrap()).build() {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::MissingQuantity),
		}

		let request = payer_fields(offer.request_invoice().unwrap().quantity(3).unwrap())
			.build()
			.unwrap()
			.build()
			.unwrap();
		assert_eq!(request.quantity(), Some(3));

		// An offer without quantity bounds rejects any quantity.
		let offer = basic_offer();
		match offer.request_invoice().unwrap().quantity(1) {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::UnexpectedQuantity),
		}
	}

	#[test]
	fn enforces_recurrence_rules() {
		let offer = OfferBuilder::new("sub".into(), pubkey(42))
			.amount_msats(1000)
			.recurrence(Recurrence { time_unit: TimeUnit::Days, period: 30 })
			.build()
			.unwrap();

		// A recurrence counter is required...
		match payer_fields(offer.request_invoice().unwrap()).build() {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::MissingRecurrenceCounter),
		}
		// ...and without start_any_period, a recurrence start is rejected.
		match offer.request_invoice().unwrap().recurrence_start(1) {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::UnexpectedRecurrenceStart),
		}

		// With start_any_period the start becomes mandatory.
		let offer = OfferBuilder::new("sub".into(), pubkey(42))
			.amount_msats(1000)
			.recurrence(Recurrence { time_unit: TimeUnit::Days, period: 30 })
			.recurrence_base(RecurrenceBase { start_any_period: 1, basetime: 1_600_000_000 })
			.build()
			.unwrap();
		match payer_fields(offer.request_invoice().unwrap().recurrence_counter(0).unwrap()).build()
		{
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::MissingRecurrenceStart),
		}

		// A non-recurring offer rejects the counter outright.
		let offer = basic_offer();
		match offer.request_invoice().unwrap().recurrence_counter(0) {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::UnexpectedRecurrenceCounter),
		}
	}

	#[test]
	fn recurring_request_needs_signature() {
		let offer = OfferBuilder::new("sub".into(), pubkey(42))
			.amount_msats(1000)
			.recurrence(Recurrence { time_unit: TimeUnit::Days, period: 30 })
			.build()
			.unwrap();

		let secp_ctx = Secp256k1::new();
		let payer_base = keys(43);
		let payer_info = vec![7; 16];
		let payer_key =
			derive_payer_key(&secp_ctx, &payer_base.x_only_public_key().0, &payer_info).unwrap();

		let unsigned = offer
			.request_invoice()
			.unwrap()
			.recurrence_counter(0)
			.unwrap()
			.payer_info(payer_info.clone())
			.payer_key(payer_key)
			.build()
			.unwrap();
		assert!(unsigned.needs_recurrence_signature());

		// Finishing without a signature is an error.
		match UnsignedInvoiceRequest::from_contents(unsigned.invreq.clone()).build() {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::MissingSignature),
		}

		// Signing with the scalar-tweaked payer base key round-trips through parsing, which
		// re-verifies the signature.
		let tweak = {
			use bitcoin::hashes::{sha256, Hash, HashEngine};
			let mut engine = sha256::Hash::engine();
			engine.input(&payer_base.x_only_public_key().0.serialize());
			engine.input(&payer_info);
			Scalar::from_be_bytes(sha256::Hash::from_engine(engine).into_inner()).unwrap()
		};
		let payer_keys = payer_base.add_xonly_tweak(&secp_ctx, &tweak).unwrap();
		let request = unsigned
			.sign_recurrence::<_, Infallible>(|digest| {
				Ok(secp_ctx.sign_schnorr_no_aux_rand(digest, &payer_keys))
			})
			.unwrap();
		assert!(request.recurrence_signature().is_some());

		let parsed = InvoiceRequest::try_from(request.bytes.clone()).unwrap();
		assert_eq!(parsed, request);

		// A corrupted signature fails the parse.
		let mut bytes = request.bytes.clone();
		let len = bytes.len();
		bytes[len - 1] ^= 1;
		match InvoiceRequest::try_from(bytes) {
			Ok(_) => panic!("expected error"),
			Err(ParseError::InvalidSignature(_)) => {},
			Err(e) => panic!("unexpected error: {:?}", e),
		}
	}

	#[test]
	fn rejects_signing_with_wrong_payer_key() {
		let offer = OfferBuilder::new("sub".into(), pubkey(42))
			.amount_msats(1000)
			.recurrence(Recurrence { time_unit: TimeUnit::Days, period: 30 })
			.build()
			.unwrap();

		let secp_ctx = Secp256k1::new();
		let unsigned = payer_fields(
			offer.request_invoice().unwrap().recurrence_counter(0).unwrap(),
		)
		.build()
		.unwrap();

		let unrelated_keys = keys(44);
		match unsigned.sign_recurrence::<_, Infallible>(|digest| {
			Ok(secp_ctx.sign_schnorr_no_aux_rand(digest, &unrelated_keys))
		}) {
			Err(SignError::Verification(_)) => {},
			_ => panic!("expected verification error"),
		}
	}

	#[test]
	fn collapses_implied_chain() {
		let offer = basic_offer();
		let request = payer_fields(
			offer.request_invoice().unwrap().chain(Network::Bitcoin).unwrap(),
		)
		.build()
		.unwrap()
		.build()
		.unwrap();
		assert_eq!(request.chains(), None);

		// An unsupported chain is rejected up front.
		match offer.request_invoice().unwrap().chain(Network::Testnet) {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::UnsupportedChain),
		}

		let offer = OfferBuilder::new("foo".into(), pubkey(42))
			.amount_msats(1000)
			.chain(Network::Testnet)
			.build()
			.unwrap();
		let request = payer_fields(
			offer.request_invoice().unwrap().chain(Network::Testnet).unwrap(),
		)
		.build()
		.unwrap()
		.build()
		.unwrap();
		assert_eq!(
			request.chains(),
			Some(&vec![ChainHash::using_genesis_block(Network::Testnet)])
		);
	}

	#[test]
	fn round_trips_through_bech32() {
		let offer = basic_offer();
		let request = payer_fields(offer.request_invoice().unwrap())
			.payer_note("for my sister".into())
			.build()
			.unwrap()
			.build()
			.unwrap();

		let parsed = request.to_string().parse::<InvoiceRequest>().unwrap();
		assert_eq!(parsed, request);
		assert_eq!(parsed.payer_note().unwrap().to_string(), "for my sister");
	}

	#[test]
	fn fails_parsing_without_offer_id() {
		let mut bytes = Vec::new();
		crate::util::ser::write_tlv_record(&mut bytes, 38, &pubkey(43)).unwrap();
		match InvoiceRequest::try_from(bytes) {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, ParseError::InvalidSemantics(SemanticError::MissingOfferId)),
		}
	}

	#[test]
	fn request_with_unknown_features_is_refused() {
		let mut features = crate::ln::features::Features::empty();
		features.set_bit(12);
		let offer = OfferBuilder::new("foo".into(), pubkey(42))
			.amount_msats(1000)
			.features_unchecked(features)
			.build()
			.unwrap();
		match offer.request_invoice() {
			Ok(_) => panic!("expected error"),
			Err(e) => assert_eq!(e, SemanticError::UnknownRequiredFeatures),
		}
	}

	#[test]
	fn serialized_fields_are_ascending() {
		let offer = OfferBuilder::new("foo".into(), pubkey(42)).quantity_max(5).build().unwrap();
		let request = offer
			.request_invoice()
			.unwrap()
			.amount_msats(500)
			.unwrap()
			.quantity(2)
			.unwrap()
			.payer_note("hi".into())
			.payer_info(vec![1; 16])
			.payer_key(pubkey(43))
			.build()
			.unwrap()
			.build()
			.unwrap();

		// Re-parsing validates the strictly-ascending type requirement.
		let reparsed = InvoiceRequest::try_from(request.encode()).unwrap();
		assert_eq!(reparsed, request);
	}
}
