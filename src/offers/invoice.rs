// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Data structures and encoding for `invoice` messages.
//!
//! An [`Invoice`] is the merchant's reply to an [`InvoiceRequest`]: the payable claim carrying
//! the final amount and payment hash. Parsing here is deliberately lenient; the BOLT 12 MUSTs
//! for a returned invoice are enforced by the exchange engine so that failures can name the
//! exact offending field. See [`OffersFlow::handle_onion_message`].
//!
//! [`InvoiceRequest`]: crate::offers::invoice_request::InvoiceRequest
//! [`OffersFlow::handle_onion_message`]: crate::offers::flow::OffersFlow::handle_onion_message

use bitcoin::blockdata::constants::ChainHash;
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{self, Message, Secp256k1, XOnlyPublicKey};
use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::io::{self, Read, Seek};

use crate::blinded_path::BlindedPath;
use crate::ln::features::Features;
use crate::ln::msgs::DecodeError;
use crate::ln::PaymentHash;
use crate::offers::invoice_request::InvoiceRequest;
use crate::offers::merkle::{self, SignError};
use crate::offers::offer::{Offer, OfferId};
use crate::offers::parse::{Bech32Encode, ParseError, ParsedMessage, SemanticError};
use crate::util::ser::{
	read_tlv_stream, write_tlv_record, HighZeroBytesDroppedBigSize, Readable, SeekReadable,
	Writeable, WithoutLength, Writer,
};
use crate::util::string::PrintableString;

/// Default relative expiry for an invoice, in seconds from its creation time.
pub const DEFAULT_RELATIVE_EXPIRY: Duration = Duration::from_secs(7200);

const INVOICE_CHAINS_TYPE: u64 = 2;
const INVOICE_OFFER_ID_TYPE: u64 = 4;
const INVOICE_AMOUNT_TYPE: u64 = 8;
const INVOICE_DESCRIPTION_TYPE: u64 = 10;
const INVOICE_FEATURES_TYPE: u64 = 12;
const INVOICE_VENDOR_TYPE: u64 = 20;
const INVOICE_QUANTITY_TYPE: u64 = 32;
const INVOICE_NODE_ID_TYPE: u64 = 34;
const INVOICE_RECURRENCE_COUNTER_TYPE: u64 = 36;
const INVOICE_PAYER_KEY_TYPE: u64 = 38;
const INVOICE_PAYER_NOTE_TYPE: u64 = 39;
const INVOICE_CREATED_AT_TYPE: u64 = 40;
const INVOICE_PAYMENT_HASH_TYPE: u64 = 42;
const INVOICE_RELATIVE_EXPIRY_TYPE: u64 = 44;
const INVOICE_FALLBACKS_TYPE: u64 = 46;
const INVOICE_CLTV_TYPE: u64 = 48;
const INVOICE_PAYER_INFO_TYPE: u64 = 50;
const INVOICE_BLINDED_PATHS_TYPE: u64 = 52;
const INVOICE_RECURRENCE_BASETIME_TYPE: u64 = 64;
const INVOICE_RECURRENCE_START_TYPE: u64 = 68;
const SIGNATURE_TYPE: u64 = 240;

/// An `Invoice` is a payment request corresponding to an [`Offer`].
///
/// [`Offer`]: crate::offers::offer::Offer
#[derive(Clone, Debug, PartialEq)]
pub struct Invoice {
	pub(super) bytes: Vec<u8>,
	contents: InvoiceContents,
	signature: Option<Signature>,
}

/// An on-chain fallback address a payer may use if the lightning payment fails.
#[derive(Clone, Debug, PartialEq)]
pub struct FallbackAddress {
	/// The address' segwit version.
	pub version: u8,
	/// The witness program.
	pub program: Vec<u8>,
}

impl Writeable for FallbackAddress {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.version.write(writer)?;
		self.program.write(writer)
	}
}

impl Readable for FallbackAddress {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let version = Readable::read(reader)?;
		let program = Readable::read(reader)?;
		Ok(FallbackAddress { version, program })
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
struct InvoiceContents {
	chains: Option<Vec<ChainHash>>,
	offer_id: Option<OfferId>,
	amount_msats: Option<u64>,
	description: Option<String>,
	features: Features,
	vendor: Option<String>,
	quantity: Option<u64>,
	node_id: Option<XOnlyPublicKey>,
	recurrence_counter: Option<u32>,
	payer_key: Option<XOnlyPublicKey>,
	payer_note: Option<String>,
	created_at: Option<u64>,
	payment_hash: Option<PaymentHash>,
	relative_expiry: Option<u32>,
	fallbacks: Option<Vec<FallbackAddress>>,
	min_final_cltv_expiry: Option<u32>,
	payer_info: Option<Vec<u8>>,
	blinded_paths: Option<Vec<BlindedPath>>,
	recurrence_basetime: Option<u64>,
	recurrence_start: Option<u32>,
}

impl Invoice {
	/// The chains the invoice is payable on, if restricted.
	pub fn chains(&self) -> Option<&Vec<ChainHash>> {
		self.contents.chains.as_ref()
	}

	/// The merkle root of the offer this invoice answers.
	pub fn offer_id(&self) -> Option<OfferId> {
		self.contents.offer_id
	}

	/// The amount to pay in millisatoshi.
	pub fn amount_msats(&self) -> Option<u64> {
		self.contents.amount_msats
	}

	/// A description of the purpose of the payment; may differ from the offer's.
	pub fn description(&self) -> Option<PrintableString> {
		self.contents.description.as_ref().map(|s| PrintableString(s.as_str()))
	}

	pub(super) fn description_string(&self) -> Option<&String> {
		self.contents.description.as_ref()
	}

	/// Features pertaining to paying the invoice.
	pub fn features(&self) -> &Features {
		&self.contents.features
	}

	/// The vendor of the offered goods; may differ from the offer's.
	pub fn vendor(&self) -> Option<PrintableString> {
		self.contents.vendor.as_ref().map(|s| PrintableString(s.as_str()))
	}

	pub(super) fn vendor_string(&self) -> Option<&String> {
		self.contents.vendor.as_ref()
	}

	/// The quantity of items, echoed from the request.
	pub fn quantity(&self) -> Option<u64> {
		self.contents.quantity
	}

	/// The x-only pubkey of the issuing node; must equal the offer's node id.
	pub fn node_id(&self) -> Option<XOnlyPublicKey> {
		self.contents.node_id
	}

	/// The recurrence period counter, echoed from the request.
	pub fn recurrence_counter(&self) -> Option<u32> {
		self.contents.recurrence_counter
	}

	/// The payer key, echoed from the request.
	pub fn payer_key(&self) -> Option<XOnlyPublicKey> {
		self.contents.payer_key
	}

	/// The payer's note, echoed from the request.
	pub fn payer_note(&self) -> Option<PrintableString> {
		self.contents.payer_note.as_ref().map(|s| PrintableString(s.as_str()))
	}

	/// Seconds since the Unix epoch when the invoice was created.
	pub fn created_at(&self) -> Option<u64> {
		self.contents.created_at
	}

	/// SHA256 hash of the payment preimage that will be given in return for paying the invoice.
	pub fn payment_hash(&self) -> Option<PaymentHash> {
		self.contents.payment_hash
	}

	/// Seconds since [`Invoice::created_at`] when the invoice expires and should no longer be
	/// paid; two hours by default.
	pub fn relative_expiry(&self) -> Duration {
		self.contents
			.relative_expiry
			.map(|secs| Duration::from_secs(secs as u64))
			.unwrap_or(DEFAULT_RELATIVE_EXPIRY)
	}

	/// On-chain fallback addresses, if any.
	pub fn fallbacks(&self) -> Option<&Vec<FallbackAddress>> {
		self.contents.fallbacks.as_ref()
	}

	/// The minimum CLTV delta the final hop requires.
	pub fn min_final_cltv_expiry(&self) -> Option<u32> {
		self.contents.min_final_cltv_expiry
	}

	/// The payer info tweak bytes, echoed from the request.
	pub fn payer_info(&self) -> Option<&Vec<u8>> {
		self.contents.payer_info.as_ref()
	}

	/// Blinded paths over which the payment may be routed for recipient privacy.
	pub fn blinded_paths(&self) -> Option<&Vec<BlindedPath>> {
		self.contents.blinded_paths.as_ref()
	}

	/// The absolute time anchoring the offer's recurrence periods; required whenever the
	/// request carried a recurrence counter.
	pub fn recurrence_basetime(&self) -> Option<u64> {
		self.contents.recurrence_basetime
	}

	/// The recurrence start offset, echoed from the request.
	pub fn recurrence_start(&self) -> Option<u32> {
		self.contents.recurrence_start
	}

	/// The signature over the invoice's merkle root, if present.
	pub fn signature(&self) -> Option<Signature> {
		self.signature
	}

	/// Verifies that the invoice carries a signature by its node id over its merkle root.
	pub fn verify_signature<T: secp256k1::Verification>(
		&self, secp_ctx: &Secp256k1<T>,
	) -> Result<(), ParseError> {
		let node_id = match self.contents.node_id {
			None => return Err(ParseError::InvalidSemantics(SemanticError::MissingNodeId)),
			Some(node_id) => node_id,
		};
		match self.signature {
			None => Err(ParseError::InvalidSemantics(SemanticError::MissingSignature)),
			Some(signature) => {
				merkle::verify_signature(
					&signature,
					"invoice",
					"signature",
					&self.bytes,
					node_id,
					secp_ctx,
				)?;
				Ok(())
			},
		}
	}
}

impl AsRef<[u8]> for Invoice {
	fn as_ref(&self) -> &[u8] {
		&self.bytes
	}
}

impl Writeable for Invoice {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		WithoutLength(&self.bytes).write(writer)
	}
}

impl Writeable for InvoiceContents {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		if let Some(ref chains) = self.chains {
			write_tlv_record(writer, INVOICE_CHAINS_TYPE, &WithoutLength(chains))?;
		}
		if let Some(ref offer_id) = self.offer_id {
			write_tlv_record(writer, INVOICE_OFFER_ID_TYPE, offer_id)?;
		}
		if let Some(amount_msats) = self.amount_msats {
			write_tlv_record(
				writer,
				INVOICE_AMOUNT_TYPE,
				&HighZeroBytesDroppedBigSize(amount_msats),
			)?;
		}
		if let Some(ref description) = self.description {
			write_tlv_record(writer, INVOICE_DESCRIPTION_TYPE, &WithoutLength(description))?;
		}
		if !self.features.is_empty() {
			write_tlv_record(writer, INVOICE_FEATURES_TYPE, &self.features)?;
		}
		if let Some(ref vendor) = self.vendor {
			write_tlv_record(writer, INVOICE_VENDOR_TYPE, &WithoutLength(vendor))?;
		}
		if let Some(quantity) = self.quantity {
			write_tlv_record(
				writer,
				INVOICE_QUANTITY_TYPE,
				&HighZeroBytesDroppedBigSize(quantity),
			)?;
		}
		if let Some(ref node_id) = self.node_id {
			write_tlv_record(writer, INVOICE_NODE_ID_TYPE, node_id)?;
		}
		if let Some(counter) = self.recurrence_counter {
			write_tlv_record(
				writer,
				INVOICE_RECURRENCE_COUNTER_TYPE,
				&HighZeroBytesDroppedBigSize(counter),
			)?;
		}
		if let Some(ref payer_key) = self.payer_key {
			write_tlv_record(writer, INVOICE_PAYER_KEY_TYPE, payer_key)?;
		}
		if let Some(ref payer_note) = self.payer_note {
			write_tlv_record(writer, INVOICE_PAYER_NOTE_TYPE, &WithoutLength(payer_note))?;
		}
		if let Some(created_at) = self.created_at {
			write_tlv_record(
				writer,
				INVOICE_CREATED_AT_TYPE,
				&HighZeroBytesDroppedBigSize(created_at),
			)?;
		}
		if let Some(ref payment_hash) = self.payment_hash {
			write_tlv_record(writer, INVOICE_PAYMENT_HASH_TYPE, payment_hash)?;
		}
		if let Some(relative_expiry) = self.relative_expiry {
			write_tlv_record(
				writer,
				INVOICE_RELATIVE_EXPIRY_TYPE,
				&HighZeroBytesDroppedBigSize(relative_expiry),
			)?;
		}
		if let Some(ref fallbacks) = self.fallbacks {
			write_tlv_record(writer, INVOICE_FALLBACKS_TYPE, &WithoutLength(fallbacks))?;
		}
		if let Some(cltv) = self.min_final_cltv_expiry {
			write_tlv_record(writer, INVOICE_CLTV_TYPE, &HighZeroBytesDroppedBigSize(cltv))?;
		}
		if let Some(ref payer_info) = self.payer_info {
			write_tlv_record(writer, INVOICE_PAYER_INFO_TYPE, &WithoutLength(payer_info))?;
		}
		if let Some(ref blinded_paths) = self.blinded_paths {
			write_tlv_record(writer, INVOICE_BLINDED_PATHS_TYPE, &WithoutLength(blinded_paths))?;
		}
		if let Some(basetime) = self.recurrence_basetime {
			write_tlv_record(
				writer,
				INVOICE_RECURRENCE_BASETIME_TYPE,
				&HighZeroBytesDroppedBigSize(basetime),
			)?;
		}
		if let Some(start) = self.recurrence_start {
			write_tlv_record(
				writer,
				INVOICE_RECURRENCE_START_TYPE,
				&HighZeroBytesDroppedBigSize(start),
			)?;
		}
		Ok(())
	}
}

#[derive(Default)]
struct InvoiceTlvStream {
	contents: InvoiceContents,
	signature: Option<Signature>,
}

impl SeekReadable for InvoiceTlvStream {
	fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut stream = InvoiceTlvStream::default();
		let contents = &mut stream.contents;
		read_tlv_stream(reader, |r#type, mut value| {
			match r#type {
				INVOICE_CHAINS_TYPE => {
					let chains: WithoutLength<Vec<ChainHash>> = Readable::read(&mut value)?;
					contents.chains = Some(chains.0);
				},
				INVOICE_OFFER_ID_TYPE => contents.offer_id = Some(Readable::read(&mut value)?),
				INVOICE_AMOUNT_TYPE => {
					let amount: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					contents.amount_msats = Some(amount.0);
				},
				INVOICE_DESCRIPTION_TYPE => {
					let description: WithoutLength<String> = Readable::read(&mut value)?;
					contents.description = Some(description.0);
				},
				INVOICE_FEATURES_TYPE => contents.features = Readable::read(&mut value)?,
				INVOICE_VENDOR_TYPE => {
					let vendor: WithoutLength<String> = Readable::read(&mut value)?;
					contents.vendor = Some(vendor.0);
				},
				INVOICE_QUANTITY_TYPE => {
					let quantity: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					contents.quantity = Some(quantity.0);
				},
				INVOICE_NODE_ID_TYPE => contents.node_id = Some(Readable::read(&mut value)?),
				INVOICE_RECURRENCE_COUNTER_TYPE => {
					let counter: HighZeroBytesDroppedBigSize<u32> = Readable::read(&mut value)?;
					contents.recurrence_counter = Some(counter.0);
				},
				INVOICE_PAYER_KEY_TYPE => contents.payer_key = Some(Readable::read(&mut value)?),
				INVOICE_PAYER_NOTE_TYPE => {
					let note: WithoutLength<String> = Readable::read(&mut value)?;
					contents.payer_note = Some(note.0);
				},
				INVOICE_CREATED_AT_TYPE => {
					let created_at: HighZeroBytesDroppedBigSize<u64> =
						Readable::read(&mut value)?;
					contents.created_at = Some(created_at.0);
				},
				INVOICE_PAYMENT_HASH_TYPE => {
					contents.payment_hash = Some(Readable::read(&mut value)?);
				},
				INVOICE_RELATIVE_EXPIRY_TYPE => {
					let expiry: HighZeroBytesDroppedBigSize<u32> = Readable::read(&mut value)?;
					contents.relative_expiry = Some(expiry.0);
				},
				INVOICE_FALLBACKS_TYPE => {
					let fallbacks: WithoutLength<Vec<FallbackAddress>> =
						Readable::read(&mut value)?;
					contents.fallbacks = Some(fallbacks.0);
				},
				INVOICE_CLTV_TYPE => {
					let cltv: HighZeroBytesDroppedBigSize<u32> = Readable::read(&mut value)?;
					contents.min_final_cltv_expiry = Some(cltv.0);
				},
				INVOICE_PAYER_INFO_TYPE => {
					let info: WithoutLength<Vec<u8>> = Readable::read(&mut value)?;
					contents.payer_info = Some(info.0);
				},
				INVOICE_BLINDED_PATHS_TYPE => {
					let paths: WithoutLength<Vec<BlindedPath>> = Readable::read(&mut value)?;
					contents.blinded_paths = Some(paths.0);
				},
				INVOICE_RECURRENCE_BASETIME_TYPE => {
					let basetime: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					contents.recurrence_basetime = Some(basetime.0);
				},
				INVOICE_RECURRENCE_START_TYPE => {
					let start: HighZeroBytesDroppedBigSize<u32> = Readable::read(&mut value)?;
					contents.recurrence_start = Some(start.0);
				},
				SIGNATURE_TYPE => stream.signature = Some(Readable::read(&mut value)?),
				_ => return Ok(false),
			}
			Ok(true)
		})?;
		Ok(stream)
	}
}

impl Bech32Encode for Invoice {
	const BECH32_HRP: &'static str = "lni";
}

impl FromStr for Invoice {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, <Self as FromStr>::Err> {
		Self::from_bech32_str(s)
	}
}

impl TryFrom<Vec<u8>> for Invoice {
	type Error = ParseError;

	fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
		let invoice = ParsedMessage::<InvoiceTlvStream>::try_from(bytes)?;
		let ParsedMessage { bytes, tlv_stream } = invoice;
		let InvoiceTlvStream { contents, signature } = tlv_stream;
		Ok(Invoice { bytes, contents, signature })
	}
}

impl fmt::Display for Invoice {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		self.fmt_bech32_str(f)
	}
}

/// Builds an [`Invoice`] in response to an [`InvoiceRequest`]: the merchant side of the
/// exchange. Offer payload fields and the request's echoed fields are carried over; the amount,
/// and for recurring requests the recurrence base time, are supplied by the caller.
///
/// [`InvoiceRequest`]: crate::offers::invoice_request::InvoiceRequest
pub struct InvoiceBuilder {
	invoice: InvoiceContents,
}

impl InvoiceBuilder {
	/// Creates a builder echoing `request`'s fields and `offer`'s payload, with the given
	/// creation time and payment hash.
	pub fn for_request(
		offer: &Offer, request: &InvoiceRequest, created_at: u64, payment_hash: PaymentHash,
	) -> Self {
		let invoice = InvoiceContents {
			chains: request.chains().cloned(),
			offer_id: Some(request.offer_id()),
			amount_msats: None,
			description: Some(offer.description_string().clone()),
			features: Features::empty(),
			vendor: offer.vendor_string().cloned(),
			quantity: request.quantity(),
			node_id: Some(offer.node_id()),
			recurrence_counter: request.recurrence_counter(),
			payer_key: request.payer_key(),
			payer_note: request.payer_note().map(|note| note.0.to_string()),
			created_at: Some(created_at),
			payment_hash: Some(payment_hash),
			relative_expiry: None,
			fallbacks: None,
			min_final_cltv_expiry: None,
			payer_info: request.payer_info().cloned(),
			blinded_paths: None,
			recurrence_basetime: None,
			recurrence_start: request.recurrence_start(),
		};
		InvoiceBuilder { invoice }
	}

	/// Sets the [`Invoice::amount_msats`]; required before building.
	pub fn amount_msats(mut self, amount_msats: u64) -> Self {
		self.invoice.amount_msats = Some(amount_msats);
		self
	}

	/// Replaces the description carried over from the offer.
	pub fn description(mut self, description: String) -> Self {
		self.invoice.description = Some(description);
		self
	}

	/// Removes the description entirely.
	pub fn clear_description(mut self) -> Self {
		self.invoice.description = None;
		self
	}

	/// Replaces the vendor carried over from the offer.
	pub fn vendor(mut self, vendor: String) -> Self {
		self.invoice.vendor = Some(vendor);
		self
	}

	/// Removes the vendor entirely.
	pub fn clear_vendor(mut self) -> Self {
		self.invoice.vendor = None;
		self
	}

	/// Sets the [`Invoice::relative_expiry`] in seconds.
	pub fn relative_expiry(mut self, relative_expiry_secs: u32) -> Self {
		self.invoice.relative_expiry = Some(relative_expiry_secs);
		self
	}

	/// Sets the [`Invoice::recurrence_basetime`]; required when responding to a recurrence
	/// period request.
	pub fn recurrence_basetime(mut self, basetime: u64) -> Self {
		self.invoice.recurrence_basetime = Some(basetime);
		self
	}

	/// Adds on-chain fallback addresses.
	pub fn fallbacks(mut self, fallbacks: Vec<FallbackAddress>) -> Self {
		self.invoice.fallbacks = Some(fallbacks);
		self
	}

	/// Sets the [`Invoice::min_final_cltv_expiry`].
	pub fn min_final_cltv_expiry(mut self, cltv: u32) -> Self {
		self.invoice.min_final_cltv_expiry = Some(cltv);
		self
	}

	/// Adds blinded payment paths to the recipient.
	pub fn blinded_paths(mut self, blinded_paths: Vec<BlindedPath>) -> Self {
		self.invoice.blinded_paths = Some(blinded_paths);
		self
	}

	/// Builds an [`UnsignedInvoice`] after checking that an amount was provided.
	pub fn build(self) -> Result<UnsignedInvoice, SemanticError> {
		if self.invoice.amount_msats.is_none() {
			return Err(SemanticError::MissingAmount);
		}
		if self.invoice.node_id.is_none() {
			return Err(SemanticError::MissingNodeId);
		}

		let mut bytes = Vec::new();
		self.invoice.write(&mut bytes).expect("in-memory writes cannot fail");

		Ok(UnsignedInvoice { invoice: self.invoice, bytes })
	}
}

/// A semantically valid [`Invoice`] that hasn't been signed.
pub struct UnsignedInvoice {
	invoice: InvoiceContents,
	bytes: Vec<u8>,
}

impl UnsignedInvoice {
	/// Signs the invoice using the given function, which must produce a BIP 340 signature by
	/// the invoice's node id over the merkle root of its TLV records.
	pub fn sign<F, E>(mut self, sign: F) -> Result<Invoice, SignError<E>>
	where
		F: FnOnce(&Message) -> Result<Signature, E>,
	{
		let node_id = self.invoice.node_id.expect("enforced by the builder");
		let signature = merkle::sign_message(sign, "invoice", "signature", &self.bytes, node_id)?;
		write_tlv_record(&mut self.bytes, SIGNATURE_TYPE, &signature)
			.expect("in-memory writes cannot fail");
		Ok(Invoice { bytes: self.bytes, contents: self.invoice, signature: Some(signature) })
	}
}
