// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Data structures and encoding for `offer` messages.
//!
//! An [`Offer`] represents an "offer to be paid." It is typically constructed by a merchant and
//! published as a QR code to be scanned by a customer. The customer uses the offer to request an
//! invoice from the merchant to be paid.
//!
//! ```
//! use bitcoin::secp256k1::{KeyPair, Secp256k1, SecretKey};
//! use core::convert::Infallible;
//! use lightning_offers::offers::offer::{Offer, OfferBuilder};
//! use lightning_offers::offers::parse::ParseError;
//!
//! # fn build() -> Result<(), ParseError> {
//! let secp_ctx = Secp256k1::new();
//! let keys = KeyPair::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[42; 32]).unwrap());
//! let pubkey = keys.x_only_public_key().0;
//!
//! let offer = OfferBuilder::new("coffee, large".to_string(), pubkey)
//!     .amount_msats(20_000)
//!     .vendor("Foo Bar".to_string())
//!     .build()
//!     .unwrap()
//!     .sign::<_, Infallible>(|digest| Ok(secp_ctx.sign_schnorr_no_aux_rand(digest, &keys)))
//!     .expect("failed signing offer");
//!
//! // Encode as a bech32 string for use in a QR code.
//! let encoded_offer = offer.to_string();
//!
//! // Parse from a bech32 string after scanning from a QR code.
//! let offer = encoded_offer.parse::<Offer>()?;
//! offer.verify_signature(&secp_ctx)?;
//! # Ok(())
//! # }
//! ```

use bitcoin::blockdata::constants::ChainHash;
use bitcoin::hashes::Hash;
use bitcoin::network::constants::Network;
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{self, Message, Secp256k1, XOnlyPublicKey};
use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::io::{self, Read, Seek};

use crate::ln::features::Features;
use crate::ln::msgs::DecodeError;
use crate::ln::MAX_VALUE_MSAT;
use crate::offers::invoice_request::InvoiceRequestBuilder;
use crate::offers::merkle::{self, root_hash, SignError};
use crate::offers::parse::{Bech32Encode, ParseError, ParsedMessage, SemanticError};
use crate::offers::recurrence::{Recurrence, RecurrenceBase, RecurrencePaywindow};
use crate::util::ser::{
	read_tlv_stream, write_tlv_record, HighZeroBytesDroppedBigSize, Readable, SeekReadable,
	Writeable, WithoutLength, Writer,
};
use crate::util::string::PrintableString;

use std::time::SystemTime;

const OFFER_CHAINS_TYPE: u64 = 2;
const OFFER_CURRENCY_TYPE: u64 = 6;
const OFFER_AMOUNT_TYPE: u64 = 8;
const OFFER_DESCRIPTION_TYPE: u64 = 10;
const OFFER_FEATURES_TYPE: u64 = 12;
const OFFER_ABSOLUTE_EXPIRY_TYPE: u64 = 14;
const OFFER_VENDOR_TYPE: u64 = 20;
const OFFER_QUANTITY_MIN_TYPE: u64 = 22;
const OFFER_QUANTITY_MAX_TYPE: u64 = 24;
const OFFER_RECURRENCE_TYPE: u64 = 26;
const OFFER_RECURRENCE_PAYWINDOW_TYPE: u64 = 28;
const OFFER_RECURRENCE_LIMIT_TYPE: u64 = 30;
const OFFER_RECURRENCE_BASE_TYPE: u64 = 32;
const OFFER_NODE_ID_TYPE: u64 = 34;
const OFFER_SEND_INVOICE_TYPE: u64 = 54;
const SIGNATURE_TYPE: u64 = 240;

/// An identifier for an [`Offer`]: the merkle root of its TLV records, which also binds
/// invoice_requests and invoices back to it.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct OfferId(pub [u8; 32]);

impl Writeable for OfferId {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.0.write(w)
	}
}

impl Readable for OfferId {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(OfferId(Readable::read(r)?))
	}
}

impl fmt::Display for OfferId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for byte in self.0.iter() {
			write!(f, "{:02x}", byte)?;
		}
		Ok(())
	}
}

/// An `Offer` is a potentially long-lived proposal for payment of a good or service.
///
/// An offer is a precursor to an [`InvoiceRequest`]. A merchant publishes an offer from which a
/// customer may request an [`Invoice`] for a specific quantity and using an amount sufficient to
/// cover that quantity (i.e., at least `quantity * amount`). See [`Offer::amount`].
///
/// Offers may be denominated in currency other than bitcoin but are ultimately paid using the
/// latter.
///
/// [`InvoiceRequest`]: crate::offers::invoice_request::InvoiceRequest
/// [`Invoice`]: crate::offers::invoice::Invoice
#[derive(Clone, Debug, PartialEq)]
pub struct Offer {
	// The serialized offer. Needed when creating an `InvoiceRequest` if the offer contains
	// unknown odd fields, which are carried in the merkle root but not in `contents`.
	pub(super) bytes: Vec<u8>,
	pub(super) contents: OfferContents,
}

/// The contents of an [`Offer`], which may be reflected in an `invoice_request` or an `invoice`.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct OfferContents {
	chains: Option<Vec<ChainHash>>,
	amount: Option<Amount>,
	description: String,
	features: Features,
	absolute_expiry: Option<Duration>,
	vendor: Option<String>,
	quantity_min: Option<u64>,
	quantity_max: Option<u64>,
	recurrence: Option<Recurrence>,
	recurrence_paywindow: Option<RecurrencePaywindow>,
	recurrence_limit: Option<u32>,
	recurrence_base: Option<RecurrenceBase>,
	node_id: XOnlyPublicKey,
	send_invoice: bool,
	signature: Option<Signature>,
}

impl Offer {
	/// The chains that may be used when paying a requested invoice (e.g., bitcoin mainnet).
	/// Payments must be denominated in units of the minimal lightning-payable unit (e.g., msats)
	/// for the selected chain.
	pub fn chains(&self) -> Vec<ChainHash> {
		self.contents.chains()
	}

	pub(super) fn implied_chain(&self) -> ChainHash {
		self.contents.implied_chain()
	}

	/// Returns whether the given chain is supported by the offer.
	pub fn supports_chain(&self, chain: ChainHash) -> bool {
		self.contents.supports_chain(chain)
	}

	/// The minimum amount required for a successful payment of a single item.
	pub fn amount(&self) -> Option<&Amount> {
		self.contents.amount.as_ref()
	}

	/// A complete description of the purpose of the payment. Intended to be displayed to the user
	/// but with the caveat that it has not been verified in any way.
	pub fn description(&self) -> PrintableString {
		PrintableString(&self.contents.description)
	}

	pub(super) fn description_string(&self) -> &String {
		&self.contents.description
	}

	/// Features pertaining to the offer.
	pub fn features(&self) -> &Features {
		&self.contents.features
	}

	/// Duration since the Unix epoch when an invoice should no longer be requested.
	///
	/// If `None`, the offer does not expire.
	pub fn absolute_expiry(&self) -> Option<Duration> {
		self.contents.absolute_expiry
	}

	/// Whether the offer has expired.
	pub fn is_expired(&self) -> bool {
		match SystemTime::UNIX_EPOCH.elapsed() {
			Ok(elapsed) => self.is_expired_no_std(elapsed),
			Err(_) => false,
		}
	}

	/// Whether the offer has expired given the duration since the Unix epoch.
	pub fn is_expired_no_std(&self, duration_since_epoch: Duration) -> bool {
		match self.contents.absolute_expiry {
			Some(seconds_from_epoch) => duration_since_epoch > seconds_from_epoch,
			None => false,
		}
	}

	/// The vendor of the offered goods, possibly beginning with `user@domain` or `domain`.
	/// Intended to be displayed to the user but with the caveat that it has not been verified in
	/// any way.
	pub fn vendor(&self) -> Option<PrintableString> {
		self.contents.vendor.as_ref().map(|vendor| PrintableString(vendor.as_str()))
	}

	pub(super) fn vendor_string(&self) -> Option<&String> {
		self.contents.vendor.as_ref()
	}

	/// The minimum quantity of items which may be requested, if any quantity is expected.
	pub fn quantity_min(&self) -> Option<u64> {
		self.contents.quantity_min
	}

	/// The maximum quantity of items which may be requested, if limited.
	pub fn quantity_max(&self) -> Option<u64> {
		self.contents.quantity_max
	}

	/// Returns whether a quantity is expected in an `invoice_request` for the offer.
	pub fn expects_quantity(&self) -> bool {
		self.contents.expects_quantity()
	}

	/// Returns whether the given quantity is valid for the offer.
	pub fn is_valid_quantity(&self, quantity: u64) -> bool {
		self.contents.is_valid_quantity(quantity)
	}

	/// The offer's period description, if the offer is for a recurring payment.
	pub fn recurrence(&self) -> Option<&Recurrence> {
		self.contents.recurrence.as_ref()
	}

	/// Restricts when invoices for recurrence periods may be paid.
	pub fn recurrence_paywindow(&self) -> Option<&RecurrencePaywindow> {
		self.contents.recurrence_paywindow.as_ref()
	}

	/// The final period index for which invoices may be requested.
	pub fn recurrence_limit(&self) -> Option<u32> {
		self.contents.recurrence_limit
	}

	/// Anchors the offer's recurrence periods at an absolute time.
	pub fn recurrence_base(&self) -> Option<&RecurrenceBase> {
		self.contents.recurrence_base.as_ref()
	}

	/// The public key used by the recipient to sign invoices.
	pub fn node_id(&self) -> XOnlyPublicKey {
		self.contents.node_id
	}

	/// Whether this is an inverted offer, soliciting an invoice (payment *to* the scanning user)
	/// rather than an invoice_request. Such offers are handled by a separate flow and are
	/// refused by [`OffersFlow::fetch_invoice`].
	///
	/// [`OffersFlow::fetch_invoice`]: crate::offers::flow::OffersFlow::fetch_invoice
	pub fn send_invoice(&self) -> bool {
		self.contents.send_invoice
	}

	/// The signature by [`Offer::node_id`] over the offer's merkle root, if present.
	pub fn signature(&self) -> Option<Signature> {
		self.contents.signature
	}

	/// Creates an [`InvoiceRequestBuilder`] for the offer. Errors if the offer requires features
	/// this crate does not know, in which case it must not be responded to.
	pub fn request_invoice(&self) -> Result<InvoiceRequestBuilder, SemanticError> {
		if self.features().requires_unknown_bits() {
			return Err(SemanticError::UnknownRequiredFeatures);
		}

		Ok(InvoiceRequestBuilder::new(self))
	}

	/// The merkle root of the offer's TLV records, identifying it and binding requests to it.
	/// Signature records are excluded, so the id is the same before and after signing.
	pub fn id(&self) -> OfferId {
		OfferId(root_hash(&self.bytes).into_inner())
	}

	/// Verifies that the offer carries a signature by [`Offer::node_id`] over its merkle root.
	/// Offers without a valid signature must not be acted upon.
	pub fn verify_signature<T: secp256k1::Verification>(
		&self, secp_ctx: &Secp256k1<T>,
	) -> Result<(), ParseError> {
		match self.contents.signature {
			None => Err(ParseError::InvalidSemantics(SemanticError::MissingSignature)),
			Some(signature) => {
				merkle::verify_signature(
					&signature,
					"offer",
					"signature",
					&self.bytes,
					self.contents.node_id,
					secp_ctx,
				)?;
				Ok(())
			},
		}
	}

	/// Signs the offer using the given function, which must produce a BIP 340 signature by
	/// [`Offer::node_id`] over the merkle root of the offer's TLV records.
	pub fn sign<F, E>(mut self, sign: F) -> Result<Self, SignError<E>>
	where
		F: FnOnce(&Message) -> Result<Signature, E>,
	{
		debug_assert!(self.contents.signature.is_none());
		let signature =
			merkle::sign_message(sign, "offer", "signature", &self.bytes, self.contents.node_id)?;
		self.append_signature(signature);
		Ok(self)
	}

	/// Attaches an externally produced signature after checking it verifies.
	pub(super) fn with_signature<T: secp256k1::Verification>(
		mut self, signature: Signature, secp_ctx: &Secp256k1<T>,
	) -> Result<Self, secp256k1::Error> {
		debug_assert!(self.contents.signature.is_none());
		merkle::verify_signature(
			&signature,
			"offer",
			"signature",
			&self.bytes,
			self.contents.node_id,
			secp_ctx,
		)?;
		self.append_signature(signature);
		Ok(self)
	}

	fn append_signature(&mut self, signature: Signature) {
		write_tlv_record(&mut self.bytes, SIGNATURE_TYPE, &signature)
			.expect("in-memory writes cannot fail");
		self.contents.signature = Some(signature);
	}
}

impl AsRef<[u8]> for Offer {
	fn as_ref(&self) -> &[u8] {
		&self.bytes
	}
}

impl Writeable for Offer {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		WithoutLength(&self.bytes).write(writer)
	}
}

impl OfferContents {
	pub fn chains(&self) -> Vec<ChainHash> {
		self.chains.as_ref().cloned().unwrap_or_else(|| vec![self.implied_chain()])
	}

	pub fn implied_chain(&self) -> ChainHash {
		ChainHash::using_genesis_block(Network::Bitcoin)
	}

	pub fn supports_chain(&self, chain: ChainHash) -> bool {
		self.chains().contains(&chain)
	}

	pub(super) fn expects_quantity(&self) -> bool {
		self.quantity_min.is_some() || self.quantity_max.is_some()
	}

	fn is_valid_quantity(&self, quantity: u64) -> bool {
		quantity >= self.quantity_min.unwrap_or(1)
			&& quantity <= self.quantity_max.unwrap_or(u64::MAX)
	}

	pub(super) fn check_quantity(&self, quantity: Option<u64>) -> Result<(), SemanticError> {
		match quantity {
			None if self.expects_quantity() => Err(SemanticError::MissingQuantity),
			Some(_) if !self.expects_quantity() => Err(SemanticError::UnexpectedQuantity),
			Some(quantity) if !self.is_valid_quantity(quantity) => {
				Err(SemanticError::InvalidQuantity)
			},
			_ => Ok(()),
		}
	}
}

impl Writeable for OfferContents {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		if let Some(ref chains) = self.chains {
			write_tlv_record(writer, OFFER_CHAINS_TYPE, &WithoutLength(chains))?;
		}
		let (currency, amount) = match self.amount {
			None => (None, None),
			Some(Amount::Bitcoin { amount_msats }) => (None, Some(amount_msats)),
			Some(Amount::Currency { iso4217_code, amount }) => (Some(iso4217_code), Some(amount)),
		};
		if let Some(currency) = currency {
			write_tlv_record(writer, OFFER_CURRENCY_TYPE, &currency)?;
		}
		if let Some(amount) = amount {
			write_tlv_record(writer, OFFER_AMOUNT_TYPE, &HighZeroBytesDroppedBigSize(amount))?;
		}
		write_tlv_record(writer, OFFER_DESCRIPTION_TYPE, &WithoutLength(&self.description))?;
		if !self.features.is_empty() {
			write_tlv_record(writer, OFFER_FEATURES_TYPE, &self.features)?;
		}
		if let Some(absolute_expiry) = self.absolute_expiry {
			write_tlv_record(
				writer,
				OFFER_ABSOLUTE_EXPIRY_TYPE,
				&HighZeroBytesDroppedBigSize(absolute_expiry.as_secs()),
			)?;
		}
		if let Some(ref vendor) = self.vendor {
			write_tlv_record(writer, OFFER_VENDOR_TYPE, &WithoutLength(vendor))?;
		}
		if let Some(quantity_min) = self.quantity_min {
			write_tlv_record(
				writer,
				OFFER_QUANTITY_MIN_TYPE,
				&HighZeroBytesDroppedBigSize(quantity_min),
			)?;
		}
		if let Some(quantity_max) = self.quantity_max {
			write_tlv_record(
				writer,
				OFFER_QUANTITY_MAX_TYPE,
				&HighZeroBytesDroppedBigSize(quantity_max),
			)?;
		}
		if let Some(ref recurrence) = self.recurrence {
			write_tlv_record(writer, OFFER_RECURRENCE_TYPE, recurrence)?;
		}
		if let Some(ref paywindow) = self.recurrence_paywindow {
			write_tlv_record(writer, OFFER_RECURRENCE_PAYWINDOW_TYPE, paywindow)?;
		}
		if let Some(limit) = self.recurrence_limit {
			write_tlv_record(
				writer,
				OFFER_RECURRENCE_LIMIT_TYPE,
				&HighZeroBytesDroppedBigSize(limit),
			)?;
		}
		if let Some(ref base) = self.recurrence_base {
			write_tlv_record(writer, OFFER_RECURRENCE_BASE_TYPE, base)?;
		}
		write_tlv_record(writer, OFFER_NODE_ID_TYPE, &self.node_id)?;
		if self.send_invoice {
			write_tlv_record(writer, OFFER_SEND_INVOICE_TYPE, &())?;
		}
		if let Some(ref signature) = self.signature {
			write_tlv_record(writer, SIGNATURE_TYPE, signature)?;
		}
		Ok(())
	}
}

/// The minimum amount required for an item in an [`Offer`], denominated in either bitcoin or
/// another currency.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Amount {
	/// An amount of bitcoin.
	Bitcoin {
		/// The amount in millisatoshi.
		amount_msats: u64,
	},
	/// An amount of currency specified using ISO 4217.
	Currency {
		/// The currency that the amount is denominated in.
		iso4217_code: CurrencyCode,
		/// The amount in the currency unit adjusted by the ISO 4217 exponent (e.g., USD cents).
		amount: u64,
	},
}

/// An ISO 4217 three-letter currency code (e.g., USD).
pub type CurrencyCode = [u8; 3];

#[derive(Default)]
struct OfferTlvStream {
	chains: Option<Vec<ChainHash>>,
	currency: Option<CurrencyCode>,
	amount: Option<u64>,
	description: Option<String>,
	features: Option<Features>,
	absolute_expiry: Option<u64>,
	vendor: Option<String>,
	quantity_min: Option<u64>,
	quantity_max: Option<u64>,
	recurrence: Option<Recurrence>,
	recurrence_paywindow: Option<RecurrencePaywindow>,
	recurrence_limit: Option<u32>,
	recurrence_base: Option<RecurrenceBase>,
	node_id: Option<XOnlyPublicKey>,
	send_invoice: bool,
	signature: Option<Signature>,
}

impl SeekReadable for OfferTlvStream {
	fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut stream = OfferTlvStream::default();
		read_tlv_stream(reader, |r#type, mut value| {
			match r#type {
				OFFER_CHAINS_TYPE => {
					let chains: WithoutLength<Vec<ChainHash>> = Readable::read(&mut value)?;
					stream.chains = Some(chains.0);
				},
				OFFER_CURRENCY_TYPE => stream.currency = Some(Readable::read(&mut value)?),
				OFFER_AMOUNT_TYPE => {
					let amount: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					stream.amount = Some(amount.0);
				},
				OFFER_DESCRIPTION_TYPE => {
					let description: WithoutLength<String> = Readable::read(&mut value)?;
					stream.description = Some(description.0);
				},
				OFFER_FEATURES_TYPE => stream.features = Some(Readable::read(&mut value)?),
				OFFER_ABSOLUTE_EXPIRY_TYPE => {
					let expiry: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					stream.absolute_expiry = Some(expiry.0);
				},
				OFFER_VENDOR_TYPE => {
					let vendor: WithoutLength<String> = Readable::read(&mut value)?;
					stream.vendor = Some(vendor.0);
				},
				OFFER_QUANTITY_MIN_TYPE => {
					let min: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					stream.quantity_min = Some(min.0);
				},
				OFFER_QUANTITY_MAX_TYPE => {
					let max: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					stream.quantity_max = Some(max.0);
				},
				OFFER_RECURRENCE_TYPE => stream.recurrence = Some(Readable::read(&mut value)?),
				OFFER_RECURRENCE_PAYWINDOW_TYPE => {
					stream.recurrence_paywindow = Some(Readable::read(&mut value)?);
				},
				OFFER_RECURRENCE_LIMIT_TYPE => {
					let limit: HighZeroBytesDroppedBigSize<u32> = Readable::read(&mut value)?;
					stream.recurrence_limit = Some(limit.0);
				},
				OFFER_RECURRENCE_BASE_TYPE => {
					stream.recurrence_base = Some(Readable::read(&mut value)?);
				},
				OFFER_NODE_ID_TYPE => stream.node_id = Some(Readable::read(&mut value)?),
				OFFER_SEND_INVOICE_TYPE => stream.send_invoice = true,
				SIGNATURE_TYPE => stream.signature = Some(Readable::read(&mut value)?),
				_ => return Ok(false),
			}
			Ok(true)
		})?;
		Ok(stream)
	}
}

impl TryFrom<OfferTlvStream> for OfferContents {
	type Error = SemanticError;

	fn try_from(tlv_stream: OfferTlvStream) -> Result<Self, Self::Error> {
		let OfferTlvStream {
			chains,
			currency,
			amount,
			description,
			features,
			absolute_expiry,
			vendor,
			quantity_min,
			quantity_max,
			recurrence,
			recurrence_paywindow,
			recurrence_limit,
			recurrence_base,
			node_id,
			send_invoice,
			signature,
		} = tlv_stream;

		let amount = match (currency, amount) {
			(None, None) => None,
			(None, Some(amount_msats)) if amount_msats > MAX_VALUE_MSAT => {
				return Err(SemanticError::InvalidAmount);
			},
			(None, Some(amount_msats)) => Some(Amount::Bitcoin { amount_msats }),
			(Some(_), None) => return Err(SemanticError::MissingAmount),
			(Some(iso4217_code), Some(amount)) => Some(Amount::Currency { iso4217_code, amount }),
		};

		let description = match description {
			None => return Err(SemanticError::MissingDescription),
			Some(description) => description,
		};

		let features = features.unwrap_or_else(Features::empty);

		let absolute_expiry = absolute_expiry.map(Duration::from_secs);

		let node_id = match node_id {
			None => return Err(SemanticError::MissingNodeId),
			Some(node_id) => node_id,
		};

		Ok(OfferContents {
			chains,
			amount,
			description,
			features,
			absolute_expiry,
			vendor,
			quantity_min,
			quantity_max,
			recurrence,
			recurrence_paywindow,
			recurrence_limit,
			recurrence_base,
			node_id,
			send_invoice,
			signature,
		})
	}
}

impl Bech32Encode for Offer {
	const BECH32_HRP: &'static str = "lno";
}

impl FromStr for Offer {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, <Self as FromStr>::Err> {
		Self::from_bech32_str(s)
	}
}

impl TryFrom<Vec<u8>> for Offer {
	type Error = ParseError;

	fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
		let offer = ParsedMessage::<OfferTlvStream>::try_from(bytes)?;
		let ParsedMessage { bytes, tlv_stream } = offer;
		let contents = OfferContents::try_from(tlv_stream)?;
		Ok(Offer { bytes, contents })
	}
}

impl fmt::Display for Offer {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		self.fmt_bech32_str(f)
	}
}

/// Builds an [`Offer`] for the "offer to be paid" flow.
///
/// See [module-level documentation] for usage.
///
/// [module-level documentation]: self
pub struct OfferBuilder {
	offer: OfferContents,
}

impl OfferBuilder {
	/// Creates a new builder for an offer setting the [`Offer::description`] and using the given
	/// node id for signing invoices.
	pub fn new(description: String, node_id: XOnlyPublicKey) -> Self {
		let offer = OfferContents {
			chains: None,
			amount: None,
			description,
			features: Features::empty(),
			absolute_expiry: None,
			vendor: None,
			quantity_min: None,
			quantity_max: None,
			recurrence: None,
			recurrence_paywindow: None,
			recurrence_limit: None,
			recurrence_base: None,
			node_id,
			send_invoice: false,
			signature: None,
		};
		OfferBuilder { offer }
	}

	/// Adds the chain hash of the given [`Network`] to [`Offer::chains`]. If not called, the
	/// chain hash of [`Network::Bitcoin`] is assumed to be the only one supported.
	///
	/// Successive calls to this method will add another chain hash.
	pub fn chain(mut self, network: Network) -> Self {
		let chains = self.offer.chains.get_or_insert_with(Vec::new);
		let chain = ChainHash::using_genesis_block(network);
		if !chains.contains(&chain) {
			chains.push(chain);
		}

		self
	}

	/// Sets the [`Offer::amount`] as an [`Amount::Bitcoin`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn amount_msats(self, amount_msats: u64) -> Self {
		self.amount(Amount::Bitcoin { amount_msats })
	}

	/// Sets the [`Offer::amount`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn amount(mut self, amount: Amount) -> Self {
		self.offer.amount = Some(amount);
		self
	}

	/// Sets the [`Offer::absolute_expiry`] as seconds since the Unix epoch. Any expiry that has
	/// already passed is valid and can be checked for using [`Offer::is_expired`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn absolute_expiry(mut self, absolute_expiry: Duration) -> Self {
		self.offer.absolute_expiry = Some(absolute_expiry);
		self
	}

	/// Sets the [`Offer::vendor`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn vendor(mut self, vendor: String) -> Self {
		self.offer.vendor = Some(vendor);
		self
	}

	/// Sets the [`Offer::quantity_min`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn quantity_min(mut self, quantity_min: u64) -> Self {
		self.offer.quantity_min = Some(quantity_min);
		self
	}

	/// Sets the [`Offer::quantity_max`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn quantity_max(mut self, quantity_max: u64) -> Self {
		self.offer.quantity_max = Some(quantity_max);
		self
	}

	/// Makes the offer recurring with the given period.
	///
	/// Successive calls to this method will override the previous setting.
	pub fn recurrence(mut self, recurrence: Recurrence) -> Self {
		self.offer.recurrence = Some(recurrence);
		self
	}

	/// Sets the [`Offer::recurrence_base`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn recurrence_base(mut self, base: RecurrenceBase) -> Self {
		self.offer.recurrence_base = Some(base);
		self
	}

	/// Sets the [`Offer::recurrence_paywindow`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn recurrence_paywindow(mut self, paywindow: RecurrencePaywindow) -> Self {
		self.offer.recurrence_paywindow = Some(paywindow);
		self
	}

	/// Sets the [`Offer::recurrence_limit`].
	///
	/// Successive calls to this method will override the previous setting.
	pub fn recurrence_limit(mut self, limit: u32) -> Self {
		self.offer.recurrence_limit = Some(limit);
		self
	}

	/// Marks the offer as soliciting an invoice (payment *to* the user scanning the offer).
	pub fn send_invoice(mut self) -> Self {
		self.offer.send_invoice = true;
		self
	}

	/// Builds an [`Offer`] from the builder's settings. The offer is not yet signed; see
	/// [`Offer::sign`].
	pub fn build(mut self) -> Result<Offer, SemanticError> {
		match self.offer.amount {
			Some(Amount::Bitcoin { amount_msats }) => {
				if amount_msats > MAX_VALUE_MSAT {
					return Err(SemanticError::InvalidAmount);
				}
			},
			_ => {},
		}

		if let Some(chains) = &self.offer.chains {
			if chains.len() == 1 && chains[0] == self.offer.implied_chain() {
				self.offer.chains = None;
			}
		}

		let mut bytes = Vec::new();
		self.offer.write(&mut bytes).expect("in-memory writes cannot fail");

		Ok(Offer { bytes, contents: self.offer })
	}
}

#[cfg(test)]
impl OfferBuilder {
	pub(super) fn features_unchecked(mut self, features: Features) -> Self {
		self.offer.features = features;
		self
	}
}
