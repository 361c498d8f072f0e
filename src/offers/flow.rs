// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The offer-to-invoice exchange engine.
//!
//! [`OffersFlow`] drives both sides of offer bookkeeping: managing our own signed offers
//! (create, list, disable, mark used) and fetching invoices for someone else's offer. The
//! latter is the interesting part: an invoice_request with a derivation-hidden payer key is
//! sent over a routed onion message carrying a blinded reply path, and the outstanding request
//! is remembered under the reply path's final blinding point. When a reply arrives on the
//! inbound hook it is matched by that blinding, validated against every BOLT 12 requirement,
//! and resolved into an [`Event`].
//!
//! All entry points are synchronous and single-threaded-friendly; the long async gap lives in
//! the [`outstanding`] table rather than on anyone's stack, so cancellation is a table removal
//! and nothing more.
//!
//! [`outstanding`]: OffersFlow
//! [`Event`]: crate::events::Event

use bitcoin::blockdata::constants::ChainHash;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::network::constants::Network;
use bitcoin::secp256k1::{self, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use core::fmt;
use core::ops::Deref;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::blinded_path::utils::construct_reply_path;
use crate::events::{Event, FetchFailure, InvoiceChanges, NextPeriod, RequestId};
use crate::ln::features::Features;
use crate::offers::invoice::Invoice;
use crate::offers::invoice_error::InvoiceError;
use crate::offers::invoice_request::{
	InvoiceRequest, InvoiceRequestContents, UnsignedInvoiceRequest,
};
use crate::offers::offer::{Amount, Offer, OfferId};
use crate::offers::parse::ParseError;
use crate::offers::payer::{derive_payer_key, PAYER_INFO_LENGTH};
use crate::onion_message::{
	MessageHop, OnionMessageReply, OnionPayload, Transport, TransportError,
};
use crate::routing::gossip::{NetworkView, NodeId};
use crate::routing::onion_message::{self as router, find_path};
use crate::sign::{Bolt12Signer, EntropySource, SignerError};
use crate::util::logger::Logger;
use crate::util::ser::Writeable;

/// How many times to re-mint `payer_info` when the derived tweak is unusable before giving up.
/// A single failure already has probability on the order of 2^-128.
const MAX_TWEAK_ATTEMPTS: usize = 3;

/// The status of a stored offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferStatus {
	/// Active, valid for a single payment.
	SingleUse,
	/// Active, valid for any number of payments.
	MultipleUse,
	/// A single-use offer which has been paid.
	Used,
	/// A single-use offer disabled before use.
	SingleDisabled,
	/// A multi-use offer that has been disabled.
	MultipleDisabled,
}

impl OfferStatus {
	/// Whether invoice_requests for the offer should still be answered.
	pub fn is_active(self) -> bool {
		matches!(self, OfferStatus::SingleUse | OfferStatus::MultipleUse)
	}

	/// Whether the offer was created for a single payment.
	pub fn is_single_use(self) -> bool {
		matches!(self, OfferStatus::SingleUse | OfferStatus::Used | OfferStatus::SingleDisabled)
	}
}

/// A stored offer, as persisted through the [`Wallet`].
#[derive(Clone, Debug, PartialEq)]
pub struct OfferRecord {
	/// The bech32-encoded, signed offer.
	pub bolt12: String,
	/// An optional user-provided label.
	pub label: Option<String>,
	/// The offer's lifecycle status.
	pub status: OfferStatus,
}

/// The status of a payment in the wallet's payment store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
	/// The payment is in flight.
	Pending,
	/// The payment succeeded.
	Complete,
	/// The payment failed.
	Failed,
}

/// A payment known to the wallet, used to establish recurrence continuity.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentRecord {
	/// The label the payment was made under.
	pub label: Option<String>,
	/// The bech32-encoded invoice that was paid.
	pub invoice: String,
	/// The payment's outcome.
	pub status: PaymentStatus,
}

/// The wallet store consumed by the engine: offers keyed by [`OfferId`], plus payment lookup
/// for recurrence continuity.
pub trait Wallet {
	/// Stores a new offer. Returns `false` if an offer with this id already exists.
	fn create_offer(&self, offer_id: &OfferId, record: OfferRecord) -> bool;

	/// Looks up a stored offer.
	fn find_offer(&self, offer_id: &OfferId) -> Option<OfferRecord>;

	/// All stored offer ids.
	fn list_offer_ids(&self) -> Vec<OfferId>;

	/// Updates a stored offer's status.
	fn set_offer_status(&self, offer_id: &OfferId, status: OfferStatus);

	/// All payments made under the given label.
	fn payments_by_label(&self, label: &str) -> Vec<PaymentRecord>;
}

/// Stable error codes, for surfacing through a JSON-RPC layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
	/// An offer with the same id already exists.
	OfferAlreadyExists,
	/// The offer is already disabled or used up.
	OfferAlreadyDisabled,
	/// The offer's absolute expiry has passed.
	OfferExpired,
	/// No usable onion message route to the offering node.
	OfferRouteNotFound,
	/// The reply to our invoice_request was unusable.
	OfferBadInvreqReply,
	/// A parameter was inconsistent with the offer.
	InvalidParams,
}

impl ErrorCode {
	/// The numeric code as used on the wire.
	pub fn code(self) -> i64 {
		match self {
			ErrorCode::OfferAlreadyExists => 1000,
			ErrorCode::OfferAlreadyDisabled => 1001,
			ErrorCode::OfferExpired => 1002,
			ErrorCode::OfferRouteNotFound => 1003,
			ErrorCode::OfferBadInvreqReply => 1004,
			ErrorCode::InvalidParams => -32602,
		}
	}
}

/// An error from one of the engine's entry points. Asynchronous failures are surfaced as
/// [`Event::InvoiceRequestFailed`] instead.
///
/// [`Event::InvoiceRequestFailed`]: crate::events::Event::InvoiceRequestFailed
#[derive(Debug, PartialEq)]
pub enum OfferError {
	/// An input string failed to parse.
	Parse(ParseError),
	/// A parameter was inconsistent with the offer; the message names the field.
	InvalidParams(String),
	/// An offer with the same id already exists.
	DuplicateOffer,
	/// No offer with the given id exists.
	UnknownOffer,
	/// The offer is not active.
	OfferAlreadyDisabled,
	/// The offer's absolute expiry has passed.
	OfferExpired,
	/// The offering node is not present in the network graph.
	UnknownDestination(XOnlyPublicKey),
	/// No usable onion message route was found.
	RouteNotFound(&'static str),
	/// A recurrence follow-up was requested but no prior payment exists for the label and offer.
	NoPriorPayment,
	/// A recurrence follow-up was requested but the previous period's invoice was never paid.
	PriorNotPaid,
	/// Payer key derivation failed for the given tweak.
	InvalidTweak,
	/// The signer failed; fatal, the signer is trusted infrastructure.
	Signer(SignerError),
	/// The transport failed to take the message; fatal.
	Transport(TransportError),
}

impl OfferError {
	/// The stable error code for this error, or `None` for fatal infrastructure failures which
	/// have no wire representation.
	pub fn code(&self) -> Option<ErrorCode> {
		match self {
			OfferError::Parse(_)
			| OfferError::InvalidParams(_)
			| OfferError::UnknownOffer
			| OfferError::NoPriorPayment
			| OfferError::PriorNotPaid
			| OfferError::InvalidTweak => Some(ErrorCode::InvalidParams),
			OfferError::DuplicateOffer => Some(ErrorCode::OfferAlreadyExists),
			OfferError::OfferAlreadyDisabled => Some(ErrorCode::OfferAlreadyDisabled),
			OfferError::OfferExpired => Some(ErrorCode::OfferExpired),
			OfferError::UnknownDestination(_) | OfferError::RouteNotFound(_) => {
				Some(ErrorCode::OfferRouteNotFound)
			},
			OfferError::Signer(_) | OfferError::Transport(_) => None,
		}
	}
}

impl fmt::Display for OfferError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			OfferError::Parse(e) => write!(f, "Unparsable offer: {:?}", e),
			OfferError::InvalidParams(msg) => write!(f, "{}", msg),
			OfferError::DuplicateOffer => write!(f, "Duplicate offer"),
			OfferError::UnknownOffer => write!(f, "Unknown offer"),
			OfferError::OfferAlreadyDisabled => write!(f, "offer is not active"),
			OfferError::OfferExpired => write!(f, "Offer expired"),
			OfferError::UnknownDestination(node_id) => {
				write!(f, "Unknown destination ")?;
				for byte in node_id.serialize().iter() {
					write!(f, "{:02x}", byte)?;
				}
				Ok(())
			},
			OfferError::RouteNotFound(msg) => write!(f, "{}", msg),
			OfferError::NoPriorPayment => {
				write!(f, "No previous payment attempted for this label and offer")
			},
			OfferError::PriorNotPaid => write!(f, "previous invoice has not been paid"),
			OfferError::InvalidTweak => write!(f, "Invalid tweak"),
			OfferError::Signer(e) => write!(f, "{}", e),
			OfferError::Transport(e) => write!(f, "{}", e),
		}
	}
}

impl From<ParseError> for OfferError {
	fn from(error: ParseError) -> Self {
		OfferError::Parse(error)
	}
}

/// A stored offer as reported to the user.
#[derive(Clone, Debug, PartialEq)]
pub struct OfferInfo {
	/// The offer's id: the merkle root of its TLV records.
	pub offer_id: OfferId,
	/// Whether invoice_requests for the offer are still answered.
	pub active: bool,
	/// Whether the offer was created for a single payment.
	pub single_use: bool,
	/// The bech32-encoded, signed offer.
	pub bolt12: String,
	/// Whether a single-use offer has been paid.
	pub used: bool,
	/// The user-provided label, if any.
	pub label: Option<String>,
}

impl OfferInfo {
	fn new(offer_id: OfferId, record: OfferRecord) -> Self {
		OfferInfo {
			offer_id,
			active: record.status.is_active(),
			single_use: record.status.is_single_use(),
			bolt12: record.bolt12,
			used: record.status == OfferStatus::Used,
			label: record.label,
		}
	}
}

/// User-supplied parameters for [`OffersFlow::fetch_invoice`].
#[derive(Clone, Debug, Default)]
pub struct FetchInvoiceParams {
	/// The amount to offer, required exactly when the offer does not state one.
	pub amount_msats: Option<u64>,
	/// The quantity of items, required exactly when the offer has quantity bounds.
	pub quantity: Option<u64>,
	/// The recurrence period to request, required exactly when the offer recurs.
	pub recurrence_counter: Option<u32>,
	/// The period offset, required exactly when the offer's recurrence base allows starting at
	/// any period.
	pub recurrence_start: Option<u32>,
	/// A label tying the payments of one recurrence series together; required when the offer
	/// recurs.
	pub recurrence_label: Option<String>,
	/// A free-form note to include in the request.
	pub payer_note: Option<String>,
}

/// Configuration for an [`OffersFlow`].
#[derive(Clone, Debug)]
pub struct FlowConfig {
	/// The chain invoices are requested for. Only written into requests when not mainnet, which
	/// is implied on the wire.
	pub chain: ChainHash,
	/// Feature bits to advertise in invoice_requests, typically the node's BOLT 11 set.
	pub features: Features,
	/// How long to wait for an invoice reply before giving up on a request.
	pub request_timeout: Duration,
}

impl Default for FlowConfig {
	fn default() -> Self {
		FlowConfig {
			chain: ChainHash::using_genesis_block(Network::Bitcoin),
			features: Features::empty(),
			request_timeout: Duration::from_secs(60),
		}
	}
}

struct OutstandingRequest {
	request_id: RequestId,
	offer: Offer,
	invreq: InvoiceRequest,
	deadline: Duration,
}

/// The offer-to-invoice exchange engine. See the [module-level documentation] for an overview.
///
/// All collaborator handles are [`Deref`]s so they may be `Arc`s, references, or anything else
/// that dereferences to the respective trait.
///
/// [module-level documentation]: self
pub struct OffersFlow<ES: Deref, S: Deref, T: Deref, G: Deref, W: Deref, L: Deref>
where
	ES::Target: EntropySource,
	S::Target: Bolt12Signer,
	T::Target: Transport,
	G::Target: NetworkView,
	W::Target: Wallet,
	L::Target: Logger,
{
	secp_ctx: Secp256k1<secp256k1::All>,
	config: FlowConfig,
	our_node_id: NodeId,
	payer_base: XOnlyPublicKey,
	/// Requests awaiting a reply, keyed by the x-only serialization of the blinding point the
	/// reply will arrive under. At most one entry per blinding can ever exist.
	outstanding: Mutex<HashMap<[u8; 32], OutstandingRequest>>,
	pending_events: Mutex<Vec<Event>>,
	entropy_source: ES,
	signer: S,
	transport: T,
	network: G,
	wallet: W,
	logger: L,
}

impl<ES: Deref, S: Deref, T: Deref, G: Deref, W: Deref, L: Deref> OffersFlow<ES, S, T, G, W, L>
where
	ES::Target: EntropySource,
	S::Target: Bolt12Signer,
	T::Target: Transport,
	G::Target: NetworkView,
	W::Target: Wallet,
	L::Target: Logger,
{
	/// Creates a new engine for the node identified by `our_node_id`, deriving payer keys from
	/// `payer_base` (whose secret counterpart lives in the signer).
	pub fn new(
		config: FlowConfig, our_node_id: PublicKey, payer_base: XOnlyPublicKey,
		entropy_source: ES, signer: S, transport: T, network: G, wallet: W, logger: L,
	) -> Self {
		OffersFlow {
			secp_ctx: Secp256k1::new(),
			config,
			our_node_id: NodeId::from_pubkey(&our_node_id),
			payer_base,
			outstanding: Mutex::new(HashMap::new()),
			pending_events: Mutex::new(Vec::new()),
			entropy_source,
			signer,
			transport,
			network,
			wallet,
			logger,
		}
	}

	fn duration_since_epoch() -> Duration {
		SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or(Duration::ZERO)
	}

	/// Returns and clears the events produced by inbound replies and timeouts.
	pub fn get_and_clear_pending_events(&self) -> Vec<Event> {
		self.pending_events.lock().unwrap().split_off(0)
	}

	// Offer management

	/// Signs and stores an offer. `bolt12` must be an unsigned `lno1` string whose `node_id` is
	/// this node's identity key; the signature is obtained from the signer.
	pub fn create_offer(
		&self, bolt12: &str, label: Option<String>, single_use: bool,
	) -> Result<OfferInfo, OfferError> {
		let offer = bolt12.parse::<Offer>()?;
		if offer.signature().is_some() {
			return Err(OfferError::InvalidParams("must be unsigned offer".to_string()));
		}

		let offer_id = offer.id();
		let merkle_root = sha256::Hash::from_inner(offer_id.0);
		let signature =
			self.signer.sign_bolt12("offer", "signature", &merkle_root, None).map_err(OfferError::Signer)?;
		let offer = offer
			.with_signature(signature, &self.secp_ctx)
			.map_err(|_| OfferError::Signer(SignerError::InvalidSignature))?;

		let status =
			if single_use { OfferStatus::SingleUse } else { OfferStatus::MultipleUse };
		let record = OfferRecord { bolt12: offer.to_string(), label, status };
		if !self.wallet.create_offer(&offer_id, record.clone()) {
			return Err(OfferError::DuplicateOffer);
		}

		log_info!(self.logger, "Created offer {}", offer_id);
		Ok(OfferInfo::new(offer_id, record))
	}

	/// Lists stored offers, optionally restricted to one id and/or to active offers.
	pub fn list_offers(&self, offer_id: Option<OfferId>, active_only: bool) -> Vec<OfferInfo> {
		let ids = match offer_id {
			Some(id) => vec![id],
			None => self.wallet.list_offer_ids(),
		};

		let mut offers = Vec::new();
		for id in ids {
			if let Some(record) = self.wallet.find_offer(&id) {
				if !active_only || record.status.is_active() {
					offers.push(OfferInfo::new(id, record));
				}
			}
		}
		offers
	}

	/// Disables an offer so that further invoice_requests for it are not answered. Disabling is
	/// terminal; errors if the offer is already inactive.
	pub fn disable_offer(&self, offer_id: &OfferId) -> Result<OfferInfo, OfferError> {
		let mut record = self.wallet.find_offer(offer_id).ok_or(OfferError::UnknownOffer)?;
		if !record.status.is_active() {
			return Err(OfferError::OfferAlreadyDisabled);
		}

		record.status = match record.status {
			OfferStatus::SingleUse => OfferStatus::SingleDisabled,
			OfferStatus::MultipleUse => OfferStatus::MultipleDisabled,
			status => status,
		};
		self.wallet.set_offer_status(offer_id, record.status);

		Ok(OfferInfo::new(*offer_id, record))
	}

	/// Records that a payment arrived for the offer. Single-use offers become [`used`] and stop
	/// being answered; multi-use offers are unaffected.
	///
	/// [`used`]: OfferStatus::Used
	pub fn mark_offer_used(&self, offer_id: &OfferId) -> Result<OfferInfo, OfferError> {
		let mut record = self.wallet.find_offer(offer_id).ok_or(OfferError::UnknownOffer)?;
		if !record.status.is_active() {
			return Err(OfferError::OfferAlreadyDisabled);
		}

		if record.status == OfferStatus::SingleUse {
			record.status = OfferStatus::Used;
			self.wallet.set_offer_status(offer_id, record.status);
		}

		Ok(OfferInfo::new(*offer_id, record))
	}

	// Invoice request creation

	/// Fills in `payer_info` and `payer_key` on an unsigned `lnr1` invoice_request string,
	/// signing the recurrence fields if present, and returns the finished string.
	///
	/// For recurrence follow-ups (counter > 0) the `payer_info` of the prior period's paid
	/// invoice is reused so the merchant can link the periods; `recurrence_label` identifies
	/// the series in the payment store.
	pub fn create_invoice_request(
		&self, bolt12: &str, recurrence_label: Option<&str>,
	) -> Result<String, OfferError> {
		let invreq = bolt12.parse::<InvoiceRequest>()?;
		if invreq.payer_info().is_some() {
			return Err(OfferError::InvalidParams("must not have payer_info".to_string()));
		}
		if invreq.payer_key().is_some() {
			return Err(OfferError::InvalidParams("must not have payer_key".to_string()));
		}

		let finished = self.finalize_request(invreq.contents.clone(), recurrence_label)?;
		Ok(finished.to_string())
	}

	/// Resolves `payer_info` (fresh or reused), derives `payer_key`, and signs recurrence.
	fn finalize_request(
		&self, mut contents: InvoiceRequestContents, recurrence_label: Option<&str>,
	) -> Result<InvoiceRequest, OfferError> {
		if let Some(counter) = contents.recurrence_counter {
			let label = recurrence_label.ok_or_else(|| {
				OfferError::InvalidParams("Need payment label for recurring payments".to_string())
			})?;
			if counter != 0 {
				debug_assert!(contents.payer_info.is_none());
				contents.payer_info = Some(self.prev_payment_payer_info(
					label,
					&contents.offer_id,
					counter,
					contents.recurrence_start,
				)?);
			}
		}

		let payer_info = match contents.payer_info.clone() {
			Some(payer_info) => {
				let payer_key = derive_payer_key(&self.secp_ctx, &self.payer_base, &payer_info)
					.map_err(|_| OfferError::InvalidTweak)?;
				contents.payer_key = Some(payer_key);
				payer_info
			},
			None => {
				let mut minted = None;
				for _ in 0..MAX_TWEAK_ATTEMPTS {
					let payer_info =
						self.entropy_source.get_secure_random_bytes()[..PAYER_INFO_LENGTH].to_vec();
					if let Ok(payer_key) =
						derive_payer_key(&self.secp_ctx, &self.payer_base, &payer_info)
					{
						contents.payer_info = Some(payer_info.clone());
						contents.payer_key = Some(payer_key);
						minted = Some(payer_info);
						break;
					}
				}
				minted.ok_or(OfferError::InvalidTweak)?
			},
		};

		let unsigned = UnsignedInvoiceRequest::from_contents(contents);
		if unsigned.needs_recurrence_signature() {
			let merkle_root = unsigned.merkle_root();
			let signature = self
				.signer
				.sign_bolt12("invoice_request", "recurrence_signature", &merkle_root, Some(&payer_info))
				.map_err(OfferError::Signer)?;
			unsigned
				.with_recurrence_signature(signature, &self.secp_ctx)
				.map_err(|_| OfferError::Signer(SignerError::InvalidSignature))
		} else {
			unsigned
				.build()
				.map_err(|_| OfferError::InvalidParams("invalid invoice_request".to_string()))
		}
	}

	/// Scans prior payments under `label` for the same offer, enforcing recurrence continuity
	/// and returning the `payer_info` to reuse.
	fn prev_payment_payer_info(
		&self, label: &str, offer_id: &OfferId, recurrence_counter: u32,
		recurrence_start: Option<u32>,
	) -> Result<Vec<u8>, OfferError> {
		let mut payer_info = None;
		let mut prev_paid = false;

		for payment in self.wallet.payments_by_label(label) {
			let invoice = match payment.invoice.parse::<Invoice>() {
				Ok(invoice) => invoice,
				Err(_) => continue,
			};

			// Labels can be reused across different offers.
			if invoice.offer_id() != Some(*offer_id) {
				continue;
			}

			// In case someone inserted their own clashing label.
			let prev_counter = match invoice.recurrence_counter() {
				Some(counter) => counter,
				None => continue,
			};

			match (recurrence_start, invoice.recurrence_start()) {
				(Some(start), Some(prev_start)) if start != prev_start => {
					return Err(OfferError::InvalidParams(format!(
						"recurrence_start was previously {}",
						prev_start
					)));
				},
				(Some(_), None) => {
					return Err(OfferError::InvalidParams(
						"unexpected recurrence_start".to_string(),
					));
				},
				(None, Some(_)) => {
					return Err(OfferError::InvalidParams("missing recurrence_start".to_string()));
				},
				_ => {},
			}

			// Only called with a non-zero counter; period 0 has nothing prior.
			if prev_counter == recurrence_counter - 1
				&& payment.status == PaymentStatus::Complete
			{
				prev_paid = true;
			}

			if let Some(info) = invoice.payer_info() {
				payer_info = Some(info.clone());
			}
		}

		let payer_info = payer_info.ok_or(OfferError::NoPriorPayment)?;
		if !prev_paid {
			return Err(OfferError::PriorNotPaid);
		}
		Ok(payer_info)
	}

	// Fetching invoices

	/// Builds an invoice_request for `offer_str`, sends it towards the offering node over an
	/// onion message with a blinded reply path, and registers the exchange for correlation.
	///
	/// On success the returned [`RequestId`] will later appear in exactly one [`Event`]:
	/// [`InvoiceReceived`], or [`InvoiceRequestFailed`] on a remote error, an invalid invoice,
	/// or the deadline elapsing (see [`check_timeouts`]).
	///
	/// [`Event`]: crate::events::Event
	/// [`InvoiceReceived`]: crate::events::Event::InvoiceReceived
	/// [`InvoiceRequestFailed`]: crate::events::Event::InvoiceRequestFailed
	/// [`check_timeouts`]: Self::check_timeouts
	pub fn fetch_invoice(
		&self, offer_str: &str, params: FetchInvoiceParams,
	) -> Result<RequestId, OfferError> {
		let offer = offer_str.parse::<Offer>()?;
		offer.verify_signature(&self.secp_ctx).map_err(OfferError::Parse)?;

		if offer.send_invoice() {
			return Err(OfferError::InvalidParams(
				"Offer wants an invoice, not invoice_request".to_string(),
			));
		}

		if offer.is_expired() {
			return Err(OfferError::OfferExpired);
		}

		self.check_fetch_params(&offer, &params)?;

		let offer_id = offer.id();
		let (payer_info, payer_key) = match params.recurrence_counter {
			Some(counter) if counter > 0 => {
				let label = params.recurrence_label.as_deref().expect("checked above");
				let payer_info = self.prev_payment_payer_info(
					label,
					&offer_id,
					counter,
					params.recurrence_start,
				)?;
				let payer_key = derive_payer_key(&self.secp_ctx, &self.payer_base, &payer_info)
					.map_err(|_| OfferError::InvalidTweak)?;
				(payer_info, payer_key)
			},
			_ => self.fresh_payer_key()?,
		};

		let mut builder = offer
			.request_invoice()
			.map_err(|e| OfferError::Parse(ParseError::InvalidSemantics(e)))?
			.features(self.config.features.clone())
			.payer_info(payer_info.clone())
			.payer_key(payer_key);
		if self.config.chain != ChainHash::using_genesis_block(Network::Bitcoin) {
			builder = builder
				.chain_hash(self.config.chain)
				.map_err(|_| OfferError::InvalidParams("offer does not support this chain".to_string()))?;
		}
		if let Some(amount_msats) = params.amount_msats {
			builder = builder
				.amount_msats(amount_msats)
				.map_err(|_| OfferError::InvalidParams("amount_msat parameter unnecessary".to_string()))?;
		}
		if let Some(quantity) = params.quantity {
			builder = builder
				.quantity(quantity)
				.map_err(|_| OfferError::InvalidParams("quantity parameter unnecessary".to_string()))?;
		}
		if let Some(counter) = params.recurrence_counter {
			builder = builder
				.recurrence_counter(counter)
				.map_err(|_| OfferError::InvalidParams("unnecessary recurrence_counter".to_string()))?;
		}
		if let Some(start) = params.recurrence_start {
			builder = builder
				.recurrence_start(start)
				.map_err(|_| OfferError::InvalidParams("unnecessary recurrence_start".to_string()))?;
		}
		if let Some(payer_note) = params.payer_note {
			builder = builder.payer_note(payer_note);
		}

		let unsigned = builder.build().map_err(|e| match e {
			crate::offers::parse::SemanticError::AlreadyExpired => OfferError::OfferExpired,
			e => OfferError::InvalidParams(format!("invalid invoice_request: {:?}", e)),
		})?;

		let invreq = if unsigned.needs_recurrence_signature() {
			let merkle_root = unsigned.merkle_root();
			let signature = self
				.signer
				.sign_bolt12("invoice_request", "recurrence_signature", &merkle_root, Some(&payer_info))
				.map_err(OfferError::Signer)?;
			unsigned
				.with_recurrence_signature(signature, &self.secp_ctx)
				.map_err(|_| OfferError::Signer(SignerError::InvalidSignature))?
		} else {
			unsigned.build().expect("no recurrence signature needed")
		};

		let request_id = RequestId(self.entropy_source.get_secure_random_bytes());
		self.send_invoice_request(request_id, offer, invreq)?;
		Ok(request_id)
	}

	/// Validates user parameters against the offer, with errors naming the offending parameter.
	fn check_fetch_params(
		&self, offer: &Offer, params: &FetchInvoiceParams,
	) -> Result<(), OfferError> {
		let invalid = |msg: &str| Err(OfferError::InvalidParams(msg.to_string()));

		match (offer.amount(), params.amount_msats) {
			(Some(_), Some(_)) => return invalid("amount_msat parameter unnecessary"),
			(None, None) => return invalid("amount_msat parameter required"),
			_ => {},
		}

		if offer.expects_quantity() {
			let quantity = match params.quantity {
				None => return invalid("quantity parameter required"),
				Some(quantity) => quantity,
			};
			if let Some(min) = offer.quantity_min() {
				if quantity < min {
					return Err(OfferError::InvalidParams(format!("quantity must be >= {}", min)));
				}
			}
			if let Some(max) = offer.quantity_max() {
				if quantity > max {
					return Err(OfferError::InvalidParams(format!("quantity must be <= {}", max)));
				}
			}
		} else if params.quantity.is_some() {
			return invalid("quantity parameter unnecessary");
		}

		match offer.recurrence() {
			Some(_) => {
				if params.recurrence_counter.is_none() {
					return invalid("needs recurrence_counter");
				}
				let start_any_period =
					offer.recurrence_base().map_or(false, |base| base.start_any_period != 0);
				if start_any_period && params.recurrence_start.is_none() {
					return invalid("needs recurrence_start");
				}
				if !start_any_period && params.recurrence_start.is_some() {
					return invalid("unnecessary recurrence_start");
				}
				if params.recurrence_label.is_none() {
					return invalid("needs recurrence_label");
				}
			},
			None => {
				if params.recurrence_counter.is_some() {
					return invalid("unnecessary recurrence_counter");
				}
				if params.recurrence_start.is_some() {
					return invalid("unnecessary recurrence_start");
				}
			},
		}

		Ok(())
	}

	/// Mints fresh `payer_info` bytes and derives the matching payer key, retrying on the
	/// negligible chance of an unusable tweak.
	fn fresh_payer_key(&self) -> Result<(Vec<u8>, XOnlyPublicKey), OfferError> {
		for _ in 0..MAX_TWEAK_ATTEMPTS {
			let payer_info =
				self.entropy_source.get_secure_random_bytes()[..PAYER_INFO_LENGTH].to_vec();
			if let Ok(payer_key) = derive_payer_key(&self.secp_ctx, &self.payer_base, &payer_info)
			{
				return Ok((payer_info, payer_key));
			}
		}
		Err(OfferError::InvalidTweak)
	}

	/// Routes the request to the offering node and registers the outstanding exchange.
	fn send_invoice_request(
		&self, request_id: RequestId, offer: Offer, invreq: InvoiceRequest,
	) -> Result<(), OfferError> {
		self.network.refresh();

		let destination = self
			.network
			.resolve_node(&offer.node_id())
			.ok_or(OfferError::UnknownDestination(offer.node_id()))?;

		// If we don't exist in gossip, routing can't happen.
		if !self.network.contains_node(&self.our_node_id) {
			return Err(OfferError::RouteNotFound("We don't have any channels"));
		}

		let route = find_path(&*self.network, &self.our_node_id, &destination, &*self.logger)
			.map_err(|e| match e {
				router::Error::PathNotFound => OfferError::RouteNotFound("Can't find route"),
				router::Error::InvalidDestination => {
					OfferError::RouteNotFound("Cannot route to ourselves")
				},
			})?;

		// The reply path runs the route backwards, ending at us.
		let mut reply_hops = Vec::with_capacity(route.len());
		for node_id in route[..route.len() - 1].iter().rev() {
			reply_hops.push(
				node_id
					.as_pubkey()
					.map_err(|_| OfferError::RouteNotFound("invalid node id in route"))?,
			);
		}
		reply_hops.push(
			self.our_node_id.as_pubkey().expect("our own node id is a valid public key"),
		);

		let session_priv = SecretKey::from_slice(&self.entropy_source.get_secure_random_bytes())
			.expect("RNG is busted");
		let (reply_path, reply_blinding) =
			construct_reply_path(&self.secp_ctx, &reply_hops, &session_priv)
				.map_err(|_| OfferError::RouteNotFound("failed constructing reply path"))?;

		let mut hops: Vec<MessageHop> =
			route.iter().map(|node_id| MessageHop { node_id: *node_id, payload: None }).collect();
		hops.last_mut().expect("route is never empty").payload =
			Some(OnionPayload::InvoiceRequest(invreq.encode()));

		self.transport.send_onion_message(&hops, &reply_path).map_err(OfferError::Transport)?;

		log_debug!(
			self.logger,
			"Sent invoice_request for offer {} over {} hops, awaiting reply",
			invreq.offer_id(),
			hops.len()
		);

		let deadline = Self::duration_since_epoch() + self.config.request_timeout;
		let previous = self.outstanding.lock().unwrap().insert(
			reply_blinding.serialize(),
			OutstandingRequest { request_id, offer, invreq, deadline },
		);
		debug_assert!(previous.is_none());

		Ok(())
	}

	// Reply handling

	/// The inbound hook for onion messages delivered over one of our blinded reply paths.
	/// Messages not matching an outstanding request are ignored; matching ones resolve it into
	/// an [`Event`].
	///
	/// [`Event`]: crate::events::Event
	pub fn handle_onion_message(&self, message: &OnionMessageReply) {
		let blinding = match message.blinding_in {
			Some(blinding) => blinding,
			None => return,
		};

		let sent = match self.outstanding.lock().unwrap().remove(&blinding.serialize()) {
			Some(sent) => sent,
			None => {
				log_trace!(
					self.logger,
					"No outstanding request for onion message with blinding {}",
					log_bytes!(blinding.serialize())
				);
				return;
			},
		};

		if let Some(ref error_bytes) = message.invoice_error {
			let failure = match InvoiceError::from_bytes(error_bytes) {
				Some(error) => FetchFailure::RemoteInvoiceError {
					erroneous_field: error.erroneous_field,
					suggested_value: error.suggested_value,
					message: error.message,
				},
				None => FetchFailure::RemoteInvoiceError {
					erroneous_field: None,
					suggested_value: None,
					message: format!("invalid invoice_error {}", log_bytes!(error_bytes)),
				},
			};
			log_debug!(self.logger, "Remote node sent failure message: {}", failure);
			self.fail_request(sent.request_id, failure);
			return;
		}

		let invoice_bytes = match message.invoice {
			Some(ref bytes) => bytes.clone(),
			None => {
				log_debug!(self.logger, "Neither invoice nor invoice_error in reply");
				self.fail_request(sent.request_id, FetchFailure::BadInvoice {
					field: "invoice".to_string(),
				});
				return;
			},
		};

		let invoice = match Invoice::try_from(invoice_bytes) {
			Ok(invoice) => invoice,
			Err(_) => {
				self.fail_request(sent.request_id, FetchFailure::BadInvoice {
					field: "invoice".to_string(),
				});
				return;
			},
		};

		match self.validate_invoice(&invoice, &sent.offer, &sent.invreq) {
			Err(field) => {
				log_debug!(self.logger, "Failed invoice due to {}", field);
				self.fail_request(sent.request_id, FetchFailure::BadInvoice {
					field: field.to_string(),
				});
			},
			Ok(expected_amount) => {
				let changes = compute_changes(&sent.offer, &invoice, expected_amount);
				let next_period = next_period(&sent.offer, &sent.invreq, &invoice);
				self.pending_events.lock().unwrap().push(Event::InvoiceReceived {
					request_id: sent.request_id,
					invoice: invoice.to_string(),
					changes,
					next_period,
				});
			},
		}
	}

	/// Validates a returned invoice against the offer and the request it answers, in the order
	/// mandated by BOLT 12, returning the expected amount on success or the first mismatched
	/// field's name.
	fn validate_invoice(
		&self, invoice: &Invoice, offer: &Offer, invreq: &InvoiceRequest,
	) -> Result<Option<u64>, &'static str> {
		if invoice.node_id() != Some(offer.node_id()) {
			return Err("node_id");
		}

		if invoice.verify_signature(&self.secp_ctx).is_err() {
			return Err("signature");
		}

		if invoice.amount_msats().is_none() {
			return Err("amount");
		}

		if invoice.offer_id() != Some(invreq.offer_id()) {
			return Err("offer_id");
		}

		// These must be equal or unset exactly as in the request.
		if invoice.quantity() != invreq.quantity() {
			return Err("quantity");
		}
		if invoice.recurrence_counter() != invreq.recurrence_counter() {
			return Err("recurrence_counter");
		}
		if invoice.recurrence_start() != invreq.recurrence_start() {
			return Err("recurrence_start");
		}
		if invoice.payer_key() != invreq.payer_key() {
			return Err("payer_key");
		}
		if invoice.payer_info() != invreq.payer_info() {
			return Err("payer_info");
		}

		let expected_amount = match offer.amount() {
			Some(&Amount::Bitcoin { amount_msats }) => match invreq.quantity() {
				Some(quantity) => {
					Some(amount_msats.checked_mul(quantity).ok_or("quantity overflow")?)
				},
				None => Some(amount_msats),
			},
			_ => None,
		};

		if invreq.recurrence_counter().is_some() && invoice.recurrence_basetime().is_none() {
			return Err("recurrence_basetime");
		}

		Ok(expected_amount)
	}

	fn fail_request(&self, request_id: RequestId, failure: FetchFailure) {
		self.pending_events
			.lock()
			.unwrap()
			.push(Event::InvoiceRequestFailed { request_id, failure });
	}

	// Timeouts and cancellation

	/// Expires outstanding requests whose deadline has passed, failing each with
	/// [`FetchFailure::Timeout`]. `now` is the duration since the Unix epoch; callers drive
	/// this from their timer at whatever granularity suits them.
	pub fn check_timeouts(&self, now: Duration) {
		let mut expired = Vec::new();
		self.outstanding.lock().unwrap().retain(|_, sent| {
			if sent.deadline <= now {
				expired.push(sent.request_id);
				false
			} else {
				true
			}
		});

		for request_id in expired {
			log_debug!(self.logger, "Request {:?} timed out with no reply", request_id);
			self.fail_request(request_id, FetchFailure::Timeout);
		}
	}

	/// Abandons an outstanding request. Any late-arriving reply will no longer match and is
	/// dropped; there is no abort signal to the remote. Returns whether a request was removed.
	pub fn cancel(&self, request_id: RequestId) -> bool {
		let mut removed = false;
		self.outstanding.lock().unwrap().retain(|_, sent| {
			if sent.request_id == request_id {
				removed = true;
				false
			} else {
				true
			}
		});
		removed
	}
}

/// Diffs the invoice against the offer for the caller to confirm authorization, highlighting
/// appended descriptions and unexpected amounts.
fn compute_changes(offer: &Offer, invoice: &Invoice, expected_amount: Option<u64>) -> InvoiceChanges {
	let mut changes = InvoiceChanges::default();

	let offer_description = offer.description_string();
	match invoice.description_string() {
		Some(description) if description == offer_description => {},
		Some(description)
			if description.len() > offer_description.len()
				&& description.starts_with(offer_description.as_str()) =>
		{
			changes.description_appended =
				Some(description[offer_description.len()..].to_string());
		},
		Some(description) => changes.description = Some(description.clone()),
		None => changes.description_removed = Some(offer_description.clone()),
	}

	match (offer.vendor_string(), invoice.vendor_string()) {
		(offer_vendor, invoice_vendor) if offer_vendor == invoice_vendor => {},
		(Some(vendor), None) => changes.vendor_removed = Some(vendor.clone()),
		(_, Some(vendor)) => changes.vendor = Some(vendor.clone()),
		(None, None) => unreachable!("equal vendors already matched"),
	}

	// Tell the caller the amount unless it's trivial to calculate and exactly as expected.
	match (expected_amount, invoice.amount_msats()) {
		(Some(expected), Some(amount)) if expected == amount => {},
		(_, amount) => changes.amount_msat = amount,
	}

	changes
}

/// Computes the next period of a recurring offer, unless the recurrence limit has been reached
/// or the arithmetic leaves the representable range.
fn next_period(offer: &Offer, invreq: &InvoiceRequest, invoice: &Invoice) -> Option<NextPeriod> {
	let recurrence = offer.recurrence()?;
	let counter = invreq.recurrence_counter()?;
	let basetime = invoice.recurrence_basetime()?;

	let next_counter = counter as u64 + 1;
	let next_period_idx = invreq.recurrence_start().unwrap_or(0) as u64 + next_counter;

	// If this was the last period, there is no next to announce.
	if let Some(limit) = offer.recurrence_limit() {
		if next_period_idx > limit as u64 {
			return None;
		}
	}

	let starttime = recurrence.period_start(basetime, next_period_idx)?;
	let endtime = recurrence.period_start(basetime, next_period_idx + 1)?.checked_sub(1)?;
	let (paywindow_start, paywindow_end) =
		recurrence.paywindow(offer.recurrence_paywindow(), basetime, next_period_idx)?;

	Some(NextPeriod { counter: next_counter, starttime, endtime, paywindow_start, paywindow_end })
}

#[cfg(test)]
mod tests {
	use super::{
		ErrorCode, FetchInvoiceParams, FlowConfig, OfferError, OfferStatus, OffersFlow,
		PaymentRecord, PaymentStatus,
	};

	use bitcoin::secp256k1::schnorr::Signature;
	use bitcoin::secp256k1::{
		KeyPair, Message, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey,
	};
	use core::convert::Infallible;
	use core::time::Duration;
	use std::sync::Arc;
	use std::time::SystemTime;

	use crate::events::{Event, FetchFailure, InvoiceChanges};
	use crate::ln::PaymentHash;
	use crate::offers::invoice::{Invoice, InvoiceBuilder};
	use crate::offers::invoice_request::{InvoiceRequest, UnsignedInvoiceRequest};
	use crate::offers::offer::{Offer, OfferBuilder, OfferId};
	use crate::offers::payer::derive_payer_key;
	use crate::offers::recurrence::{Recurrence, RecurrenceBase, TimeUnit};
	use crate::onion_message::{OnionMessageReply, OnionPayload};
	use crate::routing::gossip::NodeId;
	use crate::sign::SignerError;
	use crate::util::ser::{write_tlv_record, HighZeroBytesDroppedBigSize, Writeable, WithoutLength};
	use crate::util::test_utils::{
		TestEntropy, TestLogger, TestNetworkView, TestSigner, TestTransport, TestWallet,
	};

	type TestFlow = OffersFlow<
		Arc<TestEntropy>,
		Arc<TestSigner>,
		Arc<TestTransport>,
		Arc<TestNetworkView>,
		Arc<TestWallet>,
		Arc<TestLogger>,
	>;

	struct Harness {
		flow: TestFlow,
		transport: Arc<TestTransport>,
		wallet: Arc<TestWallet>,
		signer: Arc<TestSigner>,
		merchant: KeyPair,
	}

	fn keys(byte: u8) -> KeyPair {
		KeyPair::from_secret_key(&Secp256k1::new(), &SecretKey::from_slice(&[byte; 32]).unwrap())
	}

	fn now() -> Duration {
		SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap()
	}

	fn harness_with_graph(add_our_node: bool, add_channels: bool) -> Harness {
		let our_keys = keys(1);
		let merchant = keys(2);
		let relay = keys(3);
		let payer_base = keys(5);

		let our_pk = PublicKey::from_keypair(&our_keys);
		let merchant_pk = PublicKey::from_keypair(&merchant);
		let relay_pk = PublicKey::from_keypair(&relay);

		let network = Arc::new(TestNetworkView::new());
		if add_our_node {
			network.add_node(&our_pk, true);
		}
		network.add_node(&relay_pk, true);
		network.add_node(&merchant_pk, true);
		if add_channels {
			network.add_channel(&our_pk, &relay_pk, 100_000);
			network.add_channel(&relay_pk, &merchant_pk, 100_000);
		}

		let signer = Arc::new(TestSigner::new(our_keys, payer_base));
		let transport = Arc::new(TestTransport::new());
		let wallet = Arc::new(TestWallet::new());

		let flow = OffersFlow::new(
			FlowConfig::default(),
			our_pk,
			signer.payer_base_pubkey(),
			Arc::new(TestEntropy::new()),
			Arc::clone(&signer),
			Arc::clone(&transport),
			Arc::clone(&network),
			Arc::clone(&wallet),
			Arc::new(TestLogger::new()),
		);

		Harness { flow, transport, wallet, signer, merchant }
	}

	fn harness() -> Harness {
		harness_with_graph(true, true)
	}

	fn merchant_node_id(harness: &Harness) -> XOnlyPublicKey {
		harness.merchant.x_only_public_key().0
	}

	fn sign_with(keys: &KeyPair) -> impl Fn(&Message) -> Result<Signature, Infallible> + '_ {
		move |digest| Ok(Secp256k1::new().sign_schnorr_no_aux_rand(digest, keys))
	}

	fn signed_offer(harness: &Harness, builder: OfferBuilder) -> Offer {
		builder.build().unwrap().sign(sign_with(&harness.merchant)).unwrap()
	}

	fn fixed_amount_offer(harness: &Harness) -> Offer {
		signed_offer(
			harness,
			OfferBuilder::new("coffee".into(), merchant_node_id(harness)).amount_msats(1000),
		)
	}

	fn recurring_offer(harness: &Harness) -> Offer {
		signed_offer(
			harness,
			OfferBuilder::new("coffee subscription".into(), merchant_node_id(harness))
				.amount_msats(1000)
				.recurrence(Recurrence { time_unit: TimeUnit::Days, period: 30 })
				.recurrence_base(RecurrenceBase { start_any_period: 0, basetime: 1_600_000_000 }),
		)
	}

	fn recurring_params(counter: u32) -> FetchInvoiceParams {
		FetchInvoiceParams {
			recurrence_counter: Some(counter),
			recurrence_label: Some("sub".to_string()),
			..FetchInvoiceParams::default()
		}
	}

	fn sent_invoice_request(harness: &Harness) -> InvoiceRequest {
		let (hops, _reply_path) = harness.transport.last_sent();
		match hops.last().unwrap().payload.clone().expect("no payload on final hop") {
			OnionPayload::InvoiceRequest(bytes) => InvoiceRequest::try_from(bytes).unwrap(),
		}
	}

	fn reply_blinding(harness: &Harness) -> XOnlyPublicKey {
		let outstanding = harness.flow.outstanding.lock().unwrap();
		assert_eq!(outstanding.len(), 1);
		XOnlyPublicKey::from_slice(outstanding.keys().next().unwrap()).unwrap()
	}

	fn merchant_invoice<F>(harness: &Harness, offer: &Offer, customize: F) -> Invoice
	where
		F: FnOnce(InvoiceBuilder) -> InvoiceBuilder,
	{
		let invreq = sent_invoice_request(harness);
		merchant_invoice_for_request(harness, offer, &invreq, customize)
	}

	fn merchant_invoice_for_request<F>(
		harness: &Harness, offer: &Offer, invreq: &InvoiceRequest, customize: F,
	) -> Invoice
	where
		F: FnOnce(InvoiceBuilder) -> InvoiceBuilder,
	{
		let builder =
			InvoiceBuilder::for_request(offer, invreq, 1_650_000_000, PaymentHash([7; 32]));
		customize(builder).build().unwrap().sign(sign_with(&harness.merchant)).unwrap()
	}

	fn deliver_invoice_bytes(harness: &Harness, bytes: Vec<u8>) {
		let blinding = reply_blinding(harness);
		harness.flow.handle_onion_message(&OnionMessageReply {
			blinding_in: Some(blinding),
			invoice: Some(bytes),
			invoice_error: None,
		});
	}

	fn single_event(harness: &Harness) -> Event {
		let mut events = harness.flow.get_and_clear_pending_events();
		assert_eq!(events.len(), 1, "expected exactly one event, got {:?}", events);
		events.pop().unwrap()
	}

	#[test]
	fn fetches_invoice_for_fixed_amount_offer() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);

		let request_id = harness
			.flow
			.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default())
			.unwrap();

		// The request went out over the relay to the merchant.
		let (hops, reply_path) = harness.transport.last_sent();
		assert_eq!(hops.len(), 2);
		assert_eq!(hops[0].node_id, NodeId::from_pubkey(&PublicKey::from_keypair(&keys(3))));
		assert_eq!(hops[1].node_id, NodeId::from_pubkey(&PublicKey::from_keypair(&keys(2))));
		assert!(hops[0].payload.is_none());
		assert!(hops[1].payload.is_some());
		// The reply path runs backwards: relay, then us.
		assert_eq!(reply_path.hops.len(), 2);

		// The request binds to the offer and carries a derivable payer key.
		let invreq = sent_invoice_request(&harness);
		assert_eq!(invreq.offer_id(), offer.id());
		assert_eq!(invreq.amount_msats(), None);
		let payer_info = invreq.payer_info().unwrap().clone();
		assert_eq!(payer_info.len(), 16);
		let derived = derive_payer_key(
			&Secp256k1::new(),
			&harness.signer.payer_base_pubkey(),
			&payer_info,
		)
		.unwrap();
		assert_eq!(invreq.payer_key(), Some(derived));

		// The merchant answers with an exact invoice.
		let invoice = merchant_invoice(&harness, &offer, |builder| builder.amount_msats(1000));
		deliver_invoice_bytes(&harness, invoice.encode());

		match single_event(&harness) {
			Event::InvoiceReceived { request_id: id, invoice: bolt12, changes, next_period } => {
				assert_eq!(id, request_id);
				assert_eq!(bolt12.parse::<Invoice>().unwrap(), invoice);
				assert_eq!(changes, InvoiceChanges::default());
				assert!(changes.is_empty());
				assert_eq!(next_period, None);
			},
			event => panic!("unexpected event {:?}", event),
		}
		assert!(harness.flow.outstanding.lock().unwrap().is_empty());
	}

	#[test]
	fn surfaces_amount_mismatch() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();

		let invoice = merchant_invoice(&harness, &offer, |builder| builder.amount_msats(1500));
		deliver_invoice_bytes(&harness, invoice.encode());

		match single_event(&harness) {
			Event::InvoiceReceived { changes, .. } => {
				assert_eq!(changes.amount_msat, Some(1500));
				assert_eq!(changes.description, None);
				assert_eq!(changes.description_appended, None);
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn surfaces_appended_description() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();

		let invoice = merchant_invoice(&harness, &offer, |builder| {
			builder.amount_msats(1000).description("coffee (decaf)".to_string())
		});
		deliver_invoice_bytes(&harness, invoice.encode());

		match single_event(&harness) {
			Event::InvoiceReceived { changes, .. } => {
				assert_eq!(changes.description_appended, Some(" (decaf)".to_string()));
				assert_eq!(changes.description, None);
				assert_eq!(changes.description_removed, None);
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn surfaces_replaced_and_removed_descriptions() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);

		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();
		let invoice = merchant_invoice(&harness, &offer, |builder| {
			builder.amount_msats(1000).description("tea".to_string())
		});
		deliver_invoice_bytes(&harness, invoice.encode());
		match single_event(&harness) {
			Event::InvoiceReceived { changes, .. } => {
				assert_eq!(changes.description, Some("tea".to_string()));
			},
			event => panic!("unexpected event {:?}", event),
		}

		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();
		let invoice =
			merchant_invoice(&harness, &offer, |builder| builder.amount_msats(1000).clear_description());
		deliver_invoice_bytes(&harness, invoice.encode());
		match single_event(&harness) {
			Event::InvoiceReceived { changes, .. } => {
				assert_eq!(changes.description_removed, Some("coffee".to_string()));
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn surfaces_vendor_changes() {
		let harness = harness();
		let offer = signed_offer(
			&harness,
			OfferBuilder::new("coffee".into(), merchant_node_id(&harness))
				.amount_msats(1000)
				.vendor("Cafe".into()),
		);

		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();
		let invoice = merchant_invoice(&harness, &offer, |builder| {
			builder.amount_msats(1000).vendor("Other Cafe".to_string())
		});
		deliver_invoice_bytes(&harness, invoice.encode());
		match single_event(&harness) {
			Event::InvoiceReceived { changes, .. } => {
				assert_eq!(changes.vendor, Some("Other Cafe".to_string()));
				assert_eq!(changes.vendor_removed, None);
			},
			event => panic!("unexpected event {:?}", event),
		}

		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();
		let invoice =
			merchant_invoice(&harness, &offer, |builder| builder.amount_msats(1000).clear_vendor());
		deliver_invoice_bytes(&harness, invoice.encode());
		match single_event(&harness) {
			Event::InvoiceReceived { changes, .. } => {
				assert_eq!(changes.vendor_removed, Some("Cafe".to_string()));
				assert_eq!(changes.vendor, None);
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn rejects_invoice_with_bad_signature() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();

		let invoice = merchant_invoice(&harness, &offer, |builder| builder.amount_msats(1000));
		let mut bytes = invoice.encode();
		let len = bytes.len();
		bytes[len - 1] ^= 1;
		deliver_invoice_bytes(&harness, bytes);

		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => {
				assert_eq!(failure, FetchFailure::BadInvoice { field: "signature".to_string() });
				assert_eq!(
					failure.to_string(),
					"Incorrect signature field in reply"
				);
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn rejects_invoice_from_wrong_node() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();

		// An invoice issued (and correctly signed) by some other node.
		let imposter = keys(4);
		let imposter_offer = OfferBuilder::new("coffee".into(), imposter.x_only_public_key().0)
			.amount_msats(1000)
			.build()
			.unwrap()
			.sign(sign_with(&imposter))
			.unwrap();
		let invreq = sent_invoice_request(&harness);
		let invoice =
			InvoiceBuilder::for_request(&imposter_offer, &invreq, 1_650_000_000, PaymentHash([7; 32]))
				.amount_msats(1000)
				.build()
				.unwrap()
				.sign(sign_with(&imposter))
				.unwrap();
		deliver_invoice_bytes(&harness, invoice.encode());

		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => {
				assert_eq!(failure, FetchFailure::BadInvoice { field: "node_id".to_string() });
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn rejects_invoice_echoing_wrong_fields() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);

		// payer_info mismatch
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();
		let invreq = sent_invoice_request(&harness);
		let mut contents = invreq.contents.clone();
		contents.payer_info = Some(vec![9; 16]);
		let altered = UnsignedInvoiceRequest::from_contents(contents).build().unwrap();
		let invoice = merchant_invoice_for_request(&harness, &offer, &altered, |builder| {
			builder.amount_msats(1000)
		});
		deliver_invoice_bytes(&harness, invoice.encode());
		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => {
				assert_eq!(failure, FetchFailure::BadInvoice { field: "payer_info".to_string() });
			},
			event => panic!("unexpected event {:?}", event),
		}

		// offer_id mismatch
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();
		let invreq = sent_invoice_request(&harness);
		let mut contents = invreq.contents.clone();
		contents.offer_id = OfferId([9; 32]);
		let altered = UnsignedInvoiceRequest::from_contents(contents).build().unwrap();
		let invoice = merchant_invoice_for_request(&harness, &offer, &altered, |builder| {
			builder.amount_msats(1000)
		});
		deliver_invoice_bytes(&harness, invoice.encode());
		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => {
				assert_eq!(failure, FetchFailure::BadInvoice { field: "offer_id".to_string() });
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn multiplies_expected_amount_by_quantity() {
		let harness = harness();
		let offer = signed_offer(
			&harness,
			OfferBuilder::new("cookies".into(), merchant_node_id(&harness))
				.amount_msats(100)
				.quantity_max(10),
		);
		let params = FetchInvoiceParams { quantity: Some(3), ..FetchInvoiceParams::default() };

		harness.flow.fetch_invoice(&offer.to_string(), params.clone()).unwrap();
		let invoice = merchant_invoice(&harness, &offer, |builder| builder.amount_msats(300));
		deliver_invoice_bytes(&harness, invoice.encode());
		match single_event(&harness) {
			Event::InvoiceReceived { changes, .. } => assert!(changes.is_empty()),
			event => panic!("unexpected event {:?}", event),
		}

		harness.flow.fetch_invoice(&offer.to_string(), params).unwrap();
		let invoice = merchant_invoice(&harness, &offer, |builder| builder.amount_msats(400));
		deliver_invoice_bytes(&harness, invoice.encode());
		match single_event(&harness) {
			Event::InvoiceReceived { changes, .. } => {
				assert_eq!(changes.amount_msat, Some(400));
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn rejects_overflowing_expected_amount() {
		let harness = harness();
		let offer = signed_offer(
			&harness,
			OfferBuilder::new("everything".into(), merchant_node_id(&harness))
				.amount_msats(crate::ln::MAX_VALUE_MSAT)
				.quantity_max(100),
		);
		let params = FetchInvoiceParams { quantity: Some(100), ..FetchInvoiceParams::default() };

		harness.flow.fetch_invoice(&offer.to_string(), params).unwrap();
		let invoice = merchant_invoice(&harness, &offer, |builder| builder.amount_msats(1000));
		deliver_invoice_bytes(&harness, invoice.encode());

		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => {
				assert_eq!(
					failure,
					FetchFailure::BadInvoice { field: "quantity overflow".to_string() }
				);
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn computes_next_period_for_recurring_offer() {
		let harness = harness();
		let offer = recurring_offer(&harness);

		harness.flow.fetch_invoice(&offer.to_string(), recurring_params(0)).unwrap();

		// The request carries a verified recurrence signature (checked when re-parsing).
		let invreq = sent_invoice_request(&harness);
		assert!(invreq.recurrence_signature().is_some());
		assert_eq!(invreq.recurrence_counter(), Some(0));

		let invoice = merchant_invoice(&harness, &offer, |builder| {
			builder.amount_msats(1000).recurrence_basetime(1_600_000_000)
		});
		deliver_invoice_bytes(&harness, invoice.encode());

		match single_event(&harness) {
			Event::InvoiceReceived { changes, next_period, .. } => {
				assert!(changes.is_empty());
				let next_period = next_period.unwrap();
				assert_eq!(next_period.counter, 1);
				assert_eq!(next_period.starttime, 1_600_000_000 + 30 * 86400);
				assert_eq!(next_period.endtime, 1_600_000_000 + 60 * 86400 - 1);
				assert_eq!(next_period.paywindow_start, 1_600_000_000 + 30 * 86400 - 60);
				assert_eq!(next_period.paywindow_end, 1_600_000_000 + 60 * 86400 - 1);
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn omits_next_period_past_recurrence_limit() {
		let harness = harness();
		let offer = signed_offer(
			&harness,
			OfferBuilder::new("one-off subscription".into(), merchant_node_id(&harness))
				.amount_msats(1000)
				.recurrence(Recurrence { time_unit: TimeUnit::Days, period: 30 })
				.recurrence_base(RecurrenceBase { start_any_period: 0, basetime: 1_600_000_000 })
				.recurrence_limit(0),
		);

		harness.flow.fetch_invoice(&offer.to_string(), recurring_params(0)).unwrap();
		let invoice = merchant_invoice(&harness, &offer, |builder| {
			builder.amount_msats(1000).recurrence_basetime(1_600_000_000)
		});
		deliver_invoice_bytes(&harness, invoice.encode());

		match single_event(&harness) {
			Event::InvoiceReceived { next_period, .. } => assert_eq!(next_period, None),
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn rejects_recurring_invoice_without_basetime() {
		let harness = harness();
		let offer = recurring_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), recurring_params(0)).unwrap();

		let invoice = merchant_invoice(&harness, &offer, |builder| builder.amount_msats(1000));
		deliver_invoice_bytes(&harness, invoice.encode());

		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => {
				assert_eq!(
					failure,
					FetchFailure::BadInvoice { field: "recurrence_basetime".to_string() }
				);
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn requires_prior_payment_for_second_period() {
		let harness = harness();
		let offer = recurring_offer(&harness);

		match harness.flow.fetch_invoice(&offer.to_string(), recurring_params(1)) {
			Err(OfferError::NoPriorPayment) => {},
			result => panic!("unexpected result {:?}", result),
		}
		assert_eq!(
			OfferError::NoPriorPayment.to_string(),
			"No previous payment attempted for this label and offer"
		);
		// Nothing was sent before the failure.
		assert_eq!(harness.transport.sent_count(), 0);
	}

	#[test]
	fn reuses_payer_info_across_recurrence_periods() {
		let harness = harness();
		let offer = recurring_offer(&harness);

		harness.flow.fetch_invoice(&offer.to_string(), recurring_params(0)).unwrap();
		let first_invreq = sent_invoice_request(&harness);
		let invoice = merchant_invoice(&harness, &offer, |builder| {
			builder.amount_msats(1000).recurrence_basetime(1_600_000_000)
		});
		deliver_invoice_bytes(&harness, invoice.encode());
		let bolt12 = match single_event(&harness) {
			Event::InvoiceReceived { invoice, .. } => invoice,
			event => panic!("unexpected event {:?}", event),
		};

		// An unpaid first period blocks the follow-up...
		harness.wallet.add_payment(PaymentRecord {
			label: Some("sub".to_string()),
			invoice: bolt12.clone(),
			status: PaymentStatus::Pending,
		});
		match harness.flow.fetch_invoice(&offer.to_string(), recurring_params(1)) {
			Err(OfferError::PriorNotPaid) => {},
			result => panic!("unexpected result {:?}", result),
		}

		// ...but once complete, the follow-up reuses the same payer_info verbatim.
		harness.wallet.add_payment(PaymentRecord {
			label: Some("sub".to_string()),
			invoice: bolt12,
			status: PaymentStatus::Complete,
		});
		harness.flow.fetch_invoice(&offer.to_string(), recurring_params(1)).unwrap();
		let second_invreq = sent_invoice_request(&harness);
		assert_eq!(second_invreq.payer_info(), first_invreq.payer_info());
		assert_eq!(second_invreq.payer_key(), first_invreq.payer_key());
		assert_eq!(second_invreq.recurrence_counter(), Some(1));
	}

	#[test]
	fn surfaces_remote_invoice_error() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();

		let mut error_bytes = Vec::new();
		write_tlv_record(&mut error_bytes, 1, &HighZeroBytesDroppedBigSize(8u64)).unwrap();
		write_tlv_record(&mut error_bytes, 5, &WithoutLength(&String::from("unknown offer")))
			.unwrap();

		let blinding = reply_blinding(&harness);
		harness.flow.handle_onion_message(&OnionMessageReply {
			blinding_in: Some(blinding),
			invoice: None,
			invoice_error: Some(error_bytes),
		});

		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => match failure {
				FetchFailure::RemoteInvoiceError { erroneous_field, suggested_value, message } => {
					assert_eq!(erroneous_field, Some(8));
					assert_eq!(suggested_value, None);
					assert_eq!(message, "unknown offer");
				},
				failure => panic!("unexpected failure {:?}", failure),
			},
			event => panic!("unexpected event {:?}", event),
		}
		assert!(harness.flow.outstanding.lock().unwrap().is_empty());
	}

	#[test]
	fn surfaces_unparsable_invoice_error() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();

		let blinding = reply_blinding(&harness);
		harness.flow.handle_onion_message(&OnionMessageReply {
			blinding_in: Some(blinding),
			invoice: None,
			invoice_error: Some(vec![5, 200, 1]),
		});

		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => match failure {
				FetchFailure::RemoteInvoiceError { message, .. } => {
					assert!(message.starts_with("invalid invoice_error"));
				},
				failure => panic!("unexpected failure {:?}", failure),
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn rejects_reply_with_neither_invoice_nor_error() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();

		let blinding = reply_blinding(&harness);
		harness.flow.handle_onion_message(&OnionMessageReply {
			blinding_in: Some(blinding),
			invoice: None,
			invoice_error: None,
		});

		match single_event(&harness) {
			Event::InvoiceRequestFailed { failure, .. } => {
				assert_eq!(failure, FetchFailure::BadInvoice { field: "invoice".to_string() });
			},
			event => panic!("unexpected event {:?}", event),
		}
	}

	#[test]
	fn ignores_unrelated_onion_messages() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()).unwrap();

		// A message with no blinding cannot be a reply.
		harness.flow.handle_onion_message(&OnionMessageReply {
			blinding_in: None,
			invoice: Some(vec![1, 2, 3]),
			invoice_error: None,
		});
		// A message under an unknown blinding is unrelated traffic.
		harness.flow.handle_onion_message(&OnionMessageReply {
			blinding_in: Some(keys(9).x_only_public_key().0),
			invoice: Some(vec![1, 2, 3]),
			invoice_error: None,
		});

		assert!(harness.flow.get_and_clear_pending_events().is_empty());
		assert_eq!(harness.flow.outstanding.lock().unwrap().len(), 1);
	}

	#[test]
	fn times_out_unanswered_requests() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		let request_id = harness
			.flow
			.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default())
			.unwrap();

		// Too early: nothing happens.
		harness.flow.check_timeouts(now());
		assert!(harness.flow.get_and_clear_pending_events().is_empty());

		harness.flow.check_timeouts(now() + Duration::from_secs(120));
		match single_event(&harness) {
			Event::InvoiceRequestFailed { request_id: id, failure } => {
				assert_eq!(id, request_id);
				assert_eq!(failure, FetchFailure::Timeout);
			},
			event => panic!("unexpected event {:?}", event),
		}
		assert!(harness.flow.outstanding.lock().unwrap().is_empty());
	}

	#[test]
	fn cancelled_requests_drop_late_replies() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);
		let request_id = harness
			.flow
			.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default())
			.unwrap();

		let blinding = reply_blinding(&harness);
		let invoice = merchant_invoice(&harness, &offer, |builder| builder.amount_msats(1000));

		assert!(harness.flow.cancel(request_id));
		assert!(!harness.flow.cancel(request_id));

		harness.flow.handle_onion_message(&OnionMessageReply {
			blinding_in: Some(blinding),
			invoice: Some(invoice.encode()),
			invoice_error: None,
		});
		assert!(harness.flow.get_and_clear_pending_events().is_empty());
	}

	#[test]
	fn tracks_at_most_one_request_per_blinding() {
		let harness = harness();
		let offer = fixed_amount_offer(&harness);

		let first = harness
			.flow
			.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default())
			.unwrap();
		let second = harness
			.flow
			.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default())
			.unwrap();
		assert_ne!(first, second);

		let outstanding = harness.flow.outstanding.lock().unwrap();
		assert_eq!(outstanding.len(), 2);
	}

	#[test]
	fn validates_fetch_parameters() {
		let harness = harness();

		let offer = fixed_amount_offer(&harness);
		let params =
			FetchInvoiceParams { amount_msats: Some(1), ..FetchInvoiceParams::default() };
		match harness.flow.fetch_invoice(&offer.to_string(), params) {
			Err(OfferError::InvalidParams(msg)) => {
				assert_eq!(msg, "amount_msat parameter unnecessary")
			},
			result => panic!("unexpected result {:?}", result),
		}

		let open_offer = signed_offer(
			&harness,
			OfferBuilder::new("anything".into(), merchant_node_id(&harness)),
		);
		match harness.flow.fetch_invoice(&open_offer.to_string(), FetchInvoiceParams::default()) {
			Err(OfferError::InvalidParams(msg)) => {
				assert_eq!(msg, "amount_msat parameter required")
			},
			result => panic!("unexpected result {:?}", result),
		}

		let bounded_offer = signed_offer(
			&harness,
			OfferBuilder::new("cookies".into(), merchant_node_id(&harness))
				.amount_msats(100)
				.quantity_min(2)
				.quantity_max(5),
		);
		let params = FetchInvoiceParams { quantity: Some(1), ..FetchInvoiceParams::default() };
		match harness.flow.fetch_invoice(&bounded_offer.to_string(), params) {
			Err(OfferError::InvalidParams(msg)) => assert_eq!(msg, "quantity must be >= 2"),
			result => panic!("unexpected result {:?}", result),
		}
		let params = FetchInvoiceParams { quantity: Some(6), ..FetchInvoiceParams::default() };
		match harness.flow.fetch_invoice(&bounded_offer.to_string(), params) {
			Err(OfferError::InvalidParams(msg)) => assert_eq!(msg, "quantity must be <= 5"),
			result => panic!("unexpected result {:?}", result),
		}

		let recurring = recurring_offer(&harness);
		let params = FetchInvoiceParams {
			recurrence_counter: Some(0),
			..FetchInvoiceParams::default()
		};
		match harness.flow.fetch_invoice(&recurring.to_string(), params) {
			Err(OfferError::InvalidParams(msg)) => assert_eq!(msg, "needs recurrence_label"),
			result => panic!("unexpected result {:?}", result),
		}
		match harness.flow.fetch_invoice(&recurring.to_string(), FetchInvoiceParams::default()) {
			Err(OfferError::InvalidParams(msg)) => assert_eq!(msg, "needs recurrence_counter"),
			result => panic!("unexpected result {:?}", result),
		}

		assert_eq!(harness.transport.sent_count(), 0);
	}

	#[test]
	fn refuses_send_invoice_offers() {
		let harness = harness();
		let offer = signed_offer(
			&harness,
			OfferBuilder::new("refund".into(), merchant_node_id(&harness))
				.amount_msats(1000)
				.send_invoice(),
		);

		match harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()) {
			Err(OfferError::InvalidParams(msg)) => {
				assert_eq!(msg, "Offer wants an invoice, not invoice_request")
			},
			result => panic!("unexpected result {:?}", result),
		}
	}

	#[test]
	fn refuses_expired_offers() {
		let harness = harness();
		let offer = signed_offer(
			&harness,
			OfferBuilder::new("stale".into(), merchant_node_id(&harness))
				.amount_msats(1000)
				.absolute_expiry(Duration::from_secs(1000)),
		);

		match harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()) {
			Err(OfferError::OfferExpired) => {},
			result => panic!("unexpected result {:?}", result),
		}
		assert_eq!(OfferError::OfferExpired.code(), Some(ErrorCode::OfferExpired));
		assert_eq!(ErrorCode::OfferExpired.code(), 1002);
	}

	#[test]
	fn refuses_unsigned_offers() {
		let harness = harness();
		let offer = OfferBuilder::new("unsigned".into(), merchant_node_id(&harness))
			.amount_msats(1000)
			.build()
			.unwrap();

		match harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()) {
			Err(OfferError::Parse(_)) => {},
			result => panic!("unexpected result {:?}", result),
		}
	}

	#[test]
	fn surfaces_routing_failures() {
		// Destination absent from gossip.
		let harness = harness();
		let unknown_merchant = keys(9);
		let offer = OfferBuilder::new("ghost".into(), unknown_merchant.x_only_public_key().0)
			.amount_msats(1000)
			.build()
			.unwrap()
			.sign(sign_with(&unknown_merchant))
			.unwrap();
		match harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()) {
			Err(OfferError::UnknownDestination(node_id)) => {
				assert_eq!(node_id, unknown_merchant.x_only_public_key().0);
			},
			result => panic!("unexpected result {:?}", result),
		}

		// We have no presence in gossip.
		let harness = harness_with_graph(false, false);
		let offer = fixed_amount_offer(&harness);
		match harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()) {
			Err(OfferError::RouteNotFound(msg)) => {
				assert_eq!(msg, "We don't have any channels")
			},
			result => panic!("unexpected result {:?}", result),
		}

		// No usable route.
		let harness = harness_with_graph(true, false);
		let offer = fixed_amount_offer(&harness);
		match harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()) {
			Err(OfferError::RouteNotFound(msg)) => assert_eq!(msg, "Can't find route"),
			result => panic!("unexpected result {:?}", result),
		}
		assert_eq!(
			OfferError::RouteNotFound("Can't find route").code(),
			Some(ErrorCode::OfferRouteNotFound)
		);
	}

	#[test]
	fn aborts_on_signer_and_transport_failures() {
		{
			let harness = harness();
			let offer = recurring_offer(&harness);

			harness.signer.corrupt_signatures();
			match harness.flow.fetch_invoice(&offer.to_string(), recurring_params(0)) {
				Err(OfferError::Signer(SignerError::InvalidSignature)) => {},
				result => panic!("unexpected result {:?}", result),
			}
			assert_eq!(harness.transport.sent_count(), 0);
		}

		{
			let harness = harness();
			let offer = recurring_offer(&harness);
			harness.signer.go_away();
			match harness.flow.fetch_invoice(&offer.to_string(), recurring_params(0)) {
				Err(OfferError::Signer(SignerError::Unavailable)) => {},
				result => panic!("unexpected result {:?}", result),
			}
		}

		{
			let harness = harness();
			let offer = fixed_amount_offer(&harness);
			harness.transport.fail_sends();
			match harness.flow.fetch_invoice(&offer.to_string(), FetchInvoiceParams::default()) {
				Err(OfferError::Transport(_)) => {},
				result => panic!("unexpected result {:?}", result),
			}
			assert!(harness.flow.outstanding.lock().unwrap().is_empty());
		}
	}

	#[test]
	fn creates_lists_and_disables_offers() {
		let harness = harness();
		// Our node signs its own offers, so build one for the signer's identity key.
		let unsigned = OfferBuilder::new("my widgets".into(), harness.signer.node_pubkey())
			.amount_msats(5000)
			.build()
			.unwrap();

		let info = harness
			.flow
			.create_offer(&unsigned.to_string(), Some("widgets".to_string()), false)
			.unwrap();
		assert!(info.active);
		assert!(!info.single_use);
		assert!(!info.used);
		assert_eq!(info.label, Some("widgets".to_string()));
		assert_eq!(info.offer_id, unsigned.id());

		// The stored string carries a verifiable signature.
		let stored = info.bolt12.parse::<Offer>().unwrap();
		stored.verify_signature(&Secp256k1::new()).unwrap();

		// Storing the same offer again is refused.
		match harness.flow.create_offer(&unsigned.to_string(), None, false) {
			Err(OfferError::DuplicateOffer) => {},
			result => panic!("unexpected result {:?}", result),
		}
		assert_eq!(OfferError::DuplicateOffer.code(), Some(ErrorCode::OfferAlreadyExists));

		// A signed offer is not acceptable input.
		match harness.flow.create_offer(&stored.to_string(), None, false) {
			Err(OfferError::InvalidParams(msg)) => assert_eq!(msg, "must be unsigned offer"),
			result => panic!("unexpected result {:?}", result),
		}

		assert_eq!(harness.flow.list_offers(None, false).len(), 1);
		assert_eq!(harness.flow.list_offers(Some(info.offer_id), true).len(), 1);

		let disabled = harness.flow.disable_offer(&info.offer_id).unwrap();
		assert!(!disabled.active);
		assert_eq!(
			harness.wallet.offer_status(&info.offer_id),
			Some(OfferStatus::MultipleDisabled)
		);
		assert_eq!(harness.flow.list_offers(None, true).len(), 0);
		assert_eq!(harness.flow.list_offers(None, false).len(), 1);

		match harness.flow.disable_offer(&info.offer_id) {
			Err(OfferError::OfferAlreadyDisabled) => {},
			result => panic!("unexpected result {:?}", result),
		}
		match harness.flow.disable_offer(&OfferId([42; 32])) {
			Err(OfferError::UnknownOffer) => {},
			result => panic!("unexpected result {:?}", result),
		}
	}

	#[test]
	fn marks_single_use_offers_used() {
		let harness = harness();
		let unsigned = OfferBuilder::new("one-shot".into(), harness.signer.node_pubkey())
			.amount_msats(5000)
			.build()
			.unwrap();
		let info =
			harness.flow.create_offer(&unsigned.to_string(), None, true).unwrap();
		assert!(info.single_use);

		let used = harness.flow.mark_offer_used(&info.offer_id).unwrap();
		assert!(used.used);
		assert!(!used.active);
		assert_eq!(harness.wallet.offer_status(&info.offer_id), Some(OfferStatus::Used));

		// Used single-use offers can be neither used again nor disabled.
		match harness.flow.mark_offer_used(&info.offer_id) {
			Err(OfferError::OfferAlreadyDisabled) => {},
			result => panic!("unexpected result {:?}", result),
		}
		match harness.flow.disable_offer(&info.offer_id) {
			Err(OfferError::OfferAlreadyDisabled) => {},
			result => panic!("unexpected result {:?}", result),
		}

		// Multi-use offers survive being marked used.
		let unsigned = OfferBuilder::new("reusable".into(), harness.signer.node_pubkey())
			.amount_msats(5000)
			.build()
			.unwrap();
		let info = harness.flow.create_offer(&unsigned.to_string(), None, false).unwrap();
		let still_active = harness.flow.mark_offer_used(&info.offer_id).unwrap();
		assert!(still_active.active);
		assert!(!still_active.used);
	}

	#[test]
	fn completes_externally_built_invoice_requests() {
		let harness = harness();
		let offer = recurring_offer(&harness);

		// An unsigned request without payer fields, as `createinvoicerequest` receives it.
		let invreq = sent_request_skeleton(&offer);
		let finished = harness.flow.create_invoice_request(&invreq, Some("sub")).unwrap();

		let parsed = finished.parse::<InvoiceRequest>().unwrap();
		assert_eq!(parsed.payer_info().unwrap().len(), 16);
		assert!(parsed.recurrence_signature().is_some());
		let derived = derive_payer_key(
			&Secp256k1::new(),
			&harness.signer.payer_base_pubkey(),
			parsed.payer_info().unwrap(),
		)
		.unwrap();
		assert_eq!(parsed.payer_key(), Some(derived));

		// A finished request is not acceptable input.
		match harness.flow.create_invoice_request(&finished, Some("sub")) {
			Err(OfferError::InvalidParams(msg)) => assert_eq!(msg, "must not have payer_info"),
			result => panic!("unexpected result {:?}", result),
		}

		// Recurring requests need a label.
		match harness.flow.create_invoice_request(&sent_request_skeleton(&offer), None) {
			Err(OfferError::InvalidParams(msg)) => {
				assert_eq!(msg, "Need payment label for recurring payments")
			},
			result => panic!("unexpected result {:?}", result),
		}
	}

	/// Builds the bech32 string of an unsigned, payer-less invoice_request for `offer`, the way
	/// an external caller would hand it to `create_invoice_request`.
	fn sent_request_skeleton(offer: &Offer) -> String {
		let unsigned = offer
			.request_invoice()
			.unwrap()
			.recurrence_counter(0)
			.unwrap()
			.payer_info(vec![0; 16])
			.payer_key(keys(8).x_only_public_key().0)
			.build()
			.unwrap();
		let mut contents = unsigned.invreq.clone();
		contents.payer_info = None;
		contents.payer_key = None;
		InvoiceRequest::try_from(contents.encode()).unwrap().to_string()
	}
}
