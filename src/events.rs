// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Events are surfaced by the exchange engine when an asynchronous reply (or the lack of one)
//! resolves an outstanding invoice request.
//!
//! Fetch the pending events with [`OffersFlow::get_and_clear_pending_events`] after pumping the
//! inbound hook or the timeout check.
//!
//! [`OffersFlow::get_and_clear_pending_events`]: crate::offers::flow::OffersFlow::get_and_clear_pending_events

use core::fmt;

/// An opaque identifier correlating a [`fetch_invoice`] call with the [`Event`] resolving it.
///
/// [`fetch_invoice`]: crate::offers::flow::OffersFlow::fetch_invoice
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct RequestId(pub [u8; 32]);

/// The period for which the next invoice in a recurring series may be requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NextPeriod {
	/// The `recurrence_counter` value to use in the next request.
	pub counter: u64,
	/// Seconds since the Unix epoch when the next period starts.
	pub starttime: u64,
	/// Seconds since the Unix epoch when the next period ends, inclusive.
	pub endtime: u64,
	/// Earliest time the next period's invoice may be paid.
	pub paywindow_start: u64,
	/// Latest time the next period's invoice may be paid.
	pub paywindow_end: u64,
}

/// Differences between a returned invoice and the offer it answers, surfaced so the caller can
/// confirm authorization with the user before paying.
///
/// An invoice matching the offer exactly produces an empty record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvoiceChanges {
	/// The invoice's description, when it differs from the offer's in a way that is neither a
	/// pure suffix nor a removal.
	pub description: Option<String>,
	/// The suffix appended to the offer's description, when the invoice merely extends it.
	pub description_appended: Option<String>,
	/// The offer's description, when the invoice dropped it entirely.
	pub description_removed: Option<String>,
	/// The invoice's vendor, when it differs from the offer's.
	pub vendor: Option<String>,
	/// The offer's vendor, when the invoice dropped it entirely.
	pub vendor_removed: Option<String>,
	/// The invoice's amount in millisatoshi, whenever it is not trivially the expected
	/// `offer.amount * quantity`.
	pub amount_msat: Option<u64>,
}

impl InvoiceChanges {
	/// Whether the invoice matched the offer exactly, requiring no confirmation.
	pub fn is_empty(&self) -> bool {
		*self == InvoiceChanges::default()
	}
}

/// Why a fetched invoice did not resolve into a payable result.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchFailure {
	/// The returned invoice failed a BOLT 12 requirement; `field` names the offending field.
	BadInvoice {
		/// The field that failed validation.
		field: String,
	},
	/// The remote node replied with an `invoice_error` instead of an invoice.
	RemoteInvoiceError {
		/// The TLV type of the request field the remote found erroneous, if indicated.
		erroneous_field: Option<u64>,
		/// The value the remote suggests for the erroneous field, if any.
		suggested_value: Option<Vec<u8>>,
		/// The remote's explanatory message.
		message: String,
	},
	/// No reply arrived before the request deadline.
	Timeout,
}

impl fmt::Display for FetchFailure {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			FetchFailure::BadInvoice { field } => write!(f, "Incorrect {} field in reply", field),
			FetchFailure::RemoteInvoiceError { message, .. } => {
				write!(f, "Remote node sent failure message: {}", message)
			},
			FetchFailure::Timeout => write!(f, "Timed out waiting for reply"),
		}
	}
}

/// An event surfaced by the exchange engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
	/// A valid invoice arrived for an outstanding request.
	InvoiceReceived {
		/// The request this invoice answers.
		request_id: RequestId,
		/// The bech32-encoded invoice, ready to be handed to a payment subsystem.
		invoice: String,
		/// Differences from the offer for the user to confirm before paying.
		changes: InvoiceChanges,
		/// The next period of the recurrence, when the offer recurs and the subscription has
		/// not hit its limit.
		next_period: Option<NextPeriod>,
	},
	/// An outstanding request failed; no invoice will arrive for it.
	InvoiceRequestFailed {
		/// The request that failed.
		request_id: RequestId,
		/// Why it failed.
		failure: FetchFailure,
	},
}
