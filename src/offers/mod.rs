// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Implementation of Lightning Offers
//! ([BOLT 12](https://github.com/lightning/bolts/blob/master/12-offer-encoding.md)).
//!
//! Offers are a flexible protocol for Lightning payments: a merchant publishes a reusable,
//! signed [`Offer`]; a customer answers with a derivation-hidden [`InvoiceRequest`] over an
//! onion message and receives an [`Invoice`] in reply. [`flow`] contains the engine driving
//! that exchange.
//!
//! [`Offer`]: offer::Offer
//! [`InvoiceRequest`]: invoice_request::InvoiceRequest
//! [`Invoice`]: invoice::Invoice

pub mod flow;
pub mod invoice;
pub mod invoice_error;
pub mod invoice_request;
pub mod merkle;
pub mod offer;
pub mod parse;
pub mod payer;
pub mod recurrence;
