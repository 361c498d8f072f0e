// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A BOLT 12 "offers" subsystem.
//!
//! This crate implements the customer side of the offer-to-invoice exchange: parsing and
//! verifying merchant-signed [`Offer`]s, building [`InvoiceRequest`]s with derivation-hidden
//! payer keys, routing them to the merchant over a blinded onion message reply path, and
//! validating the asynchronously returned [`Invoice`] against every BOLT 12 requirement. It also
//! covers the merchant-adjacent bookkeeping: creating and signing offers, and tracking their
//! single-use/multi-use/disabled status.
//!
//! The crate does not talk to the network, a signer, or a database itself. Collaborators are
//! abstracted behind capability traits ([`Bolt12Signer`], [`Transport`], [`NetworkView`],
//! [`Wallet`], [`EntropySource`]) so the engine can be driven from any runtime and tested with
//! in-memory fakes. See [`OffersFlow`] for the main entry point.
//!
//! [`Offer`]: offers::offer::Offer
//! [`InvoiceRequest`]: offers::invoice_request::InvoiceRequest
//! [`Invoice`]: offers::invoice::Invoice
//! [`Bolt12Signer`]: sign::Bolt12Signer
//! [`Transport`]: onion_message::Transport
//! [`NetworkView`]: routing::gossip::NetworkView
//! [`Wallet`]: offers::flow::Wallet
//! [`EntropySource`]: sign::EntropySource
//! [`OffersFlow`]: offers::flow::OffersFlow

extern crate bitcoin;

#[macro_use]
pub mod util;
pub mod blinded_path;
pub mod events;
pub mod ln;
pub mod offers;
pub mod onion_message;
pub mod routing;
pub mod sign;
