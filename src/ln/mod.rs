// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Lightning-level wire primitives shared across the crate.

pub mod features;
pub mod msgs;

/// The maximum value which can be expressed in millisatoshi: 21 million bitcoin.
pub const MAX_VALUE_MSAT: u64 = 21_000_000_0000_0000_000;

/// payment_hash type, use to cross-lock hop
#[derive(Hash, Copy, Clone, PartialEq, Eq, Debug)]
pub struct PaymentHash(pub [u8; 32]);
