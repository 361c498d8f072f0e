// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wire decoding errors.

use core::fmt;
use std::io;

/// An error in decoding a message or struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
	/// A TLV record carried an even type number we don't know, mandating we fail to parse the
	/// whole message per the it's-ok-to-be-odd rule.
	UnknownEvenField,
	/// A value was invalid: a duplicated or out-of-order TLV record, a non-minimal length or
	/// integer encoding, a key or signature that wasn't one, text that wasn't UTF-8, etc.
	InvalidValue,
	/// The buffer to be read was too short.
	ShortRead,
	/// Error from [`std::io`].
	Io(io::ErrorKind),
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			DecodeError::UnknownEvenField => f.write_str("Unknown even TLV field in message"),
			DecodeError::InvalidValue => {
				f.write_str("Nonsense bytes didn't map to the type they were interpreted as")
			},
			DecodeError::ShortRead => f.write_str("Packet extended beyond the provided bytes"),
			DecodeError::Io(ref e) => fmt::Debug::fmt(e, f),
		}
	}
}

impl std::error::Error for DecodeError {}
