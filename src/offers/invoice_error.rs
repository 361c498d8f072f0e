// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Data structures and encoding for `invoice_error` messages.
//!
//! A merchant who refuses an invoice_request replies with an [`InvoiceError`] instead of an
//! invoice, optionally naming the offending field and suggesting a replacement value.

use std::io::{Cursor, Read, Seek};

use crate::ln::msgs::DecodeError;
use crate::util::ser::{
	read_tlv_stream, HighZeroBytesDroppedBigSize, Readable, SeekReadable, WithoutLength,
};

const ERRONEOUS_FIELD_TYPE: u64 = 1;
const SUGGESTED_VALUE_TYPE: u64 = 3;
const ERROR_TYPE: u64 = 5;

/// An error in response to an invoice_request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InvoiceError {
	/// The TLV type number of the field in the invoice_request the sender found erroneous.
	pub erroneous_field: Option<u64>,
	/// A value the sender would have accepted for the erroneous field.
	pub suggested_value: Option<Vec<u8>>,
	/// An explanatory message. Empty if the sender did not include one.
	pub message: String,
}

impl InvoiceError {
	/// Decodes an invoice_error from its TLV serialization. Returns `None` if the bytes are not
	/// a well-formed stream; senders of garbage don't get their message relayed.
	pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
		let mut cursor = Cursor::new(bytes);
		match SeekReadable::read(&mut cursor) {
			Ok(error) => {
				if cursor.stream_position().ok()? < bytes.len() as u64 {
					return None;
				}
				Some(error)
			},
			Err(_) => None,
		}
	}
}

impl SeekReadable for InvoiceError {
	fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut error = InvoiceError::default();
		read_tlv_stream(reader, |r#type, mut value| {
			match r#type {
				ERRONEOUS_FIELD_TYPE => {
					let field: HighZeroBytesDroppedBigSize<u64> = Readable::read(&mut value)?;
					error.erroneous_field = Some(field.0);
				},
				SUGGESTED_VALUE_TYPE => {
					let suggested: WithoutLength<Vec<u8>> = Readable::read(&mut value)?;
					error.suggested_value = Some(suggested.0);
				},
				ERROR_TYPE => {
					let message: WithoutLength<String> = Readable::read(&mut value)?;
					error.message = message.0;
				},
				_ => return Ok(false),
			}
			Ok(true)
		})?;
		Ok(error)
	}
}
