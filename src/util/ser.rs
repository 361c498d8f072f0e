// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A very simple serialization framework which is used to serialize/deserialize the TLV records
//! making up BOLT 12 messages.

use std::io::{self, Read, Seek, SeekFrom};

use bitcoin::blockdata::constants::ChainHash;
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{PublicKey, XOnlyPublicKey};

use crate::ln::msgs::DecodeError;
use crate::ln::PaymentHash;

/// A trait that is similar to [`std::io::Write`] but has one extra function which can be used to
/// size buffers being written into.
///
/// An impl is provided for any type that also impls [`std::io::Write`] which simply ignores size
/// hints.
pub trait Writer {
	/// Writes the given buf out. See [`std::io::Write::write_all`] for more.
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error>;
	/// Hints that data of the given size is about to be written. This may not always be called
	/// prior to data being written and may be safely ignored.
	fn size_hint(&mut self, size: usize);
}

impl<W: io::Write> Writer for W {
	#[inline]
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		<Self as io::Write>::write_all(self, buf)
	}
	#[inline]
	fn size_hint(&mut self, _size: usize) {}
}

pub(crate) struct VecWriter(pub Vec<u8>);
impl Writer for VecWriter {
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		self.0.extend_from_slice(buf);
		Ok(())
	}
	fn size_hint(&mut self, size: usize) {
		self.0.reserve_exact(size);
	}
}

/// Writer that only tracks the amount of data written - useful if you need to calculate the length
/// of some data when serialized but don't yet need the full data.
pub(crate) struct LengthCalculatingWriter(pub usize);
impl Writer for LengthCalculatingWriter {
	#[inline]
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		self.0 += buf.len();
		Ok(())
	}
	#[inline]
	fn size_hint(&mut self, _size: usize) {}
}

/// A trait that various types implement allowing them to be written out to a [`Writer`].
pub trait Writeable {
	/// Writes `self` out to the given [`Writer`].
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error>;

	/// Writes `self` out to a `Vec<u8>`.
	fn encode(&self) -> Vec<u8> {
		let mut msg = VecWriter(Vec::new());
		self.write(&mut msg).expect("in-memory writes cannot fail");
		msg.0
	}
}

impl<'a, T: Writeable> Writeable for &'a T {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		(*self).write(writer)
	}
}

/// A trait that various types implement allowing them to be read in from a [`Read`].
pub trait Readable
where
	Self: Sized,
{
	/// Reads a `Self` in from the given [`Read`].
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError>;
}

/// Like [`Readable`], but for types whose TLV parsing needs to know where the byte stream ends,
/// such as whole messages keeping ownership of their serialized bytes.
pub(crate) trait SeekReadable
where
	Self: Sized,
{
	/// Reads a `Self` in from the given [`Read`].
	fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, DecodeError>;
}

impl From<io::Error> for DecodeError {
	fn from(e: io::Error) -> Self {
		if e.kind() == io::ErrorKind::UnexpectedEof {
			DecodeError::ShortRead
		} else {
			DecodeError::Io(e.kind())
		}
	}
}

/// Lightning TLV uses a custom variable-length integer called `BigSize`. It is similar to
/// Bitcoin's variable-length integers except that it is serialized in big-endian instead of
/// little-endian.
///
/// Like Bitcoin's variable-length integer, it exhibits ambiguity in that certain values can be
/// encoded in several different ways, which we must check for at deserialization-time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BigSize(pub u64);

impl Writeable for BigSize {
	#[inline]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		match self.0 {
			0..=0xFC => (self.0 as u8).write(writer),
			0xFD..=0xFFFF => {
				0xFDu8.write(writer)?;
				(self.0 as u16).write(writer)
			},
			0x10000..=0xFFFFFFFF => {
				0xFEu8.write(writer)?;
				(self.0 as u32).write(writer)
			},
			_ => {
				0xFFu8.write(writer)?;
				self.0.write(writer)
			},
		}
	}
}

impl Readable for BigSize {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<BigSize, DecodeError> {
		let n: u8 = Readable::read(reader)?;
		match n {
			0xFF => {
				let x: u64 = Readable::read(reader)?;
				if x < 0x100000000 {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x))
				}
			},
			0xFE => {
				let x: u32 = Readable::read(reader)?;
				if x < 0x10000 {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x as u64))
				}
			},
			0xFD => {
				let x: u16 = Readable::read(reader)?;
				if x < 0xFD {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x as u64))
				}
			},
			n => Ok(BigSize(n as u64)),
		}
	}
}

/// In TLV we occasionally send fields which only consist of, or potentially end with, a
/// big-endian integer which is simply truncated by skipping high zero bytes. This type
/// encapsulates such integers implementing [`Readable`]/[`Writeable`] for them.
#[cfg_attr(test, derive(PartialEq, Debug))]
pub struct HighZeroBytesDroppedBigSize<T>(pub T);

macro_rules! impl_writeable_primitive {
	($val_type:ty, $len: expr) => {
		impl Writeable for $val_type {
			#[inline]
			fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
				writer.write_all(&self.to_be_bytes())
			}
		}
		impl Writeable for HighZeroBytesDroppedBigSize<$val_type> {
			#[inline]
			fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
				// Skip any full leading 0 bytes when writing (in BE):
				writer.write_all(&self.0.to_be_bytes()[(self.0.leading_zeros() / 8) as usize..$len])
			}
		}
		impl Readable for $val_type {
			#[inline]
			fn read<R: Read>(reader: &mut R) -> Result<$val_type, DecodeError> {
				let mut buf = [0; $len];
				reader.read_exact(&mut buf)?;
				Ok(<$val_type>::from_be_bytes(buf))
			}
		}
		impl Readable for HighZeroBytesDroppedBigSize<$val_type> {
			#[inline]
			fn read<R: Read>(reader: &mut R) -> Result<HighZeroBytesDroppedBigSize<$val_type>, DecodeError> {
				// These are always the last field of a TLV record, so read until the end.
				let mut bytes = Vec::with_capacity($len);
				reader.read_to_end(&mut bytes)?;
				if bytes.len() > $len {
					return Err(DecodeError::InvalidValue);
				}
				// A value with leading zero bytes is non-canonical and must be rejected.
				if !bytes.is_empty() && bytes[0] == 0 {
					return Err(DecodeError::InvalidValue);
				}
				let mut buf = [0; $len];
				buf[$len - bytes.len()..].copy_from_slice(&bytes);
				Ok(HighZeroBytesDroppedBigSize(<$val_type>::from_be_bytes(buf)))
			}
		}
	};
}

impl_writeable_primitive!(u64, 8);
impl_writeable_primitive!(u32, 4);
impl_writeable_primitive!(u16, 2);

impl Writeable for u8 {
	#[inline]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&[*self])
	}
}
impl Readable for u8 {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<u8, DecodeError> {
		let mut buf = [0; 1];
		reader.read_exact(&mut buf)?;
		Ok(buf[0])
	}
}

/// Zero-length TLV records act as flags; their mere presence is the value.
impl Writeable for () {
	#[inline]
	fn write<W: Writer>(&self, _writer: &mut W) -> Result<(), io::Error> {
		Ok(())
	}
}
impl Readable for () {
	#[inline]
	fn read<R: Read>(_reader: &mut R) -> Result<(), DecodeError> {
		Ok(())
	}
}

macro_rules! impl_array {
	($size:expr) => {
		impl Writeable for [u8; $size] {
			#[inline]
			fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
				w.write_all(self)
			}
		}

		impl Readable for [u8; $size] {
			#[inline]
			fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
				let mut buf = [0u8; $size];
				r.read_exact(&mut buf)?;
				Ok(buf)
			}
		}
	};
}

impl_array!(3); // for currency codes
impl_array!(32); // for hashes and x-only pubkeys
impl_array!(33); // for pubkeys
impl_array!(64); // for signatures

// Vectors
impl Writeable for Vec<u8> {
	#[inline]
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		(self.len() as u16).write(w)?;
		w.write_all(self)
	}
}

impl Readable for Vec<u8> {
	#[inline]
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(r)?;
		let mut ret = vec![0; len as usize];
		r.read_exact(&mut ret)?;
		Ok(ret)
	}
}

/// For variable-length values within TLV record where the length is encoded as part of the record.
/// Used to prevent encoding the length twice.
pub struct WithoutLength<T>(pub T);

impl<'a> Writeable for WithoutLength<&'a String> {
	#[inline]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(self.0.as_bytes())
	}
}
impl Readable for WithoutLength<String> {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let v: WithoutLength<Vec<u8>> = Readable::read(reader)?;
		Ok(Self(String::from_utf8(v.0).map_err(|_| DecodeError::InvalidValue)?))
	}
}

impl<'a, T: Writeable> Writeable for WithoutLength<&'a Vec<T>> {
	#[inline]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		for elem in self.0.iter() {
			elem.write(writer)?;
		}
		Ok(())
	}
}
impl<T: Readable> Readable for WithoutLength<Vec<T>> {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut values = Vec::new();
		loop {
			let mut track_read = ReadTrackingReader::new(&mut *reader);
			match Readable::read(&mut track_read) {
				Ok(v) => values.push(v),
				// If we failed to read any bytes at all, we reached the end of our TLV
				// stream and have simply exhausted all entries.
				Err(DecodeError::ShortRead) if !track_read.have_read => break,
				Err(e) => return Err(e),
			}
		}
		Ok(Self(values))
	}
}

/// A [`Read`] which tracks whether any bytes have been read at all. This allows us to distinguish
/// between "EOF reached before we started" and "EOF reached mid-read".
pub(crate) struct ReadTrackingReader<R: Read> {
	read: R,
	pub have_read: bool,
}
impl<R: Read> ReadTrackingReader<R> {
	pub fn new(read: R) -> Self {
		Self { read, have_read: false }
	}
}
impl<R: Read> Read for ReadTrackingReader<R> {
	fn read(&mut self, dest: &mut [u8]) -> Result<usize, io::Error> {
		match self.read.read(dest) {
			Ok(0) => Ok(0),
			Ok(len) => {
				self.have_read = true;
				Ok(len)
			},
			Err(e) => Err(e),
		}
	}
}

impl Writeable for ChainHash {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		w.write_all(self.as_bytes())
	}
}

impl Readable for ChainHash {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 32] = Readable::read(r)?;
		Ok(ChainHash::from(&buf[..]))
	}
}

impl Writeable for PublicKey {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.serialize().write(w)
	}
}

impl Readable for PublicKey {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 33] = Readable::read(r)?;
		PublicKey::from_slice(&buf).map_err(|_| DecodeError::InvalidValue)
	}
}

impl Writeable for XOnlyPublicKey {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.serialize().write(w)
	}
}

impl Readable for XOnlyPublicKey {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 32] = Readable::read(r)?;
		XOnlyPublicKey::from_slice(&buf).map_err(|_| DecodeError::InvalidValue)
	}
}

impl Writeable for Signature {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		w.write_all(self.as_ref())
	}
}

impl Readable for Signature {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 64] = Readable::read(r)?;
		Signature::from_slice(&buf).map_err(|_| DecodeError::InvalidValue)
	}
}

impl Writeable for PaymentHash {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.0.write(w)
	}
}

impl Readable for PaymentHash {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 32] = Readable::read(r)?;
		Ok(PaymentHash(buf))
	}
}

/// Writes a single TLV record: `type` and the length of `value`'s serialization as [`BigSize`]s,
/// followed by the serialization itself.
pub(crate) fn write_tlv_record<W: Writer, T: Writeable>(
	writer: &mut W, r#type: u64, value: &T,
) -> Result<(), io::Error> {
	BigSize(r#type).write(writer)?;
	let mut len_calc = LengthCalculatingWriter(0);
	value.write(&mut len_calc)?;
	BigSize(len_calc.0 as u64).write(writer)?;
	value.write(writer)
}

/// Reads a TLV stream from `reader` until the underlying stream is exhausted, handing each
/// record's type and value bytes to `handle`.
///
/// Record types must be strictly ascending (which also rules out duplicates) and lengths must
/// describe the remaining bytes, otherwise decoding fails. `handle` returns whether it recognized
/// the record's type; unrecognized even types fail the stream per the it's-ok-to-be-odd rule
/// while unrecognized odd types are skipped.
pub(crate) fn read_tlv_stream<R: Read + Seek, F>(
	reader: &mut R, mut handle: F,
) -> Result<(), DecodeError>
where
	F: FnMut(u64, &[u8]) -> Result<bool, DecodeError>,
{
	let total_len = {
		let position = reader.stream_position()?;
		let total_len = reader.seek(SeekFrom::End(0))?;
		reader.seek(SeekFrom::Start(position))?;
		total_len
	};

	let mut last_seen_type: Option<u64> = None;
	while reader.stream_position()? < total_len {
		let r#type: BigSize = Readable::read(reader)?;
		match last_seen_type {
			Some(t) if r#type.0 <= t => return Err(DecodeError::InvalidValue),
			_ => {},
		}
		last_seen_type = Some(r#type.0);

		let length: BigSize = Readable::read(reader)?;
		let mut value = vec![0; length.0 as usize];
		reader.read_exact(&mut value)?;

		if !handle(r#type.0, &value)? && r#type.0 % 2 == 0 {
			return Err(DecodeError::UnknownEvenField);
		}
	}
	Ok(())
}
