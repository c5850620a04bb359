// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A simple serialization framework for the routes and payment records which must be
//! persisted and read back across restarts.
//!
//! Everything stored on disk round-trips through [`Writeable`]/[`Readable`]. Variable
//! and optional fields are carried as [`TlvRecord`] streams so that future versions can
//! add fields which older readers skip over (and which this version preserves opaquely,
//! see [`read_tlv_stream`]).

use core::cmp;
use core::fmt;
use std::io::{self, Read};

use bitcoin::secp256k1::constants::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};
use bitcoin::secp256k1::{PublicKey, SecretKey};

pub(crate) const MAX_BUF_SIZE: usize = 64 * 1024;

/// An error in decoding a serialized route or payment record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
	/// The input ended before a complete value was read. Includes any fixed-size field
	/// which was shorter than its declared size.
	ShortRead,
	/// A value was well-framed but nonsensical: an oversized fixed-size field, a
	/// non-minimal varint, out-of-order TLV types, or a field failing validation.
	InvalidValue,
	/// A record type which is structurally required for this object was absent.
	UnknownRequiredField,
	/// A length descriptor exceeded the maximum allowed buffer size.
	BadLengthDescriptor,
	/// An error from the underlying reader.
	Io(io::ErrorKind),
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			DecodeError::ShortRead => f.write_str("Input ended mid-object"),
			DecodeError::InvalidValue => f.write_str("Nonsense bytes didn't map to the type they were interpreted as"),
			DecodeError::UnknownRequiredField => f.write_str("A required record was missing"),
			DecodeError::BadLengthDescriptor => f.write_str("A length descriptor was out of range"),
			DecodeError::Io(ref e) => fmt::Debug::fmt(e, f),
		}
	}
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

/// A writer which we serialize into, similar to [`io::Write`] but infallible for
/// in-memory targets.
pub trait Writer {
	/// Writes the given buf out. See [`io::Write::write_all`] for more.
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error>;
}

impl<W: io::Write> Writer for W {
	#[inline]
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		<Self as io::Write>::write_all(self, buf)
	}
}

pub(crate) struct VecWriter(pub Vec<u8>);
impl Writer for VecWriter {
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		self.0.extend_from_slice(buf);
		Ok(())
	}
}

/// Writer that only tracks the amount of data written - useful if you need to calculate
/// the length of some data when serialized but don't yet need the full data.
pub(crate) struct LengthCalculatingWriter(pub usize);
impl Writer for LengthCalculatingWriter {
	#[inline]
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		self.0 += buf.len();
		Ok(())
	}
}

/// Essentially [`io::Take`] but with a method to check whether the fixed length was
/// consumed exactly, so length-framed sub-objects can reject trailing garbage.
pub(crate) struct FixedLengthReader<R: Read> {
	read: R,
	bytes_read: u64,
	total_bytes: u64,
}

impl<R: Read> FixedLengthReader<R> {
	pub fn new(read: R, total_bytes: u64) -> Self {
		Self { read, bytes_read: 0, total_bytes }
	}

	#[inline]
	pub fn bytes_remain(&self) -> bool {
		self.bytes_read != self.total_bytes
	}
}

impl<R: Read> Read for FixedLengthReader<R> {
	fn read(&mut self, dest: &mut [u8]) -> Result<usize, io::Error> {
		if self.total_bytes == self.bytes_read {
			Ok(0)
		} else {
			let read_len = cmp::min(dest.len() as u64, self.total_bytes - self.bytes_read);
			match self.read.read(&mut dest[0..(read_len as usize)]) {
				Ok(v) => {
					self.bytes_read += v as u64;
					Ok(v)
				},
				Err(e) => Err(e),
			}
		}
	}
}

/// A [`Read`] which tracks whether any bytes have been read at all. This allows us to
/// distinguish between "EOF reached before we started" and "EOF reached mid-read".
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

/// A trait that various types implement allowing them to be written out to a [`Writer`].
pub trait Writeable {
	/// Writes `self` out to the given [`Writer`].
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error>;

	/// Writes `self` out to a `Vec<u8>`.
	fn encode(&self) -> Vec<u8> {
		let mut msg = VecWriter(Vec::new());
		// In-memory writes cannot fail.
		self.write(&mut msg).unwrap();
		msg.0
	}

	/// Gets the length of this object after it has been serialized.
	fn serialized_length(&self) -> usize {
		let mut len_calc = LengthCalculatingWriter(0);
		self.write(&mut len_calc).expect("No in-memory data may fail to serialize");
		len_calc.0
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

/// The variable-length integer used throughout our TLV encoding. Serialized in
/// big-endian, and non-minimal encodings are rejected at read time so every value has
/// exactly one wire form.
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

macro_rules! impl_writeable_primitive {
	($val_type:ty, $len: expr) => {
		impl Writeable for $val_type {
			#[inline]
			fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
				writer.write_all(&self.to_be_bytes())
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

impl_array!(32); // for payment hashes, preimages and session keys
impl_array!(33); // for compressed public keys

impl Writeable for PublicKey {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.serialize().write(w)
	}
}

impl Readable for PublicKey {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; PUBLIC_KEY_SIZE] = Readable::read(r)?;
		match PublicKey::from_slice(&buf) {
			Ok(key) => Ok(key),
			Err(_) => Err(DecodeError::InvalidValue),
		}
	}
}

impl Writeable for SecretKey {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		let mut ser = [0; SECRET_KEY_SIZE];
		ser.copy_from_slice(&self[..]);
		ser.write(w)
	}
}

impl Readable for SecretKey {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; SECRET_KEY_SIZE] = Readable::read(r)?;
		match SecretKey::from_slice(&buf) {
			Ok(key) => Ok(key),
			Err(_) => Err(DecodeError::InvalidValue),
		}
	}
}

/// One type-length-value record: an opaque payload tagged with a 64-bit type.
///
/// Records appear on the wire as `BigSize(type) || BigSize(len) || value` and always
/// travel in streams sorted strictly ascending by type. Both the records carried to a
/// hop inside a route and the fields of our persisted payment objects use this form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlvRecord {
	/// The type tag identifying how `value` is to be interpreted.
	pub record_type: u64,
	/// The raw value bytes, opaque at this layer.
	pub value: Vec<u8>,
}

impl TlvRecord {
	/// Creates a new record from a type and its raw value.
	pub fn new(record_type: u64, value: Vec<u8>) -> Self {
		TlvRecord { record_type, value }
	}
}

impl Writeable for TlvRecord {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		BigSize(self.record_type).write(w)?;
		BigSize(self.value.len() as u64).write(w)?;
		w.write_all(&self.value)
	}
}

impl Readable for TlvRecord {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let record_type: BigSize = Readable::read(r)?;
		let len: BigSize = Readable::read(r)?;
		if len.0 > MAX_BUF_SIZE as u64 {
			return Err(DecodeError::BadLengthDescriptor);
		}
		let mut value = vec![0u8; len.0 as usize];
		r.read_exact(&mut value)?;
		Ok(TlvRecord { record_type: record_type.0, value })
	}
}

/// Writes a stream of records. The caller must hand records sorted strictly ascending
/// by type, matching what [`read_tlv_stream`] will accept back.
pub(crate) fn write_tlv_stream<W: Writer>(
	w: &mut W, records: &[TlvRecord],
) -> Result<(), io::Error> {
	debug_assert!(records.windows(2).all(|win| win[0].record_type < win[1].record_type));
	for record in records {
		record.write(w)?;
	}
	Ok(())
}

/// Reads records until the reader is exhausted, enforcing strictly ascending types.
///
/// Unknown types are not an error here: the full set is returned so callers can pull
/// out the fields they understand and preserve the remainder opaquely, keeping records
/// written by future versions intact across a rewrite.
pub(crate) fn read_tlv_stream<R: Read>(r: &mut R) -> Result<Vec<TlvRecord>, DecodeError> {
	let mut records = Vec::new();
	let mut last_type: Option<u64> = None;
	loop {
		// Distinguish a clean end-of-stream from truncation mid-record.
		let record_type = {
			let mut tracking = ReadTrackingReader::new(&mut *r);
			match <BigSize as Readable>::read(&mut tracking) {
				Err(DecodeError::ShortRead) => {
					if !tracking.have_read {
						break;
					}
					return Err(DecodeError::ShortRead);
				},
				Err(e) => return Err(e),
				Ok(t) => t.0,
			}
		};
		match last_type {
			Some(t) if record_type <= t => return Err(DecodeError::InvalidValue),
			_ => {},
		}
		last_type = Some(record_type);

		let len: BigSize = Readable::read(r)?;
		if len.0 > MAX_BUF_SIZE as u64 {
			return Err(DecodeError::BadLengthDescriptor);
		}
		let mut value = vec![0u8; len.0 as usize];
		r.read_exact(&mut value)?;
		records.push(TlvRecord { record_type, value });
	}
	Ok(records)
}

/// Removes and returns the record of the given type from a decoded stream, if present.
pub(crate) fn take_record(records: &mut Vec<TlvRecord>, record_type: u64) -> Option<Vec<u8>> {
	records
		.iter()
		.position(|r| r.record_type == record_type)
		.map(|idx| records.remove(idx).value)
}
