// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Core payment identifier types shared by the routing and storage halves of the crate.

use crate::util::ser::{DecodeError, Readable, Writeable, Writer};

use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;

use core::fmt;
use std::io::{self, Read};

/// The payment hash which an HTLC is locked to. Equal to the SHA-256 of the
/// [`PaymentPreimage`] which settles it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaymentHash(pub [u8; 32]);

impl fmt::Display for PaymentHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for byte in self.0.iter() {
			write!(f, "{:02x}", byte)?;
		}
		Ok(())
	}
}

impl fmt::Debug for PaymentHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "PaymentHash({})", self)
	}
}

/// The secret which, when revealed, settles an HTLC locked to its SHA-256 image.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaymentPreimage(pub [u8; 32]);

impl fmt::Display for PaymentPreimage {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for byte in self.0.iter() {
			write!(f, "{:02x}", byte)?;
		}
		Ok(())
	}
}

impl fmt::Debug for PaymentPreimage {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "PaymentPreimage(..)")
	}
}

impl From<PaymentPreimage> for PaymentHash {
	fn from(preimage: PaymentPreimage) -> Self {
		PaymentHash(Sha256::hash(&preimage.0).to_byte_array())
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

impl Writeable for PaymentPreimage {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.0.write(w)
	}
}

impl Readable for PaymentPreimage {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 32] = Readable::read(r)?;
		Ok(PaymentPreimage(buf))
	}
}
