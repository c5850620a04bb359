// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The durable payment and attempt records, with their TLV wire encodings.
//!
//! Records decode every field they understand and hold on to the rest as opaque
//! [`TlvRecord`]s, re-emitting them in type order on write. A record written by a newer
//! version thus survives being read and rewritten by this one.

use crate::routing::mission_control::AttemptFailure;
use crate::routing::route::Route;
use crate::types::{PaymentHash, PaymentPreimage};
use crate::util::ser::{
	read_tlv_stream, take_record, write_tlv_stream, DecodeError, Readable, TlvRecord, VecWriter,
	Writeable, Writer,
};

use bitcoin::secp256k1::SecretKey;

use std::io::{self, Read};

/// The immutable facts about a payment, fixed at creation and never rewritten.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentCreationInfo {
	/// The hash all of this payment's HTLCs are locked to.
	pub payment_hash: PaymentHash,
	/// The amount the destination is to receive, in millisatoshis.
	pub value_msat: u64,
	/// When the payment was initiated, in seconds since the Unix epoch.
	pub creation_time: u64,
	/// The raw invoice the payment pays, if any, kept for display purposes.
	pub payment_request: Vec<u8>,
	/// Records of unknown type carried through from a newer writer, sorted strictly
	/// ascending by type.
	pub unknown_records: Vec<TlvRecord>,
}

const CREATION_HASH_TYPE: u64 = 0;
const CREATION_VALUE_TYPE: u64 = 2;
const CREATION_TIME_TYPE: u64 = 4;
const CREATION_REQUEST_TYPE: u64 = 6;

fn u64_from_record(value: Vec<u8>) -> Result<u64, DecodeError> {
	let bytes: [u8; 8] = value.try_into().map_err(|_| DecodeError::InvalidValue)?;
	Ok(u64::from_be_bytes(bytes))
}

fn fixed_from_record<const N: usize>(value: Vec<u8>) -> Result<[u8; N], DecodeError> {
	value.try_into().map_err(|_| DecodeError::InvalidValue)
}

/// Merges known records into the unknowns and writes the combined stream in type
/// order. Known and unknown types never collide since decoding strips the knowns.
fn write_merged_stream<W: Writer>(
	w: &mut W, mut known: Vec<TlvRecord>, unknown: &[TlvRecord],
) -> Result<(), io::Error> {
	known.extend_from_slice(unknown);
	known.sort_by_key(|record| record.record_type);
	write_tlv_stream(w, &known)
}

impl Writeable for PaymentCreationInfo {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		let known = vec![
			TlvRecord::new(CREATION_HASH_TYPE, self.payment_hash.encode()),
			TlvRecord::new(CREATION_VALUE_TYPE, self.value_msat.encode()),
			TlvRecord::new(CREATION_TIME_TYPE, self.creation_time.encode()),
			TlvRecord::new(CREATION_REQUEST_TYPE, self.payment_request.clone()),
		];
		write_merged_stream(w, known, &self.unknown_records)
	}
}

impl Readable for PaymentCreationInfo {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let mut records = read_tlv_stream(r)?;
		let payment_hash = PaymentHash(fixed_from_record(
			take_record(&mut records, CREATION_HASH_TYPE)
				.ok_or(DecodeError::UnknownRequiredField)?,
		)?);
		let value_msat = u64_from_record(
			take_record(&mut records, CREATION_VALUE_TYPE)
				.ok_or(DecodeError::UnknownRequiredField)?,
		)?;
		let creation_time = u64_from_record(
			take_record(&mut records, CREATION_TIME_TYPE)
				.ok_or(DecodeError::UnknownRequiredField)?,
		)?;
		let payment_request =
			take_record(&mut records, CREATION_REQUEST_TYPE).unwrap_or_default();
		Ok(PaymentCreationInfo {
			payment_hash,
			value_msat,
			creation_time,
			payment_request,
			unknown_records: records,
		})
	}
}

/// Everything needed to dispatch (or re-dispatch) one HTLC attempt, written before the
/// attempt goes out so a crash can never leave an untracked HTLC in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentAttemptInfo {
	/// The attempt's id, strictly increasing within a payment.
	pub attempt_id: u64,
	/// The ephemeral key the attempt's onion was built with.
	pub session_key: SecretKey,
	/// The route the attempt was sent over.
	pub route: Route,
	/// Records of unknown type carried through from a newer writer, sorted strictly
	/// ascending by type.
	pub unknown_records: Vec<TlvRecord>,
}

const ATTEMPT_ID_TYPE: u64 = 0;
const ATTEMPT_SESSION_KEY_TYPE: u64 = 2;
const ATTEMPT_ROUTE_TYPE: u64 = 4;

impl Writeable for PaymentAttemptInfo {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		let known = vec![
			TlvRecord::new(ATTEMPT_ID_TYPE, self.attempt_id.encode()),
			TlvRecord::new(ATTEMPT_SESSION_KEY_TYPE, self.session_key.encode()),
			TlvRecord::new(ATTEMPT_ROUTE_TYPE, self.route.encode()),
		];
		write_merged_stream(w, known, &self.unknown_records)
	}
}

impl Readable for PaymentAttemptInfo {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let mut records = read_tlv_stream(r)?;
		let attempt_id = u64_from_record(
			take_record(&mut records, ATTEMPT_ID_TYPE).ok_or(DecodeError::UnknownRequiredField)?,
		)?;
		let key_bytes: [u8; 32] = fixed_from_record(
			take_record(&mut records, ATTEMPT_SESSION_KEY_TYPE)
				.ok_or(DecodeError::UnknownRequiredField)?,
		)?;
		let session_key =
			SecretKey::from_slice(&key_bytes).map_err(|_| DecodeError::InvalidValue)?;
		let route_bytes = take_record(&mut records, ATTEMPT_ROUTE_TYPE)
			.ok_or(DecodeError::UnknownRequiredField)?;
		let mut route_reader = &route_bytes[..];
		let route: Route = Readable::read(&mut route_reader)?;
		if !route_reader.is_empty() {
			return Err(DecodeError::InvalidValue);
		}
		Ok(PaymentAttemptInfo { attempt_id, session_key, route, unknown_records: records })
	}
}

/// Where a payment stands in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
	/// Created, with attempts possibly outstanding. The only state accepting new
	/// attempts.
	InFlight,
	/// Settled with a preimage. Terminal.
	Succeeded,
	/// Abandoned without a settlement. Terminal.
	Failed,
}

impl PaymentStatus {
	/// Whether no further state transitions are possible.
	pub fn is_terminal(self) -> bool {
		!matches!(self, PaymentStatus::InFlight)
	}

	pub(crate) fn to_code(self) -> u8 {
		match self {
			PaymentStatus::InFlight => 1,
			PaymentStatus::Succeeded => 2,
			PaymentStatus::Failed => 3,
		}
	}

	pub(crate) fn from_code(code: u8) -> Result<Self, DecodeError> {
		match code {
			1 => Ok(PaymentStatus::InFlight),
			2 => Ok(PaymentStatus::Succeeded),
			3 => Ok(PaymentStatus::Failed),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

/// Why a payment as a whole was abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentFailureReason {
	/// The payment's deadline passed before any attempt settled.
	Timeout,
	/// The session could produce no further candidate routes.
	NoRouteFound,
	/// An unrecoverable error occurred dispatching attempts.
	Error,
	/// The destination rejected the payment.
	IncorrectPaymentDetails,
}

impl PaymentFailureReason {
	pub(crate) fn to_code(self) -> u8 {
		match self {
			PaymentFailureReason::Timeout => 0,
			PaymentFailureReason::NoRouteFound => 1,
			PaymentFailureReason::Error => 2,
			PaymentFailureReason::IncorrectPaymentDetails => 3,
		}
	}

	pub(crate) fn from_code(code: u8) -> Result<Self, DecodeError> {
		match code {
			0 => Ok(PaymentFailureReason::Timeout),
			1 => Ok(PaymentFailureReason::NoRouteFound),
			2 => Ok(PaymentFailureReason::Error),
			3 => Ok(PaymentFailureReason::IncorrectPaymentDetails),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

/// How one attempt concluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
	/// The destination settled the attempt, revealing the preimage.
	Settled(PaymentPreimage),
	/// The attempt failed along the path.
	Failed(AttemptFailure),
}

/// One attempt and, once known, its outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentAttempt {
	/// The dispatch record written before the attempt went out.
	pub info: PaymentAttemptInfo,
	/// How the attempt concluded, or `None` while still in flight.
	pub outcome: Option<AttemptOutcome>,
	/// Records of unknown type carried through from a newer writer, sorted strictly
	/// ascending by type.
	pub unknown_records: Vec<TlvRecord>,
}

const ATTEMPT_INFO_TYPE: u64 = 0;
const ATTEMPT_PREIMAGE_TYPE: u64 = 1;
const ATTEMPT_FAILURE_TYPE: u64 = 3;

impl PaymentAttempt {
	/// Whether the attempt's HTLC may still be outstanding.
	pub fn is_in_flight(&self) -> bool {
		self.outcome.is_none()
	}
}

impl Writeable for PaymentAttempt {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		let mut info = VecWriter(Vec::new());
		self.info.write(&mut info)?;
		let mut known = vec![TlvRecord::new(ATTEMPT_INFO_TYPE, info.0)];
		match self.outcome {
			Some(AttemptOutcome::Settled(preimage)) => {
				known.push(TlvRecord::new(ATTEMPT_PREIMAGE_TYPE, preimage.encode()));
			},
			Some(AttemptOutcome::Failed(reason)) => {
				known.push(TlvRecord::new(ATTEMPT_FAILURE_TYPE, reason.encode()));
			},
			None => {},
		}
		write_merged_stream(w, known, &self.unknown_records)
	}
}

impl Readable for PaymentAttempt {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let mut records = read_tlv_stream(r)?;
		let info_bytes = take_record(&mut records, ATTEMPT_INFO_TYPE)
			.ok_or(DecodeError::UnknownRequiredField)?;
		let info: PaymentAttemptInfo = Readable::read(&mut &info_bytes[..])?;
		let preimage = take_record(&mut records, ATTEMPT_PREIMAGE_TYPE);
		let failure = take_record(&mut records, ATTEMPT_FAILURE_TYPE);
		let outcome = match (preimage, failure) {
			(Some(_), Some(_)) => return Err(DecodeError::InvalidValue),
			(Some(bytes), None) => {
				Some(AttemptOutcome::Settled(PaymentPreimage(fixed_from_record(bytes)?)))
			},
			(None, Some(bytes)) => {
				let code: [u8; 1] = fixed_from_record(bytes)?;
				Some(AttemptOutcome::Failed(AttemptFailure::from_code(code[0])?))
			},
			(None, None) => None,
		};
		Ok(PaymentAttempt { info, outcome, unknown_records: records })
	}
}

/// A payment in full: its creation record, every attempt made, and where it stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payment {
	/// The immutable creation record.
	pub creation_info: PaymentCreationInfo,
	/// All attempts made, ordered by attempt id.
	pub attempts: Vec<PaymentAttempt>,
	/// The payment's lifecycle state.
	pub status: PaymentStatus,
	/// Why the payment failed, present only when `status` is
	/// [`PaymentStatus::Failed`].
	pub failure_reason: Option<PaymentFailureReason>,
}

impl Payment {
	/// The preimage which settled the payment, if any attempt settled.
	pub fn settle_preimage(&self) -> Option<PaymentPreimage> {
		self.attempts.iter().find_map(|attempt| match attempt.outcome {
			Some(AttemptOutcome::Settled(preimage)) => Some(preimage),
			_ => None,
		})
	}

	/// Whether any attempt's HTLC may still be outstanding.
	pub fn has_in_flight_attempts(&self) -> bool {
		self.attempts.iter().any(PaymentAttempt::is_in_flight)
	}
}
