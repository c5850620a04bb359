// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The durable payment lifecycle: creation, attempt registration, settlement and
//! failure, all written through the [`KVStore`] so that a restart can reconstruct
//! every payment and its outstanding HTLCs exactly.
//!
//! Write ordering is the core safety property here. An attempt is registered before
//! its HTLC is dispatched, and a settlement writes the payment outcome and the
//! preimage witness in one transaction, so no crash can leave an HTLC the store does
//! not know about or a settled payment whose preimage is lost.

use crate::ln::payments::{
	AttemptOutcome, Payment, PaymentAttempt, PaymentAttemptInfo, PaymentCreationInfo,
	PaymentFailureReason, PaymentStatus,
};
use crate::ln::witness_cache::{put_witness_in_bucket, WitnessClass};
use crate::routing::mission_control::AttemptFailure;
use crate::types::{PaymentHash, PaymentPreimage};
use crate::util::logger::{Logger, WithContext};
use crate::util::persist::{Bucket, KVStore};
use crate::util::ser::{DecodeError, Readable, Writeable};

use core::fmt;
use core::ops::Deref;

const PAYMENTS_BUCKET: &[u8] = b"payments";
const CREATION_INFO_KEY: &[u8] = b"creation-info";
const STATUS_KEY: &[u8] = b"status";
const FAILURE_REASON_KEY: &[u8] = b"failure-reason";
const ATTEMPTS_BUCKET: &[u8] = b"attempts";

/// Errors returned by [`PaymentStore`] operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStoreError {
	/// A payment under this hash already exists and has not failed.
	PaymentExists,
	/// No payment exists under this hash.
	PaymentNotFound,
	/// The payment has reached a terminal status and accepts no new attempts.
	PaymentTerminal,
	/// No attempt with the given id exists under this payment.
	AttemptNotFound,
	/// The attempt already settled; its recorded preimage cannot be overwritten.
	AttemptSettled,
	/// The attempt id does not exceed every previously registered id.
	StaleAttemptId,
	/// The preimage offered for settlement does not hash to the payment hash.
	PreimageMismatch,
	/// A stored record failed to decode.
	Decode(DecodeError),
}

impl fmt::Display for PaymentStoreError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			PaymentStoreError::PaymentExists => f.write_str("payment already exists"),
			PaymentStoreError::PaymentNotFound => f.write_str("payment not found"),
			PaymentStoreError::PaymentTerminal => {
				f.write_str("payment has reached a terminal status")
			},
			PaymentStoreError::AttemptNotFound => f.write_str("payment attempt not found"),
			PaymentStoreError::AttemptSettled => {
				f.write_str("attempt already settled with a preimage")
			},
			PaymentStoreError::StaleAttemptId => {
				f.write_str("attempt id does not exceed previous attempts")
			},
			PaymentStoreError::PreimageMismatch => {
				f.write_str("preimage does not match payment hash")
			},
			PaymentStoreError::Decode(ref e) => write!(f, "stored payment corrupt: {}", e),
		}
	}
}

impl std::error::Error for PaymentStoreError {}

impl From<DecodeError> for PaymentStoreError {
	fn from(e: DecodeError) -> Self {
		PaymentStoreError::Decode(e)
	}
}

/// The durable store of payments and their attempts.
pub struct PaymentStore<K: Deref, L: Deref>
where
	K::Target: KVStore,
	L::Target: Logger,
{
	store: K,
	logger: L,
}

fn payment_bucket<'a>(
	root: &'a Bucket, hash: &PaymentHash,
) -> Result<&'a Bucket, PaymentStoreError> {
	root.bucket(PAYMENTS_BUCKET)
		.and_then(|payments| payments.bucket(&hash.0))
		.ok_or(PaymentStoreError::PaymentNotFound)
}

fn payment_bucket_mut<'a>(
	root: &'a mut Bucket, hash: &PaymentHash,
) -> Result<&'a mut Bucket, PaymentStoreError> {
	// Existence must be checked up front as bucket_mut creates on access.
	payment_bucket(root, hash)?;
	Ok(root.bucket_mut(PAYMENTS_BUCKET).bucket_mut(&hash.0))
}

fn read_status(payment: &Bucket) -> Result<PaymentStatus, PaymentStoreError> {
	let status = payment.get(STATUS_KEY).ok_or(PaymentStoreError::Decode(
		DecodeError::UnknownRequiredField,
	))?;
	if status.len() != 1 {
		return Err(PaymentStoreError::Decode(DecodeError::InvalidValue));
	}
	Ok(PaymentStatus::from_code(status[0])?)
}

fn read_payment(payment: &Bucket) -> Result<Payment, PaymentStoreError> {
	let info_bytes = payment.get(CREATION_INFO_KEY).ok_or(PaymentStoreError::Decode(
		DecodeError::UnknownRequiredField,
	))?;
	let creation_info: PaymentCreationInfo = Readable::read(&mut &info_bytes[..])?;
	let status = read_status(payment)?;
	let failure_reason = match payment.get(FAILURE_REASON_KEY) {
		Some(bytes) if bytes.len() == 1 => Some(PaymentFailureReason::from_code(bytes[0])?),
		Some(_) => return Err(PaymentStoreError::Decode(DecodeError::InvalidValue)),
		None => None,
	};
	let mut attempts = Vec::new();
	if let Some(bucket) = payment.bucket(ATTEMPTS_BUCKET) {
		// Keys are big-endian attempt ids, so iteration order is id order.
		for (_, bytes) in bucket.iter() {
			attempts.push(<PaymentAttempt as Readable>::read(&mut &bytes[..])?);
		}
	}
	Ok(Payment { creation_info, attempts, status, failure_reason })
}

impl<K: Deref, L: Deref> PaymentStore<K, L>
where
	K::Target: KVStore,
	L::Target: Logger,
{
	/// Creates a store over the given backing store.
	pub fn new(store: K, logger: L) -> Self {
		PaymentStore { store, logger }
	}

	/// Registers a new payment under its hash, in status
	/// [`PaymentStatus::InFlight`].
	///
	/// A previous payment under the same hash is only overwritten if it failed;
	/// an in-flight or settled payment makes the hash unavailable.
	pub fn create_payment(&self, info: &PaymentCreationInfo) -> Result<(), PaymentStoreError> {
		let hash = info.payment_hash;
		self.store.update(|root| {
			if let Ok(existing) = payment_bucket(root, &hash) {
				match read_status(existing)? {
					PaymentStatus::InFlight | PaymentStatus::Succeeded => {
						return Err(PaymentStoreError::PaymentExists)
					},
					// A failed payment may be retried from scratch. Its attempt
					// history belongs to the failed incarnation and is dropped.
					PaymentStatus::Failed => {
						root.bucket_mut(PAYMENTS_BUCKET).delete_bucket(&hash.0)
					},
				}
			}
			let payment = root.bucket_mut(PAYMENTS_BUCKET).bucket_mut(&hash.0);
			payment.put(CREATION_INFO_KEY, info.encode());
			payment.put(STATUS_KEY, vec![PaymentStatus::InFlight.to_code()]);
			Ok(())
		})?;
		let logger = WithContext::from(&*self.logger, Some(hash));
		log_info!(logger, "Created payment of {} msat", info.value_msat);
		Ok(())
	}

	/// Durably records an attempt before its HTLC is dispatched.
	///
	/// The attempt id must strictly exceed every id previously registered under this
	/// payment, so a resumed payment can never reuse one.
	pub fn register_attempt(
		&self, hash: &PaymentHash, info: &PaymentAttemptInfo,
	) -> Result<(), PaymentStoreError> {
		self.store.update(|root| {
			let payment = payment_bucket_mut(root, hash)?;
			if read_status(payment)?.is_terminal() {
				return Err(PaymentStoreError::PaymentTerminal);
			}
			if let Some(attempts) = payment.bucket(ATTEMPTS_BUCKET) {
				if let Some((max_key, _)) = attempts.iter().last() {
					let mut id_bytes = [0u8; 8];
					if max_key.len() != 8 {
						return Err(PaymentStoreError::Decode(DecodeError::InvalidValue));
					}
					id_bytes.copy_from_slice(max_key);
					if info.attempt_id <= u64::from_be_bytes(id_bytes) {
						return Err(PaymentStoreError::StaleAttemptId);
					}
				}
			}
			let attempt = PaymentAttempt {
				info: info.clone(),
				outcome: None,
				unknown_records: Vec::new(),
			};
			payment
				.bucket_mut(ATTEMPTS_BUCKET)
				.put(&info.attempt_id.to_be_bytes(), attempt.encode());
			Ok(())
		})?;
		let logger = WithContext::from(&*self.logger, Some(*hash));
		log_debug!(logger, "Registered attempt {}", info.attempt_id);
		Ok(())
	}

	/// Marks an attempt settled with `preimage`, moving the payment to
	/// [`PaymentStatus::Succeeded`] and storing the preimage in the witness cache,
	/// all in one transaction.
	///
	/// The preimage is verified against the payment hash before anything is written.
	pub fn settle_attempt(
		&self, hash: &PaymentHash, attempt_id: u64, preimage: PaymentPreimage,
	) -> Result<Payment, PaymentStoreError> {
		if PaymentHash::from(preimage) != *hash {
			return Err(PaymentStoreError::PreimageMismatch);
		}
		let payment = self.store.update(|root| {
			{
				let payment = payment_bucket_mut(root, hash)?;
				let attempt = update_attempt(payment, attempt_id, |attempt| {
					attempt.outcome = Some(AttemptOutcome::Settled(preimage));
				})?;
				debug_assert_eq!(attempt.info.attempt_id, attempt_id);
				payment.put(STATUS_KEY, vec![PaymentStatus::Succeeded.to_code()]);
			}
			put_witness_in_bucket(root, WitnessClass::Sha256Preimage, &hash.0, &preimage.0);
			read_payment(payment_bucket(root, hash)?)
		})?;
		let logger = WithContext::from(&*self.logger, Some(*hash));
		log_info!(logger, "Payment settled by attempt {}", attempt_id);
		Ok(payment)
	}

	/// Records the failure of a single attempt. The payment itself stays in flight;
	/// use [`PaymentStore::fail_payment`] to give up on it entirely.
	pub fn fail_attempt(
		&self, hash: &PaymentHash, attempt_id: u64, failure: AttemptFailure,
	) -> Result<(), PaymentStoreError> {
		self.store.update(|root| {
			let payment = payment_bucket_mut(root, hash)?;
			update_attempt(payment, attempt_id, |attempt| {
				attempt.outcome = Some(AttemptOutcome::Failed(failure));
			})
			.map(|_| ())
		})?;
		let logger = WithContext::from(&*self.logger, Some(*hash));
		log_debug!(logger, "Attempt {} failed: {:?}", attempt_id, failure);
		Ok(())
	}

	/// Moves the payment to [`PaymentStatus::Failed`], recording why. A settled
	/// payment cannot be failed.
	pub fn fail_payment(
		&self, hash: &PaymentHash, reason: PaymentFailureReason,
	) -> Result<(), PaymentStoreError> {
		self.store.update(|root| {
			let payment = payment_bucket_mut(root, hash)?;
			if read_status(payment)? == PaymentStatus::Succeeded {
				return Err(PaymentStoreError::PaymentTerminal);
			}
			payment.put(STATUS_KEY, vec![PaymentStatus::Failed.to_code()]);
			payment.put(FAILURE_REASON_KEY, vec![reason.to_code()]);
			Ok(())
		})?;
		let logger = WithContext::from(&*self.logger, Some(*hash));
		log_info!(logger, "Payment failed: {:?}", reason);
		Ok(())
	}

	/// Fetches a payment in full.
	pub fn fetch_payment(&self, hash: &PaymentHash) -> Result<Payment, PaymentStoreError> {
		self.store.view(|root| read_payment(payment_bucket(root, hash)?))
	}

	/// Fetches every payment still in [`PaymentStatus::InFlight`], for resumption at
	/// startup.
	pub fn fetch_in_flight_payments(&self) -> Result<Vec<Payment>, PaymentStoreError> {
		self.store.view(|root| {
			let mut in_flight = Vec::new();
			if let Some(payments) = root.bucket(PAYMENTS_BUCKET) {
				for (_, payment) in payments.buckets() {
					if read_status(payment)? == PaymentStatus::InFlight {
						in_flight.push(read_payment(payment)?);
					}
				}
			}
			Ok(in_flight)
		})
	}
}

/// Decodes the attempt, applies `f` and writes it back, returning the updated value.
///
/// A settled outcome is final: once an attempt carries a preimage, no update may
/// replace it.
fn update_attempt<F: FnOnce(&mut PaymentAttempt)>(
	payment: &mut Bucket, attempt_id: u64, f: F,
) -> Result<PaymentAttempt, PaymentStoreError> {
	let key = attempt_id.to_be_bytes();
	let bytes = payment
		.bucket(ATTEMPTS_BUCKET)
		.and_then(|attempts| attempts.get(&key))
		.ok_or(PaymentStoreError::AttemptNotFound)?;
	let mut attempt: PaymentAttempt = Readable::read(&mut &bytes[..])?;
	let prior_outcome = attempt.outcome;
	f(&mut attempt);
	if matches!(prior_outcome, Some(AttemptOutcome::Settled(_)))
		&& attempt.outcome != prior_outcome
	{
		return Err(PaymentStoreError::AttemptSettled);
	}
	payment.bucket_mut(ATTEMPTS_BUCKET).put(&key, attempt.encode());
	Ok(attempt)
}
