// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A durable cache of the witnesses which settle incoming HTLCs, so a node restarting
//! with HTLCs outstanding can still claim them.
//!
//! Witnesses are grouped by class; each class defines how a witness maps to the lookup
//! key it is stored under. Today the only class is SHA-256 preimages keyed by their
//! hash, but the on-disk layout namespaces every class separately so further ones can
//! be added without migration.

use crate::types::{PaymentHash, PaymentPreimage};
use crate::util::logger::Logger;
use crate::util::persist::{Bucket, KVStore};

use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;

use core::fmt;
use core::ops::Deref;

const WITNESS_CACHE_BUCKET: &[u8] = b"witness-cache";

/// The class of a stored witness, fixing both its interpretation and how its lookup
/// key is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WitnessClass {
	/// A 32-byte preimage, stored under its SHA-256 hash.
	Sha256Preimage,
}

impl WitnessClass {
	pub(crate) fn to_code(self) -> u8 {
		match self {
			WitnessClass::Sha256Preimage => 1,
		}
	}

	/// Maps a stored class byte back to a known class, rejecting codes written by no
	/// known version.
	pub fn from_code(code: u8) -> Result<Self, WitnessCacheError> {
		match code {
			1 => Ok(WitnessClass::Sha256Preimage),
			_ => Err(WitnessCacheError::UnknownWitnessType),
		}
	}

	fn bucket_key(self) -> [u8; 1] {
		[self.to_code()]
	}

	/// Derives the lookup key a witness of this class is stored under.
	fn derive_key(self, witness: &[u8]) -> Result<Vec<u8>, WitnessCacheError> {
		match self {
			WitnessClass::Sha256Preimage => {
				if witness.len() != 32 {
					return Err(WitnessCacheError::CorruptWitness);
				}
				Ok(Sha256::hash(witness).to_byte_array().to_vec())
			},
		}
	}
}

/// Errors returned by witness cache operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WitnessCacheError {
	/// A class byte did not map to any known witness class.
	UnknownWitnessType,
	/// No witness is stored under the queried key.
	NoWitnesses,
	/// A stored witness did not have the shape its class requires.
	CorruptWitness,
}

impl fmt::Display for WitnessCacheError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			WitnessCacheError::UnknownWitnessType => f.write_str("unknown witness type"),
			WitnessCacheError::NoWitnesses => f.write_str("no witnesses stored under key"),
			WitnessCacheError::CorruptWitness => f.write_str("stored witness is malformed"),
		}
	}
}

impl std::error::Error for WitnessCacheError {}

/// Stores the witness in the class's bucket under `key`, creating buckets as needed.
/// Exposed within the crate so settling a payment can write its preimage in the same
/// transaction as the payment outcome.
pub(crate) fn put_witness_in_bucket(
	root: &mut Bucket, class: WitnessClass, key: &[u8], witness: &[u8],
) {
	root.bucket_mut(WITNESS_CACHE_BUCKET)
		.bucket_mut(&class.bucket_key())
		.put(key, witness.to_vec());
}

/// The durable witness cache.
pub struct WitnessCache<K: Deref, L: Deref>
where
	K::Target: KVStore,
	L::Target: Logger,
{
	store: K,
	logger: L,
}

impl<K: Deref, L: Deref> WitnessCache<K, L>
where
	K::Target: KVStore,
	L::Target: Logger,
{
	/// Creates a cache over the given store.
	pub fn new(store: K, logger: L) -> Self {
		WitnessCache { store, logger }
	}

	/// Stores a batch of witnesses of the given class in one transaction, each under
	/// the key its class derives from it. Nothing is stored if any witness is
	/// malformed.
	pub fn add_witnesses(
		&self, class: WitnessClass, witnesses: &[Vec<u8>],
	) -> Result<(), WitnessCacheError> {
		let mut keyed = Vec::with_capacity(witnesses.len());
		for witness in witnesses {
			keyed.push((class.derive_key(witness)?, witness));
		}
		self.store.update(|root| {
			for (key, witness) in keyed.iter() {
				put_witness_in_bucket(root, class, key, witness);
			}
			Ok::<_, WitnessCacheError>(())
		})?;
		log_trace!(
			self.logger,
			"Stored {} witnesses of class {:?}",
			witnesses.len(),
			class
		);
		Ok(())
	}

	/// Fetches the witness of the given class stored under `key`.
	pub fn lookup_witness(
		&self, class: WitnessClass, key: &[u8],
	) -> Result<Vec<u8>, WitnessCacheError> {
		self.store.view(|root| {
			root.bucket(WITNESS_CACHE_BUCKET)
				.and_then(|cache| cache.bucket(&class.bucket_key()))
				.and_then(|bucket| bucket.get(key))
				.map(|witness| witness.to_vec())
				.ok_or(WitnessCacheError::NoWitnesses)
		})
	}

	/// Removes the witness of the given class stored under `key`. Removing an absent
	/// witness is a no-op.
	pub fn delete_witness(
		&self, class: WitnessClass, key: &[u8],
	) -> Result<(), WitnessCacheError> {
		self.store.update(|root| {
			if let Some(cache) = root.bucket(WITNESS_CACHE_BUCKET) {
				if cache.bucket(&class.bucket_key()).is_some() {
					root.bucket_mut(WITNESS_CACHE_BUCKET)
						.bucket_mut(&class.bucket_key())
						.delete(key);
				}
			}
			Ok::<_, WitnessCacheError>(())
		})?;
		log_trace!(
			self.logger,
			"Deleted witness of class {:?} under key {}",
			class,
			log_bytes!(key)
		);
		Ok(())
	}

	/// Stores a batch of preimages, each under its SHA-256 hash, in one transaction.
	pub fn add_sha256_witnesses(
		&self, preimages: &[PaymentPreimage],
	) -> Result<(), WitnessCacheError> {
		let witnesses: Vec<Vec<u8>> =
			preimages.iter().map(|preimage| preimage.0.to_vec()).collect();
		self.add_witnesses(WitnessClass::Sha256Preimage, &witnesses)
	}

	/// Fetches the preimage stored under the given payment hash.
	pub fn lookup_sha256_witness(
		&self, hash: &PaymentHash,
	) -> Result<PaymentPreimage, WitnessCacheError> {
		let witness = self.lookup_witness(WitnessClass::Sha256Preimage, &hash.0)?;
		let bytes: [u8; 32] =
			witness.try_into().map_err(|_| WitnessCacheError::CorruptWitness)?;
		Ok(PaymentPreimage(bytes))
	}

	/// Removes the preimage stored under the given payment hash. Removing an absent
	/// witness is a no-op.
	pub fn delete_sha256_witness(&self, hash: &PaymentHash) -> Result<(), WitnessCacheError> {
		self.delete_witness(WitnessClass::Sha256Preimage, &hash.0)
	}

	/// Removes every witness of the given class.
	pub fn delete_witness_class(&self, class: WitnessClass) -> Result<(), WitnessCacheError> {
		self.store.update(|root| {
			if root.bucket(WITNESS_CACHE_BUCKET).is_some() {
				root.bucket_mut(WITNESS_CACHE_BUCKET).delete_bucket(&class.bucket_key());
			}
			Ok::<_, WitnessCacheError>(())
		})?;
		log_debug!(self.logger, "Deleted all witnesses of class {:?}", class);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::util::persist::MemoryStore;
	use crate::util::test_utils::TestLogger;

	use std::sync::Arc;

	fn cache() -> WitnessCache<Arc<MemoryStore>, Arc<TestLogger>> {
		WitnessCache::new(Arc::new(MemoryStore::new()), Arc::new(TestLogger::new()))
	}

	#[test]
	fn add_and_lookup_witness() {
		let cache = cache();
		let preimage = PaymentPreimage([42; 32]);
		let hash = PaymentHash::from(preimage);
		cache.add_sha256_witnesses(&[preimage]).unwrap();
		assert_eq!(cache.lookup_sha256_witness(&hash), Ok(preimage));
	}

	#[test]
	fn lookup_missing_witness() {
		let cache = cache();
		assert_eq!(
			cache.lookup_sha256_witness(&PaymentHash([1; 32])),
			Err(WitnessCacheError::NoWitnesses)
		);
	}

	#[test]
	fn delete_witness() {
		let cache = cache();
		let preimage = PaymentPreimage([42; 32]);
		let hash = PaymentHash::from(preimage);
		cache.add_sha256_witnesses(&[preimage]).unwrap();
		cache.delete_sha256_witness(&hash).unwrap();
		assert_eq!(
			cache.lookup_sha256_witness(&hash),
			Err(WitnessCacheError::NoWitnesses)
		);
		// Deleting again is a no-op.
		cache.delete_sha256_witness(&hash).unwrap();
	}

	#[test]
	fn delete_class_removes_all() {
		let cache = cache();
		let preimages = [PaymentPreimage([1; 32]), PaymentPreimage([2; 32])];
		cache.add_sha256_witnesses(&preimages).unwrap();
		cache.delete_witness_class(WitnessClass::Sha256Preimage).unwrap();
		for preimage in preimages {
			assert_eq!(
				cache.lookup_sha256_witness(&PaymentHash::from(preimage)),
				Err(WitnessCacheError::NoWitnesses)
			);
		}
	}

	#[test]
	fn batch_add_is_atomic_and_complete() {
		let cache = cache();
		let preimages: Vec<PaymentPreimage> =
			(0u8..10).map(|i| PaymentPreimage([i; 32])).collect();
		cache.add_sha256_witnesses(&preimages).unwrap();
		for preimage in preimages {
			assert_eq!(
				cache.lookup_sha256_witness(&PaymentHash::from(preimage)),
				Ok(preimage)
			);
		}
	}

	#[test]
	fn generic_and_sha256_paths_are_interchangeable() {
		let cache = cache();
		let preimage = PaymentPreimage([42; 32]);
		let hash = PaymentHash::from(preimage);
		cache
			.add_witnesses(WitnessClass::Sha256Preimage, &[preimage.0.to_vec()])
			.unwrap();
		assert_eq!(cache.lookup_sha256_witness(&hash), Ok(preimage));
		assert_eq!(
			cache.lookup_witness(WitnessClass::Sha256Preimage, &hash.0),
			Ok(preimage.0.to_vec())
		);
		cache.delete_witness(WitnessClass::Sha256Preimage, &hash.0).unwrap();
		assert_eq!(
			cache.lookup_sha256_witness(&hash),
			Err(WitnessCacheError::NoWitnesses)
		);
	}

	#[test]
	fn malformed_witness_stores_nothing() {
		let cache = cache();
		let good = PaymentPreimage([1; 32]);
		assert_eq!(
			cache.add_witnesses(
				WitnessClass::Sha256Preimage,
				&[good.0.to_vec(), vec![0; 31]],
			),
			Err(WitnessCacheError::CorruptWitness)
		);
		// The batch was rejected as a whole.
		assert_eq!(
			cache.lookup_sha256_witness(&PaymentHash::from(good)),
			Err(WitnessCacheError::NoWitnesses)
		);
	}

	#[test]
	fn unknown_class_code_rejected() {
		assert_eq!(WitnessClass::from_code(1), Ok(WitnessClass::Sha256Preimage));
		assert_eq!(WitnessClass::from_code(0), Err(WitnessCacheError::UnknownWitnessType));
		assert_eq!(
			WitnessClass::from_code(200),
			Err(WitnessCacheError::UnknownWitnessType)
		);
	}
}
