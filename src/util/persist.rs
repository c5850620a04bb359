// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The durable key/value store abstraction which payment and witness records are
//! persisted through, plus an in-memory implementation for tests and ephemeral nodes.
//!
//! Storage is a tree of named [`Bucket`]s, each holding ordered key/value pairs and
//! child buckets. All access happens inside closure-scoped transactions: [`KVStore::view`]
//! for reads and [`KVStore::update`] for writes, with an update only taking effect if
//! the closure returns `Ok`.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// A node in the storage tree: a sorted map of values plus a sorted map of child
/// buckets. Key and value bytes are opaque at this layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bucket {
	values: BTreeMap<Vec<u8>, Vec<u8>>,
	children: BTreeMap<Vec<u8>, Bucket>,
}

impl Bucket {
	/// Fetches the value stored under the given key, if any.
	pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
		self.values.get(key).map(|v| &v[..])
	}

	/// Stores a value under the given key, replacing any previous value.
	pub fn put(&mut self, key: &[u8], value: Vec<u8>) {
		self.values.insert(key.to_vec(), value);
	}

	/// Removes the value stored under the given key. Removing an absent key is a no-op.
	pub fn delete(&mut self, key: &[u8]) {
		self.values.remove(key);
	}

	/// Fetches the child bucket with the given name, if it exists.
	pub fn bucket(&self, name: &[u8]) -> Option<&Bucket> {
		self.children.get(name)
	}

	/// Fetches or creates the child bucket with the given name.
	pub fn bucket_mut(&mut self, name: &[u8]) -> &mut Bucket {
		self.children.entry(name.to_vec()).or_default()
	}

	/// Removes the child bucket with the given name and everything beneath it.
	pub fn delete_bucket(&mut self, name: &[u8]) {
		self.children.remove(name);
	}

	/// Iterates the key/value pairs of this bucket in ascending key order.
	pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
		self.values.iter().map(|(k, v)| (&k[..], &v[..]))
	}

	/// Iterates the child buckets of this bucket in ascending name order.
	pub fn buckets(&self) -> impl Iterator<Item = (&[u8], &Bucket)> {
		self.children.iter().map(|(k, v)| (&k[..], v))
	}

	/// Returns true if this bucket holds no values and no children.
	pub fn is_empty(&self) -> bool {
		self.values.is_empty() && self.children.is_empty()
	}
}

/// Provides transactional access to a persisted [`Bucket`] tree.
///
/// Implementations must apply an update atomically: either the whole set of mutations
/// made by the closure becomes visible, or (when the closure returns `Err`) none of it
/// does. Readers must never observe a partially-applied update.
pub trait KVStore {
	/// Runs a read-only transaction against the current state of the store.
	fn view<T, E, F: FnOnce(&Bucket) -> Result<T, E>>(&self, f: F) -> Result<T, E>;

	/// Runs a read-write transaction. Mutations made by the closure are committed only
	/// if it returns `Ok`; on `Err` the store is left exactly as it was.
	fn update<T, E, F: FnOnce(&mut Bucket) -> Result<T, E>>(&self, f: F) -> Result<T, E>;
}

/// An in-memory [`KVStore`] holding the bucket tree behind a [`Mutex`].
///
/// Updates run against a copy of the tree which replaces the live one on commit, so a
/// failed transaction leaves no trace.
#[derive(Default)]
pub struct MemoryStore {
	root: Mutex<Bucket>,
}

impl MemoryStore {
	/// Creates a new, empty store.
	pub fn new() -> Self {
		Self::default()
	}
}

impl KVStore for MemoryStore {
	fn view<T, E, F: FnOnce(&Bucket) -> Result<T, E>>(&self, f: F) -> Result<T, E> {
		let root = self.root.lock().unwrap();
		f(&root)
	}

	fn update<T, E, F: FnOnce(&mut Bucket) -> Result<T, E>>(&self, f: F) -> Result<T, E> {
		let mut root = self.root.lock().unwrap();
		let mut scratch = root.clone();
		let res = f(&mut scratch)?;
		*root = scratch;
		Ok(res)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn update_commits_on_ok() {
		let store = MemoryStore::new();
		store
			.update(|root| {
				root.bucket_mut(b"payments").put(b"key", vec![1, 2, 3]);
				Ok::<_, ()>(())
			})
			.unwrap();
		store
			.view(|root| {
				assert_eq!(root.bucket(b"payments").unwrap().get(b"key"), Some(&[1, 2, 3][..]));
				Ok::<_, ()>(())
			})
			.unwrap();
	}

	#[test]
	fn update_rolls_back_on_err() {
		let store = MemoryStore::new();
		store
			.update(|root| {
				root.put(b"keep", vec![0]);
				Ok::<_, ()>(())
			})
			.unwrap();
		let res: Result<(), &str> = store.update(|root| {
			root.put(b"discard", vec![9]);
			root.delete(b"keep");
			Err("abort")
		});
		assert_eq!(res, Err("abort"));
		store
			.view(|root| {
				assert_eq!(root.get(b"keep"), Some(&[0][..]));
				assert_eq!(root.get(b"discard"), None);
				Ok::<_, ()>(())
			})
			.unwrap();
	}

	#[test]
	fn nested_buckets_and_iteration_order() {
		let store = MemoryStore::new();
		store
			.update(|root| {
				let outer = root.bucket_mut(b"outer");
				outer.bucket_mut(b"b").put(b"2", vec![2]);
				outer.bucket_mut(b"a").put(b"1", vec![1]);
				Ok::<_, ()>(())
			})
			.unwrap();
		store
			.view(|root| {
				let outer = root.bucket(b"outer").unwrap();
				let names: Vec<&[u8]> = outer.buckets().map(|(name, _)| name).collect();
				assert_eq!(names, vec![&b"a"[..], &b"b"[..]]);
				Ok::<_, ()>(())
			})
			.unwrap();
	}

	#[test]
	fn delete_bucket_removes_subtree() {
		let store = MemoryStore::new();
		store
			.update(|root| {
				root.bucket_mut(b"outer").bucket_mut(b"inner").put(b"k", vec![1]);
				root.bucket_mut(b"outer").delete_bucket(b"inner");
				Ok::<_, ()>(())
			})
			.unwrap();
		store
			.view(|root| {
				assert!(root.bucket(b"outer").unwrap().bucket(b"inner").is_none());
				Ok::<_, ()>(())
			})
			.unwrap();
	}
}
