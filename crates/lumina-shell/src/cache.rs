//! Named response caches shared by every worker generation.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use crate::response::FetchResponse;

/// One cache: responses keyed by path plus query.
pub type Cache = BTreeMap<String, FetchResponse>;

/// All caches of one origin, keyed by name.
///
/// Cloning is cheap and every clone sees the same caches.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
  caches: Arc<RwLock<BTreeMap<String, Cache>>>,
}

impl CacheStorage {
  pub fn new() -> Self { Self::default() }

  /// Cache names in sorted order.
  pub fn keys(&self) -> Vec<String> { self.caches.read().keys().cloned().collect() }

  pub fn has(&self, name: &str) -> bool { self.caches.read().contains_key(name) }

  /// Create the cache if it does not exist yet.
  pub fn open(&self, name: &str) {
    self.caches.write().entry(name.to_owned()).or_default();
  }

  /// Returns whether a cache was removed.
  pub fn delete(&self, name: &str) -> bool {
    self.caches.write().remove(name).is_some()
  }

  pub fn lookup(&self, name: &str, key: &str) -> Option<FetchResponse> {
    self.caches.read().get(name)?.get(key).cloned()
  }

  pub fn put(&self, name: &str, key: &str, response: FetchResponse) {
    self
      .caches
      .write()
      .entry(name.to_owned())
      .or_default()
      .insert(key.to_owned(), response);
  }

  /// Store every entry at once, creating the cache if needed.
  pub fn put_all(
    &self,
    name: &str,
    entries: impl IntoIterator<Item = (String, FetchResponse)>,
  ) {
    self
      .caches
      .write()
      .entry(name.to_owned())
      .or_default()
      .extend(entries);
  }

  /// Number of entries in the named cache.
  pub fn len(&self, name: &str) -> Option<usize> {
    self.caches.read().get(name).map(BTreeMap::len)
  }
}
