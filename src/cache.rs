use std::cell::{Cell, RefCell};

use bytes::Bytes;
use log::debug;
use lru::LruCache as LruMap;
use thiserror::Error;

use crate::encode::DecodeError;
use crate::store::{Store, StoreError};

/// A value with byte-serialization hooks the cache uses to persist it.
pub trait Cachable: Sized {
    fn to_bytes(&self) -> Vec<u8>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError>;

    /// Serialized size in bytes, without serializing.
    ///
    /// Must equal `to_bytes().len()`.
    fn nbytes(&self) -> usize;
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not decode blob under `{key}`")]
    Decode {
        key: String,
        #[source]
        source: DecodeError,
    },
}

#[derive(Debug)]
struct CacheEntry {
    data: Bytes,
    dirty: bool,
}

/// Byte-budgeted LRU layer in front of a backing [Store].
///
/// Reads fill the cache; writes land dirty and are persisted by
/// [LruCache::maybe_flush] (over-budget eviction, least recent first) or
/// [LruCache::flush] (everything). Consumers hand control back with
/// `maybe_flush` and never evict themselves.
#[derive(Debug)]
pub struct LruCache<S> {
    backing: S,
    size_limit: usize,
    entries: RefCell<LruMap<String, CacheEntry>>,
    nbytes: Cell<usize>,
}

impl<S: Store> LruCache<S> {
    pub fn new(backing: S, size_limit: usize) -> Self {
        Self {
            backing,
            size_limit,
            entries: RefCell::new(LruMap::unbounded()),
            nbytes: Cell::new(0),
        }
    }

    pub fn backing(&self) -> &S {
        &self.backing
    }

    /// Give up the in-memory layer, returning the backing store.
    ///
    /// Unflushed dirty entries are dropped; call [LruCache::flush] first to
    /// keep them.
    pub fn into_backing(self) -> S {
        self.backing
    }

    /// Bytes currently held in the in-memory layer.
    pub fn nbytes(&self) -> usize {
        self.nbytes.get()
    }

    pub fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut entries = self.entries.borrow_mut();
        if let Some(entry) = entries.get(key) {
            return Ok(Some(entry.data.clone()));
        }
        match self.backing.get(key)? {
            None => Ok(None),
            Some(data) => {
                self.nbytes.set(self.nbytes.get() + data.len());
                entries.put(
                    key.to_owned(),
                    CacheEntry {
                        data: data.clone(),
                        dirty: false,
                    },
                );
                Ok(Some(data))
            }
        }
    }

    /// Insert or replace a value. It stays dirty until flushed.
    pub fn insert(&self, key: &str, value: Bytes) {
        let mut entries = self.entries.borrow_mut();
        let mut nbytes = self.nbytes.get() + value.len();
        if let Some(old) = entries.put(key.to_owned(), CacheEntry { data: value, dirty: true }) {
            nbytes -= old.data.len();
        }
        self.nbytes.set(nbytes);
    }

    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        if self.entries.borrow().peek(key).is_some() {
            return Ok(true);
        }
        self.backing.contains(key)
    }

    /// Drop a value from both the in-memory layer and the backing store.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.borrow_mut();
        if let Some(old) = entries.pop(key) {
            self.nbytes.set(self.nbytes.get() - old.data.len());
        }
        self.backing.erase(key)
    }

    /// Load and deserialize the value under `key`.
    pub fn get_cachable<T: Cachable>(&self, key: &str) -> Result<T, CacheError> {
        let data = self
            .get(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))?;
        T::from_bytes(&data).map_err(|source| CacheError::Decode {
            key: key.to_owned(),
            source,
        })
    }

    /// Serialize a value into the cache, replacing any previous one.
    pub fn put_cachable<T: Cachable>(&self, key: &str, value: &T) {
        self.insert(key, Bytes::from(value.to_bytes()));
    }

    /// Persist and evict least-recently-used entries until the in-memory
    /// layer fits its byte budget.
    pub fn maybe_flush(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.borrow_mut();
        while self.nbytes.get() > self.size_limit {
            let (key, entry) = match entries.pop_lru() {
                Some(kv) => kv,
                None => break,
            };
            if entry.dirty {
                debug!("flushing `{key}` to the backing store");
                self.backing.set(&key, entry.data.clone())?;
            }
            self.nbytes.set(self.nbytes.get() - entry.data.len());
        }
        Ok(())
    }

    /// Persist every dirty entry without evicting anything.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.borrow_mut();
        for (key, entry) in entries.iter_mut() {
            if entry.dirty {
                self.backing.set(key, entry.data.clone())?;
                entry.dirty = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cache(limit: usize) -> LruCache<MemoryStore> {
        LruCache::new(MemoryStore::new(), limit)
    }

    #[test]
    fn inserts_stay_in_memory_until_flush() {
        let c = cache(1024);
        c.insert("k", Bytes::from_static(b"value"));
        assert_eq!(c.get("k").unwrap().unwrap().as_ref(), b"value");
        assert!(!c.backing().contains("k").unwrap());

        c.maybe_flush().unwrap();
        // under budget: nothing persisted yet
        assert!(!c.backing().contains("k").unwrap());

        c.flush().unwrap();
        assert!(c.backing().contains("k").unwrap());
    }

    #[test]
    fn over_budget_evicts_least_recent_first() {
        let c = cache(10);
        c.insert("a", Bytes::from_static(b"aaaaaa"));
        c.insert("b", Bytes::from_static(b"bbbbbb"));
        // touch `a` so `b` is the eviction candidate
        c.get("a").unwrap();

        c.maybe_flush().unwrap();
        assert!(c.nbytes() <= 10);
        assert!(c.backing().contains("b").unwrap());
        assert!(!c.backing().contains("a").unwrap());
        // `b` still readable through the cache
        assert_eq!(c.get("b").unwrap().unwrap().as_ref(), b"bbbbbb");
    }

    #[test]
    fn reads_fall_through_to_backing() {
        let c = cache(1024);
        c.backing().set("k", Bytes::from_static(b"stored")).unwrap();
        assert_eq!(c.get("k").unwrap().unwrap().as_ref(), b"stored");
        assert!(c.contains("k").unwrap());
        assert_eq!(c.get("missing").unwrap(), None);
    }

    #[test]
    fn remove_clears_both_layers() {
        let c = cache(1024);
        c.insert("k", Bytes::from_static(b"value"));
        c.flush().unwrap();
        c.remove("k").unwrap();
        assert!(!c.contains("k").unwrap());
        assert!(!c.backing().contains("k").unwrap());
        assert_eq!(c.nbytes(), 0);
    }

    #[test]
    fn replacement_updates_accounting() {
        let c = cache(1024);
        c.insert("k", Bytes::from_static(b"0123456789"));
        c.insert("k", Bytes::from_static(b"ab"));
        assert_eq!(c.nbytes(), 2);
    }
}
