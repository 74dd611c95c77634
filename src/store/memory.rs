use std::{cell::RefCell, collections::HashMap};

use bytes::Bytes;

use super::{Store, StoreError};

/// In-memory store, mostly for tests and ephemeral datasets.
#[derive(Debug, Default)]
pub struct MemoryStore {
    // this locks the whole map for access to a single key;
    // fine while engines are single-threaded
    map: RefCell<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let map = self.map.borrow();
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let mut map = self.map.borrow_mut();
        map.insert(key.to_owned(), value);
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.map.borrow_mut();
        map.remove(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let map = self.map.borrow();
        Ok(map.contains_key(key))
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let map = self.map.borrow();
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_erase() {
        let s = MemoryStore::new();
        assert_eq!(s.get("a/b").unwrap(), None);

        s.set("a/b", Bytes::from_static(b"payload")).unwrap();
        assert!(s.contains("a/b").unwrap());
        assert_eq!(s.get("a/b").unwrap().unwrap().as_ref(), b"payload");

        s.erase("a/b").unwrap();
        assert!(!s.contains("a/b").unwrap());
    }

    #[test]
    fn list_prefix_filters() {
        let s = MemoryStore::new();
        s.set("chunks/t/one", Bytes::new()).unwrap();
        s.set("chunks/t/two", Bytes::new()).unwrap();
        s.set("tensor_meta/t", Bytes::new()).unwrap();

        let mut keys = s.list_prefix("chunks/t/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["chunks/t/one", "chunks/t/two"]);
    }
}
