use bytes::Bytes;
use thiserror::Error;

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "filesystem")]
pub mod filesystem;

#[cfg(feature = "filesystem")]
pub use filesystem::FsStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no value under key `{0}`")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Keyed blob store.
///
/// Keys are `/`-separated paths (`chunks/<tensor>/<chunk name>`); values
/// are opaque byte blobs. Implementations use interior mutability so
/// shared references can serve reads and writes.
pub trait Store {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    fn erase(&self, key: &str) -> Result<(), StoreError>;

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// All keys starting with the given prefix, in no particular order.
    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
