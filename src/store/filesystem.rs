use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use walkdir::WalkDir;

use super::{Store, StoreError};

/// Store backed by a directory tree, one file per key.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_owned();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut p = self.root.clone();
        for part in key.split('/') {
            p.push(part);
        }
        p
    }
}

impl Store for FsStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(buf) => Ok(Some(Bytes::from(buf))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &value)?;
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(key).is_file())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter() {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .expect("walked path is under root");
            let key = rel
                .iter()
                .map(|c| c.to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                out.push(key);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_roundtrip_through_keys() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsStore::new(dir.path()).unwrap();

        s.set("chunks/t/abc", Bytes::from_static(b"blob")).unwrap();
        assert!(s.contains("chunks/t/abc").unwrap());
        assert_eq!(s.get("chunks/t/abc").unwrap().unwrap().as_ref(), b"blob");
        assert_eq!(s.get("chunks/t/missing").unwrap(), None);

        let keys = s.list_prefix("chunks/t/").unwrap();
        assert_eq!(keys, vec!["chunks/t/abc"]);

        s.erase("chunks/t/abc").unwrap();
        assert!(!s.contains("chunks/t/abc").unwrap());
        // erasing again is fine
        s.erase("chunks/t/abc").unwrap();
    }
}
