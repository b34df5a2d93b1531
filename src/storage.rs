use std::path::PathBuf;
#[cfg(test)]
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::eid::Eid;

/// Key/value persistence for reconciliation state. Keys are flat file names.
pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
}

#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: &str) -> std::io::Result<Self> {
        let path = PathBuf::from(storage_dir);
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.base_dir.join(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.base_dir.join(ident))
    }

    // temp file + rename, so a crash mid-write never leaves a torn queue behind
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.base_dir.join(ident);
        let temp_path = self.base_dir.join(format!("{}-{ident}", Eid::new()));

        std::fs::write(&temp_path, data)?;

        std::fs::rename(&temp_path, &path)
    }
}

/// Volatile storage for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct BackendMemory {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

#[cfg(test)]
impl BackendMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
fn poisoned<E>(_: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "storage lock poisoned")
}

#[cfg(test)]
impl StorageManager for BackendMemory {
    fn exists(&self, ident: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(ident))
            .unwrap_or(false)
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        self.entries
            .read()
            .map_err(poisoned)?
            .get(ident)
            .cloned()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("{ident} not found"))
            })
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(ident.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_write_replaces_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path().to_str().unwrap()).unwrap();

        store.write("pending-sync.json", b"[1]").unwrap();
        store.write("pending-sync.json", b"[1,2]").unwrap();

        assert_eq!(store.read("pending-sync.json").unwrap(), b"[1,2]");

        // no temp files left behind
        let files = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_local_missing_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path().to_str().unwrap()).unwrap();

        assert!(!store.exists("user.json"));
        assert!(store.read("user.json").is_err());
    }

    #[test]
    fn test_memory_overwrite() {
        let store = BackendMemory::new();
        assert!(!store.exists("sync-status.json"));

        store.write("sync-status.json", b"{}").unwrap();
        store.write("sync-status.json", b"{\"state\":\"idle\"}").unwrap();
        assert_eq!(store.read("sync-status.json").unwrap(), b"{\"state\":\"idle\"}");
    }
}
