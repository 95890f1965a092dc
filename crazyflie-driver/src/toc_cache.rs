//! Persistent cache of TOCs, keyed by the TOC checksum.
//!
//! The cache is best effort: a store that cannot be read or written behaves
//! as an empty cache.

use crate::toc::TocMap;
use crate::value::ValueType;
use crate::Result;
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Key/value blob storage
pub trait CacheStore: Send + Sync {
    fn fetch(&self, key: &str) -> Option<Vec<u8>>;
    fn insert(&self, key: &str, blob: &[u8]);
}

/// One file per key in a folder
#[derive(Debug)]
pub struct FileStore {
    folder: Option<PathBuf>,
}

impl FileStore {
    /// Use `folder`, creating it if needed.
    ///
    /// The store is deactivated when the folder cannot be created, is not a
    /// directory or is not writable.
    pub fn new<P: AsRef<Path>>(folder: P) -> Self {
        let folder = folder.as_ref();

        let usable = if !folder.exists() {
            match fs::create_dir_all(folder) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Deactivating cache. Cannot create folder: {}", e);
                    false
                }
            }
        } else if !folder.is_dir() {
            warn!("Deactivating cache. Folder is not a directory");
            false
        } else {
            let test_file = folder.join("test");
            match fs::write(&test_file, b"").and_then(|_| fs::remove_file(&test_file)) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Deactivating cache. Cannot write to folder: {}", e);
                    false
                }
            }
        };

        FileStore {
            folder: if usable {
                Some(folder.to_path_buf())
            } else {
                None
            },
        }
    }

    pub fn is_active(&self) -> bool {
        self.folder.is_some()
    }
}

impl CacheStore for FileStore {
    fn fetch(&self, key: &str) -> Option<Vec<u8>> {
        let folder = self.folder.as_ref()?;
        fs::read(folder.join(key)).ok()
    }

    fn insert(&self, key: &str, blob: &[u8]) {
        if let Some(folder) = self.folder.as_ref() {
            if let Err(e) = fs::write(folder.join(key), blob) {
                debug!("Cannot write cache entry {}: {}", key, e);
            }
        }
    }
}

/// In-memory store, lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl CacheStore for MemoryStore {
    fn fetch(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn insert(&self, key: &str, blob: &[u8]) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), blob.to_vec());
    }
}

/// TOC cache on top of a [CacheStore]
#[derive(Clone, Default)]
pub struct TocCache {
    store: Option<Arc<dyn CacheStore>>,
}

impl TocCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        TocCache { store: Some(store) }
    }

    /// Cache that never finds anything
    pub fn disabled() -> Self {
        TocCache { store: None }
    }

    /// File cache in `folder`, disabled when `None`
    pub fn from_folder<P: AsRef<Path>>(folder: Option<P>) -> Self {
        match folder {
            Some(folder) => TocCache::new(Arc::new(FileStore::new(folder))),
            None => TocCache::disabled(),
        }
    }

    pub fn fetch<T: ValueType>(&self, crc: &str) -> Option<TocMap<T>> {
        let blob = self.store.as_ref()?.fetch(crc)?;
        match decode_toc(&blob) {
            Ok(toc) => Some(toc),
            Err(e) => {
                warn!("Ignoring unreadable cached TOC {}: {}", crc, e);
                None
            }
        }
    }

    pub fn insert<T: ValueType>(&self, crc: &str, toc: &TocMap<T>) {
        if let Some(store) = self.store.as_ref() {
            match encode_toc(toc) {
                Ok(blob) => store.insert(crc, &blob),
                Err(e) => warn!("Cannot serialize TOC {}: {}", crc, e),
            }
        }
    }
}

/// JSON blob of a TOC
pub fn encode_toc<T: ValueType>(toc: &TocMap<T>) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(toc)?)
}

pub fn decode_toc<T: ValueType>(blob: &[u8]) -> Result<TocMap<T>> {
    Ok(serde_json::from_slice(blob)?)
}
