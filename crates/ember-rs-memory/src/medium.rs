//! Key/blob storage media the durable store writes through.

use crate::error::StoreError;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Flat key/blob storage with fixed capacity, modelled on a flash partition.
pub trait FlashMedium: Send + Sync {
    /// Read a blob, `None` if the key is absent.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or replace a blob.
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Delete a blob, returning whether it existed.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether a blob is stored under `key`.
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.read(key)?.is_some())
    }

    /// Partition size in bytes.
    fn total_bytes(&self) -> u64;

    /// Bytes currently occupied by blobs.
    fn used_bytes(&self) -> Result<u64, StoreError>;

    /// Bytes still available.
    fn free_bytes(&self) -> Result<u64, StoreError> {
        Ok(self.total_bytes().saturating_sub(self.used_bytes()?))
    }
}

/// Check that replacing `current` bytes with `incoming` bytes fits the partition.
fn ensure_capacity(total: u64, used: u64, current: u64, incoming: u64) -> Result<(), StoreError> {
    let after = used.saturating_sub(current) + incoming;
    if after > total {
        return Err(StoreError::NoSpace {
            needed: incoming,
            free: total.saturating_sub(used.saturating_sub(current)),
        });
    }
    Ok(())
}

/// Directory-backed medium storing each key as `<root>/<key>.json`.
#[derive(Debug)]
pub struct DirMedium {
    root: PathBuf,
    partition_bytes: u64,
}

impl DirMedium {
    /// Open (creating if needed) a medium rooted at `root`.
    pub fn open(root: impl AsRef<Path>, partition_bytes: u64) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!(
            "opened directory medium (root={}, partition_bytes={})",
            root.display(),
            partition_bytes
        );
        Ok(Self {
            root,
            partition_bytes,
        })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json.tmp"))
    }

    fn blob_len(&self, key: &str) -> Result<u64, StoreError> {
        match fs::metadata(self.blob_path(key)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl FlashMedium for DirMedium {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.blob_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write to a temp file then rename it over the blob.
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        ensure_capacity(
            self.partition_bytes,
            self.used_bytes()?,
            self.blob_len(key)?,
            data.len() as u64,
        )?;
        let temp_path = self.temp_path(key);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, self.blob_path(key))?;
        debug!("wrote blob (key={}, bytes={})", key, data.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => {
                debug!("removed blob (key={})", key);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.blob_path(key).is_file())
    }

    fn total_bytes(&self) -> u64 {
        self.partition_bytes
    }

    fn used_bytes(&self) -> Result<u64, StoreError> {
        let mut used = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                used += entry.metadata()?.len();
            }
        }
        Ok(used)
    }
}

/// Volatile medium used by tests and ephemeral sessions.
#[derive(Debug)]
pub struct MemoryMedium {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    partition_bytes: u64,
}

impl MemoryMedium {
    pub fn new(partition_bytes: u64) -> Self {
        Self {
            blobs: Mutex::new(BTreeMap::new()),
            partition_bytes,
        }
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().keys().cloned().collect()
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl FlashMedium for MemoryMedium {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock();
        let used = blobs.values().map(|blob| blob.len() as u64).sum();
        let current = blobs.get(key).map_or(0, |blob| blob.len() as u64);
        ensure_capacity(self.partition_bytes, used, current, data.len() as u64)?;
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.lock().remove(key).is_some())
    }

    fn total_bytes(&self) -> u64 {
        self.partition_bytes
    }

    fn used_bytes(&self) -> Result<u64, StoreError> {
        Ok(self
            .blobs
            .lock()
            .values()
            .map(|blob| blob.len() as u64)
            .sum())
    }
}
