//! Durable store: one active memory document plus a chain of rolling backups.

use crate::error::StoreError;
use crate::medium::FlashMedium;
use crate::model::MemoryDocument;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;

/// Key of the active document on the medium.
pub const ACTIVE_KEY: &str = "active";
/// Default number of backup slots.
pub const DEFAULT_MAX_BACKUPS: usize = 3;
/// Stray slots beyond the chain that cleanup still inspects.
const CLEANUP_SLACK: usize = 2;

/// Medium key of backup slot `version` (1 is newest).
pub fn backup_key(version: usize) -> String {
    format!("backup_{version}")
}

/// Versioned document store over a [`FlashMedium`].
///
/// Every write first moves the outgoing active document into backup slot 1,
/// shifting older backups toward slot `max_backups`; the oldest falls off.
pub struct DurableStore {
    medium: Arc<dyn FlashMedium>,
    max_backups: usize,
    lock: RwLock<()>,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("max_backups", &self.max_backups)
            .finish_non_exhaustive()
    }
}

impl DurableStore {
    /// Create a store keeping `max_backups` (at least one) backup slots.
    pub fn new(medium: Arc<dyn FlashMedium>, max_backups: usize) -> Self {
        let max_backups = max_backups.max(1);
        info!(
            "durable store ready (max_backups={}, total_bytes={})",
            max_backups,
            medium.total_bytes()
        );
        Self {
            medium,
            max_backups,
            lock: RwLock::new(()),
        }
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Read the active document, or the empty document when none exists.
    pub fn read_memory(&self) -> Result<MemoryDocument, StoreError> {
        let _guard = self.lock.read();
        match self.medium.read(ACTIVE_KEY)? {
            Some(data) => parse_document(&data),
            None => {
                debug!("no active memory document, returning empty document");
                Ok(MemoryDocument::empty())
            }
        }
    }

    /// Raw text of the active blob, without parsing it.
    pub fn read_raw_memory(&self) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.read();
        Ok(self
            .medium
            .read(ACTIVE_KEY)?
            .map(|data| String::from_utf8_lossy(&data).into_owned()))
    }

    /// Whether an active document has been committed.
    pub fn has_memory(&self) -> Result<bool, StoreError> {
        let _guard = self.lock.read();
        self.medium.exists(ACTIVE_KEY)
    }

    /// Commit `document` as the new active document.
    ///
    /// The outgoing active blob is backed up first; if that fails the active
    /// slot is left untouched and [`StoreError::BackupFailed`] is returned.
    pub fn write_memory(&self, document: &MemoryDocument) -> Result<(), StoreError> {
        let data = serde_json::to_vec(document)?;
        let _guard = self.lock.write();

        if let Some(current) = self.medium.read(ACTIVE_KEY)? {
            self.backup_memory(&current).map_err(|err| {
                error!("backup before write failed, aborting write (error={err})");
                StoreError::BackupFailed(Box::new(err))
            })?;
        }

        self.medium.write(ACTIVE_KEY, &data)?;
        info!(
            "memory document committed (bytes={}, memories={})",
            data.len(),
            document.memories.len()
        );

        if let Err(err) = self.clean_old_backups_locked() {
            warn!("backup cleanup failed (error={err})");
        }
        Ok(())
    }

    /// Shift the chain one slot toward the oldest end, then store `current` in slot 1.
    ///
    /// Copy-then-delete per slot; an interruption mid-shift can duplicate or
    /// drop one entry.
    fn backup_memory(&self, current: &[u8]) -> Result<(), StoreError> {
        for version in (1..self.max_backups).rev() {
            let from = backup_key(version);
            let Some(data) = self.medium.read(&from)? else {
                continue;
            };
            self.medium.write(&backup_key(version + 1), &data)?;
            self.medium.remove(&from)?;
            debug!("shifted backup (from={}, to={})", version, version + 1);
        }
        self.medium.write(&backup_key(1), current)?;
        debug!("backed up active document (bytes={})", current.len());
        Ok(())
    }

    /// Restore backup slot `version` over the active document.
    ///
    /// The replaced active document is not backed up.
    pub fn rollback_to_backup(&self, version: usize) -> Result<(), StoreError> {
        if version == 0 || version > self.max_backups {
            return Err(StoreError::InvalidBackupVersion {
                version,
                max: self.max_backups,
            });
        }
        let _guard = self.lock.write();
        let Some(data) = self.medium.read(&backup_key(version))? else {
            warn!("rollback target missing (version={version})");
            return Err(StoreError::BackupNotFound(version));
        };
        self.medium.write(ACTIVE_KEY, &data)?;
        info!("rolled back to backup (version={}, bytes={})", version, data.len());
        Ok(())
    }

    /// Delete stray backup slots numbered above `max_backups`.
    pub fn clean_old_backups(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.write();
        self.clean_old_backups_locked()
    }

    fn clean_old_backups_locked(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for version in (self.max_backups + 1)..=(self.max_backups + CLEANUP_SLACK) {
            if self.medium.remove(&backup_key(version))? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("removed stale backups (count={removed})");
        }
        Ok(removed)
    }

    /// Read a backup slot for inspection.
    pub fn backup(&self, version: usize) -> Result<Option<MemoryDocument>, StoreError> {
        if version == 0 || version > self.max_backups {
            return Err(StoreError::InvalidBackupVersion {
                version,
                max: self.max_backups,
            });
        }
        let _guard = self.lock.read();
        self.medium
            .read(&backup_key(version))?
            .map(|data| parse_document(&data))
            .transpose()
    }

    /// Occupied backup versions, newest first.
    pub fn backup_versions(&self) -> Result<Vec<usize>, StoreError> {
        let _guard = self.lock.read();
        let mut versions = Vec::new();
        for version in 1..=self.max_backups {
            if self.medium.exists(&backup_key(version))? {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    pub fn free_space(&self) -> Result<u64, StoreError> {
        self.medium.free_bytes()
    }

    pub fn used_space(&self) -> Result<u64, StoreError> {
        self.medium.used_bytes()
    }

    pub fn total_space(&self) -> u64 {
        self.medium.total_bytes()
    }
}

fn parse_document(data: &[u8]) -> Result<MemoryDocument, StoreError> {
    serde_json::from_slice(data).map_err(|err| StoreError::Corrupt(err.to_string()))
}
