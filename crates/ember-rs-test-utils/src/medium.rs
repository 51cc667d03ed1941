use ember_rs_memory::{FlashMedium, MemoryMedium, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory medium whose writes can be made to fail.
#[derive(Debug, Default)]
pub struct FaultyMedium {
    inner: MemoryMedium,
    fail_backup_writes: AtomicBool,
    fail_all_writes: AtomicBool,
}

impl FaultyMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail writes to any `backup_*` key.
    pub fn fail_backup_writes(&self, fail: bool) {
        self.fail_backup_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail every write.
    pub fn fail_all_writes(&self, fail: bool) {
        self.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryMedium {
        &self.inner
    }

    fn should_fail(&self, key: &str) -> bool {
        self.fail_all_writes.load(Ordering::SeqCst)
            || (key.starts_with("backup_") && self.fail_backup_writes.load(Ordering::SeqCst))
    }
}

impl FlashMedium for FaultyMedium {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        if self.should_fail(key) {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "injected write failure (key={key})"
            ))));
        }
        self.inner.write(key, data)
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.remove(key)
    }

    fn total_bytes(&self) -> u64 {
        self.inner.total_bytes()
    }

    fn used_bytes(&self) -> Result<u64, StoreError> {
        self.inner.used_bytes()
    }
}
