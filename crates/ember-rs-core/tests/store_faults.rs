//! Store behaviour when the medium rejects writes.

use ember_rs_memory::{ACTIVE_KEY, DurableStore, FlashMedium, StoreError, backup_key};
use ember_rs_test_utils::{FaultyMedium, sample_document};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[test]
fn backup_failure_aborts_write() {
    let medium = Arc::new(FaultyMedium::new());
    let store = DurableStore::new(medium.clone(), 3);
    store
        .write_memory(&sample_document("a"))
        .expect("first write needs no backup");

    medium.fail_backup_writes(true);
    let err = store.write_memory(&sample_document("b")).unwrap_err();
    assert!(matches!(err, StoreError::BackupFailed(_)));
    assert_eq!(store.read_memory().expect("read"), sample_document("a"));
    assert_eq!(medium.inner().keys(), vec![ACTIVE_KEY.to_string()]);

    medium.fail_backup_writes(false);
    store.write_memory(&sample_document("b")).expect("write");
    assert_eq!(store.backup(1).expect("backup"), Some(sample_document("a")));
}

#[test]
fn failed_first_write_leaves_store_empty() {
    let medium = Arc::new(FaultyMedium::new());
    let store = DurableStore::new(medium.clone(), 3);
    medium.fail_all_writes(true);

    let err = store.write_memory(&sample_document("a")).unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
    assert!(!store.has_memory().expect("has"));
    assert_eq!(medium.inner().read(&backup_key(1)).expect("read"), None);
    assert!(medium.inner().keys().is_empty());
}
