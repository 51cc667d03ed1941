//! Pipeline scenarios with scripted compactors and in-memory media.

use ember_rs_config::EmberConfig;
use ember_rs_core::{
    CompactionOutcome, Compactor, MemoryPipeline, MemoryService, PipelineError, PipelineSettings,
    ValidationError,
};
use ember_rs_memory::{
    ACTIVE_KEY, DirMedium, DurableStore, FlashMedium, MemoryDocument, MemoryMedium, Role,
    StoreError, backup_key,
};
use ember_rs_test_utils::{
    BlockingCompactor, FailingCompactor, FaultyMedium, FixedCompactor, RecordingCompactor,
    oversized_document_json, sample_document, sample_document_json,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn memory_store() -> Arc<DurableStore> {
    Arc::new(DurableStore::new(Arc::new(MemoryMedium::default()), 3))
}

fn spawn(
    store: Arc<DurableStore>,
    compactor: Arc<dyn Compactor>,
) -> (MemoryPipeline, ember_rs_core::WorkerHandle) {
    MemoryPipeline::spawn(store, compactor, PipelineSettings::default())
}

/// Wait until the worker publishes stats matching `predicate`.
async fn wait_for(
    pipeline: &MemoryPipeline,
    predicate: impl Fn(&ember_rs_core::BufferStats) -> bool,
) {
    let mut watcher = pipeline.clone();
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&watcher.buffer_stats()) {
                return;
            }
            watcher.stats_changed().await.expect("worker alive");
        }
    })
    .await;
    result.expect("stats condition reached in time");
}

async fn add_turns(pipeline: &MemoryPipeline, count: usize) {
    for i in 0..count {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        pipeline
            .add_conversation(role, format!("turn {i}"))
            .await
            .expect("enqueue");
    }
}

#[tokio::test]
async fn empty_store_yields_empty_document() {
    let (pipeline, _worker) = spawn(memory_store(), Arc::new(FixedCompactor::new("{}")));
    assert_eq!(
        pipeline.get_memory_package().expect("read"),
        MemoryDocument::empty()
    );
    assert!(pipeline.is_buffer_empty());
}

#[tokio::test]
async fn tenth_turn_triggers_exactly_one_compaction() {
    let compactor = Arc::new(RecordingCompactor::new(sample_document_json("t")));
    let store = memory_store();
    let (pipeline, _worker) = spawn(store.clone(), compactor.clone());

    add_turns(&pipeline, 9).await;
    wait_for(&pipeline, |stats| stats.count == 9).await;
    assert_eq!(compactor.call_count(), 0);
    assert_eq!(pipeline.conversation_count(), 9);

    add_turns(&pipeline, 1).await;
    wait_for(&pipeline, |stats| stats.last_commit.is_some()).await;
    assert_eq!(compactor.call_count(), 1);
    assert_eq!(pipeline.conversation_count(), 0);
    assert_eq!(pipeline.buffer_size(), 0);
    assert_eq!(store.read_memory().expect("read"), sample_document("t"));

    let call = &compactor.calls()[0];
    assert_eq!(call.old_document, MemoryDocument::empty().to_json().expect("json"));
    assert!(call.transcript.starts_with("Conversation log:\n\n"));
    assert!(call.transcript.contains("User: turn 0\n"));
    assert!(call.transcript.contains("User: turn 8\n"));
    assert_eq!(call.transcript.lines().filter(|line| line.contains(": turn ")).count(), 10);
}

#[tokio::test]
async fn oversized_candidate_is_rejected_and_buffer_kept() {
    let store = memory_store();
    store
        .write_memory(&sample_document("before"))
        .expect("seed");
    let compactor = Arc::new(RecordingCompactor::new(oversized_document_json(12 * 1024)));
    let (pipeline, _worker) = spawn(store.clone(), compactor.clone());

    add_turns(&pipeline, 10).await;
    wait_for(&pipeline, |stats| stats.count == 10).await;

    let err = pipeline.update_memory().await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Validation(ValidationError::TooLarge { .. })
    ));
    // one threshold attempt plus the manual one
    assert_eq!(compactor.call_count(), 2);
    assert_eq!(pipeline.conversation_count(), 10);
    assert_eq!(store.read_memory().expect("read"), sample_document("before"));
    assert_eq!(store.backup(1).expect("backup"), None);
}

#[tokio::test]
async fn fenced_candidate_is_committed_and_buffer_cleared() {
    let fenced = format!("```json\n{}\n```\n", sample_document_json("fenced"));
    let store = memory_store();
    let (pipeline, _worker) = spawn(store.clone(), Arc::new(FixedCompactor::new(fenced)));

    add_turns(&pipeline, 3).await;
    let report = pipeline.update_memory().await.expect("update");
    assert_eq!(report.outcome, CompactionOutcome::Committed);
    assert_eq!(report.turns_merged, 3);
    assert_eq!(report.memories, 1);
    assert!(pipeline.is_buffer_empty());
    assert_eq!(
        pipeline.get_memory_package().expect("read"),
        sample_document("fenced")
    );
}

#[tokio::test]
async fn manual_update_on_empty_buffer_is_skipped() {
    let compactor = Arc::new(RecordingCompactor::new(sample_document_json("x")));
    let (pipeline, _worker) = spawn(memory_store(), compactor.clone());
    let report = pipeline.update_memory().await.expect("update");
    assert_eq!(report.outcome, CompactionOutcome::Skipped);
    assert_eq!(compactor.call_count(), 0);
}

#[tokio::test]
async fn compactor_failure_keeps_buffer_and_store() {
    let store = memory_store();
    let compactor = Arc::new(FailingCompactor::new());
    let (pipeline, _worker) = spawn(store.clone(), compactor.clone());

    add_turns(&pipeline, 2).await;
    let err = pipeline.update_memory().await.unwrap_err();
    assert!(matches!(err, PipelineError::Compactor(_)));
    assert_eq!(compactor.attempts(), 1);
    assert_eq!(pipeline.conversation_count(), 2);
    assert!(!store.has_memory().expect("has"));
}

#[tokio::test]
async fn store_failure_keeps_buffer() {
    let medium = Arc::new(FaultyMedium::new());
    let store = Arc::new(DurableStore::new(medium.clone(), 3));
    store.write_memory(&sample_document("old")).expect("seed");
    medium.fail_backup_writes(true);

    let (pipeline, _worker) = spawn(
        store.clone(),
        Arc::new(FixedCompactor::new(sample_document_json("new"))),
    );
    add_turns(&pipeline, 1).await;
    let err = pipeline.update_memory().await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Store(StoreError::BackupFailed(_))
    ));
    assert_eq!(pipeline.conversation_count(), 1);
    assert_eq!(store.read_memory().expect("read"), sample_document("old"));
}

#[tokio::test]
async fn corrupt_active_document_is_replaced_by_next_compaction() {
    let corrupt = br#"{"version":"1.0""#;
    let medium = Arc::new(FaultyMedium::new());
    medium.inner().write(ACTIVE_KEY, corrupt).expect("seed");
    let store = Arc::new(DurableStore::new(medium.clone(), 3));
    let compactor = Arc::new(RecordingCompactor::new(sample_document_json("healed")));
    let (pipeline, _worker) = spawn(store.clone(), compactor.clone());

    add_turns(&pipeline, 1).await;
    let report = pipeline.update_memory().await.expect("update");
    assert_eq!(report.outcome, CompactionOutcome::Committed);
    assert_eq!(compactor.call_count(), 1);
    assert_eq!(compactor.calls()[0].old_document, r#"{"version":"1.0""#);
    assert!(pipeline.is_buffer_empty());
    assert_eq!(store.read_memory().expect("read"), sample_document("healed"));
    assert_eq!(
        medium.inner().read(&backup_key(1)).expect("backup"),
        Some(corrupt.to_vec())
    );
}

#[tokio::test]
async fn queue_full_while_worker_is_busy() {
    let compactor = Arc::new(BlockingCompactor::new(sample_document_json("slow")));
    let settings = PipelineSettings {
        queue_capacity: 1,
        compaction_threshold: 1,
        ..PipelineSettings::default()
    };
    let (pipeline, _worker) = MemoryPipeline::spawn(memory_store(), compactor.clone(), settings);

    pipeline
        .add_conversation(Role::User, "first")
        .await
        .expect("first");
    compactor.wait_started().await;
    pipeline
        .add_conversation(Role::User, "second")
        .await
        .expect("second fills the queue");
    let err = pipeline
        .add_conversation(Role::User, "third")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::QueueFull));
    compactor.release_one();
}

#[tokio::test]
async fn rollback_goes_through_worker() {
    let store = memory_store();
    store.write_memory(&sample_document("a")).expect("a");
    store.write_memory(&sample_document("b")).expect("b");
    let (pipeline, _worker) = spawn(store.clone(), Arc::new(FixedCompactor::new("{}")));

    pipeline.rollback_to_backup(1).await.expect("rollback");
    assert_eq!(store.read_memory().expect("read"), sample_document("a"));

    let err = pipeline.rollback_to_backup(3).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Store(StoreError::BackupNotFound(3))
    ));
    let err = pipeline.rollback_to_backup(9).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Store(StoreError::InvalidBackupVersion { version: 9, .. })
    ));
    assert_eq!(store.read_memory().expect("read"), sample_document("a"));
}

#[tokio::test]
async fn worker_exits_when_handles_dropped() {
    let (pipeline, worker) = spawn(memory_store(), Arc::new(FixedCompactor::new("{}")));
    let other = pipeline.clone();
    drop(pipeline);
    assert!(!worker.is_finished());
    drop(other);
    tokio::time::timeout(Duration::from_secs(5), worker.join())
        .await
        .expect("joined in time")
        .expect("clean exit");
}

#[tokio::test]
async fn service_status_and_directory_layout() {
    let temp = tempdir().expect("tempdir");
    let config = EmberConfig::builder().api_key("k").build();
    let medium = Arc::new(DirMedium::open(temp.path(), 64 * 1024).expect("medium"));
    let compactor = Arc::new(FixedCompactor::new(sample_document_json("svc")));
    let service = MemoryService::with_medium(&config, medium, compactor);

    let status = service.status().expect("status");
    assert!(status.is_idle);
    assert_eq!(status.conversation_count, 0);
    assert_eq!(status.free_space_kb, 64);
    assert_eq!(status.last_update, None);

    service
        .pipeline()
        .add_conversation(Role::User, "hello")
        .await
        .expect("enqueue");
    service.pipeline().update_memory().await.expect("update");
    service
        .pipeline()
        .add_conversation(Role::User, "again")
        .await
        .expect("enqueue");
    service.pipeline().update_memory().await.expect("update");

    assert!(temp.path().join("active.json").is_file());
    assert!(temp.path().join(format!("{}.json", backup_key(1))).is_file());
    let status = service.status().expect("status");
    assert!(status.last_update.is_some());
    assert!(status.is_idle);

    service.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn service_requires_credential() {
    let temp = tempdir().expect("tempdir");
    let mut config = EmberConfig::default();
    config.storage.root = Some(temp.path().to_string_lossy().to_string());
    let err = MemoryService::start(&config).err().expect("missing credential");
    assert!(matches!(
        err,
        ember_rs_core::ServiceError::ConfigurationMissing(_)
    ));
}
