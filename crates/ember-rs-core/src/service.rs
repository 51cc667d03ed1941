//! Composition root wiring store, compactor and pipeline together.

use crate::compactor::{ChatCompactor, Compactor};
use crate::error::{CompactorError, ServiceError};
use crate::pipeline::{MemoryPipeline, PipelineSettings, WorkerHandle};
use chrono::{DateTime, Utc};
use ember_rs_config::EmberConfig;
use ember_rs_memory::{DirMedium, DurableStore, FlashMedium};
use log::info;
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time view of the memory subsystem for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStatus {
    pub conversation_count: usize,
    pub buffer_size: usize,
    pub free_space_kb: u64,
    pub used_space_kb: u64,
    /// True when no turns are waiting to be compacted.
    pub is_idle: bool,
    pub last_update: Option<DateTime<Utc>>,
}

/// Running memory service: the worker plus a handle to talk to it.
pub struct MemoryService {
    pipeline: MemoryPipeline,
    worker: WorkerHandle,
}

impl MemoryService {
    /// Start the service from config with a directory-backed store and the
    /// chat compactor.
    ///
    /// Fails with [`ServiceError::ConfigurationMissing`] when no device
    /// credential is configured.
    pub fn start(config: &EmberConfig) -> Result<Self, ServiceError> {
        let compactor = match ChatCompactor::from_config(config) {
            Ok(compactor) => Arc::new(compactor),
            Err(CompactorError::MissingCredential) => {
                return Err(ServiceError::ConfigurationMissing(
                    "device.api_key (or EMBER_API_KEY) is required for compaction".to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };
        let medium = Arc::new(DirMedium::open(
            config.storage_root(),
            config.storage.partition_bytes,
        )?);
        let store = Arc::new(DurableStore::new(medium, config.storage.max_backups));
        Ok(Self::with_parts(
            store,
            compactor,
            PipelineSettings::from_config(config),
        ))
    }

    /// Start the service over an explicit medium and compactor.
    pub fn with_medium(
        config: &EmberConfig,
        medium: Arc<dyn FlashMedium>,
        compactor: Arc<dyn Compactor>,
    ) -> Self {
        let store = Arc::new(DurableStore::new(medium, config.storage.max_backups));
        Self::with_parts(store, compactor, PipelineSettings::from_config(config))
    }

    pub fn with_parts(
        store: Arc<DurableStore>,
        compactor: Arc<dyn Compactor>,
        settings: PipelineSettings,
    ) -> Self {
        let (pipeline, worker) = MemoryPipeline::spawn(store, compactor, settings);
        info!("memory service started");
        Self { pipeline, worker }
    }

    /// Caller-side handle; clone freely.
    pub fn pipeline(&self) -> &MemoryPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        self.pipeline.store()
    }

    pub fn status(&self) -> Result<MemoryStatus, ServiceError> {
        let stats = self.pipeline.buffer_stats();
        Ok(MemoryStatus {
            conversation_count: stats.count,
            buffer_size: stats.size_bytes,
            free_space_kb: self.pipeline.free_space()? / 1024,
            used_space_kb: self.pipeline.used_space()? / 1024,
            is_idle: stats.count == 0,
            last_update: stats.last_commit,
        })
    }

    /// Drop this handle and wait for the worker to finish.
    ///
    /// The worker only exits once every cloned pipeline handle is gone too.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        let Self { pipeline, worker } = self;
        drop(pipeline);
        worker.join().await?;
        info!("memory service stopped");
        Ok(())
    }
}
