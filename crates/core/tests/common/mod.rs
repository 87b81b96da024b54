//! Shared fixtures for commit tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::TryStreamExt;

use floe_core::errors::{FloeError, FloeResult};
use floe_core::events::{
    CommitReport, CreateSnapshotEvent, EventError, Listener, MetricsReporter,
};
use floe_core::ops::memory::InMemoryTableOperations;
use floe_core::ops::TableOperations;
use floe_core::storage::{FileIo, ObjectStoreRef};
use floe_core::table::TableMetadata;

/// How injected commit failures present to the producer.
pub enum FailureMode {
    Conflict,
    UnknownState,
}

/// Table operations that fail the first N commits before delegating.
pub struct FailingOps {
    inner: InMemoryTableOperations,
    mode: FailureMode,
    remaining_failures: AtomicU32,
    commit_calls: AtomicU32,
}

impl FailingOps {
    pub fn new(metadata: TableMetadata, mode: FailureMode, failures: u32) -> Self {
        Self {
            inner: InMemoryTableOperations::new("test_table", metadata),
            mode,
            remaining_failures: AtomicU32::new(failures),
            commit_calls: AtomicU32::new(0),
        }
    }

    pub fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableOperations for FailingOps {
    fn table_name(&self) -> String {
        self.inner.table_name()
    }

    fn current(&self) -> TableMetadata {
        self.inner.current()
    }

    async fn refresh(&self) -> FloeResult<TableMetadata> {
        self.inner.refresh().await
    }

    async fn commit(&self, base: &TableMetadata, updated: TableMetadata) -> FloeResult<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                (remaining > 0).then(|| remaining - 1)
            })
            .is_ok();
        if failing {
            return Err(match self.mode {
                FailureMode::Conflict => {
                    FloeError::CommitConflict("injected conflict".to_string())
                }
                FailureMode::UnknownState => FloeError::CommitStateUnknown {
                    source: "injected timeout".into(),
                },
            });
        }
        self.inner.commit(base, updated).await
    }

    fn io(&self) -> FileIo {
        self.inner.io()
    }

    fn metadata_file_location(&self, name: &str) -> String {
        self.inner.metadata_file_location(name)
    }

    fn new_snapshot_id(&self) -> i64 {
        self.inner.new_snapshot_id()
    }
}

/// All object paths currently stored, sorted.
pub async fn list_files(store: &ObjectStoreRef) -> Vec<String> {
    let mut paths: Vec<String> = store
        .list(None)
        .try_collect::<Vec<_>>()
        .await
        .unwrap()
        .into_iter()
        .map(|meta| meta.location.to_string())
        .collect();
    paths.sort();
    paths
}

/// The stored manifest-list paths, sorted.
pub async fn list_manifest_lists(store: &ObjectStoreRef) -> Vec<String> {
    list_files(store)
        .await
        .into_iter()
        .filter(|path| path.starts_with("metadata/snap-"))
        .collect()
}

/// Reporter capturing every commit report.
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<CommitReport>>,
}

impl MetricsReporter for RecordingReporter {
    fn report(&self, report: &CommitReport) -> Result<(), EventError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// Listener capturing every snapshot event.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<CreateSnapshotEvent>>,
}

impl Listener for RecordingListener {
    fn notify(&self, event: &CreateSnapshotEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A delete callback collecting paths instead of deleting them.
pub fn collecting_delete() -> (Arc<dyn Fn(&str) + Send + Sync>, Arc<Mutex<Vec<String>>>) {
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let sink = deleted.clone();
    let callback: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |path: &str| {
        sink.lock().unwrap().push(path.to_string());
    });
    (callback, deleted)
}
