//! Produce and commit new table snapshots with optimistic concurrency
//!
//! [`SnapshotProducer`] drives one logical commit of a
//! [`SnapshotOperation`]: per attempt it refreshes the base metadata, lets the
//! operation produce manifests, enriches them in parallel, writes the
//! manifest list and swaps the table metadata through
//! [`TableOperations::commit`](crate::ops::TableOperations::commit). Conflicts
//! are retried with exponential backoff; everything else terminates the loop.
//!
//!<pre>
//!  SnapshotOperation ──▶ apply ──▶ manifests ──▶ enrich ──▶ manifest list
//!                          │                                      │
//!                          ▼                                      ▼
//!                     refreshed base ─────────────────▶ candidate snapshot
//!                                                               │
//!                              retry on conflict ◀── commit CAS ┘
//!</pre>
//!
//! Across attempts the snapshot id, commit UUID and the enrichment cache stay
//! stable; the attempt counter increases monotonically so every attempt gets
//! a unique manifest-list name. After success the producer reclaims the
//! manifest lists of failed attempts and everything the operation wrote that
//! did not end up in the committed snapshot.

use std::collections::HashSet;
use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{operation, ApplyContext, FileCleaner, SnapshotOperation};
use crate::errors::{FloeError, FloeResult};
use crate::events::{
    CommitMetrics, CommitReport, EnvironmentContext, Listener, LoggingMetricsReporter,
    MetricsReporter,
};
use crate::manifest::{ManifestFile, ManifestListWriter, ManifestWriterFactory};
use crate::ops::TableOperationsRef;
use crate::storage::FileIo;
use crate::table::{Snapshot, TableMetadata, TableMetadataBuilder, MAIN_BRANCH};

mod backoff;
mod enrich;
pub(crate) mod groups;
pub mod summary;

use backoff::ExponentialBackoff;
use enrich::ManifestEnricher;

/// Drives one logical commit of a [`SnapshotOperation`].
///
/// A producer instance spans all retries of the commit: it assigns exactly one
/// snapshot id, keeps one commit UUID for manifest naming, and accumulates the
/// manifest lists written by failed attempts for cleanup.
pub struct SnapshotProducer {
    ops: TableOperationsRef,
    op: Box<dyn SnapshotOperation>,
    io: FileIo,
    base: TableMetadata,
    strict_cleanup: bool,
    can_inherit_snapshot_id: bool,
    commit_uuid: Uuid,
    manifest_count: Arc<AtomicI32>,
    attempt: u32,
    manifest_lists: Vec<String>,
    target_manifest_size_bytes: u64,
    stage_only: bool,
    target_branch: String,
    snapshot_id: Option<i64>,
    enricher: ManifestEnricher,
    worker_pool_size: usize,
    delete_func: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    listeners: Vec<Arc<dyn Listener>>,
    reporter: Arc<dyn MetricsReporter>,
    env: EnvironmentContext,
}

impl SnapshotProducer {
    /// Create a producer committing `op` against the table behind `ops`.
    pub fn new(ops: TableOperationsRef, op: Box<dyn SnapshotOperation>) -> Self {
        let base = ops.current();
        let io = ops.io().with_encryptor(ops.encryption());
        let strict_cleanup = ops.require_strict_cleanup();
        let config = base.config();
        let target_manifest_size_bytes = config.manifest_target_size_bytes();
        let can_inherit_snapshot_id =
            base.format_version >= 2 || config.snapshot_id_inheritance_enabled();
        let worker_pool_size = std::thread::available_parallelism()
            .map(|parallelism| parallelism.get())
            .unwrap_or(4);

        Self {
            ops,
            op,
            io,
            base,
            strict_cleanup,
            can_inherit_snapshot_id,
            commit_uuid: Uuid::new_v4(),
            manifest_count: Arc::new(AtomicI32::new(0)),
            attempt: 0,
            manifest_lists: Vec::new(),
            target_manifest_size_bytes,
            stage_only: false,
            target_branch: MAIN_BRANCH.to_string(),
            snapshot_id: None,
            enricher: ManifestEnricher::new(),
            worker_pool_size,
            delete_func: None,
            listeners: Vec::new(),
            reporter: Arc::new(LoggingMetricsReporter),
            env: EnvironmentContext::default(),
        }
    }

    /// Target the commit at `branch` instead of `main`.
    ///
    /// Fails when the name resolves to a tag; tags are immutable and cannot
    /// be commit targets.
    pub fn for_branch(mut self, branch: impl Into<String>) -> FloeResult<Self> {
        let branch = branch.into();
        if let Some(reference) = self.base.reference(&branch) {
            if !reference.is_branch() {
                return Err(FloeError::Validation(format!(
                    "{branch} is a tag, not a branch. Tags cannot be targets for producing snapshots"
                )));
            }
        }
        self.target_branch = branch;
        Ok(self)
    }

    /// Add the new snapshot without moving any branch ref.
    pub fn stage_only(mut self) -> Self {
        self.stage_only = true;
        self
    }

    /// Size of the worker pool used for parallel manifest work.
    pub fn with_worker_pool_size(mut self, worker_pool_size: usize) -> Self {
        self.worker_pool_size = worker_pool_size.max(1);
        self
    }

    /// Replace the default file-delete callback used during cleanup.
    ///
    /// The callback can be set at most once per producer.
    pub fn delete_with(mut self, delete_func: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        assert!(
            self.delete_func.is_none(),
            "Cannot set delete callback more than once"
        );
        self.delete_func = Some(delete_func);
        self
    }

    /// Register a listener notified after a successful commit.
    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replace the default logging metrics reporter.
    pub fn report_with(mut self, reporter: Arc<dyn MetricsReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the environment context merged into snapshot summaries.
    pub fn with_env_context(mut self, env: EnvironmentContext) -> Self {
        self.env = env;
        self
    }

    /// The snapshot id of this commit, assigned once across all retries.
    fn snapshot_id(&mut self) -> i64 {
        if let Some(pinned) = self.op.pinned_snapshot_id() {
            return pinned;
        }
        if let Some(assigned) = self.snapshot_id {
            return assigned;
        }
        let mut candidate = self.ops.new_snapshot_id();
        while self.ops.current().snapshot(candidate).is_some() {
            candidate = self.ops.new_snapshot_id();
        }
        self.snapshot_id = Some(candidate);
        candidate
    }

    fn next_manifest_list_path(&mut self, snapshot_id: i64) -> String {
        self.attempt += 1;
        self.ops.metadata_file_location(&format!(
            "snap-{snapshot_id}-{}-{}.avro",
            self.attempt, self.commit_uuid
        ))
    }

    /// Run one commit attempt up to (not including) the metadata swap and
    /// return the candidate snapshot.
    pub async fn apply(&mut self) -> FloeResult<Snapshot> {
        self.base = self.ops.refresh().await?;
        let parent = self.base.latest_snapshot(&self.target_branch).cloned();
        let parent_snapshot_id = parent.as_ref().map(|snapshot| snapshot.snapshot_id);
        let sequence_number = self.base.next_sequence_number();

        self.op.validate(&self.base, parent.as_ref())?;

        let snapshot_id = self.snapshot_id();
        let factory = ManifestWriterFactory::new(
            self.ops.clone(),
            self.io.clone(),
            self.commit_uuid,
            self.manifest_count.clone(),
            snapshot_id,
            self.can_inherit_snapshot_id,
            self.target_manifest_size_bytes,
        );
        let ctx = ApplyContext::new(factory, self.io.clone(), self.worker_pool_size, snapshot_id);
        let manifests = self.op.apply(&self.base, parent.as_ref(), &ctx).await?;

        let manifest_list = self.next_manifest_list_path(snapshot_id);
        let mut writer = ManifestListWriter::new(
            self.io.clone(),
            manifest_list.clone(),
            self.base.format_version,
            snapshot_id,
            parent_snapshot_id,
            sequence_number,
            self.base.next_row_id,
        )?;
        self.manifest_lists.push(manifest_list.clone());

        let enriched: Vec<ManifestFile> = stream::iter(
            manifests
                .into_iter()
                .map(|manifest| self.enricher.enrich(&self.io, &self.base, manifest)),
        )
        .buffered(self.worker_pool_size)
        .try_collect()
        .await?;

        for manifest in &enriched {
            writer.append(manifest)?;
        }
        let writer_next_row_id = writer.close().await?;

        let (first_row_id, added_rows) = if self.base.format_version >= 3 {
            let assigned_rows = writer_next_row_id - self.base.next_row_id;
            if assigned_rows < 0 {
                return Err(FloeError::Validation(format!(
                    "Invalid row id assignment: {assigned_rows} assigned rows"
                )));
            }
            (Some(self.base.next_row_id), Some(assigned_rows))
        } else {
            (None, None)
        };

        let delta = self.op.summary();
        if self.op.operation() == operation::REPLACE {
            let added = summary::summary_count(&delta, summary::ADDED_RECORDS);
            let replaced = summary::summary_count(&delta, summary::DELETED_RECORDS);
            // added may be less than replaced when records are already
            // removed by delete files
            if added > replaced {
                return Err(FloeError::Validation(format!(
                    "Invalid replace operation: {added} added records > {replaced} replaced records"
                )));
            }
        }

        let previous = summary::previous_summary(&self.base, &self.target_branch);
        let aggregated = summary::aggregate_summary(&delta, &previous, &self.env);

        Ok(Snapshot {
            sequence_number,
            snapshot_id,
            parent_snapshot_id,
            timestamp_ms: Utc::now().timestamp_millis(),
            operation: self.op.operation().to_string(),
            summary: aggregated,
            schema_id: Some(self.base.current_schema_id),
            manifest_list,
            first_row_id,
            added_rows,
        })
    }

    /// Commit the operation, retrying conflicts, and return the committed
    /// snapshot.
    pub async fn commit(mut self) -> FloeResult<Snapshot> {
        let start = Instant::now();
        let mut attempts = 0u32;
        let result = self.try_commit(&mut attempts).await;

        let cleaner = FileCleaner::new(self.io.clone(), self.delete_func.clone());
        match result {
            Ok(committed) => {
                info!(
                    "Committed snapshot {} ({})",
                    committed.snapshot_id, committed.operation
                );
                self.cleanup_after_success(&committed, &cleaner).await;
                self.notify_listeners(
                    &committed,
                    CommitMetrics {
                        attempts,
                        total_duration: start.elapsed(),
                    },
                );
                Ok(committed)
            }
            Err(err @ FloeError::CommitStateUnknown { .. }) => Err(err),
            Err(err) => {
                if !self.strict_cleanup || err.is_cleanable() {
                    self.clean_all(&cleaner).await;
                }
                Err(err)
            }
        }
    }

    async fn try_commit(&mut self, attempts: &mut u32) -> FloeResult<Snapshot> {
        let retries = self.base.config().commit_num_retries();
        let mut backoff = ExponentialBackoff::new(
            self.base.config().commit_min_retry_wait(),
            self.base.config().commit_max_retry_wait(),
            self.base.config().commit_total_retry_time(),
        );

        loop {
            *attempts += 1;
            match self.attempt_commit().await {
                Ok(committed) => return Ok(committed),
                Err(err) if err.is_retryable() && *attempts <= retries => {
                    match backoff.next_delay() {
                        Some(delay) => {
                            debug!(
                                "Retrying commit after conflict (attempt {attempts}): {err}"
                            );
                            sleep(delay).await;
                        }
                        None => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt_commit(&mut self) -> FloeResult<Snapshot> {
        let snapshot = self.apply().await?;

        let mut builder = TableMetadataBuilder::new(&self.base);
        if self.base.snapshot(snapshot.snapshot_id).is_some() {
            // the snapshot already exists, so this is a rollback of the branch
            builder.set_branch_snapshot_id(snapshot.snapshot_id, &self.target_branch);
        } else if self.stage_only {
            builder.add_snapshot(snapshot.clone());
        } else {
            builder.set_branch_snapshot(snapshot.clone(), &self.target_branch);
        }

        if builder.changes().is_empty() {
            // nothing to swap, e.g. a rollback to the current branch head
            return Ok(self.committed_snapshot(&self.base, snapshot));
        }

        // a missing table UUID is minted fresh on every attempt so that a
        // concurrent assignment does not fail this commit
        let updated = builder.build().with_uuid();
        self.ops.commit(&self.base, updated.clone()).await?;
        Ok(self.committed_snapshot(&updated, snapshot))
    }

    /// Resolve the snapshot as stored in the committed metadata.
    ///
    /// For a rollback the branch now points at a pre-existing snapshot whose
    /// manifest list differs from the candidate's, and cleanup must compare
    /// against the stored one.
    fn committed_snapshot(&self, committed: &TableMetadata, candidate: Snapshot) -> Snapshot {
        committed
            .snapshot(candidate.snapshot_id)
            .cloned()
            .unwrap_or(candidate)
    }

    async fn cleanup_after_success(&mut self, committed: &Snapshot, cleaner: &FileCleaner) {
        if self.op.cleanup_after_commit() {
            match committed.all_manifests(&self.io).await {
                Ok(manifests) => {
                    let committed_paths: HashSet<String> = manifests
                        .into_iter()
                        .map(|manifest| manifest.manifest_path)
                        .collect();
                    self.op.clean_uncommitted(&committed_paths, cleaner).await;
                }
                Err(err) => {
                    warn!("Failed to load committed manifest list, skipping further cleanup: {err}");
                    return;
                }
            }
        }
        // manifest lists written by attempts that did not commit are orphans
        for manifest_list in &self.manifest_lists {
            if manifest_list != &committed.manifest_list {
                cleaner.delete(manifest_list).await;
            }
        }
    }

    async fn clean_all(&mut self, cleaner: &FileCleaner) {
        for manifest_list in self.manifest_lists.drain(..) {
            cleaner.delete(&manifest_list).await;
        }
        self.op.clean_uncommitted(&HashSet::new(), cleaner).await;
    }

    fn notify_listeners(&self, committed: &Snapshot, metrics: CommitMetrics) {
        let table_name = self.ops.table_name();
        let Some(event) = self.op.update_event(&table_name, committed) else {
            return;
        };
        for listener in &self.listeners {
            if let Err(err) = listener.notify(&event) {
                warn!("Failed to notify event listener: {err}");
            }
        }
        let report = CommitReport {
            table_name: event.table_name.clone(),
            snapshot_id: event.snapshot_id,
            operation: event.operation.clone(),
            sequence_number: event.sequence_number,
            metadata: self.env.entries().clone(),
            metrics,
        };
        if let Err(err) = self.reporter.report(&report) {
            warn!("Failed to report commit metrics: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::operations::append::FastAppend;
    use crate::manifest::PartitionSpec;
    use crate::ops::memory::InMemoryTableOperations;
    use crate::table::SnapshotRef;

    fn producer_for(base: TableMetadata) -> SnapshotProducer {
        let ops = Arc::new(InMemoryTableOperations::new("t", base));
        SnapshotProducer::new(ops, Box::new(FastAppend::new(PartitionSpec::unpartitioned())))
    }

    #[test]
    fn test_tags_are_rejected_as_targets() {
        let mut base = TableMetadata::new("memory://t");
        base.refs.insert("v1".to_string(), SnapshotRef::tag(1));

        let err = match producer_for(base).for_branch("v1") {
            Err(err) => err,
            Ok(_) => panic!("expected targeting a tag to fail"),
        };
        assert!(matches!(err, FloeError::Validation(_)));
    }

    #[test]
    fn test_new_branch_names_are_accepted() {
        let base = TableMetadata::new("memory://t");
        assert!(producer_for(base).for_branch("audit").is_ok());
    }

    #[test]
    #[should_panic(expected = "Cannot set delete callback more than once")]
    fn test_delete_callback_can_only_be_set_once() {
        let base = TableMetadata::new("memory://t");
        let noop: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(|_| {});
        producer_for(base)
            .delete_with(noop.clone())
            .delete_with(noop);
    }

    #[test]
    fn test_snapshot_id_is_stable() {
        let base = TableMetadata::new("memory://t");
        let mut producer = producer_for(base);
        let first = producer.snapshot_id();
        assert_eq!(producer.snapshot_id(), first);
    }
}
