//! High level operations producing new table snapshots
//!
//! Concrete operations implement [`SnapshotOperation`] — the only variation
//! point of the commit pipeline — and are driven by
//! [`SnapshotProducer`](transaction::SnapshotProducer). An operation decides
//! which manifests constitute the new snapshot; the producer owns everything
//! around that: manifest-list writing, summary aggregation, the optimistic
//! retry loop and cleanup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::FloeResult;
use crate::events::CreateSnapshotEvent;
use crate::manifest::{ManifestFile, ManifestWriterFactory};
use crate::storage::FileIo;
use crate::table::{Snapshot, TableMetadata};

pub mod append;
pub mod replace;
pub mod rollback;
pub mod transaction;

/// Operation strings recorded on snapshots.
pub mod operation {
    /// Only data files were added
    pub const APPEND: &str = "append";
    /// Files were replaced without changing table content
    pub const REPLACE: &str = "replace";
    /// Table content was overwritten
    pub const OVERWRITE: &str = "overwrite";
    /// Data was removed from the table
    pub const DELETE: &str = "delete";
    /// A branch was moved back to an earlier snapshot
    pub const ROLLBACK: &str = "rollback";
}

/// Deletes files on behalf of cleanup paths.
///
/// Routes through the producer's delete callback when one was installed via
/// `delete_with`, otherwise deletes through the table's [`FileIo`]. Failures
/// are logged and swallowed; cleanup never fails a commit outcome.
#[derive(Clone)]
pub struct FileCleaner {
    io: FileIo,
    custom: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl FileCleaner {
    pub(crate) fn new(io: FileIo, custom: Option<Arc<dyn Fn(&str) + Send + Sync>>) -> Self {
        Self { io, custom }
    }

    /// Delete the file at `path`, logging failures instead of returning them.
    pub async fn delete(&self, path: &str) {
        match &self.custom {
            Some(delete_func) => delete_func(path),
            None => {
                if let Err(err) = self.io.delete_with_retries(path, 3).await {
                    warn!("Failed to delete uncommitted file {path}: {err}");
                }
            }
        }
    }
}

/// Everything an operation needs to write manifests for one commit attempt.
pub struct ApplyContext {
    factory: ManifestWriterFactory,
    io: FileIo,
    worker_pool_size: usize,
    snapshot_id: i64,
}

impl ApplyContext {
    pub(crate) fn new(
        factory: ManifestWriterFactory,
        io: FileIo,
        worker_pool_size: usize,
        snapshot_id: i64,
    ) -> Self {
        Self {
            factory,
            io,
            worker_pool_size,
            snapshot_id,
        }
    }

    /// Factory minting manifest writers bound to this commit.
    pub fn writer_factory(&self) -> &ManifestWriterFactory {
        &self.factory
    }

    /// File input and output for the table.
    pub fn io(&self) -> &FileIo {
        &self.io
    }

    /// Size of the worker pool available for parallel writes.
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    /// The snapshot id this commit will use.
    pub fn snapshot_id(&self) -> i64 {
        self.snapshot_id
    }
}

/// The contract concrete snapshot-producing operations plug into.
///
/// Implementations must be deterministic modulo their inputs and must not
/// mutate base metadata. They may reuse manifests written by earlier attempts
/// of the same commit, as long as `clean_uncommitted` removes everything that
/// did not end up in the committed snapshot.
#[async_trait]
pub trait SnapshotOperation: Send + Sync {
    /// The operation string recorded on the snapshot, e.g.
    /// [`operation::APPEND`].
    fn operation(&self) -> &str;

    /// An existing snapshot id this operation re-commits.
    ///
    /// Rollback-style operations return the id of their target snapshot; the
    /// commit driver then moves the branch instead of adding a snapshot.
    /// `None` lets the producer assign a fresh id.
    fn pinned_snapshot_id(&self) -> Option<i64> {
        None
    }

    /// Validate the refreshed base metadata before applying changes.
    fn validate(&self, _base: &TableMetadata, _parent: Option<&Snapshot>) -> FloeResult<()> {
        Ok(())
    }

    /// Produce the ordered manifests of the new snapshot.
    async fn apply(
        &mut self,
        base: &TableMetadata,
        parent: Option<&Snapshot>,
        ctx: &ApplyContext,
    ) -> FloeResult<Vec<ManifestFile>>;

    /// The summary of changes this operation makes, e.g. added record counts.
    fn summary(&self) -> HashMap<String, String>;

    /// Remove manifests written by this operation that were not committed.
    ///
    /// `committed` holds the paths of all manifests reachable from the
    /// committed snapshot; an empty set means nothing was committed.
    async fn clean_uncommitted(&mut self, committed: &HashSet<String>, cleaner: &FileCleaner);

    /// Whether uncommitted manifests should be reclaimed right after a
    /// successful commit.
    fn cleanup_after_commit(&self) -> bool {
        true
    }

    /// The event broadcast to listeners after a successful commit. Return
    /// `None` to suppress notification and reporting.
    fn update_event(&self, table_name: &str, snapshot: &Snapshot) -> Option<CreateSnapshotEvent> {
        Some(CreateSnapshotEvent {
            table_name: table_name.to_string(),
            operation: snapshot.operation.clone(),
            snapshot_id: snapshot.snapshot_id,
            sequence_number: snapshot.sequence_number,
            summary: snapshot.summary.clone(),
        })
    }
}
