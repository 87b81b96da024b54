//! Table metadata persistence interface
//!
//! [`TableOperations`] is the narrow surface the snapshot producer consumes to
//! read and swap table metadata. The correctness of the commit protocol is
//! predicated on the compare-and-swap guarantee of `commit`: a call must
//! either atomically replace the current metadata (only when it still equals
//! the base the caller read), fail with
//! [`FloeError::CommitConflict`](crate::FloeError::CommitConflict) when it no
//! longer does, or fail with
//! [`FloeError::CommitStateUnknown`](crate::FloeError::CommitStateUnknown)
//! when the outcome cannot be determined. Catalog integrations implement this
//! trait; the crate only ships the in-memory implementation in [`memory`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::FloeResult;
use crate::storage::{FileEncryptor, FileIo, PassthroughEncryptor};
use crate::table::TableMetadata;

pub mod memory;

/// Sharable reference to [`TableOperations`]
pub type TableOperationsRef = Arc<dyn TableOperations>;

/// Persistence operations for the metadata of one table.
#[async_trait]
pub trait TableOperations: Send + Sync {
    /// Name of the table, used in commit reports.
    fn table_name(&self) -> String;

    /// The most recently loaded metadata.
    fn current(&self) -> TableMetadata;

    /// Reload and return the current metadata.
    async fn refresh(&self) -> FloeResult<TableMetadata>;

    /// Atomically replace `base` with `updated`.
    ///
    /// Implementations must fail with a conflict when the current metadata no
    /// longer equals `base`, and with an unknown-state error when the outcome
    /// of the swap cannot be determined.
    async fn commit(&self, base: &TableMetadata, updated: TableMetadata) -> FloeResult<()>;

    /// File input and output for the table's storage.
    fn io(&self) -> FileIo;

    /// The encryption applied to files written for this table.
    fn encryption(&self) -> Arc<dyn FileEncryptor> {
        Arc::new(PassthroughEncryptor)
    }

    /// Fully qualified location for a new metadata file with the given name.
    fn metadata_file_location(&self, name: &str) -> String;

    /// Generate a snapshot id candidate.
    fn new_snapshot_id(&self) -> i64;

    /// Whether cleanup after a failed commit is restricted to errors that are
    /// known to leave storage in a consistent state.
    fn require_strict_cleanup(&self) -> bool {
        false
    }
}
