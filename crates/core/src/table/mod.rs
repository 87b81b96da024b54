//! Table metadata: snapshots, refs and the metadata builder
//!
//! [`TableMetadata`] is the immutable state a producer works against. One
//! instance is held per commit attempt and refreshed between attempts; the
//! compare-and-swap on the current metadata lives behind
//! [`TableOperations`](crate::ops::TableOperations). Mutations go through
//! [`TableMetadataBuilder`], which records typed [`MetadataUpdate`]s so that
//! the commit driver can recognize updates with no effective change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::FloeResult;
use crate::manifest::{read_manifest_list, ManifestFile, PartitionSpec};
use crate::storage::FileIo;

pub mod config;

pub use config::TableConfig;

/// Name of the conventional default branch.
pub const MAIN_BRANCH: &str = "main";

/// Whether a named ref is a mutable branch or an immutable tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    /// A mutable pointer that producers may move
    Branch,
    /// An immutable pointer; never a commit target
    Tag,
}

/// A named pointer to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    /// The snapshot the ref points to
    pub snapshot_id: i64,
    /// Branch or tag
    pub kind: RefKind,
}

impl SnapshotRef {
    /// A branch ref pointing at `snapshot_id`.
    pub fn branch(snapshot_id: i64) -> Self {
        Self {
            snapshot_id,
            kind: RefKind::Branch,
        }
    }

    /// A tag ref pointing at `snapshot_id`.
    pub fn tag(snapshot_id: i64) -> Self {
        Self {
            snapshot_id,
            kind: RefKind::Tag,
        }
    }

    /// Whether this ref is a branch.
    pub fn is_branch(&self) -> bool {
        self.kind == RefKind::Branch
    }
}

/// An immutable named state of the table's file set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Per-commit scalar ordering snapshots
    pub sequence_number: i64,
    /// Unique identifier of the snapshot
    pub snapshot_id: i64,
    /// Snapshot this one was derived from, if any
    pub parent_snapshot_id: Option<i64>,
    /// Commit wall-clock time in epoch milliseconds
    pub timestamp_ms: i64,
    /// Operation that produced the snapshot, e.g. `append`
    pub operation: String,
    /// Summary of the changes and the resulting totals
    pub summary: HashMap<String, String>,
    /// Schema the snapshot was written with
    pub schema_id: Option<i32>,
    /// Location of the snapshot's manifest list
    pub manifest_list: String,
    /// First row id assigned by this snapshot (format v3)
    pub first_row_id: Option<i64>,
    /// Number of rows assigned ids by this snapshot (format v3)
    pub added_rows: Option<i64>,
}

impl Snapshot {
    /// Read all manifests constituting this snapshot from its manifest list.
    pub async fn all_manifests(&self, io: &FileIo) -> FloeResult<Vec<ManifestFile>> {
        read_manifest_list(io, &self.manifest_list).await
    }
}

/// The metadata of a floe table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Version of the table format
    pub format_version: u8,
    /// Unique identifier of the table; minted on first commit when absent
    pub table_uuid: Option<Uuid>,
    /// Root location of the table
    pub location: String,
    /// Highest sequence number committed so far
    pub last_sequence_number: i64,
    /// Next row id to assign (format v3)
    pub next_row_id: i64,
    /// Wall-clock time of the last metadata update in epoch milliseconds
    pub last_updated_ms: i64,
    /// Identifier of the current schema
    pub current_schema_id: i32,
    /// Named refs of the table
    pub refs: HashMap<String, SnapshotRef>,
    /// All live snapshots
    pub snapshots: Vec<Snapshot>,
    /// Partition specs, addressed by spec id
    pub partition_specs: Vec<PartitionSpec>,
    /// Identifier of the default partition spec
    pub default_spec_id: i32,
    /// Table properties
    pub properties: HashMap<String, String>,
}

impl TableMetadata {
    /// Empty format v2 metadata for a table at `location`.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            format_version: 2,
            table_uuid: None,
            location: location.into(),
            last_sequence_number: 0,
            next_row_id: 0,
            last_updated_ms: 0,
            current_schema_id: 0,
            refs: HashMap::new(),
            snapshots: Vec::new(),
            partition_specs: vec![PartitionSpec::unpartitioned()],
            default_spec_id: 0,
            properties: HashMap::new(),
        }
    }

    /// Set the format version.
    pub fn with_format_version(mut self, format_version: u8) -> Self {
        self.format_version = format_version;
        self
    }

    /// Set a table property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Well known configuration backed by the table properties.
    pub fn config(&self) -> TableConfig<'_> {
        TableConfig(&self.properties)
    }

    /// Look up a snapshot by id.
    pub fn snapshot(&self, snapshot_id: i64) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .find(|snapshot| snapshot.snapshot_id == snapshot_id)
    }

    /// Look up a ref by name.
    pub fn reference(&self, name: &str) -> Option<&SnapshotRef> {
        self.refs.get(name)
    }

    /// The snapshot a branch currently points to, if the branch exists.
    pub fn latest_snapshot(&self, branch: &str) -> Option<&Snapshot> {
        self.refs
            .get(branch)
            .and_then(|reference| self.snapshot(reference.snapshot_id))
    }

    /// The snapshot the `main` branch points to, if any.
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.latest_snapshot(MAIN_BRANCH)
    }

    /// Sequence number the next commit will use.
    ///
    /// Format v1 tables do not track sequence numbers and always use 0.
    pub fn next_sequence_number(&self) -> i64 {
        if self.format_version >= 2 {
            self.last_sequence_number + 1
        } else {
            0
        }
    }

    /// Look up a partition spec by id.
    pub fn spec(&self, spec_id: i32) -> Option<&PartitionSpec> {
        self.partition_specs
            .iter()
            .find(|spec| spec.spec_id == spec_id)
    }

    /// The default partition spec of the table.
    pub fn default_spec(&self) -> &PartitionSpec {
        self.spec(self.default_spec_id)
            .unwrap_or(&self.partition_specs[0])
    }
}

/// A recorded change applied by [`TableMetadataBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataUpdate {
    /// A snapshot was added to the snapshot set
    AddSnapshot {
        /// Identifier of the added snapshot
        snapshot_id: i64,
    },
    /// A branch head was moved
    SetBranchSnapshot {
        /// The moved branch
        branch: String,
        /// New head of the branch
        snapshot_id: i64,
    },
}

/// Builds updated metadata from a base, tracking effective changes.
pub struct TableMetadataBuilder {
    metadata: TableMetadata,
    changes: Vec<MetadataUpdate>,
}

impl TableMetadataBuilder {
    /// Start building from `base`.
    pub fn new(base: &TableMetadata) -> Self {
        Self {
            metadata: base.clone(),
            changes: Vec::new(),
        }
    }

    /// Add `snapshot` without moving any ref (a staged snapshot).
    pub fn add_snapshot(&mut self, snapshot: Snapshot) -> &mut Self {
        self.changes.push(MetadataUpdate::AddSnapshot {
            snapshot_id: snapshot.snapshot_id,
        });
        self.metadata.last_sequence_number = self
            .metadata
            .last_sequence_number
            .max(snapshot.sequence_number);
        self.metadata.last_updated_ms = snapshot.timestamp_ms;
        if self.metadata.format_version >= 3 {
            self.metadata.next_row_id += snapshot.added_rows.unwrap_or(0);
        }
        self.metadata.snapshots.push(snapshot);
        self
    }

    /// Add `snapshot` and point `branch` at it.
    pub fn set_branch_snapshot(&mut self, snapshot: Snapshot, branch: &str) -> &mut Self {
        let snapshot_id = snapshot.snapshot_id;
        self.add_snapshot(snapshot);
        self.set_ref(branch, snapshot_id);
        self
    }

    /// Point `branch` at the existing snapshot `snapshot_id` (a rollback).
    ///
    /// Recording no change when the branch already points at the target keeps
    /// repeated rollbacks from producing empty commits.
    pub fn set_branch_snapshot_id(&mut self, snapshot_id: i64, branch: &str) -> &mut Self {
        let unchanged = self
            .metadata
            .refs
            .get(branch)
            .map(|reference| reference.snapshot_id == snapshot_id)
            .unwrap_or(false);
        if !unchanged {
            self.set_ref(branch, snapshot_id);
        }
        self
    }

    fn set_ref(&mut self, branch: &str, snapshot_id: i64) {
        self.changes.push(MetadataUpdate::SetBranchSnapshot {
            branch: branch.to_string(),
            snapshot_id,
        });
        self.metadata
            .refs
            .insert(branch.to_string(), SnapshotRef::branch(snapshot_id));
    }

    /// The changes recorded so far.
    pub fn changes(&self) -> &[MetadataUpdate] {
        &self.changes
    }

    /// Finish building and return the updated metadata.
    pub fn build(self) -> TableMetadata {
        self.metadata
    }
}

impl TableMetadata {
    /// Return a copy with a table UUID assigned if none is set.
    pub fn with_uuid(mut self) -> Self {
        if self.table_uuid.is_none() {
            self.table_uuid = Some(Uuid::new_v4());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: i64, sequence_number: i64) -> Snapshot {
        Snapshot {
            sequence_number,
            snapshot_id: id,
            parent_snapshot_id: None,
            timestamp_ms: 1_700_000_000_000,
            operation: "append".to_string(),
            summary: HashMap::new(),
            schema_id: Some(0),
            manifest_list: format!("metadata/snap-{id}-1-test.avro"),
            first_row_id: None,
            added_rows: None,
        }
    }

    #[test]
    fn test_branch_lineage() {
        let mut base = TableMetadata::new("memory://t");
        base.snapshots.push(snapshot(1, 1));
        base.refs.insert(MAIN_BRANCH.to_string(), SnapshotRef::branch(1));

        assert_eq!(base.current_snapshot().unwrap().snapshot_id, 1);
        assert!(base.latest_snapshot("other").is_none());
        assert_eq!(base.next_sequence_number(), 2);
    }

    #[test]
    fn test_v1_sequence_numbers_stay_zero() {
        let base = TableMetadata::new("memory://t").with_format_version(1);
        assert_eq!(base.next_sequence_number(), 0);
    }

    #[test]
    fn test_builder_records_changes() {
        let base = TableMetadata::new("memory://t");
        let mut builder = TableMetadataBuilder::new(&base);
        builder.set_branch_snapshot(snapshot(7, 1), MAIN_BRANCH);
        assert_eq!(builder.changes().len(), 2);

        let updated = builder.build();
        assert_eq!(updated.reference(MAIN_BRANCH).unwrap().snapshot_id, 7);
        assert_eq!(updated.last_sequence_number, 1);
    }

    #[test]
    fn test_rollback_to_current_head_is_no_change() {
        let mut base = TableMetadata::new("memory://t");
        base.snapshots.push(snapshot(1, 1));
        base.refs.insert(MAIN_BRANCH.to_string(), SnapshotRef::branch(1));

        let mut builder = TableMetadataBuilder::new(&base);
        builder.set_branch_snapshot_id(1, MAIN_BRANCH);
        assert!(builder.changes().is_empty());
    }

    #[test]
    fn test_staged_snapshot_leaves_refs_untouched() {
        let base = TableMetadata::new("memory://t");
        let mut builder = TableMetadataBuilder::new(&base);
        builder.add_snapshot(snapshot(9, 1));

        let updated = builder.build();
        assert!(updated.reference(MAIN_BRANCH).is_none());
        assert!(updated.snapshot(9).is_some());
    }

    #[test]
    fn test_with_uuid_mints_once() {
        let minted = TableMetadata::new("memory://t").with_uuid();
        let uuid = minted.table_uuid;
        assert!(uuid.is_some());
        assert_eq!(minted.clone().with_uuid().table_uuid, uuid);
    }

    #[test]
    fn test_v3_row_id_advances_with_snapshots() {
        let mut base = TableMetadata::new("memory://t").with_format_version(3);
        base.next_row_id = 10;

        let mut builder = TableMetadataBuilder::new(&base);
        let mut added = snapshot(2, 1);
        added.first_row_id = Some(10);
        added.added_rows = Some(25);
        builder.set_branch_snapshot(added, MAIN_BRANCH);

        assert_eq!(builder.build().next_row_id, 35);
    }
}
