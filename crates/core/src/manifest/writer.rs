//! Writers for manifest files
//!
//! [`ManifestWriter`] buffers entries for a single Avro manifest and uploads
//! it on close. [`RollingManifestWriter`] starts a fresh manifest whenever the
//! current one reaches the configured target size, so callers can stream an
//! arbitrary number of files through one writer and collect the completed
//! [`ManifestFile`]s afterwards. [`ManifestWriterFactory`] mints writers bound
//! to one commit: all manifests of a producer share its commit UUID and a
//! process-internal counter (`<commitUUID>-m<index>.avro`).

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, LazyLock};

use apache_avro::{Schema, Writer};
use uuid::Uuid;

use super::{
    DataFile, ManifestContent, ManifestEntry, ManifestEntryStatus, ManifestFile, PartitionSpec,
    PartitionSummary, UNASSIGNED_SEQUENCE_NUMBER,
};
use crate::errors::FloeResult;
use crate::ops::TableOperationsRef;
use crate::storage::FileIo;

pub(crate) static MANIFEST_ENTRY_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::parse_str(
        r#"{
            "type": "record",
            "name": "manifest_entry",
            "fields": [
                {"name": "status", "type": "int"},
                {"name": "snapshot_id", "type": ["null", "long"], "default": null},
                {"name": "sequence_number", "type": ["null", "long"], "default": null},
                {"name": "data_file", "type": {
                    "type": "record",
                    "name": "data_file",
                    "fields": [
                        {"name": "content", "type": "int"},
                        {"name": "file_path", "type": "string"},
                        {"name": "file_format", "type": "string"},
                        {"name": "partition", "type": {"type": "array", "items": ["null", "string"]}},
                        {"name": "record_count", "type": "long"},
                        {"name": "file_size_in_bytes", "type": "long"}
                    ]
                }}
            ]
        }"#,
    )
    .expect("manifest entry schema is valid")
});

/// Writer for a single manifest file.
///
/// Entries are buffered in memory and uploaded as one Avro object on
/// [`close`](Self::close). The returned [`ManifestFile`] carries
/// [`UNASSIGNED_SEQUENCE_NUMBER`]; the manifest list writer fills in the
/// commit's sequence number when the snapshot is finalized.
pub struct ManifestWriter {
    io: FileIo,
    path: String,
    content: ManifestContent,
    snapshot_id: i64,
    inherit_ids: bool,
    avro: Writer<'static, Vec<u8>>,
    length: u64,
    added_files: i32,
    added_rows: i64,
    existing_files: i32,
    existing_rows: i64,
    deleted_files: i32,
    deleted_rows: i64,
    min_sequence_number: Option<i64>,
    partition_spec_id: i32,
    partitions: PartitionSummary,
}

impl ManifestWriter {
    /// Create a writer uploading to `path` on close.
    ///
    /// When `inherit_ids` is set, entry snapshot ids are left unassigned and
    /// readers inherit them from the manifest's owning snapshot.
    pub fn new(
        io: FileIo,
        path: String,
        content: ManifestContent,
        spec: &PartitionSpec,
        snapshot_id: i64,
        inherit_ids: bool,
    ) -> Self {
        Self {
            io,
            path,
            content,
            snapshot_id,
            inherit_ids,
            avro: Writer::new(&MANIFEST_ENTRY_SCHEMA, Vec::new()),
            length: 0,
            added_files: 0,
            added_rows: 0,
            existing_files: 0,
            existing_rows: 0,
            deleted_files: 0,
            deleted_rows: 0,
            min_sequence_number: None,
            partition_spec_id: spec.spec_id,
            partitions: PartitionSummary::new(spec),
        }
    }

    /// Add a file to the manifest with status `Added` and no explicit
    /// sequence number; readers infer it from the containing snapshot.
    pub fn add(&mut self, file: DataFile) -> FloeResult<()> {
        let snapshot_id = self.entry_snapshot_id();
        self.append(ManifestEntry {
            status: ManifestEntryStatus::Added,
            snapshot_id,
            sequence_number: None,
            data_file: file,
        })
    }

    /// Add a file to the manifest with status `Added` at an explicit data
    /// sequence number.
    pub fn add_with_sequence(&mut self, file: DataFile, sequence_number: i64) -> FloeResult<()> {
        let snapshot_id = self.entry_snapshot_id();
        self.append(ManifestEntry {
            status: ManifestEntryStatus::Added,
            snapshot_id,
            sequence_number: Some(sequence_number),
            data_file: file,
        })
    }

    /// Carry a file forward from an earlier snapshot.
    pub fn existing(
        &mut self,
        file: DataFile,
        snapshot_id: Option<i64>,
        sequence_number: Option<i64>,
    ) -> FloeResult<()> {
        self.append(ManifestEntry {
            status: ManifestEntryStatus::Existing,
            snapshot_id,
            sequence_number,
            data_file: file,
        })
    }

    /// Mark a file as removed by the owning snapshot.
    pub fn delete(&mut self, file: DataFile, sequence_number: Option<i64>) -> FloeResult<()> {
        let snapshot_id = self.entry_snapshot_id();
        self.append(ManifestEntry {
            status: ManifestEntryStatus::Deleted,
            snapshot_id,
            sequence_number,
            data_file: file,
        })
    }

    fn entry_snapshot_id(&self) -> Option<i64> {
        if self.inherit_ids {
            None
        } else {
            Some(self.snapshot_id)
        }
    }

    fn append(&mut self, entry: ManifestEntry) -> FloeResult<()> {
        match entry.status {
            ManifestEntryStatus::Added => {
                self.added_files += 1;
                self.added_rows += entry.data_file.record_count;
            }
            ManifestEntryStatus::Existing => {
                self.existing_files += 1;
                self.existing_rows += entry.data_file.record_count;
            }
            ManifestEntryStatus::Deleted => {
                self.deleted_files += 1;
                self.deleted_rows += entry.data_file.record_count;
            }
        }
        if let Some(sequence) = entry.sequence_number {
            self.min_sequence_number = Some(match self.min_sequence_number {
                Some(min) => min.min(sequence),
                None => sequence,
            });
        }
        self.partitions.update(&entry.data_file.partition);

        self.length += self.avro.append_ser(&entry)? as u64;
        self.length += self.avro.flush()? as u64;
        Ok(())
    }

    /// Approximate byte length of the manifest written so far.
    pub fn bytes_written(&self) -> u64 {
        self.length
    }

    /// Upload the manifest and describe it for a manifest list.
    pub async fn close(self) -> FloeResult<ManifestFile> {
        let buffer = self.avro.into_inner()?;
        let stored = self.io.put(&self.path, buffer.into()).await?;

        Ok(ManifestFile {
            manifest_path: self.path,
            manifest_length: stored as i64,
            partition_spec_id: self.partition_spec_id,
            content: self.content,
            sequence_number: UNASSIGNED_SEQUENCE_NUMBER,
            min_sequence_number: self
                .min_sequence_number
                .unwrap_or(UNASSIGNED_SEQUENCE_NUMBER),
            added_snapshot_id: Some(self.snapshot_id),
            added_files_count: self.added_files,
            existing_files_count: self.existing_files,
            deleted_files_count: self.deleted_files,
            added_rows_count: self.added_rows,
            existing_rows_count: self.existing_rows,
            deleted_rows_count: self.deleted_rows,
            partitions: self.partitions.summaries(),
            first_row_id: None,
        })
    }
}

/// Mints [`ManifestWriter`]s bound to one producer's commit.
#[derive(Clone)]
pub struct ManifestWriterFactory {
    ops: TableOperationsRef,
    io: FileIo,
    commit_uuid: Uuid,
    manifest_count: Arc<AtomicI32>,
    snapshot_id: i64,
    inherit_ids: bool,
    target_size_bytes: u64,
}

impl ManifestWriterFactory {
    pub(crate) fn new(
        ops: TableOperationsRef,
        io: FileIo,
        commit_uuid: Uuid,
        manifest_count: Arc<AtomicI32>,
        snapshot_id: i64,
        inherit_ids: bool,
        target_size_bytes: u64,
    ) -> Self {
        Self {
            ops,
            io,
            commit_uuid,
            manifest_count,
            snapshot_id,
            inherit_ids,
            target_size_bytes,
        }
    }

    fn next_manifest_path(&self) -> String {
        let index = self.manifest_count.fetch_add(1, Ordering::SeqCst);
        self.ops
            .metadata_file_location(&format!("{}-m{index}.avro", self.commit_uuid))
    }

    /// Create a writer for a single manifest of the given content kind.
    pub fn new_manifest_writer(
        &self,
        content: ManifestContent,
        spec: &PartitionSpec,
    ) -> ManifestWriter {
        ManifestWriter::new(
            self.io.clone(),
            self.next_manifest_path(),
            content,
            spec,
            self.snapshot_id,
            self.inherit_ids,
        )
    }

    /// Create a size-bounded rolling writer for data manifests.
    pub fn new_rolling_data_writer(&self, spec: &PartitionSpec) -> RollingManifestWriter {
        RollingManifestWriter::new(self.clone(), ManifestContent::Data, spec.clone())
    }

    /// Create a size-bounded rolling writer for delete manifests.
    pub fn new_rolling_delete_writer(&self, spec: &PartitionSpec) -> RollingManifestWriter {
        RollingManifestWriter::new(self.clone(), ManifestContent::Deletes, spec.clone())
    }
}

impl std::fmt::Debug for ManifestWriterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestWriterFactory")
            .field("commit_uuid", &self.commit_uuid)
            .field("snapshot_id", &self.snapshot_id)
            .finish_non_exhaustive()
    }
}

/// A manifest writer that rolls to a fresh file once the current one reaches
/// the configured target size.
///
/// The underlying writer is created lazily on the first entry, so closing a
/// rolling writer that never received a file produces no manifests.
pub struct RollingManifestWriter {
    factory: ManifestWriterFactory,
    content: ManifestContent,
    spec: PartitionSpec,
    target_size_bytes: u64,
    current: Option<ManifestWriter>,
    completed: Vec<ManifestFile>,
}

impl RollingManifestWriter {
    fn new(factory: ManifestWriterFactory, content: ManifestContent, spec: PartitionSpec) -> Self {
        let target_size_bytes = factory.target_size_bytes;
        Self {
            factory,
            content,
            spec,
            target_size_bytes,
            current: None,
            completed: Vec::new(),
        }
    }

    /// Add a file with status `Added`, rolling over afterwards if needed.
    pub async fn add(&mut self, file: DataFile) -> FloeResult<()> {
        self.writer().add(file)?;
        self.maybe_roll().await
    }

    /// Add a file with status `Added` at an explicit data sequence number.
    pub async fn add_with_sequence(&mut self, file: DataFile, sequence_number: i64) -> FloeResult<()> {
        self.writer().add_with_sequence(file, sequence_number)?;
        self.maybe_roll().await
    }

    /// Carry a file forward from an earlier snapshot.
    pub async fn existing(
        &mut self,
        file: DataFile,
        snapshot_id: Option<i64>,
        sequence_number: Option<i64>,
    ) -> FloeResult<()> {
        self.writer().existing(file, snapshot_id, sequence_number)?;
        self.maybe_roll().await
    }

    /// Mark a file as removed by the owning snapshot.
    pub async fn delete(&mut self, file: DataFile, sequence_number: Option<i64>) -> FloeResult<()> {
        self.writer().delete(file, sequence_number)?;
        self.maybe_roll().await
    }

    fn writer(&mut self) -> &mut ManifestWriter {
        self.current.get_or_insert_with(|| {
            self.factory
                .new_manifest_writer(self.content, &self.spec)
        })
    }

    async fn maybe_roll(&mut self) -> FloeResult<()> {
        let should_roll = self
            .current
            .as_ref()
            .map(|writer| writer.bytes_written() >= self.target_size_bytes)
            .unwrap_or(false);
        if should_roll {
            if let Some(writer) = self.current.take() {
                self.completed.push(writer.close().await?);
            }
        }
        Ok(())
    }

    /// Close the current manifest and return all completed manifests in
    /// append order.
    pub async fn close(mut self) -> FloeResult<Vec<ManifestFile>> {
        if let Some(writer) = self.current.take() {
            self.completed.push(writer.close().await?);
        }
        Ok(self.completed)
    }
}
