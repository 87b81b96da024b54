//! Manifests track the data and delete files that constitute a snapshot
//!
//! A manifest is an Avro file of [`ManifestEntry`] records, each pairing a
//! [`DataFile`] with a status and the snapshot that added or removed it. A
//! manifest list is an Avro file of [`ManifestFile`] records describing the
//! manifests of one snapshot. Writers for both live in [`writer`] and [`list`];
//! [`reader`] decodes manifests back into entries.

use serde::{Deserialize, Serialize};

pub mod list;
pub mod reader;
pub mod writer;

pub use list::{read_manifest_list, ManifestListWriter};
pub use reader::read_manifest;
pub use writer::{ManifestWriter, ManifestWriterFactory, RollingManifestWriter};

/// Sequence number of manifests written before their snapshot is committed.
///
/// The manifest list writer replaces this with the commit's sequence number
/// when the manifest is appended.
pub const UNASSIGNED_SEQUENCE_NUMBER: i64 = -1;

/// The kind of files a manifest tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ManifestContent {
    /// Data files
    Data,
    /// Position or equality delete files
    Deletes,
}

impl From<ManifestContent> for i32 {
    fn from(content: ManifestContent) -> Self {
        match content {
            ManifestContent::Data => 0,
            ManifestContent::Deletes => 1,
        }
    }
}

impl TryFrom<i32> for ManifestContent {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ManifestContent::Data),
            1 => Ok(ManifestContent::Deletes),
            other => Err(format!("invalid manifest content: {other}")),
        }
    }
}

/// The content stored in a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum FileContent {
    /// Rows of table data
    Data,
    /// Deletes identified by file path and position
    PositionDeletes,
    /// Deletes identified by column equality
    EqualityDeletes,
}

impl From<FileContent> for i32 {
    fn from(content: FileContent) -> Self {
        match content {
            FileContent::Data => 0,
            FileContent::PositionDeletes => 1,
            FileContent::EqualityDeletes => 2,
        }
    }
}

impl TryFrom<i32> for FileContent {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FileContent::Data),
            1 => Ok(FileContent::PositionDeletes),
            2 => Ok(FileContent::EqualityDeletes),
            other => Err(format!("invalid file content: {other}")),
        }
    }
}

/// Status of a manifest entry relative to the snapshot that wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ManifestEntryStatus {
    /// Carried forward from an earlier snapshot
    Existing,
    /// Added by the owning snapshot
    Added,
    /// Removed by the owning snapshot
    Deleted,
}

impl From<ManifestEntryStatus> for i32 {
    fn from(status: ManifestEntryStatus) -> Self {
        match status {
            ManifestEntryStatus::Existing => 0,
            ManifestEntryStatus::Added => 1,
            ManifestEntryStatus::Deleted => 2,
        }
    }
}

impl TryFrom<i32> for ManifestEntryStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ManifestEntryStatus::Existing),
            1 => Ok(ManifestEntryStatus::Added),
            2 => Ok(ManifestEntryStatus::Deleted),
            other => Err(format!("invalid manifest entry status: {other}")),
        }
    }
}

/// A single field of a [`PartitionSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionField {
    /// Identifier of the field, stable across spec evolution
    pub field_id: i32,
    /// Name of the field
    pub name: String,
}

/// How data files of a table are split into partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Identifier of this spec within the table
    pub spec_id: i32,
    /// Partition fields, in partition-tuple order
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// The spec of an unpartitioned table.
    pub fn unpartitioned() -> Self {
        Self {
            spec_id: 0,
            fields: Vec::new(),
        }
    }

    /// Whether this spec has no partition fields.
    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A data or delete file tracked by a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    /// What the file stores
    pub content: FileContent,
    /// Fully qualified path of the file
    pub file_path: String,
    /// Format of the file, e.g. `parquet`
    pub file_format: String,
    /// Partition tuple, aligned with the partition spec fields
    pub partition: Vec<Option<String>>,
    /// Number of rows (or delete records) in the file
    pub record_count: i64,
    /// Total byte size of the file
    pub file_size_in_bytes: i64,
}

impl DataFile {
    /// A data file with an empty partition tuple.
    pub fn data(path: impl Into<String>, record_count: i64, file_size_in_bytes: i64) -> Self {
        Self {
            content: FileContent::Data,
            file_path: path.into(),
            file_format: "parquet".to_string(),
            partition: Vec::new(),
            record_count,
            file_size_in_bytes,
        }
    }

    /// A position-delete file with an empty partition tuple.
    pub fn position_deletes(
        path: impl Into<String>,
        record_count: i64,
        file_size_in_bytes: i64,
    ) -> Self {
        Self {
            content: FileContent::PositionDeletes,
            ..Self::data(path, record_count, file_size_in_bytes)
        }
    }

    /// Set the partition tuple of this file.
    pub fn with_partition(mut self, partition: Vec<Option<String>>) -> Self {
        self.partition = partition;
        self
    }
}

/// One record of a manifest file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Whether the file is added, existing or deleted
    pub status: ManifestEntryStatus,
    /// Snapshot that added or removed the file; readers inherit the
    /// manifest's owning snapshot id when unset
    pub snapshot_id: Option<i64>,
    /// Sequence number the file was added at; readers inherit the commit's
    /// sequence number when unset
    pub sequence_number: Option<i64>,
    /// The tracked file
    pub data_file: DataFile,
}

/// Value ranges and null counts of one partition field across a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFieldSummary {
    /// Whether any tracked file has a null value for the field
    pub contains_null: bool,
    /// Smallest partition value seen
    pub lower_bound: Option<String>,
    /// Largest partition value seen
    pub upper_bound: Option<String>,
}

/// Description of one manifest within a manifest list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path of the manifest file
    pub manifest_path: String,
    /// Byte length of the manifest file
    pub manifest_length: i64,
    /// Partition spec its entries were written with
    pub partition_spec_id: i32,
    /// Whether it tracks data or delete files
    pub content: ManifestContent,
    /// Sequence number of the commit that added the manifest
    pub sequence_number: i64,
    /// Smallest data sequence number of any live entry
    pub min_sequence_number: i64,
    /// Snapshot that added the manifest; `None` until enriched
    pub added_snapshot_id: Option<i64>,
    /// Number of entries with status `Added`
    pub added_files_count: i32,
    /// Number of entries with status `Existing`
    pub existing_files_count: i32,
    /// Number of entries with status `Deleted`
    pub deleted_files_count: i32,
    /// Rows in entries with status `Added`
    pub added_rows_count: i64,
    /// Rows in entries with status `Existing`
    pub existing_rows_count: i64,
    /// Rows in entries with status `Deleted`
    pub deleted_rows_count: i64,
    /// Per partition field summaries, aligned with the spec fields
    pub partitions: Vec<PartitionFieldSummary>,
    /// First row id assigned to rows of this manifest (format v3)
    pub first_row_id: Option<i64>,
}

/// Builds [`PartitionFieldSummary`] values from the partition tuples of a
/// manifest's entries.
#[derive(Debug, Clone)]
pub struct PartitionSummary {
    fields: Vec<PartitionFieldSummary>,
}

impl PartitionSummary {
    /// Create a summary for the fields of `spec`.
    pub fn new(spec: &PartitionSpec) -> Self {
        Self {
            fields: spec
                .fields
                .iter()
                .map(|_| PartitionFieldSummary {
                    contains_null: false,
                    lower_bound: None,
                    upper_bound: None,
                })
                .collect(),
        }
    }

    /// Fold one partition tuple into the summary.
    ///
    /// Tuples shorter than the spec are treated as null-padded.
    pub fn update(&mut self, partition: &[Option<String>]) {
        for (index, stats) in self.fields.iter_mut().enumerate() {
            match partition.get(index).and_then(|value| value.as_ref()) {
                None => stats.contains_null = true,
                Some(value) => {
                    if stats
                        .lower_bound
                        .as_ref()
                        .map(|lower| value < lower)
                        .unwrap_or(true)
                    {
                        stats.lower_bound = Some(value.clone());
                    }
                    if stats
                        .upper_bound
                        .as_ref()
                        .map(|upper| value > upper)
                        .unwrap_or(true)
                    {
                        stats.upper_bound = Some(value.clone());
                    }
                }
            }
        }
    }

    /// The collected summaries, aligned with the spec fields.
    pub fn summaries(self) -> Vec<PartitionFieldSummary> {
        self.fields
    }
}
