//! Writing and reading manifest lists
//!
//! One manifest list is written per commit attempt and becomes the single
//! entry point to the manifests of a snapshot. Appending assigns the commit's
//! sequence number to manifests written before the commit was sequenced, and
//! for format v3 tables assigns the first row id of each data manifest from a
//! monotonically advancing counter.

use std::sync::LazyLock;

use apache_avro::{Reader, Schema, Writer};

use super::{ManifestContent, ManifestFile, UNASSIGNED_SEQUENCE_NUMBER};
use crate::errors::FloeResult;
use crate::storage::FileIo;

pub(crate) static MANIFEST_FILE_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::parse_str(
        r#"{
            "type": "record",
            "name": "manifest_file",
            "fields": [
                {"name": "manifest_path", "type": "string"},
                {"name": "manifest_length", "type": "long"},
                {"name": "partition_spec_id", "type": "int"},
                {"name": "content", "type": "int"},
                {"name": "sequence_number", "type": "long"},
                {"name": "min_sequence_number", "type": "long"},
                {"name": "added_snapshot_id", "type": ["null", "long"], "default": null},
                {"name": "added_files_count", "type": "int"},
                {"name": "existing_files_count", "type": "int"},
                {"name": "deleted_files_count", "type": "int"},
                {"name": "added_rows_count", "type": "long"},
                {"name": "existing_rows_count", "type": "long"},
                {"name": "deleted_rows_count", "type": "long"},
                {"name": "partitions", "type": {"type": "array", "items": {
                    "type": "record",
                    "name": "partition_field_summary",
                    "fields": [
                        {"name": "contains_null", "type": "boolean"},
                        {"name": "lower_bound", "type": ["null", "string"], "default": null},
                        {"name": "upper_bound", "type": ["null", "string"], "default": null}
                    ]
                }}},
                {"name": "first_row_id", "type": ["null", "long"], "default": null}
            ]
        }"#,
    )
    .expect("manifest file schema is valid")
});

/// Writer for the manifest list of one snapshot.
pub struct ManifestListWriter {
    io: FileIo,
    path: String,
    format_version: u8,
    next_row_id: i64,
    sequence_number: i64,
    avro: Writer<'static, Vec<u8>>,
}

impl ManifestListWriter {
    /// Create a writer bound to the candidate snapshot's identity.
    ///
    /// `first_row_id` seeds the row id counter for format v3 tables; earlier
    /// formats ignore it.
    pub fn new(
        io: FileIo,
        path: String,
        format_version: u8,
        snapshot_id: i64,
        parent_snapshot_id: Option<i64>,
        sequence_number: i64,
        first_row_id: i64,
    ) -> FloeResult<Self> {
        let mut avro = Writer::new(&MANIFEST_FILE_SCHEMA, Vec::new());
        avro.add_user_metadata("format-version".to_string(), format_version.to_string())?;
        avro.add_user_metadata("snapshot-id".to_string(), snapshot_id.to_string())?;
        avro.add_user_metadata(
            "parent-snapshot-id".to_string(),
            parent_snapshot_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "null".to_string()),
        )?;
        avro.add_user_metadata("sequence-number".to_string(), sequence_number.to_string())?;

        Ok(Self {
            io,
            path,
            format_version,
            next_row_id: first_row_id,
            sequence_number,
            avro,
        })
    }

    /// Append a manifest, sequencing it under this commit when needed.
    pub fn append(&mut self, manifest: &ManifestFile) -> FloeResult<()> {
        let mut manifest = manifest.clone();
        if manifest.sequence_number == UNASSIGNED_SEQUENCE_NUMBER {
            manifest.sequence_number = self.sequence_number;
        }
        if manifest.min_sequence_number == UNASSIGNED_SEQUENCE_NUMBER {
            manifest.min_sequence_number = self.sequence_number;
        }
        if self.format_version >= 3
            && manifest.content == ManifestContent::Data
            && manifest.first_row_id.is_none()
        {
            manifest.first_row_id = Some(self.next_row_id);
            self.next_row_id += manifest.added_rows_count;
        }
        self.avro.append_ser(&manifest)?;
        Ok(())
    }

    /// The row id the next appended data manifest would start at.
    pub fn next_row_id(&self) -> i64 {
        self.next_row_id
    }

    /// Upload the manifest list and return the final row id counter.
    pub async fn close(self) -> FloeResult<i64> {
        let buffer = self.avro.into_inner()?;
        self.io.put(&self.path, buffer.into()).await?;
        Ok(self.next_row_id)
    }
}

/// Read all manifests referenced by the manifest list at `path`.
pub async fn read_manifest_list(io: &FileIo, path: &str) -> FloeResult<Vec<ManifestFile>> {
    let data = io.get(path).await?;
    let reader = Reader::new(data.as_ref())?;

    let mut manifests = Vec::new();
    for value in reader {
        manifests.push(apache_avro::from_value::<ManifestFile>(&value?)?);
    }
    Ok(manifests)
}
