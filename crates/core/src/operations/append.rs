//! Append new data files to a table
//!
//! [`FastAppend`] writes the pending files into fresh manifests and reuses
//! the parent snapshot's manifests untouched. Manifests written by a failed
//! attempt are kept and reused by the retry, since the same changes would be
//! written again.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use super::transaction::groups::write_manifest_groups;
use super::transaction::summary;
use super::{operation, ApplyContext, FileCleaner, SnapshotOperation};
use crate::errors::FloeResult;
use crate::manifest::{DataFile, FileContent, ManifestFile, PartitionSpec};
use crate::table::{Snapshot, TableMetadata};

/// Appends data files without rewriting any existing manifest.
pub struct FastAppend {
    spec: PartitionSpec,
    files: Vec<DataFile>,
    new_manifests: Option<Vec<ManifestFile>>,
}

impl FastAppend {
    /// Create an append writing files of the given partition spec.
    pub fn new(spec: PartitionSpec) -> Self {
        Self {
            spec,
            files: Vec::new(),
            new_manifests: None,
        }
    }

    /// Add a pending file.
    pub fn with_file(mut self, file: DataFile) -> Self {
        self.files.push(file);
        self
    }

    /// Add pending files.
    pub fn with_files(mut self, files: impl IntoIterator<Item = DataFile>) -> Self {
        self.files.extend(files);
        self
    }
}

#[async_trait]
impl SnapshotOperation for FastAppend {
    fn operation(&self) -> &str {
        operation::APPEND
    }

    async fn apply(
        &mut self,
        _base: &TableMetadata,
        parent: Option<&Snapshot>,
        ctx: &ApplyContext,
    ) -> FloeResult<Vec<ManifestFile>> {
        if self.new_manifests.is_none() {
            let factory = ctx.writer_factory().clone();
            let spec = self.spec.clone();
            let written = write_manifest_groups(
                self.files.clone(),
                ctx.worker_pool_size(),
                move |group| {
                    let factory = factory.clone();
                    let spec = spec.clone();
                    async move {
                        let mut writer = factory.new_rolling_data_writer(&spec);
                        for file in group {
                            writer.add(file).await?;
                        }
                        writer.close().await
                    }
                },
            )
            .await?;
            self.new_manifests = Some(written);
        }

        let mut manifests = self.new_manifests.clone().unwrap_or_default();
        if let Some(parent) = parent {
            manifests.extend(parent.all_manifests(ctx.io()).await?);
        }
        Ok(manifests)
    }

    fn summary(&self) -> HashMap<String, String> {
        let mut added_data_files = 0i64;
        let mut added_records = 0i64;
        let mut added_file_size = 0i64;
        let mut added_delete_files = 0i64;
        let mut added_pos_deletes = 0i64;
        let mut added_eq_deletes = 0i64;

        for file in &self.files {
            added_file_size += file.file_size_in_bytes;
            match file.content {
                FileContent::Data => {
                    added_data_files += 1;
                    added_records += file.record_count;
                }
                FileContent::PositionDeletes => {
                    added_delete_files += 1;
                    added_pos_deletes += file.record_count;
                }
                FileContent::EqualityDeletes => {
                    added_delete_files += 1;
                    added_eq_deletes += file.record_count;
                }
            }
        }

        let mut summary = HashMap::new();
        let mut set = |key: &str, value: i64| {
            if value > 0 {
                summary.insert(key.to_string(), value.to_string());
            }
        };
        set(summary::ADDED_DATA_FILES, added_data_files);
        set(summary::ADDED_RECORDS, added_records);
        set(summary::ADDED_FILE_SIZE, added_file_size);
        set(summary::ADDED_DELETE_FILES, added_delete_files);
        set(summary::ADDED_POS_DELETES, added_pos_deletes);
        set(summary::ADDED_EQ_DELETES, added_eq_deletes);
        summary
    }

    async fn clean_uncommitted(&mut self, committed: &HashSet<String>, cleaner: &FileCleaner) {
        if let Some(new_manifests) = self.new_manifests.take() {
            let mut kept = Vec::new();
            for manifest in new_manifests {
                if committed.contains(&manifest.manifest_path) {
                    kept.push(manifest);
                } else {
                    cleaner.delete(&manifest.manifest_path).await;
                }
            }
            self.new_manifests = Some(kept);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_pending_files() {
        let append = FastAppend::new(PartitionSpec::unpartitioned())
            .with_file(DataFile::data("data/a.parquet", 100, 1024))
            .with_file(DataFile::data("data/b.parquet", 50, 512))
            .with_file(DataFile::position_deletes("data/d.parquet", 5, 64));

        let summary = append.summary();
        assert_eq!(summary[summary::ADDED_DATA_FILES], "2");
        assert_eq!(summary[summary::ADDED_RECORDS], "150");
        assert_eq!(summary[summary::ADDED_FILE_SIZE], "1600");
        assert_eq!(summary[summary::ADDED_DELETE_FILES], "1");
        assert_eq!(summary[summary::ADDED_POS_DELETES], "5");
        assert!(!summary.contains_key(summary::ADDED_EQ_DELETES));
    }
}
