//! Replace data files of a table
//!
//! [`ReplaceFiles`] removes a set of files and adds their replacements in one
//! snapshot. Parent manifests that reference none of the removed files are
//! carried forward untouched; the others are rewritten with the removed files
//! marked deleted and everything else carried as existing. The rewrite depends
//! on the parent snapshot, so cached manifests are only reused by a retry when
//! the parent did not move.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use super::transaction::groups::write_manifest_groups;
use super::transaction::summary;
use super::{operation, ApplyContext, FileCleaner, SnapshotOperation};
use crate::errors::{FloeError, FloeResult};
use crate::manifest::{
    read_manifest, DataFile, ManifestContent, ManifestEntryStatus, ManifestFile, PartitionSpec,
};
use crate::table::{Snapshot, TableMetadata};

/// Replaces data files without changing the table's logical content.
pub struct ReplaceFiles {
    spec: PartitionSpec,
    added: Vec<DataFile>,
    removed: Vec<DataFile>,
    new_manifests: Option<Vec<ManifestFile>>,
    cached_parent: Option<Option<i64>>,
    written: Vec<ManifestFile>,
}

impl ReplaceFiles {
    /// Create a replace operation for files of the given partition spec.
    pub fn new(spec: PartitionSpec) -> Self {
        Self {
            spec,
            added: Vec::new(),
            removed: Vec::new(),
            new_manifests: None,
            cached_parent: None,
            written: Vec::new(),
        }
    }

    /// Add a replacement file.
    pub fn with_added_file(mut self, file: DataFile) -> Self {
        self.added.push(file);
        self
    }

    /// Remove a file currently tracked by the table.
    pub fn with_removed_file(mut self, file: DataFile) -> Self {
        self.removed.push(file);
        self
    }

    async fn rewrite(
        &mut self,
        parent: Option<&Snapshot>,
        ctx: &ApplyContext,
    ) -> FloeResult<Vec<ManifestFile>> {
        let factory = ctx.writer_factory().clone();
        let spec = self.spec.clone();
        let added = write_manifest_groups(self.added.clone(), ctx.worker_pool_size(), move |group| {
            let factory = factory.clone();
            let spec = spec.clone();
            async move {
                let mut writer = factory.new_rolling_data_writer(&spec);
                for file in group {
                    writer.add(file).await?;
                }
                writer.close().await
            }
        })
        .await?;
        self.written.extend(added.iter().cloned());

        let removed_paths: HashSet<&str> = self
            .removed
            .iter()
            .map(|file| file.file_path.as_str())
            .collect();
        let mut found: HashSet<String> = HashSet::new();

        let mut manifests = added;
        if let Some(parent) = parent {
            for manifest in parent.all_manifests(ctx.io()).await? {
                if manifest.content != ManifestContent::Data {
                    manifests.push(manifest);
                    continue;
                }
                let entries = read_manifest(ctx.io(), &manifest).await?;
                let touched = entries.iter().any(|entry| {
                    entry.status != ManifestEntryStatus::Deleted
                        && removed_paths.contains(entry.data_file.file_path.as_str())
                });
                if !touched {
                    manifests.push(manifest);
                    continue;
                }

                let mut writer = ctx.writer_factory().new_rolling_data_writer(&self.spec);
                for entry in entries {
                    // entries deleted by an earlier snapshot are dropped
                    if entry.status == ManifestEntryStatus::Deleted {
                        continue;
                    }
                    if removed_paths.contains(entry.data_file.file_path.as_str()) {
                        found.insert(entry.data_file.file_path.clone());
                        writer.delete(entry.data_file, entry.sequence_number).await?;
                    } else {
                        writer
                            .existing(entry.data_file, entry.snapshot_id, entry.sequence_number)
                            .await?;
                    }
                }
                let rewritten = writer.close().await?;
                self.written.extend(rewritten.iter().cloned());
                manifests.extend(rewritten);
            }
        }

        if let Some(missing) = self
            .removed
            .iter()
            .find(|file| !found.contains(&file.file_path))
        {
            return Err(FloeError::Validation(format!(
                "Missing required files to delete: {}",
                missing.file_path
            )));
        }

        Ok(manifests)
    }
}

#[async_trait]
impl SnapshotOperation for ReplaceFiles {
    fn operation(&self) -> &str {
        operation::REPLACE
    }

    async fn apply(
        &mut self,
        _base: &TableMetadata,
        parent: Option<&Snapshot>,
        ctx: &ApplyContext,
    ) -> FloeResult<Vec<ManifestFile>> {
        let parent_id = parent.map(|snapshot| snapshot.snapshot_id);
        if self.new_manifests.is_none() || self.cached_parent != Some(parent_id) {
            let manifests = self.rewrite(parent, ctx).await?;
            self.new_manifests = Some(manifests);
            self.cached_parent = Some(parent_id);
        }
        Ok(self.new_manifests.clone().unwrap_or_default())
    }

    fn summary(&self) -> HashMap<String, String> {
        let mut summary = HashMap::new();
        let mut set = |key: &str, value: i64| {
            if value > 0 {
                summary.insert(key.to_string(), value.to_string());
            }
        };
        set(summary::ADDED_DATA_FILES, self.added.len() as i64);
        set(
            summary::ADDED_RECORDS,
            self.added.iter().map(|file| file.record_count).sum(),
        );
        set(
            summary::ADDED_FILE_SIZE,
            self.added.iter().map(|file| file.file_size_in_bytes).sum(),
        );
        set(summary::DELETED_DATA_FILES, self.removed.len() as i64);
        set(
            summary::DELETED_RECORDS,
            self.removed.iter().map(|file| file.record_count).sum(),
        );
        set(
            summary::REMOVED_FILE_SIZE,
            self.removed
                .iter()
                .map(|file| file.file_size_in_bytes)
                .sum(),
        );
        summary
    }

    async fn clean_uncommitted(&mut self, committed: &HashSet<String>, cleaner: &FileCleaner) {
        let written = std::mem::take(&mut self.written);
        for manifest in written {
            if committed.contains(&manifest.manifest_path) {
                self.written.push(manifest);
            } else {
                cleaner.delete(&manifest.manifest_path).await;
            }
        }
        self.new_manifests = None;
        self.cached_parent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_added_and_removed() {
        let replace = ReplaceFiles::new(PartitionSpec::unpartitioned())
            .with_added_file(DataFile::data("data/compact.parquet", 30, 512))
            .with_removed_file(DataFile::data("data/a.parquet", 10, 128))
            .with_removed_file(DataFile::data("data/b.parquet", 20, 256));

        let summary = replace.summary();
        assert_eq!(summary[summary::ADDED_DATA_FILES], "1");
        assert_eq!(summary[summary::ADDED_RECORDS], "30");
        assert_eq!(summary[summary::DELETED_DATA_FILES], "2");
        assert_eq!(summary[summary::DELETED_RECORDS], "30");
        assert_eq!(summary[summary::REMOVED_FILE_SIZE], "384");
    }
}
