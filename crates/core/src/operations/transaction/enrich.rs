//! Enriching manifests that lack owner-snapshot attribution
//!
//! Manifests handed to a producer by an external writer (e.g. a streaming
//! sink) carry no owning snapshot id and stale counts. Enrichment re-reads
//! the entries to recompute file and row counts and the per-partition
//! summaries, and infers the owning snapshot id from the entries. Results are
//! memoized per producer instance so retries do not re-read manifests.

use dashmap::DashMap;

use crate::errors::FloeResult;
use crate::manifest::{
    read_manifest, ManifestEntryStatus, ManifestFile, PartitionSpec, PartitionSummary,
};
use crate::storage::FileIo;
use crate::table::TableMetadata;

/// Order-preserving cache of enriched manifests, keyed by manifest path.
#[derive(Debug, Default)]
pub(crate) struct ManifestEnricher {
    cache: DashMap<String, ManifestFile>,
}

impl ManifestEnricher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enrich `manifest`, returning it unchanged when it already has an
    /// owning snapshot id.
    pub(crate) async fn enrich(
        &self,
        io: &FileIo,
        base: &TableMetadata,
        manifest: ManifestFile,
    ) -> FloeResult<ManifestFile> {
        if manifest.added_snapshot_id.is_some() {
            return Ok(manifest);
        }
        if let Some(cached) = self.cache.get(&manifest.manifest_path) {
            return Ok(cached.value().clone());
        }

        let unpartitioned = PartitionSpec::unpartitioned();
        let spec = base.spec(manifest.partition_spec_id).unwrap_or(&unpartitioned);
        let enriched = enrich_manifest(io, spec, manifest).await?;
        self.cache
            .insert(enriched.manifest_path.clone(), enriched.clone());
        Ok(enriched)
    }
}

async fn enrich_manifest(
    io: &FileIo,
    spec: &PartitionSpec,
    manifest: ManifestFile,
) -> FloeResult<ManifestFile> {
    let entries = read_manifest(io, &manifest).await?;

    let mut partitions = PartitionSummary::new(spec);
    let mut added_files = 0;
    let mut added_rows = 0;
    let mut existing_files = 0;
    let mut existing_rows = 0;
    let mut deleted_files = 0;
    let mut deleted_rows = 0;
    let mut snapshot_id = None;
    let mut max_snapshot_id = None;

    for entry in &entries {
        if let Some(entry_snapshot) = entry.snapshot_id {
            max_snapshot_id = Some(match max_snapshot_id {
                Some(max) if max >= entry_snapshot => max,
                _ => entry_snapshot,
            });
        }

        match entry.status {
            ManifestEntryStatus::Added => {
                added_files += 1;
                added_rows += entry.data_file.record_count;
                if snapshot_id.is_none() {
                    snapshot_id = entry.snapshot_id;
                }
            }
            ManifestEntryStatus::Existing => {
                existing_files += 1;
                existing_rows += entry.data_file.record_count;
            }
            ManifestEntryStatus::Deleted => {
                deleted_files += 1;
                deleted_rows += entry.data_file.record_count;
                if snapshot_id.is_none() {
                    snapshot_id = entry.snapshot_id;
                }
            }
        }

        partitions.update(&entry.data_file.partition);
    }

    // a manifest with only existing entries is attributed to the newest
    // snapshot seen among them
    if snapshot_id.is_none() {
        snapshot_id = max_snapshot_id;
    }

    Ok(ManifestFile {
        added_snapshot_id: snapshot_id,
        added_files_count: added_files,
        existing_files_count: existing_files,
        deleted_files_count: deleted_files,
        added_rows_count: added_rows,
        existing_rows_count: existing_rows,
        deleted_rows_count: deleted_rows,
        partitions: partitions.summaries(),
        ..manifest
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use object_store::memory::InMemory;

    use super::*;
    use crate::manifest::{DataFile, ManifestContent, ManifestWriter};

    async fn written_manifest(io: &FileIo, snapshot_id: i64) -> ManifestFile {
        let spec = PartitionSpec::unpartitioned();
        let mut writer = ManifestWriter::new(
            io.clone(),
            format!("metadata/m-{snapshot_id}.avro"),
            ManifestContent::Data,
            &spec,
            snapshot_id,
            false,
        );
        writer.add(DataFile::data("data/a.parquet", 10, 100)).unwrap();
        writer.add(DataFile::data("data/b.parquet", 20, 200)).unwrap();
        writer.close().await.unwrap()
    }

    #[tokio::test]
    async fn test_enrichment_is_identity_for_owned_manifests() {
        let io = FileIo::new(Arc::new(InMemory::new()));
        let manifest = written_manifest(&io, 42).await;
        let base = TableMetadata::new("memory://t");

        let enricher = ManifestEnricher::new();
        let enriched = enricher.enrich(&io, &base, manifest.clone()).await.unwrap();
        assert_eq!(enriched, manifest);
    }

    #[tokio::test]
    async fn test_enrichment_recomputes_counts_and_owner() {
        let io = FileIo::new(Arc::new(InMemory::new()));
        let written = written_manifest(&io, 42).await;
        let base = TableMetadata::new("memory://t");

        // strip attribution and counts, as an external writer would hand it in
        let stripped = ManifestFile {
            added_snapshot_id: None,
            added_files_count: 0,
            added_rows_count: 0,
            ..written
        };

        let enricher = ManifestEnricher::new();
        let enriched = enricher.enrich(&io, &base, stripped).await.unwrap();
        assert_eq!(enriched.added_snapshot_id, Some(42));
        assert_eq!(enriched.added_files_count, 2);
        assert_eq!(enriched.added_rows_count, 30);
        assert_eq!(enriched.existing_files_count, 0);
    }
}
