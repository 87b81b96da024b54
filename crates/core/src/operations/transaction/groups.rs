//! Parallel, order-preserving manifest writing over file groups
//!
//! A large file collection is split into contiguous groups that are written
//! concurrently on the worker pool. Results land in indexed slots and are
//! concatenated in group order, so the emitted manifest sequence matches the
//! input order regardless of task scheduling.

use std::future::Future;

use tokio::task::JoinSet;

use crate::errors::{FloeError, FloeResult};
use crate::manifest::{DataFile, ManifestFile};

/// Smallest number of files worth a dedicated manifest writer.
pub(crate) const MIN_FILE_GROUP_SIZE: usize = 10_000;

/// How many manifest writers to use for `file_count` files without producing
/// manifests that are too small.
pub(crate) fn manifest_writer_count(worker_pool_size: usize, file_count: usize) -> usize {
    let limit = file_count.div_ceil(MIN_FILE_GROUP_SIZE);
    limit.clamp(1, worker_pool_size.max(1))
}

/// Write `files` as manifests, splitting them into groups written
/// concurrently by `write_group`.
///
/// The first group failure aborts the remaining tasks and propagates; their
/// partially written manifests become orphans reclaimed by cleanup.
pub(crate) async fn write_manifest_groups<F, Fut>(
    files: Vec<DataFile>,
    worker_pool_size: usize,
    write_group: F,
) -> FloeResult<Vec<ManifestFile>>
where
    F: Fn(Vec<DataFile>) -> Fut,
    Fut: Future<Output = FloeResult<Vec<ManifestFile>>> + Send + 'static,
{
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let parallelism = manifest_writer_count(worker_pool_size, files.len());
    let group_size = files.len().div_ceil(parallelism);

    let mut tasks = JoinSet::new();
    let mut group_count = 0;
    for (index, group) in files.chunks(group_size).enumerate() {
        let task = write_group(group.to_vec());
        tasks.spawn(async move { (index, task.await) });
        group_count += 1;
    }

    let mut slots: Vec<Option<Vec<ManifestFile>>> = vec![None; group_count];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(manifests))) => slots[index] = Some(manifests),
            Ok((_, Err(err))) => {
                tasks.abort_all();
                return Err(err);
            }
            Err(err) => {
                tasks.abort_all();
                return Err(FloeError::generic(format!(
                    "manifest writer task panicked: {err}"
                )));
            }
        }
    }

    Ok(slots.into_iter().flatten().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestContent, UNASSIGNED_SEQUENCE_NUMBER};

    fn manifest(path: &str) -> ManifestFile {
        ManifestFile {
            manifest_path: path.to_string(),
            manifest_length: 1,
            partition_spec_id: 0,
            content: ManifestContent::Data,
            sequence_number: UNASSIGNED_SEQUENCE_NUMBER,
            min_sequence_number: UNASSIGNED_SEQUENCE_NUMBER,
            added_snapshot_id: Some(1),
            added_files_count: 1,
            existing_files_count: 0,
            deleted_files_count: 0,
            added_rows_count: 1,
            existing_rows_count: 0,
            deleted_rows_count: 0,
            partitions: Vec::new(),
            first_row_id: None,
        }
    }

    #[test]
    fn test_writer_count_scales_with_files_and_pool() {
        assert_eq!(manifest_writer_count(8, 0), 1);
        assert_eq!(manifest_writer_count(8, 100), 1);
        assert_eq!(manifest_writer_count(8, 10_000), 1);
        assert_eq!(manifest_writer_count(8, 10_001), 2);
        assert_eq!(manifest_writer_count(8, 35_000), 4);
        assert_eq!(manifest_writer_count(2, 100_000), 2);
        assert_eq!(manifest_writer_count(0, 100_000), 1);
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let files: Vec<_> = (0..30_000)
            .map(|index| DataFile::data(format!("data/f{index}.parquet"), 1, 1))
            .collect();

        // one manifest per group, named after the group's first file
        let manifests = write_manifest_groups(files, 4, |group| async move {
            // let later groups finish first to prove order is restored
            let start: u64 = group[0]
                .file_path
                .trim_start_matches("data/f")
                .trim_end_matches(".parquet")
                .parse()
                .unwrap();
            let delay = 30 - (start / 10_000) * 10;
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            Ok(vec![manifest(&group[0].file_path)])
        })
        .await
        .unwrap();

        assert_eq!(manifests.len(), 3);
        assert_eq!(manifests[0].manifest_path, "data/f0.parquet");
        assert_eq!(manifests[1].manifest_path, "data/f10000.parquet");
        assert_eq!(manifests[2].manifest_path, "data/f20000.parquet");
    }

    #[tokio::test]
    async fn test_first_failure_wins() {
        let files: Vec<_> = (0..20_000)
            .map(|index| DataFile::data(format!("data/f{index}.parquet"), 1, 1))
            .collect();

        let result = write_manifest_groups(files, 4, |group| async move {
            if group[0].file_path == "data/f0.parquet" {
                Err(FloeError::generic("group failed"))
            } else {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(vec![manifest(&group[0].file_path)])
            }
        })
        .await;

        assert!(result.is_err());
    }
}
