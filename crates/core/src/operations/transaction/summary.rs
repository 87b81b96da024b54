//! Snapshot summary keys and cross-generation aggregation
//!
//! A producer supplies a delta summary (what this commit adds and removes);
//! the aggregator folds it into the previous snapshot's running totals. A
//! total is only carried when the previous value exists, parses as an integer
//! and the arithmetic never dips below zero — otherwise the total is dropped
//! and readers fall back to scanning manifests.

use std::collections::HashMap;

use crate::events::EnvironmentContext;
use crate::table::TableMetadata;

/// Number of data files added by a commit
pub const ADDED_DATA_FILES: &str = "added-data-files";
/// Number of data files removed by a commit
pub const DELETED_DATA_FILES: &str = "deleted-data-files";
/// Running total of data files
pub const TOTAL_DATA_FILES: &str = "total-data-files";
/// Number of delete files added by a commit
pub const ADDED_DELETE_FILES: &str = "added-delete-files";
/// Number of delete files removed by a commit
pub const REMOVED_DELETE_FILES: &str = "removed-delete-files";
/// Running total of delete files
pub const TOTAL_DELETE_FILES: &str = "total-delete-files";
/// Number of records added by a commit
pub const ADDED_RECORDS: &str = "added-records";
/// Number of records removed by a commit
pub const DELETED_RECORDS: &str = "deleted-records";
/// Running total of records
pub const TOTAL_RECORDS: &str = "total-records";
/// Byte size of files added by a commit
pub const ADDED_FILE_SIZE: &str = "added-files-size";
/// Byte size of files removed by a commit
pub const REMOVED_FILE_SIZE: &str = "removed-files-size";
/// Running total byte size of the table's files
pub const TOTAL_FILE_SIZE: &str = "total-files-size";
/// Number of position delete records added by a commit
pub const ADDED_POS_DELETES: &str = "added-position-deletes";
/// Number of position delete records removed by a commit
pub const REMOVED_POS_DELETES: &str = "removed-position-deletes";
/// Running total of position delete records
pub const TOTAL_POS_DELETES: &str = "total-position-deletes";
/// Number of equality delete records added by a commit
pub const ADDED_EQ_DELETES: &str = "added-equality-deletes";
/// Number of equality delete records removed by a commit
pub const REMOVED_EQ_DELETES: &str = "removed-equality-deletes";
/// Running total of equality delete records
pub const TOTAL_EQ_DELETES: &str = "total-equality-deletes";

/// Each cumulative property with its paired added and removed delta keys.
const CUMULATIVE_PROPERTIES: [(&str, &str, &str); 6] = [
    (TOTAL_RECORDS, ADDED_RECORDS, DELETED_RECORDS),
    (TOTAL_FILE_SIZE, ADDED_FILE_SIZE, REMOVED_FILE_SIZE),
    (TOTAL_DATA_FILES, ADDED_DATA_FILES, DELETED_DATA_FILES),
    (TOTAL_DELETE_FILES, ADDED_DELETE_FILES, REMOVED_DELETE_FILES),
    (TOTAL_POS_DELETES, ADDED_POS_DELETES, REMOVED_POS_DELETES),
    (TOTAL_EQ_DELETES, ADDED_EQ_DELETES, REMOVED_EQ_DELETES),
];

/// The summary totals run against for the next commit on `branch`.
///
/// With no predecessor on the branch the totals start at zero; a predecessor
/// without a summary contributes nothing, which drops the totals.
pub(crate) fn previous_summary(base: &TableMetadata, branch: &str) -> HashMap<String, String> {
    match base.latest_snapshot(branch) {
        Some(snapshot) => snapshot.summary.clone(),
        None => CUMULATIVE_PROPERTIES
            .iter()
            .map(|(total, _, _)| (total.to_string(), "0".to_string()))
            .collect(),
    }
}

/// Combine a producer's delta summary with the previous totals and the
/// environment context.
///
/// Producer keys win over computed totals, and over the environment context.
pub(crate) fn aggregate_summary(
    delta: &HashMap<String, String>,
    previous: &HashMap<String, String>,
    env: &EnvironmentContext,
) -> HashMap<String, String> {
    let mut summary = HashMap::new();
    for (total_key, added_key, removed_key) in CUMULATIVE_PROPERTIES {
        if let Some(total) = updated_total(previous, total_key, delta, added_key, removed_key) {
            summary.insert(total_key.to_string(), total.to_string());
        }
    }
    for (key, value) in env.entries() {
        summary.insert(key.clone(), value.clone());
    }
    for (key, value) in delta {
        summary.insert(key.clone(), value.clone());
    }
    summary
}

fn updated_total(
    previous: &HashMap<String, String>,
    total_key: &str,
    delta: &HashMap<String, String>,
    added_key: &str,
    removed_key: &str,
) -> Option<i64> {
    let mut total: i64 = previous.get(total_key)?.parse().ok()?;
    if total < 0 {
        return None;
    }
    if let Some(added) = delta.get(added_key) {
        total += added.parse::<i64>().ok()?;
        if total < 0 {
            return None;
        }
    }
    if let Some(removed) = delta.get(removed_key) {
        total -= removed.parse::<i64>().ok()?;
    }
    (total >= 0).then_some(total)
}

/// Parse a summary value as a count, treating absence or malformed values as
/// zero.
pub(crate) fn summary_count(summary: &HashMap<String, String>, key: &str) -> i64 {
    summary
        .get(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn test_totals_accumulate_added_and_removed() {
        let previous = hashmap! {
            TOTAL_RECORDS.to_string() => "100".to_string(),
            TOTAL_DATA_FILES.to_string() => "4".to_string(),
        };
        let delta = hashmap! {
            ADDED_RECORDS.to_string() => "50".to_string(),
            DELETED_RECORDS.to_string() => "30".to_string(),
            ADDED_DATA_FILES.to_string() => "2".to_string(),
        };
        let summary = aggregate_summary(&delta, &previous, &EnvironmentContext::default());

        assert_eq!(summary[TOTAL_RECORDS], "120");
        assert_eq!(summary[TOTAL_DATA_FILES], "6");
        // only totals present in the previous summary are carried
        assert!(!summary.contains_key(TOTAL_FILE_SIZE));
    }

    #[test]
    fn test_negative_totals_are_dropped() {
        let previous = hashmap! {
            TOTAL_RECORDS.to_string() => "10".to_string(),
        };
        let delta = hashmap! {
            DELETED_RECORDS.to_string() => "30".to_string(),
        };
        let summary = aggregate_summary(&delta, &previous, &EnvironmentContext::default());
        assert!(!summary.contains_key(TOTAL_RECORDS));
    }

    #[test]
    fn test_malformed_previous_total_is_dropped() {
        let previous = hashmap! {
            TOTAL_RECORDS.to_string() => "many".to_string(),
        };
        let delta = hashmap! {
            ADDED_RECORDS.to_string() => "5".to_string(),
        };
        let summary = aggregate_summary(&delta, &previous, &EnvironmentContext::default());
        assert!(!summary.contains_key(TOTAL_RECORDS));
    }

    #[test]
    fn test_delta_keys_win_over_computed_totals() {
        let previous = hashmap! {
            TOTAL_RECORDS.to_string() => "100".to_string(),
        };
        let delta = hashmap! {
            ADDED_RECORDS.to_string() => "50".to_string(),
            TOTAL_RECORDS.to_string() => "7".to_string(),
        };
        let summary = aggregate_summary(&delta, &previous, &EnvironmentContext::default());
        assert_eq!(summary[TOTAL_RECORDS], "7");
    }

    #[test]
    fn test_environment_context_is_merged() {
        let summary = aggregate_summary(
            &HashMap::new(),
            &HashMap::new(),
            &EnvironmentContext::default().with_entry("engine-host", "worker-1"),
        );
        assert_eq!(summary["engine-name"], "floe");
        assert_eq!(summary["engine-host"], "worker-1");
    }

    #[test]
    fn test_empty_branch_starts_totals_at_zero() {
        let base = crate::table::TableMetadata::new("memory://t");
        let previous = previous_summary(&base, "main");
        let delta = hashmap! {
            ADDED_RECORDS.to_string() => "300".to_string(),
            ADDED_DATA_FILES.to_string() => "3".to_string(),
        };
        let summary = aggregate_summary(&delta, &previous, &EnvironmentContext::default());
        assert_eq!(summary[TOTAL_RECORDS], "300");
        assert_eq!(summary[TOTAL_DATA_FILES], "3");
        assert_eq!(summary[TOTAL_DELETE_FILES], "0");
    }
}
