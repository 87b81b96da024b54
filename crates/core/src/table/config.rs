//! Floe table configuration
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::FloeError;

/// Default number of optimistic commit retries
pub const DEFAULT_COMMIT_NUM_RETRIES: u32 = 4;
/// Default minimum wait between commit retries
pub const DEFAULT_COMMIT_MIN_RETRY_WAIT_MS: u64 = 100;
/// Default maximum wait between commit retries
pub const DEFAULT_COMMIT_MAX_RETRY_WAIT_MS: u64 = 60_000;
/// Default budget for the sum of all retry waits
pub const DEFAULT_COMMIT_TOTAL_RETRY_TIME_MS: u64 = 1_800_000;
/// Default byte size at which a rolling manifest writer starts a new file
pub const DEFAULT_MANIFEST_TARGET_SIZE_BYTES: u64 = 8 * 1024 * 1024;

/// Typed property keys that can be defined on a floe table
#[derive(PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TableProperty {
    /// Maximum number of times the commit driver retries after a conflict.
    CommitNumRetries,

    /// Minimum wait before the first commit retry.
    CommitMinRetryWaitMs,

    /// Cap applied to the exponentially growing retry wait.
    CommitMaxRetryWaitMs,

    /// Budget for the sum of all retry waits of one logical commit.
    CommitTotalRetryTimeMs,

    /// Byte size at which a rolling manifest writer starts a new file.
    ManifestTargetSizeBytes,

    /// true for format v1 tables to leave entry snapshot ids unassigned and
    /// let readers inherit them from the containing manifest. Always enabled
    /// for format v2 and later.
    SnapshotIdInheritanceEnabled,
}

impl AsRef<str> for TableProperty {
    fn as_ref(&self) -> &str {
        match self {
            Self::CommitNumRetries => "commit.retry.num-retries",
            Self::CommitMinRetryWaitMs => "commit.retry.min-wait-ms",
            Self::CommitMaxRetryWaitMs => "commit.retry.max-wait-ms",
            Self::CommitTotalRetryTimeMs => "commit.retry.total-timeout-ms",
            Self::ManifestTargetSizeBytes => "commit.manifest.target-size-bytes",
            Self::SnapshotIdInheritanceEnabled => {
                "commit.manifest.snapshot-id-inheritance.enabled"
            }
        }
    }
}

impl FromStr for TableProperty {
    type Err = FloeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit.retry.num-retries" => Ok(Self::CommitNumRetries),
            "commit.retry.min-wait-ms" => Ok(Self::CommitMinRetryWaitMs),
            "commit.retry.max-wait-ms" => Ok(Self::CommitMaxRetryWaitMs),
            "commit.retry.total-timeout-ms" => Ok(Self::CommitTotalRetryTimeMs),
            "commit.manifest.target-size-bytes" => Ok(Self::ManifestTargetSizeBytes),
            "commit.manifest.snapshot-id-inheritance.enabled" => {
                Ok(Self::SnapshotIdInheritanceEnabled)
            }
            _ => Err(FloeError::generic("unknown config key")),
        }
    }
}

/// Well known configuration of a floe table, backed by its property map.
///
/// Values that fail to parse fall back to the defaults above, matching how the
/// rest of the format treats malformed properties.
pub struct TableConfig<'a>(pub(crate) &'a HashMap<String, String>);

impl TableConfig<'_> {
    /// Maximum number of optimistic commit retries.
    pub fn commit_num_retries(&self) -> u32 {
        self.parsed(TableProperty::CommitNumRetries, DEFAULT_COMMIT_NUM_RETRIES)
    }

    /// Minimum wait between commit retries.
    pub fn commit_min_retry_wait(&self) -> Duration {
        Duration::from_millis(self.parsed(
            TableProperty::CommitMinRetryWaitMs,
            DEFAULT_COMMIT_MIN_RETRY_WAIT_MS,
        ))
    }

    /// Maximum wait between commit retries.
    pub fn commit_max_retry_wait(&self) -> Duration {
        Duration::from_millis(self.parsed(
            TableProperty::CommitMaxRetryWaitMs,
            DEFAULT_COMMIT_MAX_RETRY_WAIT_MS,
        ))
    }

    /// Budget for the sum of all retry waits of one logical commit.
    pub fn commit_total_retry_time(&self) -> Duration {
        Duration::from_millis(self.parsed(
            TableProperty::CommitTotalRetryTimeMs,
            DEFAULT_COMMIT_TOTAL_RETRY_TIME_MS,
        ))
    }

    /// Byte size at which a rolling manifest writer starts a new file.
    pub fn manifest_target_size_bytes(&self) -> u64 {
        self.parsed(
            TableProperty::ManifestTargetSizeBytes,
            DEFAULT_MANIFEST_TARGET_SIZE_BYTES,
        )
    }

    /// Whether entry snapshot ids may be left for readers to infer.
    pub fn snapshot_id_inheritance_enabled(&self) -> bool {
        self.parsed(TableProperty::SnapshotIdInheritanceEnabled, false)
    }

    fn parsed<T: FromStr>(&self, key: TableProperty, default: T) -> T {
        self.0
            .get(key.as_ref())
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn test_defaults_on_empty_properties() {
        let props = HashMap::new();
        let config = TableConfig(&props);
        assert_eq!(config.commit_num_retries(), 4);
        assert_eq!(config.commit_min_retry_wait(), Duration::from_millis(100));
        assert_eq!(config.commit_max_retry_wait(), Duration::from_secs(60));
        assert_eq!(config.commit_total_retry_time(), Duration::from_secs(1800));
        assert_eq!(config.manifest_target_size_bytes(), 8 * 1024 * 1024);
        assert!(!config.snapshot_id_inheritance_enabled());
    }

    #[test]
    fn test_configured_values() {
        let props = hashmap! {
            "commit.retry.num-retries".to_string() => "2".to_string(),
            "commit.retry.min-wait-ms".to_string() => "10".to_string(),
            "commit.manifest.target-size-bytes".to_string() => "1024".to_string(),
            "commit.manifest.snapshot-id-inheritance.enabled".to_string() => "true".to_string(),
        };
        let config = TableConfig(&props);
        assert_eq!(config.commit_num_retries(), 2);
        assert_eq!(config.commit_min_retry_wait(), Duration::from_millis(10));
        assert_eq!(config.manifest_target_size_bytes(), 1024);
        assert!(config.snapshot_id_inheritance_enabled());
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let props = hashmap! {
            "commit.retry.num-retries".to_string() => "many".to_string(),
        };
        let config = TableConfig(&props);
        assert_eq!(config.commit_num_retries(), 4);
    }

    #[test]
    fn test_property_key_roundtrip() {
        for key in [
            "commit.retry.num-retries",
            "commit.retry.min-wait-ms",
            "commit.retry.max-wait-ms",
            "commit.retry.total-timeout-ms",
            "commit.manifest.target-size-bytes",
            "commit.manifest.snapshot-id-inheritance.enabled",
        ] {
            let prop: TableProperty = key.parse().unwrap();
            assert_eq!(prop.as_ref(), key);
        }
        assert!("commit.unknown".parse::<TableProperty>().is_err());
    }
}
