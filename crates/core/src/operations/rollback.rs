//! Roll a branch back to an earlier snapshot
//!
//! [`RollbackTo`] re-commits an existing snapshot: it pins the target's
//! snapshot id, so the commit driver moves the branch ref instead of adding a
//! new snapshot. The manifest list written by the attempt is never referenced
//! and is reclaimed as an orphan after the commit.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use super::{operation, ApplyContext, FileCleaner, SnapshotOperation};
use crate::errors::{FloeError, FloeResult};
use crate::manifest::ManifestFile;
use crate::table::{Snapshot, TableMetadata};

/// Moves the target branch to an existing snapshot.
pub struct RollbackTo {
    snapshot_id: i64,
}

impl RollbackTo {
    /// Roll back to the snapshot with the given id.
    pub fn new(snapshot_id: i64) -> Self {
        Self { snapshot_id }
    }
}

#[async_trait]
impl SnapshotOperation for RollbackTo {
    fn operation(&self) -> &str {
        operation::ROLLBACK
    }

    fn pinned_snapshot_id(&self) -> Option<i64> {
        Some(self.snapshot_id)
    }

    fn validate(&self, base: &TableMetadata, _parent: Option<&Snapshot>) -> FloeResult<()> {
        if base.snapshot(self.snapshot_id).is_none() {
            return Err(FloeError::Validation(format!(
                "Cannot roll back to unknown snapshot id: {}",
                self.snapshot_id
            )));
        }
        Ok(())
    }

    async fn apply(
        &mut self,
        base: &TableMetadata,
        _parent: Option<&Snapshot>,
        ctx: &ApplyContext,
    ) -> FloeResult<Vec<ManifestFile>> {
        let target = base.snapshot(self.snapshot_id).ok_or_else(|| {
            FloeError::Validation(format!(
                "Cannot roll back to unknown snapshot id: {}",
                self.snapshot_id
            ))
        })?;
        target.all_manifests(ctx.io()).await
    }

    fn summary(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    async fn clean_uncommitted(&mut self, _committed: &HashSet<String>, _cleaner: &FileCleaner) {
        // rollbacks write no manifests
    }
}
