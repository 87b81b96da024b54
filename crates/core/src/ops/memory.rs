//! In-memory [`TableOperations`] over an in-memory object store
//!
//! Used by the test-suite and examples. The compare-and-swap holds the
//! metadata behind a lock and compares against the caller's base, which gives
//! the same conflict behavior a catalog-backed implementation provides.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use object_store::memory::InMemory;
use uuid::Uuid;

use super::TableOperations;
use crate::errors::{FloeError, FloeResult};
use crate::storage::{FileIo, ObjectStoreRef};
use crate::table::TableMetadata;

/// [`TableOperations`] holding metadata in process memory.
pub struct InMemoryTableOperations {
    name: String,
    store: ObjectStoreRef,
    state: Mutex<TableMetadata>,
}

impl InMemoryTableOperations {
    /// Create table operations for `metadata`, backed by a fresh in-memory
    /// object store.
    pub fn new(name: impl Into<String>, metadata: TableMetadata) -> Self {
        Self::with_store(name, metadata, Arc::new(InMemory::new()))
    }

    /// Create table operations for `metadata` over the given store.
    pub fn with_store(
        name: impl Into<String>,
        metadata: TableMetadata,
        store: ObjectStoreRef,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            state: Mutex::new(metadata),
        }
    }

    fn state(&self) -> FloeResult<std::sync::MutexGuard<'_, TableMetadata>> {
        self.state
            .lock()
            .map_err(|_| FloeError::generic("table metadata lock poisoned"))
    }
}

#[async_trait]
impl TableOperations for InMemoryTableOperations {
    fn table_name(&self) -> String {
        self.name.clone()
    }

    fn current(&self) -> TableMetadata {
        self.state()
            .map(|state| state.clone())
            .unwrap_or_else(|_| TableMetadata::new("memory://poisoned"))
    }

    async fn refresh(&self) -> FloeResult<TableMetadata> {
        Ok(self.state()?.clone())
    }

    async fn commit(&self, base: &TableMetadata, updated: TableMetadata) -> FloeResult<()> {
        let mut state = self.state()?;
        if *state != *base {
            return Err(FloeError::CommitConflict(format!(
                "table {} was updated concurrently",
                self.name
            )));
        }
        *state = updated;
        Ok(())
    }

    fn io(&self) -> FileIo {
        FileIo::new(self.store.clone())
    }

    fn metadata_file_location(&self, name: &str) -> String {
        format!("metadata/{name}")
    }

    fn new_snapshot_id(&self) -> i64 {
        // random positive id derived from a v4 UUID
        (Uuid::new_v4().as_u128() & i64::MAX as u128) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_detects_concurrent_update() {
        let ops = InMemoryTableOperations::new("t", TableMetadata::new("memory://t"));
        let base = ops.current();

        let mut first = base.clone();
        first.last_sequence_number = 1;
        ops.commit(&base, first).await.unwrap();

        let mut second = base.clone();
        second.last_sequence_number = 2;
        let err = ops.commit(&base, second).await.unwrap_err();
        assert!(matches!(err, FloeError::CommitConflict(_)));
    }

    #[test]
    fn test_snapshot_ids_are_positive() {
        let ops = InMemoryTableOperations::new("t", TableMetadata::new("memory://t"));
        for _ in 0..64 {
            assert!(ops.new_snapshot_id() >= 0);
        }
    }
}
