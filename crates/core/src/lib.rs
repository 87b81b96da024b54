//! Native snapshot producer for floe tables in Rust
//!
//! Floe is a table format that tracks the files of a table through immutable,
//! named snapshots. This crate implements the writer side of the format: it
//! turns a pending set of data/delete file changes into manifests and a
//! manifest list, builds a candidate snapshot, and installs that snapshot on a
//! branch using optimistic concurrency against a pluggable
//! [`TableOperations`](crate::ops::TableOperations) implementation.
//!
//! # Usage
//!
//! Append a file to the `main` branch of an in-memory table:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use floe_core::manifest::{DataFile, PartitionSpec};
//! use floe_core::operations::append::FastAppend;
//! use floe_core::operations::transaction::SnapshotProducer;
//! use floe_core::ops::memory::InMemoryTableOperations;
//! use floe_core::table::TableMetadata;
//!
//! # async {
//! let ops = Arc::new(InMemoryTableOperations::new(
//!     "demo",
//!     TableMetadata::new("memory://demo"),
//! ));
//! let append = FastAppend::new(PartitionSpec::unpartitioned())
//!     .with_file(DataFile::data("data/a.parquet", 100, 1024));
//! let snapshot = SnapshotProducer::new(ops, Box::new(append))
//!     .commit()
//!     .await
//!     .unwrap();
//! assert_eq!(snapshot.sequence_number, 1);
//! # };
//! ```
//!
//! The object store used for durable bytes, the metadata compare-and-swap, and
//! the encryption of output files are all external collaborators consumed
//! through narrow interfaces; see [`ops`] and [`storage`].

pub mod errors;
pub mod events;
pub mod manifest;
pub mod operations;
pub mod ops;
pub mod storage;
pub mod table;

pub use errors::{FloeError, FloeResult};

/// The [crates.io](https://crates.io/crates/floe-core) version of this crate
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_crate_version() {
        assert!(!super::crate_version().is_empty());
    }
}
