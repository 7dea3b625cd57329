//! # delta-txn-kernel
//!
//! The transaction core for [Delta](https://github.com/delta-io/delta) tables: a library that
//! takes a [`Snapshot`] of a table, accumulates proposed changes, and atomically commits them as
//! a new log version — with optimistic concurrency control, conflict resolution against
//! concurrently-committed versions, and metadata validation.
//!
//! A Delta table is a directory containing data files plus an append-only log of JSON commits
//! under `_delta_log/` that describe the table's current state (schema, protocol, active files,
//! domain metadata, and application-idempotency markers). Readers reconstruct state by replaying
//! the log; writers append new commits. This crate owns the write side of that contract:
//!
//! - [`transaction::Transaction`] — builds the commit actions, assigns versions, writes
//!   atomically, and retries under contention.
//! - [`transaction::create_table`] — validates and plans `CREATE` / `REPLACE` /
//!   `CREATE OR REPLACE` operations.
//! - conflict resolution — on a version collision, reads the winning commits and decides whether
//!   the losing transaction may rebase.
//! - [`iceberg_compat`] — a pluggable rule engine validating metadata for Iceberg conversion
//!   compatibility.
//!
//! Physical storage is abstracted behind the [`Engine`] trait; a synchronous local-filesystem
//! implementation is provided in [`engine::sync`].

use std::sync::Arc;

use url::Url;

pub mod actions;
pub mod clustering;
pub mod crc;
pub mod engine;
pub(crate) mod error;
pub mod iceberg_compat;
pub mod log_compaction;
pub(crate) mod log_segment;
pub(crate) mod path;
pub mod row_tracking;
pub mod schema;
pub mod snapshot;
pub mod table_features;
pub mod table_properties;
pub mod transaction;
pub(crate) mod utils;

pub use error::{DeltaResult, Error};
pub use snapshot::{Snapshot, SnapshotRef};

/// The version of a Delta table: the number of the latest commit in its log. Versions start
/// at zero and increase without gaps.
pub type Version = u64;

/// Sentinel version for a snapshot of a table that has no committed log yet (create-table
/// transactions). `PRE_COMMIT_VERSION.wrapping_add(1)` is 0, the first real version.
pub const PRE_COMMIT_VERSION: Version = Version::MAX;

/// The version of this crate, recorded in the `engineInfo` field of every commit.
pub const KERNEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Metadata about a file the storage engine knows about (a log file, a checksum file, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// The fully qualified path to the object
    pub location: Url,
    /// The last modified time as milliseconds since unix epoch
    pub last_modified: i64,
    /// The size in bytes of the object
    pub size: u64,
}

impl FileMeta {
    /// Create a new instance of `FileMeta`
    pub fn new(location: Url, last_modified: i64, size: u64) -> Self {
        Self {
            location,
            last_modified,
            size,
        }
    }
}

/// Interface for listing and inspecting files in the underlying object store.
pub trait StorageHandler: Send + Sync {
    /// List the paths in the same directory that are lexicographically greater or equal to
    /// (UTF-8 sorting) the given `path`. The result should also be sorted by the file name.
    fn list_from(
        &self,
        path: &Url,
    ) -> DeltaResult<Box<dyn Iterator<Item = DeltaResult<FileMeta>> + Send>>;

    /// Create the directory at `path`, including any missing parents. Returns `true` if the
    /// directory exists when the call completes.
    fn mkdirs(&self, path: &Url) -> DeltaResult<bool>;
}

/// Interface for reading and writing the line-delimited JSON files that make up the Delta log.
///
/// `write_json_lines` with `overwrite = false` is the atomic-create primitive the whole commit
/// protocol rests on: it must either write the complete file or leave nothing behind, and it
/// must fail with [`Error::FileAlreadyExists`] when the target exists.
pub trait JsonHandler: Send + Sync {
    /// Read a file of newline-delimited JSON, returning one string per line.
    fn read_json_lines(
        &self,
        file: &FileMeta,
    ) -> DeltaResult<Box<dyn Iterator<Item = DeltaResult<String>> + Send>>;

    /// Atomically write the given lines as a newline-delimited JSON file at `path`.
    fn write_json_lines(
        &self,
        path: &Url,
        lines: &mut dyn Iterator<Item = DeltaResult<String>>,
        overwrite: bool,
    ) -> DeltaResult<()>;
}

/// The engine is the interface between the transaction core and the storage system it runs on.
/// All blocking operations (listing log files, reading winning commits, the atomic create-new
/// write of the commit file) go through these handlers; the core holds no other handles to the
/// outside world.
pub trait Engine: Send + Sync {
    /// Get the connector provided [`StorageHandler`]
    fn storage_handler(&self) -> Arc<dyn StorageHandler>;

    /// Get the connector provided [`JsonHandler`]
    fn json_handler(&self) -> Arc<dyn JsonHandler>;
}
