//! Defines [`Error`], the main error type for the crate, plus the crate-wide
//! [`DeltaResult`] alias.

use std::backtrace::Backtrace;
use std::io;

use crate::Version;

/// A [`std::result::Result`] that has the kernel [`Error`] as the error variant
pub type DeltaResult<T, E = Error> = std::result::Result<T, E>;

/// All the types of errors that the transaction core can surface. Every fallible public
/// operation returns [`DeltaResult`] with one of these as the error variant.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A `std::io::Error` surfaced from the engine, wrapped so the source is preserved
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// An error encountered while serializing or deserializing JSON
    #[error("Json serde error: {0}")]
    JsonSerde(#[from] serde_json::Error),

    /// An error performing operations on urls
    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A catch-all error for invalid input or state that has no more specific variant
    #[error("Generic delta kernel error: {0}")]
    Generic(String),

    /// A file could not be found at the expected location
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The file already exists at the path, prohibiting a non-overwrite write. This is the
    /// commit-collision signal: the transaction either retries via conflict resolution or fails.
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    /// A table location was provided that is not usable
    #[error("Invalid table location: {0}")]
    InvalidTableLocation(String),

    /// A file name in the `_delta_log` directory could not be parsed
    #[error("Invalid log path: {0}")]
    InvalidLogPath(String),

    /// The requested functionality is not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// An internal invariant was violated. These are bugs, not user errors.
    #[error("Internal error {0}. This is a kernel bug, please report.")]
    InternalError(String),

    /// A table already exists at the location, and the requested operation cannot replace it
    #[error("Table already exists at {0}")]
    TableAlreadyExists(String),

    /// A schema is required to define a new table but none was provided
    #[error("No schema was provided when creating table at {0}")]
    SchemaNotProvided(String),

    /// A new managed table was requested at a location that already holds data
    #[error("Cannot create table at non-empty location {0}")]
    NonEmptyTableLocation(String),

    /// An external table was declared without a schema and no delta log exists to supply one
    #[error("External table at {0} has no delta log and no schema was provided")]
    ExternalTableWithoutLog(String),

    /// A clustered table cannot be replaced by a partitioned one
    #[error("Cannot replace clustered table at {0} with a partitioned table")]
    ReplacingClusteredWithPartitioned(String),

    /// The provided schema does not match the schema of the existing table
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The provided partition columns do not match those of the existing table
    #[error("Partition columns mismatch: {0}")]
    PartitionColumnsMismatch(String),

    /// The provided clustering specification does not match that of the existing table
    #[error("Clustering columns mismatch: {0}")]
    ClusteringColumnsMismatch(String),

    /// The provided table properties do not match those of the existing table
    #[error("Table properties mismatch: {0}")]
    TablePropertiesMismatch(String),

    /// A domain marked for removal does not exist in the read snapshot
    #[error("Domain metadata for domain {domain} does not exist in table at version {version}")]
    DomainDoesNotExist { domain: String, version: Version },

    /// The table is append-only and the commit attempted to remove data
    #[error("Cannot modify append-only table {0}: this table only allows appends")]
    CannotModifyAppendOnlyTable(String),

    /// A winning transaction committed a protocol change after our read snapshot
    #[error("Protocol changed: {0}")]
    ProtocolChanged(String),

    /// A winning transaction committed a metadata change after our read snapshot
    #[error("Metadata changed: {0}")]
    MetadataChanged(String),

    /// A winning transaction already committed an idempotency marker for this application with
    /// an equal or newer version
    #[error(
        "Concurrent transaction for app id {app_id}: attempted version {attempt_version} but a \
         winning commit recorded version {committed_version}"
    )]
    ConcurrentTransaction {
        app_id: String,
        attempt_version: i64,
        committed_version: i64,
    },

    /// A winning transaction touched a metadata domain this transaction also writes, and no
    /// domain-specific resolution exists
    #[error("Concurrent domain metadata conflict on domain {0}")]
    ConcurrentDomainMetadata(String),

    /// A concurrent writer won the commit race and retries are exhausted
    #[error("Concurrent write failed after {0} retries")]
    ConcurrentWrite(usize),

    /// Another iceberg compat version is enabled alongside the requested one, or an
    /// incompatible table feature is present
    #[error("{compat_version}: incompatible feature enabled: {other_key}")]
    IcebergCompatIncompatibleVersion {
        compat_version: String,
        other_key: String,
    },

    /// A table property holds a value that iceberg compat cannot accept
    #[error("{compat_version}: value '{value}' for property '{key}' is not compatible")]
    IcebergCompatIncompatibleProperty {
        compat_version: String,
        key: String,
        value: String,
    },

    /// The schema contains a data type iceberg compat does not support
    #[error("{compat_version}: unsupported data type in schema: {type_name}")]
    IcebergCompatUnsupportedType {
        compat_version: String,
        type_name: String,
    },

    /// A partition column has a data type iceberg compat does not support
    #[error("{compat_version}: unsupported partition column type: {type_name}")]
    IcebergCompatUnsupportedPartitionType {
        compat_version: String,
        type_name: String,
    },

    /// A recorded type change is not legal under iceberg
    #[error("{compat_version}: unsupported type widening from {from} to {to}")]
    IcebergCompatUnsupportedTypeWidening {
        compat_version: String,
        from: String,
        to: String,
    },

    /// A table feature iceberg compat depends on is missing from the protocol
    #[error("{compat_version}: required table feature '{feature}' is missing from the protocol")]
    IcebergCompatRequiredFeatureMissing {
        compat_version: String,
        feature: String,
    },

    /// Toggling an iceberg compat flag on an existing table is not allowed in either direction
    #[error("Cannot {action} '{key}' on an existing table")]
    IcebergCompatConfigChange { action: &'static str, key: String },

    /// An add action is missing `numRecords` statistics which iceberg compat requires
    #[error("{compat_version}: file {path} is missing numRecords statistics")]
    IcebergCompatMissingNumRecordsStats {
        compat_version: String,
        path: String,
    },

    /// Expected column was missing from the schema
    #[error("Column '{0}' not found in the schema")]
    ColumnNotFound(String),

    /// Internal error with backtrace, produced by [`Error::internal_error`]
    #[error("{source}")]
    Backtraced {
        source: Box<Self>,
        backtrace: Box<Backtrace>,
    },
}

impl Error {
    /// Capture a backtrace when the error is created if backtraces are enabled
    #[must_use]
    pub fn with_backtrace(self) -> Self {
        let backtrace = Backtrace::capture();
        match backtrace.status() {
            std::backtrace::BacktraceStatus::Captured => Self::Backtraced {
                source: Box::new(self),
                backtrace: Box::new(backtrace),
            },
            _ => self,
        }
    }

    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }
    pub fn file_not_found(path: impl ToString) -> Self {
        Self::FileNotFound(path.to_string())
    }
    pub fn file_already_exists(path: impl ToString) -> Self {
        Self::FileAlreadyExists(path.to_string())
    }
    pub fn unsupported(msg: impl ToString) -> Self {
        Self::Unsupported(msg.to_string())
    }
    pub fn internal_error(msg: impl ToString) -> Self {
        Self::InternalError(msg.to_string()).with_backtrace()
    }
    pub fn invalid_log_path(url: impl ToString) -> Self {
        Self::InvalidLogPath(url.to_string())
    }
    pub fn invalid_table_location(location: impl ToString) -> Self {
        Self::InvalidTableLocation(location.to_string())
    }
    pub fn protocol_changed(msg: impl ToString) -> Self {
        Self::ProtocolChanged(msg.to_string())
    }
    pub fn metadata_changed(msg: impl ToString) -> Self {
        Self::MetadataChanged(msg.to_string())
    }
    pub fn concurrent_domain_metadata(domain: impl ToString) -> Self {
        Self::ConcurrentDomainMetadata(domain.to_string())
    }
    pub fn column_not_found(name: impl ToString) -> Self {
        Self::ColumnNotFound(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_wrapping() {
        let io_err = io::Error::other("disk on fire");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(Error::generic("x"), Error::Generic(_)));
        assert!(matches!(
            Error::file_already_exists("p"),
            Error::FileAlreadyExists(_)
        ));
        assert!(matches!(
            Error::protocol_changed("p"),
            Error::ProtocolChanged(_)
        ));
    }
}
