//! Post commit hooks: follow-up work a successful commit asks the engine to perform. Hooks are
//! returned in [`TransactionCommitResult`](super::TransactionCommitResult); invoking them is the
//! caller's choice and failures do not affect the already-committed version.

use url::Url;

use crate::crc::{compute_crc_info, try_write_crc_file, CrcInfo};
use crate::log_compaction::LogCompactionWriter;
use crate::{DeltaResult, Engine, Error, Version};

/// The kinds of post commit hooks the kernel emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCommitHookType {
    /// Write a checkpoint for the committed version
    Checkpoint,
    /// Write the version checksum derived incrementally from the pre-commit checksum
    ChecksumSimple,
    /// Write the version checksum from a full log rescan
    ChecksumFull,
    /// Compact the trailing window of commit files into a single compacted file
    LogCompaction,
    /// Refresh the Iceberg copy of the table for the committed version
    IcebergConversion,
    /// Refresh the Hudi copy of the table for the committed version
    HudiConversion,
}

pub trait PostCommitHook: std::fmt::Debug + Send + Sync {
    /// Invoke this hook to perform its action
    fn invoke(&self, engine: &dyn Engine) -> DeltaResult<()>;

    /// Get the type of hook this is
    fn hook_type(&self) -> PostCommitHookType;
}

/// Emitted when the committed version lands on the checkpoint interval. Checkpoint files are
/// parquet; producing them is the engine's job, so this hook only conveys the target.
#[derive(Debug)]
pub struct CheckpointHook {
    pub table_root: Url,
    pub version: Version,
}

impl PostCommitHook for CheckpointHook {
    fn invoke(&self, _engine: &dyn Engine) -> DeltaResult<()> {
        Err(Error::unsupported(
            "checkpoint files are written by the engine's parquet writer; this hook only \
             carries the version to checkpoint",
        ))
    }

    fn hook_type(&self) -> PostCommitHookType {
        PostCommitHookType::Checkpoint
    }
}

/// Writes the checksum file computed incrementally during the commit.
#[derive(Debug)]
pub struct ChecksumSimpleHook {
    pub(crate) log_root: Url,
    pub(crate) crc: CrcInfo,
}

impl PostCommitHook for ChecksumSimpleHook {
    fn invoke(&self, engine: &dyn Engine) -> DeltaResult<()> {
        try_write_crc_file(engine, &self.log_root, &self.crc)
    }

    fn hook_type(&self) -> PostCommitHookType {
        PostCommitHookType::ChecksumSimple
    }
}

/// Recomputes the checksum for the committed version by replaying the log, then writes it.
/// This is the repair path when no pre-commit checksum was available (or it was dropped during
/// conflict retries).
#[derive(Debug)]
pub struct ChecksumFullHook {
    pub(crate) log_root: Url,
    pub(crate) version: Version,
}

impl PostCommitHook for ChecksumFullHook {
    fn invoke(&self, engine: &dyn Engine) -> DeltaResult<()> {
        let crc = compute_crc_info(engine, &self.log_root, self.version)?;
        try_write_crc_file(engine, &self.log_root, &crc)
    }

    fn hook_type(&self) -> PostCommitHookType {
        PostCommitHookType::ChecksumFull
    }
}

/// Compacts the window of commits ending at the committed version into one compacted file.
#[derive(Debug)]
pub struct LogCompactionHook {
    pub(crate) log_root: Url,
    pub(crate) start_version: Version,
    pub(crate) end_version: Version,
    pub(crate) min_file_retention_timestamp_millis: i64,
}

impl PostCommitHook for LogCompactionHook {
    fn invoke(&self, engine: &dyn Engine) -> DeltaResult<()> {
        LogCompactionWriter::new(
            self.log_root.clone(),
            self.start_version,
            self.end_version,
            self.min_file_retention_timestamp_millis,
        )?
        .write(engine)
    }

    fn hook_type(&self) -> PostCommitHookType {
        PostCommitHookType::LogCompaction
    }
}

/// Emitted when the committed metadata enables a universal surface format. Running the actual
/// converter belongs to the engine; the hook carries the table and version to convert.
#[derive(Debug)]
pub struct FormatConversionHook {
    pub table_root: Url,
    pub version: Version,
    pub(crate) hook_type: PostCommitHookType,
}

impl PostCommitHook for FormatConversionHook {
    fn invoke(&self, _engine: &dyn Engine) -> DeltaResult<()> {
        Err(Error::unsupported(
            "surface format conversion is performed by the engine's converter; this hook only \
             carries the version to convert",
        ))
    }

    fn hook_type(&self) -> PostCommitHookType {
        self.hook_type
    }
}
