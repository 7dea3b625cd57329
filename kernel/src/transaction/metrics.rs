//! Counters maintained while streaming a commit, and the report handed back to the caller
//! after the transaction finishes.

use std::time::Duration;

use crate::crc::FileSizeHistogram;
use crate::{DeltaResult, Error, Version};

/// Per-transaction counters. Action counters are per-attempt: they reset when a conflict forces
/// a retry, because the failed attempt's stream was partially counted.
#[derive(Debug, Clone, Default)]
pub struct TransactionMetrics {
    /// Number of commit attempts, including the successful one
    pub commit_attempts: u64,
    /// Total number of actions written in the successful attempt
    pub total_actions: u64,
    pub num_add_files: u64,
    pub total_add_files_size_bytes: i64,
    pub num_remove_files: u64,
    pub total_remove_files_size_bytes: i64,
    /// Running file-size histogram for the table, carried from the pre-commit checksum.
    /// Dropped on retry; the full-checksum hook is the repair path.
    pub file_size_histogram: Option<FileSizeHistogram>,
}

impl TransactionMetrics {
    /// Metrics for a commit defining a brand new table: the histogram starts empty.
    pub(crate) fn for_new_table() -> Self {
        Self {
            file_size_histogram: Some(FileSizeHistogram::default()),
            ..Default::default()
        }
    }

    /// Metrics for a commit on an existing table, seeded with the histogram from the read
    /// snapshot's checksum when one is available.
    pub(crate) fn with_existing_histogram(histogram: Option<FileSizeHistogram>) -> Self {
        Self {
            file_size_histogram: histogram,
            ..Default::default()
        }
    }

    pub(crate) fn update_for_add(&mut self, size: i64) {
        self.num_add_files += 1;
        self.total_add_files_size_bytes += size;
        if let Some(histogram) = &mut self.file_size_histogram {
            histogram.insert(size);
        }
    }

    pub(crate) fn update_for_remove(&mut self, size: Option<i64>) -> DeltaResult<()> {
        let size = size.ok_or_else(|| {
            Error::internal_error("remove action is missing the file size during commit")
        })?;
        self.num_remove_files += 1;
        self.total_remove_files_size_bytes += size;
        if let Some(histogram) = &mut self.file_size_histogram {
            histogram.remove(size);
        }
        Ok(())
    }

    /// Reset the per-attempt action counters before a rebased retry.
    // TODO: reconcile the file size histogram against the winning commits instead of dropping
    // it and leaving the repair to the full-checksum hook.
    pub(crate) fn reset_for_retry(&mut self) {
        self.total_actions = 0;
        self.num_add_files = 0;
        self.total_add_files_size_bytes = 0;
        self.num_remove_files = 0;
        self.total_remove_files_size_bytes = 0;
        self.file_size_histogram = None;
    }
}

/// A summary of how the transaction went, returned inside
/// [`TransactionCommitResult`](super::TransactionCommitResult).
#[derive(Debug, Clone)]
pub struct TransactionReport {
    /// The table this transaction wrote to
    pub table_path: String,
    /// The operation label that was committed
    pub operation: String,
    /// The engine info string recorded in the commit
    pub engine_info: String,
    /// The version that was committed, if the transaction succeeded
    pub committed_version: Option<Version>,
    /// Number of commit attempts, including the successful one
    pub num_commit_attempts: u64,
    /// Wall-clock duration of the whole commit, including retries
    pub total_duration: Duration,
    /// Whether the checksum for the committed version could be produced incrementally (via the
    /// simple checksum hook) rather than by a full log rescan
    pub produced_incremental_crc: bool,
    /// Final action counters of the successful attempt
    pub metrics: TransactionMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_accounting() {
        let mut metrics = TransactionMetrics::for_new_table();
        metrics.update_for_add(100);
        metrics.update_for_add(50);
        metrics.update_for_remove(Some(30)).unwrap();
        assert_eq!(metrics.num_add_files, 2);
        assert_eq!(metrics.total_add_files_size_bytes, 150);
        assert_eq!(metrics.num_remove_files, 1);
        assert_eq!(metrics.total_remove_files_size_bytes, 30);
        assert!(metrics.update_for_remove(None).is_err());
    }

    #[test]
    fn test_reset_for_retry_drops_histogram() {
        let mut metrics = TransactionMetrics::for_new_table();
        metrics.update_for_add(100);
        metrics.commit_attempts = 1;
        metrics.total_actions = 3;
        metrics.reset_for_retry();
        assert_eq!(metrics.num_add_files, 0);
        assert_eq!(metrics.total_actions, 0);
        assert!(metrics.file_size_histogram.is_none());
        // attempts survive the reset
        assert_eq!(metrics.commit_attempts, 1);
    }
}
