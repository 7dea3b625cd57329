//! CRC (version checksum) file support.
//!
//! A CRC file contains a compact snapshot of table state at a specific version, which the commit
//! pipeline uses to answer "what does the table hold right now" questions (size, file count,
//! active domains) without a full log replay, and which the checksum post-commit hooks produce.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::actions::{DomainMetadata, Metadata, Protocol};
use crate::path::ParsedLogPath;
use crate::{DeltaResult, Engine, Error, FileMeta, Version};

/// Parsed content of a CRC (version checksum) file.
///
/// A checksum file sits in `_delta_log/` next to the commit it describes, shares its 20-digit
/// zero-padded version in the file name, and holds a single JSON object in this shape: totals
/// over the live files, the effective protocol and metadata, and optionally the active domains
/// and a file-size histogram. Checksums are a cache, never the source of truth -- anything in
/// them can be rebuilt by replaying the log, which is exactly what the full-checksum hook does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrcInfo {
    /// The version this checksum describes. Carried by the file name, not the JSON body.
    #[serde(skip)]
    pub version: Version,
    /// Total size of the table in bytes: the sum of `size` over all live add actions
    pub table_size_bytes: i64,
    /// Number of live add actions in this table version
    pub num_files: i64,
    /// Number of metadata actions; must be 1
    pub num_metadata: i64,
    /// Number of protocol actions; must be 1
    pub num_protocol: i64,
    /// The table metadata at this version
    pub metadata: Metadata,
    /// The table protocol at this version
    pub protocol: Protocol,
    /// A unique identifier for the transaction that produced this commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<String>,
    /// The in-commit timestamp of this version, present iff in-commit timestamps are enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_commit_timestamp_opt: Option<i64>,
    /// Live domain metadata at this version, excluding tombstones
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_metadata: Option<Vec<DomainMetadata>>,
    /// Size distribution of live files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_histogram: Option<FileSizeHistogram>,
}

/// A histogram tracking file counts and total bytes across size ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSizeHistogram {
    /// A sorted array of bin boundaries where each element is the inclusive start of a bin and
    /// the next element its exclusive end. The first element must be 0.
    pub sorted_bin_boundaries: Vec<i64>,
    /// Count of files in each bin. Length matches `sorted_bin_boundaries`.
    pub file_counts: Vec<i64>,
    /// Total bytes of files in each bin. Length matches `sorted_bin_boundaries`.
    pub total_bytes: Vec<i64>,
}

impl Default for FileSizeHistogram {
    fn default() -> Self {
        // power-of-two boundaries from 8 MiB to 1 GiB plus a tail bin
        let sorted_bin_boundaries = vec![
            0,
            8 << 20,
            16 << 20,
            32 << 20,
            64 << 20,
            128 << 20,
            256 << 20,
            512 << 20,
            1 << 30,
        ];
        let bins = sorted_bin_boundaries.len();
        Self {
            sorted_bin_boundaries,
            file_counts: vec![0; bins],
            total_bytes: vec![0; bins],
        }
    }
}

impl FileSizeHistogram {
    fn bin_for(&self, size: i64) -> usize {
        match self.sorted_bin_boundaries.binary_search(&size) {
            Ok(idx) => idx,
            Err(0) => 0,
            Err(idx) => idx - 1,
        }
    }

    /// Account for a file of `size` bytes entering the table
    pub fn insert(&mut self, size: i64) {
        let bin = self.bin_for(size);
        self.file_counts[bin] += 1;
        self.total_bytes[bin] += size;
    }

    /// Account for a file of `size` bytes leaving the table
    pub fn remove(&mut self, size: i64) {
        let bin = self.bin_for(size);
        if self.file_counts[bin] == 0 || self.total_bytes[bin] < size {
            // an inconsistent histogram is worse than none
            warn!(size, bin, "file size histogram underflow, dropping update");
            return;
        }
        self.file_counts[bin] -= 1;
        self.total_bytes[bin] -= size;
    }
}

/// Try to read the checksum file for `version`. Returns `Ok(None)` if the file does not exist
/// or cannot be parsed; a corrupt or missing CRC only costs us the fast path.
pub(crate) fn try_read_crc_file(
    engine: &dyn Engine,
    log_root: &Url,
    version: Version,
) -> DeltaResult<Option<CrcInfo>> {
    let path = ParsedLogPath::new_crc(log_root, version)?;
    let file = FileMeta::new(path.location.clone(), 0, 0);
    let mut lines = match engine.json_handler().read_json_lines(&file) {
        Ok(lines) => lines,
        Err(Error::FileNotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let Some(line) = lines.next() else {
        warn!(location = %path.location, "empty checksum file");
        return Ok(None);
    };
    match serde_json::from_str::<CrcInfo>(&line?) {
        Ok(mut crc) => {
            crc.version = version;
            Ok(Some(crc))
        }
        Err(e) => {
            warn!(location = %path.location, error = %e, "failed to parse checksum file, ignoring");
            Ok(None)
        }
    }
}

/// Atomically write the checksum file for `crc.version`. A concurrent writer beating us to the
/// same path must have derived the same content, so an existing file is success.
pub(crate) fn try_write_crc_file(
    engine: &dyn Engine,
    log_root: &Url,
    crc: &CrcInfo,
) -> DeltaResult<()> {
    let path = ParsedLogPath::new_crc(log_root, crc.version)?;
    let line = serde_json::to_string(crc)?;
    let mut lines = std::iter::once(Ok(line));
    match engine
        .json_handler()
        .write_json_lines(&path.location, &mut lines, false)
    {
        Ok(()) => {
            debug!(version = crc.version, "wrote checksum file");
            Ok(())
        }
        Err(Error::FileAlreadyExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Compute the checksum record for `version` by replaying commits `0..=version`. This is the
/// full-rescan path used when no incremental checksum could be derived.
pub(crate) fn compute_crc_info(
    engine: &dyn Engine,
    log_root: &Url,
    version: Version,
) -> DeltaResult<CrcInfo> {
    use crate::actions::Action;
    use crate::log_segment::LogSegment;
    use std::collections::HashMap;

    let segment = LogSegment::for_versions(engine, log_root.clone(), 0, Some(version))?;
    if segment.end_version != version {
        return Err(Error::generic(format!(
            "cannot compute checksum for version {version}: log ends at {}",
            segment.end_version
        )));
    }

    let mut protocol: Option<Protocol> = None;
    let mut metadata: Option<Metadata> = None;
    let mut file_sizes: HashMap<String, i64> = HashMap::new();
    let mut domains: HashMap<String, DomainMetadata> = HashMap::new();
    let mut last_ict: Option<i64> = None;
    for batch in segment.read_actions(engine) {
        let batch = batch?;
        let is_last = batch.version == version;
        for action in batch.actions {
            match action {
                Action::Protocol(p) => protocol = Some(p),
                Action::Metadata(m) => metadata = Some(m),
                Action::Add(add) => {
                    file_sizes.insert(add.path, add.size);
                }
                Action::Remove(remove) => {
                    file_sizes.remove(&remove.path);
                }
                Action::DomainMetadata(dm) => {
                    domains.insert(dm.domain().to_string(), dm);
                }
                Action::CommitInfo(ci) if is_last => last_ict = ci.in_commit_timestamp,
                Action::CommitInfo(_) | Action::Txn(_) => {}
            }
        }
    }

    let protocol = protocol
        .ok_or_else(|| Error::generic("no protocol action found while computing checksum"))?;
    let metadata = metadata
        .ok_or_else(|| Error::generic("no metadata action found while computing checksum"))?;
    let mut histogram = FileSizeHistogram::default();
    for size in file_sizes.values() {
        histogram.insert(*size);
    }
    let mut active_domains: Vec<DomainMetadata> = domains
        .into_values()
        .filter(|dm| !dm.is_removed())
        .collect();
    active_domains.sort_by(|a, b| a.domain().cmp(b.domain()));

    Ok(CrcInfo {
        version,
        table_size_bytes: file_sizes.values().sum(),
        num_files: file_sizes.len() as i64,
        num_metadata: 1,
        num_protocol: 1,
        metadata,
        protocol,
        txn_id: None,
        in_commit_timestamp_opt: last_ict,
        domain_metadata: Some(active_domains),
        file_size_histogram: Some(histogram),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_insert_remove() {
        let mut histogram = FileSizeHistogram::default();
        histogram.insert(100);
        histogram.insert(10 << 20);
        histogram.insert(10 << 20);
        assert_eq!(histogram.file_counts[0], 1);
        assert_eq!(histogram.file_counts[1], 2);
        assert_eq!(histogram.total_bytes[1], 2 * (10 << 20));

        histogram.remove(10 << 20);
        assert_eq!(histogram.file_counts[1], 1);

        // underflow is dropped, not applied
        histogram.remove(200 << 20);
        assert_eq!(histogram.file_counts.iter().sum::<i64>(), 2);
    }

    #[test]
    fn test_crc_round_trip() {
        let crc = CrcInfo {
            version: 3,
            table_size_bytes: 1000,
            num_files: 2,
            num_metadata: 1,
            num_protocol: 1,
            metadata: Metadata::default(),
            protocol: Protocol::default(),
            txn_id: Some("txn".to_string()),
            in_commit_timestamp_opt: None,
            domain_metadata: Some(vec![DomainMetadata::new("foo", "{}")]),
            file_size_histogram: Some(FileSizeHistogram::default()),
        };
        let json = serde_json::to_string(&crc).unwrap();
        assert!(json.contains("tableSizeBytes"));
        let mut parsed: CrcInfo = serde_json::from_str(&json).unwrap();
        parsed.version = 3; // version travels in the file name
        assert_eq!(parsed, crc);
    }
}
