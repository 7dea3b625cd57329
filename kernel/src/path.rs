//! Naming scheme of the files inside `_delta_log`: parsing listed paths into their version and
//! kind, and building the paths this crate writes.

use std::str::FromStr;

use url::Url;

use crate::{DeltaResult, Error, FileMeta, Version};

/// Width of the zero-padded version prefix on every log file name
const VERSION_LEN: usize = 20;

/// Width of the part counters in a multi-part checkpoint name
const MULTIPART_PART_LEN: usize = 10;

/// Width of the uuid segment in a uuid-named checkpoint
const UUID_PART_LEN: usize = 36;

/// The name of the directory holding the commit log, relative to the table root
pub(crate) const LOG_DIR_NAME: &str = "_delta_log/";

/// The `_delta_log` directory of the table rooted at `table_root`
pub(crate) fn log_root(table_root: &Url) -> DeltaResult<Url> {
    Ok(table_root.join(LOG_DIR_NAME)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogPathFileType {
    Commit,
    SinglePartCheckpoint,
    #[allow(unused)]
    UuidCheckpoint(String),
    #[allow(unused)]
    MultiPartCheckpoint {
        part_num: u32,
        num_parts: u32,
    },
    CompactedCommit {
        hi: Version,
    },
    Crc,
    Unknown,
}

/// A log file path together with what the file name says about it. `Location` is [`FileMeta`]
/// for paths that came out of a storage listing, or a bare [`Url`] for paths this crate is
/// about to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedLogPath<Location: LogPathLocation = FileMeta> {
    pub location: Location,
    #[allow(unused)]
    pub filename: String,
    pub version: Version,
    pub file_type: LogPathFileType,
}

/// Anything that can stand in for a log file's location. Listing results carry a [`FileMeta`];
/// path construction and tests only have a [`Url`]; one parser serves both.
pub(crate) trait LogPathLocation {
    fn url(&self) -> &Url;
}

impl LogPathLocation for FileMeta {
    fn url(&self) -> &Url {
        &self.location
    }
}

impl LogPathLocation for Url {
    fn url(&self) -> &Url {
        self
    }
}

/// A number embedded in a log file name is only valid at its exact zero-padded width.
fn parse_padded<T: FromStr>(part: &str, width: usize) -> Option<T> {
    (part.len() == width).then(|| part.parse().ok()).flatten()
}

/// Split a log file name into its version prefix and kind. `None` when the name does not start
/// with a zero-padded version followed by a dot, i.e. the file is not part of the log at all
/// (`_last_checkpoint`, stray temp files, ...).
fn classify_log_filename(
    filename: &str,
    url: &Url,
) -> DeltaResult<Option<(Version, LogPathFileType)>> {
    let Some(version) = filename
        .get(..VERSION_LEN)
        .and_then(|prefix| parse_padded::<Version>(prefix, VERSION_LEN))
    else {
        return Ok(None);
    };
    if filename.as_bytes().get(VERSION_LEN) != Some(&b'.') {
        return Ok(None);
    }
    let suffix = &filename[VERSION_LEN + 1..];

    let file_type = match suffix {
        "json" => LogPathFileType::Commit,
        "crc" => LogPathFileType::Crc,
        "checkpoint.parquet" => LogPathFileType::SinglePartCheckpoint,
        _ => {
            if let Some(middle) = suffix
                .strip_prefix("checkpoint.")
                .and_then(|rest| rest.strip_suffix(".parquet"))
            {
                if middle.len() == UUID_PART_LEN && !middle.contains('.') {
                    LogPathFileType::UuidCheckpoint(middle.to_string())
                } else if let Some((part, total)) = middle.split_once('.') {
                    let part_num: u32 = parse_padded(part, MULTIPART_PART_LEN)
                        .ok_or_else(|| Error::invalid_log_path(url))?;
                    let num_parts: u32 = parse_padded(total, MULTIPART_PART_LEN)
                        .ok_or_else(|| Error::invalid_log_path(url))?;
                    // parts are numbered 1..=num_parts
                    if part_num == 0 || part_num > num_parts {
                        return Err(Error::invalid_log_path(url));
                    }
                    LogPathFileType::MultiPartCheckpoint {
                        part_num,
                        num_parts,
                    }
                } else {
                    LogPathFileType::Unknown
                }
            } else if let Some(hi_part) = suffix.strip_suffix(".compacted.json") {
                let hi = parse_padded(hi_part, VERSION_LEN)
                    .ok_or_else(|| Error::invalid_log_path(url))?;
                LogPathFileType::CompactedCommit { hi }
            } else {
                LogPathFileType::Unknown
            }
        }
    };
    Ok(Some((version, file_type)))
}

impl<Location: LogPathLocation> ParsedLogPath<Location> {
    /// Parse a location into a log path. `Ok(None)` means the file is not a log file; an error
    /// means it pretends to be one but is malformed. Not the std `TryFrom` trait, because the
    /// not-a-log-file outcome needs an `Option` the trait cannot express.
    pub(crate) fn try_from(location: Location) -> DeltaResult<Option<ParsedLogPath<Location>>> {
        let url = location.url();
        let filename = url
            .path_segments()
            .ok_or_else(|| Error::invalid_log_path(url))?
            .next_back()
            .unwrap_or_default()
            .to_string();
        if filename.is_empty() {
            return Err(Error::invalid_log_path(url));
        }
        let Some((version, file_type)) = classify_log_filename(&filename, url)? else {
            return Ok(None);
        };
        Ok(Some(ParsedLogPath {
            location,
            filename,
            version,
            file_type,
        }))
    }

    pub(crate) fn is_commit(&self) -> bool {
        matches!(self.file_type, LogPathFileType::Commit)
    }

    #[allow(unused)]
    pub(crate) fn is_crc(&self) -> bool {
        matches!(self.file_type, LogPathFileType::Crc)
    }
}

impl ParsedLogPath<Url> {
    fn create_path(
        log_root: &Url,
        filename: String,
        version: Version,
        file_type: LogPathFileType,
    ) -> DeltaResult<Self> {
        let location = log_root.join(&filename)?;
        Ok(ParsedLogPath {
            location,
            filename,
            version,
            file_type,
        })
    }

    /// The path of the commit file for `version` under `log_root`
    pub(crate) fn new_commit(log_root: &Url, version: Version) -> DeltaResult<Self> {
        Self::create_path(
            log_root,
            format!("{version:020}.json"),
            version,
            LogPathFileType::Commit,
        )
    }

    /// The path of the checksum file for `version` under `log_root`
    pub(crate) fn new_crc(log_root: &Url, version: Version) -> DeltaResult<Self> {
        Self::create_path(
            log_root,
            format!("{version:020}.crc"),
            version,
            LogPathFileType::Crc,
        )
    }

    /// The path of the log compaction file covering `[lo, hi]` under `log_root`
    pub(crate) fn new_log_compaction(
        log_root: &Url,
        lo: Version,
        hi: Version,
    ) -> DeltaResult<Self> {
        if lo > hi {
            return Err(Error::generic(format!(
                "invalid version range for log compaction: {lo} > {hi}"
            )));
        }
        Self::create_path(
            log_root,
            format!("{lo:020}.{hi:020}.compacted.json"),
            lo,
            LogPathFileType::CompactedCommit { hi },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_log_dir_url() -> Url {
        Url::parse("file:///tmp/my_table/_delta_log/").unwrap()
    }

    fn parse(filename: &str) -> DeltaResult<Option<ParsedLogPath<Url>>> {
        let url = table_log_dir_url().join(filename).unwrap();
        ParsedLogPath::try_from(url)
    }

    #[test]
    fn test_commit_patterns() {
        let path = parse("00000000000000000005.json").unwrap().unwrap();
        assert_eq!(path.version, 5);
        assert!(path.is_commit());

        // too-short version is not a log file at all
        assert!(parse("005.json").unwrap().is_none());
        // non-numeric version is not a log file
        assert!(parse("deadbeefdeadbeefdead.json").unwrap().is_none());
    }

    #[test]
    fn test_crc_patterns() {
        let path = parse("00000000000000000005.crc").unwrap().unwrap();
        assert_eq!(path.version, 5);
        assert!(path.is_crc());
    }

    #[test]
    fn test_checkpoint_patterns() {
        let path = parse("00000000000000000010.checkpoint.parquet")
            .unwrap()
            .unwrap();
        assert_eq!(path.version, 10);
        assert_eq!(path.file_type, LogPathFileType::SinglePartCheckpoint);

        let path = parse("00000000000000000010.checkpoint.0000000001.0000000002.parquet")
            .unwrap()
            .unwrap();
        assert_eq!(
            path.file_type,
            LogPathFileType::MultiPartCheckpoint {
                part_num: 1,
                num_parts: 2
            }
        );

        // part number 0 is invalid
        assert!(parse("00000000000000000010.checkpoint.0000000000.0000000002.parquet").is_err());

        let path = parse(
            "00000000000000000010.checkpoint.80a083e8-7026-4e79-81be-64bd76c43a11.parquet",
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            path.file_type,
            LogPathFileType::UuidCheckpoint("80a083e8-7026-4e79-81be-64bd76c43a11".to_string())
        );
    }

    #[test]
    fn test_compacted_patterns() {
        let path = parse("00000000000000000004.00000000000000000006.compacted.json")
            .unwrap()
            .unwrap();
        assert_eq!(path.version, 4);
        assert_eq!(path.file_type, LogPathFileType::CompactedCommit { hi: 6 });
    }

    #[test]
    fn test_unknown_patterns() {
        let path = parse("00000000000000000004.foo").unwrap().unwrap();
        assert_eq!(path.file_type, LogPathFileType::Unknown);
        assert!(parse("_last_checkpoint").unwrap().is_none());
    }

    #[test]
    fn test_new_commit() {
        let log_root = table_log_dir_url();
        let path = ParsedLogPath::new_commit(&log_root, 42).unwrap();
        assert_eq!(path.filename, "00000000000000000042.json");
        assert!(path
            .location
            .as_str()
            .ends_with("_delta_log/00000000000000000042.json"));
        assert!(path.is_commit());
    }

    #[test]
    fn test_new_log_compaction() {
        let log_root = table_log_dir_url();
        let path = ParsedLogPath::new_log_compaction(&log_root, 1, 4).unwrap();
        assert_eq!(
            path.filename,
            "00000000000000000001.00000000000000000004.compacted.json"
        );
        assert!(ParsedLogPath::new_log_compaction(&log_root, 4, 1).is_err());
    }

    #[test]
    fn test_round_trip_through_parser() {
        let log_root = table_log_dir_url();
        let created = ParsedLogPath::new_commit(&log_root, 7).unwrap();
        let parsed = ParsedLogPath::try_from(created.location.clone())
            .unwrap()
            .unwrap();
        assert_eq!(parsed.version, 7);
        assert!(parsed.is_commit());
    }
}
