//! A contiguous slice of the commit log: the listed commit files for a version range, and the
//! machinery to read their actions back in ascending version order.

use itertools::Itertools;
use tracing::debug;
use url::Url;

use crate::actions::Action;
use crate::path::ParsedLogPath;
use crate::utils::require;
use crate::{DeltaResult, Engine, Error, FileMeta, Version};

/// The decoded contents of one commit file.
pub(crate) struct CommitBatch {
    pub version: Version,
    pub file: FileMeta,
    pub actions: Vec<Action>,
}

/// A gap-free ascending run of commit files under one `_delta_log` directory.
#[derive(Debug, Clone)]
pub(crate) struct LogSegment {
    pub log_root: Url,
    pub commit_files: Vec<ParsedLogPath>,
    pub end_version: Version,
}

impl LogSegment {
    /// List and collect the commit files for versions `start_version..` (optionally bounded by
    /// `end_version`, inclusive). The result must be non-empty, must begin exactly at
    /// `start_version`, and must be gap-free.
    pub(crate) fn for_versions(
        engine: &dyn Engine,
        log_root: Url,
        start_version: Version,
        end_version: Option<Version>,
    ) -> DeltaResult<Self> {
        let commit_files = Self::list_commits(engine, &log_root, start_version, end_version)?;
        require!(
            !commit_files.is_empty(),
            Error::file_not_found(format!(
                "no commit files found in {log_root} at or after version {start_version}"
            ))
        );
        require!(
            commit_files[0].version == start_version,
            Error::internal_error(format!(
                "gaps in delta log commit files: expected version {start_version} but first \
                 found {}",
                commit_files[0].version
            ))
        );
        Self::ensure_contiguous(&commit_files)?;
        let end_version = commit_files.last().expect("non-empty").version;
        debug!(
            start_version,
            end_version,
            num_commits = commit_files.len(),
            "constructed log segment"
        );
        Ok(Self {
            log_root,
            commit_files,
            end_version,
        })
    }

    /// List commit files (only) starting at `start_version`, in ascending version order.
    fn list_commits(
        engine: &dyn Engine,
        log_root: &Url,
        start_version: Version,
        end_version: Option<Version>,
    ) -> DeltaResult<Vec<ParsedLogPath>> {
        let start_from = ParsedLogPath::new_commit(log_root, start_version)?;
        let mut commits: Vec<ParsedLogPath> = engine
            .storage_handler()
            .list_from(&start_from.location)?
            .map_ok(ParsedLogPath::try_from)
            // flatten Result<Result<Option<_>>> into Result<Option<_>>
            .map(|parsed| parsed.and_then(|x| x))
            .filter_map_ok(|parsed| parsed.filter(|p| p.is_commit()))
            .try_collect()?;
        commits.retain(|commit| {
            commit.version >= start_version
                && end_version.is_none_or(|end| commit.version <= end)
        });
        commits.sort_by_key(|commit| commit.version);
        Ok(commits)
    }

    /// Assert that the listed commit versions are strictly consecutive.
    fn ensure_contiguous(commits: &[ParsedLogPath]) -> DeltaResult<()> {
        for (prev, next) in commits.iter().tuple_windows() {
            require!(
                next.version == prev.version + 1,
                Error::internal_error(format!(
                    "gaps in delta log commit files: expected version {} but got {}",
                    prev.version + 1,
                    next.version
                ))
            );
        }
        Ok(())
    }

    /// Read the actions of every commit file in this segment, in ascending version order.
    pub(crate) fn read_actions<'a>(
        &'a self,
        engine: &'a dyn Engine,
    ) -> impl Iterator<Item = DeltaResult<CommitBatch>> + 'a {
        let json = engine.json_handler();
        self.commit_files.iter().map(move |commit| {
            let lines = json.read_json_lines(&commit.location)?;
            let actions: Vec<Action> = crate::actions::parse_actions(lines).try_collect()?;
            Ok(CommitBatch {
                version: commit.version,
                file: commit.location.clone(),
                actions,
            })
        })
    }

    /// The file metadata of the last commit in the segment
    pub(crate) fn last_commit_file(&self) -> &FileMeta {
        &self
            .commit_files
            .last()
            .expect("log segment is never empty")
            .location
    }
}
