//! Log compaction: rewriting a range of commit files into a single
//! `{start}.{end}.compacted.json` file holding the reconciled actions, so readers can replay
//! one file instead of many.

use std::collections::HashMap;

use tracing::info;
use url::Url;

use crate::actions::{Action, Add, DomainMetadata, Metadata, Protocol, Remove, SetTransaction};
use crate::log_segment::LogSegment;
use crate::path::ParsedLogPath;
use crate::utils::require;
use crate::{DeltaResult, Engine, Error, Version};

/// Whether a commit at `commit_version` completes a compaction window of `compaction_interval`
/// commits. Commits start at 0, so we add one to the version before checking the interval.
pub(crate) fn should_compact(commit_version: Version, compaction_interval: Version) -> bool {
    compaction_interval > 0
        && commit_version > 0
        && ((commit_version + 1) % compaction_interval) == 0
}

/// Writer for log compaction files.
#[derive(Debug)]
pub struct LogCompactionWriter {
    log_root: Url,
    start_version: Version,
    end_version: Version,
    /// Remove tombstones older than this timestamp are dropped during reconciliation
    min_file_retention_timestamp_millis: i64,
}

impl LogCompactionWriter {
    pub fn new(
        log_root: Url,
        start_version: Version,
        end_version: Version,
        min_file_retention_timestamp_millis: i64,
    ) -> DeltaResult<Self> {
        require!(
            start_version <= end_version,
            Error::generic(format!(
                "invalid version range: start_version {start_version} > end_version {end_version}"
            ))
        );
        Ok(Self {
            log_root,
            start_version,
            end_version,
            min_file_retention_timestamp_millis,
        })
    }

    /// The path the compaction file will be written to
    pub fn compaction_path(&self) -> DeltaResult<Url> {
        let path =
            ParsedLogPath::new_log_compaction(&self.log_root, self.start_version, self.end_version)?;
        Ok(path.location)
    }

    /// Read the commits in range, reconcile their actions, and write the compaction file.
    /// Losing the race to another compactor writing the same range is success.
    pub fn write(&self, engine: &dyn Engine) -> DeltaResult<()> {
        let segment = LogSegment::for_versions(
            engine,
            self.log_root.clone(),
            self.start_version,
            Some(self.end_version),
        )?;
        require!(
            segment.end_version == self.end_version,
            Error::generic(format!(
                "expected commit files for range [{}, {}], but listing ends at {}",
                self.start_version, self.end_version, segment.end_version
            ))
        );

        let mut protocol: Option<Protocol> = None;
        let mut metadata: Option<Metadata> = None;
        let mut adds: HashMap<String, Add> = HashMap::new();
        let mut removes: HashMap<String, Remove> = HashMap::new();
        let mut domains: HashMap<String, DomainMetadata> = HashMap::new();
        let mut transactions: HashMap<String, SetTransaction> = HashMap::new();

        for batch in segment.read_actions(engine) {
            for action in batch?.actions {
                match action {
                    Action::Protocol(p) => protocol = Some(p),
                    Action::Metadata(m) => metadata = Some(m),
                    Action::Add(add) => {
                        removes.remove(&add.path);
                        adds.insert(add.path.clone(), add);
                    }
                    Action::Remove(remove) => {
                        adds.remove(&remove.path);
                        removes.insert(remove.path.clone(), remove);
                    }
                    Action::DomainMetadata(dm) => {
                        domains.insert(dm.domain().to_string(), dm);
                    }
                    Action::Txn(txn) => {
                        transactions.insert(txn.app_id.clone(), txn);
                    }
                    // per-commit audit records do not survive compaction
                    Action::CommitInfo(_) => {}
                }
            }
        }

        let retention = self.min_file_retention_timestamp_millis;
        let mut actions: Vec<Action> = Vec::new();
        actions.extend(metadata.map(Action::Metadata));
        actions.extend(protocol.map(Action::Protocol));
        let mut transactions: Vec<_> = transactions.into_values().collect();
        transactions.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        actions.extend(transactions.into_iter().map(Action::Txn));
        let mut domains: Vec<_> = domains.into_values().collect();
        domains.sort_by(|a, b| a.domain().cmp(b.domain()));
        actions.extend(domains.into_iter().map(Action::DomainMetadata));
        let mut removes: Vec<_> = removes
            .into_values()
            .filter(|remove| remove.deletion_timestamp.unwrap_or(i64::MAX) >= retention)
            .collect();
        removes.sort_by(|a, b| a.path.cmp(&b.path));
        actions.extend(removes.into_iter().map(Action::Remove));
        let mut adds: Vec<_> = adds.into_values().collect();
        adds.sort_by(|a, b| a.path.cmp(&b.path));
        actions.extend(adds.into_iter().map(Action::Add));

        let target = self.compaction_path()?;
        let mut lines = actions.iter().map(Action::to_json);
        match engine
            .json_handler()
            .write_json_lines(&target, &mut lines, false)
        {
            Ok(()) => {
                info!(
                    start_version = self.start_version,
                    end_version = self.end_version,
                    "wrote log compaction file"
                );
                Ok(())
            }
            Err(Error::FileAlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_compact() {
        // interval 10 compacts after commits 9, 19, 29, ...
        assert!(should_compact(9, 10));
        assert!(should_compact(19, 10));
        assert!(!should_compact(10, 10));
        assert!(!should_compact(0, 10));
        assert!(!should_compact(9, 0));
    }

    #[test]
    fn test_writer_rejects_reversed_range() {
        let log_root = Url::parse("file:///tmp/t/_delta_log/").unwrap();
        assert!(LogCompactionWriter::new(log_root, 5, 4, 0).is_err());
    }
}
