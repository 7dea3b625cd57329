//! An immutable view of a table at a specific version, reconstructed by replaying the commit
//! log. The snapshot is the read version of a transaction; it is never mutated.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::actions::domain_metadata::{active_domain_metadata_map, populate_domain_metadata_map};
use crate::actions::{Action, Add, DomainMetadata, Metadata, Protocol};
use crate::crc::{try_read_crc_file, CrcInfo};
use crate::log_segment::LogSegment;
use crate::path::log_root;
use crate::schema::StructType;
use crate::table_properties::TableProperties;
use crate::{DeltaResult, Engine, Error, Version, PRE_COMMIT_VERSION};

/// Convenience alias for a shared snapshot
pub type SnapshotRef = Arc<Snapshot>;

/// An immutable view of a table at version `version`: the effective protocol and metadata, the
/// set of active data files, the active domain metadata, and the application-idempotency
/// markers, all derived by replaying commits `0..=version` in ascending order.
#[derive(Debug, Clone)]
pub struct Snapshot {
    table_root: Url,
    log_root: Url,
    version: Version,
    protocol: Protocol,
    metadata: Metadata,
    table_properties: TableProperties,
    active_files: Vec<Add>,
    domain_metadatas: HashMap<String, DomainMetadata>,
    set_transactions: HashMap<String, i64>,
    timestamp: i64,
    crc_info: Option<CrcInfo>,
}

impl Snapshot {
    /// Build a snapshot of the latest version of the table at `table_root` by replaying its log.
    pub fn try_new(engine: &dyn Engine, table_root: Url) -> DeltaResult<SnapshotRef> {
        let log_root = log_root(&table_root)?;
        let segment = LogSegment::for_versions(engine, log_root.clone(), 0, None)?;
        Self::replay(engine, table_root, log_root, segment)
    }

    /// Like [`Snapshot::try_new`], but `Ok(None)` when no table log exists at the location.
    pub fn try_latest(engine: &dyn Engine, table_root: Url) -> DeltaResult<Option<SnapshotRef>> {
        match Self::try_new(engine, table_root) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(Error::FileNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn replay(
        engine: &dyn Engine,
        table_root: Url,
        log_root: Url,
        segment: LogSegment,
    ) -> DeltaResult<SnapshotRef> {
        let mut protocol: Option<Protocol> = None;
        let mut metadata: Option<Metadata> = None;
        let mut files: HashMap<String, Add> = HashMap::new();
        let mut domains: HashMap<String, DomainMetadata> = HashMap::new();
        let mut set_transactions: HashMap<String, i64> = HashMap::new();
        let mut last_commit_ict: Option<i64> = None;
        let mut last_modified = 0;

        for batch in segment.read_actions(engine) {
            let batch = batch?;
            let is_last = batch.version == segment.end_version;
            if is_last {
                last_modified = batch.file.last_modified;
                last_commit_ict = None;
            }
            for action in batch.actions {
                match action {
                    Action::Protocol(p) => protocol = Some(p),
                    Action::Metadata(m) => metadata = Some(m),
                    Action::Add(add) => {
                        files.insert(add.path.clone(), add);
                    }
                    Action::Remove(remove) => {
                        files.remove(&remove.path);
                    }
                    Action::DomainMetadata(dm) => {
                        populate_domain_metadata_map(std::iter::once(dm), &mut domains)
                    }
                    Action::Txn(txn) => {
                        set_transactions.insert(txn.app_id, txn.version);
                    }
                    Action::CommitInfo(ci) if is_last => {
                        last_commit_ict = ci.in_commit_timestamp;
                    }
                    Action::CommitInfo(_) => {}
                }
            }
        }

        let protocol = protocol.ok_or_else(|| {
            Error::generic(format!("no protocol action found in log at {log_root}"))
        })?;
        let metadata = metadata.ok_or_else(|| {
            Error::generic(format!("no metadata action found in log at {log_root}"))
        })?;
        let table_properties = metadata.parse_table_properties();

        // The snapshot timestamp is the in-commit timestamp of the latest commit when ICT is
        // enabled, and the commit file's modification time otherwise.
        let timestamp = match last_commit_ict {
            Some(ict) if table_properties.is_in_commit_timestamps_enabled() => ict,
            _ => last_modified,
        };

        let mut active_files: Vec<Add> = files.into_values().collect();
        active_files.sort_by(|a, b| a.path.cmp(&b.path));

        let version = segment.end_version;
        let crc_info = try_read_crc_file(engine, &log_root, version)?;
        debug!(
            version,
            num_files = active_files.len(),
            has_crc = crc_info.is_some(),
            "replayed snapshot"
        );

        Ok(Arc::new(Self {
            table_root,
            log_root,
            version,
            protocol,
            metadata,
            table_properties,
            active_files,
            domain_metadatas: active_domain_metadata_map(domains),
            set_transactions,
            timestamp,
            crc_info,
        }))
    }

    /// A snapshot for a table that has no committed log yet. Used as the read version of
    /// create-table transactions; its version is [`PRE_COMMIT_VERSION`] and its state is empty.
    pub(crate) fn new_pre_commit(
        table_root: Url,
        protocol: Protocol,
        metadata: Metadata,
    ) -> DeltaResult<Snapshot> {
        let log_root = log_root(&table_root)?;
        let table_properties = metadata.parse_table_properties();
        Ok(Self {
            table_root,
            log_root,
            version: PRE_COMMIT_VERSION,
            protocol,
            metadata,
            table_properties,
            active_files: vec![],
            domain_metadatas: HashMap::new(),
            set_transactions: HashMap::new(),
            timestamp: 0,
            crc_info: None,
        })
    }

    pub fn table_root(&self) -> &Url {
        &self.table_root
    }

    pub(crate) fn log_root(&self) -> &Url {
        &self.log_root
    }

    /// The version of this snapshot. [`PRE_COMMIT_VERSION`] for a table with no log yet.
    pub fn version(&self) -> Version {
        self.version
    }

    /// True for the placeholder snapshot a create-table transaction reads from
    pub fn is_pre_commit(&self) -> bool {
        self.version == PRE_COMMIT_VERSION
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn schema(&self) -> DeltaResult<StructType> {
        self.metadata.parse_schema()
    }

    pub fn table_properties(&self) -> &TableProperties {
        &self.table_properties
    }

    /// The add actions active at this version, sorted by path
    pub fn active_files(&self) -> &[Add] {
        &self.active_files
    }

    /// The active (non-tombstoned) domain metadata records, keyed by domain name
    pub fn domain_metadata_map(&self) -> &HashMap<String, DomainMetadata> {
        &self.domain_metadatas
    }

    /// The configuration of `domain` if it is active at this version
    pub fn get_domain_metadata(&self, domain: &str) -> Option<&DomainMetadata> {
        self.domain_metadatas.get(domain)
    }

    /// The latest committed idempotency version for `app_id`, if any
    pub fn get_app_transaction_version(&self, app_id: &str) -> Option<i64> {
        self.set_transactions.get(app_id).copied()
    }

    /// The timestamp of the latest commit: its in-commit timestamp when ICT is enabled, the
    /// commit file modification time otherwise.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The checksum record cached at this version, if one was found
    pub fn crc_info(&self) -> Option<&CrcInfo> {
        self.crc_info.as_ref()
    }
}
