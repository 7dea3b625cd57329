//! The transaction lifecycle and commit pipeline: a [`Transaction`] accumulates proposed
//! changes against a read snapshot, assembles the commit actions in canonical order, writes the
//! next log version atomically, and retries through the conflict resolver when another writer
//! wins the race.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::domain_metadata::validate_domain_metadatas;
use crate::actions::{
    Action, CommitInfo, DataAction, DomainMetadata, Metadata, Protocol, SetTransaction,
};
use crate::clustering::ClusteringMetadataDomain;
use crate::crc::CrcInfo;
use crate::log_compaction::should_compact;
use crate::path::ParsedLogPath;
use crate::row_tracking::{
    assign_base_row_ids, read_high_water_mark, update_high_water_mark,
    RowTrackingMetadataDomain,
};
use crate::snapshot::SnapshotRef;
use crate::table_features::TableFeature;
use crate::table_properties::{
    IN_COMMIT_TIMESTAMP_ENABLEMENT_TIMESTAMP, IN_COMMIT_TIMESTAMP_ENABLEMENT_VERSION,
};
use crate::utils::{current_time_ms, require};
use crate::{DeltaResult, Engine, Error, Version, KERNEL_VERSION};

pub(crate) mod conflict_checker;
pub mod create_table;
pub mod hook;
pub mod metrics;

use conflict_checker::resolve_conflicts;
use hook::{
    CheckpointHook, ChecksumFullHook, ChecksumSimpleHook, FormatConversionHook, LogCompactionHook,
    PostCommitHook, PostCommitHookType,
};
use metrics::{TransactionMetrics, TransactionReport};

/// Default bound on commit retries after conflicts
pub const DEFAULT_MAX_RETRIES: usize = 200;

/// The logical operation a transaction performs, recorded in the commit info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateTable {
        as_select: bool,
    },
    ReplaceTable {
        or_create: bool,
        as_select: bool,
    },
    Write {
        replace_where: Option<String>,
    },
}

impl Operation {
    /// The operation label written to `commitInfo.operation`
    pub fn description(&self) -> String {
        match self {
            Operation::CreateTable { as_select: false } => "CREATE TABLE".to_string(),
            Operation::CreateTable { as_select: true } => "CREATE TABLE AS SELECT".to_string(),
            Operation::ReplaceTable {
                or_create: false, ..
            } => "REPLACE TABLE".to_string(),
            Operation::ReplaceTable {
                or_create: true,
                as_select: false,
            } => "CREATE OR REPLACE TABLE".to_string(),
            Operation::ReplaceTable {
                or_create: true,
                as_select: true,
            } => "CREATE OR REPLACE TABLE AS SELECT".to_string(),
            Operation::Write { .. } => "WRITE".to_string(),
        }
    }

    /// True when the operation defines the table from scratch (create or replace)
    pub fn is_create_or_replace(&self) -> bool {
        !matches!(self, Operation::Write { .. })
    }

    fn parameters(&self, partition_columns: &[String]) -> HashMap<String, String> {
        let mut parameters = HashMap::new();
        match self {
            Operation::Write { replace_where } => {
                if let Some(predicate) = replace_where {
                    parameters.insert("replaceWhere".to_string(), predicate.clone());
                }
            }
            _ => {
                let partition_by =
                    serde_json::to_string(partition_columns).unwrap_or_else(|_| "[]".to_string());
                parameters.insert("partitionBy".to_string(), partition_by);
            }
        }
        parameters
    }
}

/// Encapsulates the state of domain metadata within a transaction: the add/remove buffers and
/// the memoised resolution of both into the records the commit will carry.
#[derive(Debug, Default)]
struct DomainMetadataState {
    domains_to_add: Vec<DomainMetadata>,
    domains_to_remove: Vec<String>,
    computed: Option<Vec<DomainMetadata>>,
}

impl DomainMetadataState {
    fn add_domain(&mut self, domain_metadata: DomainMetadata) -> DeltaResult<()> {
        require!(
            !self
                .domains_to_remove
                .iter()
                .any(|d| d == domain_metadata.domain()),
            Error::generic("cannot add a domain that is removed in this transaction")
        );
        // a second add for the same domain replaces the first
        self.domains_to_add
            .retain(|dm| dm.domain() != domain_metadata.domain());
        self.domains_to_add.push(domain_metadata);
        self.computed = None;
        Ok(())
    }

    fn remove_domain(&mut self, domain: String) -> DeltaResult<()> {
        require!(
            !self.domains_to_add.iter().any(|dm| dm.domain() == domain),
            Error::generic("cannot remove a domain that is added in this transaction")
        );
        if !self.domains_to_remove.contains(&domain) {
            self.domains_to_remove.push(domain);
        }
        self.computed = None;
        Ok(())
    }
}

/// A transaction represents an in-progress write to a table. Stage changes through the builder
/// methods, then consume the transaction with [`Transaction::commit`]; consuming it is what
/// guarantees a transaction is attempted at most once.
#[derive(Debug)]
pub struct Transaction {
    read_snapshot: SnapshotRef,
    operation: Operation,
    engine_info: String,
    txn_id: String,
    protocol: Protocol,
    metadata: Metadata,
    should_update_metadata: bool,
    should_update_protocol: bool,
    set_txn: Option<SetTransaction>,
    clustering_columns: Option<Vec<String>>,
    should_update_clustering_domain: bool,
    domain_metadata_state: DomainMetadataState,
    max_retries: usize,
    log_compaction_interval: u64,
    commit_timestamp: i64,
    current_crc_info: Option<CrcInfo>,
    provided_row_id_high_watermark: Option<i64>,
}

impl Transaction {
    /// Start a write transaction against an existing table.
    pub fn try_new(
        read_snapshot: SnapshotRef,
        engine_info: impl Into<String>,
    ) -> DeltaResult<Self> {
        require!(
            !read_snapshot.is_pre_commit(),
            Error::generic("write transactions require an existing table")
        );
        let protocol = read_snapshot.protocol().clone();
        let metadata = read_snapshot.metadata().clone();
        let current_crc_info = read_snapshot.crc_info().cloned();
        Ok(Self {
            read_snapshot,
            operation: Operation::Write {
                replace_where: None,
            },
            engine_info: engine_info.into(),
            txn_id: Uuid::new_v4().to_string(),
            protocol,
            metadata,
            should_update_metadata: false,
            should_update_protocol: false,
            set_txn: None,
            clustering_columns: None,
            should_update_clustering_domain: false,
            domain_metadata_state: DomainMetadataState::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            log_compaction_interval: 0,
            commit_timestamp: current_time_ms(),
            current_crc_info,
            provided_row_id_high_watermark: None,
        })
    }

    /// Internal constructor used by the create/replace planner: the snapshot is either the
    /// existing table (REPLACE) or a pre-commit placeholder (CREATE), and the given protocol
    /// and metadata define the table from scratch.
    pub(crate) fn new_create_or_replace(
        read_snapshot: SnapshotRef,
        operation: Operation,
        engine_info: String,
        protocol: Protocol,
        metadata: Metadata,
        clustering_columns: Option<Vec<String>>,
    ) -> Self {
        let current_crc_info = read_snapshot.crc_info().cloned();
        Self {
            read_snapshot,
            operation,
            engine_info,
            txn_id: Uuid::new_v4().to_string(),
            protocol,
            metadata,
            should_update_metadata: true,
            should_update_protocol: true,
            set_txn: None,
            should_update_clustering_domain: clustering_columns.is_some(),
            clustering_columns,
            domain_metadata_state: DomainMetadataState::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            log_compaction_interval: 0,
            commit_timestamp: current_time_ms(),
            current_crc_info,
            provided_row_id_high_watermark: None,
        }
    }

    /// The version this transaction read. Data actions staged against it are rebased onto
    /// newer versions during conflict resolution.
    pub fn read_version(&self) -> Version {
        self.read_snapshot.version()
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Bound the number of rebased retries after commit conflicts
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Emit a log-compaction hook every `interval` commits. Zero disables compaction hooks.
    pub fn with_log_compaction_interval(mut self, interval: u64) -> Self {
        self.log_compaction_interval = interval;
        self
    }

    /// Include an idempotency marker (`txn` action) for this transaction. A later call
    /// replaces an earlier one.
    pub fn with_transaction_id(mut self, app_id: impl Into<String>, version: i64) -> Self {
        self.set_txn = Some(SetTransaction::new(
            app_id,
            version,
            Some(self.commit_timestamp),
        ));
        self
    }

    /// Set domain metadata to be written by this transaction. User-controlled domains go into
    /// the transaction buffer; the only writable system domain is row tracking, which instead
    /// pins the provided high watermark and disables retries so the watermark cannot race.
    pub fn with_domain_metadata(
        mut self,
        domain: impl Into<String>,
        configuration: impl Into<String>,
    ) -> DeltaResult<Self> {
        let domain = domain.into();
        let configuration = configuration.into();
        require!(
            self.protocol.supports_feature(TableFeature::DomainMetadata),
            Error::unsupported(
                "domain metadata operations require writer version 7 and the 'domainMetadata' \
                 writer feature"
            )
        );
        if DomainMetadata::is_system_domain_settable_from_transaction(&domain) {
            require!(
                self.protocol.supports_feature(TableFeature::RowTracking),
                Error::unsupported(
                    "writing the row tracking domain requires the 'rowTracking' writer feature"
                )
            );
            let water_mark = RowTrackingMetadataDomain::from_json_configuration(&configuration)?
                .row_id_high_water_mark;
            require!(
                water_mark >= 0,
                Error::generic("rowIdHighWatermark must be >= 0")
            );
            // A caller-pinned watermark cannot be rebased, so the commit must not retry: a
            // contending writer has to re-issue against the latest table state.
            self.provided_row_id_high_watermark = Some(water_mark);
            return Ok(self);
        }
        require!(
            DomainMetadata::is_user_controlled(&domain),
            Error::generic(format!(
                "cannot modify domain {domain}: domains starting with 'delta.' are system \
                 controlled"
            ))
        );
        self.domain_metadata_state
            .add_domain(DomainMetadata::new(domain, configuration))?;
        Ok(self)
    }

    /// Mark a user-controlled domain for removal. The tombstone carries the configuration
    /// pre-image fetched from the read snapshot at commit time.
    pub fn with_domain_metadata_removed(mut self, domain: impl Into<String>) -> DeltaResult<Self> {
        let domain = domain.into();
        require!(
            self.protocol.supports_feature(TableFeature::DomainMetadata),
            Error::unsupported(
                "domain metadata operations require writer version 7 and the 'domainMetadata' \
                 writer feature"
            )
        );
        require!(
            DomainMetadata::is_user_controlled(&domain),
            Error::generic(format!(
                "cannot remove domain {domain}: domains starting with 'delta.' are system \
                 controlled"
            ))
        );
        self.domain_metadata_state.remove_domain(domain)?;
        Ok(self)
    }

    fn is_replace_table(&self) -> bool {
        self.operation.is_create_or_replace() && !self.read_snapshot.is_pre_commit()
    }

    fn should_write_row_tracking(&self) -> bool {
        self.protocol.supports_feature(TableFeature::RowTracking)
            && !self
                .metadata
                .parse_table_properties()
                .row_tracking_suspended
                .unwrap_or(false)
    }

    /// Resolve the domain metadata this commit carries: buffered adds, tombstones for buffered
    /// removals (with their snapshot pre-image), the clustering domain when required, and, for
    /// REPLACE, tombstones for every active snapshot domain not re-added.
    fn resolved_domain_metadatas(&mut self) -> DeltaResult<Vec<DomainMetadata>> {
        if let Some(computed) = &self.domain_metadata_state.computed {
            return Ok(computed.clone());
        }

        if self.protocol.supports_feature(TableFeature::ClusteredTable) {
            match (&self.clustering_columns, self.should_update_clustering_domain) {
                (Some(columns), true) => {
                    let domain = ClusteringMetadataDomain::new(columns).to_domain_metadata()?;
                    self.domain_metadata_state.add_domain(domain)?;
                }
                (None, _) if self.is_replace_table() => {
                    // the clustering feature requires the domain to exist; a replacement that
                    // is no longer clustered re-seeds it with an empty column list
                    let domain = ClusteringMetadataDomain::new(&[]).to_domain_metadata()?;
                    self.domain_metadata_state.add_domain(domain)?;
                }
                _ => {}
            }
        }

        if self.is_replace_table() {
            let existing: Vec<String> = self
                .read_snapshot
                .domain_metadata_map()
                .keys()
                .cloned()
                .collect();
            for domain in existing {
                let re_added = self
                    .domain_metadata_state
                    .domains_to_add
                    .iter()
                    .any(|dm| dm.domain() == domain);
                if !re_added && !self.domain_metadata_state.domains_to_remove.contains(&domain) {
                    self.domain_metadata_state.remove_domain(domain)?;
                }
            }
        }

        let mut result = self.domain_metadata_state.domains_to_add.clone();
        for domain in &self.domain_metadata_state.domains_to_remove {
            match self.read_snapshot.get_domain_metadata(domain) {
                Some(existing) => result.push(existing.removed()),
                // Removing an unknown domain must fail: without a tombstone pre-image the
                // conflict resolver could not detect a concurrent writer re-adding it.
                None => {
                    return Err(Error::DomainDoesNotExist {
                        domain: domain.clone(),
                        version: self.read_snapshot.version(),
                    })
                }
            }
        }

        self.domain_metadata_state.computed = Some(result.clone());
        Ok(result)
    }

    /// The in-commit timestamp for the first attempt, if ICT is enabled: the larger of the
    /// wall clock and one past the read snapshot's commit timestamp.
    fn generate_in_commit_timestamp(&self) -> Option<i64> {
        let properties = self.metadata.parse_table_properties();
        properties
            .is_in_commit_timestamps_enabled()
            .then(|| self.commit_timestamp.max(self.read_snapshot.timestamp() + 1))
    }

    /// When this commit is the first ICT-enabled version, record the enablement version and
    /// timestamp in the metadata (which forces a metadata action into the commit).
    fn update_metadata_with_ict_enablement(
        &mut self,
        in_commit_timestamp: Option<i64>,
        commit_version: Version,
    ) {
        let Some(ict) = in_commit_timestamp else {
            return;
        };
        let was_enabled = !self.read_snapshot.is_pre_commit()
            && self
                .read_snapshot
                .table_properties()
                .is_in_commit_timestamps_enabled();
        if was_enabled {
            return;
        }
        self.metadata = self.metadata.with_merged_configuration([
            (
                IN_COMMIT_TIMESTAMP_ENABLEMENT_VERSION,
                commit_version.to_string(),
            ),
            (IN_COMMIT_TIMESTAMP_ENABLEMENT_TIMESTAMP, ict.to_string()),
        ]);
        self.should_update_metadata = true;
    }

    /// Consume the transaction and commit it, retrying through conflict resolution up to the
    /// retry bound. `data_actions` is the pre-staged stream of data-file actions produced by
    /// the external data writer, in caller order.
    pub fn commit(
        mut self,
        engine: &dyn Engine,
        mut data_actions: Vec<DataAction>,
    ) -> DeltaResult<TransactionCommitResult> {
        let start_time = Instant::now();
        let table_path = self.read_snapshot.table_root().to_string();
        let mut metrics = if self.read_snapshot.is_pre_commit() {
            TransactionMetrics::for_new_table()
        } else {
            TransactionMetrics::with_existing_histogram(
                self.current_crc_info
                    .as_ref()
                    .and_then(|crc| crc.file_size_histogram.clone()),
            )
        };

        let max_retries = if self.provided_row_id_high_watermark.is_some() {
            0
        } else {
            self.max_retries
        };

        let mut commit_as_version = self.read_snapshot.version().wrapping_add(1);
        let mut attempt_ict = self.generate_in_commit_timestamp();
        self.update_metadata_with_ict_enablement(attempt_ict, commit_as_version);

        let mut domain_metadatas = self.resolved_domain_metadatas()?;

        if self.should_write_row_tracking() {
            let snapshot_water_mark = read_high_water_mark(&self.read_snapshot)?.unwrap_or(-1);
            let assigned =
                assign_base_row_ids(&mut data_actions, snapshot_water_mark, commit_as_version)?;
            let effective = match (assigned, self.provided_row_id_high_watermark) {
                (Some(assigned), Some(provided)) => Some(assigned.max(provided)),
                (assigned, provided) => assigned.or(provided),
            };
            if let Some(water_mark) = effective {
                update_high_water_mark(&mut domain_metadatas, water_mark)?;
            }
        }

        let mut attempt = 0;
        let committed_version = loop {
            metrics.commit_attempts += 1;
            info!(version = commit_as_version, attempt, "committing transaction");
            match self.do_commit(
                engine,
                commit_as_version,
                attempt_ict,
                &domain_metadatas,
                &data_actions,
                &mut metrics,
            ) {
                Ok(()) => break commit_as_version,
                Err(Error::FileAlreadyExists(_)) => {
                    if attempt >= max_retries {
                        warn!(
                            max_retries,
                            "exhausted maximum retries for committing transaction"
                        );
                        return Err(Error::ConcurrentWrite(max_retries));
                    }
                    info!(
                        version = commit_as_version,
                        attempt, max_retries, "concurrent write detected, resolving conflicts"
                    );
                    let rebase = resolve_conflicts(
                        engine,
                        &self.read_snapshot,
                        commit_as_version,
                        self.set_txn.as_ref(),
                        &self.protocol,
                        domain_metadatas,
                        data_actions,
                    )?;
                    require!(
                        commit_as_version <= rebase.latest_version,
                        Error::internal_error(format!(
                            "rebase version {} is older than attempt version {}",
                            rebase.latest_version, commit_as_version
                        ))
                    );
                    commit_as_version = rebase.latest_version + 1;
                    data_actions = rebase.updated_data_actions;
                    domain_metadatas = rebase.updated_domain_metadatas;
                    self.domain_metadata_state.computed = Some(domain_metadatas.clone());
                    self.current_crc_info = rebase.updated_crc_info;
                    if let Some(ict) = attempt_ict {
                        attempt_ict = Some(ict.max(rebase.latest_commit_timestamp + 1));
                        self.update_metadata_with_ict_enablement(attempt_ict, commit_as_version);
                    }
                    // Action counters may be partially incremented by the failed attempt
                    metrics.reset_for_retry();
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let post_commit_hooks =
            self.generate_post_commit_hooks(committed_version, attempt_ict, &metrics, &domain_metadatas)?;
        let produced_incremental_crc = post_commit_hooks
            .iter()
            .any(|hook| hook.hook_type() == PostCommitHookType::ChecksumSimple);
        info!(
            committed_version,
            attempts = metrics.commit_attempts,
            "transaction committed"
        );
        let transaction_report = TransactionReport {
            table_path,
            operation: self.operation.description(),
            engine_info: self.engine_info.clone(),
            committed_version: Some(committed_version),
            num_commit_attempts: metrics.commit_attempts,
            total_duration: start_time.elapsed(),
            produced_incremental_crc,
            metrics: metrics.clone(),
        };
        Ok(TransactionCommitResult {
            committed_version,
            post_commit_hooks,
            transaction_report,
        })
    }

    /// One commit attempt: assemble the canonical action stream and atomically create the
    /// commit file, maintaining metrics and the append-only guard while streaming.
    fn do_commit(
        &self,
        engine: &dyn Engine,
        commit_as_version: Version,
        in_commit_timestamp: Option<i64>,
        domain_metadatas: &[DomainMetadata],
        data_actions: &[DataAction],
        metrics: &mut TransactionMetrics,
    ) -> DeltaResult<()> {
        validate_domain_metadatas(domain_metadatas, &self.protocol)?;

        let commit_info = CommitInfo {
            timestamp: self.commit_timestamp,
            in_commit_timestamp,
            operation: Some(self.operation.description()),
            operation_parameters: Some(
                self.operation.parameters(&self.metadata.partition_columns),
            ),
            engine_info: Some(format!("Kernel-{KERNEL_VERSION}/{}", self.engine_info)),
            is_blind_append: Some(false),
            txn_id: Some(self.txn_id.clone()),
            operation_metrics: Some(HashMap::new()),
        };

        let mut actions: Vec<Action> = vec![Action::CommitInfo(commit_info)];
        if self.should_update_metadata {
            actions.push(Action::Metadata(self.metadata.clone()));
        }
        if self.should_update_protocol {
            actions.push(Action::Protocol(self.protocol.clone()));
        }
        if let Some(set_txn) = &self.set_txn {
            actions.push(Action::Txn(set_txn.clone()));
        }
        actions.extend(domain_metadatas.iter().cloned().map(Action::DomainMetadata));
        if self.is_replace_table() {
            // reset the table state: remove every file active at the read snapshot, before
            // the caller's stream
            actions.extend(self.read_snapshot.active_files().iter().map(|add| {
                Action::Remove(add.clone().into_remove(self.commit_timestamp, true))
            }));
        }
        actions.extend(data_actions.iter().cloned().map(Action::from));

        let log_root = self.read_snapshot.log_root();
        if commit_as_version == 0 {
            require!(
                engine.storage_handler().mkdirs(log_root)?,
                Error::generic(format!("failed to create delta log directory {log_root}"))
            );
        }

        let is_append_only = self.metadata.parse_table_properties().is_append_only();
        let table_path = self.read_snapshot.table_root().to_string();
        let commit_path = ParsedLogPath::new_commit(log_root, commit_as_version)?;
        let mut lines = actions.into_iter().map(|action| {
            metrics.total_actions += 1;
            match &action {
                Action::Add(add) => metrics.update_for_add(add.size),
                Action::Remove(remove) => {
                    if is_append_only && remove.data_change {
                        return Err(Error::CannotModifyAppendOnlyTable(table_path.clone()));
                    }
                    metrics.update_for_remove(remove.size)?;
                }
                _ => {}
            }
            action.to_json()
        });
        engine
            .json_handler()
            .write_json_lines(&commit_path.location, &mut lines, false)
    }

    fn generate_post_commit_hooks(
        &self,
        committed_version: Version,
        in_commit_timestamp: Option<i64>,
        metrics: &TransactionMetrics,
        domain_metadatas: &[DomainMetadata],
    ) -> DeltaResult<Vec<Box<dyn PostCommitHook>>> {
        let properties = self.metadata.parse_table_properties();
        let log_root = self.read_snapshot.log_root().clone();
        let mut hooks: Vec<Box<dyn PostCommitHook>> = Vec::new();

        let checkpoint_interval = properties.checkpoint_interval_or_default();
        if committed_version > 0 && committed_version % checkpoint_interval == 0 {
            hooks.push(Box::new(CheckpointHook {
                table_root: self.read_snapshot.table_root().clone(),
                version: committed_version,
            }));
        }

        match self.build_post_commit_crc(
            committed_version,
            in_commit_timestamp,
            metrics,
            domain_metadatas,
        ) {
            Some(crc) => hooks.push(Box::new(ChecksumSimpleHook {
                log_root: log_root.clone(),
                crc,
            })),
            None => hooks.push(Box::new(ChecksumFullHook {
                log_root: log_root.clone(),
                version: committed_version,
            })),
        }

        for format in properties
            .universal_format_enabled_formats
            .iter()
            .flatten()
        {
            let hook_type = match format.as_str() {
                "iceberg" => PostCommitHookType::IcebergConversion,
                "hudi" => PostCommitHookType::HudiConversion,
                other => {
                    warn!(format = other, "unknown universal format, no conversion hook");
                    continue;
                }
            };
            hooks.push(Box::new(FormatConversionHook {
                table_root: self.read_snapshot.table_root().clone(),
                version: committed_version,
                hook_type,
            }));
        }

        if self.log_compaction_interval > 0
            && should_compact(committed_version, self.log_compaction_interval)
        {
            // add one here because commits start at 0
            let start_version = committed_version + 1 - self.log_compaction_interval;
            let min_file_retention_timestamp_millis = current_time_ms()
                - properties.deleted_file_retention_or_default().as_millis() as i64;
            hooks.push(Box::new(LogCompactionHook {
                log_root,
                start_version,
                end_version: committed_version,
                min_file_retention_timestamp_millis,
            }));
        }

        Ok(hooks)
    }

    /// Derive the checksum for the committed version from the pre-commit checksum and this
    /// attempt's counters. `None` when no consistent pre-commit checksum is available, in
    /// which case the full-checksum hook is the repair path.
    fn build_post_commit_crc(
        &self,
        commit_at_version: Version,
        in_commit_timestamp: Option<i64>,
        metrics: &TransactionMetrics,
        domain_metadatas: &[DomainMetadata],
    ) -> Option<CrcInfo> {
        if self.operation.is_create_or_replace() {
            // new tables always commit metadata, so any conflict was fatal and the counters
            // alone describe the table
            return Some(CrcInfo {
                version: commit_at_version,
                table_size_bytes: metrics.total_add_files_size_bytes,
                num_files: metrics.num_add_files as i64,
                num_metadata: 1,
                num_protocol: 1,
                metadata: self.metadata.clone(),
                protocol: self.protocol.clone(),
                txn_id: Some(self.txn_id.clone()),
                in_commit_timestamp_opt: in_commit_timestamp,
                domain_metadata: self.post_commit_domain_metadatas(domain_metadatas),
                file_size_histogram: metrics.file_size_histogram.clone(),
            });
        }
        self.current_crc_info
            .as_ref()
            // the pre-commit checksum must describe exactly the previous version
            .filter(|crc| commit_at_version == crc.version + 1)
            .map(|last| CrcInfo {
                version: commit_at_version,
                table_size_bytes: last.table_size_bytes + metrics.total_add_files_size_bytes
                    - metrics.total_remove_files_size_bytes,
                num_files: last.num_files + metrics.num_add_files as i64
                    - metrics.num_remove_files as i64,
                num_metadata: 1,
                num_protocol: 1,
                metadata: self.metadata.clone(),
                protocol: self.protocol.clone(),
                txn_id: Some(self.txn_id.clone()),
                in_commit_timestamp_opt: in_commit_timestamp,
                domain_metadata: self.post_commit_domain_metadatas(domain_metadatas),
                file_size_histogram: metrics.file_size_histogram.clone(),
            })
    }

    /// The active domain metadata set after this commit, when it can be derived without log
    /// replay: from the committed records alone for new tables, or by merging them into the
    /// pre-commit checksum's set.
    fn post_commit_domain_metadatas(
        &self,
        domain_metadatas: &[DomainMetadata],
    ) -> Option<Vec<DomainMetadata>> {
        if self.read_snapshot.is_pre_commit() || self.is_replace_table() {
            let mut active: Vec<DomainMetadata> = domain_metadatas
                .iter()
                .filter(|dm| !dm.is_removed())
                .cloned()
                .collect();
            active.sort_by(|a, b| a.domain().cmp(b.domain()));
            return Some(active);
        }
        let previous = self.current_crc_info.as_ref()?.domain_metadata.as_ref()?;
        let mut merged: HashMap<String, DomainMetadata> = previous
            .iter()
            .map(|dm| (dm.domain().to_string(), dm.clone()))
            .collect();
        for dm in domain_metadatas {
            if dm.is_removed() {
                merged.remove(dm.domain());
            } else {
                merged.insert(dm.domain().to_string(), dm.clone());
            }
        }
        let mut active: Vec<DomainMetadata> = merged.into_values().collect();
        active.sort_by(|a, b| a.domain().cmp(b.domain()));
        Some(active)
    }
}

/// The outcome of a successful commit: the version that was written, the follow-up work the
/// engine should perform, and a report of how the transaction went.
#[derive(Debug)]
pub struct TransactionCommitResult {
    pub committed_version: Version,
    pub post_commit_hooks: Vec<Box<dyn PostCommitHook>>,
    pub transaction_report: TransactionReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_descriptions() {
        assert_eq!(
            Operation::CreateTable { as_select: false }.description(),
            "CREATE TABLE"
        );
        assert_eq!(
            Operation::CreateTable { as_select: true }.description(),
            "CREATE TABLE AS SELECT"
        );
        assert_eq!(
            Operation::ReplaceTable {
                or_create: false,
                as_select: false
            }
            .description(),
            "REPLACE TABLE"
        );
        assert_eq!(
            Operation::ReplaceTable {
                or_create: true,
                as_select: true
            }
            .description(),
            "CREATE OR REPLACE TABLE AS SELECT"
        );
        assert_eq!(
            Operation::Write {
                replace_where: None
            }
            .description(),
            "WRITE"
        );
    }

    #[test]
    fn test_operation_parameters() {
        let partition_columns = vec!["a".to_string(), "b".to_string()];
        let create = Operation::CreateTable { as_select: false };
        let parameters = create.parameters(&partition_columns);
        assert_eq!(parameters.get("partitionBy").unwrap(), r#"["a","b"]"#);

        let write = Operation::Write {
            replace_where: Some("a > 1".to_string()),
        };
        let parameters = write.parameters(&partition_columns);
        assert_eq!(parameters.get("replaceWhere").unwrap(), "a > 1");
        assert!(!parameters.contains_key("partitionBy"));
    }

    #[test]
    fn test_domain_state_rejects_add_after_remove() {
        let mut state = DomainMetadataState::default();
        state.remove_domain("foo".to_string()).unwrap();
        assert!(state.add_domain(DomainMetadata::new("foo", "{}")).is_err());
        // a different domain is fine
        state.add_domain(DomainMetadata::new("bar", "{}")).unwrap();
    }

    #[test]
    fn test_domain_state_rejects_remove_after_add() {
        let mut state = DomainMetadataState::default();
        state.add_domain(DomainMetadata::new("foo", "{}")).unwrap();
        assert!(state.remove_domain("foo".to_string()).is_err());
    }

    #[test]
    fn test_domain_state_second_add_replaces() {
        let mut state = DomainMetadataState::default();
        state.add_domain(DomainMetadata::new("foo", "1")).unwrap();
        state.add_domain(DomainMetadata::new("foo", "2")).unwrap();
        assert_eq!(state.domains_to_add.len(), 1);
        assert_eq!(state.domains_to_add[0].configuration(), "2");
    }
}
