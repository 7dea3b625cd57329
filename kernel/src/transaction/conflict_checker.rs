//! Conflict resolution for a transaction that lost the commit race: read the winning commits,
//! decide whether the losing transaction may rebase, and produce the adjusted state to retry
//! with. Only blind-append semantics are resolvable; any winning protocol, metadata, or
//! idempotency-marker change is fatal.

use std::collections::HashMap;

use tracing::info;

use crate::actions::{Action, DataAction, DomainMetadata, Protocol, SetTransaction};
use crate::crc::{try_read_crc_file, CrcInfo};
use crate::log_segment::LogSegment;
use crate::row_tracking::{
    assign_base_row_ids, read_high_water_mark, update_high_water_mark,
    RowTrackingMetadataDomain, ROW_TRACKING_DOMAIN_NAME,
};
use crate::snapshot::Snapshot;
use crate::table_features::TableFeature;
use crate::utils::require;
use crate::{DeltaResult, Engine, Error, Version};

/// The resolver's verdict: the version to retry at, the timestamp floor for the next in-commit
/// timestamp, and the rewritten in-flight state the retry must carry.
pub(crate) struct TransactionRebaseState {
    /// The latest winning version of the table
    pub latest_version: Version,
    /// The commit timestamp of the latest winning commit: its in-commit timestamp when ICT is
    /// enabled on the losing snapshot, its file modification time otherwise
    pub latest_commit_timestamp: i64,
    /// The losing transaction's data actions, rewritten where a domain-specific resolution
    /// applies (row-id reassignment)
    pub updated_data_actions: Vec<DataAction>,
    /// The losing transaction's domain metadata, rewritten likewise
    pub updated_domain_metadatas: Vec<DomainMetadata>,
    /// The checksum record of the latest winning version, if one exists
    pub updated_crc_info: Option<CrcInfo>,
}

/// Resolve conflicts between the losing transaction and the transactions that committed after
/// its read snapshot. Fatal conflicts surface as errors and must not be retried.
pub(crate) fn resolve_conflicts(
    engine: &dyn Engine,
    snapshot: &Snapshot,
    attempt_version: Version,
    losing_txn: Option<&SetTransaction>,
    protocol: &Protocol,
    attempt_domain_metadatas: Vec<DomainMetadata>,
    mut attempt_data_actions: Vec<DataAction>,
) -> DeltaResult<TransactionRebaseState> {
    let first_winning_version = snapshot.version().wrapping_add(1);
    let segment = LogSegment::for_versions(
        engine,
        snapshot.log_root().clone(),
        first_winning_version,
        None,
    )
    .map_err(|e| match e {
        // we only get here because a commit collided, so the winners must be listable
        Error::FileNotFound(_) => Error::internal_error("no winning commits found"),
        other => other,
    })?;
    let latest_version = segment.end_version;
    info!(
        attempt_version,
        latest_version, "resolving conflicts against winning commits"
    );

    let mut winning_domains: HashMap<String, DomainMetadata> = HashMap::new();
    let mut winning_commit_info_ict: Option<i64> = None;
    for batch in segment.read_actions(engine) {
        let batch = batch?;
        let is_last = batch.version == latest_version;
        // a winning protocol change outranks a winning metadata change in the same commit
        require!(
            !batch
                .actions
                .iter()
                .any(|action| matches!(action, Action::Protocol(_))),
            Error::protocol_changed(format!(
                "a winning commit changed the protocol before attempt version {attempt_version}"
            ))
        );
        require!(
            !batch
                .actions
                .iter()
                .any(|action| matches!(action, Action::Metadata(_))),
            Error::metadata_changed(format!(
                "a winning commit changed the metadata before attempt version {attempt_version}"
            ))
        );
        for action in batch.actions {
            match action {
                // ruled out above
                Action::Protocol(_) | Action::Metadata(_) => {}
                Action::Txn(winning_txn) => {
                    if let Some(losing) = losing_txn {
                        require!(
                            winning_txn.app_id != losing.app_id
                                || winning_txn.version < losing.version,
                            Error::ConcurrentTransaction {
                                app_id: losing.app_id.clone(),
                                attempt_version: losing.version,
                                committed_version: winning_txn.version,
                            }
                        );
                    }
                }
                Action::DomainMetadata(dm) => {
                    winning_domains.insert(dm.domain().to_string(), dm);
                }
                Action::CommitInfo(ci) if is_last => {
                    winning_commit_info_ict = ci.in_commit_timestamp;
                }
                Action::CommitInfo(_) | Action::Add(_) | Action::Remove(_) => {
                    // data actions in winners are ignored: blind-append semantics only
                }
            }
        }
    }

    // Check every domain the losing transaction writes against the winners. The only conflict
    // with a domain-specific resolution is row tracking: the winners' high watermark shifts the
    // base the loser numbers its rows from.
    let mut last_winning_high_water_mark: Option<i64> = None;
    for losing_dm in &attempt_domain_metadatas {
        let Some(winning_dm) = winning_domains.get(losing_dm.domain()) else {
            continue;
        };
        match losing_dm.domain() {
            ROW_TRACKING_DOMAIN_NAME => {
                let winning_high_water_mark = RowTrackingMetadataDomain::from_json_configuration(
                    winning_dm.configuration(),
                )?
                .row_id_high_water_mark;
                last_winning_high_water_mark = Some(winning_high_water_mark);
            }
            domain => return Err(Error::concurrent_domain_metadata(domain)),
        }
    }

    // Rebase the in-flight row ids onto the merged watermark
    let mut updated_domain_metadatas = attempt_domain_metadatas;
    if protocol.supports_feature(TableFeature::RowTracking) {
        let base_water_mark = read_high_water_mark(snapshot)?
            .unwrap_or(-1)
            .max(last_winning_high_water_mark.unwrap_or(-1));
        let new_water_mark =
            assign_base_row_ids(&mut attempt_data_actions, base_water_mark, latest_version + 1)?;
        if let Some(water_mark) = new_water_mark {
            update_high_water_mark(&mut updated_domain_metadatas, water_mark)?;
        }
    }

    let latest_commit_timestamp = latest_commit_timestamp(
        snapshot,
        latest_version,
        segment.last_commit_file().last_modified,
        winning_commit_info_ict,
    )?;

    let updated_crc_info = try_read_crc_file(engine, &segment.log_root, latest_version)?;

    Ok(TransactionRebaseState {
        latest_version,
        latest_commit_timestamp,
        updated_data_actions: attempt_data_actions,
        updated_domain_metadatas,
        updated_crc_info,
    })
}

/// The commit timestamp of the latest winning commit. For ICT-enabled tables this is the
/// in-commit timestamp from its commit info; otherwise the commit file's modification time.
fn latest_commit_timestamp(
    snapshot: &Snapshot,
    latest_version: Version,
    last_modified: i64,
    winning_commit_info_ict: Option<i64>,
) -> DeltaResult<i64> {
    if snapshot.is_pre_commit()
        || !snapshot
            .table_properties()
            .is_in_commit_timestamps_enabled()
    {
        Ok(last_modified)
    } else {
        winning_commit_info_ict.ok_or_else(|| {
            Error::generic(format!(
                "winning commit {latest_version} is missing the in-commit timestamp required \
                 on an ICT-enabled table"
            ))
        })
    }
}
