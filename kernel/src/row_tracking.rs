//! Row tracking support: the `delta.rowTracking` metadata domain holding the row-id high
//! watermark, and the assignment of base row ids / default commit versions to incoming adds.

use serde::{Deserialize, Serialize};

use crate::actions::{DataAction, DomainMetadata};
use crate::snapshot::Snapshot;
use crate::utils::require;
use crate::{DeltaResult, Error, Version};

/// The domain name under which the row-id high watermark is stored
pub const ROW_TRACKING_DOMAIN_NAME: &str = "delta.rowTracking";

/// Configuration payload of the `delta.rowTracking` domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowTrackingMetadataDomain {
    /// The largest row id handed out so far. Each commit can only increase it.
    pub row_id_high_water_mark: i64,
}

impl RowTrackingMetadataDomain {
    pub fn new(row_id_high_water_mark: i64) -> Self {
        Self {
            row_id_high_water_mark,
        }
    }

    pub fn from_json_configuration(configuration: &str) -> DeltaResult<Self> {
        Ok(serde_json::from_str(configuration)?)
    }

    pub fn to_domain_metadata(&self) -> DeltaResult<DomainMetadata> {
        Ok(DomainMetadata::new(
            ROW_TRACKING_DOMAIN_NAME,
            serde_json::to_string(self)?,
        ))
    }
}

/// The row-id high watermark recorded in the snapshot's row tracking domain, if any.
pub(crate) fn read_high_water_mark(snapshot: &Snapshot) -> DeltaResult<Option<i64>> {
    snapshot
        .get_domain_metadata(ROW_TRACKING_DOMAIN_NAME)
        .map(|dm| {
            let domain = RowTrackingMetadataDomain::from_json_configuration(dm.configuration())?;
            Ok(domain.row_id_high_water_mark)
        })
        .transpose()
}

/// Assign `baseRowId` and `defaultRowCommitVersion` to every add action in `data_actions`,
/// numbering rows upward from `high_water_mark + 1`. Assignment overwrites any values from a
/// previous commit attempt, so it is safe to run once per attempt. Returns the new high
/// watermark after all adds are numbered, or `None` if the stream holds no adds.
pub(crate) fn assign_base_row_ids(
    data_actions: &mut [DataAction],
    high_water_mark: i64,
    default_row_commit_version: Version,
) -> DeltaResult<Option<i64>> {
    let commit_version = i64::try_from(default_row_commit_version)
        .map_err(|_| Error::generic("commit version too large to fit in i64"))?;
    let mut water_mark = high_water_mark;
    let mut assigned = false;
    for action in data_actions {
        let DataAction::Add(add) = action else {
            continue;
        };
        let num_records = add
            .parse_stats()?
            .and_then(|stats| stats.num_records)
            .ok_or_else(|| {
                Error::generic(format!(
                    "add action for {} is missing numRecords statistics, which row tracking \
                     requires",
                    add.path
                ))
            })?;
        add.base_row_id = Some(water_mark + 1);
        add.default_row_commit_version = Some(commit_version);
        water_mark += num_records;
        assigned = true;
    }
    Ok(assigned.then_some(water_mark))
}

/// Replace (or append) the row tracking domain record in `domain_metadatas` so it carries
/// `high_water_mark`. The watermark can only move forward.
pub(crate) fn update_high_water_mark(
    domain_metadatas: &mut Vec<DomainMetadata>,
    high_water_mark: i64,
) -> DeltaResult<()> {
    require!(
        high_water_mark >= 0,
        Error::generic("rowIdHighWatermark must be >= 0")
    );
    let record = RowTrackingMetadataDomain::new(high_water_mark).to_domain_metadata()?;
    if let Some(existing) = domain_metadatas
        .iter_mut()
        .find(|dm| dm.domain() == ROW_TRACKING_DOMAIN_NAME)
    {
        *existing = record;
    } else {
        domain_metadatas.push(record);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Add;

    fn add_with_records(path: &str, num_records: i64) -> DataAction {
        DataAction::Add(Add {
            path: path.to_string(),
            stats: Some(format!(r#"{{"numRecords":{num_records}}}"#)),
            data_change: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_configuration_round_trip() {
        let domain = RowTrackingMetadataDomain::new(115);
        let dm = domain.to_domain_metadata().unwrap();
        assert_eq!(dm.domain(), ROW_TRACKING_DOMAIN_NAME);
        assert_eq!(dm.configuration(), r#"{"rowIdHighWaterMark":115}"#);
        let parsed =
            RowTrackingMetadataDomain::from_json_configuration(dm.configuration()).unwrap();
        assert_eq!(parsed, domain);
    }

    #[test]
    fn test_assign_base_row_ids() {
        let mut actions = vec![
            add_with_records("f1", 10),
            add_with_records("f2", 5),
        ];
        let new_hwm = assign_base_row_ids(&mut actions, 100, 7).unwrap();
        assert_eq!(new_hwm, Some(115));
        let DataAction::Add(f1) = &actions[0] else {
            panic!("expected add")
        };
        assert_eq!(f1.base_row_id, Some(101));
        assert_eq!(f1.default_row_commit_version, Some(7));
        let DataAction::Add(f2) = &actions[1] else {
            panic!("expected add")
        };
        assert_eq!(f2.base_row_id, Some(111));
    }

    #[test]
    fn test_assign_is_idempotent_per_attempt() {
        let mut actions = vec![add_with_records("f1", 10)];
        assign_base_row_ids(&mut actions, 100, 7).unwrap();
        // a rebase re-runs assignment from the merged watermark
        let new_hwm = assign_base_row_ids(&mut actions, 105, 8).unwrap();
        assert_eq!(new_hwm, Some(115));
        let DataAction::Add(f1) = &actions[0] else {
            panic!("expected add")
        };
        assert_eq!(f1.base_row_id, Some(106));
        assert_eq!(f1.default_row_commit_version, Some(8));
    }

    #[test]
    fn test_assign_requires_num_records() {
        let mut actions = vec![DataAction::Add(Add {
            path: "f1".to_string(),
            data_change: true,
            ..Default::default()
        })];
        assert!(assign_base_row_ids(&mut actions, 0, 1).is_err());
    }

    #[test]
    fn test_no_adds_no_watermark() {
        let mut actions = vec![];
        assert_eq!(assign_base_row_ids(&mut actions, 100, 1).unwrap(), None);
    }

    #[test]
    fn test_update_high_water_mark() {
        let mut domains = vec![DomainMetadata::new("other", "{}")];
        update_high_water_mark(&mut domains, 42).unwrap();
        assert_eq!(domains.len(), 2);
        update_high_water_mark(&mut domains, 50).unwrap();
        assert_eq!(domains.len(), 2);
        let row_tracking = domains
            .iter()
            .find(|dm| dm.domain() == ROW_TRACKING_DOMAIN_NAME)
            .unwrap();
        assert_eq!(row_tracking.configuration(), r#"{"rowIdHighWaterMark":50}"#);
        assert!(update_high_water_mark(&mut domains, -1).is_err());
    }
}
