//! Delta table properties. This module implements per-table configuration which governs how
//! table-level capabilities are configured (turned on/off etc.). This is orthogonal to
//! protocol-level 'table features' which announce reader/writer requirements (and which usually
//! must then be activated by table properties).

use std::collections::HashMap;
use std::num::NonZero;
use std::time::Duration;

use crate::table_features::ColumnMappingMode;
use crate::Version;

/// Prefix for delta table properties (e.g., `delta.appendOnly`)
pub const DELTA_PROPERTY_PREFIX: &str = "delta.";

// Table property key constants
pub(crate) const APPEND_ONLY: &str = "delta.appendOnly";
pub(crate) const CHECKPOINT_INTERVAL: &str = "delta.checkpointInterval";
pub(crate) const COLUMN_MAPPING_MODE: &str = "delta.columnMapping.mode";
pub(crate) const COLUMN_MAPPING_MAX_COLUMN_ID: &str = "delta.columnMapping.maxColumnId";
pub(crate) const DELETED_FILE_RETENTION_DURATION: &str = "delta.deletedFileRetentionDuration";
pub(crate) const ENABLE_DELETION_VECTORS: &str = "delta.enableDeletionVectors";
pub(crate) const ENABLE_TYPE_WIDENING: &str = "delta.enableTypeWidening";
pub(crate) const ENABLE_ICEBERG_COMPAT_V1: &str = "delta.enableIcebergCompatV1";
pub(crate) const ENABLE_ICEBERG_COMPAT_V2: &str = "delta.enableIcebergCompatV2";
pub(crate) const ENABLE_ICEBERG_COMPAT_V3: &str = "delta.enableIcebergCompatV3";
pub(crate) const ENABLE_ROW_TRACKING: &str = "delta.enableRowTracking";
pub(crate) const ROW_TRACKING_SUSPENDED: &str = "delta.rowTrackingSuspended";
pub(crate) const ENABLE_IN_COMMIT_TIMESTAMPS: &str = "delta.enableInCommitTimestamps";
pub(crate) const IN_COMMIT_TIMESTAMP_ENABLEMENT_VERSION: &str =
    "delta.inCommitTimestampEnablementVersion";
pub(crate) const IN_COMMIT_TIMESTAMP_ENABLEMENT_TIMESTAMP: &str =
    "delta.inCommitTimestampEnablementTimestamp";
pub(crate) const UNIVERSAL_FORMAT_ENABLED_FORMATS: &str = "delta.universalFormat.enabledFormats";
pub(crate) const MIN_READER_VERSION: &str = "delta.minReaderVersion";
pub(crate) const MIN_WRITER_VERSION: &str = "delta.minWriterVersion";
pub(crate) const FEATURE_PROPERTY_PREFIX: &str = "delta.feature.";
pub(crate) const COORDINATED_COMMITS_COORDINATOR: &str =
    "delta.coordinatedCommits.commitCoordinator-preview";
pub(crate) const COORDINATED_COMMITS_COORDINATOR_CONF: &str =
    "delta.coordinatedCommits.commitCoordinatorConf-preview";
pub(crate) const COORDINATED_COMMITS_TABLE_CONF: &str =
    "delta.coordinatedCommits.tableConf-preview";
/// Internal key under which engines historically persisted clustering columns in the
/// configuration map; replaced by the canonical [`CLUSTERING_COLUMNS`] during comparisons.
pub(crate) const CLUSTERING_COLUMNS_INTERNAL: &str = "clusteringColumns";
pub(crate) const CLUSTERING_COLUMNS: &str = "delta.clusteringColumns";

/// Default interval (in commits) between checkpoints when `delta.checkpointInterval` is unset
pub(crate) const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;
/// Default retention for logically deleted files when the property is unset: one week
pub(crate) const DEFAULT_DELETED_FILE_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Delta table properties. These are parsed from the `configuration` map in the most recent
/// `metaData` action of a table.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct TableProperties {
    /// true for this Delta table to be append-only. If append-only, existing records cannot be
    /// deleted, and existing values cannot be updated.
    pub append_only: Option<bool>,

    /// Interval (expressed as number of commits) after which a new checkpoint should be created
    pub checkpoint_interval: Option<NonZero<u64>>,

    /// Whether column mapping is enabled for Delta table columns and the corresponding
    /// Parquet columns that use different names
    pub column_mapping_mode: Option<ColumnMappingMode>,

    /// The shortest duration for Delta Lake to keep logically deleted data files before deleting
    /// them physically
    pub deleted_file_retention_duration: Option<Duration>,

    /// true to enable deletion vectors and predictive I/O for updates
    pub enable_deletion_vectors: Option<bool>,

    /// Whether widening the type of an existing column or field is allowed
    pub enable_type_widening: Option<bool>,

    /// Whether Iceberg compatibility V1 is enabled for this table
    pub enable_iceberg_compat_v1: Option<bool>,

    /// Whether Iceberg compatibility V2 is enabled for this table
    pub enable_iceberg_compat_v2: Option<bool>,

    /// Whether Iceberg compatibility V3 is enabled for this table
    pub enable_iceberg_compat_v3: Option<bool>,

    /// Whether to enable row tracking for the table. When enabled, all rows are guaranteed to
    /// have a row id and commit version.
    pub enable_row_tracking: Option<bool>,

    /// Whether to explicitly suspend generating row tracking metadata during writes even if
    /// row tracking is supported
    pub row_tracking_suspended: Option<bool>,

    /// Whether to enable in-commit timestamps: a monotonically increasing timestamp stored in
    /// each commit's metadata
    pub enable_in_commit_timestamps: Option<bool>,

    /// The version of the table at which in-commit timestamps were enabled
    pub in_commit_timestamp_enablement_version: Option<Version>,

    /// The timestamp of the table at which in-commit timestamps were enabled. This must be the
    /// same as the inCommitTimestamp of the commit when the feature was enabled.
    pub in_commit_timestamp_enablement_timestamp: Option<i64>,

    /// Surface formats (e.g. `iceberg`, `hudi`) the table keeps converted copies for. Each
    /// commit emits a conversion hook per enabled format.
    pub universal_format_enabled_formats: Option<Vec<String>>,

    /// any unrecognized properties are passed through and ignored by the parser
    pub unknown_properties: HashMap<String, String>,
}

impl TableProperties {
    /// Checkpoint interval with the protocol default applied
    pub fn checkpoint_interval_or_default(&self) -> u64 {
        self.checkpoint_interval
            .map(NonZero::get)
            .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL)
    }

    /// Deleted-file retention with the protocol default (one week) applied
    pub fn deleted_file_retention_or_default(&self) -> Duration {
        self.deleted_file_retention_duration
            .unwrap_or(DEFAULT_DELETED_FILE_RETENTION)
    }

    pub fn is_append_only(&self) -> bool {
        self.append_only.unwrap_or(false)
    }

    pub fn is_in_commit_timestamps_enabled(&self) -> bool {
        self.enable_in_commit_timestamps.unwrap_or(false)
    }

    pub fn is_row_tracking_enabled(&self) -> bool {
        self.enable_row_tracking.unwrap_or(false) && !self.row_tracking_suspended.unwrap_or(false)
    }
}

impl<K, V, I> From<I> for TableProperties
where
    K: AsRef<str>,
    V: AsRef<str>,
    I: IntoIterator<Item = (K, V)>,
{
    fn from(unparsed: I) -> Self {
        let mut props = TableProperties::default();
        for (key, value) in unparsed {
            let (key, value) = (key.as_ref(), value.as_ref());
            let parsed = match key {
                APPEND_ONLY => parse_bool(value).map(|v| props.append_only = Some(v)),
                CHECKPOINT_INTERVAL => {
                    parse_positive(value).map(|v| props.checkpoint_interval = Some(v))
                }
                COLUMN_MAPPING_MODE => ColumnMappingMode::try_from_str(value)
                    .ok()
                    .map(|v| props.column_mapping_mode = Some(v)),
                DELETED_FILE_RETENTION_DURATION => {
                    parse_interval(value).map(|v| props.deleted_file_retention_duration = Some(v))
                }
                ENABLE_DELETION_VECTORS => {
                    parse_bool(value).map(|v| props.enable_deletion_vectors = Some(v))
                }
                ENABLE_TYPE_WIDENING => {
                    parse_bool(value).map(|v| props.enable_type_widening = Some(v))
                }
                ENABLE_ICEBERG_COMPAT_V1 => {
                    parse_bool(value).map(|v| props.enable_iceberg_compat_v1 = Some(v))
                }
                ENABLE_ICEBERG_COMPAT_V2 => {
                    parse_bool(value).map(|v| props.enable_iceberg_compat_v2 = Some(v))
                }
                ENABLE_ICEBERG_COMPAT_V3 => {
                    parse_bool(value).map(|v| props.enable_iceberg_compat_v3 = Some(v))
                }
                ENABLE_ROW_TRACKING => {
                    parse_bool(value).map(|v| props.enable_row_tracking = Some(v))
                }
                ROW_TRACKING_SUSPENDED => {
                    parse_bool(value).map(|v| props.row_tracking_suspended = Some(v))
                }
                ENABLE_IN_COMMIT_TIMESTAMPS => {
                    parse_bool(value).map(|v| props.enable_in_commit_timestamps = Some(v))
                }
                IN_COMMIT_TIMESTAMP_ENABLEMENT_VERSION => value
                    .parse()
                    .ok()
                    .map(|v| props.in_commit_timestamp_enablement_version = Some(v)),
                IN_COMMIT_TIMESTAMP_ENABLEMENT_TIMESTAMP => value
                    .parse()
                    .ok()
                    .map(|v| props.in_commit_timestamp_enablement_timestamp = Some(v)),
                UNIVERSAL_FORMAT_ENABLED_FORMATS => {
                    let formats: Vec<String> = value
                        .split(',')
                        .map(|format| format.trim().to_ascii_lowercase())
                        .filter(|format| !format.is_empty())
                        .collect();
                    Some(props.universal_format_enabled_formats = Some(formats))
                }
                _ => None,
            };
            if parsed.is_none() {
                props
                    .unknown_properties
                    .insert(key.to_string(), value.to_string());
            }
        }
        props
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_positive(value: &str) -> Option<NonZero<u64>> {
    value.parse().ok().and_then(NonZero::new)
}

/// Parse an SQL-style interval string like `interval 7 days` into a [`Duration`]. Bare integers
/// are accepted as milliseconds.
fn parse_interval(value: &str) -> Option<Duration> {
    if let Ok(millis) = value.parse::<u64>() {
        return Some(Duration::from_millis(millis));
    }
    let mut it = value.split_ascii_whitespace();
    if !it.next()?.eq_ignore_ascii_case("interval") {
        return None;
    }
    let number: u64 = it.next()?.parse().ok()?;
    let unit = it.next()?.to_ascii_lowercase();
    if it.next().is_some() {
        return None;
    }
    let duration = match unit.trim_end_matches('s') {
        "millisecond" => Duration::from_millis(number),
        "second" => Duration::from_secs(number),
        "minute" => Duration::from_secs(number * 60),
        "hour" => Duration::from_secs(number * 60 * 60),
        "day" => Duration::from_secs(number * 24 * 60 * 60),
        "week" => Duration::from_secs(number * 7 * 24 * 60 * 60),
        _ => return None,
    };
    Some(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_properties() {
        let map: HashMap<String, String> = HashMap::new();
        assert_eq!(TableProperties::from(map.iter()), TableProperties::default());
    }

    #[test]
    fn test_parse_table_properties() {
        let properties = [
            (APPEND_ONLY, "true"),
            (CHECKPOINT_INTERVAL, "101"),
            (COLUMN_MAPPING_MODE, "name"),
            (DELETED_FILE_RETENTION_DURATION, "interval 2 days"),
            (ENABLE_ICEBERG_COMPAT_V2, "true"),
            (ENABLE_ROW_TRACKING, "true"),
            (ENABLE_IN_COMMIT_TIMESTAMPS, "true"),
            (IN_COMMIT_TIMESTAMP_ENABLEMENT_VERSION, "15"),
            (IN_COMMIT_TIMESTAMP_ENABLEMENT_TIMESTAMP, "1612345678"),
        ];
        let actual = TableProperties::from(properties.into_iter());
        assert_eq!(actual.append_only, Some(true));
        assert_eq!(actual.checkpoint_interval, NonZero::new(101));
        assert_eq!(
            actual.column_mapping_mode,
            Some(ColumnMappingMode::Name)
        );
        assert_eq!(
            actual.deleted_file_retention_duration,
            Some(Duration::from_secs(2 * 24 * 60 * 60))
        );
        assert_eq!(actual.enable_iceberg_compat_v2, Some(true));
        assert!(actual.is_row_tracking_enabled());
        assert!(actual.is_in_commit_timestamps_enabled());
        assert_eq!(actual.in_commit_timestamp_enablement_version, Some(15));
        assert!(actual.unknown_properties.is_empty());
    }

    #[test]
    fn known_key_unknown_val() {
        let properties = HashMap::from([(APPEND_ONLY.to_string(), "wack".to_string())]);
        let parsed = TableProperties::from(properties.iter());
        assert_eq!(parsed.append_only, None);
        assert_eq!(parsed.unknown_properties[APPEND_ONLY], "wack");
    }

    #[test]
    fn allow_unknown_keys() {
        let properties = [("my.custom.prop".to_string(), "two words".to_string())];
        let parsed = TableProperties::from(properties.clone().into_iter());
        assert_eq!(parsed.unknown_properties["my.custom.prop"], "two words");
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("interval 1 second"), Some(Duration::from_secs(1)));
        assert_eq!(parse_interval("interval 5 minutes"), Some(Duration::from_secs(300)));
        assert_eq!(
            parse_interval("interval 1 week"),
            Some(Duration::from_secs(7 * 24 * 60 * 60))
        );
        assert_eq!(parse_interval("1500"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_interval("interval 1 fortnight"), None);
        assert_eq!(parse_interval("a while"), None);
    }

    #[test]
    fn test_defaults() {
        let props = TableProperties::default();
        assert_eq!(props.checkpoint_interval_or_default(), 10);
        assert_eq!(
            props.deleted_file_retention_or_default(),
            Duration::from_secs(7 * 24 * 60 * 60)
        );
        assert!(!props.is_append_only());
        assert!(!props.is_row_tracking_enabled());
    }

    #[test]
    fn test_parse_universal_format() {
        let props = TableProperties::from([(UNIVERSAL_FORMAT_ENABLED_FORMATS, "iceberg, HUDI")]);
        assert_eq!(
            props.universal_format_enabled_formats,
            Some(vec!["iceberg".to_string(), "hudi".to_string()])
        );
    }

    #[test]
    fn test_row_tracking_suspension() {
        let props = TableProperties::from([
            (ENABLE_ROW_TRACKING, "true"),
            (ROW_TRACKING_SUSPENDED, "true"),
        ]);
        assert!(!props.is_row_tracking_enabled());
    }
}
