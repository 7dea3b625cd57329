//! Typed representations of the actions defined in the [Delta
//! specification](https://github.com/delta-io/delta/blob/master/PROTOCOL.md), and their
//! round-trip through the single-row union record used on the wire.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::StructType;
use crate::table_features::{
    TableFeature, TABLE_FEATURES_MIN_READER_VERSION, TABLE_FEATURES_MIN_WRITER_VERSION,
};
use crate::table_properties::TableProperties;
use crate::utils::require;
use crate::{DeltaResult, Error};

pub mod domain_metadata;

pub use domain_metadata::DomainMetadata;

pub(crate) const ADD_NAME: &str = "add";
pub(crate) const REMOVE_NAME: &str = "remove";
pub(crate) const METADATA_NAME: &str = "metaData";
pub(crate) const PROTOCOL_NAME: &str = "protocol";
pub(crate) const SET_TRANSACTION_NAME: &str = "txn";
pub(crate) const COMMIT_INFO_NAME: &str = "commitInfo";
pub(crate) const DOMAIN_METADATA_NAME: &str = "domainMetadata";

/// Domains beginning with this prefix are system controlled
pub(crate) const INTERNAL_DOMAIN_PREFIX: &str = "delta.";

/// The storage format of the table's data files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    /// Which file format the data is stored in. Always `parquet` for tables this crate writes.
    pub provider: String,
    /// Format-specific options; empty for parquet
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: String::from("parquet"),
            options: HashMap::new(),
        }
    }
}

/// The logical description of the table. The latest `metaData` action in the log wins; a commit
/// only carries one when the transaction changes it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Globally unique table id, minted once when the table is defined and stable across
    /// metadata changes
    pub id: String,
    /// Table name, if one was supplied at creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form table comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the data files are stored
    pub format: Format,
    /// The table schema, kept in its JSON-encoded form; decode it with
    /// [`Metadata::parse_schema`]
    pub schema_string: String,
    /// Top-level columns the data files are split by. Every entry must name a schema field.
    pub partition_columns: Vec<String>,
    /// When the table was defined, in milliseconds since the Unix epoch
    pub created_time: Option<i64>,
    /// Key/value table properties; the typed view is [`TableProperties`]
    pub configuration: HashMap<String, String>,
}

impl Metadata {
    /// Create the metadata for a new table. Validates that every partition column exists in
    /// the schema.
    pub fn try_new(
        schema: &StructType,
        partition_columns: Vec<String>,
        configuration: HashMap<String, String>,
        created_time: i64,
        description: Option<String>,
    ) -> DeltaResult<Self> {
        for column in &partition_columns {
            require!(
                schema.field(column).is_some(),
                Error::column_not_found(column)
            );
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            description,
            format: Format::default(),
            schema_string: schema.to_json()?,
            partition_columns,
            created_time: Some(created_time),
            configuration,
        })
    }

    /// Parse the `schemaString` into a typed schema
    pub fn parse_schema(&self) -> DeltaResult<StructType> {
        StructType::try_from_json(&self.schema_string)
    }

    /// Parse the metadata configuration map into a [`TableProperties`] struct. Parsing is
    /// infallible -- any items that fail to parse are propagated through to the
    /// `TableProperties::unknown_properties` field.
    pub fn parse_table_properties(&self) -> TableProperties {
        TableProperties::from(self.configuration.iter())
    }

    /// A copy of this metadata with the given entries merged into the configuration
    pub fn with_merged_configuration<K: Into<String>, V: Into<String>>(
        &self,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let mut metadata = self.clone();
        metadata
            .configuration
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        metadata
    }

    /// A copy of this metadata carrying a new schema
    pub fn with_schema(&self, schema: &StructType) -> DeltaResult<Self> {
        let mut metadata = self.clone();
        metadata.schema_string = schema.to_json()?;
        Ok(metadata)
    }
}

/// The reader/writer capabilities a client must have to interact with the table correctly.
/// The feature sets must stay a superset of whatever the current metadata activates.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// Lowest reader protocol version able to read this table
    pub(crate) min_reader_version: i32,
    /// Lowest writer protocol version able to write this table
    pub(crate) min_writer_version: i32,
    /// Named features a reader has to understand. Only populated at reader version 3.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reader_features: Option<Vec<String>>,
    /// Named features a writer has to understand. Only populated at writer version 7.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) writer_features: Option<Vec<String>>,
}

impl Protocol {
    /// Create a new protocol at the table-features versions carrying exactly the given features.
    /// Reader-writer features appear in both feature sets; writer-only features appear in the
    /// writer set only.
    pub fn try_new_with_features(
        features: impl IntoIterator<Item = TableFeature>,
    ) -> DeltaResult<Self> {
        let mut reader_features = Vec::new();
        let mut writer_features = Vec::new();
        for feature in features {
            if feature.is_reader_writer_feature() {
                reader_features.push(feature.as_ref().to_string());
            }
            writer_features.push(feature.as_ref().to_string());
        }
        reader_features.sort();
        reader_features.dedup();
        writer_features.sort();
        writer_features.dedup();
        Ok(Self {
            min_reader_version: TABLE_FEATURES_MIN_READER_VERSION,
            min_writer_version: TABLE_FEATURES_MIN_WRITER_VERSION,
            reader_features: Some(reader_features),
            writer_features: Some(writer_features),
        })
    }

    pub fn min_reader_version(&self) -> i32 {
        self.min_reader_version
    }

    pub fn min_writer_version(&self) -> i32 {
        self.min_writer_version
    }

    pub fn reader_features(&self) -> Option<&[String]> {
        self.reader_features.as_deref()
    }

    pub fn writer_features(&self) -> Option<&[String]> {
        self.writer_features.as_deref()
    }

    /// True if this protocol advertises the given table feature. Legacy protocols (writer
    /// version < 7) carry no feature lists and support none of the named features.
    pub fn supports_feature(&self, feature: TableFeature) -> bool {
        self.writer_features
            .as_deref()
            .is_some_and(|features| features.iter().any(|f| f == feature.as_ref()))
    }

    /// A copy of this protocol that additionally supports `feature`
    pub fn with_feature(&self, feature: TableFeature) -> Self {
        let mut protocol = self.clone();
        let writer = protocol.writer_features.get_or_insert_with(Vec::new);
        if !writer.iter().any(|f| f == feature.as_ref()) {
            writer.push(feature.as_ref().to_string());
            writer.sort();
        }
        if feature.is_reader_writer_feature() {
            let reader = protocol.reader_features.get_or_insert_with(Vec::new);
            if !reader.iter().any(|f| f == feature.as_ref()) {
                reader.push(feature.as_ref().to_string());
                reader.sort();
            }
        }
        protocol
    }
}

/// The per-commit audit record. Always the first action in a commit file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    /// The wall-clock time this commit was attempted, as milliseconds since the epoch.
    pub timestamp: i64,
    /// Monotonically increasing logical commit timestamp. Present iff in-commit timestamps are
    /// enabled on the table; when present, the commit info action must be the first in a commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_commit_timestamp: Option<i64>,
    /// An arbitrary string identifying the operation associated with this commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Map of string key-value pairs providing additional information about the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_parameters: Option<HashMap<String, String>>,
    /// String identifying the writer that produced this commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_info: Option<String>,
    /// Whether this commit only blindly appended new files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_blind_append: Option<bool>,
    /// A unique identifier for the transaction that produced this commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<String>,
    /// Metrics about the operation, keyed by metric name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_metrics: Option<HashMap<String, String>>,
}

/// Per-file statistics, as carried in the `stats` JSON string on [`Add`] actions. Only the
/// record count is modeled; the remaining statistics are opaque to the transaction core.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub num_records: Option<i64>,
}

/// An action introducing a data file into the table.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Add {
    /// Where the file lives: URL-encoded, and usually relative to the table root (absolute
    /// paths are permitted)
    pub path: String,

    /// The values this file holds for the table's partition columns
    #[serde(default)]
    pub partition_values: HashMap<String, String>,

    /// File size in bytes
    pub size: i64,

    /// When the file was written, in milliseconds since the Unix epoch
    pub modification_time: i64,

    /// Whether this file carries rows that are logically new. `false` marks pure reshuffles,
    /// where the same rows also appear in remove actions of the same commit.
    pub data_change: bool,

    /// Per-file statistics as a JSON string; the transaction core only reads `numRecords`
    /// out of it (see [`Statistics`])
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,

    /// Free-form key/value annotations attached to the file by the writer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,

    /// Row id of the file's first physical row; the remaining rows count up from it. Assigned
    /// during commit when the row tracking feature is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_row_id: Option<i64>,

    /// The version of the commit that introduced this file, stamped on its rows as their
    /// default commit version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_row_commit_version: Option<i64>,
}

impl Add {
    /// Parse the `stats` string into typed [`Statistics`], if present
    pub fn parse_stats(&self) -> DeltaResult<Option<Statistics>> {
        self.stats
            .as_deref()
            .map(|s| serde_json::from_str(s).map_err(Error::from))
            .transpose()
    }

    /// The remove action that tombstones this file, carrying over the extended file metadata
    pub fn into_remove(self, deletion_timestamp: i64, data_change: bool) -> Remove {
        Remove {
            path: self.path,
            deletion_timestamp: Some(deletion_timestamp),
            data_change,
            extended_file_metadata: Some(true),
            partition_values: Some(self.partition_values),
            size: Some(self.size),
            tags: self.tags,
            base_row_id: self.base_row_id,
            default_row_commit_version: self.default_row_commit_version,
        }
    }
}

/// An action tombstoning a data file with a deletion timestamp.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remove {
    /// The path of the file being tombstoned, exactly as its add action spelled it
    pub path: String,

    /// When the file was logically deleted, in milliseconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,

    /// Whether rows actually disappear with this tombstone. `false` means the same rows live
    /// on in add actions of the same commit (a rewrite, not a delete).
    pub data_change: bool,

    /// Set when the tombstone carries the partition values, size, and tags of the removed file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_file_metadata: Option<bool>,

    /// Partition column values carried over from the removed add action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<HashMap<String, String>>,

    /// Size in bytes of the removed file; the commit metrics require it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,

    /// Annotations carried over from the removed add action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,

    /// Row id of the removed file's first physical row, when row tracking had assigned one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_row_id: Option<i64>,

    /// The default row commit version the removed file carried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_row_commit_version: Option<i64>,
}

/// An application-idempotency marker: the highest `version` this application has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTransaction {
    /// Which application this marker belongs to; each application tracks its own sequence
    pub app_id: String,

    /// The application's own sequence number for the work committed here. Replaying a number
    /// at or below an already-committed one is rejected during conflict resolution.
    pub version: i64,

    /// When this marker was written, in milliseconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

impl SetTransaction {
    pub fn new(app_id: impl Into<String>, version: i64, last_updated: Option<i64>) -> Self {
        Self {
            app_id: app_id.into(),
            version,
            last_updated,
        }
    }
}

/// The wire form of one log line: a record with one optional field per action kind, exactly one
/// of which is set. [`Action`] is the typed view enforcing that invariant.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_info: Option<CommitInfo>,
    /// `metaData` on the wire, breaking the camelCase pattern of the other fields
    #[serde(rename = "metaData", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn: Option<SetTransaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_metadata: Option<DomainMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add: Option<Add>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<Remove>,
}

impl SingleAction {
    fn inhabited_count(&self) -> usize {
        [
            self.commit_info.is_some(),
            self.metadata.is_some(),
            self.protocol.is_some(),
            self.txn.is_some(),
            self.domain_metadata.is_some(),
            self.add.is_some(),
            self.remove.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// A tagged variant over the action kinds. Exactly one arm is inhabited per log record;
/// serialization goes through the record-with-N-optional-fields shape of [`SingleAction`]
/// for wire compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SingleAction", into = "SingleAction")]
pub enum Action {
    CommitInfo(CommitInfo),
    Metadata(Metadata),
    Protocol(Protocol),
    Txn(SetTransaction),
    DomainMetadata(DomainMetadata),
    Add(Add),
    Remove(Remove),
}

impl Action {
    /// Serialize this action as one log line
    pub fn to_json(&self) -> DeltaResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one log line into an action
    pub fn from_json(line: &str) -> DeltaResult<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// The wire-level field name of this action's arm
    pub fn name(&self) -> &'static str {
        match self {
            Action::CommitInfo(_) => COMMIT_INFO_NAME,
            Action::Metadata(_) => METADATA_NAME,
            Action::Protocol(_) => PROTOCOL_NAME,
            Action::Txn(_) => SET_TRANSACTION_NAME,
            Action::DomainMetadata(_) => DOMAIN_METADATA_NAME,
            Action::Add(_) => ADD_NAME,
            Action::Remove(_) => REMOVE_NAME,
        }
    }
}

impl From<Action> for SingleAction {
    fn from(action: Action) -> Self {
        let mut single = SingleAction::default();
        match action {
            Action::CommitInfo(a) => single.commit_info = Some(a),
            Action::Metadata(a) => single.metadata = Some(a),
            Action::Protocol(a) => single.protocol = Some(a),
            Action::Txn(a) => single.txn = Some(a),
            Action::DomainMetadata(a) => single.domain_metadata = Some(a),
            Action::Add(a) => single.add = Some(a),
            Action::Remove(a) => single.remove = Some(a),
        }
        single
    }
}

impl TryFrom<SingleAction> for Action {
    type Error = Error;

    fn try_from(single: SingleAction) -> DeltaResult<Self> {
        require!(
            single.inhabited_count() == 1,
            Error::generic(format!(
                "action record must have exactly one field set, found {}",
                single.inhabited_count()
            ))
        );
        let action = if let Some(a) = single.commit_info {
            Action::CommitInfo(a)
        } else if let Some(a) = single.metadata {
            Action::Metadata(a)
        } else if let Some(a) = single.protocol {
            Action::Protocol(a)
        } else if let Some(a) = single.txn {
            Action::Txn(a)
        } else if let Some(a) = single.domain_metadata {
            Action::DomainMetadata(a)
        } else if let Some(a) = single.add {
            Action::Add(a)
        } else if let Some(a) = single.remove {
            Action::Remove(a)
        } else {
            unreachable!("inhabited_count was checked above")
        };
        Ok(action)
    }
}

/// A data-file-level action staged by the external data writer and passed into
/// [`Transaction::commit`](crate::transaction::Transaction::commit).
#[derive(Debug, Clone, PartialEq)]
pub enum DataAction {
    Add(Add),
    Remove(Remove),
}

impl From<DataAction> for Action {
    fn from(action: DataAction) -> Self {
        match action {
            DataAction::Add(add) => Action::Add(add),
            DataAction::Remove(remove) => Action::Remove(remove),
        }
    }
}

/// Decode a stream of log lines into actions, propagating read errors.
pub(crate) fn parse_actions<'a>(
    lines: impl Iterator<Item = DeltaResult<String>> + 'a,
) -> impl Iterator<Item = DeltaResult<Action>> + 'a {
    lines.map(|line| Action::from_json(&line?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, StructField};

    fn test_schema() -> StructType {
        StructType::new([
            StructField::not_null("a", DataType::INTEGER),
            StructField::nullable("b", DataType::STRING),
        ])
    }

    #[test]
    fn test_metadata_round_trip() {
        let metadata = Metadata::try_new(
            &test_schema(),
            vec!["a".to_string()],
            HashMap::from([("delta.appendOnly".to_string(), "true".to_string())]),
            1234,
            None,
        )
        .unwrap();
        let action = Action::Metadata(metadata.clone());
        let json = action.to_json().unwrap();
        assert!(json.contains(r#""metaData":"#));
        assert_eq!(Action::from_json(&json).unwrap(), action);
        assert_eq!(metadata.parse_schema().unwrap(), test_schema());
    }

    #[test]
    fn test_metadata_rejects_unknown_partition_column() {
        let err = Metadata::try_new(&test_schema(), vec!["zap".to_string()], HashMap::new(), 0, None)
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound(_)));
    }

    #[test]
    fn test_protocol_features() {
        let protocol = Protocol::try_new_with_features([
            TableFeature::DomainMetadata,
            TableFeature::ColumnMapping,
        ])
        .unwrap();
        assert_eq!(protocol.min_reader_version(), 3);
        assert_eq!(protocol.min_writer_version(), 7);
        assert!(protocol.supports_feature(TableFeature::DomainMetadata));
        assert!(protocol.supports_feature(TableFeature::ColumnMapping));
        assert!(!protocol.supports_feature(TableFeature::RowTracking));
        // reader set carries only reader-writer features
        assert_eq!(protocol.reader_features().unwrap(), ["columnMapping"]);

        let extended = protocol.with_feature(TableFeature::RowTracking);
        assert!(extended.supports_feature(TableFeature::RowTracking));
        assert_eq!(extended.reader_features().unwrap(), ["columnMapping"]);
    }

    #[test]
    fn test_action_round_trip_all_kinds() {
        let actions = vec![
            Action::CommitInfo(CommitInfo {
                timestamp: 100,
                in_commit_timestamp: Some(101),
                operation: Some("WRITE".to_string()),
                operation_parameters: Some(HashMap::new()),
                engine_info: Some("Kernel-0.1.0/test".to_string()),
                is_blind_append: Some(false),
                txn_id: Some("a-txn".to_string()),
                operation_metrics: None,
            }),
            Action::Protocol(Protocol::try_new_with_features([TableFeature::DomainMetadata]).unwrap()),
            Action::Txn(SetTransaction::new("app-1", 7, Some(100))),
            Action::DomainMetadata(DomainMetadata::new("foo", r#"{"k":"1"}"#)),
            Action::Add(Add {
                path: "part-0000.parquet".to_string(),
                partition_values: HashMap::from([("a".to_string(), "1".to_string())]),
                size: 100,
                modification_time: 1234,
                data_change: true,
                stats: Some(r#"{"numRecords":10}"#.to_string()),
                ..Default::default()
            }),
            Action::Remove(Remove {
                path: "part-0000.parquet".to_string(),
                deletion_timestamp: Some(1235),
                data_change: true,
                extended_file_metadata: Some(true),
                size: Some(100),
                ..Default::default()
            }),
        ];
        for action in actions {
            let json = action.to_json().unwrap();
            assert_eq!(Action::from_json(&json).unwrap(), action, "{json}");
        }
    }

    #[test]
    fn test_single_action_exactly_one_arm() {
        // empty record
        assert!(Action::from_json("{}").is_err());
        // two arms inhabited
        let two = r#"{"txn":{"appId":"a","version":1},"domainMetadata":{"domain":"d","configuration":"{}","removed":false}}"#;
        assert!(Action::from_json(two).is_err());
    }

    #[test]
    fn test_add_into_remove() {
        let add = Add {
            path: "f1.parquet".to_string(),
            partition_values: HashMap::from([("a".to_string(), "1".to_string())]),
            size: 10,
            modification_time: 1,
            data_change: true,
            ..Default::default()
        };
        let remove = add.clone().into_remove(999, true);
        assert_eq!(remove.path, add.path);
        assert_eq!(remove.deletion_timestamp, Some(999));
        assert_eq!(remove.extended_file_metadata, Some(true));
        assert_eq!(remove.size, Some(10));
        assert!(remove.data_change);
    }

    #[test]
    fn test_parse_stats() {
        let add = Add {
            stats: Some(r#"{"numRecords":42,"minValues":{"a":1}}"#.to_string()),
            ..Default::default()
        };
        assert_eq!(add.parse_stats().unwrap().unwrap().num_records, Some(42));
        assert!(Add::default().parse_stats().unwrap().is_none());
    }

    #[test]
    fn test_action_names() {
        assert_eq!(
            Action::DomainMetadata(DomainMetadata::new("d", "{}")).name(),
            "domainMetadata"
        );
        assert_eq!(Action::Metadata(Metadata::default()).name(), "metaData");
        assert_eq!(Action::Protocol(Protocol::default()).name(), "protocol");
        assert_eq!(
            Action::Txn(SetTransaction::new("a", 1, None)).name(),
            "txn"
        );
        assert_eq!(Action::Add(Add::default()).name(), "add");
        assert_eq!(Action::Remove(Remove::default()).name(), "remove");
        assert_eq!(
            Action::CommitInfo(CommitInfo::default()).name(),
            "commitInfo"
        );
    }

    #[test]
    fn test_commit_info_field_names() {
        let action = Action::CommitInfo(CommitInfo {
            timestamp: 1,
            in_commit_timestamp: Some(2),
            is_blind_append: Some(false),
            ..Default::default()
        });
        let json = action.to_json().unwrap();
        assert!(json.contains(r#""commitInfo""#));
        assert!(json.contains(r#""inCommitTimestamp":2"#));
        assert!(json.contains(r#""isBlindAppend":false"#));
    }
}
