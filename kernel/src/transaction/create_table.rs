//! The create/replace planner: validates a table descriptor against whatever already exists at
//! the location, derives the initial protocol and metadata, runs the Iceberg-compat engine,
//! and produces the transaction that will commit the operation. REPLACE semantics (removing
//! every active file, tombstoning domains) live in the commit pipeline keyed off the chosen
//! [`Operation`].

use std::collections::HashMap;

use tracing::info;
use url::Url;

use crate::clustering::{ClusteringMetadataDomain, CLUSTERING_DOMAIN_NAME};
use crate::actions::{Metadata, Protocol};
use crate::iceberg_compat::{
    block_config_change_on_existing_table, validate_and_update_all_iceberg_compat,
};
use crate::schema::{DataType, StructType};
use crate::snapshot::{Snapshot, SnapshotRef};
use crate::table_features::{ColumnMappingMode, TableFeature};
use crate::table_properties::{
    TableProperties, CLUSTERING_COLUMNS, CLUSTERING_COLUMNS_INTERNAL,
    COLUMN_MAPPING_MAX_COLUMN_ID, COORDINATED_COMMITS_COORDINATOR,
    COORDINATED_COMMITS_COORDINATOR_CONF, COORDINATED_COMMITS_TABLE_CONF,
    ENABLE_IN_COMMIT_TIMESTAMPS, FEATURE_PROPERTY_PREFIX,
    IN_COMMIT_TIMESTAMP_ENABLEMENT_TIMESTAMP, IN_COMMIT_TIMESTAMP_ENABLEMENT_VERSION,
    MIN_READER_VERSION, MIN_WRITER_VERSION,
};
use crate::transaction::{Operation, Transaction};
use crate::utils::{current_time_ms, require};
use crate::{DeltaResult, Engine, Error};

/// How an existing table at the target affects the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Append,
    Overwrite,
    ErrorIfExists,
    Ignore,
}

/// The flavor of table-defining operation being planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCreationMode {
    Create,
    Replace,
    CreateOrReplace,
}

/// Whether the catalog owns the table's storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Managed,
    External,
}

/// Everything the planner needs to know about the requested table.
#[derive(Debug, Clone)]
pub struct CreateTableRequest {
    /// Catalog identifier, recorded for error messages only
    pub identifier: String,
    /// The table root. Must be a directory URL (trailing slash).
    pub location: Url,
    pub schema: Option<StructType>,
    pub partition_columns: Vec<String>,
    pub clustering_columns: Option<Vec<String>>,
    pub properties: HashMap<String, String>,
    pub mode: SaveMode,
    pub operation: TableCreationMode,
    pub kind: TableKind,
    /// True when the statement carries a query (CTAS)
    pub has_query: bool,
    /// True when the operation was issued through the options API rather than SQL DDL
    pub via_options_api: bool,
    /// Partial-overwrite predicate, only meaningful with a query
    pub replace_where: Option<String>,
    pub engine_info: String,
    /// Permit a table with an empty schema (only at version <= 0)
    pub allow_empty_schema: bool,
    /// Whether a catalog entry exists for the identifier. `None` means there is no catalog
    /// and existence is judged by the log on disk.
    pub exists_in_catalog: Option<bool>,
}

impl CreateTableRequest {
    pub fn new(
        identifier: impl Into<String>,
        location: Url,
        operation: TableCreationMode,
        mode: SaveMode,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            location,
            schema: None,
            partition_columns: vec![],
            clustering_columns: None,
            properties: HashMap::new(),
            mode,
            operation,
            kind: TableKind::Managed,
            has_query: false,
            via_options_api: false,
            replace_where: None,
            engine_info: String::new(),
            allow_empty_schema: false,
            exists_in_catalog: None,
        }
    }

    pub fn with_schema(mut self, schema: StructType) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_partition_columns(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.partition_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_clustering_columns(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.clustering_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_properties<K: Into<String>, V: Into<String>>(
        mut self,
        properties: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.properties = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_engine_info(mut self, engine_info: impl Into<String>) -> Self {
        self.engine_info = engine_info.into();
        self
    }
}

/// Plan a `CREATE` / `REPLACE` / `CREATE OR REPLACE` operation. Returns `Ok(None)` when the
/// combination of mode and existing table makes the operation a no-op, otherwise the ready
/// transaction for the caller to stage data into and commit.
pub fn plan_create_or_replace(
    engine: &dyn Engine,
    request: CreateTableRequest,
) -> DeltaResult<Option<Transaction>> {
    let snapshot = Snapshot::try_latest(engine, request.location.clone())?;
    let exists = request.exists_in_catalog.unwrap_or(snapshot.is_some());
    info!(
        identifier = %request.identifier,
        exists,
        table_on_disk = snapshot.is_some(),
        "planning create/replace"
    );

    match request.mode {
        SaveMode::Ignore if exists => return Ok(None),
        SaveMode::ErrorIfExists if exists => {
            return Err(Error::TableAlreadyExists(request.location.to_string()))
        }
        _ => {}
    }
    match request.operation {
        TableCreationMode::Create if exists => {
            return Err(Error::TableAlreadyExists(request.location.to_string()))
        }
        TableCreationMode::Replace if snapshot.is_none() => {
            return Err(Error::generic(format!(
                "cannot REPLACE table {}: no table exists at {}",
                request.identifier, request.location
            )))
        }
        TableCreationMode::CreateOrReplace
            if !exists
                && !request.allow_empty_schema
                && request.schema.as_ref().is_none_or(StructType::is_empty) =>
        {
            return Err(Error::SchemaNotProvided(request.location.to_string()))
        }
        _ => {}
    }

    if snapshot.is_none() {
        match request.kind {
            // the storage location of a new managed table must be empty or absent
            TableKind::Managed => require_empty_location(engine, &request.location)?,
            TableKind::External => {
                require!(
                    request.schema.is_some(),
                    Error::ExternalTableWithoutLog(request.location.to_string())
                );
            }
        }
    }

    // resolve the effective schema: a replacement without one keeps the existing schema
    let schema = match (&request.schema, &snapshot) {
        (Some(schema), _) => schema.clone(),
        (None, Some(existing)) => existing.schema()?,
        (None, None) => return Err(Error::SchemaNotProvided(request.location.to_string())),
    };
    require!(
        !schema.is_empty() || request.allow_empty_schema,
        Error::SchemaNotProvided(request.location.to_string())
    );

    if let Some(existing) = &snapshot {
        match request.operation {
            TableCreationMode::Create => {
                // registering over an existing log: everything supplied must match it
                validate_against_existing(&request, &schema, existing)?;
            }
            TableCreationMode::Replace | TableCreationMode::CreateOrReplace => {
                let existing_clustered = existing_clustering_columns(existing)?.is_some();
                require!(
                    !(existing_clustered && !request.partition_columns.is_empty()),
                    Error::ReplacingClusteredWithPartitioned(request.location.to_string())
                );
            }
        }
    }

    let metadata = Metadata::try_new(
        &schema,
        request.partition_columns.clone(),
        request.properties.clone(),
        current_time_ms(),
        None,
    )?;
    let protocol = derive_protocol(
        &metadata.parse_table_properties(),
        request.clustering_columns.is_some(),
    )?;

    let old_configuration = snapshot
        .as_ref()
        .map(|s| s.metadata().configuration.clone())
        .unwrap_or_default();
    block_config_change_on_existing_table(
        &old_configuration,
        &metadata.configuration,
        snapshot.is_none(),
    )?;
    let metadata =
        match validate_and_update_all_iceberg_compat(&metadata, &protocol, true)? {
            Some(updated) => updated,
            None => metadata,
        };

    let operation = choose_operation(&request, snapshot.is_some());

    // A CTAS resolved to a plain write appends into the existing table instead of redefining it
    if let Operation::Write { .. } = operation {
        let existing = snapshot.expect("write label is only chosen for an existing table");
        if let Some(provided) = &request.schema {
            require!(
                schemas_equivalent(provided, &existing.schema()?),
                Error::SchemaMismatch(format!(
                    "cannot overwrite table {} with a different schema",
                    request.identifier
                ))
            );
        }
        let mut transaction = Transaction::try_new(existing, request.engine_info)?;
        transaction.operation = operation;
        return Ok(Some(transaction));
    }

    let read_snapshot: SnapshotRef = match snapshot {
        Some(existing) => existing,
        None => std::sync::Arc::new(Snapshot::new_pre_commit(
            request.location.clone(),
            protocol.clone(),
            metadata.clone(),
        )?),
    };

    Ok(Some(Transaction::new_create_or_replace(
        read_snapshot,
        operation,
        request.engine_info,
        protocol,
        metadata,
        request.clustering_columns,
    )))
}

/// Fail unless the data path is empty or absent.
fn require_empty_location(engine: &dyn Engine, location: &Url) -> DeltaResult<()> {
    match engine.storage_handler().list_from(location) {
        Ok(mut files) => match files.next() {
            None => Ok(()),
            Some(Err(e)) => Err(e),
            Some(Ok(_)) => Err(Error::NonEmptyTableLocation(location.to_string())),
        },
        Err(Error::FileNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// The validation pipeline for defining a table over an existing log: the supplied schema,
/// partitioning, clustering, and (filtered) properties must all match what is already there.
fn validate_against_existing(
    request: &CreateTableRequest,
    schema: &StructType,
    existing: &SnapshotRef,
) -> DeltaResult<()> {
    require!(
        schemas_equivalent(schema, &existing.schema()?),
        Error::SchemaMismatch(format!(
            "the schema supplied for table {} does not match the existing schema",
            request.identifier
        ))
    );
    require!(
        request.partition_columns == existing.metadata().partition_columns,
        Error::PartitionColumnsMismatch(format!(
            "supplied {:?}, existing {:?}",
            request.partition_columns,
            existing.metadata().partition_columns
        ))
    );

    let existing_clustering = existing_clustering_columns(existing)?;
    let requested_clustering = request
        .clustering_columns
        .as_ref()
        .map(|columns| ClusteringMetadataDomain::new(columns));
    require!(
        requested_clustering.as_ref().map(ClusteringMetadataDomain::clustering_columns)
            == existing_clustering
                .as_ref()
                .map(ClusteringMetadataDomain::clustering_columns),
        Error::ClusteringColumnsMismatch(format!(
            "supplied {:?}, existing {:?}",
            request.clustering_columns, existing_clustering
        ))
    );

    let clustering_in_protocol = existing
        .protocol()
        .supports_feature(TableFeature::ClusteredTable);
    let existing_config = &existing.metadata().configuration;
    let has_coordinated_commits = |config: &HashMap<String, String>| {
        [
            COORDINATED_COMMITS_COORDINATOR,
            COORDINATED_COMMITS_COORDINATOR_CONF,
            COORDINATED_COMMITS_TABLE_CONF,
        ]
        .iter()
        .any(|key| config.contains_key(*key))
    };
    // an existing coordinated-commits setup (and its ICT dependencies) is invisible to a new
    // definition that does not spell it out
    let drop_coordinated_commits =
        has_coordinated_commits(existing_config) && !has_coordinated_commits(&request.properties);

    let existing_filtered = filter_comparable_properties(
        existing_config,
        clustering_in_protocol,
        existing_clustering.as_ref(),
        drop_coordinated_commits,
    )?;
    let requested_filtered = filter_comparable_properties(
        &request.properties,
        clustering_in_protocol,
        requested_clustering.as_ref(),
        false,
    )?;
    require!(
        existing_filtered == requested_filtered,
        Error::TablePropertiesMismatch(format!(
            "supplied {requested_filtered:?}, existing {existing_filtered:?}"
        ))
    );
    Ok(())
}

/// The clustering columns of the existing table, read from its clustering domain. An empty
/// column list means the table is not clustered.
fn existing_clustering_columns(
    snapshot: &SnapshotRef,
) -> DeltaResult<Option<ClusteringMetadataDomain>> {
    let Some(domain) = snapshot.get_domain_metadata(CLUSTERING_DOMAIN_NAME) else {
        return Ok(None);
    };
    let parsed = ClusteringMetadataDomain::from_json_configuration(domain.configuration())?;
    Ok((!parsed.clustering_columns().is_empty()).then_some(parsed))
}

/// Reduce a configuration map to the keys that participate in the "properties must match"
/// comparison: column-mapping internals, protocol pins, and feature markers are invisible;
/// clustering internals are replaced by the canonical clustering-columns property.
fn filter_comparable_properties(
    configuration: &HashMap<String, String>,
    clustering_in_protocol: bool,
    clustering: Option<&ClusteringMetadataDomain>,
    drop_coordinated_commits: bool,
) -> DeltaResult<HashMap<String, String>> {
    let mut filtered: HashMap<String, String> = configuration
        .iter()
        .filter(|(key, _)| {
            !(key.as_str() == COLUMN_MAPPING_MAX_COLUMN_ID
                || key.as_str() == MIN_READER_VERSION
                || key.as_str() == MIN_WRITER_VERSION
                || key.starts_with(FEATURE_PROPERTY_PREFIX)
                || (clustering_in_protocol
                    && (key.as_str() == CLUSTERING_COLUMNS_INTERNAL
                        || key.as_str() == CLUSTERING_COLUMNS)))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if clustering_in_protocol {
        if let Some(clustering) = clustering {
            filtered.insert(
                CLUSTERING_COLUMNS.to_string(),
                serde_json::to_string(clustering.clustering_columns())?,
            );
        }
    }
    if drop_coordinated_commits {
        for key in [
            COORDINATED_COMMITS_COORDINATOR,
            COORDINATED_COMMITS_COORDINATOR_CONF,
            COORDINATED_COMMITS_TABLE_CONF,
            ENABLE_IN_COMMIT_TIMESTAMPS,
            IN_COMMIT_TIMESTAMP_ENABLEMENT_VERSION,
            IN_COMMIT_TIMESTAMP_ENABLEMENT_TIMESTAMP,
        ] {
            filtered.remove(key);
        }
    }
    Ok(filtered)
}

/// Structural schema equality, ignoring field metadata (column-mapping annotations on the
/// existing side must not make an otherwise identical schema "different").
fn schemas_equivalent(a: &StructType, b: &StructType) -> bool {
    fn types_equivalent(a: &DataType, b: &DataType) -> bool {
        match (a, b) {
            (DataType::Primitive(x), DataType::Primitive(y)) => x == y,
            (DataType::Array(x), DataType::Array(y)) => {
                x.contains_null == y.contains_null
                    && types_equivalent(&x.element_type, &y.element_type)
            }
            (DataType::Map(x), DataType::Map(y)) => {
                x.value_contains_null == y.value_contains_null
                    && types_equivalent(&x.key_type, &y.key_type)
                    && types_equivalent(&x.value_type, &y.value_type)
            }
            (DataType::Struct(x), DataType::Struct(y)) => structs_equivalent(x, y),
            _ => false,
        }
    }
    fn structs_equivalent(a: &StructType, b: &StructType) -> bool {
        a.num_fields() == b.num_fields()
            && a.fields().zip(b.fields()).all(|(x, y)| {
                x.name() == y.name()
                    && x.nullable == y.nullable
                    && types_equivalent(&x.data_type, &y.data_type)
            })
    }
    structs_equivalent(a, b)
}

/// Derive the protocol for the new table definition from the properties it activates.
fn derive_protocol(properties: &TableProperties, has_clustering: bool) -> DeltaResult<Protocol> {
    let mut features = vec![TableFeature::DomainMetadata];
    if properties.append_only == Some(true) {
        features.push(TableFeature::AppendOnly);
    }
    if properties
        .column_mapping_mode
        .is_some_and(|mode| mode != ColumnMappingMode::None)
    {
        features.push(TableFeature::ColumnMapping);
    }
    if properties.enable_iceberg_compat_v2 == Some(true) {
        features.push(TableFeature::IcebergCompatV2);
        features.push(TableFeature::ColumnMapping);
    }
    if properties.enable_iceberg_compat_v3 == Some(true) {
        features.push(TableFeature::IcebergCompatV3);
        features.push(TableFeature::ColumnMapping);
        features.push(TableFeature::RowTracking);
    }
    if properties.enable_row_tracking == Some(true) {
        features.push(TableFeature::RowTracking);
    }
    if properties.is_in_commit_timestamps_enabled() {
        features.push(TableFeature::InCommitTimestamp);
    }
    if properties.enable_type_widening == Some(true) {
        features.push(TableFeature::TypeWidening);
    }
    if properties.enable_deletion_vectors == Some(true) {
        features.push(TableFeature::DeletionVectors);
    }
    if has_clustering {
        features.push(TableFeature::ClusteredTable);
    }
    Protocol::try_new_with_features(features)
}

/// Choosing the logical operation label is mechanical: a partial overwrite or an options-API
/// CTAS over an existing table is a plain write; everything else is the table-defining label.
fn choose_operation(request: &CreateTableRequest, table_exists: bool) -> Operation {
    if matches!(request.operation, TableCreationMode::CreateOrReplace)
        && request.replace_where.is_some()
        && table_exists
    {
        return Operation::Write {
            replace_where: request.replace_where.clone(),
        };
    }
    if request.via_options_api && request.has_query && table_exists {
        return Operation::Write {
            replace_where: request.replace_where.clone(),
        };
    }
    match request.operation {
        TableCreationMode::Create => Operation::CreateTable {
            as_select: request.has_query,
        },
        TableCreationMode::Replace => Operation::ReplaceTable {
            or_create: false,
            as_select: request.has_query,
        },
        TableCreationMode::CreateOrReplace => Operation::ReplaceTable {
            or_create: true,
            as_select: request.has_query,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructField;

    fn test_schema() -> StructType {
        StructType::new([
            StructField::not_null("a", DataType::INTEGER),
            StructField::nullable("b", DataType::STRING),
        ])
    }

    #[test]
    fn test_choose_operation_labels() {
        let location = Url::parse("file:///tmp/t/").unwrap();
        let create = CreateTableRequest::new(
            "t",
            location.clone(),
            TableCreationMode::Create,
            SaveMode::ErrorIfExists,
        );
        assert_eq!(
            choose_operation(&create, false).description(),
            "CREATE TABLE"
        );

        let mut ctas = create.clone();
        ctas.has_query = true;
        assert_eq!(
            choose_operation(&ctas, false).description(),
            "CREATE TABLE AS SELECT"
        );

        let mut options_ctas = ctas.clone();
        options_ctas.via_options_api = true;
        assert_eq!(choose_operation(&options_ctas, true).description(), "WRITE");

        let replace = CreateTableRequest::new(
            "t",
            location.clone(),
            TableCreationMode::Replace,
            SaveMode::Overwrite,
        );
        assert_eq!(
            choose_operation(&replace, true).description(),
            "REPLACE TABLE"
        );

        let mut create_or_replace = CreateTableRequest::new(
            "t",
            location.clone(),
            TableCreationMode::CreateOrReplace,
            SaveMode::Overwrite,
        );
        assert_eq!(
            choose_operation(&create_or_replace, true).description(),
            "CREATE OR REPLACE TABLE"
        );
        create_or_replace.replace_where = Some("a > 1".to_string());
        assert_eq!(
            choose_operation(&create_or_replace, true).description(),
            "WRITE"
        );
    }

    #[test]
    fn test_schemas_equivalent_ignores_metadata() {
        let plain = test_schema();
        let annotated = StructType::new([
            StructField::not_null("a", DataType::INTEGER).with_metadata([(
                "delta.columnMapping.id",
                serde_json::json!(1),
            )]),
            StructField::nullable("b", DataType::STRING),
        ]);
        assert!(schemas_equivalent(&plain, &annotated));

        let different = StructType::new([
            StructField::not_null("a", DataType::LONG),
            StructField::nullable("b", DataType::STRING),
        ]);
        assert!(!schemas_equivalent(&plain, &different));
    }

    #[test]
    fn test_derive_protocol_features() {
        let properties = TableProperties::from([
            ("delta.enableRowTracking", "true"),
            ("delta.enableInCommitTimestamps", "true"),
        ]);
        let protocol = derive_protocol(&properties, false).unwrap();
        assert!(protocol.supports_feature(TableFeature::DomainMetadata));
        assert!(protocol.supports_feature(TableFeature::RowTracking));
        assert!(protocol.supports_feature(TableFeature::InCommitTimestamp));
        assert!(!protocol.supports_feature(TableFeature::ClusteredTable));

        let clustered = derive_protocol(&TableProperties::default(), true).unwrap();
        assert!(clustered.supports_feature(TableFeature::ClusteredTable));
    }

    #[test]
    fn test_filter_comparable_properties() {
        let configuration = HashMap::from([
            ("delta.appendOnly".to_string(), "true".to_string()),
            ("delta.columnMapping.maxColumnId".to_string(), "7".to_string()),
            ("delta.minReaderVersion".to_string(), "3".to_string()),
            ("delta.feature.rowTracking".to_string(), "supported".to_string()),
            ("custom.key".to_string(), "v".to_string()),
        ]);
        let filtered =
            filter_comparable_properties(&configuration, false, None, false).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key("delta.appendOnly"));
        assert!(filtered.contains_key("custom.key"));
    }

    #[test]
    fn test_clustering_replaced_by_canonical_property() {
        let configuration = HashMap::from([
            ("clusteringColumns".to_string(), "legacy".to_string()),
        ]);
        let clustering = ClusteringMetadataDomain::new(&["c1".to_string()]);
        let filtered =
            filter_comparable_properties(&configuration, true, Some(&clustering), false).unwrap();
        assert!(!filtered.contains_key("clusteringColumns"));
        assert_eq!(
            filtered.get("delta.clusteringColumns").unwrap(),
            r#"[["c1"]]"#
        );
    }
}
