//! The Iceberg-compatibility rule engine: a pluggable list of property enforcers (auto-set
//! required keys, validate) and compat checks (type whitelist, partition-type whitelist,
//! disallowed features, type-widening legality) run over the metadata and protocol before a
//! create/replace commit. The engine returns `Some(metadata)` iff any enforcer mutated the
//! configuration, and it is idempotent: a second run over its own output is a no-op.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::actions::{Metadata, Protocol};
use crate::schema::{
    DataType, PrimitiveType, StructField, StructType, COLUMN_MAPPING_ID_KEY,
    COLUMN_MAPPING_PHYSICAL_NAME_KEY,
};
use crate::table_features::TableFeature;
use crate::table_properties::{
    COLUMN_MAPPING_MAX_COLUMN_ID, COLUMN_MAPPING_MODE, ENABLE_ICEBERG_COMPAT_V1,
    ENABLE_ICEBERG_COMPAT_V2, ENABLE_ICEBERG_COMPAT_V3, ENABLE_ROW_TRACKING,
};
use crate::utils::require;
use crate::{DeltaResult, Error};

/// The Iceberg compat versions this kernel knows how to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcebergCompatVersion {
    V2,
    V3,
}

impl IcebergCompatVersion {
    /// The name used in error messages and in the protocol feature list
    pub fn feature_name(&self) -> &'static str {
        match self {
            IcebergCompatVersion::V2 => "icebergCompatV2",
            IcebergCompatVersion::V3 => "icebergCompatV3",
        }
    }

    /// The table property acting as this version's master enable flag
    pub fn enable_flag_key(&self) -> &'static str {
        match self {
            IcebergCompatVersion::V2 => ENABLE_ICEBERG_COMPAT_V2,
            IcebergCompatVersion::V3 => ENABLE_ICEBERG_COMPAT_V3,
        }
    }

    /// Enable flags of the other compat versions, which must all be off
    fn incompatible_flag_keys(&self) -> &'static [&'static str] {
        match self {
            IcebergCompatVersion::V2 => &[ENABLE_ICEBERG_COMPAT_V1, ENABLE_ICEBERG_COMPAT_V3],
            IcebergCompatVersion::V3 => &[ENABLE_ICEBERG_COMPAT_V1, ENABLE_ICEBERG_COMPAT_V2],
        }
    }

    /// Table features the protocol must advertise when this compat version is enabled
    fn required_features(&self) -> &'static [TableFeature] {
        match self {
            IcebergCompatVersion::V2 => &[TableFeature::ColumnMapping, TableFeature::IcebergCompatV2],
            IcebergCompatVersion::V3 => &[
                TableFeature::ColumnMapping,
                TableFeature::RowTracking,
                TableFeature::IcebergCompatV3,
            ],
        }
    }

    fn enforcers(&self) -> &'static [RequiredTablePropertyEnforcer] {
        match self {
            IcebergCompatVersion::V2 => &V2_ENFORCERS,
            IcebergCompatVersion::V3 => &V3_ENFORCERS,
        }
    }

    fn checks(&self) -> &'static [CompatCheck] {
        // The same rules apply to both versions today; V3 will diverge once `variant` lands in
        // the type whitelist.
        &COMPAT_CHECKS
    }

    /// Whether this compat version is enabled in the given configuration map
    pub fn is_enabled_in(&self, configuration: &HashMap<String, String>) -> bool {
        is_flag_set(configuration, self.enable_flag_key())
    }
}

fn is_flag_set(configuration: &HashMap<String, String>, key: &str) -> bool {
    configuration.get(key).map(String::as_str) == Some("true")
}

/// The input the enforcers and checks operate on. Enforcers may replace the metadata;
/// everything else is read-only.
struct CompatContext<'a> {
    version: IcebergCompatVersion,
    is_creating_table: bool,
    metadata: Metadata,
    protocol: &'a Protocol,
}

type Validator = fn(Option<&str>) -> bool;
type PostProcessor = fn(&CompatContext<'_>) -> DeltaResult<Option<Metadata>>;
type CompatCheck = fn(&CompatContext<'_>) -> DeltaResult<()>;

/// A required table property: if the current value passes the validator nothing happens; if the
/// key is absent on a table being created it is auto-set; otherwise the value is incompatible.
struct RequiredTablePropertyEnforcer {
    key: &'static str,
    validator: Validator,
    auto_set_value: &'static str,
    post_processor: Option<PostProcessor>,
}

impl RequiredTablePropertyEnforcer {
    fn validate_and_update(&self, context: &CompatContext<'_>) -> DeltaResult<Option<Metadata>> {
        let value = context.metadata.configuration.get(self.key);
        if (self.validator)(value.map(String::as_str)) {
            return Ok(None);
        }
        if value.is_none() && context.is_creating_table {
            debug!(key = self.key, value = self.auto_set_value, "auto-setting compat property");
            return Ok(Some(context.metadata.with_merged_configuration([(
                self.key,
                self.auto_set_value,
            )])));
        }
        Err(Error::IcebergCompatIncompatibleProperty {
            compat_version: context.version.feature_name().to_string(),
            key: self.key.to_string(),
            value: value.cloned().unwrap_or_default(),
        })
    }
}

const COLUMN_MAPPING_REQUIREMENT: RequiredTablePropertyEnforcer = RequiredTablePropertyEnforcer {
    key: COLUMN_MAPPING_MODE,
    validator: |value| matches!(value, Some("name") | Some("id")),
    auto_set_value: "name",
    post_processor: Some(assign_column_mapping_metadata),
};

const ROW_TRACKING_REQUIREMENT: RequiredTablePropertyEnforcer = RequiredTablePropertyEnforcer {
    key: ENABLE_ROW_TRACKING,
    validator: |value| value == Some("true"),
    auto_set_value: "true",
    post_processor: None,
};

static V2_ENFORCERS: [RequiredTablePropertyEnforcer; 1] = [COLUMN_MAPPING_REQUIREMENT];
static V3_ENFORCERS: [RequiredTablePropertyEnforcer; 2] =
    [COLUMN_MAPPING_REQUIREMENT, ROW_TRACKING_REQUIREMENT];

static COMPAT_CHECKS: [CompatCheck; 5] = [
    check_no_other_compat_versions,
    check_has_supported_types,
    check_has_allowed_partition_types,
    check_has_no_deletion_vectors,
    check_has_supported_type_widening,
];

/// Run the compat engine for `version` over the proposed metadata and protocol. No-op when the
/// version's enable flag is off. Returns the updated metadata iff any enforcer mutated it.
pub fn validate_and_update_iceberg_compat(
    version: IcebergCompatVersion,
    metadata: &Metadata,
    protocol: &Protocol,
    is_creating_table: bool,
) -> DeltaResult<Option<Metadata>> {
    if !version.is_enabled_in(&metadata.configuration) {
        return Ok(None);
    }

    let mut context = CompatContext {
        version,
        is_creating_table,
        metadata: metadata.clone(),
        protocol,
    };
    let mut metadata_updated = false;

    // table property checks and metadata updates
    for enforcer in version.enforcers() {
        if let Some(updated) = enforcer.validate_and_update(&context)? {
            context.metadata = updated;
            metadata_updated = true;
        }
    }

    // post-process metadata after the table property checks are done and updated
    for enforcer in version.enforcers() {
        if let Some(post_processor) = enforcer.post_processor {
            if let Some(updated) = post_processor(&context)? {
                context.metadata = updated;
                metadata_updated = true;
            }
        }
    }

    // check for required dependency table features
    for feature in version.required_features() {
        require!(
            protocol.supports_feature(*feature),
            Error::IcebergCompatRequiredFeatureMissing {
                compat_version: version.feature_name().to_string(),
                feature: feature.as_ref().to_string(),
            }
        );
    }

    for check in version.checks() {
        check(&context)?;
    }

    Ok(metadata_updated.then_some(context.metadata))
}

/// Run every compat version in order. At most one can be enabled (the exclusive-version check
/// fails otherwise), so at most one pass mutates the metadata.
pub fn validate_and_update_all_iceberg_compat(
    metadata: &Metadata,
    protocol: &Protocol,
    is_creating_table: bool,
) -> DeltaResult<Option<Metadata>> {
    let mut current = metadata.clone();
    let mut updated = false;
    for version in [IcebergCompatVersion::V2, IcebergCompatVersion::V3] {
        if let Some(new_metadata) =
            validate_and_update_iceberg_compat(version, &current, protocol, is_creating_table)?
        {
            current = new_metadata;
            updated = true;
        }
    }
    Ok(updated.then_some(current))
}

/// Block toggling a compat enable flag in either direction on an existing table.
pub fn block_config_change_on_existing_table(
    old_configuration: &HashMap<String, String>,
    new_configuration: &HashMap<String, String>,
    is_creating_table: bool,
) -> DeltaResult<()> {
    if is_creating_table {
        return Ok(());
    }
    for version in [IcebergCompatVersion::V2, IcebergCompatVersion::V3] {
        let key = version.enable_flag_key();
        let was_enabled = is_flag_set(old_configuration, key);
        let is_enabled = is_flag_set(new_configuration, key);
        if !was_enabled && is_enabled {
            return Err(Error::IcebergCompatConfigChange {
                action: "enable",
                key: key.to_string(),
            });
        }
        if was_enabled && !is_enabled {
            return Err(Error::IcebergCompatConfigChange {
                action: "disable",
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

//////////////////////////////////
// Compat check implementations //
//////////////////////////////////

fn check_no_other_compat_versions(context: &CompatContext<'_>) -> DeltaResult<()> {
    for key in context.version.incompatible_flag_keys() {
        require!(
            !is_flag_set(&context.metadata.configuration, key),
            Error::IcebergCompatIncompatibleVersion {
                compat_version: context.version.feature_name().to_string(),
                other_key: key.to_string(),
            }
        );
    }
    Ok(())
}

/// The leaf types Iceberg can represent. Nested containers are allowed; their element types are
/// checked recursively via [`StructType::all_types`].
fn is_supported_leaf_type(primitive: &PrimitiveType) -> bool {
    match primitive {
        PrimitiveType::String
        | PrimitiveType::Long
        | PrimitiveType::Integer
        | PrimitiveType::Short
        | PrimitiveType::Byte
        | PrimitiveType::Float
        | PrimitiveType::Double
        | PrimitiveType::Boolean
        | PrimitiveType::Binary
        | PrimitiveType::Date
        | PrimitiveType::Timestamp
        | PrimitiveType::TimestampNtz
        | PrimitiveType::Decimal(_) => true,
    }
}

fn check_has_supported_types(context: &CompatContext<'_>) -> DeltaResult<()> {
    let schema = context.metadata.parse_schema()?;
    for data_type in schema.all_types() {
        if let DataType::Primitive(primitive) = data_type {
            require!(
                is_supported_leaf_type(primitive),
                Error::IcebergCompatUnsupportedType {
                    compat_version: context.version.feature_name().to_string(),
                    type_name: primitive.to_string(),
                }
            );
        }
    }
    Ok(())
}

fn check_has_allowed_partition_types(context: &CompatContext<'_>) -> DeltaResult<()> {
    let schema = context.metadata.parse_schema()?;
    for partition_column in &context.metadata.partition_columns {
        let field = schema
            .field(partition_column)
            .ok_or_else(|| Error::column_not_found(partition_column))?;
        require!(
            field.data_type().is_primitive(),
            Error::IcebergCompatUnsupportedPartitionType {
                compat_version: context.version.feature_name().to_string(),
                type_name: field.data_type().to_string(),
            }
        );
    }
    Ok(())
}

fn check_has_no_deletion_vectors(context: &CompatContext<'_>) -> DeltaResult<()> {
    require!(
        !context.protocol.supports_feature(TableFeature::DeletionVectors),
        Error::IcebergCompatIncompatibleVersion {
            compat_version: context.version.feature_name().to_string(),
            other_key: TableFeature::DeletionVectors.as_ref().to_string(),
        }
    );
    Ok(())
}

fn check_has_supported_type_widening(context: &CompatContext<'_>) -> DeltaResult<()> {
    let protocol = context.protocol;
    if !protocol.supports_feature(TableFeature::TypeWidening)
        && !protocol.supports_feature(TableFeature::TypeWideningPreview)
    {
        return Ok(());
    }
    let schema = context.metadata.parse_schema()?;
    for field in schema.all_fields() {
        for change in field.type_changes()? {
            require!(
                is_iceberg_v2_compatible(&change.from_type, &change.to_type),
                Error::IcebergCompatUnsupportedTypeWidening {
                    compat_version: context.version.feature_name().to_string(),
                    from: change.from_type.to_string(),
                    to: change.to_type.to_string(),
                }
            );
        }
    }
    Ok(())
}

/// Whether a recorded type change is legal under Iceberg: integer widenings, float to double,
/// and decimal precision-only widenings.
pub(crate) fn is_iceberg_v2_compatible(from: &PrimitiveType, to: &PrimitiveType) -> bool {
    use PrimitiveType::*;
    match (from, to) {
        (Byte, Short | Integer | Long) => true,
        (Short, Integer | Long) => true,
        (Integer, Long) => true,
        (Float, Double) => true,
        (Decimal(from), Decimal(to)) => {
            to.precision() >= from.precision() && to.scale() == from.scale()
        }
        _ => false,
    }
}

///////////////////////////////////
// Column mapping post-processing //
///////////////////////////////////

/// Assign column-mapping field ids and physical names to any schema field missing them, and
/// advance `delta.columnMapping.maxColumnId` accordingly. Returns `None` when every field is
/// already annotated.
fn assign_column_mapping_metadata(context: &CompatContext<'_>) -> DeltaResult<Option<Metadata>> {
    let metadata = &context.metadata;
    let mode = metadata.configuration.get(COLUMN_MAPPING_MODE);
    if !matches!(mode.map(String::as_str), Some("name") | Some("id")) {
        return Ok(None);
    }

    let schema = metadata.parse_schema()?;
    let mut next_id: i64 = metadata
        .configuration
        .get(COLUMN_MAPPING_MAX_COLUMN_ID)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    let mut changed = false;
    let new_schema = annotate_struct(&schema, &mut next_id, &mut changed);
    if !changed {
        return Ok(None);
    }
    debug!(max_column_id = next_id, "assigned column mapping metadata");
    let updated = metadata
        .with_schema(&new_schema)?
        .with_merged_configuration([(COLUMN_MAPPING_MAX_COLUMN_ID, next_id.to_string())]);
    Ok(Some(updated))
}

fn annotate_struct(struct_type: &StructType, next_id: &mut i64, changed: &mut bool) -> StructType {
    StructType::new(struct_type.fields().map(|field| {
        let mut field: StructField = field.clone();
        field.data_type = annotate_type(&field.data_type, next_id, changed);
        if field.column_mapping_id().is_none() {
            *next_id += 1;
            field
                .metadata
                .insert(COLUMN_MAPPING_ID_KEY.to_string(), serde_json::json!(*next_id));
            field.metadata.insert(
                COLUMN_MAPPING_PHYSICAL_NAME_KEY.to_string(),
                serde_json::json!(format!("col-{}", Uuid::new_v4())),
            );
            *changed = true;
        }
        field
    }))
}

fn annotate_type(data_type: &DataType, next_id: &mut i64, changed: &mut bool) -> DataType {
    match data_type {
        DataType::Struct(s) => {
            DataType::Struct(Box::new(annotate_struct(s, next_id, changed)))
        }
        DataType::Array(a) => {
            let mut array = a.as_ref().clone();
            array.element_type = annotate_type(&array.element_type, next_id, changed);
            DataType::Array(Box::new(array))
        }
        DataType::Map(m) => {
            let mut map = m.as_ref().clone();
            map.key_type = annotate_type(&map.key_type, next_id, changed);
            map.value_type = annotate_type(&map.value_type, next_id, changed);
            DataType::Map(Box::new(map))
        }
        DataType::Primitive(_) => data_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MapType;

    fn base_metadata(configuration: HashMap<String, String>) -> Metadata {
        let schema = StructType::new([
            StructField::not_null("a", DataType::INTEGER),
            StructField::nullable("b", DataType::STRING),
        ]);
        Metadata::try_new(&schema, vec!["a".to_string()], configuration, 0, None).unwrap()
    }

    fn v2_protocol() -> Protocol {
        Protocol::try_new_with_features([
            TableFeature::ColumnMapping,
            TableFeature::IcebergCompatV2,
            TableFeature::DomainMetadata,
        ])
        .unwrap()
    }

    fn v2_config() -> HashMap<String, String> {
        HashMap::from([(ENABLE_ICEBERG_COMPAT_V2.to_string(), "true".to_string())])
    }

    #[test]
    fn test_disabled_flag_is_noop() {
        let metadata = base_metadata(HashMap::new());
        let result = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &Protocol::default(),
            true,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_auto_sets_column_mapping_on_create() {
        let metadata = base_metadata(v2_config());
        let updated = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &v2_protocol(),
            true,
        )
        .unwrap()
        .expect("metadata should be updated");
        assert_eq!(
            updated.configuration.get(COLUMN_MAPPING_MODE).unwrap(),
            "name"
        );
        // every field got an id and a physical name
        let schema = updated.parse_schema().unwrap();
        for field in schema.all_fields() {
            assert!(field.column_mapping_id().is_some());
            assert!(field.physical_name().unwrap().starts_with("col-"));
        }
        assert_eq!(
            updated.configuration.get(COLUMN_MAPPING_MAX_COLUMN_ID).unwrap(),
            "2"
        );
    }

    #[test]
    fn test_idempotent_after_first_run() {
        let metadata = base_metadata(v2_config());
        let first = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &v2_protocol(),
            true,
        )
        .unwrap()
        .unwrap();
        let second = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &first,
            &v2_protocol(),
            true,
        )
        .unwrap();
        assert!(second.is_none(), "second run must not mutate metadata");
    }

    #[test]
    fn test_rejects_explicit_bad_column_mapping() {
        let mut config = v2_config();
        config.insert(COLUMN_MAPPING_MODE.to_string(), "none".to_string());
        let metadata = base_metadata(config);
        let err = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &v2_protocol(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IcebergCompatIncompatibleProperty { .. }));
    }

    #[test]
    fn test_rejects_missing_required_feature() {
        let metadata = base_metadata(v2_config());
        let protocol =
            Protocol::try_new_with_features([TableFeature::DomainMetadata]).unwrap();
        let err = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &protocol,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IcebergCompatRequiredFeatureMissing { .. }));
    }

    #[test]
    fn test_exclusive_versions() {
        let mut config = v2_config();
        config.insert(ENABLE_ICEBERG_COMPAT_V3.to_string(), "true".to_string());
        let metadata = base_metadata(config);
        let err = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &v2_protocol(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IcebergCompatIncompatibleVersion { .. }));
    }

    #[test]
    fn test_rejects_map_partition_column() {
        let schema = StructType::new([
            StructField::not_null("a", DataType::INTEGER),
            StructField::nullable(
                "m",
                DataType::Map(Box::new(MapType::new(
                    DataType::STRING,
                    DataType::STRING,
                    true,
                ))),
            ),
        ]);
        let metadata = Metadata::try_new(
            &schema,
            vec!["m".to_string()],
            v2_config(),
            0,
            None,
        )
        .unwrap();
        let err = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &v2_protocol(),
            true,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::IcebergCompatUnsupportedPartitionType { .. }
        ));
    }

    #[test]
    fn test_rejects_deletion_vectors() {
        let metadata = base_metadata(v2_config());
        let protocol = v2_protocol().with_feature(TableFeature::DeletionVectors);
        let err = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &protocol,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IcebergCompatIncompatibleVersion { .. }));
    }

    #[test]
    fn test_type_widening_legality() {
        use PrimitiveType::*;
        assert!(is_iceberg_v2_compatible(&Byte, &Integer));
        assert!(is_iceberg_v2_compatible(&Integer, &Long));
        assert!(is_iceberg_v2_compatible(&Float, &Double));
        assert!(is_iceberg_v2_compatible(
            &Decimal(crate::schema::DecimalType::try_new(10, 2).unwrap()),
            &Decimal(crate::schema::DecimalType::try_new(12, 2).unwrap()),
        ));
        assert!(!is_iceberg_v2_compatible(
            &Decimal(crate::schema::DecimalType::try_new(10, 2).unwrap()),
            &Decimal(crate::schema::DecimalType::try_new(12, 4).unwrap()),
        ));
        assert!(!is_iceberg_v2_compatible(&Long, &Integer));
        assert!(!is_iceberg_v2_compatible(&String, &Long));
    }

    #[test]
    fn test_widening_check_reads_field_metadata() {
        let schema = StructType::new([StructField::not_null("v", DataType::LONG).with_metadata(
            [(
                crate::schema::TYPE_CHANGES_KEY,
                serde_json::json!([{"fromType": "string", "toType": "long"}]),
            )],
        )]);
        let mut config = v2_config();
        config.insert(COLUMN_MAPPING_MODE.to_string(), "name".to_string());
        let metadata = Metadata::try_new(&schema, vec![], config, 0, None).unwrap();
        let protocol = v2_protocol().with_feature(TableFeature::TypeWidening);
        let err = validate_and_update_iceberg_compat(
            IcebergCompatVersion::V2,
            &metadata,
            &protocol,
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::IcebergCompatUnsupportedTypeWidening { .. }
        ));
    }

    #[test]
    fn test_block_config_change_on_existing_table() {
        let enabled = v2_config();
        let disabled = HashMap::new();
        // enabling on existing table
        assert!(matches!(
            block_config_change_on_existing_table(&disabled, &enabled, false),
            Err(Error::IcebergCompatConfigChange { action: "enable", .. })
        ));
        // disabling on existing table
        assert!(matches!(
            block_config_change_on_existing_table(&enabled, &disabled, false),
            Err(Error::IcebergCompatConfigChange { action: "disable", .. })
        ));
        // no change, or creating a table: fine
        block_config_change_on_existing_table(&enabled, &enabled, false).unwrap();
        block_config_change_on_existing_table(&disabled, &enabled, true).unwrap();
    }
}
