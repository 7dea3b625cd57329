//! Definitions and utilities for the table schema: the logical data types Delta supports and the
//! struct/field tree they form. Schemas round-trip through the JSON `schemaString` stored in the
//! table [`Metadata`](crate::actions::Metadata).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{DeltaResult, Error};

/// Convenience alias for a reference-counted schema
pub type SchemaRef = Arc<StructType>;
/// A table schema is a [`StructType`] at the root
pub type Schema = StructType;

/// Field metadata key recording the column-mapping field id
pub(crate) const COLUMN_MAPPING_ID_KEY: &str = "delta.columnMapping.id";
/// Field metadata key recording the column-mapping physical name
pub(crate) const COLUMN_MAPPING_PHYSICAL_NAME_KEY: &str = "delta.columnMapping.physicalName";
/// Field metadata key recording the history of type changes applied to a field
pub(crate) const TYPE_CHANGES_KEY: &str = "delta.typeChanges";

/// The primitive (leaf) data types supported by Delta tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    String,
    Long,
    Integer,
    Short,
    Byte,
    Float,
    Double,
    Boolean,
    Binary,
    Date,
    Timestamp,
    TimestampNtz,
    Decimal(DecimalType),
}

/// Precision and scale of a decimal type. Precision is limited to 38 digits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DecimalType {
    precision: u8,
    scale: u8,
}

impl DecimalType {
    pub fn try_new(precision: u8, scale: u8) -> DeltaResult<Self> {
        if precision == 0 || precision > 38 || scale > precision {
            return Err(Error::generic(format!(
                "invalid decimal precision/scale: ({precision}, {scale})"
            )));
        }
        Ok(Self { precision, scale })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::String => write!(f, "string"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Integer => write!(f, "integer"),
            PrimitiveType::Short => write!(f, "short"),
            PrimitiveType::Byte => write!(f, "byte"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Binary => write!(f, "binary"),
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::TimestampNtz => write!(f, "timestamp_ntz"),
            PrimitiveType::Decimal(d) => write!(f, "decimal({},{})", d.precision, d.scale),
        }
    }
}

impl FromStr for PrimitiveType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s {
            "string" => PrimitiveType::String,
            "long" => PrimitiveType::Long,
            "integer" => PrimitiveType::Integer,
            "short" => PrimitiveType::Short,
            "byte" => PrimitiveType::Byte,
            "float" => PrimitiveType::Float,
            "double" => PrimitiveType::Double,
            "boolean" => PrimitiveType::Boolean,
            "binary" => PrimitiveType::Binary,
            "date" => PrimitiveType::Date,
            "timestamp" => PrimitiveType::Timestamp,
            "timestamp_ntz" => PrimitiveType::TimestampNtz,
            other => {
                let body = other
                    .strip_prefix("decimal(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| Error::generic(format!("invalid data type: {other}")))?;
                let (precision, scale) = body
                    .split_once(',')
                    .ok_or_else(|| Error::generic(format!("invalid decimal type: {other}")))?;
                let precision = precision.trim().parse().map_err(Error::generic)?;
                let scale = scale.trim().parse().map_err(Error::generic)?;
                PrimitiveType::Decimal(DecimalType::try_new(precision, scale)?)
            }
        };
        Ok(parsed)
    }
}

impl Serialize for PrimitiveType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PrimitiveType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An array of elements of a single type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayType {
    #[serde(rename = "type")]
    type_name: ArrayTag,
    /// The type of element stored in this array
    pub element_type: DataType,
    /// Denoting whether this array can contain one or more null values
    pub contains_null: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ArrayTag {
    Array,
}

impl ArrayType {
    pub fn new(element_type: DataType, contains_null: bool) -> Self {
        Self {
            type_name: ArrayTag::Array,
            element_type,
            contains_null,
        }
    }
}

/// A map of keys to values, all keys of one type and all values of another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapType {
    #[serde(rename = "type")]
    type_name: MapTag,
    /// The type of element used for the key of this map
    pub key_type: DataType,
    /// The type of element used for the value of this map
    pub value_type: DataType,
    /// Denoting whether this map can contain one or more null values
    pub value_contains_null: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum MapTag {
    Map,
}

impl MapType {
    pub fn new(key_type: DataType, value_type: DataType, value_contains_null: bool) -> Self {
        Self {
            type_name: MapTag::Map,
            key_type,
            value_type,
            value_contains_null,
        }
    }
}

/// The data type of a column or field: a primitive leaf or a nested container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Primitive(PrimitiveType),
    Array(Box<ArrayType>),
    Map(Box<MapType>),
    Struct(Box<StructType>),
}

impl DataType {
    pub const STRING: DataType = DataType::Primitive(PrimitiveType::String);
    pub const LONG: DataType = DataType::Primitive(PrimitiveType::Long);
    pub const INTEGER: DataType = DataType::Primitive(PrimitiveType::Integer);
    pub const SHORT: DataType = DataType::Primitive(PrimitiveType::Short);
    pub const BYTE: DataType = DataType::Primitive(PrimitiveType::Byte);
    pub const FLOAT: DataType = DataType::Primitive(PrimitiveType::Float);
    pub const DOUBLE: DataType = DataType::Primitive(PrimitiveType::Double);
    pub const BOOLEAN: DataType = DataType::Primitive(PrimitiveType::Boolean);
    pub const BINARY: DataType = DataType::Primitive(PrimitiveType::Binary);
    pub const DATE: DataType = DataType::Primitive(PrimitiveType::Date);
    pub const TIMESTAMP: DataType = DataType::Primitive(PrimitiveType::Timestamp);
    pub const TIMESTAMP_NTZ: DataType = DataType::Primitive(PrimitiveType::TimestampNtz);

    pub fn decimal(precision: u8, scale: u8) -> DeltaResult<Self> {
        Ok(DataType::Primitive(PrimitiveType::Decimal(
            DecimalType::try_new(precision, scale)?,
        )))
    }

    pub fn struct_type(fields: impl IntoIterator<Item = StructField>) -> Self {
        DataType::Struct(Box::new(StructType::new(fields)))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, DataType::Primitive(_))
    }

    pub fn as_primitive(&self) -> Option<&PrimitiveType> {
        match self {
            DataType::Primitive(p) => Some(p),
            _ => None,
        }
    }
}

impl From<PrimitiveType> for DataType {
    fn from(value: PrimitiveType) -> Self {
        DataType::Primitive(value)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Primitive(p) => write!(f, "{p}"),
            DataType::Array(a) => write!(f, "array<{}>", a.element_type),
            DataType::Map(m) => write!(f, "map<{}, {}>", m.key_type, m.value_type),
            DataType::Struct(s) => {
                write!(f, "struct<")?;
                for (i, field) in s.fields().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, ">")
            }
        }
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DataType::Primitive(p) => p.serialize(serializer),
            DataType::Array(a) => a.serialize(serializer),
            DataType::Map(m) => m.serialize(serializer),
            DataType::Struct(s) => s.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Primitive(PrimitiveType),
            Array(ArrayType),
            Map(MapType),
            Struct(StructType),
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(match raw {
            Raw::Primitive(p) => DataType::Primitive(p),
            Raw::Array(a) => DataType::Array(Box::new(a)),
            Raw::Map(m) => DataType::Map(Box::new(m)),
            Raw::Struct(s) => DataType::Struct(Box::new(s)),
        })
    }
}

/// A record of one type change applied to a field, kept in the field metadata under
/// `delta.typeChanges` when the type-widening feature rewrites a column type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeChange {
    pub from_type: PrimitiveType,
    pub to_type: PrimitiveType,
}

/// A field inside a [`StructType`]: name, type, nullability, and free-form metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    /// Name of this (possibly nested) column
    pub name: String,
    /// The data type of this field
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Denotes whether this Field can be null
    pub nullable: bool,
    /// A JSON map containing information about this column
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StructField {
    /// A new field that accepts null values
    pub fn nullable(name: impl Into<String>, data_type: impl Into<DataType>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            metadata: HashMap::new(),
        }
    }

    /// A new field that does not accept null values
    pub fn not_null(name: impl Into<String>, data_type: impl Into<DataType>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: false,
            metadata: HashMap::new(),
        }
    }

    /// Replace the metadata map on this field
    pub fn with_metadata<K: Into<String>>(
        mut self,
        metadata: impl IntoIterator<Item = (K, serde_json::Value)>,
    ) -> Self {
        self.metadata = metadata
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// The column-mapping field id, if one has been assigned
    pub fn column_mapping_id(&self) -> Option<i64> {
        self.metadata.get(COLUMN_MAPPING_ID_KEY)?.as_i64()
    }

    /// The column-mapping physical name, if one has been assigned
    pub fn physical_name(&self) -> Option<&str> {
        self.metadata
            .get(COLUMN_MAPPING_PHYSICAL_NAME_KEY)?
            .as_str()
    }

    /// The type changes recorded on this field, empty if none
    pub fn type_changes(&self) -> DeltaResult<Vec<TypeChange>> {
        match self.metadata.get(TYPE_CHANGES_KEY) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(vec![]),
        }
    }
}

/// A struct: an ordered collection of named, typed fields. Also the top-level type of every
/// table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    fields: IndexMap<String, StructField>,
}

impl StructType {
    pub fn new(fields: impl IntoIterator<Item = StructField>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|field| (field.name.clone(), field))
                .collect(),
        }
    }

    /// Parse a schema from its JSON `schemaString` representation
    pub fn try_from_json(schema_string: &str) -> DeltaResult<Self> {
        Ok(serde_json::from_str(schema_string)?)
    }

    /// Serialize this schema to its JSON `schemaString` representation
    pub fn to_json(&self) -> DeltaResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// An iterator over the fields of this struct, in definition order
    pub fn fields(&self) -> impl Iterator<Item = &StructField> {
        self.fields.values()
    }

    /// Look up a top-level field by name
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.get(name)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in this struct and, recursively, in every nested struct (including structs
    /// nested inside arrays and maps). Used by validation passes that must see every field.
    pub fn all_fields(&self) -> Vec<&StructField> {
        fn collect_from_type<'a>(data_type: &'a DataType, out: &mut Vec<&'a StructField>) {
            match data_type {
                DataType::Struct(s) => {
                    for field in s.fields() {
                        out.push(field);
                        collect_from_type(&field.data_type, out);
                    }
                }
                DataType::Array(a) => collect_from_type(&a.element_type, out),
                DataType::Map(m) => {
                    collect_from_type(&m.key_type, out);
                    collect_from_type(&m.value_type, out);
                }
                DataType::Primitive(_) => {}
            }
        }
        let mut out = Vec::new();
        for field in self.fields() {
            out.push(field);
            collect_from_type(&field.data_type, &mut out);
        }
        out
    }

    /// All data types reachable from this struct, including nested element/key/value types.
    pub fn all_types(&self) -> Vec<&DataType> {
        fn collect<'a>(data_type: &'a DataType, out: &mut Vec<&'a DataType>) {
            out.push(data_type);
            match data_type {
                DataType::Struct(s) => {
                    for field in s.fields() {
                        collect(&field.data_type, out);
                    }
                }
                DataType::Array(a) => collect(&a.element_type, out),
                DataType::Map(m) => {
                    collect(&m.key_type, out);
                    collect(&m.value_type, out);
                }
                DataType::Primitive(_) => {}
            }
        }
        let mut out = Vec::new();
        for field in self.fields() {
            collect(&field.data_type, &mut out);
        }
        out
    }
}

impl Serialize for StructType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("StructType", 2)?;
        state.serialize_field("type", "struct")?;
        state.serialize_field("fields", &self.fields.values().collect::<Vec<_>>())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for StructType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            #[serde(rename = "type")]
            type_name: StructTag,
            fields: Vec<StructField>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        enum StructTag {
            Struct,
        }
        let raw = Raw::deserialize(deserializer)?;
        let StructTag::Struct = raw.type_name;
        Ok(StructType::new(raw.fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_schema() -> StructType {
        StructType::new([
            StructField::not_null("a", DataType::INTEGER),
            StructField::nullable("b", DataType::STRING),
            StructField::nullable(
                "point",
                DataType::struct_type([
                    StructField::nullable("x", DataType::DOUBLE),
                    StructField::nullable("y", DataType::DOUBLE),
                ]),
            ),
            StructField::nullable(
                "tags",
                DataType::Map(Box::new(MapType::new(
                    DataType::STRING,
                    DataType::STRING,
                    true,
                ))),
            ),
        ])
    }

    #[test]
    fn test_schema_json_round_trip() {
        let schema = nested_schema();
        let json = schema.to_json().unwrap();
        let parsed = StructType::try_from_json(&json).unwrap();
        assert_eq!(parsed, schema);
        assert!(json.starts_with(r#"{"type":"struct","fields":"#));
    }

    #[test]
    fn test_parse_wire_schema() {
        let json = r#"{
            "type": "struct",
            "fields": [
                {"name": "id", "type": "long", "nullable": false, "metadata": {}},
                {"name": "amount", "type": "decimal(10,2)", "nullable": true, "metadata": {}},
                {"name": "vals", "type": {"type": "array", "elementType": "integer", "containsNull": true}, "nullable": true, "metadata": {}}
            ]
        }"#;
        let schema = StructType::try_from_json(json).unwrap();
        assert_eq!(schema.num_fields(), 3);
        assert_eq!(
            schema.field("amount").unwrap().data_type(),
            &DataType::decimal(10, 2).unwrap()
        );
        assert!(matches!(
            schema.field("vals").unwrap().data_type(),
            DataType::Array(_)
        ));
    }

    #[test]
    fn test_primitive_parse_errors() {
        assert!("varchar".parse::<PrimitiveType>().is_err());
        assert!("decimal(40,2)".parse::<PrimitiveType>().is_err());
        assert!("decimal(10)".parse::<PrimitiveType>().is_err());
        assert_eq!(
            "decimal(10,2)".parse::<PrimitiveType>().unwrap(),
            PrimitiveType::Decimal(DecimalType::try_new(10, 2).unwrap())
        );
    }

    #[test]
    fn test_all_fields_recurses() {
        let schema = nested_schema();
        let names: Vec<_> = schema.all_fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a", "b", "point", "x", "y", "tags"]);
    }

    #[test]
    fn test_type_changes_metadata() {
        let field = StructField::not_null("v", DataType::LONG).with_metadata([(
            TYPE_CHANGES_KEY,
            serde_json::json!([{"fromType": "integer", "toType": "long"}]),
        )]);
        let changes = field.type_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from_type, PrimitiveType::Integer);
        assert_eq!(changes[0].to_type, PrimitiveType::Long);
        assert!(StructField::not_null("w", DataType::LONG)
            .type_changes()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_field_schema_ordering_preserved() {
        let json = r#"{"type":"struct","fields":[
            {"name":"z","type":"integer","nullable":true,"metadata":{}},
            {"name":"a","type":"integer","nullable":true,"metadata":{}}
        ]}"#;
        let schema = StructType::try_from_json(json).unwrap();
        let names: Vec<_> = schema.fields().map(|f| f.name()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }
}
