//! Protocol-level table features. A feature being listed in the protocol means a reader/writer
//! must understand it to interact with the table; whether the feature is *active* is usually
//! governed by a table property (see [`crate::table_properties`]).

use std::str::FromStr;

use strum::{AsRefStr, Display as StrumDisplay, EnumString};

use crate::{DeltaResult, Error};

/// Reader version that supports reader table features
pub(crate) const TABLE_FEATURES_MIN_READER_VERSION: i32 = 3;
/// Writer version that supports writer table features
pub(crate) const TABLE_FEATURES_MIN_WRITER_VERSION: i32 = 7;

/// The table features this kernel knows about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, AsRefStr, StrumDisplay,
)]
#[strum(serialize_all = "camelCase")]
pub enum TableFeature {
    /// writers only write to the table when `delta.appendOnly` allows the operation
    AppendOnly,
    /// mapping of logical to physical column names via field metadata
    ColumnMapping,
    /// deletion vectors soft-delete rows inside data files
    DeletionVectors,
    /// named key/value metadata domains carried in the log
    DomainMetadata,
    /// monotonically increasing timestamps stored in commit info
    InCommitTimestamp,
    /// stable row ids and commit versions on every row
    RowTracking,
    /// timestamps without timezone support
    #[strum(serialize = "timestampNtz")]
    TimestampNtz,
    /// widening of existing column types
    TypeWidening,
    /// preview flavor of type widening written by earlier clients
    #[strum(serialize = "typeWidening-preview")]
    TypeWideningPreview,
    /// metadata kept compatible with Apache Iceberg V2 conversion
    IcebergCompatV2,
    /// metadata kept compatible with Apache Iceberg V3 conversion
    IcebergCompatV3,
    /// data is physically co-located by clustering columns
    #[strum(serialize = "clustering")]
    ClusteredTable,
}

impl TableFeature {
    /// True for features that must appear in the reader feature set as well as the writer set.
    pub(crate) fn is_reader_writer_feature(&self) -> bool {
        matches!(
            self,
            TableFeature::ColumnMapping
                | TableFeature::DeletionVectors
                | TableFeature::TimestampNtz
                | TableFeature::TypeWidening
                | TableFeature::TypeWideningPreview
        )
    }
}

/// Modes of the column mapping feature
#[derive(Debug, Default, EnumString, AsRefStr, StrumDisplay, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "camelCase")]
pub enum ColumnMappingMode {
    /// No column mapping is applied
    #[default]
    None,
    /// Columns are mapped by their field-id and physical name
    Id,
    /// Columns are mapped to a physical name
    Name,
}

impl ColumnMappingMode {
    pub(crate) fn try_from_str(s: &str) -> DeltaResult<Self> {
        Self::from_str(s)
            .map_err(|_| Error::generic(format!("invalid column mapping mode: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_names() {
        assert_eq!(TableFeature::DomainMetadata.as_ref(), "domainMetadata");
        assert_eq!(TableFeature::RowTracking.as_ref(), "rowTracking");
        assert_eq!(TableFeature::TimestampNtz.as_ref(), "timestampNtz");
        assert_eq!(
            TableFeature::TypeWideningPreview.as_ref(),
            "typeWidening-preview"
        );
        assert_eq!(TableFeature::ClusteredTable.as_ref(), "clustering");
        assert_eq!(TableFeature::IcebergCompatV2.as_ref(), "icebergCompatV2");
    }

    #[test]
    fn test_feature_parse() {
        assert_eq!(
            "columnMapping".parse::<TableFeature>().unwrap(),
            TableFeature::ColumnMapping
        );
        assert!("notAFeature".parse::<TableFeature>().is_err());
    }

    #[test]
    fn test_column_mapping_mode() {
        assert_eq!(
            ColumnMappingMode::try_from_str("name").unwrap(),
            ColumnMappingMode::Name
        );
        assert_eq!(
            ColumnMappingMode::try_from_str("id").unwrap(),
            ColumnMappingMode::Id
        );
        assert!(ColumnMappingMode::try_from_str("wat").is_err());
    }

    #[test]
    fn test_reader_writer_classification() {
        assert!(TableFeature::ColumnMapping.is_reader_writer_feature());
        assert!(!TableFeature::DomainMetadata.is_reader_writer_feature());
        assert!(!TableFeature::RowTracking.is_reader_writer_feature());
    }
}
