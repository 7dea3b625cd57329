//! Clustering support. Clustering metadata is stored as domain metadata with the domain name
//! `delta.clustering`; a table stops being clustered by re-seeding the domain with an empty
//! column list, never by removing it.

use serde::{Deserialize, Serialize};

use crate::actions::DomainMetadata;
use crate::DeltaResult;

/// The domain name for clustering metadata in Delta tables
pub const CLUSTERING_DOMAIN_NAME: &str = "delta.clustering";

/// The clustering metadata stored in the `delta.clustering` domain. Columns are stored as
/// paths (a list of field names) to support nested columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringMetadataDomain {
    clustering_columns: Vec<Vec<String>>,
}

impl ClusteringMetadataDomain {
    /// Build the domain payload from column names. Dotted names address nested fields.
    pub fn new(cluster_columns: &[String]) -> Self {
        let clustering_columns = cluster_columns
            .iter()
            .map(|col| col.split('.').map(str::to_string).collect())
            .collect();
        Self { clustering_columns }
    }

    pub fn from_json_configuration(configuration: &str) -> DeltaResult<Self> {
        Ok(serde_json::from_str(configuration)?)
    }

    pub fn clustering_columns(&self) -> &[Vec<String>] {
        &self.clustering_columns
    }

    pub fn to_domain_metadata(&self) -> DeltaResult<DomainMetadata> {
        Ok(DomainMetadata::new(
            CLUSTERING_DOMAIN_NAME,
            serde_json::to_string(self)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let domain =
            ClusteringMetadataDomain::new(&["col1".to_string(), "nested.field".to_string()]);
        let dm = domain.to_domain_metadata().unwrap();
        assert_eq!(dm.domain(), CLUSTERING_DOMAIN_NAME);
        assert_eq!(
            dm.configuration(),
            r#"{"clusteringColumns":[["col1"],["nested","field"]]}"#
        );
        let parsed =
            ClusteringMetadataDomain::from_json_configuration(dm.configuration()).unwrap();
        assert_eq!(parsed, domain);
    }

    #[test]
    fn test_empty_clustering() {
        let domain = ClusteringMetadataDomain::new(&[]);
        assert!(domain.clustering_columns().is_empty());
        assert_eq!(
            domain.to_domain_metadata().unwrap().configuration(),
            r#"{"clusteringColumns":[]}"#
        );
    }
}
