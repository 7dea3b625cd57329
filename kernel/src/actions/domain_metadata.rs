//! The `domainMetadata` action: a named key/value slot in the log whose latest non-tombstone
//! record is authoritative, plus the helpers for merging records into an "active map" and for
//! validating the set a single commit carries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::actions::{Protocol, INTERNAL_DOMAIN_PREFIX};
use crate::table_features::TableFeature;
use crate::utils::require;
use crate::{DeltaResult, Error};

/// A named key/value metadata domain carried in the log. A record with `removed = true` is a
/// tombstone; a domain is active iff its latest non-shadowed record has `removed = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainMetadata {
    /// A string used to identify a specific domain
    domain: String,
    /// A string containing configuration for the metadata domain
    configuration: String,
    /// When `true` the action serves as a tombstone to logically delete a metadata domain
    removed: bool,
}

impl DomainMetadata {
    /// Create a new (non-tombstone) domain metadata record
    pub fn new(domain: impl Into<String>, configuration: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            configuration: configuration.into(),
            removed: false,
        }
    }

    /// The tombstone for this record, preserving the configuration pre-image as the Delta
    /// protocol requires
    pub fn removed(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            configuration: self.configuration.clone(),
            removed: true,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// True if the domain is user controlled, i.e. not in the system-reserved `delta.` namespace
    pub fn is_user_controlled(domain: &str) -> bool {
        !domain.starts_with(INTERNAL_DOMAIN_PREFIX)
    }

    /// System domains that may be written through the public transaction API because they have a
    /// dedicated code path (currently only row tracking).
    pub(crate) fn is_system_domain_settable_from_transaction(domain: &str) -> bool {
        domain == crate::row_tracking::ROW_TRACKING_DOMAIN_NAME
    }
}

/// Merge a sequence of domain metadata records (in log order) into a `name -> latest` map.
/// Tombstones stay in the map so later lookups see the removal; use
/// [`active_domain_metadata_map`] for the active view.
pub(crate) fn populate_domain_metadata_map(
    records: impl IntoIterator<Item = DomainMetadata>,
    map: &mut HashMap<String, DomainMetadata>,
) {
    for record in records {
        map.insert(record.domain.clone(), record);
    }
}

/// Reduce a `name -> latest` map to only active (non-tombstone) domains.
pub(crate) fn active_domain_metadata_map(
    map: HashMap<String, DomainMetadata>,
) -> HashMap<String, DomainMetadata> {
    map.into_iter().filter(|(_, dm)| !dm.removed).collect()
}

/// Validate the domain metadata records a single commit is about to carry: the protocol must
/// support the feature, and no domain may appear twice (whether as two adds, two tombstones, or
/// an add and a tombstone).
pub(crate) fn validate_domain_metadatas(
    domain_metadatas: &[DomainMetadata],
    protocol: &Protocol,
) -> DeltaResult<()> {
    if domain_metadatas.is_empty() {
        return Ok(());
    }
    require!(
        protocol.supports_feature(TableFeature::DomainMetadata),
        Error::unsupported(
            "domain metadata operations require writer version 7 and the 'domainMetadata' \
             writer feature"
        )
    );
    let mut seen = std::collections::HashSet::with_capacity(domain_metadatas.len());
    for dm in domain_metadatas {
        require!(
            seen.insert(dm.domain()),
            Error::generic(format!(
                "metadata for domain {} already specified in this transaction",
                dm.domain()
            ))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;

    #[test]
    fn test_round_trip() {
        let dm = DomainMetadata::new("foo", r#"{"k":"1"}"#);
        let json = Action::DomainMetadata(dm.clone()).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"domainMetadata":{"domain":"foo","configuration":"{\"k\":\"1\"}","removed":false}}"#
        );
        assert_eq!(Action::from_json(&json).unwrap(), Action::DomainMetadata(dm));
    }

    #[test]
    fn test_tombstone_preserves_configuration() {
        let dm = DomainMetadata::new("foo", "cfg");
        let tombstone = dm.removed();
        assert!(tombstone.is_removed());
        assert_eq!(tombstone.configuration(), "cfg");
        assert_eq!(tombstone.domain(), "foo");
    }

    #[test]
    fn test_user_controlled() {
        assert!(DomainMetadata::is_user_controlled("foo"));
        assert!(DomainMetadata::is_user_controlled("myApp.domain"));
        assert!(!DomainMetadata::is_user_controlled("delta.rowTracking"));
        assert!(!DomainMetadata::is_user_controlled("delta.anything"));
    }

    #[test]
    fn test_latest_wins_merging() {
        let mut map = HashMap::new();
        populate_domain_metadata_map(
            [
                DomainMetadata::new("a", "1"),
                DomainMetadata::new("b", "1"),
                DomainMetadata::new("a", "2"),
                DomainMetadata::new("b", "1").removed(),
            ],
            &mut map,
        );
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"].configuration(), "2");
        assert!(map["b"].is_removed());

        let active = active_domain_metadata_map(map);
        assert_eq!(active.len(), 1);
        assert!(active.contains_key("a"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let protocol =
            Protocol::try_new_with_features([TableFeature::DomainMetadata]).unwrap();
        let ok = [
            DomainMetadata::new("a", "1"),
            DomainMetadata::new("b", "1").removed(),
        ];
        validate_domain_metadatas(&ok, &protocol).unwrap();

        let dup = [
            DomainMetadata::new("a", "1"),
            DomainMetadata::new("a", "2").removed(),
        ];
        assert!(validate_domain_metadatas(&dup, &protocol).is_err());
    }

    #[test]
    fn test_validate_requires_feature() {
        let protocol = Protocol::default();
        let records = [DomainMetadata::new("a", "1")];
        assert!(matches!(
            validate_domain_metadatas(&records, &protocol),
            Err(Error::Unsupported(_))
        ));
        // no records, no feature needed
        validate_domain_metadatas(&[], &protocol).unwrap();
    }
}
