//! Data types used by the resource store contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;

/// A FHIR resource as held by a resource store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    /// The resource ID.
    pub id: String,
    /// The version ID of this specific version.
    pub version_id: String,
    /// The FHIR resource type (e.g., "Patient", "Observation").
    pub resource_type: String,
    /// The full resource content as JSON.
    pub resource: Value,
    /// When this version was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl StoredResource {
    /// Creates a new `StoredResource` stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        version_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource: Value,
    ) -> Self {
        Self {
            id: id.into(),
            version_id: version_id.into(),
            resource_type: resource_type.into(),
            resource,
            last_updated: OffsetDateTime::now_utc(),
        }
    }

    /// Overrides the last-updated timestamp.
    #[must_use]
    pub fn with_last_updated(mut self, last_updated: OffsetDateTime) -> Self {
        self.last_updated = last_updated;
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matching resources.
    pub entries: Vec<StoredResource>,
    /// Total count of matching resources, if the backend reports it.
    pub total: Option<u32>,
    /// Whether there are more results available beyond this page.
    pub has_more: bool,
}

impl SearchResult {
    /// Creates a new empty `SearchResult`.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a new `SearchResult` with entries.
    #[must_use]
    pub fn with_entries(entries: Vec<StoredResource>) -> Self {
        Self {
            entries,
            total: None,
            has_more: false,
        }
    }

    /// Sets the total count.
    #[must_use]
    pub fn with_total(mut self, total: u32) -> Self {
        self.total = Some(total);
        self
    }

    /// Sets the has_more flag.
    #[must_use]
    pub fn with_has_more(mut self, has_more: bool) -> Self {
        self.has_more = has_more;
        self
    }

    /// Returns the number of entries in this result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parameters for a search query.
///
/// Multiple values for the same key are OR conditions. Recognized keys are
/// `_id`, `patient` and `_lastUpdated` (with a `ge`/`gt`/`le`/`lt` prefix);
/// backends may support more.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    pub parameters: HashMap<String, Vec<String>>,
    /// Maximum number of results to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Number of results to skip for pagination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl SearchParams {
    /// Creates new empty `SearchParams`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a search parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Sets the count parameter.
    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the offset parameter.
    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns the values for a parameter, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.parameters.get(key).map(Vec::as_slice)
    }

    /// Returns true if this search has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Flattens the parameters (plus `_count`/`_offset`) into query pairs,
    /// sorted by key for stable URLs.
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .parameters
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.clone(), v.clone())))
            .collect();
        pairs.sort();
        if let Some(count) = self.count {
            pairs.push(("_count".to_string(), count.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("_offset".to_string(), offset.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_params_builder() {
        let params = SearchParams::new()
            .with_param("_id", "a")
            .with_param("_id", "b")
            .with_count(10)
            .with_offset(20);

        assert_eq!(params.get("_id"), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(params.count, Some(10));
        assert_eq!(params.offset, Some(20));
        assert!(!params.is_empty());
    }

    #[test]
    fn test_query_pairs_are_sorted_with_paging_last() {
        let params = SearchParams::new()
            .with_param("patient", "Patient/p1")
            .with_param("_lastUpdated", "ge2024-01-01T00:00:00Z")
            .with_count(5)
            .with_offset(0);

        let pairs = params.to_query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("_lastUpdated".to_string(), "ge2024-01-01T00:00:00Z".to_string()),
                ("patient".to_string(), "Patient/p1".to_string()),
                ("_count".to_string(), "5".to_string()),
                ("_offset".to_string(), "0".to_string()),
            ]
        );
    }

    #[test]
    fn test_search_result_builders() {
        let stored =
            StoredResource::new("1", "1", "Patient", json!({"resourceType": "Patient", "id": "1"}));
        let result = SearchResult::with_entries(vec![stored])
            .with_total(3)
            .with_has_more(true);
        assert_eq!(result.len(), 1);
        assert_eq!(result.total, Some(3));
        assert!(result.has_more);
        assert!(SearchResult::empty().is_empty());
    }
}
