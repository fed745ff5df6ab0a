//! Search filtering for the in-memory backend.

use std::cmp::Ordering;

use fhirbridge_storage::{SearchParams, StorageError, StoredResource};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Comparison prefix on a date search value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePrefix {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A parsed `_lastUpdated` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateFilter {
    pub prefix: DatePrefix,
    pub value: OffsetDateTime,
}

impl DateFilter {
    /// Parses `ge2024-01-01T00:00:00Z` style values. No prefix means `eq`.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let (prefix, rest) = match raw.get(..2) {
            Some("eq") => (DatePrefix::Eq, &raw[2..]),
            Some("gt") => (DatePrefix::Gt, &raw[2..]),
            Some("ge") => (DatePrefix::Ge, &raw[2..]),
            Some("lt") => (DatePrefix::Lt, &raw[2..]),
            Some("le") => (DatePrefix::Le, &raw[2..]),
            _ => (DatePrefix::Eq, raw),
        };
        let value = OffsetDateTime::parse(rest, &Rfc3339).map_err(|e| {
            StorageError::invalid_resource(format!("Invalid _lastUpdated value '{raw}': {e}"))
        })?;
        Ok(Self { prefix, value })
    }

    pub fn matches(&self, ts: OffsetDateTime) -> bool {
        let ord = ts.cmp(&self.value);
        match self.prefix {
            DatePrefix::Eq => ord == Ordering::Equal,
            DatePrefix::Gt => ord == Ordering::Greater,
            DatePrefix::Ge => ord != Ordering::Less,
            DatePrefix::Lt => ord == Ordering::Less,
            DatePrefix::Le => ord != Ordering::Greater,
        }
    }
}

/// Compiled search filter for one resource type.
#[derive(Debug, Default)]
pub struct QueryFilter {
    ids: Option<Vec<String>>,
    patients: Option<Vec<String>>,
    last_updated: Vec<DateFilter>,
}

impl QueryFilter {
    /// Builds a filter from search parameters. Unknown parameters are ignored.
    pub fn from_params(params: &SearchParams) -> Result<Self, StorageError> {
        let mut filter = Self::default();
        for (key, values) in &params.parameters {
            match key.as_str() {
                "_id" => filter.ids = Some(split_or_values(values)),
                "patient" | "subject" => {
                    filter.patients = Some(
                        split_or_values(values)
                            .into_iter()
                            .map(|v| normalize_patient_ref(&v))
                            .collect(),
                    )
                }
                "_lastUpdated" => {
                    for v in values {
                        filter.last_updated.push(DateFilter::parse(v)?);
                    }
                }
                other => tracing::debug!(param = %other, "ignoring unsupported search parameter"),
            }
        }
        Ok(filter)
    }

    /// Returns true if the stored resource passes every condition.
    pub fn matches(&self, stored: &StoredResource) -> bool {
        if let Some(ids) = &self.ids
            && !ids.iter().any(|id| id == &stored.id)
        {
            return false;
        }

        if let Some(patients) = &self.patients
            && !patients.iter().any(|p| references_patient(stored, p))
        {
            return false;
        }

        self.last_updated.iter().all(|f| f.matches(stored.last_updated))
    }
}

/// Comma separated values are OR conditions, like repeated keys.
fn split_or_values(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_patient_ref(value: &str) -> String {
    if value.starts_with("Patient/") {
        value.to_string()
    } else {
        format!("Patient/{value}")
    }
}

/// A Patient references itself; other resources via `subject` or `patient`.
fn references_patient(stored: &StoredResource, patient_ref: &str) -> bool {
    if stored.resource_type == "Patient" {
        return patient_ref.strip_prefix("Patient/") == Some(stored.id.as_str());
    }
    ["subject", "patient"].iter().any(|field| {
        stored
            .resource
            .get(field)
            .and_then(|r| r.get("reference"))
            .and_then(Value::as_str)
            == Some(patient_ref)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn observation(id: &str, patient: &str) -> StoredResource {
        StoredResource::new(
            id,
            "1",
            "Observation",
            json!({"resourceType": "Observation", "id": id, "subject": {"reference": patient}}),
        )
    }

    #[test]
    fn test_date_filter_prefixes() {
        let ts = datetime!(2024-06-01 00:00 UTC);
        assert!(DateFilter::parse("ge2024-06-01T00:00:00Z").unwrap().matches(ts));
        assert!(!DateFilter::parse("gt2024-06-01T00:00:00Z").unwrap().matches(ts));
        assert!(DateFilter::parse("le2024-06-01T00:00:00Z").unwrap().matches(ts));
        assert!(DateFilter::parse("lt2024-07-01T00:00:00Z").unwrap().matches(ts));
        assert!(DateFilter::parse("2024-06-01T00:00:00Z").unwrap().matches(ts));
        assert!(DateFilter::parse("ge-not-a-date").is_err());
    }

    #[test]
    fn test_patient_filter() {
        let params = SearchParams::new().with_param("patient", "Patient/p1");
        let filter = QueryFilter::from_params(&params).unwrap();
        assert!(filter.matches(&observation("o1", "Patient/p1")));
        assert!(!filter.matches(&observation("o2", "Patient/p2")));

        // Bare ids are normalized.
        let params = SearchParams::new().with_param("patient", "p2");
        let filter = QueryFilter::from_params(&params).unwrap();
        assert!(filter.matches(&observation("o2", "Patient/p2")));
    }

    #[test]
    fn test_patient_filter_on_patient_type() {
        let params = SearchParams::new().with_param("patient", "Patient/p1");
        let filter = QueryFilter::from_params(&params).unwrap();
        let p1 = StoredResource::new("p1", "1", "Patient", json!({"resourceType": "Patient"}));
        let p2 = StoredResource::new("p2", "1", "Patient", json!({"resourceType": "Patient"}));
        assert!(filter.matches(&p1));
        assert!(!filter.matches(&p2));
    }

    #[test]
    fn test_id_filter_or_semantics() {
        let params = SearchParams::new().with_param("_id", "a,b").with_param("_id", "c");
        let filter = QueryFilter::from_params(&params).unwrap();
        for id in ["a", "b", "c"] {
            assert!(filter.matches(&observation(id, "Patient/x")));
        }
        assert!(!filter.matches(&observation("d", "Patient/x")));
    }
}
