//! Resource types accepted by bulk export and import.

/// Every resource type a bulk job may name.
pub const SUPPORTED_RESOURCE_TYPES: &[&str] = &[
    "Patient",
    "Observation",
    "Condition",
    "Procedure",
    "MedicationRequest",
    "DiagnosticReport",
    "Encounter",
    "AllergyIntolerance",
    "Immunization",
    "CarePlan",
    "CareTeam",
    "Device",
    "DocumentReference",
    "Goal",
    "Location",
    "Medication",
    "Organization",
    "Practitioner",
    "PractitionerRole",
    "Provenance",
];

/// Default for Patient and Group level exports: the clinically relevant
/// patient compartment subset.
pub const PATIENT_RESOURCE_TYPES: &[&str] = &[
    "Patient",
    "Observation",
    "Condition",
    "Encounter",
    "Procedure",
    "MedicationRequest",
    "AllergyIntolerance",
    "Immunization",
    "DiagnosticReport",
];

pub fn is_supported(resource_type: &str) -> bool {
    SUPPORTED_RESOURCE_TYPES.contains(&resource_type)
}

/// Entries of `requested` outside the supported set, deduplicated, in order.
pub fn unsupported<'a>(requested: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for rt in requested {
        if !is_supported(rt) && !out.iter().any(|seen| seen == rt) {
            out.push(rt.to_string());
        }
    }
    out
}

/// Collapse duplicates, keeping first occurrence.
pub fn dedup_preserving_order(types: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(types.len());
    for rt in types {
        if !out.contains(&rt) {
            out.push(rt);
        }
    }
    out
}
