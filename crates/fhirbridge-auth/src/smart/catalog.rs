//! Predefined scope catalog advertised to clients.
//!
//! The table is built once on first use. Every entry is parsed at
//! construction; anything that fails to parse is dropped with a warning.

use std::sync::LazyLock;

use serde::Serialize;

use super::scopes::SmartScope;

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogScope {
    pub scope: &'static str,
    pub description: &'static str,
}

const ENTRIES: &[(&str, &str)] = &[
    ("patient/*.read", "Read access to all data for the in-context patient"),
    ("patient/*.write", "Write access to all data for the in-context patient"),
    ("patient/*.*", "Full access to all data for the in-context patient"),
    ("user/*.read", "Read access to all data the current user can see"),
    ("user/*.write", "Write access to all data the current user can modify"),
    ("user/*.*", "Full access to all data available to the current user"),
    ("system/*.read", "Read access to all data for a backend service"),
    ("system/*.write", "Write access to all data for a backend service"),
    ("system/*.*", "Full access to all data for a backend service"),
    ("system/*.$export", "Run a system-level bulk export"),
    ("patient/*.$export", "Run a patient-level bulk export"),
    ("system/Group.$export", "Run a group-level bulk export"),
    ("system/*.$import", "Run a bulk import"),
];

static CATALOG: LazyLock<Vec<CatalogScope>> = LazyLock::new(|| {
    ENTRIES
        .iter()
        .filter_map(|&(scope, description)| match SmartScope::parse(scope) {
            Ok(_) => Some(CatalogScope { scope, description }),
            Err(e) => {
                tracing::warn!(scope, error = %e, "dropping malformed catalog scope");
                None
            }
        })
        .collect()
});

/// The read-only predefined scope table.
pub fn scope_catalog() -> &'static [CatalogScope] {
    CATALOG.as_slice()
}
