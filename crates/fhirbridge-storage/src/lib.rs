//! # fhirbridge-storage
//!
//! The resource store contract used by FhirBridge bulk jobs.
//!
//! This crate defines the trait and types every backend implements. It does
//! not contain any implementations; the in-memory backend lives in
//! `fhirbridge-db-memory` and the HTTP upstream client in `fhirbridge-server`.
//!
//! ## Example
//!
//! ```ignore
//! use fhirbridge_storage::{ResourceStore, SearchParams, StorageError, StoredResource};
//!
//! async fn patients_by_id(
//!     store: &dyn ResourceStore,
//!     id: &str,
//! ) -> Result<Vec<StoredResource>, StorageError> {
//!     let params = SearchParams::new().with_param("_id", id).with_count(10);
//!     Ok(store.search("Patient", &params).await?.entries)
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::ResourceStore;
pub use types::{SearchParams, SearchResult, StoredResource};

/// Extracts the `resourceType` field from a resource.
#[must_use]
pub fn extract_resource_type(resource: &serde_json::Value) -> Option<&str> {
    resource.get("resourceType").and_then(serde_json::Value::as_str)
}

/// Extracts the `id` field from a resource.
#[must_use]
pub fn extract_id(resource: &serde_json::Value) -> Option<&str> {
    resource.get("id").and_then(serde_json::Value::as_str)
}
