//! In-memory resource store backend for FhirBridge.
//!
//! This crate provides an in-memory implementation of the `ResourceStore`
//! trait from `fhirbridge-storage`, using a `DashMap` for concurrent access.
//! It backs local development and the test suites.
//!
//! # Example
//!
//! ```ignore
//! use fhirbridge_db_memory::InMemoryStore;
//! use fhirbridge_storage::ResourceStore;
//!
//! let store = InMemoryStore::new();
//! let patient = serde_json::json!({
//!     "resourceType": "Patient",
//!     "name": [{"family": "Smith"}]
//! });
//! let created = store.create(&patient).await?;
//! ```

mod fhir_impl;
pub mod query;
pub mod storage;

pub use fhirbridge_storage::{ResourceStore, StorageError, StoredResource};
pub use query::{DateFilter, DatePrefix, QueryFilter};
pub use storage::{InMemoryStore, StorageKey};

/// Type alias for a shareable resource store.
pub type DynResourceStore = std::sync::Arc<dyn ResourceStore>;

/// Creates a new in-memory resource store.
pub fn create_resource_store() -> DynResourceStore {
    std::sync::Arc::new(InMemoryStore::new())
}
