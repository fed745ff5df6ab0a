//! The resource store contract consumed by bulk jobs.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{SearchParams, SearchResult, StoredResource};

/// A FHIR resource store exposing per-type search, create and read.
///
/// Implementations must be safe to share across tasks. Every call may block
/// on network I/O; callers must not hold locks across them.
///
/// # Example
///
/// ```ignore
/// use fhirbridge_storage::{ResourceStore, SearchParams, StorageError, StoredResource};
///
/// async fn first_page(
///     store: &dyn ResourceStore,
/// ) -> Result<Vec<StoredResource>, StorageError> {
///     let params = SearchParams::new().with_count(100).with_offset(0);
///     Ok(store.search("Observation", &params).await?.entries)
/// }
/// ```
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Creates a new resource. The resource type is taken from the
    /// `resourceType` field; a missing id is assigned by the store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidResource` if the content is rejected and
    /// `StorageError::ConnectionError` if the store is unreachable.
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Reads the current version of a resource.
    ///
    /// Returns `Ok(None)` if the resource does not exist.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Searches for resources of one type.
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;

    /// Short backend name for logging.
    fn backend_name(&self) -> &'static str;
}
