//! Core in-memory resource map.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use fhirbridge_storage::StoredResource;

/// Storage key: (resource type, id).
pub type StorageKey = (String, String);

pub(crate) fn make_storage_key(resource_type: &str, id: &str) -> StorageKey {
    (resource_type.to_string(), id.to_string())
}

/// In-memory resource store backed by a concurrent hash map.
///
/// Supports:
/// - Create with server-assigned ids and monotonically increasing versions
/// - Read by type and id
/// - Search by `_id`, `patient` reference and `_lastUpdated`, with paging
///
/// Cloning is cheap and clones share the same data.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    pub(crate) data: Arc<DashMap<StorageKey, StoredResource>>,
    pub(crate) version_counter: Arc<AtomicU64>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            version_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Generates the next version ID.
    pub(crate) fn next_version(&self) -> String {
        self.version_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    /// Inserts or replaces a stored resource as-is, keeping its timestamps.
    /// Used to seed fixtures.
    pub fn insert(&self, stored: StoredResource) {
        let key = make_storage_key(&stored.resource_type, &stored.id);
        self.data.insert(key, stored);
    }

    /// Total number of resources held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the store holds no resources.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of resources of one type.
    pub fn count_by_type(&self, resource_type: &str) -> usize {
        self.data
            .iter()
            .filter(|entry| entry.key().0 == resource_type)
            .count()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
