//! Implementation of the `ResourceStore` trait for `InMemoryStore`.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use fhirbridge_storage::{
    ResourceStore, SearchParams, SearchResult, StorageError, StoredResource, extract_id,
    extract_resource_type,
};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::query::QueryFilter;
use crate::storage::{InMemoryStore, make_storage_key};

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        if !resource.is_object() {
            return Err(StorageError::invalid_resource("Resource must be a JSON object"));
        }
        let resource_type = extract_resource_type(resource)
            .ok_or_else(|| StorageError::invalid_resource("Missing resourceType field"))?
            .to_string();
        let id = extract_id(resource)
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let version_id = self.next_version();
        let now = OffsetDateTime::now_utc();

        let mut resource_with_meta = resource.clone();
        if let Some(obj) = resource_with_meta.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.clone()));
            obj.insert(
                "meta".to_string(),
                serde_json::json!({
                    "versionId": version_id,
                    "lastUpdated": now.format(&Rfc3339).unwrap_or_default()
                }),
            );
        }

        let stored = StoredResource::new(&id, version_id, &resource_type, resource_with_meta)
            .with_last_updated(now);

        match self.data.entry(make_storage_key(&resource_type, &id)) {
            Entry::Occupied(_) => Err(StorageError::already_exists(resource_type, id)),
            Entry::Vacant(slot) => {
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self
            .data
            .get(&make_storage_key(resource_type, id))
            .map(|entry| entry.value().clone()))
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        let filter = QueryFilter::from_params(params)?;

        let mut matched: Vec<StoredResource> = self
            .data
            .iter()
            .filter(|entry| entry.key().0 == resource_type && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));

        let total = matched.len();
        let offset = params.offset.unwrap_or(0) as usize;
        let count = params.count.map_or(total, |c| c as usize);

        let entries: Vec<StoredResource> = matched.into_iter().skip(offset).take(count).collect();
        let has_more = offset + entries.len() < total;

        Ok(SearchResult::with_entries(entries)
            .with_total(u32::try_from(total).unwrap_or(u32::MAX))
            .with_has_more(has_more))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
