//! Resource store backed by an upstream FHIR REST server.
//!
//! Search maps to `GET {base}/{type}?...`, create to `POST {base}/{type}` and
//! read to `GET {base}/{type}/{id}`. Transport failures and 5xx responses are
//! connection errors; 4xx responses reject the single request.

use std::time::Duration;

use async_trait::async_trait;
use fhirbridge_storage::{
    ResourceStore, SearchParams, SearchResult, StorageError, StoredResource, extract_id,
    extract_resource_type,
};
use reqwest::{Client, Response, StatusCode, header};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use fhirbridge_api::FHIR_JSON;

/// HTTP client for an upstream FHIR server.
#[derive(Debug, Clone)]
pub struct RemoteFhirStore {
    client: Client,
    base_url: String,
}

impl RemoteFhirStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| StorageError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create with a custom client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn type_url(&self, resource_type: &str) -> String {
        format!("{}/{}", self.base_url, resource_type)
    }

    async fn error_for_status(response: Response, what: &str) -> StorageError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = format!("{what} returned HTTP {}: {}", status.as_u16(), truncate(&body));
        if status.is_server_error() {
            StorageError::connection_error(message)
        } else {
            StorageError::invalid_resource(message)
        }
    }

    async fn json_body(response: Response, what: &str) -> Result<Value, StorageError> {
        response
            .json::<Value>()
            .await
            .map_err(|e| {
                StorageError::invalid_resource(format!("{what} returned invalid JSON: {e}"))
            })
    }
}

fn transport_error(what: &str, err: reqwest::Error) -> StorageError {
    StorageError::connection_error(format!("{what} failed: {err}"))
}

fn truncate(body: &str) -> &str {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Wrap a resource returned by the upstream server.
fn to_stored(resource: Value, fallback_type: &str) -> StoredResource {
    let id = extract_id(&resource).unwrap_or_default().to_string();
    let resource_type = extract_resource_type(&resource)
        .unwrap_or(fallback_type)
        .to_string();
    let meta = resource.get("meta");
    let version_id = meta
        .and_then(|m| m.get("versionId"))
        .and_then(Value::as_str)
        .unwrap_or("1")
        .to_string();
    let last_updated = meta
        .and_then(|m| m.get("lastUpdated"))
        .and_then(Value::as_str)
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());

    let stored = StoredResource::new(id, version_id, resource_type, resource);
    match last_updated {
        Some(ts) => stored.with_last_updated(ts),
        None => stored,
    }
}

#[async_trait]
impl ResourceStore for RemoteFhirStore {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        let resource_type = extract_resource_type(resource)
            .ok_or_else(|| StorageError::invalid_resource("Resource must have a resourceType"))?;
        let what = format!("POST {resource_type}");

        let response = self
            .client
            .post(self.type_url(resource_type))
            .header(header::CONTENT_TYPE, FHIR_JSON)
            .header(header::ACCEPT, FHIR_JSON)
            .json(resource)
            .send()
            .await
            .map_err(|e| transport_error(&what, e))?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(response, &what).await);
        }

        // Servers may answer with an empty body (Prefer: return=minimal).
        let bytes = response.bytes().await.map_err(|e| transport_error(&what, e))?;
        let created = if bytes.is_empty() {
            resource.clone()
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::invalid_resource(format!("{what} returned invalid JSON: {e}"))
            })?
        };

        tracing::trace!(resource_type, "Created resource upstream");
        Ok(to_stored(created, resource_type))
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        let what = format!("GET {resource_type}/{id}");
        let response = self
            .client
            .get(format!("{}/{}", self.type_url(resource_type), id))
            .header(header::ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| transport_error(&what, e))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            status if status.is_success() => {
                let body = Self::json_body(response, &what).await?;
                Ok(Some(to_stored(body, resource_type)))
            }
            _ => Err(Self::error_for_status(response, &what).await),
        }
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        let what = format!("GET {resource_type}");
        let response = self
            .client
            .get(self.type_url(resource_type))
            .header(header::ACCEPT, FHIR_JSON)
            .query(&params.to_query_pairs())
            .send()
            .await
            .map_err(|e| transport_error(&what, e))?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(response, &what).await);
        }

        let bundle = Self::json_body(response, &what).await?;
        let entries: Vec<StoredResource> = bundle
            .get("entry")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.get("resource").cloned())
            .map(|resource| to_stored(resource, resource_type))
            .collect();

        let has_more = bundle
            .get("link")
            .and_then(Value::as_array)
            .is_some_and(|links| {
                links
                    .iter()
                    .any(|l| l.get("relation").and_then(Value::as_str) == Some("next"))
            });
        let total = bundle
            .get("total")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok());

        let mut result = SearchResult::with_entries(entries).with_has_more(has_more);
        if let Some(total) = total {
            result = result.with_total(total);
        }
        Ok(result)
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }
}
