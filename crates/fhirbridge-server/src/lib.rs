//! FhirBridge bulk data gateway.
//!
//! Asynchronous bulk export and import jobs over a pluggable FHIR resource
//! store, gated by SMART scopes. The HTTP surface lives in [`routes`]; the
//! job machinery in [`jobs`] and [`operations::bulk`].

pub mod config;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod observability;
pub mod operations;
pub mod routes;
pub mod server;
pub mod upstream;

pub use config::{AppConfig, BulkConfig, ServerConfig, StorageBackend};
pub use jobs::{JobId, JobRecord, JobRunner, JobStatus, JobStore};
pub use observability::init_tracing;
pub use server::{AppState, FhirBridgeServer, ServerBuilder, build_app};
pub use upstream::RemoteFhirStore;
