//! Bulk Data export and import
//!
//! Both orchestrators validate a request synchronously, store a `Pending`
//! [`JobRecord`](crate::jobs::JobRecord) and hand processing to the shared
//! [`JobRunner`](crate::jobs::JobRunner). Callers poll or cancel by job id.
//!
//! ## Response Flow
//!
//! 1. Client posts an export or import command
//! 2. Server returns `202 Accepted` with `Content-Location` pointing to the status URL
//! 3. Client polls the status endpoint
//! 4. When an export completes, the status body carries the output manifest
//! 5. Client downloads NDJSON files from the manifest URLs

mod export;
mod import;
pub mod resource_types;
mod writer;

use std::path::PathBuf;
use std::sync::Arc;

use fhirbridge_api::ApiError;
use fhirbridge_storage::ResourceStore;
use thiserror::Error;

use crate::config::BulkConfig;
use crate::jobs::{CancelOutcome, JobId, JobRecord, JobRunner, JobStore};

pub use export::{ExportOrchestrator, ExportRequest, run_export};
pub use import::{
    ImportFileRequest, ImportOrchestrator, ImportRequest, parse_import_content, run_import,
};
pub use resource_types::{PATIENT_RESOURCE_TYPES, SUPPORTED_RESOURCE_TYPES};
pub use writer::{NdjsonWriter, NdjsonWriterError, WrittenFile, cleanup_expired_exports};

/// Errors surfaced synchronously by bulk commands.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error("Unsupported resource types: {}", .0.join(", "))]
    UnsupportedResourceTypes(Vec<String>),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: crate::jobs::JobStatus },

    #[error("Missing scope: {0}")]
    Forbidden(String),
}

impl BulkError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<BulkError> for ApiError {
    fn from(err: BulkError) -> Self {
        match err {
            BulkError::UnsupportedResourceTypes(_) | BulkError::Validation(_) => {
                ApiError::bad_request(err.to_string())
            }
            BulkError::NotFound(_) => ApiError::not_found(err.to_string()),
            BulkError::AlreadyTerminal { .. } => ApiError::conflict(err.to_string()),
            BulkError::Forbidden(_) => ApiError::forbidden(err.to_string()),
        }
    }
}

/// Tunables shared by export and import processing.
#[derive(Debug, Clone)]
pub struct BulkSettings {
    pub export_path: PathBuf,
    pub batch_size: u32,
    pub max_resources_per_file: usize,
    /// Public base URL used for manifest links, without trailing slash.
    pub base_url: String,
}

impl BulkSettings {
    pub fn from_config(cfg: &BulkConfig, base_url: impl Into<String>) -> Self {
        Self {
            export_path: cfg.export_path.clone(),
            batch_size: cfg.batch_size,
            max_resources_per_file: cfg.max_resources_per_file,
            base_url: base_url.into(),
        }
    }
}

/// Dependencies of both orchestrators, owned by the composition root.
pub struct BulkContext {
    pub runner: JobRunner,
    pub resources: Arc<dyn ResourceStore>,
    pub settings: BulkSettings,
}

impl BulkContext {
    pub fn new(
        runner: JobRunner,
        resources: Arc<dyn ResourceStore>,
        settings: BulkSettings,
    ) -> Self {
        Self {
            runner,
            resources,
            settings,
        }
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        self.runner.store()
    }

    fn get_job_where(&self, id: &JobId, is_kind: fn(&JobRecord) -> bool) -> Option<JobRecord> {
        self.jobs().get(id).filter(|job| is_kind(job))
    }

    fn cancel_job_where(&self, id: &JobId, is_kind: fn(&JobRecord) -> bool) -> CancelOutcome {
        if self.get_job_where(id, is_kind).is_none() {
            return CancelOutcome::NotFound;
        }
        self.runner.cancel(id)
    }
}

/// Map a cancel outcome onto the HTTP-facing error taxonomy.
pub fn cancel_result(id: &JobId, outcome: CancelOutcome) -> Result<JobRecord, BulkError> {
    match outcome {
        CancelOutcome::Cancelled(job) => Ok(job),
        CancelOutcome::NotFound => Err(BulkError::NotFound(id.to_string())),
        CancelOutcome::AlreadyTerminal(status) => {
            Err(BulkError::AlreadyTerminal { id: *id, status })
        }
    }
}
