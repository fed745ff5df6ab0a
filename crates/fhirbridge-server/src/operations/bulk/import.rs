//! Bulk import
//!
//! Each submitted file carries a declared resource type and raw content (a
//! JSON resource, a JSON array of resources, or NDJSON). Files are processed
//! in order; a bad file is recorded in the job's results and the batch goes
//! on. Only an unreachable store fails the whole job.

use std::sync::Arc;

use fhirbridge_storage::extract_resource_type;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::resource_types;
use super::{BulkContext, BulkError, cancel_result};
use crate::jobs::{
    CancelOutcome, ImportDetails, ImportFile, ImportFileResult, JobError, JobId, JobRecord,
};

/// One entry of the `POST import` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFileRequest {
    #[serde(default)]
    pub resource_type: String,
    /// A JSON string holding the raw content, or inline JSON.
    #[serde(default)]
    pub content: Value,
}

/// Body of `POST import`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub files: Vec<ImportFileRequest>,
}

/// Validates import commands and tracks import jobs.
#[derive(Clone)]
pub struct ImportOrchestrator {
    ctx: Arc<BulkContext>,
}

impl ImportOrchestrator {
    pub fn new(ctx: Arc<BulkContext>) -> Self {
        Self { ctx }
    }

    pub fn create_import_job(&self, request: ImportRequest) -> Result<JobRecord, BulkError> {
        let details = self.prepare(request)?;
        Ok(self.submit(details))
    }

    /// Validate a request into job details without creating a job.
    pub fn prepare(&self, request: ImportRequest) -> Result<ImportDetails, BulkError> {
        validate_import_request(request)
    }

    /// Store validated details as a `Pending` job and schedule processing.
    pub fn submit(&self, details: ImportDetails) -> JobRecord {
        let files = details.input_files.len();
        let job = JobRecord::new_import(details);
        let job_id = job.job_id;

        self.ctx.jobs().put(job.clone());
        tracing::info!(job_id = %job_id, files, "Bulk import job created");

        let ctx = self.ctx.clone();
        self.ctx
            .runner
            .spawn(job_id, move |token| run_import(ctx, job_id, token));

        job
    }

    pub fn get_job(&self, id: &JobId) -> Option<JobRecord> {
        self.ctx.get_job_where(id, JobRecord::is_import)
    }

    pub fn list_jobs(&self) -> Vec<JobRecord> {
        self.ctx.jobs().list_matching(JobRecord::is_import)
    }

    pub fn cancel_job(&self, id: &JobId) -> bool {
        self.cancel(id).is_cancelled()
    }

    pub fn cancel(&self, id: &JobId) -> CancelOutcome {
        self.ctx.cancel_job_where(id, JobRecord::is_import)
    }

    pub fn cancel_or_error(&self, id: &JobId) -> Result<JobRecord, BulkError> {
        cancel_result(id, self.cancel(id))
    }
}

fn validate_import_request(request: ImportRequest) -> Result<ImportDetails, BulkError> {
    if request.files.is_empty() {
        return Err(BulkError::validation("files must contain at least one entry"));
    }

    let mut problems = Vec::new();
    let mut input_files = Vec::with_capacity(request.files.len());

    for (index, file) in request.files.into_iter().enumerate() {
        let resource_type = file.resource_type.trim().to_string();
        let content = match file.content {
            Value::Null => String::new(),
            Value::String(raw) => raw,
            inline => inline.to_string(),
        };

        if resource_type.is_empty() {
            problems.push(format!("files[{index}]: resourceType is required"));
        } else if !resource_types::is_supported(&resource_type) {
            problems.push(format!(
                "files[{index}]: unsupported resource type '{resource_type}'"
            ));
        }
        if content.trim().is_empty() {
            problems.push(format!("files[{index}]: content is required"));
        }

        input_files.push(ImportFile {
            resource_type,
            content,
        });
    }

    if !problems.is_empty() {
        return Err(BulkError::validation(problems.join("; ")));
    }

    Ok(ImportDetails {
        input_files,
        results: Vec::new(),
    })
}

/// Split raw file content into resources.
///
/// Accepts a single JSON object, a JSON array of objects, or NDJSON. Each
/// element is either a resource or the reason it was rejected.
pub fn parse_import_content(content: &str) -> Vec<Result<Value, String>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| require_object(item).map_err(|e| format!("entry {i}: {e}")))
            .collect(),
        Ok(value) => vec![require_object(value)],
        Err(_) => trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<Value>(line)
                    .map_err(|e| e.to_string())
                    .and_then(require_object)
                    .map_err(|e| format!("line {}: {e}", i + 1))
            })
            .collect(),
    }
}

fn require_object(value: Value) -> Result<Value, String> {
    if value.is_object() {
        Ok(value)
    } else {
        Err("expected a JSON object".to_string())
    }
}

enum FileOutcome {
    Done(ImportFileResult),
    /// The store is unreachable; carries the message for the job.
    Systemic(String),
}

/// Processing routine for one import job.
pub async fn run_import(ctx: Arc<BulkContext>, job_id: JobId, token: CancellationToken) {
    let started = ctx.jobs().update(&job_id, |job| -> Result<_, JobError> {
        job.start()?;
        Ok(job.import().map(|d| d.input_files.clone()))
    });
    let files = match started {
        Some(Ok(Some(files))) => files,
        Some(Ok(None)) => {
            tracing::error!(job_id = %job_id, "Import runner given a non-import job");
            return;
        }
        Some(Err(e)) => {
            tracing::debug!(job_id = %job_id, error = %e, "Import job not started");
            return;
        }
        None => return,
    };

    tracing::info!(
        job_id = %job_id,
        files = files.len(),
        backend = ctx.resources.backend_name(),
        "Bulk import started"
    );

    let total = files.len();
    let mut failed_files = 0usize;
    let mut created_total = 0usize;

    for (index, file) in files.iter().enumerate() {
        if token.is_cancelled() {
            tracing::info!(
                job_id = %job_id,
                processed = index,
                "Bulk import stopped on cancellation"
            );
            return;
        }

        let result = match import_file(&ctx, index, file).await {
            FileOutcome::Done(result) => result,
            FileOutcome::Systemic(message) => {
                tracing::error!(job_id = %job_id, error = %message, "Bulk import failed");
                if let Some(Err(e)) = ctx.jobs().update(&job_id, |job| job.fail(message)) {
                    tracing::debug!(job_id = %job_id, error = %e, "Import job already terminal");
                }
                return;
            }
        };

        if !result.errors.is_empty() {
            failed_files += 1;
            tracing::warn!(
                job_id = %job_id,
                index,
                resource_type = %result.resource_type,
                errors = result.errors.len(),
                "Import file had failures"
            );
        }
        created_total += result.created;

        let progress = (index + 1) as f32 / total as f32;
        let recorded = ctx.jobs().update(&job_id, move |job| -> Result<(), JobError> {
            if let Some(import) = job.import_mut()? {
                import.results.push(result);
            }
            job.set_progress(progress)
        });
        if let Some(Err(e)) = recorded {
            tracing::info!(job_id = %job_id, error = %e, "Bulk import finished after cancellation");
            return;
        }
    }

    let summary = (failed_files > 0)
        .then(|| format!("{failed_files} of {total} files had import errors"));
    match ctx.jobs().update(&job_id, |job| job.complete(summary)) {
        Some(Ok(())) => tracing::info!(
            job_id = %job_id,
            created = created_total,
            failed_files,
            "Bulk import completed"
        ),
        Some(Err(e)) => {
            tracing::info!(job_id = %job_id, error = %e, "Bulk import finished after cancellation")
        }
        None => {}
    }
}

async fn import_file(ctx: &BulkContext, index: usize, file: &ImportFile) -> FileOutcome {
    let mut result = ImportFileResult {
        index,
        resource_type: file.resource_type.clone(),
        created: 0,
        errors: Vec::new(),
    };

    for parsed in parse_import_content(&file.content) {
        let resource = match parsed {
            Ok(resource) => resource,
            Err(e) => {
                result.errors.push(e);
                continue;
            }
        };

        match extract_resource_type(&resource) {
            Some(rt) if rt == file.resource_type => {}
            Some(rt) => {
                result.errors.push(format!(
                    "resourceType '{rt}' does not match declared type '{}'",
                    file.resource_type
                ));
                continue;
            }
            None => {
                result.errors.push("resource is missing resourceType".to_string());
                continue;
            }
        }

        match ctx.resources.create(&resource).await {
            Ok(_) => result.created += 1,
            Err(e) if e.is_systemic() => {
                return FileOutcome::Systemic(format!(
                    "Resource store unavailable while importing file {index}: {e}"
                ));
            }
            Err(e) => result.errors.push(e.to_string()),
        }
    }

    FileOutcome::Done(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(resource_type: &str, content: Value) -> ImportFileRequest {
        ImportFileRequest {
            resource_type: resource_type.to_string(),
            content,
        }
    }

    #[test]
    fn empty_file_list_is_rejected() {
        let err = validate_import_request(ImportRequest { files: Vec::new() }).unwrap_err();
        assert!(matches!(err, BulkError::Validation(_)));
    }

    #[test]
    fn every_offending_entry_is_named() {
        let err = validate_import_request(ImportRequest {
            files: vec![
                file("", json!("{}")),
                file("Patient", Value::Null),
                file("NotAType", json!("{}")),
                file("Observation", json!("{\"resourceType\":\"Observation\"}")),
            ],
        })
        .unwrap_err()
        .to_string();
        assert!(err.contains("files[0]: resourceType is required"));
        assert!(err.contains("files[1]: content is required"));
        assert!(err.contains("files[2]: unsupported resource type 'NotAType'"));
        assert!(!err.contains("files[3]"));
    }

    #[test]
    fn inline_json_content_is_stringified() {
        let details = validate_import_request(ImportRequest {
            files: vec![file("Patient", json!({"resourceType": "Patient", "id": "p1"}))],
        })
        .unwrap();
        let parsed: Value = serde_json::from_str(&details.input_files[0].content).unwrap();
        assert_eq!(parsed["id"], "p1");
    }

    #[test]
    fn parses_single_object() {
        let parsed = parse_import_content(r#"{"resourceType":"Patient"}"#);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_ok());
    }

    #[test]
    fn parses_array() {
        let parsed = parse_import_content(r#"[{"resourceType":"Patient"}, 3]"#);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_ok());
        assert!(parsed[1].as_ref().unwrap_err().starts_with("entry 1"));
    }

    #[test]
    fn parses_ndjson_with_line_errors() {
        let content = "{\"resourceType\":\"Patient\",\"id\":\"a\"}\n\nnot json\n{\"resourceType\":\"Patient\",\"id\":\"b\"}\n";
        let parsed = parse_import_content(content);
        assert_eq!(parsed.len(), 3);
        assert!(parsed[0].is_ok());
        assert!(parsed[1].as_ref().unwrap_err().starts_with("line 3"));
        assert_eq!(parsed[2].as_ref().unwrap()["id"], "b");
    }

    #[test]
    fn blank_content_yields_nothing() {
        assert!(parse_import_content("  \n ").is_empty());
    }
}
