//! Bulk export
//!
//! - Patient: export the patient compartment subset, optionally for given patients
//! - System: export every supported resource type
//! - Group: export data for the members of a Group resource
//!
//! Processing pages through the resource store one type at a time and writes
//! NDJSON files. Cancellation is checked between pages and between types.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use fhirbridge_storage::{ResourceStore, SearchParams, StorageError};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::resource_types::{self, PATIENT_RESOURCE_TYPES, SUPPORTED_RESOURCE_TYPES};
use super::writer::{NdjsonWriter, NdjsonWriterError, WrittenFile};
use super::{BulkContext, BulkError, BulkSettings, cancel_result};
use crate::jobs::{
    CancelOutcome, ExportDetails, ExportIssue, ExportLevel, JobError, JobId, JobRecord, OutputFile,
};

/// Body of `POST export/{level}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    #[serde(default)]
    pub resource_types: Option<Vec<String>>,
    #[serde(default)]
    pub patient_ids: Option<Vec<String>>,
    /// RFC 3339 timestamp; only resources updated at or after it are exported.
    #[serde(default)]
    pub since: Option<String>,
    /// Required for group-level exports.
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Validates export commands and tracks export jobs.
#[derive(Clone)]
pub struct ExportOrchestrator {
    ctx: Arc<BulkContext>,
}

impl ExportOrchestrator {
    pub fn new(ctx: Arc<BulkContext>) -> Self {
        Self { ctx }
    }

    /// Validate, store a `Pending` job and schedule it. Never blocks on
    /// processing.
    pub fn create_export_job(
        &self,
        level: ExportLevel,
        request: ExportRequest,
    ) -> Result<JobRecord, BulkError> {
        let details = self.prepare(level, request)?;
        Ok(self.submit(details))
    }

    /// Validate a request into job details without creating a job. Callers
    /// that gate on the resolved resource types use this before [`submit`].
    ///
    /// [`submit`]: Self::submit
    pub fn prepare(
        &self,
        level: ExportLevel,
        request: ExportRequest,
    ) -> Result<ExportDetails, BulkError> {
        validate_export_request(level, request)
    }

    /// Store validated details as a `Pending` job and schedule processing.
    pub fn submit(&self, details: ExportDetails) -> JobRecord {
        let level = details.level;
        let job = JobRecord::new_export(details);
        let job_id = job.job_id;

        self.ctx.jobs().put(job.clone());
        tracing::info!(
            job_id = %job_id,
            level = %level,
            resource_types = ?job.export().map(|d| &d.resource_types),
            "Bulk export job created"
        );

        let ctx = self.ctx.clone();
        self.ctx
            .runner
            .spawn(job_id, move |token| run_export(ctx, job_id, token));

        job
    }

    pub fn get_job(&self, id: &JobId) -> Option<JobRecord> {
        self.ctx.get_job_where(id, JobRecord::is_export)
    }

    pub fn list_jobs(&self) -> Vec<JobRecord> {
        self.ctx.jobs().list_matching(JobRecord::is_export)
    }

    /// True if the job existed, was not terminal, and is now `Cancelled`.
    pub fn cancel_job(&self, id: &JobId) -> bool {
        self.cancel(id).is_cancelled()
    }

    /// Cancel with the reason a cancel was refused.
    pub fn cancel(&self, id: &JobId) -> CancelOutcome {
        self.ctx.cancel_job_where(id, JobRecord::is_export)
    }

    pub fn cancel_or_error(&self, id: &JobId) -> Result<JobRecord, BulkError> {
        cancel_result(id, self.cancel(id))
    }

    pub fn settings(&self) -> &BulkSettings {
        &self.ctx.settings
    }
}

fn validate_export_request(
    level: ExportLevel,
    request: ExportRequest,
) -> Result<ExportDetails, BulkError> {
    let resource_types = match request.resource_types.filter(|types| !types.is_empty()) {
        Some(requested) => {
            let requested: Vec<String> = requested
                .into_iter()
                .map(|t| t.trim().to_string())
                .collect();
            let bad = resource_types::unsupported(requested.iter().map(String::as_str));
            if !bad.is_empty() {
                return Err(BulkError::UnsupportedResourceTypes(bad));
            }
            resource_types::dedup_preserving_order(requested)
        }
        None => {
            let defaults = match level {
                ExportLevel::Patient | ExportLevel::Group => PATIENT_RESOURCE_TYPES,
                ExportLevel::System => SUPPORTED_RESOURCE_TYPES,
            };
            defaults.iter().map(|t| t.to_string()).collect()
        }
    };

    let since = request
        .since
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    BulkError::validation(format!("Invalid since timestamp '{s}': {e}"))
                })
        })
        .transpose()?;

    let patient_ids = request
        .patient_ids
        .map(|ids| {
            ids.into_iter()
                .map(|id| id.trim().trim_start_matches("Patient/").to_string())
                .filter(|id| !id.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|ids| !ids.is_empty());

    let group_id = match level {
        ExportLevel::Group => {
            let id = request
                .group_id
                .map(|g| g.trim().trim_start_matches("Group/").to_string())
                .filter(|g| !g.is_empty())
                .ok_or_else(|| {
                    BulkError::validation("groupId is required for group-level export")
                })?;
            Some(id)
        }
        ExportLevel::Patient | ExportLevel::System => None,
    };

    Ok(ExportDetails {
        level,
        resource_types,
        patient_ids,
        group_id,
        since,
        output: Vec::new(),
        errors: Vec::new(),
    })
}

/// Why an export stopped early.
enum ExportStop {
    Cancelled,
    Failed(String),
}

enum TypeExportError {
    Storage(StorageError),
    Writer(NdjsonWriterError),
    Cancelled,
}

/// Processing routine for one export job.
pub async fn run_export(ctx: Arc<BulkContext>, job_id: JobId, token: CancellationToken) {
    let started = ctx.jobs().update(&job_id, |job| -> Result<_, JobError> {
        job.start()?;
        Ok(job.export().cloned())
    });
    let details = match started {
        Some(Ok(Some(details))) => details,
        Some(Ok(None)) => {
            tracing::error!(job_id = %job_id, "Export runner given a non-export job");
            return;
        }
        Some(Err(e)) => {
            tracing::debug!(job_id = %job_id, error = %e, "Export job not started");
            return;
        }
        None => return,
    };

    tracing::info!(
        job_id = %job_id,
        level = %details.level,
        backend = ctx.resources.backend_name(),
        "Bulk export started"
    );

    match export_all(&ctx, job_id, &details, &token).await {
        Ok((output, errors)) => {
            let summary = (!errors.is_empty()).then(|| {
                format!(
                    "{} of {} resource types failed to export",
                    errors.len(),
                    details.resource_types.len()
                )
            });
            let files = output.len();
            let failed_types = errors.len();
            let result = ctx.jobs().update(&job_id, move |job| -> Result<(), JobError> {
                if let Some(export) = job.export_mut()? {
                    export.output = output;
                    export.errors = errors;
                }
                job.complete(summary)
            });
            match result {
                Some(Ok(())) => tracing::info!(
                    job_id = %job_id,
                    output_files = files,
                    failed_types,
                    "Bulk export completed"
                ),
                Some(Err(e)) => {
                    tracing::info!(
                        job_id = %job_id,
                        error = %e,
                        "Bulk export finished after cancellation"
                    );
                    remove_job_dir(&ctx.settings, job_id).await;
                }
                None => {}
            }
        }
        Err(ExportStop::Cancelled) => {
            tracing::info!(job_id = %job_id, "Bulk export stopped on cancellation");
            remove_job_dir(&ctx.settings, job_id).await;
        }
        Err(ExportStop::Failed(message)) => {
            tracing::error!(job_id = %job_id, error = %message, "Bulk export failed");
            if let Some(Err(e)) = ctx.jobs().update(&job_id, |job| job.fail(message)) {
                tracing::debug!(job_id = %job_id, error = %e, "Export job already terminal");
            }
        }
    }
}

async fn export_all(
    ctx: &BulkContext,
    job_id: JobId,
    details: &ExportDetails,
    token: &CancellationToken,
) -> Result<(Vec<OutputFile>, Vec<ExportIssue>), ExportStop> {
    let settings = &ctx.settings;
    let patients = resolve_patients(ctx.resources.as_ref(), details).await?;

    let mut writer =
        NdjsonWriter::new(&settings.export_path, job_id, settings.max_resources_per_file)
            .await
            .map_err(|e| {
                ExportStop::Failed(format!("Failed to prepare export directory: {e}"))
            })?;

    let mut errors = Vec::new();
    let total = details.resource_types.len();

    for (index, resource_type) in details.resource_types.iter().enumerate() {
        if token.is_cancelled() {
            return Err(ExportStop::Cancelled);
        }

        match export_resource_type(
            ctx.resources.as_ref(),
            &mut writer,
            resource_type,
            patients.as_deref(),
            details.since,
            settings.batch_size,
            token,
        )
        .await
        {
            Ok(count) => {
                tracing::debug!(
                    job_id = %job_id,
                    resource_type = %resource_type,
                    count,
                    "Exported resource type"
                );
            }
            Err(TypeExportError::Cancelled) => return Err(ExportStop::Cancelled),
            Err(TypeExportError::Storage(e)) if e.is_systemic() => {
                return Err(ExportStop::Failed(format!(
                    "Resource store unavailable while exporting {resource_type}: {e}"
                )));
            }
            Err(TypeExportError::Storage(e)) => {
                tracing::warn!(
                    job_id = %job_id,
                    resource_type = %resource_type,
                    error = %e,
                    "Failed to export resource type"
                );
                errors.push(ExportIssue {
                    resource_type: resource_type.clone(),
                    message: e.to_string(),
                });
            }
            Err(TypeExportError::Writer(e)) => {
                return Err(ExportStop::Failed(format!(
                    "Failed to write {resource_type} output: {e}"
                )));
            }
        }

        let progress = (index + 1) as f32 / total as f32;
        ctx.jobs().update(&job_id, |job| job.set_progress(progress));
    }

    if token.is_cancelled() {
        return Err(ExportStop::Cancelled);
    }

    let files = writer
        .finish()
        .await
        .map_err(|e| ExportStop::Failed(format!("Failed to finish writing: {e}")))?;

    Ok((build_manifest(settings, job_id, &details.resource_types, files), errors))
}

/// Patient filter for the job: explicit ids, Group members, or both intersected.
async fn resolve_patients(
    store: &dyn ResourceStore,
    details: &ExportDetails,
) -> Result<Option<Vec<String>>, ExportStop> {
    let Some(group_id) = details.group_id.as_deref() else {
        return Ok(details.patient_ids.clone());
    };

    let group = store
        .read("Group", group_id)
        .await
        .map_err(|e| ExportStop::Failed(format!("Failed to read Group/{group_id}: {e}")))?
        .ok_or_else(|| ExportStop::Failed(format!("Group/{group_id} not found")))?;

    let members = group_member_patient_ids(&group.resource);
    Ok(Some(match &details.patient_ids {
        Some(ids) => members.into_iter().filter(|m| ids.contains(m)).collect(),
        None => members,
    }))
}

/// `Patient/<id>` references from `member[].entity.reference`.
pub(crate) fn group_member_patient_ids(group: &Value) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for member in group
        .get("member")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(id) = member
            .get("entity")
            .and_then(|e| e.get("reference"))
            .and_then(Value::as_str)
            .and_then(|r| r.strip_prefix("Patient/"))
            && !ids.iter().any(|seen| seen == id)
        {
            ids.push(id.to_string());
        }
    }
    ids
}

fn search_params_for(
    resource_type: &str,
    patients: Option<&[String]>,
    since: Option<DateTime<Utc>>,
) -> SearchParams {
    let mut params = SearchParams::new();
    if let Some(since) = since {
        params = params.with_param(
            "_lastUpdated",
            format!("ge{}", since.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
    }
    if let Some(ids) = patients {
        params = if resource_type == "Patient" {
            params.with_param("_id", ids.join(","))
        } else {
            let refs: Vec<String> = ids.iter().map(|id| format!("Patient/{id}")).collect();
            params.with_param("patient", refs.join(","))
        };
    }
    params
}

async fn export_resource_type(
    store: &dyn ResourceStore,
    writer: &mut NdjsonWriter,
    resource_type: &str,
    patients: Option<&[String]>,
    since: Option<DateTime<Utc>>,
    batch_size: u32,
    token: &CancellationToken,
) -> Result<usize, TypeExportError> {
    // A patient filter that resolved to nobody matches nothing.
    if patients.is_some_and(<[String]>::is_empty) {
        return Ok(0);
    }

    let base = search_params_for(resource_type, patients, since);
    let mut total = 0usize;
    let mut offset = 0u32;

    loop {
        if token.is_cancelled() {
            return Err(TypeExportError::Cancelled);
        }

        let params = base.clone().with_count(batch_size).with_offset(offset);
        let result = store
            .search(resource_type, &params)
            .await
            .map_err(TypeExportError::Storage)?;

        let count = result.entries.len();
        if count == 0 {
            break;
        }

        for entry in &result.entries {
            writer
                .write_resource(resource_type, &entry.resource)
                .await
                .map_err(TypeExportError::Writer)?;
        }

        total += count;
        offset = offset.saturating_add(u32::try_from(count).unwrap_or(u32::MAX));

        // Pages may be shorter than `batch_size`; the store reports whether more follow.
        if !result.has_more {
            break;
        }
    }

    Ok(total)
}

fn build_manifest(
    settings: &BulkSettings,
    job_id: JobId,
    order: &[String],
    mut files: HashMap<String, Vec<WrittenFile>>,
) -> Vec<OutputFile> {
    let mut output = Vec::new();
    for resource_type in order {
        for file in files.remove(resource_type).unwrap_or_default() {
            output.push(OutputFile {
                resource_type: resource_type.clone(),
                url: format!(
                    "{}/export/files/{}/{}",
                    settings.base_url,
                    job_id,
                    file.file_name()
                ),
                count: file.count,
            });
        }
    }
    output
}

async fn remove_job_dir(settings: &BulkSettings, job_id: JobId) {
    let dir = settings.export_path.join(job_id.to_string());
    if let Err(e) = tokio::fs::remove_dir_all(&dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(job_id = %job_id, error = %e, "Failed to remove export directory");
    }
}
