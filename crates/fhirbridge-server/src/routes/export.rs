//! Bulk export endpoints.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use fhirbridge_api::{ApiError, ApiResult, NDJSON_CONTENT_TYPE};
use fhirbridge_auth::{AccessQuery, ScopeContext, check_access};

use super::{JobList, accepted, cancelled, job_status_response, parse_job_id};
use crate::jobs::ExportLevel;
use crate::middleware::{GrantedScopes, require_operation};
use crate::operations::bulk::ExportRequest;
use crate::server::AppState;

/// `POST /export/{level}`
pub async fn create_job(
    State(state): State<AppState>,
    Path(level): Path<String>,
    scopes: GrantedScopes,
    body: Bytes,
) -> ApiResult<Response> {
    let level: ExportLevel = level.parse().map_err(ApiError::bad_request)?;
    let request: ExportRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ExportRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid export request body: {e}")))?
    };

    let details = state.export.prepare(level, request)?;

    if state.config.auth.enforce_scopes {
        let context = match level {
            ExportLevel::Patient => ScopeContext::Patient,
            ExportLevel::System | ExportLevel::Group => ScopeContext::System,
        };
        // A Group grant covers every type exported for that group.
        let group_grant = level == ExportLevel::Group
            && check_access(
                scopes.as_slice(),
                &AccessQuery::new("Group", "$export", ScopeContext::System),
            );
        if !group_grant {
            require_operation(&scopes, context, "export", &details.resource_types)?;
        }
    }

    let job = state.export.submit(details);
    let status_url = format!("{}/export/status/{}", state.base_url, job.job_id);
    Ok(accepted(&job, status_url))
}

/// `GET /export/status/{job_id}`
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_job_id(&job_id)?;
    let job = state
        .export
        .get_job(&id)
        .ok_or_else(|| ApiError::not_found(format!("Job not found: {id}")))?;
    Ok(job_status_response(job))
}

/// `DELETE /export/status/{job_id}`
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_job_id(&job_id)?;
    let job = state.export.cancel_or_error(&id)?;
    Ok(cancelled(&job))
}

/// `GET /export/jobs`
pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    JobList::new(state.export.list_jobs())
}

/// `GET /export/files/{job_id}/{file_name}`
pub async fn download_file(
    State(state): State<AppState>,
    Path((job_id, file_name)): Path<(String, String)>,
) -> ApiResult<Response> {
    let id = parse_job_id(&job_id)?;
    if !is_safe_file_name(&file_name) {
        return Err(ApiError::not_found(format!("File not found: {file_name}")));
    }

    let path = state
        .export
        .settings()
        .export_path
        .join(id.to_string())
        .join(&file_name);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("File not found: {file_name}")));
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read export file");
            return Err(ApiError::internal("Failed to read export file"));
        }
    };

    let mut response = bytes.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    Ok(response)
}

/// Plain `<name>.ndjson` names only; no separators or parent references.
fn is_safe_file_name(name: &str) -> bool {
    name.ends_with(".ndjson")
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}
