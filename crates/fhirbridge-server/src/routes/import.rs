//! Bulk import endpoints.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use fhirbridge_api::{ApiError, ApiResult};
use fhirbridge_auth::ScopeContext;

use super::{JobList, accepted, cancelled, job_status_response, parse_job_id};
use crate::middleware::{GrantedScopes, require_operation};
use crate::operations::bulk::{ImportRequest, resource_types::dedup_preserving_order};
use crate::server::AppState;

/// `POST /import`
pub async fn create_job(
    State(state): State<AppState>,
    scopes: GrantedScopes,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) =
        body.map_err(|e| ApiError::bad_request(format!("Invalid import request body: {e}")))?;
    let details = state.import.prepare(request)?;

    if state.config.auth.enforce_scopes {
        let types = dedup_preserving_order(
            details
                .input_files
                .iter()
                .map(|f| f.resource_type.clone())
                .collect(),
        );
        require_operation(&scopes, ScopeContext::System, "import", &types)?;
    }

    let job = state.import.submit(details);
    let status_url = format!("{}/import/status/{}", state.base_url, job.job_id);
    Ok(accepted(&job, status_url))
}

/// `GET /import/status/{job_id}`
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_job_id(&job_id)?;
    let job = state
        .import
        .get_job(&id)
        .ok_or_else(|| ApiError::not_found(format!("Job not found: {id}")))?;
    Ok(job_status_response(job))
}

/// `DELETE /import/status/{job_id}`
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_job_id(&job_id)?;
    let job = state.import.cancel_or_error(&id)?;
    Ok(cancelled(&job))
}

/// `GET /import/jobs`
pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    JobList::new(state.import.list_jobs())
}
