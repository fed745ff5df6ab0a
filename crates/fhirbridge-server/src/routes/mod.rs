//! API routes modules.
//!
//! Organized by functionality:
//! - `export` - bulk export commands, status polling and file download
//! - `import` - bulk import commands and status polling
//! - `scopes` - scope catalog, scope validation and access checks

pub mod export;
pub mod import;
pub mod scopes;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fhirbridge_api::ApiError;
use serde::Serialize;
use serde_json::json;

use crate::jobs::{JobId, JobRecord};
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/export/jobs", get(export::list_jobs))
        .route(
            "/export/status/{job_id}",
            get(export::job_status).delete(export::cancel_job),
        )
        .route("/export/files/{job_id}/{file_name}", get(export::download_file))
        .route("/export/{level}", post(export::create_job))
        .route("/import", post(import::create_job))
        .route("/import/jobs", get(import::list_jobs))
        .route(
            "/import/status/{job_id}",
            get(import::job_status).delete(import::cancel_job),
        )
        .route("/scopes", get(scopes::catalog))
        .route("/scopes/validate", post(scopes::validate))
        .route("/access/check", post(scopes::check))
}

pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Job not found: {raw}")))
}

#[derive(Serialize)]
pub(crate) struct JobList {
    jobs: Vec<JobRecord>,
}

impl JobList {
    pub(crate) fn new(jobs: Vec<JobRecord>) -> Json<Self> {
        Json(Self { jobs })
    }
}

/// `202 Accepted` with `Content-Location` for a newly created job.
pub(crate) fn accepted(job: &JobRecord, status_url: String) -> Response {
    let body = json!({
        "jobId": job.job_id,
        "status": job.status,
        "statusUrl": status_url,
    });
    let mut response = (StatusCode::ACCEPTED, Json(body)).into_response();
    if let Ok(location) = HeaderValue::from_str(&status_url) {
        response.headers_mut().insert(header::CONTENT_LOCATION, location);
    }
    response
}

/// `200` for terminal jobs, `202` with `X-Progress` while the job runs.
pub(crate) fn job_status_response(job: JobRecord) -> Response {
    if job.is_terminal() {
        return (StatusCode::OK, Json(job)).into_response();
    }

    let progress = format!("{} ({:.0}%)", job.status, job.progress * 100.0);
    let mut response = (StatusCode::ACCEPTED, Json(job)).into_response();
    if let Ok(value) = HeaderValue::from_str(&progress) {
        response.headers_mut().insert("x-progress", value);
    }
    response
}

/// Body returned after a successful cancel.
pub(crate) fn cancelled(job: &JobRecord) -> Json<serde_json::Value> {
    Json(json!({
        "jobId": job.job_id,
        "status": job.status,
    }))
}
