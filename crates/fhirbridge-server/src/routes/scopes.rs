//! Scope catalog, scope validation and access checks.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    response::IntoResponse,
};
use fhirbridge_api::{ApiError, ApiResult};
use fhirbridge_auth::{
    AccessQuery, CatalogScope, ScopeContext, ScopeValidation, decide, scope_catalog,
    validate_scopes,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct CatalogResponse {
    scopes: &'static [CatalogScope],
}

/// `GET /scopes`
pub async fn catalog() -> impl IntoResponse {
    Json(CatalogResponse {
        scopes: scope_catalog(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    scopes: Vec<String>,
}

/// `POST /scopes/validate`
pub async fn validate(
    body: Result<Json<ValidateRequest>, JsonRejection>,
) -> ApiResult<Json<ScopeValidation>> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if request.scopes.is_empty() {
        return Err(ApiError::bad_request("scopes must contain at least one entry"));
    }
    Ok(Json(validate_scopes(request.scopes.as_slice())))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    granted_scopes: Option<Vec<String>>,
    resource_type: Option<String>,
    action: Option<String>,
    context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_scope: Option<String>,
}

fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{field} is required")))
}

/// `POST /access/check`
pub async fn check(
    body: Result<Json<CheckRequest>, JsonRejection>,
) -> ApiResult<Json<CheckResponse>> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let granted = request
        .granted_scopes
        .ok_or_else(|| ApiError::bad_request("grantedScopes is required"))?;
    let resource_type = required(request.resource_type, "resourceType")?;
    let action = required(request.action, "action")?;
    let context: ScopeContext = required(request.context, "context")?
        .parse()
        .map_err(|e: fhirbridge_auth::ScopeError| ApiError::bad_request(e.to_string()))?;

    let decision = decide(granted.as_slice(), &AccessQuery::new(resource_type, action, context));
    Ok(Json(CheckResponse {
        granted: decision.granted,
        matched_scope: decision.matched_scope,
    }))
}
