use std::convert::Infallible;

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{HeaderName, HeaderValue, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use fhirbridge_auth::{AccessQuery, ScopeContext, decide};
use uuid::Uuid;

use crate::operations::bulk::BulkError;
use crate::server::AppState;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

// Middleware that ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    // Preserve a caller-supplied id; otherwise generate one
    let req_id_value = match req.headers().get(&REQUEST_ID) {
        Some(value) => value.clone(),
        None => match HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            Ok(value) => value,
            Err(_) => HeaderValue::from_static("unknown"),
        },
    };

    // Add to request extensions for downstream usage (e.g., logging)
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(REQUEST_ID, req_id_value);
    res
}

/// Scopes granted to the caller, read from the configured header as a
/// space-separated list. Absent header means no grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantedScopes(pub Vec<String>);

impl GrantedScopes {
    pub fn from_header_value(raw: &str) -> Self {
        Self(raw.split_whitespace().map(str::to_string).collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl FromRequestParts<AppState> for GrantedScopes {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let scopes = parts
            .headers
            .get(state.config.auth.scopes_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(GrantedScopes::from_header_value)
            .unwrap_or_default();
        Ok(scopes)
    }
}

/// Require `$<operation>` under `context` for every resource type.
///
/// Returns `BulkError::Forbidden` naming the resource types no grant covers.
pub fn require_operation(
    granted: &GrantedScopes,
    context: ScopeContext,
    operation: &str,
    resource_types: &[String],
) -> Result<(), BulkError> {
    let action = format!("${operation}");
    let mut missing = Vec::new();

    for resource_type in resource_types {
        let query = AccessQuery::new(resource_type.as_str(), &action, context);
        let decision = decide(granted.as_slice(), &query);
        match decision.matched_scope {
            Some(scope) if decision.granted => {
                tracing::debug!(
                    resource_type = %resource_type,
                    scope = %scope,
                    "Operation authorized"
                );
            }
            _ => missing.push(resource_type.clone()),
        }
    }

    if missing.is_empty() {
        return Ok(());
    }

    tracing::info!(
        operation = %action,
        context = context.as_str(),
        missing = ?missing,
        "Bulk operation denied"
    );
    Err(BulkError::Forbidden(format!(
        "{context}/<type>.{action} required for: {}",
        missing.join(", "),
        context = context.as_str(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn header_value_splits_on_whitespace() {
        let scopes = GrantedScopes::from_header_value(" system/*.$export  patient/*.read ");
        assert_eq!(scopes.as_slice(), ["system/*.$export", "patient/*.read"]);
        assert!(GrantedScopes::from_header_value("").as_slice().is_empty());
    }

    #[test]
    fn wildcard_operation_grant_covers_all_types() {
        let granted = GrantedScopes::from_header_value("system/*.$export");
        let all = types(&["Patient", "Observation"]);
        assert!(require_operation(&granted, ScopeContext::System, "export", &all).is_ok());
    }

    #[test]
    fn system_grant_covers_patient_context() {
        let granted = GrantedScopes::from_header_value("system/*.$export");
        let patient = types(&["Patient"]);
        assert!(require_operation(&granted, ScopeContext::Patient, "export", &patient).is_ok());
    }

    #[test]
    fn denial_names_uncovered_types() {
        let granted = GrantedScopes::from_header_value("patient/Patient.$export system/*.read");
        let err = require_operation(
            &granted,
            ScopeContext::Patient,
            "export",
            &types(&["Patient", "Observation", "Condition"]),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, BulkError::Forbidden(_)));
        assert!(message.contains("Observation, Condition"));
        assert!(!message.contains("Patient,"));
    }

    #[test]
    fn read_grant_never_authorizes_import() {
        let granted = GrantedScopes::from_header_value("system/*.*");
        let patient = types(&["Patient"]);
        assert!(require_operation(&granted, ScopeContext::System, "import", &patient).is_err());
    }
}
