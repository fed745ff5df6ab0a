//! Access decisions over sets of granted SMART scopes.
//!
//! A request is described by an [`AccessQuery`] (resource type, action,
//! context). Each granted scope string is parsed; unparsable grants are
//! ignored. The query is authorized if any one grant matches on all three
//! axes:
//!
//! 1. the grant's context equals the query context, or the grant is a
//!    `system` grant (system grants apply under every context)
//! 2. the grant's resource type is `*` or equal to the requested type
//! 3. for ordinary actions, the grant's permission is `*` or equal to the
//!    action; for operations (`$export`), the grant names the same operation
//!
//! Permission grants never satisfy an operation request and operation grants
//! never satisfy an ordinary action.

use serde::Serialize;

use super::scopes::{ScopeAction, ScopeContext, SmartScope};

// ============================================================================
// Query
// ============================================================================

/// The action half of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedAction {
    /// Ordinary action such as `read` or `write`.
    Action(String),
    /// Named operation, stored without the leading `$`.
    Operation(String),
}

impl RequestedAction {
    /// Interpret a raw action string. A leading `$` marks an operation.
    #[must_use]
    pub fn parse(action: &str) -> Self {
        match action.strip_prefix('$') {
            Some(op) => Self::Operation(op.to_string()),
            None => Self::Action(action.to_string()),
        }
    }
}

/// A (resource type, action, context) triple checked against granted scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessQuery {
    pub resource_type: String,
    pub action: RequestedAction,
    pub context: ScopeContext,
}

impl AccessQuery {
    /// Build a query. `action` may be an ordinary action (`read`) or an
    /// operation (`$export`).
    pub fn new(
        resource_type: impl Into<String>,
        action: impl AsRef<str>,
        context: ScopeContext,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            action: RequestedAction::parse(action.as_ref()),
            context,
        }
    }

    /// Returns true if the parsed grant authorizes this query.
    #[must_use]
    pub fn is_satisfied_by(&self, grant: &SmartScope) -> bool {
        let context_ok = grant.context == self.context || grant.context == ScopeContext::System;
        if !context_ok || !grant.resource_type.matches(&self.resource_type) {
            return false;
        }

        match (&grant.action, &self.action) {
            (ScopeAction::Permission(p), RequestedAction::Action(a)) => p.allows(a),
            (ScopeAction::Operation(granted), RequestedAction::Operation(requested)) => {
                granted == requested
            }
            _ => false,
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Outcome of an access check, including which grant matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub granted: bool,
    /// The first granted scope that authorized the query.
    pub matched_scope: Option<String>,
}

impl AccessDecision {
    fn deny() -> Self {
        Self {
            granted: false,
            matched_scope: None,
        }
    }
}

/// Evaluate a query and report the authorizing scope, if any.
pub fn decide<S: AsRef<str>>(granted: &[S], query: &AccessQuery) -> AccessDecision {
    for raw in granted {
        let raw = raw.as_ref();
        let Ok(scope) = SmartScope::parse(raw) else {
            tracing::trace!(scope = %raw, "ignoring unparsable granted scope");
            continue;
        };
        if query.is_satisfied_by(&scope) {
            return AccessDecision {
                granted: true,
                matched_scope: Some(raw.trim().to_string()),
            };
        }
    }
    AccessDecision::deny()
}

/// Returns true if any granted scope authorizes the query.
pub fn check_access<S: AsRef<str>>(granted: &[S], query: &AccessQuery) -> bool {
    decide(granted, query).granted
}

// ============================================================================
// Validation
// ============================================================================

/// A scope string that failed to parse, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidScope {
    pub scope: String,
    pub reason: String,
}

/// Partition of a scope list into parsable and unparsable entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeValidation {
    pub all_valid: bool,
    pub valid_scopes: Vec<String>,
    pub invalid_scopes: Vec<InvalidScope>,
}

/// Validate every scope string, preserving input order within each partition.
pub fn validate_scopes<S: AsRef<str>>(scopes: &[S]) -> ScopeValidation {
    let mut valid_scopes = Vec::new();
    let mut invalid_scopes = Vec::new();

    for raw in scopes {
        let raw = raw.as_ref();
        match SmartScope::parse(raw) {
            Ok(_) => valid_scopes.push(raw.to_string()),
            Err(e) => invalid_scopes.push(InvalidScope {
                scope: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    ScopeValidation {
        all_valid: invalid_scopes.is_empty(),
        valid_scopes,
        invalid_scopes,
    }
}
