//! SMART on FHIR scope handling.
//!
//! - [`scopes`] - scope grammar and parsing
//! - [`access`] - access decisions over sets of granted scopes
//! - [`catalog`] - the predefined scope table advertised to clients

pub mod access;
pub mod catalog;
pub mod scopes;

pub use access::{
    AccessDecision, AccessQuery, InvalidScope, RequestedAction, ScopeValidation, check_access,
    decide, validate_scopes,
};
pub use catalog::{CatalogScope, scope_catalog};
pub use scopes::{
    ParsedScope, Permission, ResourceType, ScopeAction, ScopeContext, ScopeError, SmartScope,
    parse_scope,
};
