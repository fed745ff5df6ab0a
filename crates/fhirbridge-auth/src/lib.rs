//! # fhirbridge-auth
//!
//! SMART on FHIR authorization primitives for the FhirBridge gateway.
//!
//! This crate provides:
//! - Scope parsing for `context/ResourceType.permission` and
//!   `context/ResourceType.$operation` grants
//! - An access decision engine evaluating a requested
//!   (resource type, action, context) triple against granted scopes
//! - The predefined scope catalog
//!
//! Everything here is pure and synchronous; no I/O, no shared state.
//!
//! ## Modules
//!
//! - [`smart`] - SMART on FHIR scopes and access decisions

pub mod smart;

pub use smart::{
    AccessDecision, AccessQuery, CatalogScope, ParsedScope, Permission, ResourceType,
    ScopeAction, ScopeContext, ScopeError, ScopeValidation, SmartScope, check_access, decide,
    parse_scope, scope_catalog, validate_scopes,
};
