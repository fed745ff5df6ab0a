//! SMART on FHIR scope parsing.
//!
//! A resource scope has the shape `context/ResourceType.permission` or
//! `context/ResourceType.$operation`:
//!
//! - **Context**: `patient`, `user`, or `system`
//! - **ResourceType**: a FHIR resource type (e.g., `Patient`, `Observation`) or `*`
//! - **Permission**: `read`, `write`, or `*`
//! - **Operation**: a named operation such as `$export`, stored without the `$`
//!
//! Resource types are not checked against any list here; that happens when a
//! bulk job is created.
//!
//! # Examples
//!
//! ```
//! use fhirbridge_auth::smart::scopes::{
//!     Permission, ResourceType, ScopeAction, ScopeContext, SmartScope,
//! };
//!
//! let scope = SmartScope::parse("system/*.$export").unwrap();
//! assert_eq!(scope.context, ScopeContext::System);
//! assert_eq!(scope.resource_type, ResourceType::Wildcard);
//! assert_eq!(scope.action, ScopeAction::Operation("export".to_string()));
//!
//! let scope = SmartScope::parse("user/Patient.write").unwrap();
//! assert_eq!(scope.action, ScopeAction::Permission(Permission::Write));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during scope parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// The scope string is empty.
    #[error("Empty scope string")]
    Empty,

    /// The scope string does not follow `context/ResourceType.permission`.
    #[error("Invalid scope format: {0}")]
    InvalidFormat(String),

    /// The context (patient/user/system) is invalid.
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    /// The resource type segment is empty.
    #[error("Missing resource type in scope: {0}")]
    EmptyResourceType(String),

    /// The permission is not one of read, write or *.
    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    /// A `$` was given without an operation name.
    #[error("Missing operation name in scope: {0}")]
    EmptyOperation(String),
}

// ============================================================================
// Scope Context
// ============================================================================

/// The context in which a scope applies.
///
/// - `patient/*` - Access limited to a specific patient's data
/// - `user/*` - Access based on the authenticated user's permissions
/// - `system/*` - Backend service access (no user context)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeContext {
    Patient,
    User,
    System,
}

impl ScopeContext {
    /// Returns the string representation of the context.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::User => "user",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScopeContext {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Self::Patient),
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            other => Err(ScopeError::InvalidContext(other.to_string())),
        }
    }
}

// ============================================================================
// Resource Type
// ============================================================================

/// The FHIR resource type targeted by a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A specific FHIR resource type (e.g., "Patient", "Observation").
    Specific(String),

    /// Wildcard (*) matching all resource types.
    Wildcard,
}

impl ResourceType {
    /// Returns true if this grant covers the given resource type.
    #[must_use]
    pub fn matches(&self, resource_type: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Specific(rt) => rt == resource_type,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specific(s) => write!(f, "{}", s),
            Self::Wildcard => write!(f, "*"),
        }
    }
}

// ============================================================================
// Permission / Operation
// ============================================================================

/// Ordinary action permission carried by a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "write")]
    Write,
    /// `*` - every ordinary action.
    #[serde(rename = "*")]
    All,
}

impl Permission {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::All => "*",
        }
    }

    /// Returns true if this permission authorizes the requested action.
    ///
    /// `*` covers any ordinary action; `read` and `write` only themselves.
    #[must_use]
    pub fn allows(&self, action: &str) -> bool {
        match self {
            Self::All => true,
            other => other.as_str() == action,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "*" => Ok(Self::All),
            other => Err(ScopeError::InvalidPermission(other.to_string())),
        }
    }
}

/// What a scope grants: ordinary actions or one named operation, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeAction {
    Permission(Permission),
    /// Operation name without the leading `$`.
    Operation(String),
}

impl fmt::Display for ScopeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permission(p) => write!(f, "{}", p),
            Self::Operation(op) => write!(f, "${}", op),
        }
    }
}

// ============================================================================
// Smart Scope
// ============================================================================

/// A parsed SMART resource scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SmartScope {
    /// The scope context (patient, user, or system).
    pub context: ScopeContext,
    /// The target resource type or wildcard.
    pub resource_type: ResourceType,
    /// The granted permission or operation.
    pub action: ScopeAction,
}

impl SmartScope {
    /// Parse a resource scope string.
    ///
    /// Format: `context/ResourceType.permission` or `context/ResourceType.$operation`
    ///
    /// # Examples
    ///
    /// ```
    /// use fhirbridge_auth::smart::scopes::{ScopeError, SmartScope};
    ///
    /// assert!(SmartScope::parse("patient/*.read").is_ok());
    /// assert!(matches!(SmartScope::parse("invalid"), Err(ScopeError::InvalidFormat(_))));
    /// assert!(matches!(SmartScope::parse("admin/*.read"), Err(ScopeError::InvalidContext(_))));
    /// ```
    pub fn parse(s: &str) -> Result<Self, ScopeError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScopeError::Empty);
        }

        // Split by '/' for context
        let (context_str, rest) = s
            .split_once('/')
            .ok_or_else(|| ScopeError::InvalidFormat(s.to_string()))?;

        // Split by '.' for resource type and permission
        let (resource_str, action_str) = rest
            .split_once('.')
            .ok_or_else(|| ScopeError::InvalidFormat(s.to_string()))?;

        let context = ScopeContext::from_str(context_str)?;

        let resource_type = match resource_str {
            "" => return Err(ScopeError::EmptyResourceType(s.to_string())),
            "*" => ResourceType::Wildcard,
            other => ResourceType::Specific(other.to_string()),
        };

        let action = match action_str.strip_prefix('$') {
            Some("") => return Err(ScopeError::EmptyOperation(s.to_string())),
            Some(op) => ScopeAction::Operation(op.to_string()),
            None => ScopeAction::Permission(Permission::from_str(action_str)?),
        };

        Ok(Self {
            context,
            resource_type,
            action,
        })
    }

    /// Returns the permission, if this is a permission scope.
    #[must_use]
    pub fn permission(&self) -> Option<Permission> {
        match &self.action {
            ScopeAction::Permission(p) => Some(*p),
            ScopeAction::Operation(_) => None,
        }
    }

    /// Returns the operation name (without `$`), if this is an operation scope.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        match &self.action {
            ScopeAction::Permission(_) => None,
            ScopeAction::Operation(op) => Some(op),
        }
    }
}

impl FromStr for SmartScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SmartScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.context, self.resource_type, self.action)
    }
}

// ============================================================================
// Flat view
// ============================================================================

/// Flattened parse outcome, as reported over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedScope {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ScopeContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<Permission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse a scope string into its flat representation. Never fails.
#[must_use]
pub fn parse_scope(s: &str) -> ParsedScope {
    match SmartScope::parse(s) {
        Ok(scope) => ParsedScope {
            valid: true,
            context: Some(scope.context),
            resource_type: Some(scope.resource_type.to_string()),
            permission: scope.permission(),
            operation: scope.operation().map(str::to_string),
            error: None,
        },
        Err(e) => ParsedScope {
            valid: false,
            context: None,
            resource_type: None,
            permission: None,
            operation: None,
            error: Some(e.to_string()),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================
