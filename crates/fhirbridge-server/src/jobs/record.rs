//! Job records for bulk export and import.
//!
//! A [`JobRecord`] is created in `Pending` and moves forward through the
//! state machine below. Terminal records reject every mutation.
//!
//! ```text
//! Pending --(worker picks up)--> Processing --(success)--> Completed
//! Pending/Processing --(unrecoverable error)--> Failed
//! Pending/Processing --(cancel request)--> Cancelled
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by job state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Invalid job status transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Process-unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, Failed and Cancelled are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Export scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportLevel {
    Patient,
    System,
    Group,
}

impl fmt::Display for ExportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportLevel::Patient => write!(f, "patient"),
            ExportLevel::System => write!(f, "system"),
            ExportLevel::Group => write!(f, "group"),
        }
    }
}

impl FromStr for ExportLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "patient" => Ok(Self::Patient),
            "system" => Ok(Self::System),
            "group" => Ok(Self::Group),
            _ => Err(format!(
                "Unknown export level '{s}'; expected patient, system or group"
            )),
        }
    }
}

/// Manifest entry for one NDJSON output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub url: String,
    pub count: usize,
}

/// A resource type whose export did not succeed; the rest of the job went on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportIssue {
    pub resource_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDetails {
    pub level: ExportLevel,
    pub resource_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub output: Vec<OutputFile>,
    pub errors: Vec<ExportIssue>,
}

/// One file submitted for import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFile {
    pub resource_type: String,
    /// Raw JSON or NDJSON; omitted from job snapshots.
    #[serde(skip_serializing)]
    pub content: String,
}

/// Outcome of importing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFileResult {
    pub index: usize,
    pub resource_type: String,
    pub created: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDetails {
    pub input_files: Vec<ImportFile>,
    pub results: Vec<ImportFileResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobKind {
    Export(ExportDetails),
    Import(ImportDetails),
}

/// One bulk unit of work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(flatten)]
    pub kind: JobKind,
    pub request_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// 0.0 to 1.0, informational
    pub progress: f32,
}

impl JobRecord {
    fn new(kind: JobKind) -> Self {
        Self {
            job_id: JobId::new(),
            status: JobStatus::Pending,
            kind,
            request_time: Utc::now(),
            completed_time: None,
            error_message: None,
            progress: 0.0,
        }
    }

    pub fn new_export(details: ExportDetails) -> Self {
        Self::new(JobKind::Export(details))
    }

    pub fn new_import(details: ImportDetails) -> Self {
        Self::new(JobKind::Import(details))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_export(&self) -> bool {
        matches!(self.kind, JobKind::Export(_))
    }

    pub fn is_import(&self) -> bool {
        matches!(self.kind, JobKind::Import(_))
    }

    pub fn export(&self) -> Option<&ExportDetails> {
        match &self.kind {
            JobKind::Export(details) => Some(details),
            JobKind::Import(_) => None,
        }
    }

    pub fn import(&self) -> Option<&ImportDetails> {
        match &self.kind {
            JobKind::Import(details) => Some(details),
            JobKind::Export(_) => None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_time = Some(Utc::now());
        }
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), JobError> {
        if self.is_terminal() {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: self.status,
            });
        }
        Ok(())
    }

    /// Pending -> Processing
    pub fn start(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Processing)
    }

    /// Processing -> Completed. A partial-failure summary may be attached.
    pub fn complete(&mut self, partial_failure: Option<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 1.0;
        self.error_message = partial_failure;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Cancelled)
    }

    pub fn set_progress(&mut self, progress: f32) -> Result<(), JobError> {
        self.ensure_mutable()?;
        self.progress = progress.clamp(0.0, 1.0);
        Ok(())
    }

    /// Mutable access to export details while the job is still running.
    pub fn export_mut(&mut self) -> Result<Option<&mut ExportDetails>, JobError> {
        self.ensure_mutable()?;
        Ok(match &mut self.kind {
            JobKind::Export(details) => Some(details),
            JobKind::Import(_) => None,
        })
    }

    /// Mutable access to import details while the job is still running.
    pub fn import_mut(&mut self) -> Result<Option<&mut ImportDetails>, JobError> {
        self.ensure_mutable()?;
        Ok(match &mut self.kind {
            JobKind::Import(details) => Some(details),
            JobKind::Export(_) => None,
        })
    }
}
