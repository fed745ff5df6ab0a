//! Bulk job tracking: records, the shared store and the worker pool.

mod record;
mod runner;
mod store;

pub use record::{
    ExportDetails, ExportIssue, ExportLevel, ImportDetails, ImportFile, ImportFileResult,
    JobError, JobId, JobKind, JobRecord, JobStatus, OutputFile,
};
pub use runner::{CancelOutcome, JobRunner};
pub use store::JobStore;
