//! Concurrency-safe registry of job records.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::record::{JobId, JobRecord};

/// In-memory job registry keyed by [`JobId`].
///
/// Reads return clones, never references into the map. `update` runs its
/// closure under the key's shard lock, so updates to one job are linearized
/// and readers never see a half-applied mutation. Closures are synchronous;
/// nothing holds a lock across an await point.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: DashMap<JobId, JobRecord>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any record with the same id.
    pub fn put(&self, job: JobRecord) {
        self.jobs.insert(job.job_id, job);
    }

    /// Snapshot of one record.
    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every record, oldest request first.
    pub fn list(&self) -> Vec<JobRecord> {
        self.list_matching(|_| true)
    }

    /// Snapshot of the records accepted by `filter`, oldest request first.
    pub fn list_matching(&self, filter: impl Fn(&JobRecord) -> bool) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.request_time);
        jobs
    }

    /// Apply `mutate` atomically. Returns `None` if the job does not exist.
    pub fn update<R>(&self, id: &JobId, mutate: impl FnOnce(&mut JobRecord) -> R) -> Option<R> {
        self.jobs.get_mut(id).map(|mut entry| mutate(entry.value_mut()))
    }

    /// Remove terminal jobs that finished before `cutoff`. Returns how many
    /// were removed.
    pub fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.is_terminal() && job.completed_time.is_some_and(|t| t < cutoff))
        });
        before.saturating_sub(self.jobs.len())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
