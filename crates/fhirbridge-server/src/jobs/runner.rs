//! Bounded worker pool for bulk jobs.
//!
//! Every job gets a [`CancellationToken`]. Work waits for a semaphore permit,
//! so at most `max_concurrent_jobs` jobs process at once and the rest stay
//! `Pending`. Processing runs in its own task under a timeout; a timeout fails
//! the job instead of leaving it `Processing`. A panicking task fails the job
//! too when panics unwind; release builds abort instead.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::record::{JobId, JobRecord, JobStatus};
use super::store::JobStore;
use crate::operations::bulk::cleanup_expired_exports;

/// Result of a cancellation request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The job moved to `Cancelled`; carries the updated snapshot.
    Cancelled(JobRecord),
    NotFound,
    /// The job had already reached the given terminal status.
    AlreadyTerminal(JobStatus),
}

impl CancelOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Schedules job processing and owns the cancellation tokens.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<JobStore>,
    semaphore: Arc<Semaphore>,
    tokens: Arc<DashMap<JobId, CancellationToken>>,
    job_timeout: Duration,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, max_concurrent_jobs: usize, job_timeout: Duration) -> Self {
        Self {
            store,
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            tokens: Arc::new(DashMap::new()),
            job_timeout,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Number of jobs registered with the pool (queued or running).
    pub fn active_jobs(&self) -> usize {
        self.tokens.len()
    }

    /// Schedule `work` for a job already stored in `Pending`.
    ///
    /// Returns immediately. `work` receives the job's cancellation token and
    /// is expected to poll it at safe checkpoints.
    pub fn spawn<F, Fut>(&self, job_id: JobId, work: F) -> JoinHandle<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        self.tokens.insert(job_id, token.clone());

        let runner = self.clone();
        tokio::spawn(async move {
            let _permit = match runner.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    runner.fail_job(&job_id, "Worker pool is shut down");
                    runner.tokens.remove(&job_id);
                    return;
                }
            };

            if token.is_cancelled() {
                tracing::debug!(job_id = %job_id, "Job cancelled while queued; skipping");
                runner.tokens.remove(&job_id);
                return;
            }

            let mut handle = tokio::spawn(work(token.clone()));
            match tokio::time::timeout(runner.job_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    tracing::error!(
                        job_id = %job_id,
                        error = %join_err,
                        "Job processing task crashed"
                    );
                    runner.fail_job(&job_id, format!("Job processing crashed: {join_err}"));
                }
                Err(_) => {
                    token.cancel();
                    handle.abort();
                    tracing::error!(
                        job_id = %job_id,
                        timeout_secs = runner.job_timeout.as_secs(),
                        "Job exceeded processing timeout"
                    );
                    runner.fail_job(
                        &job_id,
                        format!(
                            "Job exceeded processing timeout of {}s",
                            runner.job_timeout.as_secs()
                        ),
                    );
                }
            }

            runner.tokens.remove(&job_id);
        })
    }

    /// Move a job to `Cancelled` and signal its processing routine.
    pub fn cancel(&self, job_id: &JobId) -> CancelOutcome {
        let outcome = self.store.update(job_id, |job| {
            if job.is_terminal() {
                return CancelOutcome::AlreadyTerminal(job.status);
            }
            match job.cancel() {
                Ok(()) => CancelOutcome::Cancelled(job.clone()),
                Err(_) => CancelOutcome::AlreadyTerminal(job.status),
            }
        });

        let outcome = outcome.unwrap_or(CancelOutcome::NotFound);
        if outcome.is_cancelled() {
            if let Some(token) = self.tokens.get(job_id) {
                token.cancel();
            }
            tracing::info!(job_id = %job_id, "Job cancelled");
        }
        outcome
    }

    fn fail_job(&self, job_id: &JobId, message: impl Into<String>) {
        let message = message.into();
        match self.store.update(job_id, |job| job.fail(message)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::debug!(job_id = %job_id, error = %e, "Job already terminal; not failing")
            }
            None => tracing::warn!(job_id = %job_id, "Job vanished before it could be failed"),
        }
    }

    /// Start background cleanup of expired jobs and export directories.
    pub fn start_cleanup_task(
        &self,
        export_root: PathBuf,
        retention: Duration,
        interval: Duration,
    ) -> JoinHandle<()> {
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                let cutoff = match chrono::Duration::from_std(retention) {
                    Ok(age) => Utc::now() - age,
                    Err(e) => {
                        tracing::warn!(error = %e, "Invalid retention period; skipping cleanup");
                        continue;
                    }
                };
                let removed = store.remove_terminal_before(cutoff);
                if removed > 0 {
                    tracing::info!(removed, "Evicted expired bulk jobs");
                }

                match cleanup_expired_exports(&export_root, retention).await {
                    Ok(cleaned) if cleaned > 0 => {
                        tracing::debug!(cleaned, "Export directory cleanup completed");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Export directory cleanup failed");
                    }
                    _ => {}
                }
            }
        })
    }
}
