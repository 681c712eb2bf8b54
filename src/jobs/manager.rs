//! Job manager: queue operations shared by producers and the worker.
//!
//! Each operation is one transaction against the store: acquire the
//! exclusive lock, re-read the full list, mutate, save if anything changed.
//! The manager keeps no job state of its own between calls. Store work is
//! blocking (file locks) and runs on the blocking thread pool.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::jobs::model::{Job, JobState, JobSummary};
use crate::store::QueueStore;
use crate::worker::process::WorkerToken;

/// Queue API over a [`QueueStore`].
#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn QueueStore>,
}

impl JobManager {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Run `op` against the loaded list under the lock.
    ///
    /// `op` returns its result and whether the list must be saved.
    async fn transact<R, F>(&self, op: F) -> Result<R, QueueError>
    where
        F: FnOnce(&mut Vec<Job>) -> (R, bool) + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || -> Result<R, QueueError> {
            let mut txn = store.acquire_exclusive()?;
            let mut jobs = txn.load();
            let (result, dirty) = op(&mut jobs);
            if dirty {
                txn.save(&jobs)?;
            }
            Ok(result)
        })
        .await
        .map_err(|e| QueueError::Task(e.to_string()))?
    }

    /// Append a job in the `Queued` state.
    pub async fn enqueue(&self, mut job: Job) -> Result<(), QueueError> {
        job.state = JobState::Queued;
        let id = job.id;
        self.transact(move |jobs| {
            jobs.push(job);
            ((), true)
        })
        .await?;
        info!(job_id = %id, "Job enqueued");
        Ok(())
    }

    /// Claim the first queued job in persisted order for `worker`.
    pub async fn claim_next(&self, worker: WorkerToken) -> Result<Option<Job>, QueueError> {
        let claimed = self
            .transact(move |jobs| {
                let Some(job) = jobs.iter_mut().find(|j| j.state == JobState::Queued) else {
                    return (None, false);
                };
                if job.transition_to(JobState::Running).is_err() {
                    return (None, false);
                }
                job.worker = Some(worker);
                (Some(job.clone()), true)
            })
            .await?;

        if let Some(ref job) = claimed {
            info!(job_id = %job.id, worker_pid = worker.pid, "Job claimed");
        }
        Ok(claimed)
    }

    /// Mark a running job finished. Returns whether the record changed.
    pub async fn mark_finished(&self, job: &Job) -> Result<bool, QueueError> {
        self.complete(job, JobState::Finished).await
    }

    /// Mark a running job failed. Returns whether the record changed.
    pub async fn mark_error(&self, job: &Job) -> Result<bool, QueueError> {
        self.complete(job, JobState::Error).await
    }

    async fn complete(&self, job: &Job, target: JobState) -> Result<bool, QueueError> {
        let reference = job.clone();
        let changed = self
            .transact(move |jobs| {
                let Some(entry) = jobs.iter_mut().find(|j| j.matches(&reference)) else {
                    warn!(job_id = %reference.id, owner_pid = reference.owner_pid, "No matching job to complete");
                    return (false, false);
                };
                match entry.transition_to(target) {
                    Ok(()) => (true, true),
                    Err(e) => {
                        warn!(job_id = %reference.id, "{e}");
                        (false, false)
                    }
                }
            })
            .await?;

        if changed {
            info!(job_id = %job.id, state = %target, "Job completed");
        }
        Ok(changed)
    }

    /// Current state of `id`, or `None` if no such record exists.
    pub async fn get_state(&self, id: Uuid) -> Result<Option<JobState>, QueueError> {
        self.transact(move |jobs| (jobs.iter().find(|j| j.id == id).map(|j| j.state), false))
            .await
    }

    /// `{id, state}` of every record in persisted order.
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, QueueError> {
        self.transact(|jobs| (jobs.iter().map(Job::summary).collect(), false))
            .await
    }

    /// Remove `id` unless it is running. Returns whether a record was removed.
    ///
    /// Artifacts in the job's working directory are left for the caller.
    pub async fn remove(&self, id: Uuid) -> Result<bool, QueueError> {
        let removed = self
            .transact(move |jobs| {
                match jobs
                    .iter()
                    .position(|j| j.id == id && j.state != JobState::Running)
                {
                    Some(index) => {
                        jobs.remove(index);
                        (true, true)
                    }
                    None => (false, false),
                }
            })
            .await?;

        if removed {
            info!(job_id = %id, "Job removed");
        } else {
            debug!(job_id = %id, "Job not removed (unknown or running)");
        }
        Ok(removed)
    }

    /// Whether `id` has reached `Finished` or `Error`.
    pub async fn is_finished(&self, id: Uuid) -> Result<bool, QueueError> {
        Ok(self.get_state(id).await?.is_some_and(|s| s.is_terminal()))
    }

    /// Drop every terminal record. Returns how many were discarded.
    pub async fn clear_stale(&self) -> Result<usize, QueueError> {
        let cleared = self
            .transact(|jobs| {
                let before = jobs.len();
                jobs.retain(|j| !j.state.is_terminal());
                let cleared = before - jobs.len();
                (cleared, cleared > 0)
            })
            .await?;

        if cleared > 0 {
            info!(count = cleared, "Cleared finished jobs");
        }
        Ok(cleared)
    }

    /// Fail every running job whose worker is gone.
    ///
    /// A running record with no recorded worker, or whose worker token fails
    /// `is_alive`, is moved to `Error`. Returns the ids that were failed.
    pub async fn fail_orphaned<F>(&self, is_alive: F) -> Result<Vec<Uuid>, QueueError>
    where
        F: Fn(&WorkerToken) -> bool + Send + 'static,
    {
        let orphaned = self
            .transact(move |jobs| {
                let mut orphaned = Vec::new();
                for job in jobs.iter_mut().filter(|j| j.state == JobState::Running) {
                    if job.worker.as_ref().is_some_and(&is_alive) {
                        continue;
                    }
                    if job.transition_to(JobState::Error).is_ok() {
                        orphaned.push(job.id);
                    }
                }
                let dirty = !orphaned.is_empty();
                (orphaned, dirty)
            })
            .await?;

        for id in &orphaned {
            warn!(job_id = %id, "Orphaned running job marked as error");
        }
        Ok(orphaned)
    }
}
