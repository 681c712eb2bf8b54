//! The worker loop.
//!
//! ```text
//! Polling ──no job──▶ Idle ──(idle < max)──▶ Polling
//!    │                  └──(idle == max)──▶ Shutdown
//!    └──job claimed──▶ Executing ──▶ Polling (idle reset)
//! ```
//!
//! Strictly serial: one job at a time, in the order the queue yields them.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::jobs::manager::JobManager;
use crate::jobs::model::Job;
use crate::worker::process::WorkerToken;
use crate::workflow::runner::{JobOutcome, JobRunner};

/// Counts of what a worker did before shutting down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub finished: usize,
    pub failed: usize,
    /// Running jobs of dead workers swept to `Error` at startup.
    pub orphaned: usize,
}

/// Polls the queue and runs claimed jobs until the queue stays empty.
pub struct WorkflowExecutor {
    jobs: JobManager,
    runner: Arc<dyn JobRunner>,
    config: WorkerConfig,
    token: WorkerToken,
}

impl WorkflowExecutor {
    pub fn new(jobs: JobManager, runner: Arc<dyn JobRunner>, config: WorkerConfig) -> Self {
        Self {
            jobs,
            runner,
            config,
            token: WorkerToken::capture(std::process::id()),
        }
    }

    /// Run until `max_idle_polls` consecutive polls find no work.
    pub async fn run(&self) -> ExecutorStats {
        let mut stats = ExecutorStats {
            orphaned: self.sweep_orphans().await,
            ..ExecutorStats::default()
        };

        info!(
            pid = self.token.pid,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            max_idle_polls = self.config.max_idle_polls,
            "Worker started"
        );

        let mut idle_polls = 0u32;
        while idle_polls < self.config.max_idle_polls {
            tokio::time::sleep(self.config.poll_interval).await;

            let job = match self.jobs.claim_next(self.token).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    idle_polls += 1;
                    continue;
                }
                Err(e) => {
                    error!("Failed to poll queue: {e}");
                    idle_polls += 1;
                    continue;
                }
            };

            idle_polls = 0;
            if self.execute(&job).await {
                stats.finished += 1;
            } else {
                stats.failed += 1;
            }
        }

        info!(
            finished = stats.finished,
            failed = stats.failed,
            "Worker idle, shutting down"
        );
        stats
    }

    /// Run one claimed job and record the result. Returns true on success.
    async fn execute(&self, job: &Job) -> bool {
        let succeeded = match self.runner.run(job).await {
            Ok(JobOutcome::Succeeded { archive }) => {
                info!(job_id = %job.id, archive = %archive.display(), "Job finished");
                true
            }
            Ok(JobOutcome::Failed { exit_code }) => {
                warn!(job_id = %job.id, exit_code = ?exit_code, "Job failed");
                false
            }
            Err(e) => {
                error!(job_id = %job.id, "Job could not be executed: {e}");
                false
            }
        };

        let reported = if succeeded {
            self.jobs.mark_finished(job).await
        } else {
            self.jobs.mark_error(job).await
        };
        if let Err(e) = reported {
            error!(job_id = %job.id, "Failed to record job result: {e}");
        }
        succeeded
    }

    /// Fail running jobs left behind by a worker that died mid-job.
    async fn sweep_orphans(&self) -> usize {
        // A recycled pid fails the start-time check, so its job is swept too.
        let result = self.jobs.fail_orphaned(WorkerToken::is_alive).await;

        match result {
            Ok(ids) => ids.len(),
            Err(e) => {
                error!("Failed to sweep orphaned jobs: {e}");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::error::WorkflowError;
    use crate::jobs::model::JobState;
    use crate::store::MemoryQueueStore;

    /// Stub runner with scripted outcomes per job id (default: success).
    #[derive(Default)]
    struct StubRunner {
        failures: HashMap<Uuid, bool>,
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl JobRunner for StubRunner {
        async fn run(&self, job: &Job) -> Result<JobOutcome, WorkflowError> {
            self.seen.lock().unwrap().push(job.id);
            match self.failures.get(&job.id) {
                Some(true) => Err(WorkflowError::InvalidPayload {
                    id: job.id,
                    reason: "scripted".to_string(),
                }),
                Some(false) => Ok(JobOutcome::Failed { exit_code: Some(1) }),
                None => Ok(JobOutcome::Succeeded {
                    archive: "scaled_model.zip".into(),
                }),
            }
        }
    }

    fn fast_config(max_idle_polls: u32) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(5),
            max_idle_polls,
        }
    }

    fn manager() -> JobManager {
        JobManager::new(Arc::new(MemoryQueueStore::new()))
    }

    fn job() -> Job {
        Job::new(serde_json::json!({"working_directory": "/tmp/job"}))
    }

    #[tokio::test]
    async fn empty_queue_shuts_down_after_max_idle_polls() {
        let jobs = manager();
        let runner = Arc::new(StubRunner::default());
        let executor = WorkflowExecutor::new(jobs, runner.clone(), fast_config(3));

        let stats = tokio::time::timeout(Duration::from_secs(5), executor.run())
            .await
            .expect("worker should stop on its own");
        assert_eq!(stats, ExecutorStats::default());
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn processes_jobs_in_order_and_records_results() {
        let jobs = manager();
        let ok = job();
        let exit_failure = job();
        let exec_failure = job();
        for j in [&ok, &exit_failure, &exec_failure] {
            jobs.enqueue(j.clone()).await.unwrap();
        }

        let runner = Arc::new(StubRunner {
            failures: HashMap::from([(exit_failure.id, false), (exec_failure.id, true)]),
            ..StubRunner::default()
        });
        let executor = WorkflowExecutor::new(jobs.clone(), runner.clone(), fast_config(2));
        let stats = executor.run().await;

        assert_eq!(stats.finished, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(
            *runner.seen.lock().unwrap(),
            vec![ok.id, exit_failure.id, exec_failure.id]
        );
        assert_eq!(jobs.get_state(ok.id).await.unwrap(), Some(JobState::Finished));
        assert_eq!(
            jobs.get_state(exit_failure.id).await.unwrap(),
            Some(JobState::Error)
        );
        assert_eq!(
            jobs.get_state(exec_failure.id).await.unwrap(),
            Some(JobState::Error)
        );
    }

    #[tokio::test]
    async fn startup_sweeps_orphaned_running_jobs() {
        let jobs = manager();
        let orphan = job();
        jobs.enqueue(orphan.clone()).await.unwrap();
        // Claimed by a worker pid that cannot exist.
        jobs.claim_next(WorkerToken {
            pid: 0,
            started_at: None,
        })
        .await
        .unwrap();

        let executor =
            WorkflowExecutor::new(jobs.clone(), Arc::new(StubRunner::default()), fast_config(1));
        let stats = executor.run().await;

        assert_eq!(stats.orphaned, 1);
        assert_eq!(jobs.get_state(orphan.id).await.unwrap(), Some(JobState::Error));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn startup_sweeps_jobs_of_a_recycled_worker_pid() {
        let jobs = manager();
        let orphan = job();
        jobs.enqueue(orphan.clone()).await.unwrap();
        // The pid is alive (it is ours) but the start time belongs to an
        // earlier process that held the same pid.
        jobs.claim_next(WorkerToken {
            pid: std::process::id(),
            started_at: Some(1),
        })
        .await
        .unwrap();

        let executor =
            WorkflowExecutor::new(jobs.clone(), Arc::new(StubRunner::default()), fast_config(1));
        let stats = executor.run().await;

        assert_eq!(stats.orphaned, 1);
        assert_eq!(jobs.get_state(orphan.id).await.unwrap(), Some(JobState::Error));
    }

    #[tokio::test]
    async fn startup_keeps_jobs_of_a_live_worker() {
        let jobs = manager();
        let active = job();
        jobs.enqueue(active.clone()).await.unwrap();
        jobs.claim_next(WorkerToken::capture(std::process::id()))
            .await
            .unwrap();

        let executor =
            WorkflowExecutor::new(jobs.clone(), Arc::new(StubRunner::default()), fast_config(1));
        let stats = executor.run().await;

        assert_eq!(stats.orphaned, 0);
        assert_eq!(jobs.get_state(active.id).await.unwrap(), Some(JobState::Running));
    }
}
