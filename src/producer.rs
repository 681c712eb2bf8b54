//! Producer-side operations: submitting jobs and locating their artifacts.

use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, WorkflowError};
use crate::jobs::manager::JobManager;
use crate::jobs::model::Job;
use crate::worker::supervisor::{SupervisorOutcome, WorkerSupervisor};
use crate::workflow::archive::archive_path;

const WORKING_DIRECTORY: &str = "working_directory";

/// Enqueue `payload` as a new job and make sure a worker will pick it up.
///
/// The job's `working_directory` defaults to `<work_dir>/<id>`, is made
/// absolute and is created before the job becomes visible to the worker.
pub async fn submit(
    jobs: &JobManager,
    supervisor: &WorkerSupervisor,
    config: &Config,
    mut payload: Value,
) -> Result<(Uuid, SupervisorOutcome)> {
    let id = Uuid::new_v4();
    let Some(fields) = payload.as_object_mut() else {
        return Err(WorkflowError::InvalidPayload {
            id,
            reason: "payload must be a JSON object".to_string(),
        }
        .into());
    };

    let job_dir = resolve_working_directory(config, id, fields)?;
    std::fs::create_dir_all(&job_dir).map_err(WorkflowError::from)?;

    jobs.enqueue(Job::with_id(id, payload)).await?;

    let outcome = supervisor.ensure_running(config.launch()).await?;
    match outcome {
        SupervisorOutcome::Spawned(token) => info!(job_id = %id, pid = token.pid, "Started worker"),
        SupervisorOutcome::AlreadyRunning(token) => {
            debug!(job_id = %id, pid = token.pid, "Worker already running")
        }
    }
    Ok((id, outcome))
}

/// Fill in or absolutize the payload's working directory and return it.
pub fn resolve_working_directory(
    config: &Config,
    id: Uuid,
    fields: &mut Map<String, Value>,
) -> std::result::Result<PathBuf, WorkflowError> {
    let invalid = |reason: String| WorkflowError::InvalidPayload { id, reason };

    let dir = match fields.get(WORKING_DIRECTORY) {
        None | Some(Value::Null) => config.job_dir(id),
        Some(Value::String(dir)) => std::path::absolute(dir)
            .map_err(|e| invalid(format!("cannot resolve {WORKING_DIRECTORY} '{dir}': {e}")))?,
        Some(_) => return Err(invalid(format!("{WORKING_DIRECTORY} must be a string"))),
    };

    let rendered = dir
        .to_str()
        .ok_or_else(|| invalid(format!("{WORKING_DIRECTORY} is not valid UTF-8")))?
        .to_string();
    fields.insert(WORKING_DIRECTORY.to_string(), Value::String(rendered));
    Ok(dir)
}

/// Path of the job's archive, if the job produced one.
pub fn download(config: &Config, id: Uuid) -> Option<PathBuf> {
    let path = archive_path(&config.job_dir(id));
    path.is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::config::WorkerConfig;
    use crate::error::{Error, SupervisorError};
    use crate::store::MemoryQueueStore;
    use crate::worker::launcher::{WorkerLaunch, WorkerLauncher};

    /// Reports the test process itself as the launched worker.
    #[derive(Default)]
    struct InProcessLauncher {
        launches: AtomicUsize,
    }

    impl WorkerLauncher for InProcessLauncher {
        fn launch(&self, _launch: &WorkerLaunch) -> std::result::Result<u32, SupervisorError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(std::process::id())
        }
    }

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            work_dir: dir.to_path_buf(),
            workflow_dir: dir.join("workflow"),
            processing_exe: PathBuf::from("python"),
            queue_file: dir.join("job_queue.json"),
            worker: WorkerConfig::default(),
            tool_timeout: None,
        }
    }

    #[tokio::test]
    async fn submit_defaults_working_directory_and_starts_one_worker() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = Arc::new(MemoryQueueStore::new());
        let jobs = JobManager::new(store.clone());
        let launcher = Arc::new(InProcessLauncher::default());
        let supervisor = WorkerSupervisor::new(launcher.clone());

        let (first, outcome) = submit(&jobs, &supervisor, &config, json!({"geometry": {}}))
            .await
            .unwrap();
        assert!(matches!(outcome, SupervisorOutcome::Spawned(_)));

        let (_, outcome) = submit(&jobs, &supervisor, &config, json!({})).await.unwrap();
        assert!(matches!(outcome, SupervisorOutcome::AlreadyRunning(_)));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

        let job_dir = config.job_dir(first);
        assert!(job_dir.is_dir());
        let queued = store.snapshot();
        assert_eq!(queued.len(), 2);
        assert_eq!(
            queued[0].payload[WORKING_DIRECTORY],
            json!(job_dir.to_str().unwrap())
        );
    }

    #[test]
    fn relative_working_directory_is_made_absolute() {
        let config = config_in(std::path::Path::new("/srv/work"));
        let mut fields = json!({"working_directory": "jobs/a"})
            .as_object()
            .cloned()
            .unwrap();

        let dir = resolve_working_directory(&config, Uuid::new_v4(), &mut fields).unwrap();
        let expected = std::env::current_dir().unwrap().join("jobs/a");
        assert_eq!(dir, expected);
        assert_eq!(fields[WORKING_DIRECTORY], json!(expected.to_str().unwrap()));
    }

    #[test]
    fn non_string_working_directory_is_rejected() {
        let config = config_in(std::path::Path::new("/srv/work"));
        let mut fields = json!({"working_directory": 7}).as_object().cloned().unwrap();
        let err = resolve_working_directory(&config, Uuid::new_v4(), &mut fields).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn submit_rejects_non_object_payload() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let jobs = JobManager::new(Arc::new(MemoryQueueStore::new()));
        let supervisor = WorkerSupervisor::new(Arc::new(InProcessLauncher::default()));

        let err = submit(&jobs, &supervisor, &config, json!(["not", "an", "object"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Workflow(WorkflowError::InvalidPayload { .. })
        ));
        assert!(jobs.list_jobs().await.unwrap().is_empty());
    }

    #[test]
    fn download_only_when_archive_exists() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let id = Uuid::new_v4();
        assert_eq!(download(&config, id), None);

        let job_dir = config.job_dir(id);
        std::fs::create_dir_all(&job_dir).unwrap();
        assert_eq!(download(&config, id), None);

        std::fs::write(archive_path(&job_dir), b"PK").unwrap();
        assert_eq!(download(&config, id), Some(job_dir.join("scaled_model.zip")));
    }
}
