//! Running a single claimed job through the external workflow.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::WorkflowError;
use crate::jobs::model::Job;
use crate::workflow::archive::archive_output;
use crate::workflow::patch::{ConfigPatch, default_config_files};
use crate::workflow::tool::{ToolConfig, run_tool};

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The tool succeeded and its output was archived at `archive`.
    Succeeded { archive: PathBuf },
    /// The tool exited unsuccessfully (`None`: killed by a signal).
    Failed { exit_code: Option<i32> },
}

/// Executes one job. The worker loop reports the result to the queue.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> Result<JobOutcome, WorkflowError>;
}

/// The job payload as the workflow understands it.
#[derive(Debug, Deserialize)]
struct WorkflowPayload {
    working_directory: PathBuf,
    /// Named sub-configurations; unknown names are ignored.
    #[serde(flatten)]
    sections: Map<String, Value>,
}

/// Configures the workflow from the job payload, runs it, packages the output.
#[derive(Debug, Clone)]
pub struct WorkflowRunner {
    workflow_dir: PathBuf,
    tool: ToolConfig,
    config_files: BTreeMap<String, String>,
}

impl WorkflowRunner {
    pub fn new(workflow_dir: impl Into<PathBuf>, tool: ToolConfig) -> Self {
        Self {
            workflow_dir: workflow_dir.into(),
            tool,
            config_files: default_config_files(),
        }
    }

    /// Replace the section → config file mapping.
    pub fn with_config_files(mut self, config_files: BTreeMap<String, String>) -> Self {
        self.config_files = config_files;
        self
    }

    pub fn workflow_dir(&self) -> &Path {
        &self.workflow_dir
    }

    /// Patch every config file the payload has a section for.
    fn apply_sections(&self, job: &Job, sections: &Map<String, Value>) -> Result<(), WorkflowError> {
        for (section, value) in sections {
            let Some(file) = self.config_files.get(section) else {
                continue;
            };
            let path = self.workflow_dir.join(file);
            let patch = ConfigPatch::from_value(value).ok_or_else(|| WorkflowError::InvalidPayload {
                id: job.id,
                reason: format!("section '{section}' is not an object"),
            })?;
            patch.apply_to_file(&path)?;
            debug!(job_id = %job.id, section = %section, config = %path.display(), "Config patched");
        }
        Ok(())
    }
}

#[async_trait]
impl JobRunner for WorkflowRunner {
    async fn run(&self, job: &Job) -> Result<JobOutcome, WorkflowError> {
        let payload: WorkflowPayload =
            serde_json::from_value(job.payload.clone()).map_err(|e| WorkflowError::InvalidPayload {
                id: job.id,
                reason: e.to_string(),
            })?;

        self.apply_sections(job, &payload.sections)?;

        let job_dir = payload.working_directory;
        info!(job_id = %job.id, job_dir = %job_dir.display(), "Running workflow");
        let run = run_tool(&self.tool, &self.workflow_dir, &job_dir).await?;

        if !run.success() {
            warn!(
                job_id = %job.id,
                exit_code = ?run.exit_code,
                output = %run.output,
                "Workflow failed"
            );
            return Ok(JobOutcome::Failed {
                exit_code: run.exit_code,
            });
        }
        debug!(job_id = %job.id, output = %run.output, "Workflow output");

        let archive = tokio::task::spawn_blocking(move || archive_output(&job_dir))
            .await
            .map_err(|e| WorkflowError::Io(std::io::Error::other(e)))??;

        Ok(JobOutcome::Succeeded { archive })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        workflow_dir: PathBuf,
        job_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let workflow_dir = dir.path().join("workflow");
        let job_dir = dir.path().join("work").join("job");
        std::fs::create_dir_all(&workflow_dir).unwrap();
        std::fs::create_dir_all(&job_dir).unwrap();
        for (_, file) in crate::workflow::patch::DEFAULT_CONFIG_FILES {
            std::fs::write(workflow_dir.join(file), r#"{"identifier": "step"}"#).unwrap();
        }
        Fixture {
            _dir: dir,
            workflow_dir,
            job_dir,
        }
    }

    fn sh(script: &str) -> ToolConfig {
        ToolConfig::new("sh").with_args(["-c", script, "tool"])
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn success_patches_configs_and_archives() {
        let fx = fixture();
        let runner = WorkflowRunner::new(
            &fx.workflow_dir,
            sh("mkdir -p model && echo scaled > model/out.osim"),
        );
        let job = Job::new(json!({
            "working_directory": fx.job_dir,
            "geometry": {"in_unit": "mm", "subject_mass": "73"},
            "unmapped": {"ignored": true}
        }));

        let outcome = runner.run(&job).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Succeeded {
                archive: fx.job_dir.join("scaled_model.zip")
            }
        );
        assert!(fx.job_dir.join("scaled_model.zip").exists());

        assert_eq!(
            read_json(&fx.workflow_dir.join("geom_cust.conf")),
            json!({"identifier": "step", "in_unit": "mm", "subject_mass": "73"})
        );
        assert_eq!(
            read_json(&fx.workflow_dir.join("musc_cust.conf")),
            json!({"identifier": "step"})
        );
    }

    #[tokio::test]
    async fn nonzero_exit_fails_without_archive() {
        let fx = fixture();
        let runner = WorkflowRunner::new(&fx.workflow_dir, sh("mkdir -p model; exit 1"));
        let job = Job::new(json!({"working_directory": fx.job_dir}));

        let outcome = runner.run(&job).await.unwrap();
        assert_eq!(outcome, JobOutcome::Failed { exit_code: Some(1) });
        assert!(!fx.job_dir.join("scaled_model.zip").exists());
    }

    #[tokio::test]
    async fn payload_without_working_directory_is_invalid() {
        let fx = fixture();
        let runner = WorkflowRunner::new(&fx.workflow_dir, sh("exit 0"));
        let job = Job::new(json!({"input": {"Location": "/tmp/in.trc"}}));

        let err = runner.run(&job).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn non_object_section_is_invalid() {
        let fx = fixture();
        let runner = WorkflowRunner::new(&fx.workflow_dir, sh("exit 0"));
        let job = Job::new(json!({"working_directory": fx.job_dir, "muscle": "heavy"}));

        let err = runner.run(&job).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn success_without_output_dir_is_an_error() {
        let fx = fixture();
        let runner = WorkflowRunner::new(&fx.workflow_dir, sh("exit 0"));
        let job = Job::new(json!({"working_directory": fx.job_dir}));

        let err = runner.run(&job).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Archive { .. }));
    }
}
