//! Workflow execution: what the worker process does with a claimed job.
//!
//! - `patch`: shallow merge of payload sections into the tool's config files
//! - `tool`: invoking the external tool with an optional timeout
//! - `archive`: zipping the tool's `model` output
//! - `runner`: one job end to end (`JobRunner`, `WorkflowRunner`)
//! - `executor`: the polling loop with idle shutdown

pub mod archive;
pub mod executor;
pub mod patch;
pub mod runner;
pub mod tool;

pub use archive::{ARCHIVE_NAME, OUTPUT_DIR, archive_path};
pub use executor::{ExecutorStats, WorkflowExecutor};
pub use patch::ConfigPatch;
pub use runner::{JobOutcome, JobRunner, WorkflowRunner};
pub use tool::ToolConfig;
