//! Packaging the tool's output directory as a zip artifact.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::WorkflowError;

/// Directory, relative to the job directory, that the tool writes into.
pub const OUTPUT_DIR: &str = "model";

/// Archive file name, placed in the job directory.
pub const ARCHIVE_NAME: &str = "scaled_model.zip";

/// Where the archive for `job_dir` lives.
pub fn archive_path(job_dir: &Path) -> PathBuf {
    job_dir.join(ARCHIVE_NAME)
}

/// Zip `<job_dir>/model` into `<job_dir>/scaled_model.zip`.
///
/// Entry names are relative to the job directory, so every entry starts
/// with `model/`. The archive is built under a temporary name and renamed
/// into place, so a partial archive is never visible.
pub fn archive_output(job_dir: &Path) -> Result<PathBuf, WorkflowError> {
    let source = job_dir.join(OUTPUT_DIR);
    let target = archive_path(job_dir);
    let archive_err = |reason: String| WorkflowError::Archive {
        path: source.clone(),
        reason,
    };

    if !source.is_dir() {
        return Err(archive_err("output directory is missing".to_string()));
    }

    let tmp_target = job_dir.join(format!("{ARCHIVE_NAME}.tmp"));
    write_archive(job_dir, &source, &tmp_target).map_err(|e| {
        let _ = fs::remove_file(&tmp_target);
        archive_err(e.to_string())
    })?;
    fs::rename(&tmp_target, &target).map_err(|e| archive_err(e.to_string()))?;

    debug!(archive = %target.display(), "Output archived");
    Ok(target)
}

fn write_archive(root: &Path, source: &Path, target: &Path) -> zip::result::ZipResult<()> {
    let mut zip = ZipWriter::new(File::create(target)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut zip)?;
        }
    }

    zip.finish()?;
    Ok(())
}
