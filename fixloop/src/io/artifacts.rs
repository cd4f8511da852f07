//! Transient per-attempt artifacts under `.fixloop/`.
//!
//! None of these files is a stable format: each attempt overwrites them and a
//! passing run removes them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::init::FixloopPaths;

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Read a file, returning `None` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(Some(contents))
}

/// Remove the report left by a previous attempt so a crashed test run cannot
/// be mistaken for a fresh one.
pub fn clear_report(report_path: &Path) -> Result<()> {
    remove_if_exists(report_path)
}

/// Remove every transient artifact after a passing run. The config stays.
pub fn remove_artifacts(paths: &FixloopPaths, report_path: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in [
        paths.output_log_path.as_path(),
        paths.error_log_path.as_path(),
        paths.prompt_path.as_path(),
        paths.patch_path.as_path(),
        paths.response_path.as_path(),
        report_path,
    ] {
        if path.exists() {
            remove_if_exists(path)?;
            removed.push(path.to_path_buf());
        }
    }
    debug!(removed = removed.len(), "artifacts removed");
    Ok(removed)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_artifacts_keeps_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = FixloopPaths::new(temp.path());
        let report = paths.fixloop_dir.join("report.json");
        write_text(&paths.config_path, "max_attempts = 3\n").expect("config");
        write_text(&paths.output_log_path, "out").expect("out");
        write_text(&paths.error_log_path, "err").expect("err");
        write_text(&report, "{}").expect("report");

        let removed = remove_artifacts(&paths, &report).expect("remove");

        assert_eq!(removed.len(), 3);
        assert!(paths.config_path.exists());
        assert!(!paths.output_log_path.exists());
        assert!(!paths.error_log_path.exists());
        assert!(!report.exists());
    }

    #[test]
    fn clear_report_tolerates_missing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        clear_report(&temp.path().join("report.json")).expect("clear");
    }

    #[test]
    fn read_optional_distinguishes_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("x.log");
        assert_eq!(read_optional(&path).expect("read"), None);
        write_text(&path, "body").expect("write");
        assert_eq!(read_optional(&path).expect("read").as_deref(), Some("body"));
    }
}
