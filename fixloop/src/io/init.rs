//! Layout of `.fixloop/` and the `fixloop init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{FixloopConfig, write_config};

/// Tool-owned directory, exempt from the safety gate and change detection.
pub const FIXLOOP_DIR: &str = ".fixloop/";

/// All canonical paths within `.fixloop/` for a project root.
#[derive(Debug, Clone)]
pub struct FixloopPaths {
    pub root: PathBuf,
    pub fixloop_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub output_log_path: PathBuf,
    pub error_log_path: PathBuf,
    pub prompt_path: PathBuf,
    pub patch_path: PathBuf,
    pub response_path: PathBuf,
}

impl FixloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let fixloop_dir = root.join(".fixloop");
        Self {
            root: root.clone(),
            fixloop_dir: fixloop_dir.clone(),
            gitignore_path: fixloop_dir.join(".gitignore"),
            config_path: fixloop_dir.join("config.toml"),
            output_log_path: fixloop_dir.join("test-output.log"),
            error_log_path: fixloop_dir.join("test-error.log"),
            prompt_path: fixloop_dir.join("prompt.md"),
            patch_path: fixloop_dir.join("repair.patch"),
            response_path: fixloop_dir.join("repair-response.md"),
        }
    }

    /// Resolve the configured report path against the root.
    pub fn report_path(&self, cfg: &FixloopConfig) -> PathBuf {
        self.root.join(&cfg.test.report_path)
    }
}

/// Options for `init_fixloop`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config.
    pub force: bool,
}

/// Write the default config and `.fixloop/.gitignore` under `root`.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_fixloop(root: &Path, options: &InitOptions) -> Result<FixloopPaths> {
    let paths = FixloopPaths::new(root);
    if paths.fixloop_dir.exists() && !paths.fixloop_dir.is_dir() {
        return Err(anyhow!("fixloop init: .fixloop exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "fixloop init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.fixloop_dir)
        .with_context(|| format!("create directory {}", paths.fixloop_dir.display()))?;
    fs::write(&paths.gitignore_path, FIXLOOP_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &FixloopConfig::default())?;

    Ok(paths)
}

const FIXLOOP_GITIGNORE: &str = "*.log\n*.json\nprompt.md\nrepair.patch\nrepair-response.md\n";
