//! Static auto-fix adapter: formatter, then linter.
//!
//! A non-zero exit from either tool is expected (linters exit non-zero while
//! unfixable issues remain) and only recorded. Failing to spawn a tool is an error.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{command_from_argv, run_command_with_timeout};

const FIXER_OUTPUT_LIMIT_BYTES: usize = 100_000;

#[derive(Debug, Clone)]
pub struct FixRequest {
    pub workdir: PathBuf,
    pub timeout: Duration,
}

/// Exit summary of one fixer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixStep {
    pub label: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixReport {
    pub steps: Vec<FixStep>,
}

pub trait StaticFixer {
    fn fix(&self, request: &FixRequest) -> Result<FixReport>;
}

/// Runs the configured formatter and linter commands in order.
#[derive(Debug, Clone)]
pub struct CommandFixers {
    pub formatter: Vec<String>,
    pub linter: Vec<String>,
}

impl StaticFixer for CommandFixers {
    #[instrument(skip_all)]
    fn fix(&self, request: &FixRequest) -> Result<FixReport> {
        let mut report = FixReport::default();
        for (label, argv) in [("formatter", &self.formatter), ("linter", &self.linter)] {
            info!(label, command = %argv.join(" "), "running fixer");
            let cmd = command_from_argv(argv, &request.workdir)?;
            let output =
                run_command_with_timeout(cmd, request.timeout, FIXER_OUTPUT_LIMIT_BYTES)
                    .with_context(|| format!("run {label}"))?;
            if output.timed_out {
                warn!(label, "fixer timed out");
            } else if !output.status.success() {
                debug!(
                    label,
                    exit_code = ?output.status.code(),
                    stderr = %output.stderr_lossy().trim(),
                    "fixer exited non-zero"
                );
            }
            report.steps.push(FixStep {
                label: label.to_string(),
                exit_code: output.status.code(),
                timed_out: output.timed_out,
            });
        }
        Ok(report)
    }
}
